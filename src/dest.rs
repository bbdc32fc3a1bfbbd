//! Local destinations for saved files
//!
//! Paths received from the server are relative catalog names. They are
//! joined under the client's save directory after rejecting anything that
//! could escape it, and missing intermediate directories are created with
//! the save directory's own permissions.

use crate::error::{Error, Result};
use std::fs;
use std::path::{Component, Path, PathBuf};

/// Turn a catalog name into a safe relative path.
pub fn safe_relative(name: &str) -> Result<PathBuf> {
    if name.contains('\0') {
        return Err(Error::Protocol(format!("path {name:?} contains NUL byte")));
    }
    let mut safe = PathBuf::new();
    for component in Path::new(name).components() {
        match component {
            Component::CurDir => {}
            Component::Normal(s) => safe.push(s),
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(Error::Protocol(format!(
                    "path {name:?} contains disallowed component {component:?}"
                )));
            }
        }
    }
    if safe.as_os_str().is_empty() {
        return Err(Error::Protocol(format!("empty destination path {name:?}")));
    }
    Ok(safe)
}

/// Make sure `library_dir` exists and return its permissions.
fn library_permissions(library_dir: &Path) -> Result<fs::Permissions> {
    if !library_dir.exists() {
        let mut builder = fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            builder.mode(0o700);
        }
        builder.create(library_dir)?;
        tracing::info!(dir = %library_dir.display(), "created library directory");
    }
    Ok(fs::metadata(library_dir)?.permissions())
}

/// Create every directory between `library_dir` and the file named by
/// `name`, and return the full destination path of that file.
pub fn ensure_destination(library_dir: &Path, name: &str) -> Result<PathBuf> {
    let relative = safe_relative(name)?;
    let permissions = library_permissions(library_dir)?;

    let mut current = library_dir.to_path_buf();
    if let Some(parent) = relative.parent() {
        for component in parent.components() {
            current.push(component);
            match fs::create_dir(&current) {
                Ok(()) => {
                    fs::set_permissions(&current, permissions.clone())?;
                    tracing::debug!(dir = %current.display(), "created directory");
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
                Err(e) => return Err(e.into()),
            }
        }
    }
    Ok(library_dir.join(relative))
}
