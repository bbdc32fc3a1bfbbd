//! External playback process fed through a pipe on its stdin

use crate::config::PlayerConfig;
use crate::error::{Error, Result};
use std::fmt;
use std::process::{ExitStatus, Stdio};
use tokio::process::{Child, ChildStdin, Command};

/// How the playback process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackExit {
    Exited(i32),
    Signaled(i32),
    Abnormal,
}

impl PlaybackExit {
    fn from_status(status: ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return PlaybackExit::Exited(code);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return PlaybackExit::Signaled(signal);
            }
        }
        PlaybackExit::Abnormal
    }

    pub fn success(&self) -> bool {
        matches!(self, PlaybackExit::Exited(0))
    }
}

impl fmt::Display for PlaybackExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlaybackExit::Exited(code) => write!(f, "exited with status {code}"),
            PlaybackExit::Signaled(sig) => write!(f, "terminated by signal {sig}"),
            PlaybackExit::Abnormal => write!(f, "exited abnormally"),
        }
    }
}

pub struct PlaybackProcess {
    child: Child,
    program: String,
}

impl PlaybackProcess {
    pub fn spawn(config: &PlayerConfig) -> Result<Self> {
        let child = Command::new(&config.program)
            .args(&config.args)
            .stdin(Stdio::piped())
            .spawn()
            .map_err(|e| {
                Error::Io(std::io::Error::new(
                    e.kind(),
                    format!("cannot start player `{}`: {e}", config.program),
                ))
            })?;
        tracing::debug!(program = %config.program, pid = ?child.id(), "started audio player");
        Ok(Self {
            child,
            program: config.program.clone(),
        })
    }

    /// Write end of the pipe into the player. Dropping it signals end of audio.
    pub fn take_input(&mut self) -> Result<ChildStdin> {
        self.child
            .stdin
            .take()
            .ok_or_else(|| Error::Protocol(format!("player `{}` has no stdin pipe", self.program)))
    }

    pub async fn wait(mut self) -> Result<PlaybackExit> {
        drop(self.child.stdin.take());
        let status = self.child.wait().await?;
        let exit = PlaybackExit::from_status(status);
        tracing::debug!(program = %self.program, %exit, "audio player finished");
        Ok(exit)
    }

    /// Stop the player after a failed transfer.
    pub async fn abort(mut self) {
        if let Err(e) = self.child.kill().await {
            tracing::debug!(error = %e, "player already gone");
        }
    }
}
