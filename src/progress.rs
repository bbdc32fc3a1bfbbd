//! Transfer progress bar for the interactive client

use indicatif::{ProgressBar, ProgressStyle};
use std::time::Instant;

pub struct TransferProgress {
    bar: ProgressBar,
    start_time: Instant,
}

impl TransferProgress {
    /// A bar for `total` bytes; hidden when `visible` is false.
    pub fn new(label: &str, total: u64, visible: bool) -> Self {
        let bar = if visible {
            ProgressBar::new(total)
        } else {
            ProgressBar::hidden()
        };
        bar.set_style(
            ProgressStyle::default_bar()
                .template("  {msg} [{bar:30.cyan/blue}] {bytes}/{total_bytes} {bytes_per_sec}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
        bar.set_message(label.to_string());
        Self {
            bar,
            start_time: Instant::now(),
        }
    }

    /// Handle to move into a relay progress callback.
    pub fn handle(&self) -> ProgressBar {
        self.bar.clone()
    }

    pub fn position(&self) -> u64 {
        self.bar.position()
    }

    pub fn finish(&self, bytes: u64) {
        let secs = self.start_time.elapsed().as_secs_f64();
        let rate = if secs > 0.0 {
            bytes as f64 / secs / 1_048_576.0
        } else {
            0.0
        };
        self.bar
            .finish_with_message(format!("done, {:.1} MB/s", rate));
    }

    pub fn fail(&self, msg: &str) {
        self.bar.abandon_with_message(format!("failed: {msg}"));
    }
}
