use std::time::Duration;

use imgfetch_engine::ProgressSink;
use indicatif::{ProgressBar, ProgressStyle};

fn download_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{spinner:.green} {msg}\n[{elapsed_precise}] [{bar:40.green/white}] {bytes}/{total_bytes} @ {bytes_per_sec}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ")
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("{spinner:.green} {msg} {bytes} @ {bytes_per_sec}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

/// Progress bar fed by the fetcher's progress reports
pub struct DownloadProgress {
    bar: ProgressBar,
}

impl DownloadProgress {
    pub fn new(url: &str) -> Self {
        let bar = ProgressBar::new(0);
        bar.set_style(spinner_style());
        bar.set_message(format!("Downloading {url}"));
        bar.enable_steady_tick(Duration::from_millis(200));
        Self { bar }
    }

    pub fn finish(&self, message: impl Into<std::borrow::Cow<'static, str>>) {
        self.bar.finish_with_message(message);
    }

    pub fn abandon(&self) {
        self.bar.abandon();
    }
}

impl ProgressSink for DownloadProgress {
    fn on_progress(&self, received: u64, total: Option<u64>) {
        // A retry restarts the body, so the length may go back down
        if let Some(total) = total {
            if self.bar.length() != Some(total) {
                self.bar.set_style(download_style());
                self.bar.set_length(total);
            }
        }
        self.bar.set_position(received);
    }
}
