use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use parking_lot::Mutex;
use stash_engine::{DownloadProgress, ProgressFn};
use std::{collections::HashMap, sync::Arc, time::Duration};

fn download_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{spinner:.green} {msg}\n[{elapsed_precise}] [{bar:40.green/white}] {bytes}/{total_bytes} @ {bytes_per_sec}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ")
}

/// One progress bar per URL being downloaded, created on the first chunk.
#[derive(Clone)]
pub struct ProgressManager {
    multi: MultiProgress,
    bars: Arc<Mutex<HashMap<String, ProgressBar>>>,
    disabled: bool,
}

impl ProgressManager {
    pub fn new(multi: MultiProgress) -> Self {
        Self {
            multi,
            bars: Arc::new(Mutex::new(HashMap::new())),
            disabled: false,
        }
    }

    pub fn new_disabled(multi: MultiProgress) -> Self {
        Self {
            multi,
            bars: Arc::new(Mutex::new(HashMap::new())),
            disabled: true,
        }
    }

    pub fn update(&self, url: &str, progress: DownloadProgress) {
        if self.disabled {
            return;
        }

        let mut bars = self.bars.lock();
        let bar = bars.entry(url.to_string()).or_insert_with(|| {
            let bar = self.multi.add(ProgressBar::new(0));
            bar.set_style(download_style());
            bar.set_message(format!("Downloading {url}"));
            bar.enable_steady_tick(Duration::from_millis(500));
            bar
        });
        if let Some(total) = progress.total_bytes {
            bar.set_length(total);
        }
        bar.set_position(progress.bytes_written);
    }

    /// Close the bar for `url`, if one was ever shown.
    pub fn finish(&self, url: &str) {
        if let Some(bar) = self.bars.lock().remove(url) {
            bar.finish_and_clear();
        }
    }

    /// Callback suitable for the downloader.
    pub fn callback(&self) -> ProgressFn {
        let manager = self.clone();
        Arc::new(move |url: &str, progress: DownloadProgress| manager.update(url, progress))
    }

    #[inline]
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }
}
