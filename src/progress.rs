use indicatif::{ProgressBar, ProgressStyle};
use std::sync::atomic::{AtomicU64, Ordering};

/// Completion counter shared by the workers of a batch, mirrored to a progress bar.
pub struct Progress {
    completed: AtomicU64,
    total: u64,
    bar: ProgressBar,
}

impl Progress {
    pub fn new(total: u64, message: &str) -> Self {
        let bar = ProgressBar::new(total);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{msg}\n[{bar:40.cyan/blue}] {pos}/{len} ({percent}%) ETA: {eta}")
                .expect("Progress template should always parse")
                .progress_chars("█▓▒░ "),
        );
        bar.set_message(message.to_string());
        Self::with_bar(total, bar)
    }

    pub fn hidden(total: u64) -> Self {
        Self::with_bar(total, ProgressBar::hidden())
    }

    fn with_bar(total: u64, bar: ProgressBar) -> Self {
        Self {
            completed: AtomicU64::new(0),
            total,
            bar,
        }
    }

    /// Marks one item finished, whatever its outcome. Returns the new count.
    pub fn tick(&self) -> u64 {
        self.bar.inc(1);
        self.completed.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn finish(&self, message: &str) {
        self.bar.finish_with_message(format!("✓ {}", message));
    }
}
