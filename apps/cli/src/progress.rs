//! Progress bar for a CLI transfer

use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use pauseget_core::AttemptOutcome;
use std::time::Duration;

/// Percent-based bar driven by transfer notifications
pub struct TransferProgress {
    bar: ProgressBar,
}

impl TransferProgress {
    pub fn new(name: &str) -> Self {
        let bar = ProgressBar::new(100);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos:>3}% {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("█▓▒░  "),
        );
        bar.set_message(name.to_string());
        bar.enable_steady_tick(Duration::from_millis(120));
        Self { bar }
    }

    /// Progress sink handed to the engine; runs on the worker task
    pub fn sink(&self) -> impl Fn(u8) + Send + Sync + 'static {
        let bar = self.bar.clone();
        move |percent: u8| bar.set_position(u64::from(percent))
    }

    pub fn bar(&self) -> ProgressBar {
        self.bar.clone()
    }

    pub fn println(&self, line: impl AsRef<str>) {
        self.bar.println(line);
    }

    pub fn paused(&self) {
        self.bar.set_message(format!("{} Paused", style("⏸").yellow()));
    }

    pub fn resumed(&self, name: &str) {
        self.bar.set_message(name.to_string());
    }

    pub fn completed(&self) {
        self.bar.set_position(100);
        self.bar.finish_with_message(format!(
            "{} Download complete",
            style("✓").green().bold()
        ));
    }

    pub fn failed(&self, outcome: AttemptOutcome) {
        self.bar.set_message(format!(
            "{} Failed: {}",
            style("✗").red().bold(),
            outcome
        ));
    }

    pub fn abandon(&self) {
        self.bar.abandon();
    }
}
