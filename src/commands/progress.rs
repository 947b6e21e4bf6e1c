// src/commands/progress.rs
//! Terminal progress for install runs
//!
//! An overall bar counting recipes, with a spinner line below naming the
//! recipe and stage in flight.

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use keg::progress::ProgressTracker;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// indicatif-backed [`ProgressTracker`]
pub struct InstallProgress {
    _multi: MultiProgress,
    overall: ProgressBar,
    status: ProgressBar,
    finished: AtomicBool,
}

impl InstallProgress {
    pub fn new(operation: &str) -> Self {
        let multi = MultiProgress::new();

        let overall = ProgressBar::new(0);
        if let Ok(style) =
            ProgressStyle::default_bar().template("{msg} ({pos}/{len}) [{bar:40.green/dim}] {percent}%")
        {
            overall.set_style(style.progress_chars("##-"));
        }
        overall.set_message(operation.to_string());

        let status = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("  {spinner:.cyan} {msg}") {
            status.set_style(style);
        }
        status.enable_steady_tick(Duration::from_millis(100));

        let overall = multi.add(overall);
        let status = multi.add(status);

        Self {
            _multi: multi,
            overall,
            status,
            finished: AtomicBool::new(false),
        }
    }
}

impl ProgressTracker for InstallProgress {
    fn set_message(&self, message: &str) {
        self.status.set_message(message.to_string());
    }

    fn increment(&self, amount: u64) {
        self.overall.inc(amount);
    }

    fn set_length(&self, length: u64) {
        self.overall.set_length(length);
    }

    fn position(&self) -> u64 {
        self.overall.position()
    }

    fn length(&self) -> u64 {
        self.overall.length().unwrap_or(0)
    }

    fn finish_with_message(&self, message: &str) {
        self.status.finish_and_clear();
        self.overall.finish_with_message(message.to_string());
        self.finished.store(true, Ordering::Relaxed);
    }

    fn finish_with_error(&self, message: &str) {
        self.status.finish_and_clear();
        self.overall.abandon_with_message(message.to_string());
        self.finished.store(true, Ordering::Relaxed);
    }

    fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Relaxed)
    }
}

impl Drop for InstallProgress {
    fn drop(&mut self) {
        if !self.overall.is_finished() {
            self.status.finish_and_clear();
            self.overall.abandon();
        }
    }
}
