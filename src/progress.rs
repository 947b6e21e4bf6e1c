// src/progress.rs

//! Progress reporting for install runs
//!
//! The orchestrator reports through [`ProgressTracker`]: the length is the
//! number of recipes with work to do, the message names the recipe and
//! stage in flight, and each finished recipe (whatever its outcome) moves
//! the position on by one.
//!
//! Implementations:
//! - `SilentProgress`: no output (library callers, tests)
//! - `LogProgress`: messages go to tracing
//! - `CallbackProgress`: forwards [`ProgressEvent`]s to a closure
//!
//! The CLI adds an indicatif bar in `commands::progress`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{info, warn};

/// Sink for install-run progress
///
/// Install workers call into it concurrently.
pub trait ProgressTracker: Send + Sync {
    /// Recipe and stage currently in flight
    fn set_message(&self, message: &str);

    /// `amount` more recipes settled
    fn increment(&self, amount: u64);

    /// Recipes the run has to settle
    fn set_length(&self, length: u64);

    fn position(&self) -> u64;

    fn length(&self) -> u64;

    /// The run ended with every recipe in place
    fn finish_with_message(&self, message: &str);

    /// The run ended with at least one failure
    fn finish_with_error(&self, message: &str);

    fn is_finished(&self) -> bool;
}

/// Position, length and finished flag shared by the trackers below
#[derive(Debug, Default)]
struct Counters {
    position: AtomicU64,
    length: AtomicU64,
    finished: AtomicBool,
}

impl Counters {
    /// Advance and return the new position
    fn advance(&self, amount: u64) -> u64 {
        self.position.fetch_add(amount, Ordering::Relaxed) + amount
    }

    fn position(&self) -> u64 {
        self.position.load(Ordering::Relaxed)
    }

    fn length(&self) -> u64 {
        self.length.load(Ordering::Relaxed)
    }

    fn set_length(&self, length: u64) {
        self.length.store(length, Ordering::Relaxed);
    }

    fn finish(&self) {
        self.finished.store(true, Ordering::Relaxed);
    }

    fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Relaxed)
    }
}

/// Counts without reporting
#[derive(Debug, Default)]
pub struct SilentProgress {
    counters: Counters,
}

impl SilentProgress {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProgressTracker for SilentProgress {
    fn set_message(&self, _message: &str) {}

    fn increment(&self, amount: u64) {
        self.counters.advance(amount);
    }

    fn set_length(&self, length: u64) {
        self.counters.set_length(length);
    }

    fn position(&self) -> u64 {
        self.counters.position()
    }

    fn length(&self) -> u64 {
        self.counters.length()
    }

    fn finish_with_message(&self, _message: &str) {
        self.counters.finish();
    }

    fn finish_with_error(&self, _message: &str) {
        self.counters.finish();
    }

    fn is_finished(&self) -> bool {
        self.counters.is_finished()
    }
}

/// Reports through tracing, for non-interactive runs
#[derive(Debug)]
pub struct LogProgress {
    label: String,
    counters: Counters,
}

impl LogProgress {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            counters: Counters::default(),
        }
    }
}

impl ProgressTracker for LogProgress {
    fn set_message(&self, message: &str) {
        info!("[{}] {}", self.label, message);
    }

    fn increment(&self, amount: u64) {
        let done = self.counters.advance(amount);
        let total = self.counters.length();
        if total > 0 {
            info!("[{}] {} of {} recipes done", self.label, done, total);
        }
    }

    fn set_length(&self, length: u64) {
        self.counters.set_length(length);
    }

    fn position(&self) -> u64 {
        self.counters.position()
    }

    fn length(&self) -> u64 {
        self.counters.length()
    }

    fn finish_with_message(&self, message: &str) {
        self.counters.finish();
        info!("[{}] {}", self.label, message);
    }

    fn finish_with_error(&self, message: &str) {
        self.counters.finish();
        warn!("[{}] {}", self.label, message);
    }

    fn is_finished(&self) -> bool {
        self.counters.is_finished()
    }
}

/// Updates delivered to a [`CallbackProgress`] closure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    Message(String),
    Position { current: u64, total: u64 },
    Finished(String),
    Error(String),
}

/// Forwards every update to a closure (GUIs, test harnesses)
pub struct CallbackProgress<F: Fn(ProgressEvent) + Send + Sync> {
    on_event: F,
    counters: Counters,
}

impl<F: Fn(ProgressEvent) + Send + Sync> CallbackProgress<F> {
    pub fn new(on_event: F) -> Self {
        Self {
            on_event,
            counters: Counters::default(),
        }
    }
}

impl<F: Fn(ProgressEvent) + Send + Sync> ProgressTracker for CallbackProgress<F> {
    fn set_message(&self, message: &str) {
        (self.on_event)(ProgressEvent::Message(message.to_string()));
    }

    fn increment(&self, amount: u64) {
        let current = self.counters.advance(amount);
        (self.on_event)(ProgressEvent::Position {
            current,
            total: self.counters.length(),
        });
    }

    fn set_length(&self, length: u64) {
        self.counters.set_length(length);
    }

    fn position(&self) -> u64 {
        self.counters.position()
    }

    fn length(&self) -> u64 {
        self.counters.length()
    }

    fn finish_with_message(&self, message: &str) {
        self.counters.finish();
        (self.on_event)(ProgressEvent::Finished(message.to_string()));
    }

    fn finish_with_error(&self, message: &str) {
        self.counters.finish();
        (self.on_event)(ProgressEvent::Error(message.to_string()));
    }

    fn is_finished(&self) -> bool {
        self.counters.is_finished()
    }
}
