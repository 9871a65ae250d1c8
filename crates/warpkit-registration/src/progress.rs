//! Progress tracking and callbacks for registration runs.
//!
//! The multi-resolution driver reports the start of the run, every pyramid
//! level, every cost evaluation and the end of the run to an optional
//! [`ProgressCallback`].

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Progress information for one cost evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressInfo {
    /// Pyramid level, counted from 0 at the coarsest level.
    pub level: usize,
    /// Number of pyramid levels.
    pub levels: usize,
    /// Evaluation count within the level.
    pub evaluation: usize,
    /// Total cost including the penalty.
    pub value: f64,
    /// Cost relative to the first evaluation of the level.
    pub ratio: f64,
    /// Time elapsed since the run started.
    pub elapsed: Duration,
}

impl ProgressInfo {
    /// Share of levels finished, in percent.
    pub fn progress_percent(&self) -> f64 {
        if self.levels == 0 {
            return 100.0;
        }
        self.level as f64 / self.levels as f64 * 100.0
    }
}

/// Progress callback trait for monitoring registration runs.
pub trait ProgressCallback: Send + Sync {
    /// Called for every cost evaluation.
    fn on_progress(&self, info: &ProgressInfo);

    /// Called when the run starts.
    fn on_start(&self, _levels: usize) {}

    /// Called when a pyramid level starts.
    fn on_level(&self, _level: usize, _size: &[usize], _parameters: usize) {}

    /// Called when the run completes.
    fn on_complete(&self, _value: f64, _elapsed: Duration) {}

    /// Called when the run fails.
    fn on_error(&self, _error: &str) {}
}

/// Callback that logs through `tracing`.
#[derive(Debug, Clone)]
pub struct ConsoleProgressCallback {
    /// Log every n-th evaluation.
    pub log_interval: usize,
}

impl Default for ConsoleProgressCallback {
    fn default() -> Self {
        Self { log_interval: 10 }
    }
}

impl ConsoleProgressCallback {
    pub fn new(log_interval: usize) -> Self {
        Self {
            log_interval: log_interval.max(1),
        }
    }
}

impl ProgressCallback for ConsoleProgressCallback {
    fn on_progress(&self, info: &ProgressInfo) {
        if info.evaluation % self.log_interval == 0 {
            tracing::info!(
                "Level {}/{} | eval {} | cost {:.8} | ratio {:.6} | {:.2}s",
                info.level + 1,
                info.levels,
                info.evaluation,
                info.value,
                info.ratio,
                info.elapsed.as_secs_f64()
            );
        }
    }

    fn on_start(&self, levels: usize) {
        tracing::info!("Registration started with {} level(s)", levels);
    }

    fn on_level(&self, level: usize, size: &[usize], parameters: usize) {
        tracing::info!("Level {} at {:?} with {} parameters", level + 1, size, parameters);
    }

    fn on_complete(&self, value: f64, elapsed: Duration) {
        tracing::info!(
            "Registration completed in {:.2}s with final cost {:.8}",
            elapsed.as_secs_f64(),
            value
        );
    }

    fn on_error(&self, error: &str) {
        tracing::error!("Registration failed: {}", error);
    }
}

/// Records every progress report.
#[derive(Debug, Clone, Default)]
pub struct HistoryCallback {
    history: Arc<Mutex<Vec<ProgressInfo>>>,
    levels: Arc<Mutex<Vec<Vec<usize>>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl HistoryCallback {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded evaluations.
    pub fn history(&self) -> Vec<ProgressInfo> {
        lock(&self.history).clone()
    }

    /// Sizes of the levels started so far.
    pub fn level_sizes(&self) -> Vec<Vec<usize>> {
        lock(&self.levels).clone()
    }

    pub fn clear(&self) {
        lock(&self.history).clear();
        lock(&self.levels).clear();
    }
}

impl ProgressCallback for HistoryCallback {
    fn on_progress(&self, info: &ProgressInfo) {
        lock(&self.history).push(info.clone());
    }

    fn on_level(&self, _level: usize, size: &[usize], _parameters: usize) {
        lock(&self.levels).push(size.to_vec());
    }
}

/// Per-level evaluation counter feeding a callback.
pub(crate) struct ProgressTracker {
    callback: Option<Arc<dyn ProgressCallback>>,
    start: Instant,
    level: usize,
    levels: usize,
    evaluations: usize,
    first_value: Option<f64>,
}

impl ProgressTracker {
    pub(crate) fn new(callback: Option<Arc<dyn ProgressCallback>>, levels: usize) -> Self {
        Self {
            callback,
            start: Instant::now(),
            level: 0,
            levels,
            evaluations: 0,
            first_value: None,
        }
    }

    pub(crate) fn start(&self) {
        if let Some(cb) = &self.callback {
            cb.on_start(self.levels);
        }
    }

    pub(crate) fn begin_level(&mut self, level: usize, size: &[usize], parameters: usize) {
        self.level = level;
        self.evaluations = 0;
        self.first_value = None;
        if let Some(cb) = &self.callback {
            cb.on_level(level, size, parameters);
        }
    }

    pub(crate) fn record(&mut self, value: f64) {
        self.evaluations += 1;
        let first = *self.first_value.get_or_insert(value);
        let Some(cb) = &self.callback else {
            return;
        };
        let ratio = if first != 0.0 { value / first } else { 1.0 };
        cb.on_progress(&ProgressInfo {
            level: self.level,
            levels: self.levels,
            evaluation: self.evaluations,
            value,
            ratio,
            elapsed: self.start.elapsed(),
        });
    }

    pub(crate) fn complete(&self, value: f64) {
        if let Some(cb) = &self.callback {
            cb.on_complete(value, self.start.elapsed());
        }
    }

    pub(crate) fn error(&self, error: &str) {
        if let Some(cb) = &self.callback {
            cb.on_error(error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_percent() {
        let info = ProgressInfo {
            level: 1,
            levels: 4,
            evaluation: 3,
            value: 0.5,
            ratio: 0.5,
            elapsed: Duration::ZERO,
        };
        assert_eq!(info.progress_percent(), 25.0);
    }

    #[test]
    fn test_history_callback() {
        let history = Arc::new(HistoryCallback::new());
        let mut tracker = ProgressTracker::new(Some(history.clone() as Arc<dyn ProgressCallback>), 2);
        tracker.start();
        tracker.begin_level(0, &[8, 8], 72);
        tracker.record(2.0);
        tracker.record(1.0);
        tracker.begin_level(1, &[16, 16], 200);
        tracker.record(4.0);
        tracker.complete(4.0);

        let records = history.history();
        assert_eq!(records.len(), 3);
        assert_eq!(records[1].evaluation, 2);
        assert_eq!(records[1].ratio, 0.5);
        assert_eq!(records[2].level, 1);
        assert_eq!(records[2].evaluation, 1);
        assert_eq!(history.level_sizes(), vec![vec![8, 8], vec![16, 16]]);

        history.clear();
        assert!(history.history().is_empty());
    }

    #[test]
    fn test_tracker_without_callback() {
        let mut tracker = ProgressTracker::new(None, 1);
        tracker.start();
        tracker.begin_level(0, &[4], 4);
        tracker.record(1.0);
        tracker.complete(1.0);
        tracker.error("none");
    }
}
