//! # Application State Management
//!
//! Shared state that every HTTP handler and every call actor can reach: the
//! active configuration, call metrics and the server start time.
//!
//! ## Key Rust Concepts:
//!
//! ### Arc<RwLock<T>> Pattern
//! - **Arc**: Many handlers and call actors hold a reference to the same data
//! - **RwLock**: Many readers OR one writer at a time
//! - **Clone**: Cloning `AppState` clones the `Arc`s, not the data behind them
//!
//! ### Lock poisoning
//! A thread that panics while holding a write lock "poisons" it. Metrics are
//! plain counters that stay meaningful after such a panic, so the guards here
//! recover the inner value instead of propagating the poison.
//!
//! ## What does NOT live here:
//! Per-call state (segmenter, recording, history) is owned by the call's own
//! session and never shared, so there is no global session map.

use crate::config::AppConfig;
use serde::Serialize;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct AppState {
    /// Configuration loaded at startup
    pub config: Arc<RwLock<AppConfig>>,

    /// Call counters, updated by call actors and sessions
    pub metrics: Arc<RwLock<CallMetrics>>,

    /// When the server started
    pub start_time: Instant,
}

/// Counters describing call traffic since server start.
///
/// ## Fields:
/// - **active_calls**: Calls with an open socket right now
/// - **total_calls**: Calls accepted since start
/// - **utterances_dispatched**: Utterances handed to the turn pipeline
/// - **turns_completed**: Turns whose history was committed
/// - **turn_failures**: Turns that ended with an error notification
/// - **recordings_written** / **recording_failures**: WAV flush outcomes
#[derive(Debug, Default, Clone, Serialize)]
pub struct CallMetrics {
    pub active_calls: usize,
    pub total_calls: u64,
    pub utterances_dispatched: u64,
    pub turns_completed: u64,
    pub turn_failures: u64,
    pub recordings_written: u64,
    pub recording_failures: u64,
}

impl CallMetrics {
    /// Fraction of dispatched turns that failed (0.0 to 1.0).
    pub fn turn_failure_rate(&self) -> f64 {
        let finished = self.turns_completed + self.turn_failures;
        if finished > 0 {
            self.turn_failures as f64 / finished as f64
        } else {
            0.0
        }
    }
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(CallMetrics::default())),
            start_time: Instant::now(),
        }
    }

    /// Get a copy of the current configuration.
    ///
    /// Cloning releases the lock immediately so callers never hold it across
    /// an await point.
    pub fn get_config(&self) -> AppConfig {
        self.config
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn metrics_read(&self) -> RwLockReadGuard<'_, CallMetrics> {
        self.metrics.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn metrics_write(&self) -> RwLockWriteGuard<'_, CallMetrics> {
        self.metrics.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Reserve a slot for a new call.
    ///
    /// ## Returns:
    /// - **true**: Slot reserved; the caller must pair this with `end_call`
    /// - **false**: `max_concurrent_calls` calls are already active
    pub fn try_begin_call(&self) -> bool {
        let limit = self.get_config().call.max_concurrent_calls;
        let mut metrics = self.metrics_write();
        if metrics.active_calls >= limit {
            return false;
        }
        metrics.active_calls += 1;
        metrics.total_calls += 1;
        true
    }

    /// Release a slot reserved by `try_begin_call`.
    pub fn end_call(&self) {
        let mut metrics = self.metrics_write();
        metrics.active_calls = metrics.active_calls.saturating_sub(1);
    }

    pub fn record_utterance(&self) {
        self.metrics_write().utterances_dispatched += 1;
    }

    pub fn record_turn_completed(&self) {
        self.metrics_write().turns_completed += 1;
    }

    pub fn record_turn_failure(&self) {
        self.metrics_write().turn_failures += 1;
    }

    pub fn record_recording_written(&self) {
        self.metrics_write().recordings_written += 1;
    }

    pub fn record_recording_failure(&self) {
        self.metrics_write().recording_failures += 1;
    }

    /// Get a snapshot of current metrics (used by the health endpoints).
    pub fn get_metrics_snapshot(&self) -> CallMetrics {
        self.metrics_read().clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
