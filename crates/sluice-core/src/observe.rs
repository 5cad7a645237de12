//! Metrics handle for the control plane.
//!
//! [`ControllerMetrics`] is constructed by whoever owns the controller (a
//! process or a test fixture) and passed into the gateway, tracker and
//! pipeline. Counters are always kept in-process so they can be inspected
//! with [`ControllerMetrics::snapshot`]. When the `observe` feature is
//! enabled the same events are also emitted through the [`metrics`] crate;
//! a downstream application must install a recorder to collect them.

use crate::types::OperationKind;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug, Default)]
pub struct ControllerMetrics {
    accepted: AtomicU64,
    precondition_failures: AtomicU64,
    conflicts: AtomicU64,
    append_failures: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    deadlines_exceeded: AtomicU64,
    late_signals: AtomicU64,
    tasks_succeeded: AtomicU64,
    tasks_failed: AtomicU64,
    task_retries: AtomicU64,
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub accepted: u64,
    pub precondition_failures: u64,
    pub conflicts: u64,
    pub append_failures: u64,
    pub completed: u64,
    pub failed: u64,
    pub deadlines_exceeded: u64,
    pub late_signals: u64,
    pub tasks_succeeded: u64,
    pub tasks_failed: u64,
    pub task_retries: u64,
}

impl ControllerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request passed validation and was enqueued.
    ///
    /// - `sluice.gateway.accepted_total` – counter with `kind` label
    pub fn record_accepted(&self, kind: OperationKind) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "observe")]
        {
            metrics::counter!("sluice.gateway.accepted_total", "kind" => kind.as_str()).increment(1);
        }
        #[cfg(not(feature = "observe"))]
        {
            let _ = kind;
        }
    }

    /// - `sluice.gateway.rejected_total` – counter with `kind` and `reason` labels
    pub fn record_precondition_failure(&self, kind: OperationKind) {
        self.precondition_failures.fetch_add(1, Ordering::Relaxed);
        emit_rejection(kind, "precondition");
    }

    pub fn record_conflict(&self, kind: OperationKind) {
        self.conflicts.fetch_add(1, Ordering::Relaxed);
        emit_rejection(kind, "conflict");
    }

    pub fn record_append_failure(&self, kind: OperationKind) {
        self.append_failures.fetch_add(1, Ordering::Relaxed);
        emit_rejection(kind, "append_failed");
    }

    /// Caller-visible resolution of a pending operation.
    ///
    /// - `sluice.completion.resolved_total` – counter with `outcome` label
    /// - `sluice.completion.wait_seconds` – histogram
    pub fn record_resolution(&self, outcome: &'static str, waited: Duration) {
        match outcome {
            "success" => self.completed.fetch_add(1, Ordering::Relaxed),
            "deadline_exceeded" => self.deadlines_exceeded.fetch_add(1, Ordering::Relaxed),
            _ => self.failed.fetch_add(1, Ordering::Relaxed),
        };
        #[cfg(feature = "observe")]
        {
            metrics::counter!("sluice.completion.resolved_total", "outcome" => outcome)
                .increment(1);
            metrics::histogram!("sluice.completion.wait_seconds").record(waited.as_secs_f64());
        }
        #[cfg(not(feature = "observe"))]
        {
            let _ = waited;
        }
    }

    /// A signal arrived for an already resolved handle and was discarded.
    pub fn record_late_signal(&self) {
        self.late_signals.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "observe")]
        {
            metrics::counter!("sluice.completion.late_signals_total").increment(1);
        }
    }

    /// Terminal handler outcome.
    ///
    /// - `sluice.pipeline.tasks_total` – counter with `kind` and `outcome` labels
    /// - `sluice.pipeline.task_duration_seconds` – histogram
    pub fn record_task(&self, kind: OperationKind, success: bool, duration: Duration) {
        if success {
            self.tasks_succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.tasks_failed.fetch_add(1, Ordering::Relaxed);
        }
        #[cfg(feature = "observe")]
        {
            let outcome = if success { "ok" } else { "fail" };
            metrics::counter!("sluice.pipeline.tasks_total", "kind" => kind.as_str(), "outcome" => outcome)
                .increment(1);
            metrics::histogram!("sluice.pipeline.task_duration_seconds")
                .record(duration.as_secs_f64());
        }
        #[cfg(not(feature = "observe"))]
        {
            let _ = (kind, duration);
        }
    }

    pub fn record_retry(&self, kind: OperationKind) {
        self.task_retries.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "observe")]
        {
            metrics::counter!("sluice.pipeline.retries_total", "kind" => kind.as_str()).increment(1);
        }
        #[cfg(not(feature = "observe"))]
        {
            let _ = kind;
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            accepted: self.accepted.load(Ordering::Relaxed),
            precondition_failures: self.precondition_failures.load(Ordering::Relaxed),
            conflicts: self.conflicts.load(Ordering::Relaxed),
            append_failures: self.append_failures.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            deadlines_exceeded: self.deadlines_exceeded.load(Ordering::Relaxed),
            late_signals: self.late_signals.load(Ordering::Relaxed),
            tasks_succeeded: self.tasks_succeeded.load(Ordering::Relaxed),
            tasks_failed: self.tasks_failed.load(Ordering::Relaxed),
            task_retries: self.task_retries.load(Ordering::Relaxed),
        }
    }
}

#[inline]
fn emit_rejection(kind: OperationKind, reason: &'static str) {
    #[cfg(feature = "observe")]
    {
        metrics::counter!("sluice.gateway.rejected_total", "kind" => kind.as_str(), "reason" => reason)
            .increment(1);
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = (kind, reason);
    }
}
