//! Telemetry Logger (C10).
//!
//! An append-only event + run-summary store, plus analytics
//! aggregation over a time range. Writes are queued behind a single
//! lock and never mutated after append, matching the append-only
//! guarantee in the component design.

use crate::model::StrategyKind;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// How one telemetry-producing operation concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TelemetryOutcome {
    /// The operation succeeded.
    Success,
    /// The operation failed.
    Failure,
    /// The operation timed out.
    Timeout,
}

/// One append-only telemetry record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryEvent {
    /// Which run this event belongs to.
    pub run_id: String,
    /// Index of the step within the run.
    pub step_index: usize,
    /// Which strategy produced this event.
    pub strategy_kind: StrategyKind,
    /// Unix millis the event started.
    pub started_at: u64,
    /// Duration, in milliseconds.
    pub duration_ms: u64,
    /// Outcome of the operation.
    pub outcome: TelemetryOutcome,
    /// Confidence reported, if applicable.
    #[serde(default)]
    pub confidence: Option<f32>,
    /// Error kind, if the outcome was a failure.
    #[serde(default)]
    pub error_kind: Option<String>,
}

/// Append-only summary of one run, updated only by appending new events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Run identifier.
    pub run_id: String,
    /// Unix millis the run started.
    pub started_at: u64,
    /// Unix millis the run ended, if it has.
    #[serde(default)]
    pub ended_at: Option<u64>,
    /// Total steps attempted.
    pub total_steps: usize,
    /// Steps that succeeded.
    pub successful_steps: usize,
}

impl RunSummary {
    /// `successful_steps / total_steps`, or `0.0` for an empty run.
    pub fn pass_rate(&self) -> f64 {
        if self.total_steps == 0 {
            0.0
        } else {
            self.successful_steps as f64 / self.total_steps as f64
        }
    }
}

/// Per-strategy aggregated metrics over a time range.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StrategyMetrics {
    /// Number of attempts.
    pub attempts: usize,
    /// Number of successes.
    pub successes: usize,
    /// Mean latency, in milliseconds.
    pub mean_ms: f64,
    /// 95th percentile latency, in milliseconds.
    pub p95_ms: f64,
}

/// Response to a `GetAnalytics` query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Analytics {
    /// Per-strategy metrics.
    pub strategy_metrics: HashMap<StrategyKind, StrategyMetrics>,
    /// Recently completed runs, most recent last.
    pub recent_runs: Vec<RunSummary>,
}

fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// The Telemetry Logger: append-only event/run-summary store.
#[derive(Default)]
pub struct TelemetryLogger {
    events: Mutex<Vec<TelemetryEvent>>,
    runs: Mutex<Vec<RunSummary>>,
}

impl TelemetryLogger {
    /// Build an empty logger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one event. Events for the same run are appended in
    /// per-step-then-append order, forming a total order.
    pub fn record_event(&self, event: TelemetryEvent) {
        log::debug!(
            "telemetry: run={} step={} strategy={:?} outcome={:?}",
            event.run_id,
            event.step_index,
            event.strategy_kind,
            event.outcome
        );
        self.events.lock().push(event);
    }

    /// Start a run, returning its summary record for later completion.
    pub fn start_run(&self, run_id: impl Into<String>) -> RunSummary {
        let summary =
            RunSummary { run_id: run_id.into(), started_at: now_ms(), ended_at: None, total_steps: 0, successful_steps: 0 };
        self.runs.lock().push(summary.clone());
        summary
    }

    /// Mark a run complete by appending its final summary.
    pub fn finish_run(&self, run_id: &str, total_steps: usize, successful_steps: usize) {
        let mut runs = self.runs.lock();
        if let Some(run) = runs.iter_mut().rev().find(|r| r.run_id == run_id) {
            run.ended_at = Some(now_ms());
            run.total_steps = total_steps;
            run.successful_steps = successful_steps;
        }
    }

    /// Compute analytics over all recorded events and runs.
    ///
    /// `range` restricts events by `started_at`, inclusive.
    pub fn analytics(&self, range: Option<(u64, u64)>) -> Analytics {
        let events = self.events.lock();
        let mut by_strategy: HashMap<StrategyKind, Vec<&TelemetryEvent>> = HashMap::new();
        for event in events.iter() {
            if let Some((start, end)) = range {
                if event.started_at < start || event.started_at > end {
                    continue;
                }
            }
            by_strategy.entry(event.strategy_kind).or_default().push(event);
        }

        let mut strategy_metrics = HashMap::new();
        for (kind, evs) in by_strategy {
            let attempts = evs.len();
            let successes = evs.iter().filter(|e| e.outcome == TelemetryOutcome::Success).count();
            let mut durations: Vec<u64> = evs.iter().map(|e| e.duration_ms).collect();
            durations.sort_unstable();
            let mean_ms = if attempts == 0 {
                0.0
            } else {
                durations.iter().sum::<u64>() as f64 / attempts as f64
            };
            let p95_ms = percentile(&durations, 0.95);
            strategy_metrics.insert(kind, StrategyMetrics { attempts, successes, mean_ms, p95_ms });
        }

        Analytics { strategy_metrics, recent_runs: self.runs.lock().clone() }
    }
}

fn percentile(sorted: &[u64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((sorted.len() as f64 - 1.0) * p).round() as usize;
    sorted[idx.min(sorted.len() - 1)] as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(kind: StrategyKind, outcome: TelemetryOutcome, duration_ms: u64) -> TelemetryEvent {
        TelemetryEvent {
            run_id: "run1".into(),
            step_index: 0,
            strategy_kind: kind,
            started_at: now_ms(),
            duration_ms,
            outcome,
            confidence: None,
            error_kind: None,
        }
    }

    #[test]
    fn test_run_summary_pass_rate() {
        let logger = TelemetryLogger::new();
        logger.start_run("run1");
        logger.finish_run("run1", 4, 3);
        let analytics = logger.analytics(None);
        let run = &analytics.recent_runs[0];
        assert_eq!(run.pass_rate(), 0.75);
    }

    #[test]
    fn test_analytics_aggregates_per_strategy() {
        let logger = TelemetryLogger::new();
        logger.record_event(event(StrategyKind::Css, TelemetryOutcome::Success, 100));
        logger.record_event(event(StrategyKind::Css, TelemetryOutcome::Failure, 300));
        let analytics = logger.analytics(None);
        let metrics = &analytics.strategy_metrics[&StrategyKind::Css];
        assert_eq!(metrics.attempts, 2);
        assert_eq!(metrics.successes, 1);
        assert_eq!(metrics.mean_ms, 200.0);
    }

    #[test]
    fn test_events_are_append_only() {
        let logger = TelemetryLogger::new();
        logger.record_event(event(StrategyKind::Css, TelemetryOutcome::Success, 50));
        logger.record_event(event(StrategyKind::XPath, TelemetryOutcome::Success, 75));
        assert_eq!(logger.events.lock().len(), 2);
    }
}
