//! Decision Engine (C6): the fallback-chain orchestrator.
//!
//! `execute` runs one step to completion: probe the healing cache,
//! score every applicable locator strategy, walk the ranked
//! candidates through the actionability gate and validation, dispatch
//! the first one that survives, and update the cache with what
//! actually worked. Mirrors the executor's single-entry-point shape
//! (one `run`/`execute` call per unit of work, telemetry emitted
//! around every attempt) without the executor's retry/backoff
//! machinery, which this component replaces with the fallback chain.

use crate::actionability::wait_until_actionable;
use crate::cache::{CacheKey, HealingCache, HealingCacheEntry};
use crate::config::RuntimeConfig;
use crate::dispatcher::dispatch;
use crate::driver::{ElementSnapshot, PageDriver};
use crate::error::{EngineError, EngineResult};
use crate::model::{ActionKind, Outcome, Step, StepOutcome, StrategyKind};
use crate::strategies::{EvalOutcome, Evidence, LocatorStrategy};
use crate::telemetry::{TelemetryEvent, TelemetryLogger, TelemetryOutcome};
use crate::validation::validate;
use futures::future::join_all;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::watch;

/// Per-strategy scoring budget when a step doesn't specify its own
/// (via a pre-ranked `fallback_chain` entry).
const DEFAULT_SCORING_TIMEOUT_MS: u64 = 1_500;

/// Everything `execute` needs that outlives a single step: the cache,
/// telemetry sink, and tunables it shares with every other step in a
/// run.
pub struct DecisionEngine<'a> {
    /// Shared healing cache.
    pub cache: &'a HealingCache,
    /// Shared telemetry sink.
    pub telemetry: &'a TelemetryLogger,
    /// Runtime tunables.
    pub config: &'a RuntimeConfig,
}

impl<'a> DecisionEngine<'a> {
    /// Build a decision engine over shared session state.
    pub fn new(cache: &'a HealingCache, telemetry: &'a TelemetryLogger, config: &'a RuntimeConfig) -> Self {
        Self { cache, telemetry, config }
    }

    /// Run one step to completion against `page`, trying `strategies`
    /// in the order the Decision Engine ranks them.
    ///
    /// `run_id`/`step_index` tag the telemetry events this call
    /// emits. Checked for cancellation before every suspension point;
    /// a cancellation observed mid-fallback never mutates the cache.
    pub async fn execute(
        &self,
        page: &dyn PageDriver,
        strategies: &[Box<dyn LocatorStrategy>],
        step: &Step,
        run_id: &str,
        step_index: usize,
        cancel: &watch::Receiver<bool>,
    ) -> EngineResult<Outcome> {
        let start = Instant::now();

        if *cancel.borrow() {
            return Ok(cancelled_outcome(start));
        }

        let page_url = page.url().await.unwrap_or_default();
        let key = build_cache_key(&page_url, step);
        let scope = match page.resolve_frames(&step.bundle.iframe_chain).await {
            Ok(scope) => scope,
            Err(e) => {
                return Ok(Outcome {
                    success: false,
                    used_strategy: None,
                    total_duration_ms: elapsed_ms(start),
                    outcome: StepOutcome::Failed { kind: error_kind(&e) },
                });
            }
        };
        let evidence = Evidence { scope: &scope };

        // 1. Cache probe. A hit is tried first, ahead of any fresh
        // scoring, at a confidence no lower than a fresh cache match
        // would carry.
        if let Some(cached) = self.cache.get(&key) {
            if let Ok(candidates) = page.query_css(&scope, &cached.healed_selector).await {
                if let EvalOutcome::Found { element, .. } =
                    crate::strategies::resolve_unique(candidates, step.bundle.tag.as_deref())
                {
                    let confidence = cached.confidence_at_heal.max(StrategyKind::Cached.expected_confidence());
                    match self
                        .attempt(page, step, &element, StrategyKind::Cached, confidence, cancel, run_id, step_index, start)
                        .await
                    {
                        Ok(outcome) => {
                            self.cache.record_success(&key);
                            return Ok(outcome);
                        }
                        Err(EngineError::Cancelled) => return Ok(cancelled_outcome(start)),
                        Err(_) => {
                            self.cache.record_failure(&key);
                            // Fall through to full strategy scoring below.
                        }
                    }
                }
            }
        }

        if *cancel.borrow() {
            return Ok(cancelled_outcome(start));
        }

        // 2. Parallel scoring, bounded per strategy.
        let timeouts: std::collections::HashMap<StrategyKind, u64> = step
            .fallback_chain
            .as_ref()
            .map(|chain| chain.iter().map(|f| (f.kind, f.timeout_ms)).collect())
            .unwrap_or_default();

        let scoring = strategies.iter().map(|strategy| {
            let kind = strategy.kind();
            let budget = timeouts.get(&kind).copied().unwrap_or(DEFAULT_SCORING_TIMEOUT_MS);
            let evidence = &evidence;
            async move {
                let outcome = tokio::time::timeout(Duration::from_millis(budget), strategy.evaluate(page, step, evidence))
                    .await
                    .unwrap_or(EvalOutcome::Timeout);
                (kind, outcome)
            }
        });
        let scored = join_all(scoring).await;

        // 3. Rank by confidence descending; StrategyKind's declaration
        // order is already the documented tie-break priority.
        let mut candidates: Vec<(StrategyKind, ElementSnapshot, f32)> = scored
            .into_iter()
            .filter_map(|(kind, outcome)| match outcome {
                EvalOutcome::Found { element, confidence } => Some((kind, element, confidence)),
                _ => None,
            })
            .collect();
        candidates.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal).then(a.0.cmp(&b.0)));

        // The strongest kind this step's fallback chain could ever try,
        // whether or not it actually found anything this run. Winning
        // with anything else is a heal.
        let primary_kind = strategies.iter().map(|s| s.kind()).max_by(|a, b| {
            a.expected_confidence().partial_cmp(&b.expected_confidence()).unwrap_or(std::cmp::Ordering::Equal)
        });

        if candidates.is_empty() {
            self.telemetry.record_event(TelemetryEvent {
                run_id: run_id.to_string(),
                step_index,
                strategy_kind: StrategyKind::Coordinates,
                started_at: now_ms(),
                duration_ms: elapsed_ms(start),
                outcome: TelemetryOutcome::Failure,
                confidence: None,
                error_kind: Some("not_found".into()),
            });
            return Ok(Outcome {
                success: false,
                used_strategy: None,
                total_duration_ms: elapsed_ms(start),
                outcome: StepOutcome::Failed { kind: "not_found".into() },
            });
        }

        // 4-6. Walk ranked candidates; dispatch the first that survives
        // actionability + validation, falling back on any failure.
        let mut last_error = EngineError::NotFound { step: step.id.clone() };
        for (kind, element, confidence) in &candidates {
            if *cancel.borrow() {
                return Ok(cancelled_outcome(start));
            }
            match self.attempt(page, step, element, *kind, *confidence, cancel, run_id, step_index, start).await {
                Ok(outcome) => {
                    // Only a non-primary strategy winning counts as a heal.
                    if *kind != StrategyKind::Cached && Some(*kind) != primary_kind {
                        if let Some(selector) = synthesize_selector(element) {
                            self.cache.put(
                                key.clone(),
                                HealingCacheEntry {
                                    original_selector: step.bundle.css_selector.clone().unwrap_or_default(),
                                    healed_selector: selector,
                                    confidence_at_heal: *confidence,
                                    provider: format!("{kind:?}"),
                                    created_at: now_ms(),
                                    last_used_at: now_ms(),
                                    success_count: 1,
                                    failure_count: 0,
                                    expires_at: now_ms() + self.config.heal_ttl_ms,
                                },
                            );
                        }
                    }
                    return Ok(outcome);
                }
                Err(EngineError::Cancelled) => return Ok(cancelled_outcome(start)),
                Err(e) => last_error = e,
            }
        }

        Ok(Outcome {
            success: false,
            used_strategy: None,
            total_duration_ms: elapsed_ms(start),
            outcome: StepOutcome::Failed { kind: error_kind(&last_error) },
        })
    }

    /// One dispatch attempt against an already-scored candidate:
    /// actionability gate, context validation, dispatch, telemetry.
    #[allow(clippy::too_many_arguments)]
    async fn attempt(
        &self,
        page: &dyn PageDriver,
        step: &Step,
        element: &ElementSnapshot,
        kind: StrategyKind,
        confidence: f32,
        cancel: &watch::Receiver<bool>,
        run_id: &str,
        step_index: usize,
        step_start: Instant,
    ) -> EngineResult<Outcome> {
        let attempt_start = Instant::now();
        let record = |outcome: TelemetryOutcome, error_kind: Option<String>| TelemetryEvent {
            run_id: run_id.to_string(),
            step_index,
            strategy_kind: kind,
            started_at: now_ms(),
            duration_ms: elapsed_ms(attempt_start),
            outcome,
            confidence: Some(confidence),
            error_kind,
        };

        let actionable = wait_until_actionable(page, &element.node, self.config.actionability_timeout(), cancel).await;
        let snapshot = match actionable {
            Ok(snapshot) => snapshot,
            Err(EngineError::Cancelled) => return Err(EngineError::Cancelled),
            Err(e) => {
                self.telemetry.record_event(record(TelemetryOutcome::Failure, Some(error_kind(&e))));
                return Err(e);
            }
        };

        if let Err(e) = validate(step.expected_context, &snapshot) {
            self.telemetry.record_event(record(TelemetryOutcome::Failure, Some(error_kind(&e))));
            return Err(e);
        }

        if matches!(step.action, ActionKind::ConditionalClick) {
            // Conditional-click steps are driven by the Conditional Click
            // Engine before `execute` is ever called; reaching here means
            // the recording is malformed.
            let e = EngineError::DispatchFailed { message: "conditional-click step reached the dispatcher".into() };
            self.telemetry.record_event(record(TelemetryOutcome::Failure, Some(error_kind(&e))));
            return Err(e);
        }

        match dispatch(page, step.action, &snapshot, step.value.as_deref()).await {
            Ok(()) => {
                self.telemetry.record_event(record(TelemetryOutcome::Success, None));
                Ok(Outcome {
                    success: true,
                    used_strategy: Some(kind),
                    total_duration_ms: elapsed_ms(step_start),
                    outcome: StepOutcome::Succeeded,
                })
            }
            Err(e) => {
                self.telemetry.record_event(record(TelemetryOutcome::Failure, Some(error_kind(&e))));
                Err(e)
            }
        }
    }
}

fn cancelled_outcome(start: Instant) -> Outcome {
    Outcome { success: false, used_strategy: None, total_duration_ms: elapsed_ms(start), outcome: StepOutcome::Cancelled }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

fn error_kind(e: &EngineError) -> String {
    match e {
        EngineError::NotFound { .. } => "not_found".into(),
        EngineError::Ambiguous { .. } => "ambiguous".into(),
        EngineError::FrameResolutionFailed { .. } => "frame_resolution_failed".into(),
        EngineError::NotActionable { .. } => "not_actionable".into(),
        EngineError::ContextMismatch { .. } => "context_mismatch".into(),
        EngineError::RateLimited => "rate_limited".into(),
        EngineError::CircuitOpen => "circuit_open".into(),
        EngineError::OcrFailed { .. } => "ocr_failed".into(),
        EngineError::DispatchFailed { .. } => "dispatch_failed".into(),
        EngineError::PersistenceFailed { .. } => "persistence_failed".into(),
        EngineError::Cancelled => "cancelled".into(),
        EngineError::Json(_) => "json".into(),
        EngineError::Io(_) => "io".into(),
        EngineError::Image(_) => "image".into(),
    }
}

/// Build the composite healing-cache key for a step on a given page.
fn build_cache_key(page_url: &str, step: &Step) -> CacheKey {
    let step_kind = format!("{:?}", step.action).to_lowercase();
    let label = step.label.clone().or_else(|| step.bundle.visible_text.clone()).unwrap_or_default();
    CacheKey::new(page_url, step_kind, label, hash_original_selector(step))
}

/// Hash the step's pre-heal selector fingerprint, so a recording that
/// changes a step's original selector doesn't collide with a stale
/// cache entry from before the edit.
fn hash_original_selector(step: &Step) -> String {
    let mut hasher = DefaultHasher::new();
    step.bundle.css_selector.hash(&mut hasher);
    step.bundle.xpath.hash(&mut hasher);
    step.bundle.id.hash(&mut hasher);
    format!("{:x}", hasher.finish())
}

/// Build a re-queryable CSS selector for a healed element, if its
/// attributes carry enough to express one. Vision/coordinate hits
/// have no real attributes and are never cached this way.
fn synthesize_selector(element: &ElementSnapshot) -> Option<String> {
    if let Some(id) = element.attributes.get("id") {
        return Some(format!("#{id}"));
    }
    if let Some(name) = element.attributes.get("name") {
        return Some(format!("{}[name='{name}']", element.tag));
    }
    None
}
