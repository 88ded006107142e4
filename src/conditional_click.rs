//! Conditional Click Engine (C7).
//!
//! Watches the screen for one of N trigger labels (e.g. permission
//! prompts), clicks them when present, and terminates on a success
//! label or timeout. Consumes the shared rate limiter since OCR
//! cycles may be expensive, and takes exactly one screenshot+OCR pass
//! per poll cycle — the success label and the trigger labels are both
//! matched against that single frame.

use crate::error::{EngineError, EngineResult};
use crate::model::ConditionalConfig;
use crate::rate_limit::RateLimiter;
use crate::vision::VisionEngine;
use std::time::{Duration, Instant};
use tokio::time::sleep;

/// How the conditional-click loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionalOutcome {
    /// The success label was observed.
    Succeeded,
    /// The loop timed out before succeeding.
    TimedOut,
    /// The maximum click count was reached before succeeding.
    MaxClicksReached,
    /// The loop was cancelled.
    Cancelled,
}

/// Result of one `wait_and_click` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConditionalResult {
    /// How the loop ended.
    pub outcome: ConditionalOutcome,
    /// Number of clicks dispatched.
    pub clicks: u32,
}

/// Run the `Polling -> Clicked -> Polling -> ... -> terminal` state
/// machine described in §4.5.
pub async fn wait_and_click(
    page: &dyn crate::driver::PageDriver,
    vision: &VisionEngine,
    limiter: &RateLimiter,
    config: &ConditionalConfig,
    cancel: &tokio::sync::watch::Receiver<bool>,
) -> EngineResult<ConditionalResult> {
    let deadline = Instant::now() + Duration::from_millis(config.timeout_ms as u64);
    let poll_interval = Duration::from_millis(config.poll_ms as u64);
    let mut clicks = 0u32;

    loop {
        if *cancel.borrow() {
            return Ok(ConditionalResult { outcome: ConditionalOutcome::Cancelled, clicks });
        }
        if Instant::now() >= deadline {
            return Ok(ConditionalResult { outcome: ConditionalOutcome::TimedOut, clicks });
        }

        if !limiter.try_admit() {
            sleep(poll_interval).await;
            continue;
        }

        // One screenshot + OCR pass per cycle; both label sets are
        // matched against it instead of paying for OCR twice.
        let frame = match vision.observe(page).await {
            Ok(frame) => frame,
            Err(EngineError::CircuitOpen) => {
                sleep(poll_interval).await;
                continue;
            }
            Err(e) => return Err(e),
        };

        if let Some(success_label) = &config.success_label {
            if let Some(target) = vision.locate_in(&frame, success_label) {
                if target.confidence >= config.confidence_min {
                    return Ok(ConditionalResult { outcome: ConditionalOutcome::Succeeded, clicks });
                }
            }
        }

        if let Some((_, target)) = vision.locate_any_in(&frame, &config.labels) {
            if target.confidence >= config.confidence_min {
                page.click_point(target.x, target.y).await?;
                clicks += 1;
                if let Some(max_clicks) = config.max_clicks {
                    if clicks >= max_clicks {
                        return Ok(ConditionalResult { outcome: ConditionalOutcome::MaxClicksReached, clicks });
                    }
                }
                sleep(Duration::from_millis(config.post_click_delay_ms as u64)).await;
                continue;
            }
        }

        sleep(poll_interval).await;
    }
}
