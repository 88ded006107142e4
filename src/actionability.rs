//! Autowaiting (C5).
//!
//! Polls an actionability predicate — visible, stable, enabled,
//! unobscured — at a fixed cadence until it's satisfied or a timeout
//! elapses.

use crate::driver::{ElementSnapshot, NodeIdRef, PageDriver};
use crate::error::{EngineError, EngineResult};
use std::time::{Duration, Instant};
use tokio::time::sleep;

const POLL_CADENCE_MS: u64 = 100;
const STABILITY_EPSILON_PX: f64 = 4.0;

/// Poll `node` until it is visible, geometrically stable across two
/// consecutive samples, enabled, and unobscured, or until `timeout`
/// elapses.
///
/// Returns the final stable snapshot on success, or
/// [`EngineError::NotActionable`]/[`EngineError::Cancelled`] on failure.
pub async fn wait_until_actionable(
    page: &dyn PageDriver,
    node: &NodeIdRef,
    timeout: Duration,
    cancel: &tokio::sync::watch::Receiver<bool>,
) -> EngineResult<ElementSnapshot> {
    let deadline = Instant::now() + timeout;
    let mut previous: Option<ElementSnapshot> = None;

    loop {
        if *cancel.borrow() {
            return Err(EngineError::Cancelled);
        }

        let snapshot = page.snapshot(node).await?;
        if let Some(reason) = first_unmet(&snapshot) {
            previous = None;
            if Instant::now() >= deadline {
                return Err(EngineError::NotActionable { reason });
            }
        } else if let Some(prev) = &previous {
            if prev.bounding_box.drift_from(&snapshot.bounding_box) <= STABILITY_EPSILON_PX {
                return Ok(snapshot);
            }
            previous = Some(snapshot);
        } else {
            previous = Some(snapshot);
        }

        if Instant::now() >= deadline {
            return Err(EngineError::NotActionable { reason: "timeout" });
        }
        sleep(Duration::from_millis(POLL_CADENCE_MS)).await;
    }
}

/// The first actionability predicate that fails for `snapshot`, if any.
fn first_unmet(snapshot: &ElementSnapshot) -> Option<&'static str> {
    if !snapshot.visible || !snapshot.bounding_box.has_area() {
        return Some("invisible");
    }
    if !snapshot.enabled {
        return Some("disabled");
    }
    if !snapshot.topmost_at_center {
        return Some("obscured");
    }
    None
}
