//! Vision OCR strategy: locates a target visually when DOM-based
//! strategies fail (§4.1, §4.3).

use super::{EvalOutcome, Evidence, LocatorStrategy};
use crate::driver::{ElementSnapshot, NodeIdRef, PageDriver};
use crate::model::{BoundingBox, Step, StrategyKind};
use crate::vision::VisionEngine;
use async_trait::async_trait;
use std::sync::Arc;

/// Wraps a [`VisionEngine`] as a [`LocatorStrategy`]. The returned
/// "element" has no real DOM node; its bounding box degenerates to
/// the OCR click target's centroid so downstream dispatch goes
/// through coordinate mode.
pub struct VisionOcrStrategy {
    vision: Arc<VisionEngine>,
}

impl VisionOcrStrategy {
    /// Build a strategy backed by a session's vision engine.
    pub fn new(vision: Arc<VisionEngine>) -> Self {
        Self { vision }
    }
}

#[async_trait]
impl LocatorStrategy for VisionOcrStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::VisionOcr
    }

    async fn evaluate(&self, page: &dyn PageDriver, step: &Step, _evidence: &Evidence<'_>) -> EvalOutcome {
        let Some(target) = step.label.as_deref().or(step.bundle.visible_text.as_deref()) else {
            return EvalOutcome::NotFound;
        };
        match self.vision.find_text(page, target).await {
            Ok(Some(hit)) => EvalOutcome::Found {
                element: ElementSnapshot {
                    node: NodeIdRef(u64::MAX),
                    tag: String::new(),
                    attributes: Default::default(),
                    text: target.to_string(),
                    bounding_box: BoundingBox { x: hit.x, y: hit.y, width: 0.0, height: 0.0 },
                    visible: true,
                    enabled: true,
                    topmost_at_center: true,
                    monospace_font: false,
                    dark_background: false,
                },
                confidence: hit.confidence,
            },
            Ok(None) => EvalOutcome::NotFound,
            Err(_) => EvalOutcome::NotFound,
        }
    }
}
