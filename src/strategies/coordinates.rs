//! Coordinates strategy: absolute recorded pointer, last resort (§4.1).

use super::{EvalOutcome, Evidence, LocatorStrategy};
use crate::driver::PageDriver;
use crate::model::{Step, StrategyKind};
use async_trait::async_trait;

/// Always "finds" the step's recorded pointer coordinates, with no
/// notion of a resolved DOM node; downstream dispatch must go through
/// coordinate mode rather than `click_node`.
pub struct CoordinatesStrategy;

#[async_trait]
impl LocatorStrategy for CoordinatesStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Coordinates
    }

    async fn evaluate(&self, _page: &dyn PageDriver, step: &Step, _evidence: &Evidence<'_>) -> EvalOutcome {
        match step.recorded_point {
            Some(_) => EvalOutcome::Found {
                element: crate::driver::ElementSnapshot {
                    node: crate::driver::NodeIdRef(u64::MAX),
                    tag: String::new(),
                    attributes: Default::default(),
                    text: String::new(),
                    bounding_box: crate::model::BoundingBox {
                        x: step.recorded_point.unwrap().0,
                        y: step.recorded_point.unwrap().1,
                        width: 0.0,
                        height: 0.0,
                    },
                    visible: true,
                    enabled: true,
                    topmost_at_center: true,
                    monospace_font: false,
                    dark_background: false,
                },
                confidence: self.kind().expected_confidence(),
            },
            None => EvalOutcome::NotFound,
        }
    }
}
