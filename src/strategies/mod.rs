//! Locator Strategy Evaluators (C1).
//!
//! Each strategy is a small, stateless value implementing
//! [`LocatorStrategy`]. Given a step and the current page, it either
//! finds a unique actionable target and reports a confidence, or
//! reports one of the typed failure kinds in [`EvalOutcome`]. These
//! are telemetry kinds, not control flow: the Decision Engine (C6)
//! decides what to do with a failure.

mod coordinates;
mod css;
mod dom_attr;
mod semantic;
mod text;
mod vision_ocr;
mod xpath;

pub use coordinates::CoordinatesStrategy;
pub use css::CssStrategy;
pub use dom_attr::DomAttrStrategy;
pub use semantic::SemanticStrategy;
pub use text::TextStrategy;
pub use vision_ocr::VisionOcrStrategy;
pub use xpath::XPathStrategy;

use crate::driver::{ElementSnapshot, FrameScope, PageDriver};
use crate::model::{Step, StrategyKind};
use async_trait::async_trait;

/// Auxiliary, driver-independent evidence a strategy may consult
/// besides the step's bundle (currently just the resolved frame
/// scope; kept as its own type so new evidence can be added without
/// changing every strategy's signature).
pub struct Evidence<'a> {
    /// The frame scope the bundle's iframe chain resolved to.
    pub scope: &'a FrameScope,
}

/// A single strategy's result for one step.
#[derive(Debug, Clone, PartialEq)]
pub enum EvalOutcome {
    /// A unique, resolvable target was found.
    Found {
        /// The resolved element.
        element: ElementSnapshot,
        /// Confidence in [0, 1].
        confidence: f32,
    },
    /// No candidate matched.
    NotFound,
    /// More than one candidate matched and none was uniquely identifiable.
    Ambiguous {
        /// Number of matching candidates.
        count: usize,
    },
    /// The step's iframe chain could not be resolved for a DOM-based strategy.
    FrameResolutionFailed {
        /// Depth at which resolution failed.
        depth: usize,
    },
    /// A candidate was found but isn't actionable (checked again later by C5;
    /// this variant covers strategies that can tell up front, e.g. a
    /// coordinate target entirely outside the viewport).
    NotActionable {
        /// Which predicate failed.
        reason: &'static str,
    },
    /// The strategy did not complete within its scoring timeout.
    Timeout,
}

/// Common interface implemented by every locator strategy (§4.1, §9).
#[async_trait]
pub trait LocatorStrategy: Send + Sync {
    /// Which kind this evaluator implements.
    fn kind(&self) -> StrategyKind;

    /// Evaluate this strategy against one step's bundle. Must be
    /// cancel-safe: callers wrap this in a [`tokio::time::timeout`]
    /// and drop the future on timeout without further polling.
    async fn evaluate(&self, page: &dyn PageDriver, step: &Step, evidence: &Evidence<'_>) -> EvalOutcome;
}

/// Resolve a set of candidates down to a single element, or an
/// [`EvalOutcome`] describing why that's not possible. Shared by every
/// DOM-based strategy: ambiguity is first narrowed by matching the
/// bundle's tag, then, if more than one candidate still remains,
/// broken by taking the first in document order — `candidates` is
/// assumed to already be in the order the driver's query returned it,
/// which for `querySelectorAll`/XPath ordered-node-snapshot queries is
/// document order.
pub(crate) fn resolve_unique(mut candidates: Vec<ElementSnapshot>, expected_tag: Option<&str>) -> EvalOutcome {
    if candidates.is_empty() {
        return EvalOutcome::NotFound;
    }
    if candidates.len() > 1 {
        if let Some(tag) = expected_tag {
            candidates.retain(|c| c.tag == tag);
        }
    }
    if candidates.is_empty() {
        return EvalOutcome::NotFound;
    }
    EvalOutcome::Found { element: candidates.remove(0), confidence: 0.0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::NodeIdRef;
    use crate::model::BoundingBox;
    use std::collections::HashMap;

    fn elem(node: u64, tag: &str) -> ElementSnapshot {
        ElementSnapshot {
            node: NodeIdRef(node),
            tag: tag.into(),
            attributes: HashMap::new(),
            text: String::new(),
            bounding_box: BoundingBox::default(),
            visible: true,
            enabled: true,
            topmost_at_center: true,
            monospace_font: false,
            dark_background: false,
        }
    }

    #[test]
    fn test_resolve_unique_empty() {
        assert_eq!(resolve_unique(vec![], None), EvalOutcome::NotFound);
    }

    #[test]
    fn test_resolve_unique_single() {
        let out = resolve_unique(vec![elem(1, "button")], None);
        match out {
            EvalOutcome::Found { element, .. } => assert_eq!(element.node.0, 1),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_resolve_unique_ambiguous_then_resolved_by_tag() {
        let candidates = vec![elem(1, "div"), elem(2, "button")];
        let out = resolve_unique(candidates, Some("button"));
        match out {
            EvalOutcome::Found { element, .. } => assert_eq!(element.node.0, 2),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_resolve_unique_tag_tie_resolved_by_document_order() {
        let candidates = vec![elem(1, "button"), elem(2, "button")];
        let out = resolve_unique(candidates, Some("button"));
        match out {
            EvalOutcome::Found { element, .. } => assert_eq!(element.node.0, 1),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
