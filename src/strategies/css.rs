//! CSS strategy: brittle selector match, boosted when unique (§4.1).

use super::{resolve_unique, EvalOutcome, Evidence, LocatorStrategy};
use crate::driver::PageDriver;
use crate::model::{Step, StrategyKind};
use async_trait::async_trait;

/// Matches on the bundle's recorded CSS selector.
pub struct CssStrategy;

#[async_trait]
impl LocatorStrategy for CssStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Css
    }

    async fn evaluate(&self, page: &dyn PageDriver, step: &Step, evidence: &Evidence<'_>) -> EvalOutcome {
        let Some(selector) = &step.bundle.css_selector else {
            return EvalOutcome::NotFound;
        };
        match page.query_css(evidence.scope, selector).await {
            Ok(candidates) => match resolve_unique(candidates, step.bundle.tag.as_deref()) {
                EvalOutcome::Found { element, .. } => {
                    EvalOutcome::Found { element, confidence: self.kind().expected_confidence() }
                }
                other => other,
            },
            Err(crate::error::EngineError::FrameResolutionFailed { depth }) => {
                EvalOutcome::FrameResolutionFailed { depth }
            }
            Err(_) => EvalOutcome::NotFound,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::mock::{MockPage, MockPageDriver};
    use crate::driver::{ElementSnapshot, FrameScope, NodeIdRef};
    use crate::model::{ActionKind, Bundle, BoundingBox, RecordedVia, Step};
    use std::collections::HashMap;

    fn snapshot(node: u64) -> ElementSnapshot {
        ElementSnapshot {
            node: NodeIdRef(node),
            tag: "button".into(),
            attributes: HashMap::new(),
            text: String::new(),
            bounding_box: BoundingBox { x: 0.0, y: 0.0, width: 10.0, height: 10.0 },
            visible: true,
            enabled: true,
            topmost_at_center: true,
            monospace_font: false,
            dark_background: false,
        }
    }

    #[tokio::test]
    async fn test_css_unique_match_boosted_to_expected_confidence() {
        let mut page = MockPage::default();
        page.by_css.insert("#submit-btn".into(), vec![snapshot(1)]);
        let driver = MockPageDriver::new(crate::model::TabId(0), page);
        let scope = FrameScope::top();
        let evidence = Evidence { scope: &scope };

        let step = Step {
            id: "s1".into(),
            action: ActionKind::Click,
            bundle: Bundle { css_selector: Some("#submit-btn".into()), ..Default::default() },
            recorded_point: None,
            value: None,
            label: None,
            delay_ms: None,
            conditional: None,
            recorded_via: RecordedVia::Dom,
            expected_context: None,
            fallback_chain: None,
        };

        let out = CssStrategy.evaluate(&driver, &step, &evidence).await;
        match out {
            EvalOutcome::Found { confidence, .. } => assert_eq!(confidence, 0.65),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
