//! XPath strategy: position-based match, brittle to insertions (§4.1).

use super::{resolve_unique, EvalOutcome, Evidence, LocatorStrategy};
use crate::driver::PageDriver;
use crate::model::{Step, StrategyKind};
use async_trait::async_trait;

/// Matches on the bundle's recorded position-based XPath.
pub struct XPathStrategy;

#[async_trait]
impl LocatorStrategy for XPathStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::XPath
    }

    async fn evaluate(&self, page: &dyn PageDriver, step: &Step, evidence: &Evidence<'_>) -> EvalOutcome {
        let Some(xpath) = &step.bundle.xpath else {
            return EvalOutcome::NotFound;
        };
        match page.query_xpath(evidence.scope, xpath).await {
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

    #[tokio::test]
    async fn test_xpath_not_found_after_restructure() {
        let driver = MockPageDriver::new(crate::model::TabId(0), MockPage::default());
        let scope = FrameScope::top();
        let evidence = Evidence { scope: &scope };
        let step = Step {
            id: "s1".into(),
            action: ActionKind::Click,
            bundle: Bundle {
                xpath: Some("/html/body/div[3]/button[2]".into()),
                ..Default::default()
            },
            recorded_point: None,
            value: None,
            label: None,
            delay_ms: None,
            conditional: None,
            recorded_via: RecordedVia::Dom,
            expected_context: None,
            fallback_chain: None,
        };
        assert_eq!(XPathStrategy.evaluate(&driver, &step, &evidence).await, EvalOutcome::NotFound);
    }

    #[tokio::test]
    async fn test_xpath_found() {
        let mut page = MockPage::default();
        page.by_xpath.insert(
            "/html/body/div[3]/button[2]".into(),
            vec![ElementSnapshot {
                node: NodeIdRef(9),
                tag: "button".into(),
                attributes: HashMap::new(),
                text: String::new(),
                bounding_box: BoundingBox { x: 0.0, y: 0.0, width: 5.0, height: 5.0 },
                visible: true,
                enabled: true,
                topmost_at_center: true,
                monospace_font: false,
                dark_background: false,
            }],
        );
        let driver = MockPageDriver::new(crate::model::TabId(0), page);
        let scope = FrameScope::top();
        let evidence = Evidence { scope: &scope };
        let step = Step {
            id: "s1".into(),
            action: ActionKind::Click,
            bundle: Bundle { xpath: Some("/html/body/div[3]/button[2]".into()), ..Default::default() },
            recorded_point: None,
            value: None,
            label: None,
            delay_ms: None,
            conditional: None,
            recorded_via: RecordedVia::Dom,
            expected_context: None,
            fallback_chain: None,
        };
        match XPathStrategy.evaluate(&driver, &step, &evidence).await {
            EvalOutcome::Found { confidence, .. } => assert_eq!(confidence, 0.55),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
