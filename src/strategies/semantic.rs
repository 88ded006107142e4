//! Semantic (role/name) strategy: walks the accessibility tree (§4.1).

use super::{EvalOutcome, Evidence, LocatorStrategy};
use crate::driver::PageDriver;
use crate::model::{Step, StrategyKind};
use async_trait::async_trait;

/// Matches on accessibility role (exact) plus accessible name
/// (case-insensitive substring, unless the bundle's visible text
/// equals the step label exactly).
pub struct SemanticStrategy;

#[async_trait]
impl LocatorStrategy for SemanticStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Semantic
    }

    async fn evaluate(&self, page: &dyn PageDriver, step: &Step, evidence: &Evidence<'_>) -> EvalOutcome {
        let Some(tag) = &step.bundle.tag else {
            return EvalOutcome::NotFound;
        };
        let name = step
            .label
            .as_deref()
            .or(step.bundle.visible_text.as_deref())
            .or(step.bundle.aria_label.as_deref());
        let Some(name) = name else {
            return EvalOutcome::NotFound;
        };
        let role = tag_to_role(tag);

        match page.query_ax(evidence.scope, role, name).await {
            Ok(candidates) => match candidates.len() {
                0 => EvalOutcome::NotFound,
                1 => {
                    let node = candidates.into_iter().next().unwrap().node;
                    match page.snapshot(&node).await {
                        Ok(element) => {
                            EvalOutcome::Found { element, confidence: self.kind().expected_confidence() }
                        }
                        Err(_) => EvalOutcome::NotFound,
                    }
                }
                n => EvalOutcome::Ambiguous { count: n },
            },
            Err(crate::error::EngineError::FrameResolutionFailed { depth }) => {
                EvalOutcome::FrameResolutionFailed { depth }
            }
            Err(_) => EvalOutcome::NotFound,
        }
    }
}

/// Maps common interactive tags to their implicit ARIA role.
fn tag_to_role(tag: &str) -> &'static str {
    match tag {
        "button" => "button",
        "a" => "link",
        "input" => "textbox",
        "select" => "combobox",
        "textarea" => "textbox",
        _ => "generic",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::mock::{MockPage, MockPageDriver};
    use crate::driver::{AxNode, ElementSnapshot, FrameScope, NodeIdRef};
    use crate::model::{ActionKind, Bundle, BoundingBox, RecordedVia, Step};
    use std::collections::HashMap;

    #[tokio::test]
    async fn test_semantic_heals_after_id_removed() {
        let mut page = MockPage::default();
        page.by_ax.insert(
            "button:allow".into(),
            vec![AxNode { node: NodeIdRef(5), role: "button".into(), name: "Allow".into() }],
        );
        page.by_css.insert(String::new(), vec![]);
        let snap = ElementSnapshot {
            node: NodeIdRef(5),
            tag: "button".into(),
            attributes: HashMap::new(),
            text: "Allow".into(),
            bounding_box: BoundingBox { x: 10.0, y: 10.0, width: 40.0, height: 20.0 },
            visible: true,
            enabled: true,
            topmost_at_center: true,
            monospace_font: false,
            dark_background: false,
        };
        page.by_text.insert("Allow".into(), vec![snap]);

        let driver = MockPageDriver::new(crate::model::TabId(0), page);
        let scope = FrameScope::top();
        let evidence = Evidence { scope: &scope };
        let step = Step {
            id: "s1".into(),
            action: ActionKind::Click,
            bundle: Bundle { tag: Some("button".into()), id: Some("allow-btn-v1".into()), ..Default::default() },
            recorded_point: None,
            value: None,
            label: Some("Allow".into()),
            delay_ms: None,
            conditional: None,
            recorded_via: RecordedVia::Dom,
            expected_context: None,
            fallback_chain: None,
        };

        let out = SemanticStrategy.evaluate(&driver, &step, &evidence).await;
        match out {
            EvalOutcome::Found { confidence, element } => {
                assert_eq!(confidence, 0.85);
                assert_eq!(element.node.0, 5);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
