//! Text/Label/Placeholder strategy (§4.1).
//!
//! Matches on visible text, label-for association, or placeholder,
//! case-insensitive and trimmed; prefers an exact match over a
//! contains match when both exist.

use super::{EvalOutcome, Evidence, LocatorStrategy};
use crate::driver::{ElementSnapshot, PageDriver};
use crate::model::{Step, StrategyKind};
use async_trait::async_trait;

/// Matches on the bundle's visible text, falling back to its placeholder.
pub struct TextStrategy;

#[async_trait]
impl LocatorStrategy for TextStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::TextLabelPlaceholder
    }

    async fn evaluate(&self, page: &dyn PageDriver, step: &Step, evidence: &Evidence<'_>) -> EvalOutcome {
        let needle = step
            .label
            .as_deref()
            .or(step.bundle.visible_text.as_deref())
            .or(step.bundle.placeholder.as_deref());
        let Some(needle) = needle else {
            return EvalOutcome::NotFound;
        };
        let needle_trimmed = needle.trim();

        let candidates = match page.query_text(evidence.scope, needle_trimmed).await {
            Ok(c) => c,
            Err(crate::error::EngineError::FrameResolutionFailed { depth }) => {
                return EvalOutcome::FrameResolutionFailed { depth };
            }
            Err(_) => return EvalOutcome::NotFound,
        };

        if candidates.is_empty() {
            return EvalOutcome::NotFound;
        }

        let exact: Vec<&ElementSnapshot> = candidates
            .iter()
            .filter(|c| c.text.trim().eq_ignore_ascii_case(needle_trimmed))
            .collect();
        if exact.len() == 1 {
            return EvalOutcome::Found {
                element: exact[0].clone(),
                confidence: self.kind().expected_confidence(),
            };
        }
        if exact.len() > 1 {
            return EvalOutcome::Ambiguous { count: exact.len() };
        }

        match candidates.len() {
            1 => EvalOutcome::Found {
                element: candidates.into_iter().next().unwrap(),
                confidence: self.kind().expected_confidence(),
            },
            n => EvalOutcome::Ambiguous { count: n },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::mock::{MockPage, MockPageDriver};
    use crate::driver::{FrameScope, NodeIdRef};
    use crate::model::{ActionKind, Bundle, BoundingBox, RecordedVia, Step};
    use std::collections::HashMap;

    fn snap(node: u64, text: &str) -> ElementSnapshot {
        ElementSnapshot {
            node: NodeIdRef(node),
            tag: "button".into(),
            attributes: HashMap::new(),
            text: text.into(),
            bounding_box: BoundingBox { x: 0.0, y: 0.0, width: 10.0, height: 10.0 },
            visible: true,
            enabled: true,
            topmost_at_center: true,
            monospace_font: false,
            dark_background: false,
        }
    }

    #[tokio::test]
    async fn test_text_prefers_exact_match() {
        let mut page = MockPage::default();
        page.by_text.insert("Submit".into(), vec![snap(1, "Submit")]);
        let driver = MockPageDriver::new(crate::model::TabId(0), page);
        let scope = FrameScope::top();
        let evidence = Evidence { scope: &scope };
        let step = Step {
            id: "s1".into(),
            action: ActionKind::Click,
            bundle: Bundle::default(),
            recorded_point: None,
            value: None,
            label: Some("Submit".into()),
            delay_ms: None,
            conditional: None,
            recorded_via: RecordedVia::Dom,
            expected_context: None,
            fallback_chain: None,
        };
        match TextStrategy.evaluate(&driver, &step, &evidence).await {
            EvalOutcome::Found { confidence, .. } => assert_eq!(confidence, 0.75),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
