//! DOM-ID/Attr strategy: exact `id`/`name`/`data-*` match (§4.1).

use super::{resolve_unique, EvalOutcome, Evidence, LocatorStrategy};
use crate::driver::PageDriver;
use crate::model::{Step, StrategyKind};
use async_trait::async_trait;

/// Matches on `id`, falling back to `name`, falling back to the first
/// `data-*` entry captured in the bundle.
pub struct DomAttrStrategy;

#[async_trait]
impl LocatorStrategy for DomAttrStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::DomIdAttr
    }

    async fn evaluate(&self, page: &dyn PageDriver, step: &Step, evidence: &Evidence<'_>) -> EvalOutcome {
        let bundle = &step.bundle;
        let (attr, value): (String, String) = if let Some(id) = &bundle.id {
            ("id".to_string(), id.clone())
        } else if let Some(name) = &bundle.name {
            ("name".to_string(), name.clone())
        } else if let Some((k, v)) = bundle.dataset.iter().next() {
            (k.clone(), v.clone())
        } else {
            return EvalOutcome::NotFound;
        };

        match page.query_attr(evidence.scope, &attr, &value).await {
            Ok(candidates) => match resolve_unique(candidates, bundle.tag.as_deref()) {
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
