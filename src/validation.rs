//! Validation (C9): context disambiguation before dispatch.
//!
//! Classifies a located element's visual characteristics and vetoes
//! dispatch when the step's expected context and the observed context
//! are irreconcilable, surfacing [`EngineError::ContextMismatch`] so
//! the healing path gets a chance instead.

use crate::driver::ElementSnapshot;
use crate::error::EngineError;
use crate::model::ContextClass;

const MISMATCH_VETO_CONFIDENCE: f64 = 0.8;

/// The result of classifying one element.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    /// The inferred context class.
    pub class: ContextClass,
    /// Confidence in [0, 1].
    pub confidence: f64,
}

/// Classify an element's context from its visual characteristics.
pub fn classify(snapshot: &ElementSnapshot) -> Classification {
    if snapshot.monospace_font && snapshot.dark_background && looks_like_shell_prompt(&snapshot.text) {
        return Classification { class: ContextClass::Terminal, confidence: 0.9 };
    }
    let copilot_like = snapshot
        .attributes
        .get("class")
        .or_else(|| snapshot.attributes.get("aria-label"))
        .map(|v| {
            let lower = v.to_lowercase();
            lower.contains("copilot") || lower.contains("suggestion")
        })
        .unwrap_or(false);
    if copilot_like {
        return Classification { class: ContextClass::CopilotPrompt, confidence: 0.85 };
    }
    Classification { class: ContextClass::InputField, confidence: 0.7 }
}

fn looks_like_shell_prompt(text: &str) -> bool {
    let trimmed = text.trim_start();
    trimmed.starts_with("$ ")
        || trimmed.starts_with("> ")
        || trimmed.starts_with("# ")
        || trimmed.starts_with("C:\\>")
}

/// Validate a located element against the step's expected context,
/// returning `Ok(())` if dispatch should proceed or a
/// [`EngineError::ContextMismatch`] if it should be vetoed.
pub fn validate(expected: Option<ContextClass>, snapshot: &ElementSnapshot) -> Result<(), EngineError> {
    let Some(expected) = expected else { return Ok(()) };
    let observed = classify(snapshot);
    if observed.class != expected && observed.confidence >= MISMATCH_VETO_CONFIDENCE {
        return Err(EngineError::ContextMismatch {
            expected: format!("{expected:?}"),
            observed: format!("{:?}", observed.class),
        });
    }
    Ok(())
}
