//! Error types for the resilient action engine.

use std::fmt;

/// Engine error taxonomy.
///
/// Every variant here maps onto a single failure mode from the
/// component design: a locator strategy that found nothing, a vision
/// pass that couldn't read the screen, a dispatcher that lost the
/// page, or a circuit that tripped. Callers match on these to decide
/// whether to retry, heal, or give up.
#[derive(Debug)]
pub enum EngineError {
    /// No strategy in the fallback chain located a unique, actionable target.
    NotFound {
        /// Human-readable step label, for logging.
        step: String,
    },
    /// More than one candidate matched and none could be disambiguated.
    Ambiguous {
        /// Step label.
        step: String,
        /// Number of candidates found.
        candidates: usize,
    },
    /// An iframe chain in the step's locator could not be resolved.
    FrameResolutionFailed {
        /// Depth (0-based index into the frame chain) at which resolution failed.
        depth: usize,
    },
    /// A target was found but never became actionable within the autowaiting budget.
    NotActionable {
        /// Which actionability predicate never passed (e.g. "visible", "enabled").
        reason: &'static str,
    },
    /// The resolved context doesn't match the step's expected context kind.
    ContextMismatch {
        /// What the step expected.
        expected: String,
        /// What was actually observed.
        observed: String,
    },
    /// The rate limiter rejected the call; too many dispatches too fast.
    RateLimited,
    /// The circuit breaker is open and is refusing new dispatches.
    CircuitOpen,
    /// The vision/OCR pass failed to produce usable text.
    OcrFailed {
        /// Underlying cause.
        message: String,
    },
    /// Dispatching the resolved action to the page driver failed.
    DispatchFailed {
        /// Underlying cause.
        message: String,
    },
    /// Reading from or writing to persisted state failed.
    PersistenceFailed {
        /// Underlying cause.
        message: String,
    },
    /// The operation was cancelled by the caller before it completed.
    Cancelled,
    /// JSON serialization/deserialization error.
    Json(serde_json::Error),
    /// IO error (loading recordings, screenshots, cache files).
    Io(std::io::Error),
    /// Image decoding error while preparing a frame for OCR.
    Image(image::ImageError),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { step } => write!(f, "no strategy located a target for step {step}"),
            Self::Ambiguous { step, candidates } => {
                write!(f, "step {step} matched {candidates} candidates, expected exactly one")
            }
            Self::FrameResolutionFailed { depth } => {
                write!(f, "failed to resolve iframe chain at depth {depth}")
            }
            Self::NotActionable { reason } => write!(f, "target never became actionable: {reason}"),
            Self::ContextMismatch { expected, observed } => {
                write!(f, "context mismatch: expected {expected}, observed {observed}")
            }
            Self::RateLimited => write!(f, "rate limit exceeded"),
            Self::CircuitOpen => write!(f, "circuit breaker open"),
            Self::OcrFailed { message } => write!(f, "OCR failed: {message}"),
            Self::DispatchFailed { message } => write!(f, "dispatch failed: {message}"),
            Self::PersistenceFailed { message } => write!(f, "persistence failed: {message}"),
            Self::Cancelled => write!(f, "operation cancelled"),
            Self::Json(e) => write!(f, "JSON error: {e}"),
            Self::Io(e) => write!(f, "IO error: {e}"),
            Self::Image(e) => write!(f, "image decode error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Json(e) => Some(e),
            Self::Io(e) => Some(e),
            Self::Image(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<image::ImageError> for EngineError {
    fn from(e: image::ImageError) -> Self {
        Self::Image(e)
    }
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_error_display_variants() {
        let err = EngineError::NotFound { step: "click-submit".into() };
        assert_eq!(format!("{err}"), "no strategy located a target for step click-submit");

        let err = EngineError::Ambiguous { step: "s1".into(), candidates: 3 };
        assert_eq!(format!("{err}"), "step s1 matched 3 candidates, expected exactly one");

        let err = EngineError::FrameResolutionFailed { depth: 2 };
        assert_eq!(format!("{err}"), "failed to resolve iframe chain at depth 2");

        let err = EngineError::NotActionable { reason: "visible" };
        assert_eq!(format!("{err}"), "target never became actionable: visible");

        let err = EngineError::RateLimited;
        assert_eq!(format!("{err}"), "rate limit exceeded");

        let err = EngineError::CircuitOpen;
        assert_eq!(format!("{err}"), "circuit breaker open");

        let err = EngineError::Cancelled;
        assert_eq!(format!("{err}"), "operation cancelled");
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid").unwrap_err();
        let engine_err: EngineError = json_err.into();
        assert!(format!("{engine_err}").starts_with("JSON error:"));
    }

    #[test]
    fn test_error_source_chain() {
        use std::error::Error;

        let json_err = serde_json::from_str::<serde_json::Value>("invalid").unwrap_err();
        let engine_err = EngineError::Json(json_err);
        assert!(engine_err.source().is_some());

        let not_found = EngineError::NotFound { step: "x".into() };
        assert!(not_found.source().is_none());
    }
}
