//! Core data model: steps, bundles, recordings, and the records the
//! engine produces as it runs them.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Opaque handle to a browser tab, resolved against a driver on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TabId(pub u64);

/// Opaque handle to a DOM node, resolved against a driver on demand.
///
/// Never held across a suspension point; callers re-resolve from a
/// [`Bundle`] or selector string each time they need one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u64);

/// One element of an outer-to-inner iframe chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FrameLocator {
    /// Locate the frame by its `id` attribute.
    ById(String),
    /// Locate the frame by its `name` attribute.
    ByName(String),
    /// Locate the frame by its position among sibling frames.
    ByIndex(u32),
}

/// A pixel bounding box, as captured at record time or observed at playback.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Left edge, in CSS pixels.
    pub x: f64,
    /// Top edge, in CSS pixels.
    pub y: f64,
    /// Width, in CSS pixels.
    pub width: f64,
    /// Height, in CSS pixels.
    pub height: f64,
}

impl BoundingBox {
    /// The centre point of the box, used as a click target.
    pub fn centroid(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Whether the box has non-zero area.
    pub fn has_area(&self) -> bool {
        self.width > 0.0 && self.height > 0.0
    }

    /// Max per-axis drift between two samples, in pixels.
    pub fn drift_from(&self, other: &BoundingBox) -> f64 {
        (self.x - other.x).abs().max((self.y - other.y).abs())
    }
}

/// Immutable metadata captured at recording time, sufficient to
/// relocate the element under drift. The full contract between
/// recording and playback; nothing else is required to replay.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Bundle {
    /// Tag name, lowercased (e.g. `"button"`).
    #[serde(default)]
    pub tag: Option<String>,
    /// `id` attribute at record time.
    #[serde(default)]
    pub id: Option<String>,
    /// `name` attribute at record time.
    #[serde(default)]
    pub name: Option<String>,
    /// `placeholder` attribute at record time.
    #[serde(default)]
    pub placeholder: Option<String>,
    /// `aria-label` attribute at record time.
    #[serde(default)]
    pub aria_label: Option<String>,
    /// `data-*` attributes captured at record time.
    #[serde(default)]
    pub dataset: HashMap<String, String>,
    /// Visible text content at record time.
    #[serde(default)]
    pub visible_text: Option<String>,
    /// Position-based XPath at record time.
    #[serde(default)]
    pub xpath: Option<String>,
    /// CSS selector at record time.
    #[serde(default)]
    pub css_selector: Option<String>,
    /// Class list at record time.
    #[serde(default)]
    pub class_list: Vec<String>,
    /// Bounding box at record time.
    #[serde(default)]
    pub bounding_box: BoundingBox,
    /// Outer-to-inner chain of frames required to reach the owning document.
    #[serde(default)]
    pub iframe_chain: Vec<FrameLocator>,
}

/// What kind of user action a [`Step`] replays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionKind {
    /// Navigate to a URL.
    Open,
    /// Click a target.
    Click,
    /// Type a literal value into a target.
    Input,
    /// Press Enter, typically after an `Input`.
    Enter,
    /// Choose an option from a select-like control.
    Select,
    /// Run the conditional click poll loop.
    ConditionalClick,
}

/// Where a step's bundle was captured from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordedVia {
    /// Recorded by observing the DOM.
    Dom,
    /// Recorded by observing the rendered page (vision fallback at record time).
    Vision,
}

/// Which context an element is expected, or was observed, to be in (C9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContextClass {
    /// A plain input-like element (text field, button, select).
    InputField,
    /// A terminal / shell prompt.
    Terminal,
    /// An AI-assistant suggestion/copilot overlay.
    CopilotPrompt,
}

/// Parameters for a `conditional-click` step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionalConfig {
    /// Labels to watch for and click when present.
    pub labels: Vec<String>,
    /// Label whose appearance ends the loop successfully.
    #[serde(default)]
    pub success_label: Option<String>,
    /// Overall loop timeout, in milliseconds.
    #[serde(default = "default_cond_timeout_ms")]
    pub timeout_ms: u32,
    /// Poll interval, in milliseconds.
    #[serde(default = "default_poll_ms")]
    pub poll_ms: u32,
    /// Maximum number of clicks before giving up.
    #[serde(default)]
    pub max_clicks: Option<u32>,
    /// Minimum OCR confidence required to act on a match.
    #[serde(default = "default_confidence_min")]
    pub confidence_min: f32,
    /// Delay after a click before resuming polling, in milliseconds.
    #[serde(default = "default_post_click_delay_ms")]
    pub post_click_delay_ms: u32,
}

fn default_cond_timeout_ms() -> u32 {
    120_000
}
fn default_poll_ms() -> u32 {
    500
}
fn default_confidence_min() -> f32 {
    0.7
}
fn default_post_click_delay_ms() -> u32 {
    500
}

/// One locator strategy kind, ordered by the fixed tie-break priority
/// used when two strategies tie on confidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// A selector promoted from the healing cache.
    Cached,
    /// Exact `id`/`name`/`data-*` attribute match.
    DomIdAttr,
    /// CSS selector match.
    Css,
    /// Position-based XPath match.
    XPath,
    /// Accessibility-tree role + accessible name match.
    Semantic,
    /// Visible text / label-for / placeholder match.
    TextLabelPlaceholder,
    /// Vision/OCR match on a rendered screenshot.
    VisionOcr,
    /// Absolute recorded pointer coordinates.
    Coordinates,
}

impl StrategyKind {
    /// The scoring weight a fresh (non-cached) match of this kind receives,
    /// before any OCR-derived adjustment.
    pub fn expected_confidence(self) -> f32 {
        match self {
            Self::Cached => 0.80,
            Self::DomIdAttr => 0.90,
            Self::Css => 0.65,
            Self::XPath => 0.55,
            Self::Semantic => 0.85,
            Self::TextLabelPlaceholder => 0.75,
            Self::VisionOcr => 0.60,
            Self::Coordinates => 0.30,
        }
    }
}

/// One entry of a [`Step`]'s pre-ranked fallback chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackEntry {
    /// Which evaluator this entry invokes.
    pub kind: StrategyKind,
    /// Confidence expected from this strategy before it is actually run.
    pub expected_confidence: f32,
    /// Per-attempt scoring timeout, in milliseconds.
    pub timeout_ms: u64,
}

/// A single recorded user action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Stable identifier, unique within a [`Recording`].
    pub id: String,
    /// What kind of action this step replays.
    pub action: ActionKind,
    /// Metadata sufficient to relocate the target element.
    pub bundle: Bundle,
    /// Pointer coordinates recorded at capture time, if any.
    #[serde(default)]
    pub recorded_point: Option<(f64, f64)>,
    /// Literal value for `input`/`select` steps.
    #[serde(default)]
    pub value: Option<String>,
    /// Human-readable label, used by vision/semantic matching.
    #[serde(default)]
    pub label: Option<String>,
    /// Per-step delay applied before dispatch, in milliseconds.
    #[serde(default)]
    pub delay_ms: Option<u64>,
    /// Configuration for `conditional-click` steps.
    #[serde(default)]
    pub conditional: Option<ConditionalConfig>,
    /// Where this step's bundle was originally captured from.
    pub recorded_via: RecordedVia,
    /// Expected context class, used by validation (C9).
    #[serde(default)]
    pub expected_context: Option<ContextClass>,
    /// Fallback chain computed at record time, if pre-ranked.
    #[serde(default)]
    pub fallback_chain: Option<Vec<FallbackEntry>>,
}

/// Conditional-click loop defaults applied when a step omits its own.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConditionalDefaults {
    /// Default trigger labels.
    #[serde(default)]
    pub labels: Vec<String>,
    /// Default loop timeout, in milliseconds.
    #[serde(default)]
    pub timeout_ms: Option<u32>,
    /// Default minimum OCR confidence.
    #[serde(default)]
    pub confidence_min: Option<f32>,
}

/// An ordered, finite sequence of steps plus recording-level settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recording {
    /// Monotonically increasing schema version; migrations are additive only.
    #[serde(default)]
    pub schema_version: u32,
    /// Ordered steps.
    pub steps: Vec<Step>,
    /// Delay applied after every step, in milliseconds.
    #[serde(default)]
    pub global_delay_ms: u64,
    /// Index to loop back to, or `-1` to disable looping.
    #[serde(default = "default_loop_start_index")]
    pub loop_start_index: i64,
    /// Defaults for conditional-click steps that don't specify their own.
    #[serde(default)]
    pub conditional_defaults: ConditionalDefaults,
}

fn default_loop_start_index() -> i64 {
    -1
}

/// Additively migrate a recording to the current schema version.
///
/// Only ever adds defaulted fields; never removes or renames one, so
/// `migrate(r).steps[i]` is a superset of `r.steps[i]` for every `i`.
pub fn migrate(mut recording: Recording) -> Recording {
    const CURRENT_SCHEMA_VERSION: u32 = 1;
    if recording.schema_version < CURRENT_SCHEMA_VERSION {
        recording.schema_version = CURRENT_SCHEMA_VERSION;
    }
    recording
}

/// The outcome of attempting a single step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StepOutcome {
    /// The step's action was dispatched successfully.
    Succeeded,
    /// The step's action failed after exhausting its fallback chain.
    Failed {
        /// Which error kind the last attempted strategy reported.
        kind: String,
    },
    /// The step was not attempted (e.g. a disabled/looped-over step).
    Skipped,
    /// Execution was cancelled before the step completed.
    Cancelled,
}

/// Result of a single `execute(step, context)` call (§4.2).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    /// Whether the step ultimately succeeded.
    pub success: bool,
    /// Which strategy produced the dispatch, if any.
    #[serde(default)]
    pub used_strategy: Option<StrategyKind>,
    /// Total wall-clock time spent on the step, in milliseconds.
    pub total_duration_ms: u64,
    /// Detailed outcome, including failure kind.
    pub outcome: StepOutcome,
}
