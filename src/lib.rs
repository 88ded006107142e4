//! # Resilient Action Engine
//!
//! Replays a recorded browser interaction against a live page, healing
//! each step through a fallback chain of locator strategies (CSS/DOM
//! attributes, XPath, accessibility tree, visible text, vision/OCR,
//! recorded coordinates) before giving up.
//!
//! ## Features
//!
//! - **Self-healing**: a step whose original selector has drifted is
//!   relocated by the next strategy in the chain and, once relocated,
//!   cached so the next run skips straight to the working selector.
//! - **Conditional waits**: steps that should only fire once some
//!   condition becomes true poll for it instead of clicking blind.
//! - **Driver-agnostic**: the engine only depends on [`driver::PageDriver`];
//!   CDP (`chrome`) and WebDriver (`webdriver`) backends are additive.
//! - **Telemetry**: every strategy attempt, cache hit, and healing
//!   event is recorded for a per-run [`telemetry::Analytics`] summary.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use resilient_action_engine::{RuntimeConfig, DecisionEngine, HealingCache, TelemetryLogger};
//! use resilient_action_engine::model::Recording;
//! use tokio::sync::watch;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let recording: Recording = serde_json::from_str(&std::fs::read_to_string("run.json")?)?;
//!     let config = RuntimeConfig::from_env();
//!     let cache = HealingCache::new(config.heal_max_entries, config.heal_ttl(), config.heal_min_success_rate);
//!     let telemetry = TelemetryLogger::new();
//!     let engine = DecisionEngine::new(&cache, &telemetry, &config);
//!     let (_tx, cancel) = watch::channel(false);
//!
//!     // engine.execute(&page, &strategies, &step, "run-1", 0, &cancel).await?;
//!     let _ = (engine, cancel);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! - `ocr` (default) - vision/OCR healing via the system `tesseract` binary
//! - `chrome` - CDP-backed driver via chromiumoxide
//! - `webdriver` - WebDriver-backed driver via thirtyfour
//! - `remote_ocr` - pluggable remote OCR provider instead of local tesseract
//! - `test-support` - exposes [`driver::mock::MockPageDriver`] outside unit tests
//! - `full` - all of the above

#![warn(missing_docs)]

pub mod actionability;
pub mod cache;
pub mod conditional_click;
pub mod config;
pub mod dispatcher;
pub mod driver;
pub mod engine;
pub mod error;
pub mod model;
pub mod rate_limit;
pub mod strategies;
pub mod telemetry;
pub mod validation;
pub mod vision;

#[cfg(feature = "chrome")]
pub mod chrome_driver;

#[cfg(feature = "webdriver")]
pub mod webdriver_driver;

pub use cache::{CacheKey, HealingCache, HealingCacheEntry};
pub use config::RuntimeConfig;
pub use conditional_click::{wait_and_click, ConditionalOutcome, ConditionalResult};
pub use dispatcher::dispatch;
pub use driver::{AxNode, ElementSnapshot, FrameScope, NodeIdRef, PageDriver};
pub use engine::DecisionEngine;
pub use error::{EngineError, EngineResult};
pub use model::{
    ActionKind, Bundle, ConditionalConfig, ConditionalDefaults, ContextClass, FallbackEntry,
    FrameLocator, NodeId, Outcome, Recording, RecordedVia, Step, StepOutcome, StrategyKind, TabId,
};
pub use rate_limit::{Admission, BreakerState, CircuitBreaker, RateLimiter};
pub use strategies::{EvalOutcome, Evidence, LocatorStrategy};
pub use telemetry::{Analytics, RunSummary, TelemetryEvent, TelemetryLogger, TelemetryOutcome};
pub use vision::{ClickTarget, MatchKind, OcrProvider, OcrWord, VisionEngine};

#[cfg(feature = "chrome")]
pub use chrome_driver::ChromeDriver;

#[cfg(feature = "webdriver")]
pub use webdriver_driver::WebDriverDriver;

#[cfg(feature = "remote_ocr")]
pub use vision::RemoteOcrProvider;

#[cfg(feature = "ocr")]
pub use vision::TesseractOcrProvider;
