//! Vision / OCR Healing Path (C3).
//!
//! Renders a screenshot, runs OCR, and exposes
//! [`VisionEngine::find_text`]/[`VisionEngine::find_any`] so the
//! Vision OCR locator strategy and the Conditional Click Engine (C7)
//! can both locate on-screen text without touching the DOM.
//!
//! The OCR worker is owned by the [`VisionEngine`] and is acquired
//! once, at recording/playback start, rather than lazily on first use
//! — matching the scoped-lifetime guidance in the design notes. Every
//! screenshot+OCR pass is gated by a shared [`CircuitBreaker`] (C8),
//! the same one an external-call strategy would consult: a flaky OCR
//! backend trips it and every caller sees `NotFound`/an error instead
//! of paying for a doomed screenshot and recognition round-trip.

use crate::driver::PageDriver;
use crate::error::{EngineError, EngineResult};
use crate::rate_limit::{Admission, CircuitBreaker};
use async_trait::async_trait;
use std::time::Duration;

/// One word or phrase OCR found on the screen.
#[derive(Debug, Clone, PartialEq)]
pub struct OcrWord {
    /// Recognized text.
    pub text: String,
    /// OCR confidence in [0, 1].
    pub confidence: f32,
    /// Bounding box in the coordinate space of the image that was OCR'd.
    pub bounding_box: crate::model::BoundingBox,
}

/// A located on-screen click target, already adjusted for scroll offset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClickTarget {
    /// Viewport x coordinate.
    pub x: f64,
    /// Viewport y coordinate.
    pub y: f64,
    /// Match confidence in [0, 1].
    pub confidence: f32,
}

/// Pluggable OCR backend. The local backend shells out to the system
/// `tesseract` binary; the optional remote backend calls an HTTP
/// inference endpoint. Both return the same [`OcrWord`] shape.
#[async_trait]
pub trait OcrProvider: Send + Sync {
    /// Recognize text in a PNG-encoded screenshot.
    async fn recognize(&self, png: &[u8]) -> EngineResult<Vec<OcrWord>>;
}

/// Matching tier a hit was found at, from strongest to weakest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    /// Case-sensitive exact match.
    Exact,
    /// Case-insensitive substring match.
    Contains,
    /// Bigram Dice coefficient above the fuzzy threshold.
    Fuzzy,
}

const FUZZY_DICE_MIN: f64 = 0.7;
const MAX_SCROLL_ATTEMPTS: u32 = 3;

/// One screenshot + OCR pass, cheap to hold onto and re-query against
/// multiple label sets without re-screenshotting or re-running OCR.
pub struct VisionFrame {
    words: Vec<OcrWord>,
    scroll: (f64, f64),
}

/// Owns the OCR worker for one recording/playback session.
pub struct VisionEngine {
    ocr: Box<dyn OcrProvider>,
    confidence_min: f32,
    breaker: CircuitBreaker,
}

impl VisionEngine {
    /// Acquire a vision engine for a session, backed by `ocr`, guarded
    /// by a circuit breaker with sane defaults (opens after 3
    /// consecutive failures, stays open 60s).
    pub fn new(ocr: Box<dyn OcrProvider>, confidence_min: f32) -> Self {
        Self::with_breaker(ocr, confidence_min, CircuitBreaker::new(3, Duration::from_secs(60)))
    }

    /// Acquire a vision engine with an explicit breaker, so callers
    /// with their own failure-threshold/open-duration tunables (see
    /// [`crate::config::RuntimeConfig`]) don't have to accept the
    /// defaults.
    pub fn with_breaker(ocr: Box<dyn OcrProvider>, confidence_min: f32, breaker: CircuitBreaker) -> Self {
        Self { ocr, confidence_min, breaker }
    }

    /// Take a single screenshot + OCR pass. Every caller that needs to
    /// check more than one label against the same frame — the
    /// conditional-click loop's success label and trigger labels, for
    /// instance — should call this once and match against the result
    /// with [`VisionEngine::locate_in`]/[`VisionEngine::locate_any_in`]
    /// rather than calling [`VisionEngine::find_text`]/
    /// [`VisionEngine::find_any`] per label.
    pub async fn observe(&self, page: &dyn PageDriver) -> EngineResult<VisionFrame> {
        let words = self.recognize_screen(page).await?;
        let scroll = page.scroll_offset().await?;
        Ok(VisionFrame { words, scroll })
    }

    /// Locate `label` within an already-captured frame.
    pub fn locate_in(&self, frame: &VisionFrame, label: &str) -> Option<ClickTarget> {
        let (word, kind) = best_match(&frame.words, label)?;
        let confidence = tier_confidence(kind, word.confidence);
        if confidence < self.confidence_min {
            return None;
        }
        let (cx, cy) = word.bounding_box.centroid();
        Some(ClickTarget { x: cx - frame.scroll.0, y: cy - frame.scroll.1, confidence })
    }

    /// Locate the first present label out of `labels`, in order,
    /// within an already-captured frame.
    pub fn locate_any_in<'a>(&self, frame: &VisionFrame, labels: &'a [String]) -> Option<(&'a str, ClickTarget)> {
        labels.iter().find_map(|label| self.locate_in(frame, label).map(|target| (label.as_str(), target)))
    }

    /// Find a single target string on the current screen, scrolling up
    /// to [`MAX_SCROLL_ATTEMPTS`] times and re-running OCR if the best
    /// match lies outside the current viewport.
    pub async fn find_text(&self, page: &dyn PageDriver, target: &str) -> EngineResult<Option<ClickTarget>> {
        for attempt in 0..=MAX_SCROLL_ATTEMPTS {
            let frame = self.observe(page).await?;
            if let Some(hit) = self.locate_in(&frame, target) {
                return Ok(Some(hit));
            }
            if attempt < MAX_SCROLL_ATTEMPTS {
                page.scroll_by(0.0, 400.0).await?;
            }
        }
        Ok(None)
    }

    /// Find the first present label out of `labels`, in order.
    pub async fn find_any(
        &self,
        page: &dyn PageDriver,
        labels: &[String],
    ) -> EngineResult<Option<(String, ClickTarget)>> {
        let frame = self.observe(page).await?;
        Ok(self.locate_any_in(&frame, labels).map(|(label, target)| (label.to_string(), target)))
    }

    /// Screenshot + OCR, gated by the shared circuit breaker: while
    /// the breaker is open, no screenshot is taken and no OCR call is
    /// made.
    async fn recognize_screen(&self, page: &dyn PageDriver) -> EngineResult<Vec<OcrWord>> {
        if self.breaker.admit() == Admission::Rejected {
            return Err(EngineError::CircuitOpen);
        }
        let png = page.screenshot().await?;
        match self.ocr.recognize(&png).await {
            Ok(words) => {
                self.breaker.on_success();
                Ok(words)
            }
            Err(e) => {
                self.breaker.on_failure();
                Err(e)
            }
        }
    }
}

/// Find the best-matching OCR word for `target`: exact, then
/// case-insensitive contains, then fuzzy bigram Dice.
fn best_match<'a>(words: &'a [OcrWord], target: &str) -> Option<(&'a OcrWord, MatchKind)> {
    let target_trim = target.trim();
    if let Some(w) = words.iter().find(|w| w.text.trim() == target_trim) {
        return Some((w, MatchKind::Exact));
    }
    let target_lower = target_trim.to_lowercase();
    if let Some(w) = words.iter().find(|w| w.text.trim().to_lowercase().contains(&target_lower)) {
        return Some((w, MatchKind::Contains));
    }
    words
        .iter()
        .map(|w| (w, strsim::sorensen_dice(&w.text.trim().to_lowercase(), &target_lower)))
        .filter(|(_, score)| *score >= FUZZY_DICE_MIN)
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(w, _)| (w, MatchKind::Fuzzy))
}

/// Confidence reported for a match: exact/contains trust the OCR
/// engine's own confidence; a fuzzy hit is additionally discounted
/// since the text wasn't a true substring.
fn tier_confidence(kind: MatchKind, ocr_confidence: f32) -> f32 {
    match kind {
        MatchKind::Exact | MatchKind::Contains => ocr_confidence,
        MatchKind::Fuzzy => ocr_confidence * 0.85,
    }
}

/// Local OCR backend that shells out to the system `tesseract` binary
/// via `rusty-tesseract`.
#[cfg(feature = "ocr")]
pub struct TesseractOcrProvider;

#[cfg(feature = "ocr")]
#[async_trait]
impl OcrProvider for TesseractOcrProvider {
    async fn recognize(&self, png: &[u8]) -> EngineResult<Vec<OcrWord>> {
        let png = png.to_vec();
        tokio::task::spawn_blocking(move || recognize_blocking(&png))
            .await
            .map_err(|e| EngineError::OcrFailed { message: e.to_string() })?
    }
}

#[cfg(feature = "ocr")]
fn recognize_blocking(png: &[u8]) -> EngineResult<Vec<OcrWord>> {
    let dynamic_image = image::load_from_memory(png)?;
    let img = rusty_tesseract::Image::from_dynamic_image(&dynamic_image)
        .map_err(|e| EngineError::OcrFailed { message: e.to_string() })?;
    let args = rusty_tesseract::Args::default();
    let data = rusty_tesseract::image_to_data(&img, &args)
        .map_err(|e| EngineError::OcrFailed { message: e.to_string() })?;

    Ok(data
        .data
        .into_iter()
        .filter(|d| !d.text.trim().is_empty())
        .map(|d| OcrWord {
            text: d.text,
            confidence: (d.conf as f32 / 100.0).clamp(0.0, 1.0),
            bounding_box: crate::model::BoundingBox {
                x: d.left as f64,
                y: d.top as f64,
                width: d.width as f64,
                height: d.height as f64,
            },
        })
        .collect())
}

/// Remote OCR backend calling an HTTP inference endpoint, for
/// deployments that don't want a local tesseract install.
#[cfg(feature = "remote_ocr")]
pub struct RemoteOcrProvider {
    client: reqwest::Client,
    endpoint: String,
}

#[cfg(feature = "remote_ocr")]
impl RemoteOcrProvider {
    /// Build a provider posting base64 PNGs to `endpoint`.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self { client: reqwest::Client::new(), endpoint: endpoint.into() }
    }
}

#[cfg(feature = "remote_ocr")]
#[derive(serde::Serialize)]
struct RemoteOcrRequest {
    image_base64: String,
}

#[cfg(feature = "remote_ocr")]
#[derive(serde::Deserialize)]
struct RemoteOcrResponse {
    words: Vec<RemoteOcrWord>,
}

#[cfg(feature = "remote_ocr")]
#[derive(serde::Deserialize)]
struct RemoteOcrWord {
    text: String,
    confidence: f32,
    x: f64,
    y: f64,
    width: f64,
    height: f64,
}

#[cfg(feature = "remote_ocr")]
#[async_trait]
impl OcrProvider for RemoteOcrProvider {
    async fn recognize(&self, png: &[u8]) -> EngineResult<Vec<OcrWord>> {
        use base64::Engine;
        let body = RemoteOcrRequest { image_base64: base64::engine::general_purpose::STANDARD.encode(png) };
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| EngineError::OcrFailed { message: e.to_string() })?
            .json::<RemoteOcrResponse>()
            .await
            .map_err(|e| EngineError::OcrFailed { message: e.to_string() })?;
        Ok(resp
            .words
            .into_iter()
            .map(|w| OcrWord {
                text: w.text,
                confidence: w.confidence,
                bounding_box: crate::model::BoundingBox { x: w.x, y: w.y, width: w.width, height: w.height },
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::mock::{MockPage, MockPageDriver};
    use std::sync::Mutex;

    struct FixedOcrProvider(Mutex<Vec<Vec<OcrWord>>>);

    #[async_trait]
    impl OcrProvider for FixedOcrProvider {
        async fn recognize(&self, _png: &[u8]) -> EngineResult<Vec<OcrWord>> {
            let mut frames = self.0.lock().unwrap();
            if frames.len() > 1 {
                Ok(frames.remove(0))
            } else {
                Ok(frames.first().cloned().unwrap_or_default())
            }
        }
    }

    fn word(text: &str, x: f64, y: f64) -> OcrWord {
        OcrWord {
            text: text.into(),
            confidence: 0.95,
            bounding_box: crate::model::BoundingBox { x, y, width: 40.0, height: 20.0 },
        }
    }

    #[tokio::test]
    async fn test_find_text_exact_match() {
        let ocr = FixedOcrProvider(Mutex::new(vec![vec![word("Allow", 100.0, 200.0)]]));
        let engine = VisionEngine::new(Box::new(ocr), 0.6);
        let driver = MockPageDriver::new(crate::model::TabId(0), MockPage::default());

        let target = engine.find_text(&driver, "Allow").await.unwrap().unwrap();
        assert_eq!(target.x, 120.0);
        assert_eq!(target.y, 210.0);
    }

    #[tokio::test]
    async fn test_find_text_fuzzy_match_is_discounted() {
        let ocr = FixedOcrProvider(Mutex::new(vec![vec![word("Alow", 0.0, 0.0)]]));
        let engine = VisionEngine::new(Box::new(ocr), 0.5);
        let target = engine
            .find_text(&MockPageDriver::new(crate::model::TabId(0), MockPage::default()), "Allow")
            .await
            .unwrap()
            .unwrap();
        assert!(target.confidence < 0.95);
    }

    #[tokio::test]
    async fn test_find_any_returns_first_present_label() {
        let ocr = FixedOcrProvider(Mutex::new(vec![vec![word("Keep", 0.0, 0.0)]]));
        let engine = VisionEngine::new(Box::new(ocr), 0.5);
        let driver = MockPageDriver::new(crate::model::TabId(0), MockPage::default());
        let (label, _target) = engine
            .find_any(&driver, &["Allow".into(), "Keep".into()])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(label, "Keep");
    }

    #[test]
    fn test_best_match_prefers_exact_over_contains() {
        let words = vec![word("Allow access", 0.0, 0.0), word("Allow", 10.0, 10.0)];
        let (w, kind) = best_match(&words, "Allow").unwrap();
        assert_eq!(w.text, "Allow");
        assert_eq!(kind, MatchKind::Exact);
    }

    struct FailingOcrProvider;

    #[async_trait]
    impl OcrProvider for FailingOcrProvider {
        async fn recognize(&self, _png: &[u8]) -> EngineResult<Vec<OcrWord>> {
            Err(EngineError::OcrFailed { message: "tesseract not found".into() })
        }
    }

    #[tokio::test]
    async fn test_breaker_opens_after_threshold_and_short_circuits_ocr() {
        let breaker = CircuitBreaker::new(2, Duration::from_secs(60));
        let engine = VisionEngine::with_breaker(Box::new(FailingOcrProvider), 0.5, breaker);
        let driver = MockPageDriver::new(crate::model::TabId(0), MockPage::default());

        assert!(matches!(engine.find_text(&driver, "Allow").await, Err(EngineError::OcrFailed { .. })));
        assert!(matches!(engine.find_text(&driver, "Allow").await, Err(EngineError::OcrFailed { .. })));
        // Breaker is open now; a third call never reaches the OCR provider.
        assert!(matches!(engine.find_text(&driver, "Allow").await, Err(EngineError::CircuitOpen)));
    }
}
