//! Page driver abstraction.
//!
//! Strategies and the input dispatcher never hold a raw element
//! reference across an `await` point; they resolve an opaque
//! [`NodeId`] against a [`PageDriver`] each time they need one. This
//! keeps a dropped/reloaded page from leaving evaluators holding a
//! dangling handle, and lets tests substitute [`MockPageDriver`] for a
//! real browser.

use crate::error::{EngineError, EngineResult};
use crate::model::{BoundingBox, FrameLocator, TabId};
use async_trait::async_trait;

/// A single element in the accessibility tree, as seen by the Semantic
/// strategy.
#[derive(Debug, Clone, PartialEq)]
pub struct AxNode {
    /// Resolved DOM node id.
    pub node: NodeIdRef,
    /// Accessibility role (e.g. `"button"`).
    pub role: String,
    /// Accessible name.
    pub name: String,
}

/// A concrete, queryable node on the page, as handed back by a driver query.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeIdRef(pub u64);

/// Snapshot of one candidate element's observable state, used by
/// strategies, actionability polling, and validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ElementSnapshot {
    /// The resolved node.
    pub node: NodeIdRef,
    /// Tag name, lowercased.
    pub tag: String,
    /// Attribute map (`id`, `name`, `placeholder`, `aria-label`, `data-*`, `class`).
    pub attributes: std::collections::HashMap<String, String>,
    /// Visible text content.
    pub text: String,
    /// Current bounding box in viewport coordinates.
    pub bounding_box: BoundingBox,
    /// `display:none`/`visibility:hidden` resolved away.
    pub visible: bool,
    /// Not `disabled`/`aria-disabled=true`.
    pub enabled: bool,
    /// Whether this element is the topmost hit-test result at its centre.
    pub topmost_at_center: bool,
    /// Font is monospace (used by context validation).
    pub monospace_font: bool,
    /// Background is dark (used by context validation).
    pub dark_background: bool,
}

/// Abstraction over a real browser tab (CDP or WebDriver) used by the
/// engine. Implementations must serialize access internally; the
/// coordinator never issues two overlapping mutating calls for the
/// same tab.
#[async_trait]
pub trait PageDriver: Send + Sync {
    /// The tab this driver instance is bound to.
    fn tab(&self) -> TabId;

    /// Current page URL, used as the healing cache's page-pattern key.
    async fn url(&self) -> EngineResult<String>;

    /// Resolve an outer-to-inner iframe chain to a frame-scoped query
    /// root. Returns the depth at which resolution failed, if any.
    async fn resolve_frames(&self, chain: &[FrameLocator]) -> EngineResult<FrameScope>;

    /// Query elements matching a CSS selector within a frame scope.
    async fn query_css(&self, scope: &FrameScope, selector: &str) -> EngineResult<Vec<ElementSnapshot>>;

    /// Query elements matching an attribute exactly (`id`, `name`, or a `data-*` key).
    async fn query_attr(
        &self,
        scope: &FrameScope,
        attr: &str,
        value: &str,
    ) -> EngineResult<Vec<ElementSnapshot>>;

    /// Query elements matching a position-based XPath.
    async fn query_xpath(&self, scope: &FrameScope, xpath: &str) -> EngineResult<Vec<ElementSnapshot>>;

    /// Query the accessibility tree for a role + accessible-name match.
    async fn query_ax(&self, scope: &FrameScope, role: &str, name_contains: &str) -> EngineResult<Vec<AxNode>>;

    /// Query elements by visible text, label-for association, or placeholder.
    async fn query_text(&self, scope: &FrameScope, text: &str) -> EngineResult<Vec<ElementSnapshot>>;

    /// Re-fetch the current snapshot of a previously resolved node.
    async fn snapshot(&self, node: &NodeIdRef) -> EngineResult<ElementSnapshot>;

    /// Render a full-viewport screenshot as PNG bytes.
    async fn screenshot(&self) -> EngineResult<Vec<u8>>;

    /// Current scroll offset, in CSS pixels.
    async fn scroll_offset(&self) -> EngineResult<(f64, f64)>;

    /// Scroll the viewport by the given delta.
    async fn scroll_by(&self, dx: f64, dy: f64) -> EngineResult<()>;

    /// Click a resolved node.
    async fn click_node(&self, node: &NodeIdRef) -> EngineResult<()>;

    /// Set a resolved node's value and emit the events the page expects.
    async fn set_value(&self, node: &NodeIdRef, value: &str) -> EngineResult<()>;

    /// Press Enter on a resolved node (or the page, if unfocused).
    async fn press_enter(&self, node: Option<&NodeIdRef>) -> EngineResult<()>;

    /// Focus a resolved node.
    async fn focus(&self, node: &NodeIdRef) -> EngineResult<()>;

    /// Synthesize a mouse click at a viewport pixel coordinate.
    async fn click_point(&self, x: f64, y: f64) -> EngineResult<()>;

    /// Synthesize a click at a point, then type `text` character by
    /// character with `inter_key_delay_ms` between keystrokes.
    async fn type_at_point(&self, x: f64, y: f64, text: &str, inter_key_delay_ms: u64) -> EngineResult<()>;
}

/// An opaque, driver-specific handle to a resolved frame (or the top
/// document, for an empty iframe chain).
#[derive(Debug, Clone, PartialEq)]
pub struct FrameScope(pub Vec<FrameLocator>);

impl FrameScope {
    /// The top-level document, with no frame nesting.
    pub fn top() -> Self {
        Self(Vec::new())
    }
}

/// Resolve a driver-agnostic iframe chain against a generic "depth
/// check" used by every backend: each backend still does its own
/// frame switching, but shares this fail-fast depth reporting.
pub fn resolve_depth(chain: &[FrameLocator], resolved_up_to: usize) -> EngineResult<()> {
    if resolved_up_to < chain.len() {
        return Err(EngineError::FrameResolutionFailed { depth: resolved_up_to });
    }
    Ok(())
}

#[cfg(any(test, feature = "test-support"))]
pub mod mock {
    //! An in-memory [`PageDriver`] used by unit and scenario tests.
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    /// A fixed page state a [`MockPageDriver`] serves: a flat list of
    /// elements plus an OCR-visible text layout, addressable by
    /// selector/attribute/text without a real DOM.
    #[derive(Debug, Clone, Default)]
    pub struct MockPage {
        /// URL reported by `PageDriver::url`.
        pub url: String,
        /// Elements addressable by CSS selector.
        pub by_css: HashMap<String, Vec<ElementSnapshot>>,
        /// Elements addressable by an exact attribute value (`"id=foo"`, `"name=bar"`).
        pub by_attr: HashMap<String, Vec<ElementSnapshot>>,
        /// Elements addressable by XPath.
        pub by_xpath: HashMap<String, Vec<ElementSnapshot>>,
        /// Elements addressable by accessibility role+name.
        pub by_ax: HashMap<String, Vec<AxNode>>,
        /// Elements addressable by visible/label/placeholder text.
        pub by_text: HashMap<String, Vec<ElementSnapshot>>,
        /// OCR-visible text layout: label -> centroid.
        pub ocr_text: HashMap<String, (f64, f64)>,
    }

    /// A scripted, in-memory driver for tests. Every query is a
    /// hash-map lookup; clicks/types are recorded for assertions.
    pub struct MockPageDriver {
        tab: TabId,
        page: Mutex<MockPage>,
        /// Recorded dispatches, in order, for test assertions.
        pub dispatch_log: Mutex<Vec<String>>,
    }

    impl MockPageDriver {
        /// Build a driver serving a fixed page.
        pub fn new(tab: TabId, page: MockPage) -> Self {
            Self { tab, page: Mutex::new(page), dispatch_log: Mutex::new(Vec::new()) }
        }

        /// Replace the served page state (simulates navigation/drift).
        pub fn set_page(&self, page: MockPage) {
            *self.page.lock() = page;
        }

        /// Snapshot the dispatch log so far.
        pub fn dispatches(&self) -> Vec<String> {
            self.dispatch_log.lock().clone()
        }
    }

    #[async_trait]
    impl PageDriver for MockPageDriver {
        fn tab(&self) -> TabId {
            self.tab
        }

        async fn url(&self) -> EngineResult<String> {
            Ok(self.page.lock().url.clone())
        }

        async fn resolve_frames(&self, chain: &[FrameLocator]) -> EngineResult<FrameScope> {
            // The mock page has no real frame nesting; it always resolves.
            Ok(FrameScope(chain.to_vec()))
        }

        async fn query_css(&self, _scope: &FrameScope, selector: &str) -> EngineResult<Vec<ElementSnapshot>> {
            Ok(self.page.lock().by_css.get(selector).cloned().unwrap_or_default())
        }

        async fn query_attr(
            &self,
            _scope: &FrameScope,
            attr: &str,
            value: &str,
        ) -> EngineResult<Vec<ElementSnapshot>> {
            let key = format!("{attr}={value}");
            Ok(self.page.lock().by_attr.get(&key).cloned().unwrap_or_default())
        }

        async fn query_xpath(&self, _scope: &FrameScope, xpath: &str) -> EngineResult<Vec<ElementSnapshot>> {
            Ok(self.page.lock().by_xpath.get(xpath).cloned().unwrap_or_default())
        }

        async fn query_ax(&self, _scope: &FrameScope, role: &str, name_contains: &str) -> EngineResult<Vec<AxNode>> {
            let key = format!("{role}:{}", name_contains.to_lowercase());
            Ok(self.page.lock().by_ax.get(&key).cloned().unwrap_or_default())
        }

        async fn query_text(&self, _scope: &FrameScope, text: &str) -> EngineResult<Vec<ElementSnapshot>> {
            Ok(self.page.lock().by_text.get(text).cloned().unwrap_or_default())
        }

        async fn snapshot(&self, node: &NodeIdRef) -> EngineResult<ElementSnapshot> {
            let page = self.page.lock();
            page.by_css
                .values()
                .chain(page.by_attr.values())
                .chain(page.by_xpath.values())
                .chain(page.by_text.values())
                .flatten()
                .find(|e| e.node == *node)
                .cloned()
                .ok_or(EngineError::NotFound { step: "snapshot".into() })
        }

        async fn screenshot(&self) -> EngineResult<Vec<u8>> {
            // A 1x1 PNG is enough for tests that stub OCR separately.
            use image::{ImageBuffer, Rgba};
            let img = ImageBuffer::<Rgba<u8>, Vec<u8>>::new(1, 1);
            let mut bytes = Vec::new();
            img.write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)?;
            Ok(bytes)
        }

        async fn scroll_offset(&self) -> EngineResult<(f64, f64)> {
            Ok((0.0, 0.0))
        }

        async fn scroll_by(&self, _dx: f64, _dy: f64) -> EngineResult<()> {
            self.dispatch_log.lock().push("scroll".into());
            Ok(())
        }

        async fn click_node(&self, node: &NodeIdRef) -> EngineResult<()> {
            self.dispatch_log.lock().push(format!("click_node:{}", node.0));
            Ok(())
        }

        async fn set_value(&self, node: &NodeIdRef, value: &str) -> EngineResult<()> {
            self.dispatch_log.lock().push(format!("set_value:{}:{value}", node.0));
            Ok(())
        }

        async fn press_enter(&self, node: Option<&NodeIdRef>) -> EngineResult<()> {
            self.dispatch_log.lock().push(format!("press_enter:{:?}", node.map(|n| n.0)));
            Ok(())
        }

        async fn focus(&self, node: &NodeIdRef) -> EngineResult<()> {
            self.dispatch_log.lock().push(format!("focus:{}", node.0));
            Ok(())
        }

        async fn click_point(&self, x: f64, y: f64) -> EngineResult<()> {
            self.dispatch_log.lock().push(format!("click_point:{x},{y}"));
            Ok(())
        }

        async fn type_at_point(&self, x: f64, y: f64, text: &str, _inter_key_delay_ms: u64) -> EngineResult<()> {
            self.dispatch_log.lock().push(format!("type_at_point:{x},{y}:{text}"));
            Ok(())
        }
    }
}
