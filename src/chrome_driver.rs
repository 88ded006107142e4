//! Chrome/CDP-backed [`PageDriver`] (§6), built on the same
//! `chromiumoxide`-derived `chromey` fork the browser module wraps.
//!
//! Every query goes through `Page::evaluate` with a small JS snippet
//! rather than chromey's native element handles, so a single round
//! trip returns every field an [`ElementSnapshot`] needs (geometry,
//! visibility, the topmost hit-test) instead of one CDP call per
//! property.

use crate::driver::{AxNode, ElementSnapshot, FrameScope, NodeIdRef, PageDriver};
use crate::error::{EngineError, EngineResult};
use crate::model::{BoundingBox, FrameLocator, TabId};
use async_trait::async_trait;
use chromiumoxide::page::Page;
use serde::Deserialize;
use std::sync::Arc;

/// Raw shape returned by the element-description JS snippet; `node`
/// is a synthetic id assigned by the snippet's own call, stable only
/// for the lifetime of one query.
#[derive(Debug, Deserialize)]
struct RawElement {
    node: u64,
    tag: String,
    attributes: std::collections::HashMap<String, String>,
    text: String,
    x: f64,
    y: f64,
    width: f64,
    height: f64,
    visible: bool,
    enabled: bool,
    topmost: bool,
    monospace: bool,
    dark: bool,
}

impl From<RawElement> for ElementSnapshot {
    fn from(r: RawElement) -> Self {
        ElementSnapshot {
            node: NodeIdRef(r.node),
            tag: r.tag,
            attributes: r.attributes,
            text: r.text,
            bounding_box: BoundingBox { x: r.x, y: r.y, width: r.width, height: r.height },
            visible: r.visible,
            enabled: r.enabled,
            topmost_at_center: r.topmost,
            monospace_font: r.monospace,
            dark_background: r.dark,
        }
    }
}

/// The JS helper shared by every query: given a `NodeList`-producing
/// expression, returns a `RawElement[]` describing each match.
fn describe_script(selector_expr: &str) -> String {
    format!(
        r#"
        Array.from({selector_expr}).map((el, i) => {{
            const rect = el.getBoundingClientRect();
            const style = window.getComputedStyle(el);
            const cx = rect.left + rect.width / 2;
            const cy = rect.top + rect.height / 2;
            const top = document.elementFromPoint(cx, cy);
            const attrs = {{}};
            for (const a of el.attributes) {{ attrs[a.name] = a.value; }}
            window.__rae_nodes = window.__rae_nodes || {{}};
            window.__rae_nodes[i] = el;
            return {{
                node: i,
                tag: el.tagName.toLowerCase(),
                attributes: attrs,
                text: (el.innerText || el.value || '').trim(),
                x: rect.left, y: rect.top, width: rect.width, height: rect.height,
                visible: style.display !== 'none' && style.visibility !== 'hidden' && rect.width > 0 && rect.height > 0,
                enabled: !el.disabled && el.getAttribute('aria-disabled') !== 'true',
                topmost: top === el || el.contains(top),
                monospace: /mono/i.test(style.fontFamily),
                dark: (() => {{
                    const m = style.backgroundColor.match(/\d+/g);
                    if (!m) return false;
                    const [r, g, b] = m.map(Number);
                    return (0.299 * r + 0.587 * g + 0.114 * b) < 96;
                }})(),
            }};
        }})
        "#
    )
}

/// A chromey-backed [`PageDriver`]. Holds no frame-switching state of
/// its own; each query re-walks `scope`'s iframe chain via
/// `contentDocument` before running its selector.
pub struct ChromeDriver {
    tab: TabId,
    page: Arc<Page>,
}

impl ChromeDriver {
    /// Wrap a connected chromey page as a driver for `tab`.
    pub fn new(tab: TabId, page: Arc<Page>) -> Self {
        Self { tab, page }
    }

    /// Evaluate `array_expr` (a JS expression yielding an array of
    /// elements) and describe each match as a [`ElementSnapshot`].
    async fn eval_elements(&self, array_expr: &str) -> EngineResult<Vec<ElementSnapshot>> {
        let script = describe_script(array_expr);
        let raw: Vec<RawElement> = self
            .page
            .evaluate(script)
            .await
            .map_err(|e| EngineError::DispatchFailed { message: e.to_string() })?
            .into_value()
            .map_err(|e| EngineError::DispatchFailed { message: e.to_string() })?;
        Ok(raw.into_iter().map(ElementSnapshot::from).collect())
    }
}

/// Build the JS expression for the document a frame chain resolves
/// to; `.querySelectorAll`/`.evaluate` calls are appended to this.
fn frame_root_expr(scope: &FrameScope) -> String {
    let mut doc = "document".to_string();
    for locator in &scope.0 {
        let frame_expr = match locator {
            FrameLocator::ById(id) => format!("{doc}.getElementById({id:?})"),
            FrameLocator::ByName(name) => format!("{doc}.getElementsByName({name:?})[0]"),
            FrameLocator::ByIndex(i) => format!("{doc}.getElementsByTagName('iframe')[{i}]"),
        };
        doc = format!("({frame_expr}).contentDocument");
    }
    doc
}

#[async_trait]
impl PageDriver for ChromeDriver {
    fn tab(&self) -> TabId {
        self.tab
    }

    async fn url(&self) -> EngineResult<String> {
        self.page
            .url()
            .await
            .map_err(|e| EngineError::DispatchFailed { message: e.to_string() })?
            .ok_or_else(|| EngineError::DispatchFailed { message: "page has no URL".into() })
    }

    async fn resolve_frames(&self, chain: &[FrameLocator]) -> EngineResult<FrameScope> {
        for (depth, locator) in chain.iter().enumerate() {
            let scope = FrameScope(chain[..=depth].to_vec());
            let root = frame_root_expr(&scope);
            let script = format!("({root}) !== null && ({root}) !== undefined");
            let present: bool = self
                .page
                .evaluate(script)
                .await
                .map_err(|e| EngineError::DispatchFailed { message: e.to_string() })?
                .into_value()
                .unwrap_or(false);
            if !present {
                return Err(EngineError::FrameResolutionFailed { depth });
            }
            let _ = locator;
        }
        Ok(FrameScope(chain.to_vec()))
    }

    async fn query_css(&self, scope: &FrameScope, selector: &str) -> EngineResult<Vec<ElementSnapshot>> {
        let root = frame_root_expr(scope);
        self.eval_elements(&format!("{root}.querySelectorAll({selector:?})")).await
    }

    async fn query_attr(&self, scope: &FrameScope, attr: &str, value: &str) -> EngineResult<Vec<ElementSnapshot>> {
        let root = frame_root_expr(scope);
        let selector = format!("[{attr}={value:?}]");
        self.eval_elements(&format!("{root}.querySelectorAll({selector:?})")).await
    }

    async fn query_xpath(&self, scope: &FrameScope, xpath: &str) -> EngineResult<Vec<ElementSnapshot>> {
        let root = frame_root_expr(scope);
        let array_expr = format!(
            r#"
            (() => {{
                const result = document.evaluate({xpath:?}, {root}, null, XPathResult.ORDERED_NODE_SNAPSHOT_TYPE, null);
                const out = [];
                for (let i = 0; i < result.snapshotLength; i++) out.push(result.snapshotItem(i));
                return out;
            }})()
            "#
        );
        self.eval_elements(&array_expr).await
    }

    async fn query_ax(&self, scope: &FrameScope, role: &str, name_contains: &str) -> EngineResult<Vec<AxNode>> {
        let root = frame_root_expr(scope);
        let name_lower = name_contains.to_lowercase();
        let script = format!(
            r#"
            Array.from({root}.querySelectorAll('*'))
                .map((el, i) => ({{ el, i, role: el.getAttribute('role') || el.tagName.toLowerCase(),
                                     name: (el.getAttribute('aria-label') || el.innerText || el.value || '').trim() }}))
                .filter(e => e.role === {role:?} && e.name.toLowerCase().includes({name_lower:?}))
                .map(e => ({{ node: e.i, role: e.role, name: e.name }}))
            "#
        );
        #[derive(Deserialize)]
        struct RawAx {
            node: u64,
            role: String,
            name: String,
        }
        let raw: Vec<RawAx> = self
            .page
            .evaluate(script)
            .await
            .map_err(|e| EngineError::DispatchFailed { message: e.to_string() })?
            .into_value()
            .map_err(|e| EngineError::DispatchFailed { message: e.to_string() })?;
        Ok(raw.into_iter().map(|r| AxNode { node: NodeIdRef(r.node), role: r.role, name: r.name }).collect())
    }

    async fn query_text(&self, scope: &FrameScope, text: &str) -> EngineResult<Vec<ElementSnapshot>> {
        let root = frame_root_expr(scope);
        let lower = text.to_lowercase();
        let array_expr = format!(
            r#"
            Array.from({root}.querySelectorAll('button, a, input, textarea, select, [role], label'))
                .filter(el => (el.innerText || el.value || el.placeholder || '').toLowerCase().includes({lower:?}))
            "#
        );
        self.eval_elements(&array_expr).await
    }

    async fn snapshot(&self, node: &NodeIdRef) -> EngineResult<ElementSnapshot> {
        let array_expr = format!(
            r#"
            (() => {{
                const el = window.__rae_nodes && window.__rae_nodes[{idx}];
                return el ? [el] : [];
            }})()
            "#,
            idx = node.0
        );
        let snapshots = self.eval_elements(&array_expr).await?;
        snapshots.into_iter().next().ok_or(EngineError::NotFound { step: "snapshot".into() })
    }

    async fn screenshot(&self) -> EngineResult<Vec<u8>> {
        self.page
            .screenshot(chromiumoxide::page::ScreenshotParams::builder().full_page(true).build())
            .await
            .map_err(|e| EngineError::DispatchFailed { message: e.to_string() })
    }

    async fn scroll_offset(&self) -> EngineResult<(f64, f64)> {
        let offset: Option<Vec<f64>> = self
            .page
            .evaluate("[window.scrollX, window.scrollY]")
            .await
            .map_err(|e| EngineError::DispatchFailed { message: e.to_string() })?
            .into_value()
            .ok();
        match offset.as_deref() {
            Some([x, y]) => Ok((*x, *y)),
            _ => Ok((0.0, 0.0)),
        }
    }

    async fn scroll_by(&self, dx: f64, dy: f64) -> EngineResult<()> {
        self.page
            .evaluate(format!("window.scrollBy({dx}, {dy})"))
            .await
            .map_err(|e| EngineError::DispatchFailed { message: e.to_string() })?;
        Ok(())
    }

    async fn click_node(&self, node: &NodeIdRef) -> EngineResult<()> {
        let script = format!("window.__rae_nodes[{}].click()", node.0);
        self.page.evaluate(script).await.map_err(|e| EngineError::DispatchFailed { message: e.to_string() })?;
        Ok(())
    }

    async fn set_value(&self, node: &NodeIdRef, value: &str) -> EngineResult<()> {
        let script = format!(
            r#"
            (() => {{
                const el = window.__rae_nodes[{idx}];
                el.value = {value:?};
                el.dispatchEvent(new Event('input', {{ bubbles: true }}));
                el.dispatchEvent(new Event('change', {{ bubbles: true }}));
            }})()
            "#,
            idx = node.0
        );
        self.page.evaluate(script).await.map_err(|e| EngineError::DispatchFailed { message: e.to_string() })?;
        Ok(())
    }

    async fn press_enter(&self, node: Option<&NodeIdRef>) -> EngineResult<()> {
        if let Some(n) = node {
            self.focus(n).await?;
        }
        self.page
            .press_key("Enter")
            .await
            .map_err(|e| EngineError::DispatchFailed { message: e.to_string() })?;
        Ok(())
    }

    async fn focus(&self, node: &NodeIdRef) -> EngineResult<()> {
        let script = format!("window.__rae_nodes[{}].focus()", node.0);
        self.page.evaluate(script).await.map_err(|e| EngineError::DispatchFailed { message: e.to_string() })?;
        Ok(())
    }

    async fn click_point(&self, x: f64, y: f64) -> EngineResult<()> {
        use chromiumoxide::layout::Point;
        self.page
            .click_smooth(Point::new(x, y))
            .await
            .map_err(|e| EngineError::DispatchFailed { message: e.to_string() })?;
        Ok(())
    }

    async fn type_at_point(&self, x: f64, y: f64, text: &str, inter_key_delay_ms: u64) -> EngineResult<()> {
        self.click_point(x, y).await?;
        for ch in text.chars() {
            self.page
                .type_str(ch.to_string())
                .await
                .map_err(|e| EngineError::DispatchFailed { message: e.to_string() })?;
            tokio::time::sleep(std::time::Duration::from_millis(inter_key_delay_ms)).await;
        }
        Ok(())
    }
}
