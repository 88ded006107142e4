//! WebDriver-backed [`PageDriver`] (§6), for targets where no CDP
//! endpoint is available (Firefox, Safari, or a remote Selenium grid).
//!
//! Queries stash matched elements on `window.__rae_nodes` via the
//! injected description script and later calls index back into it, so
//! the two backends share one caching convention even though thirtyfour
//! has no `window.evaluate::<T>()` helper of its own. Key input resolves
//! a stashed node back to a real `WebElement` (via the script's element
//! reference) and goes through `send_keys`/`ActionChain` rather than a
//! synthetic DOM event.

use crate::driver::{AxNode, ElementSnapshot, FrameScope, NodeIdRef, PageDriver};
use crate::error::{EngineError, EngineResult};
use crate::model::{BoundingBox, FrameLocator, TabId};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use thirtyfour::WebDriver;

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

fn describe_script(array_expr: &str) -> String {
    format!(
        r#"
        return Array.from({array_expr}).map((el, i) => {{
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
        }});
        "#
    )
}

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

/// A thirtyfour-backed [`PageDriver`]. `tab` identifies the WebDriver
/// window handle this instance drives; switching tabs is the caller's
/// responsibility before dispatching to it.
pub struct WebDriverDriver {
    tab: TabId,
    driver: Arc<WebDriver>,
}

impl WebDriverDriver {
    /// Wrap a connected WebDriver session as a driver for `tab`.
    pub fn new(tab: TabId, driver: Arc<WebDriver>) -> Self {
        Self { tab, driver }
    }

    async fn eval_elements(&self, array_expr: &str) -> EngineResult<Vec<ElementSnapshot>> {
        let script = describe_script(array_expr);
        let ret = self
            .driver
            .execute(&script, vec![])
            .await
            .map_err(|e| EngineError::DispatchFailed { message: e.to_string() })?;
        let raw: Vec<RawElement> =
            ret.convert().map_err(|e| EngineError::DispatchFailed { message: e.to_string() })?;
        Ok(raw.into_iter().map(ElementSnapshot::from).collect())
    }

    async fn exec(&self, script: &str) -> EngineResult<()> {
        self.driver
            .execute(script, vec![])
            .await
            .map_err(|e| EngineError::DispatchFailed { message: e.to_string() })?;
        Ok(())
    }

    /// Resolve a stashed `window.__rae_nodes[idx]` entry to a real
    /// [`thirtyfour::WebElement`] handle, so key input can go through
    /// `send_keys` instead of a synthetic DOM event.
    async fn resolve_element(&self, node: &NodeIdRef) -> EngineResult<thirtyfour::WebElement> {
        let ret = self
            .driver
            .execute(&format!("return window.__rae_nodes && window.__rae_nodes[{}];", node.0), vec![])
            .await
            .map_err(|e| EngineError::DispatchFailed { message: e.to_string() })?;
        ret.element().map_err(|e| EngineError::DispatchFailed { message: e.to_string() })
    }
}

#[async_trait]
impl PageDriver for WebDriverDriver {
    fn tab(&self) -> TabId {
        self.tab
    }

    async fn url(&self) -> EngineResult<String> {
        self.driver
            .current_url()
            .await
            .map(|u| u.to_string())
            .map_err(|e| EngineError::DispatchFailed { message: e.to_string() })
    }

    async fn resolve_frames(&self, chain: &[FrameLocator]) -> EngineResult<FrameScope> {
        for (depth, _) in chain.iter().enumerate() {
            let scope = FrameScope(chain[..=depth].to_vec());
            let root = frame_root_expr(&scope);
            let script = format!("return ({root}) !== null && ({root}) !== undefined;");
            let ret = self
                .driver
                .execute(&script, vec![])
                .await
                .map_err(|e| EngineError::DispatchFailed { message: e.to_string() })?;
            let present: bool = ret.convert().unwrap_or(false);
            if !present {
                return Err(EngineError::FrameResolutionFailed { depth });
            }
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
            return Array.from({root}.querySelectorAll('*'))
                .map((el, i) => ({{ i, role: el.getAttribute('role') || el.tagName.toLowerCase(),
                                     name: (el.getAttribute('aria-label') || el.innerText || el.value || '').trim() }}))
                .filter(e => e.role === {role:?} && e.name.toLowerCase().includes({name_lower:?}))
                .map(e => ({{ node: e.i, role: e.role, name: e.name }}));
            "#
        );
        #[derive(Deserialize)]
        struct RawAx {
            node: u64,
            role: String,
            name: String,
        }
        let ret = self
            .driver
            .execute(&script, vec![])
            .await
            .map_err(|e| EngineError::DispatchFailed { message: e.to_string() })?;
        let raw: Vec<RawAx> =
            ret.convert().map_err(|e| EngineError::DispatchFailed { message: e.to_string() })?;
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
        self.driver.screenshot_as_png().await.map_err(|e| EngineError::DispatchFailed { message: e.to_string() })
    }

    async fn scroll_offset(&self) -> EngineResult<(f64, f64)> {
        let ret = self
            .driver
            .execute("return [window.scrollX, window.scrollY];", vec![])
            .await
            .map_err(|e| EngineError::DispatchFailed { message: e.to_string() })?;
        let offset: Option<Vec<f64>> = ret.convert().ok();
        match offset.as_deref() {
            Some([x, y]) => Ok((*x, *y)),
            _ => Ok((0.0, 0.0)),
        }
    }

    async fn scroll_by(&self, dx: f64, dy: f64) -> EngineResult<()> {
        self.exec(&format!("window.scrollBy({dx}, {dy});")).await
    }

    async fn click_node(&self, node: &NodeIdRef) -> EngineResult<()> {
        self.exec(&format!("window.__rae_nodes[{}].click();", node.0)).await
    }

    async fn set_value(&self, node: &NodeIdRef, value: &str) -> EngineResult<()> {
        let script = format!(
            r#"
            const el = window.__rae_nodes[{idx}];
            el.value = {value:?};
            el.dispatchEvent(new Event('input', {{ bubbles: true }}));
            el.dispatchEvent(new Event('change', {{ bubbles: true }}));
            "#,
            idx = node.0
        );
        self.exec(&script).await
    }

    async fn press_enter(&self, node: Option<&NodeIdRef>) -> EngineResult<()> {
        use thirtyfour::Key;
        let element = match node {
            Some(n) => self.resolve_element(n).await?,
            None => self
                .driver
                .switch_to()
                .active_element()
                .await
                .map_err(|e| EngineError::DispatchFailed { message: e.to_string() })?,
        };
        element.send_keys(Key::Enter).await.map_err(|e| EngineError::DispatchFailed { message: e.to_string() })
    }

    async fn focus(&self, node: &NodeIdRef) -> EngineResult<()> {
        self.exec(&format!("window.__rae_nodes[{}].focus();", node.0)).await
    }

    async fn click_point(&self, x: f64, y: f64) -> EngineResult<()> {
        use thirtyfour::action_chain::ActionChain;
        ActionChain::new(&self.driver)
            .move_to(x as i64, y as i64)
            .click()
            .perform()
            .await
            .map_err(|e| EngineError::DispatchFailed { message: e.to_string() })
    }

    async fn type_at_point(&self, x: f64, y: f64, text: &str, inter_key_delay_ms: u64) -> EngineResult<()> {
        use thirtyfour::action_chain::ActionChain;
        let mut chain = ActionChain::new(&self.driver).move_to(x as i64, y as i64).click();
        for ch in text.chars() {
            chain = chain.send_keys(ch.to_string());
            if inter_key_delay_ms > 0 {
                chain = chain.pause(std::time::Duration::from_millis(inter_key_delay_ms));
            }
        }
        chain.perform().await.map_err(|e| EngineError::DispatchFailed { message: e.to_string() })
    }
}
