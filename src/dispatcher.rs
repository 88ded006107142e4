//! Input Dispatcher (C4).
//!
//! The only component allowed to produce observable side-effects on
//! the page. Operates in element mode (given a resolved node) or
//! coordinate mode (given a raw viewport pixel), per §4.4.

use crate::driver::{ElementSnapshot, NodeIdRef, PageDriver};
use crate::error::{EngineError, EngineResult};
use crate::model::ActionKind;

const DEFAULT_INTER_KEY_DELAY_MS: u64 = 30;
/// Sentinel node id used by strategies (vision, coordinates) that
/// never resolve a real DOM node; dispatch falls through to
/// coordinate mode whenever it sees this.
const COORDINATE_MODE_SENTINEL: u64 = u64::MAX;

/// Dispatch one step's action against a located element.
///
/// If `element.node` is the coordinate-mode sentinel, dispatch goes
/// through `click_point`/`type_at_point` using the element's
/// (degenerate) bounding box as the target; otherwise it goes through
/// the element-mode node methods.
pub async fn dispatch(
    page: &dyn PageDriver,
    action: ActionKind,
    element: &ElementSnapshot,
    value: Option<&str>,
) -> EngineResult<()> {
    if element.node.0 == COORDINATE_MODE_SENTINEL {
        dispatch_coordinate_mode(page, action, element, value).await
    } else {
        dispatch_element_mode(page, action, &element.node, value).await
    }
}

async fn dispatch_element_mode(
    page: &dyn PageDriver,
    action: ActionKind,
    node: &NodeIdRef,
    value: Option<&str>,
) -> EngineResult<()> {
    match action {
        ActionKind::Open => Err(EngineError::DispatchFailed {
            message: "open is dispatched at the recording level, not via an element".into(),
        }),
        ActionKind::Click | ActionKind::Select => {
            page.focus(node).await?;
            page.click_node(node).await
        }
        ActionKind::Input => {
            page.focus(node).await?;
            let value = value.ok_or_else(|| EngineError::DispatchFailed {
                message: "input step is missing its literal value".into(),
            })?;
            page.set_value(node, value).await
        }
        ActionKind::Enter => {
            page.focus(node).await?;
            page.press_enter(Some(node)).await
        }
        ActionKind::ConditionalClick => Err(EngineError::DispatchFailed {
            message: "conditional-click is driven by the Conditional Click Engine, not the dispatcher directly".into(),
        }),
    }
}

async fn dispatch_coordinate_mode(
    page: &dyn PageDriver,
    action: ActionKind,
    element: &ElementSnapshot,
    value: Option<&str>,
) -> EngineResult<()> {
    let (x, y) = element.bounding_box.centroid();
    match action {
        ActionKind::Click | ActionKind::Select => page.click_point(x, y).await,
        ActionKind::Input => {
            let value = value.ok_or_else(|| EngineError::DispatchFailed {
                message: "input step is missing its literal value".into(),
            })?;
            page.type_at_point(x, y, value, DEFAULT_INTER_KEY_DELAY_MS).await
        }
        ActionKind::Enter => {
            page.click_point(x, y).await?;
            page.press_enter(None).await
        }
        ActionKind::Open => Err(EngineError::DispatchFailed {
            message: "open is dispatched at the recording level, not via coordinates".into(),
        }),
        ActionKind::ConditionalClick => Err(EngineError::DispatchFailed {
            message: "conditional-click is driven by the Conditional Click Engine, not the dispatcher directly".into(),
        }),
    }
}
