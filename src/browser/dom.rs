//! Fixed-shape DOM mutation scripts evaluated on a loaded page.
//!
//! Arguments are embedded as JSON string literals, so selectors and URLs with
//! quotes cannot break out of the script.

use super::{BrowserError, ElementState, Page};

/// Selector matching executable `<script>` tags (JSON-LD and templates survive).
pub const EXECUTABLE_SCRIPTS_SELECTOR: &str =
    r#"script:not([type]),script[type="text/javascript"],script[type="module"]"#;

pub const TIMESTAMP_META: &str = "x-spa-renderer-timestamp";
pub const DEVICE_META: &str = "x-spa-renderer-device";

fn js_string(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

pub(crate) fn remove_elements_script(selector: &str) -> String {
    format!(
        "document.querySelectorAll({}).forEach(el => el.remove());",
        js_string(selector)
    )
}

pub(crate) fn insert_meta_script(name: &str, content: &str) -> String {
    format!(
        "(() => {{ const meta = document.createElement('meta'); meta.name = {}; meta.content = {}; document.head.insertBefore(meta, document.head.firstElementChild); }})();",
        js_string(name),
        js_string(content)
    )
}

pub(crate) fn insert_base_script(href: &str) -> String {
    format!(
        "(() => {{ const base = document.createElement('base'); base.href = {}; document.head.insertBefore(base, document.head.firstElementChild); }})();",
        js_string(href)
    )
}

/// Expression that is `true` when `selector` currently matches anything.
pub fn selector_present_script(selector: &str) -> String {
    format!("document.querySelector({}) !== null", js_string(selector))
}

/// Expression that is `true` once the first match of `selector` is in `state`.
pub fn selector_state_script(selector: &str, state: ElementState) -> String {
    let check = match state {
        ElementState::Attached => "el !== null",
        ElementState::Detached => "el === null",
        ElementState::Visible => "el !== null && visible(el)",
        ElementState::Hidden => "el === null || !visible(el)",
    };
    format!(
        "(() => {{ const visible = (e) => {{ const s = getComputedStyle(e); const r = e.getBoundingClientRect(); return s.visibility !== 'hidden' && s.display !== 'none' && r.width > 0 && r.height > 0; }}; const el = document.querySelector({}); return {check}; }})()",
        js_string(selector)
    )
}

pub async fn remove_elements(page: &dyn Page, selector: &str) -> Result<(), BrowserError> {
    page.evaluate(&remove_elements_script(selector)).await
}

pub async fn insert_meta(page: &dyn Page, name: &str, content: &str) -> Result<(), BrowserError> {
    page.evaluate(&insert_meta_script(name, content)).await
}

pub async fn insert_base(page: &dyn Page, href: &str) -> Result<(), BrowserError> {
    page.evaluate(&insert_base_script(href)).await
}
