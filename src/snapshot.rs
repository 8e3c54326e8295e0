//! A frozen view of the listing page that every discovery strategy reads.
//!
//! Live sessions fill it from an in-page script (so computed styles such as
//! `cursor: pointer` are visible); static drivers and saved pages fall back to
//! parsing the markup.

use scraper::{Html, Selector};
use serde::Deserialize;
use std::sync::LazyLock;
use tracing::{debug, warn};

use crate::driver::PageDriver;

/// Longest element text carried into the snapshot.
const MAX_ELEMENT_TEXT: usize = 2000;

pub const SNAPSHOT_SCRIPT: &str = r#"(() => {
  const MAX_TEXT = 2000;
  const pathOf = (el) => {
    const parts = [];
    let node = el;
    while (node && node.nodeType === 1 && node !== document.documentElement) {
      if (node.id) { parts.unshift('#' + CSS.escape(node.id)); break; }
      let index = 1;
      let sib = node;
      while ((sib = sib.previousElementSibling)) { if (sib.tagName === node.tagName) index++; }
      parts.unshift(node.tagName.toLowerCase() + ':nth-of-type(' + index + ')');
      node = node.parentElement;
    }
    return parts.join(' > ');
  };
  const elements = Array.from(document.querySelectorAll('body *')).map((el) => {
    const text = (el.textContent || '').trim();
    return {
      tag: el.tagName.toLowerCase(),
      id: typeof el.id === 'string' ? el.id : '',
      text: text.slice(0, MAX_TEXT),
      textLen: text.length,
      href: el.getAttribute('href') || '',
      onclick: el.getAttribute('onclick') || '',
      hasClickHandler: typeof el.onclick === 'function',
      cursorPointer: getComputedStyle(el).cursor === 'pointer',
      role: el.getAttribute('role') || '',
      selector: pathOf(el),
    };
  });
  const scripts = Array.from(document.querySelectorAll('script')).map((s) => s.textContent || '');
  return JSON.stringify({ elements, scripts });
})()"#;

static BODY_DESCENDANTS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("body *").expect("valid selector"));
static SCRIPTS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("script").expect("valid selector"));

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ElementInfo {
    pub tag: String,
    pub id: String,
    pub text: String,
    /// Length of the full trimmed text, which `text` may truncate
    pub text_len: usize,
    pub href: String,
    pub onclick: String,
    pub has_click_handler: bool,
    pub cursor_pointer: bool,
    pub role: String,
    pub selector: String,
}

impl ElementInfo {
    pub fn is_interactive(&self) -> bool {
        matches!(self.tag.as_str(), "a" | "button")
            || !self.onclick.is_empty()
            || self.has_click_handler
            || !self.href.is_empty()
            || self.cursor_pointer
            || self.role.eq_ignore_ascii_case("button")
    }
}

#[derive(Debug, Deserialize)]
struct LiveDom {
    elements: Vec<ElementInfo>,
    scripts: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PageSnapshot {
    pub url: String,
    pub html: Option<String>,
    pub elements: Vec<ElementInfo>,
    /// `None` when script bodies could not be read at all
    pub scripts: Option<Vec<String>>,
}

impl PageSnapshot {
    pub fn capture(driver: &mut dyn PageDriver) -> Self {
        let url = driver.current_url();
        let html = match driver.body_html() {
            Ok(html) => Some(html),
            Err(e) => {
                warn!("could not read page markup: {}", e);
                None
            }
        };

        if driver.is_interactive() {
            match driver.evaluate(SNAPSHOT_SCRIPT).map(parse_live_dom) {
                Ok(Some(dom)) => {
                    debug!("captured {} live elements", dom.elements.len());
                    return Self {
                        url,
                        html,
                        elements: dom.elements,
                        scripts: Some(dom.scripts),
                    };
                }
                Ok(None) => warn!("live DOM snapshot was not valid JSON, parsing markup instead"),
                Err(e) => warn!("live DOM snapshot failed ({}), parsing markup instead", e),
            }
        }

        match html {
            Some(html) => Self::from_html(&url, &html),
            None => Self {
                url,
                ..Self::default()
            },
        }
    }

    pub fn from_html(url: &str, html: &str) -> Self {
        let document = Html::parse_document(html);
        let elements = document.select(&BODY_DESCENDANTS).map(element_info).collect();
        let scripts = document
            .select(&SCRIPTS)
            .map(|s| s.text().collect::<String>())
            .collect();

        Self {
            url: url.to_string(),
            html: Some(html.to_string()),
            elements,
            scripts: Some(scripts),
        }
    }
}

fn parse_live_dom(value: serde_json::Value) -> Option<LiveDom> {
    match value {
        serde_json::Value::String(raw) => serde_json::from_str(&raw).ok(),
        other => serde_json::from_value(other).ok(),
    }
}

fn element_info(el: scraper::ElementRef<'_>) -> ElementInfo {
    let attr = |name: &str| el.value().attr(name).unwrap_or("").to_string();
    let full_text = el.text().collect::<String>();
    let text = full_text.trim();
    let style = attr("style").replace(' ', "").to_lowercase();

    ElementInfo {
        tag: el.value().name().to_lowercase(),
        id: attr("id"),
        text: text.chars().take(MAX_ELEMENT_TEXT).collect(),
        text_len: text.chars().count(),
        href: attr("href"),
        onclick: attr("onclick"),
        has_click_handler: false,
        cursor_pointer: style.contains("cursor:pointer"),
        role: attr("role"),
        selector: css_path(el),
    }
}

/// `#id` when available, otherwise an `:nth-of-type` chain up to the nearest
/// ancestor with an id.
fn css_path(el: scraper::ElementRef<'_>) -> String {
    let mut parts = Vec::new();
    let mut node = Some(el);

    while let Some(current) = node {
        let name = current.value().name();
        if name == "html" {
            break;
        }
        if let Some(id) = current.value().id() {
            parts.push(format!("#{}", id));
            break;
        }
        let index = current
            .prev_siblings()
            .filter_map(scraper::ElementRef::wrap)
            .filter(|sib| sib.value().name() == name)
            .count()
            + 1;
        parts.push(format!("{}:nth-of-type({})", name, index));
        node = current.parent().and_then(scraper::ElementRef::wrap);
    }

    parts.reverse();
    parts.join(" > ")
}
