use regex::Regex;
use std::sync::LazyLock;

use super::xpath::normalize_space;
use super::SelectorEngine;
use crate::document::{Document, ElementHandle};
use crate::errors::AutomationError;
use crate::locator::Locator;

const STRUCTURAL_ATTRIBUTES: &[&str] =
    &["name", "placeholder", "data-testid", "data-id", "for", "data-cy"];

const CONTENT_ATTRIBUTES: &[&str] = &["title", "alt", "aria-label", "role"];

const INTERACTIVE_TAGS: &[&str] = &[
    "a", "button", "span", "label", "h1", "h2", "h3", "h4", "h5", "h6",
];

const MIN_TEXT_LEN: usize = 2;
const MAX_TEXT_LEN: usize = 50;
const MAX_CONTENT_ATTR_LEN: usize = 30;

static CSS_IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^-?[A-Za-z_][A-Za-z0-9_-]*$").expect("valid regex"));

pub(super) fn generate(
    engine: &SelectorEngine,
    doc: &Document,
    el: ElementHandle,
) -> Result<Locator, AutomationError> {
    if !doc.contains(el) {
        return Err(AutomationError::ElementNotFound(format!(
            "no element with handle {}",
            el.0
        )));
    }
    let tag = doc.tag(el);
    let name = doc.local_name(el);

    if let Some(locator) = identity(engine, doc, el) {
        if engine.is_unique(doc, &locator, el) {
            return Ok(locator);
        }
    }

    let semantic = semantic_text(doc, el, name);
    if let Some(locator) = &semantic {
        if engine.is_unique(doc, locator, el) {
            return Ok(locator.clone());
        }
        if INTERACTIVE_TAGS.contains(&tag) {
            let text = normalize_space(&doc.text(el));
            let contains = Locator::xpath(format!(
                "//{name}[contains(text(),{})]",
                xpath_literal(&text)
            ));
            if engine.is_unique(doc, &contains, el) {
                return Ok(contains);
            }
        }
    }

    for attr in STRUCTURAL_ATTRIBUTES {
        if let Some(value) = doc.attr(el, attr).filter(|v| !v.is_empty()) {
            let locator = Locator::css(format!("{name}[{attr}={}]", css_string(value)));
            if engine.resolves_first_to(doc, &locator, el) {
                return Ok(locator);
            }
        }
    }

    for class in stable_classes(engine, doc, el) {
        let locator = Locator::css(format!(".{class}"));
        if engine.is_unique(doc, &locator, el) {
            return Ok(locator);
        }
    }

    if let Some(locator) = semantic {
        if engine.resolves_first_to(doc, &locator, el) {
            return Ok(locator);
        }
    }

    for attr in CONTENT_ATTRIBUTES {
        if let Some(value) = doc
            .attr(el, attr)
            .filter(|v| !v.is_empty() && v.chars().count() < MAX_CONTENT_ATTR_LEN)
        {
            let locator = Locator::css(format!("{name}[{attr}={}]", css_string(value)));
            if engine.resolves_first_to(doc, &locator, el) {
                return Ok(locator);
            }
        }
    }

    Ok(structural_path(engine, doc, el))
}

/// `#id` for an acceptable identity attribute, `[id="…"]` when it is not a CSS identifier.
fn identity(engine: &SelectorEngine, doc: &Document, el: ElementHandle) -> Option<Locator> {
    let id = doc.attr(el, "id")?.trim();
    if id.is_empty() || engine.filter().is_generated_id(id) {
        return None;
    }
    if CSS_IDENTIFIER.is_match(id) {
        Some(Locator::css(format!("#{id}")))
    } else {
        Some(Locator::css(format!("[id={}]", css_string(id))))
    }
}

fn semantic_text(doc: &Document, el: ElementHandle, name: &str) -> Option<Locator> {
    let text = normalize_space(&doc.text(el));
    let len = text.chars().count();
    if !(MIN_TEXT_LEN..=MAX_TEXT_LEN).contains(&len) {
        return None;
    }
    Some(Locator::xpath(format!(
        "//{name}[normalize-space()={}]",
        xpath_literal(&text)
    )))
}

fn stable_classes<'d>(
    engine: &SelectorEngine,
    doc: &'d Document,
    el: ElementHandle,
) -> Vec<&'d str> {
    doc.classes(el)
        .into_iter()
        .filter(|c| CSS_IDENTIFIER.is_match(c) && !engine.filter().is_unstable_class(c))
        .collect()
}

fn structural_path(engine: &SelectorEngine, doc: &Document, el: ElementHandle) -> Locator {
    let mut levels = Vec::new();
    let mut current = Some(el);

    while let Some(node) = current {
        let name = doc.local_name(node);
        if let Some(anchor) = identity(engine, doc, node) {
            if engine.is_unique(doc, &anchor, node) {
                // `#id` and `[id="…"]` both compose directly after the tag name
                levels.push(format!("{name}{}", anchor.value));
                break;
            }
        }

        let parent = doc.parent(node);
        let mut level = match parent {
            Some(_) => format!("{name}:nth-of-type({})", doc.nth_of_type(node)),
            None => name.to_string(),
        };
        if let Some(class) = stable_classes(engine, doc, node).first() {
            level.push('.');
            level.push_str(class);
        }
        levels.push(level);
        current = parent;
    }

    levels.reverse();
    Locator::css(levels.join(" > "))
}

/// Quotes `s` as an XPath string literal, falling back to `concat()` when it
/// contains both quote characters.
pub fn xpath_literal(s: &str) -> String {
    if !s.contains('\'') {
        format!("'{s}'")
    } else if !s.contains('"') {
        format!("\"{s}\"")
    } else {
        let parts: Vec<String> = s
            .split('\'')
            .map(|p| format!("'{p}'"))
            .collect();
        format!("concat({})", parts.join(", \"'\", "))
    }
}

/// Double-quoted CSS string with `\` and `"` escaped.
pub fn css_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for ch in s.chars() {
        if ch == '"' || ch == '\\' {
            out.push('\\');
        }
        out.push(ch);
    }
    out.push('"');
    out
}
