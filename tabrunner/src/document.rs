//! Parsed snapshot of a page.
//!
//! A [`Document`] owns an element arena built from `scraper`'s parse tree.
//! Elements are addressed by [`ElementHandle`], the element's position in
//! document (pre-)order, which stays stable for re-parses of the same markup.

use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::errors::AutomationError;

/// Position of an element in document order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElementHandle(pub usize);

#[derive(Debug, Clone)]
enum Content {
    Element(usize),
    Text(String),
}

#[derive(Debug, Clone)]
struct NodeData {
    tag: String,
    name: String,
    attrs: Vec<(String, String)>,
    parent: Option<usize>,
    content: Vec<Content>,
}

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source",
    "track", "wbr",
];

const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style"];

pub struct Document {
    html: Html,
    nodes: Vec<NodeData>,
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Document")
            .field("elements", &self.nodes.len())
            .finish()
    }
}

impl Document {
    pub fn parse(markup: &str) -> Self {
        let html = Html::parse_document(markup);
        let mut nodes: Vec<NodeData> = Vec::new();
        let mut positions = HashMap::new();

        for (index, element) in element_refs(&html).enumerate() {
            positions.insert(element.id(), index);
            let parent = element
                .parent()
                .and_then(ElementRef::wrap)
                .and_then(|p| positions.get(&p.id()).copied());

            let attrs = element
                .value()
                .attrs()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect();

            nodes.push(NodeData {
                tag: element.value().name().to_lowercase(),
                name: element.value().name().to_string(),
                attrs,
                parent,
                content: Vec::new(),
            });

        }

        // Second pass: every element now has a position, so children can be
        // recorded in their true order with text interleaved.
        for (index, element) in element_refs(&html).enumerate() {
            let mut content = Vec::new();
            for child in element.children() {
                if let Some(text) = child.value().as_text() {
                    let text: &str = text;
                    content.push(Content::Text(text.to_string()));
                } else if let Some(child_el) = ElementRef::wrap(child) {
                    if let Some(pos) = positions.get(&child_el.id()) {
                        content.push(Content::Element(*pos));
                    }
                }
            }
            nodes[index].content = content;
        }

        Self { html, nodes }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, handle: ElementHandle) -> bool {
        handle.0 < self.nodes.len()
    }

    pub fn handles(&self) -> impl Iterator<Item = ElementHandle> + '_ {
        (0..self.nodes.len()).map(ElementHandle)
    }

    pub fn root(&self) -> Option<ElementHandle> {
        if self.nodes.is_empty() {
            None
        } else {
            Some(ElementHandle(0))
        }
    }

    fn node(&self, handle: ElementHandle) -> Result<&NodeData, AutomationError> {
        self.nodes.get(handle.0).ok_or_else(|| {
            AutomationError::ElementNotFound(format!("no element with handle {}", handle.0))
        })
    }

    /// Lowercase tag name, empty for an unknown handle
    pub fn tag(&self, handle: ElementHandle) -> &str {
        self.nodes
            .get(handle.0)
            .map(|n| n.tag.as_str())
            .unwrap_or("")
    }

    /// Local name as parsed. Foreign elements keep their case (`linearGradient`),
    /// which CSS type selectors match exactly.
    pub fn local_name(&self, handle: ElementHandle) -> &str {
        self.nodes
            .get(handle.0)
            .map(|n| n.name.as_str())
            .unwrap_or("")
    }

    pub fn attr(&self, handle: ElementHandle, name: &str) -> Option<&str> {
        self.nodes.get(handle.0).and_then(|n| {
            n.attrs
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.as_str())
        })
    }

    pub fn attrs(&self, handle: ElementHandle) -> &[(String, String)] {
        self.nodes
            .get(handle.0)
            .map(|n| n.attrs.as_slice())
            .unwrap_or(&[])
    }

    pub fn classes(&self, handle: ElementHandle) -> Vec<&str> {
        self.attr(handle, "class")
            .map(|c| c.split_whitespace().collect())
            .unwrap_or_default()
    }

    pub fn parent(&self, handle: ElementHandle) -> Option<ElementHandle> {
        self.nodes
            .get(handle.0)
            .and_then(|n| n.parent)
            .map(ElementHandle)
    }

    pub fn children(&self, handle: ElementHandle) -> Vec<ElementHandle> {
        self.nodes
            .get(handle.0)
            .map(|n| {
                n.content
                    .iter()
                    .filter_map(|c| match c {
                        Content::Element(i) => Some(ElementHandle(*i)),
                        Content::Text(_) => None,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Strict ancestors, nearest first
    pub fn ancestors(&self, handle: ElementHandle) -> Vec<ElementHandle> {
        let mut out = Vec::new();
        let mut current = self.parent(handle);
        while let Some(h) = current {
            out.push(h);
            current = self.parent(h);
        }
        out
    }

    /// Strict descendants in document order
    pub fn descendants(&self, handle: ElementHandle) -> Vec<ElementHandle> {
        let mut out = Vec::new();
        let mut stack: Vec<ElementHandle> = self.children(handle).into_iter().rev().collect();
        while let Some(h) = stack.pop() {
            out.push(h);
            stack.extend(self.children(h).into_iter().rev());
        }
        out
    }

    /// 1-based position among siblings sharing the same local name
    pub fn nth_of_type(&self, handle: ElementHandle) -> usize {
        let name = self.local_name(handle);
        let siblings = match self.parent(handle) {
            Some(p) => self.children(p),
            None => self.root().into_iter().collect(),
        };
        siblings
            .iter()
            .take_while(|h| **h != handle)
            .filter(|h| self.local_name(**h) == name)
            .count()
            + 1
    }

    /// Text nodes that are direct children of the element
    pub fn own_text(&self, handle: ElementHandle) -> Vec<&str> {
        self.nodes
            .get(handle.0)
            .map(|n| {
                n.content
                    .iter()
                    .filter_map(|c| match c {
                        Content::Text(t) => Some(t.as_str()),
                        Content::Element(_) => None,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Concatenated descendant text (the element's string value)
    pub fn text(&self, handle: ElementHandle) -> String {
        let mut out = String::new();
        self.collect_text(handle.0, &mut out);
        out
    }

    fn collect_text(&self, index: usize, out: &mut String) {
        if let Some(node) = self.nodes.get(index) {
            for c in &node.content {
                match c {
                    Content::Text(t) => out.push_str(t),
                    Content::Element(i) => self.collect_text(*i, out),
                }
            }
        }
    }

    pub fn outer_html(&self, handle: ElementHandle) -> Result<String, AutomationError> {
        self.node(handle)?;
        let mut out = String::new();
        self.serialize(handle.0, &BTreeMap::new(), &mut out);
        Ok(out)
    }

    pub fn inner_html(&self, handle: ElementHandle) -> Result<String, AutomationError> {
        let node = self.node(handle)?;
        let mut out = String::new();
        self.serialize_content(node, &BTreeMap::new(), &mut out);
        Ok(out)
    }

    /// Serializes the whole document, applying attribute overrides.
    /// An override of `None` removes the attribute.
    pub fn to_html_with(
        &self,
        overrides: &BTreeMap<(ElementHandle, String), Option<String>>,
    ) -> String {
        let mut out = String::from("<!DOCTYPE html>");
        if let Some(root) = self.root() {
            self.serialize(root.0, overrides, &mut out);
        }
        out
    }

    fn serialize(
        &self,
        index: usize,
        overrides: &BTreeMap<(ElementHandle, String), Option<String>>,
        out: &mut String,
    ) {
        let node = &self.nodes[index];
        let handle = ElementHandle(index);
        out.push('<');
        out.push_str(&node.name);

        let mut seen = Vec::new();
        for (name, value) in &node.attrs {
            seen.push(name.as_str());
            let value = match overrides.get(&(handle, name.clone())) {
                Some(Some(v)) => v.as_str(),
                Some(None) => continue,
                None => value.as_str(),
            };
            push_attr(out, name, value);
        }
        for ((h, name), value) in overrides.range((handle, String::new())..) {
            if *h != handle {
                break;
            }
            if let Some(value) = value {
                if !seen.contains(&name.as_str()) {
                    push_attr(out, name, value);
                }
            }
        }
        out.push('>');

        if VOID_ELEMENTS.contains(&node.tag.as_str()) {
            return;
        }
        self.serialize_content(node, overrides, out);
        out.push_str("</");
        out.push_str(&node.name);
        out.push('>');
    }

    fn serialize_content(
        &self,
        node: &NodeData,
        overrides: &BTreeMap<(ElementHandle, String), Option<String>>,
        out: &mut String,
    ) {
        let raw = RAW_TEXT_ELEMENTS.contains(&node.tag.as_str());
        for c in &node.content {
            match c {
                Content::Text(t) if raw => out.push_str(t),
                Content::Text(t) => escape_text(t, out),
                Content::Element(i) => self.serialize(*i, overrides, out),
            }
        }
    }

    /// Elements matching a CSS selector, in document order
    pub fn select_css(&self, selector: &str) -> Result<Vec<ElementHandle>, AutomationError> {
        let parsed = Selector::parse(selector)
            .map_err(|e| AutomationError::InvalidLocator(format!("{selector}: {e:?}")))?;
        Ok(element_refs(&self.html)
            .enumerate()
            .filter(|(_, el)| parsed.matches(el))
            .map(|(i, _)| ElementHandle(i))
            .collect())
    }

    pub fn title(&self) -> Option<String> {
        self.handles()
            .find(|h| self.tag(*h) == "title")
            .map(|h| self.text(h).trim().to_string())
    }
}

fn element_refs(html: &Html) -> impl Iterator<Item = ElementRef<'_>> {
    html.root_element()
        .descendants()
        .filter_map(ElementRef::wrap)
}

fn push_attr(out: &mut String, name: &str, value: &str) {
    out.push(' ');
    out.push_str(name);
    out.push_str("=\"");
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
    out.push('"');
}

fn escape_text(text: &str, out: &mut String) {
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(ch),
        }
    }
}
