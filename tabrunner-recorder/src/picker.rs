use serde::{Deserialize, Serialize};
use tabrunner::selector::xpath_literal;
use tabrunner::{
    Action, AutomationError, Command, Document, ElementHandle, Locator, SelectorEngine,
};

const MAX_XPATH_TEXT: usize = 50;
const MAX_MATCH_LEN: usize = 50;
const PREVIEW_LEN: usize = 30;

/// Which locator form a pick copies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PickMode {
    #[default]
    Css,
    Xpath,
    Match,
    /// Generated locator of the element's parent
    #[serde(alias = "parent-selector")]
    Parent,
}

impl PickMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PickMode::Css => "css",
            PickMode::Xpath => "xpath",
            PickMode::Match => "match",
            PickMode::Parent => "parent",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PickedSelector {
    pub mode: PickMode,
    /// The locator for the requested mode; this is what gets copied.
    pub chosen: Locator,
    /// Generated locator of the element itself
    pub selector: Locator,
    pub xpath: String,
    #[serde(rename = "match")]
    pub snippet: String,
    pub tag_name: String,
    pub text: String,
}

impl PickedSelector {
    /// `inspect` command appended to the recording for this pick.
    pub fn inspect_command(&self) -> Command {
        Command::new(Action::Inspect)
            .with_locator(self.chosen.clone())
            .with_description(format!(
                "Picked {}: {}",
                self.mode.as_str().to_uppercase(),
                self.tag_name
            ))
    }
}

pub fn pick(
    engine: &SelectorEngine,
    doc: &Document,
    el: ElementHandle,
    mode: PickMode,
) -> Result<PickedSelector, AutomationError> {
    let selector = engine.generate(doc, el)?;
    let tag = doc.tag(el).to_string();
    let text = doc.text(el).trim().to_string();

    let xpath = if !text.is_empty() && text.chars().count() < MAX_XPATH_TEXT {
        format!("//{tag}[contains(text(), {})]", xpath_literal(&text))
    } else if let Some(id) = doc.attr(el, "id").filter(|id| !id.is_empty()) {
        format!("//{tag}[@id={}]", xpath_literal(id))
    } else {
        format!("//{tag}")
    };

    let outer = doc.outer_html(el)?;
    let snippet = if outer.chars().count() <= MAX_MATCH_LEN {
        outer
    } else {
        start_tag(&outer).to_string()
    };

    let chosen = match mode {
        PickMode::Css => selector.clone(),
        PickMode::Xpath => Locator::xpath(xpath.clone()),
        PickMode::Match => Locator::textmatch(snippet.clone()),
        PickMode::Parent => match doc.parent(el) {
            Some(parent) => engine.generate(doc, parent)?,
            None => selector.clone(),
        },
    };

    Ok(PickedSelector {
        mode,
        chosen,
        selector,
        xpath,
        snippet,
        tag_name: tag.to_uppercase(),
        text: text.chars().take(PREVIEW_LEN).collect(),
    })
}

fn start_tag(outer: &str) -> &str {
    match outer.find('>') {
        Some(end) => &outer[..=end],
        None => outer,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<html><body><nav id="menu"><a href="/pricing" class="nav-link">Pricing</a></nav>
        <section><p>A paragraph long enough that its markup will not fit in a short textmatch snippet.</p></section></body></html>"#;

    fn handle(doc: &Document, tag: &str) -> ElementHandle {
        doc.handles().find(|h| doc.tag(*h) == tag).unwrap()
    }

    #[test]
    fn test_pick_modes() {
        let doc = Document::parse(PAGE);
        let engine = SelectorEngine::default();
        let a = handle(&doc, "a");

        let css = pick(&engine, &doc, a, PickMode::Css).unwrap();
        assert_eq!(css.chosen, css.selector);
        assert_eq!(css.tag_name, "A");
        assert_eq!(css.text, "Pricing");

        let xpath = pick(&engine, &doc, a, PickMode::Xpath).unwrap();
        assert_eq!(xpath.chosen, Locator::xpath("//a[contains(text(), 'Pricing')]"));
        assert_eq!(engine.resolve(&doc, &xpath.chosen).unwrap(), Some(a));

        let parent = pick(&engine, &doc, a, PickMode::Parent).unwrap();
        assert_eq!(parent.chosen, Locator::css("#menu"));
    }

    #[test]
    fn test_long_markup_is_cut_to_start_tag() {
        let doc = Document::parse(PAGE);
        let engine = SelectorEngine::default();
        let p = handle(&doc, "p");
        let picked = pick(&engine, &doc, p, PickMode::Match).unwrap();
        assert_eq!(picked.snippet, "<p>");
        assert_eq!(picked.chosen, Locator::textmatch("<p>"));
    }

    #[test]
    fn test_inspect_command_describes_pick() {
        let doc = Document::parse(PAGE);
        let engine = SelectorEngine::default();
        let picked = pick(&engine, &doc, handle(&doc, "a"), PickMode::Xpath).unwrap();
        let command = picked.inspect_command();
        assert_eq!(command.action, Action::Inspect);
        assert_eq!(command.description.as_deref(), Some("Picked XPATH: A"));
        assert_eq!(command.locator(), Some(picked.chosen));
    }
}
