use serde::{Deserialize, Serialize};
use std::fmt;

/// The grammar a locator value is written in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocatorType {
    /// CSS selector grammar
    #[default]
    Css,
    /// XPath 1.0 expression
    Xpath,
    /// Raw substring of an element's serialized markup
    #[serde(alias = "match")]
    Textmatch,
    /// No locator (page-level actions)
    None,
}

impl fmt::Display for LocatorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LocatorType::Css => "css",
            LocatorType::Xpath => "xpath",
            LocatorType::Textmatch => "textmatch",
            LocatorType::None => "none",
        };
        f.write_str(name)
    }
}

/// A (type, value) pair identifying zero, one or many elements
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Locator {
    #[serde(rename = "type")]
    pub kind: LocatorType,
    pub value: String,
}

impl Locator {
    pub fn new(kind: LocatorType, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }

    pub fn css(value: impl Into<String>) -> Self {
        Self::new(LocatorType::Css, value)
    }

    pub fn xpath(value: impl Into<String>) -> Self {
        Self::new(LocatorType::Xpath, value)
    }

    pub fn textmatch(value: impl Into<String>) -> Self {
        Self::new(LocatorType::Textmatch, value)
    }

    pub fn is_xpath(&self) -> bool {
        self.kind == LocatorType::Xpath
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.value)
    }
}

impl From<&str> for Locator {
    /// Parses `css:…`, `xpath:…`, `match:…`/`textmatch:…` prefixed strings.
    /// Unprefixed strings starting with `/` or `(` are XPath, everything else is CSS.
    fn from(s: &str) -> Self {
        let s = s.trim();
        let lower = s.to_lowercase();
        match s {
            _ if lower.starts_with("xpath:") => Locator::xpath(s["xpath:".len()..].trim()),
            _ if lower.starts_with("css:") => Locator::css(s["css:".len()..].trim()),
            _ if lower.starts_with("textmatch:") => Locator::textmatch(&s["textmatch:".len()..]),
            _ if lower.starts_with("match:") => Locator::textmatch(&s["match:".len()..]),
            _ if s.starts_with('/') || s.starts_with('(') => Locator::xpath(s),
            _ => Locator::css(s),
        }
    }
}

impl From<String> for Locator {
    fn from(s: String) -> Self {
        Locator::from(s.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefixed_locators() {
        assert_eq!(Locator::from("xpath://a"), Locator::xpath("//a"));
        assert_eq!(Locator::from("css: #main"), Locator::css("#main"));
        assert_eq!(
            Locator::from("match:<b>hi"),
            Locator::textmatch("<b>hi")
        );
    }

    #[test]
    fn test_unprefixed_locators_are_inferred() {
        assert_eq!(Locator::from("//button[1]").kind, LocatorType::Xpath);
        assert_eq!(Locator::from("(//li)[2]").kind, LocatorType::Xpath);
        assert_eq!(Locator::from("div > span").kind, LocatorType::Css);
    }

    #[test]
    fn test_match_is_an_alias_of_textmatch_on_the_wire() {
        let kind: LocatorType = serde_json::from_str("\"match\"").unwrap();
        assert_eq!(kind, LocatorType::Textmatch);
        assert_eq!(serde_json::to_string(&kind).unwrap(), "\"textmatch\"");
    }
}
