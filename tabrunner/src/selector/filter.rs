use regex::Regex;
use std::sync::LazyLock;

/// Decides which id and class tokens are stable enough to appear in a generated locator.
pub trait TokenFilter: Send + Sync {
    /// True when the id looks machine-generated and is unlikely to survive a reload.
    fn is_generated_id(&self, id: &str) -> bool;

    /// True when the class looks like a state marker or a build-time hash.
    fn is_unstable_class(&self, class: &str) -> bool;
}

static LEADING_MACHINE_CHAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9_:]").expect("valid regex"));

static SHORT_ALNUM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9]{4,10}$").expect("valid regex"));

static INTERNAL_UPPER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^.+[A-Z]").expect("valid regex"));

static CSS_MODULE_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:__|--|_|-)[A-Za-z0-9]{5,}$").expect("valid regex"));

static CSS_MODULE_SUFFIX_HAS_DIGIT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:__|--|_|-)[A-Za-z]*[0-9][A-Za-z0-9]*$").expect("valid regex"));

const STATE_SUBSTRINGS: &[&str] = &[
    "active", "hover", "focus", "selected", "checked", "disabled", "expanded", "collapsed",
];

const STATE_EXACT: &[&str] = &["open", "visible", "hidden", "current", "show", "loading"];

const STATE_PREFIXES: &[&str] = &["is-", "has-"];

const FRAMEWORK_PREFIXES: &[&str] = &[
    "ng-",
    "css-",
    "jsx-",
    "sc-",
    "svelte-",
    "jss",
    "styled-",
    "_ngcontent",
];

/// Regex heuristics for generated ids and unstable classes.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicTokenFilter;

impl HeuristicTokenFilter {
    fn looks_hashed(token: &str) -> bool {
        if !SHORT_ALNUM.is_match(token) {
            return false;
        }
        let has_lower = token.chars().any(|c| c.is_ascii_lowercase());
        let has_alpha = token.chars().any(|c| c.is_ascii_alphabetic());
        let has_digit = token.chars().any(|c| c.is_ascii_digit());
        (has_lower && INTERNAL_UPPER.is_match(token)) || (has_alpha && has_digit)
    }
}

impl TokenFilter for HeuristicTokenFilter {
    fn is_generated_id(&self, id: &str) -> bool {
        id.is_empty() || LEADING_MACHINE_CHAR.is_match(id) || Self::looks_hashed(id)
    }

    fn is_unstable_class(&self, class: &str) -> bool {
        let lower = class.to_lowercase();
        if STATE_SUBSTRINGS.iter().any(|s| lower.contains(s))
            || STATE_EXACT.contains(&lower.as_str())
            || STATE_PREFIXES.iter().any(|p| lower.starts_with(p))
        {
            return true;
        }
        if FRAMEWORK_PREFIXES.iter().any(|p| lower.starts_with(p)) {
            return true;
        }
        Self::looks_hashed(class)
            || (CSS_MODULE_SUFFIX.is_match(class) && CSS_MODULE_SUFFIX_HAS_DIGIT.is_match(class))
    }
}
