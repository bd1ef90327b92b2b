use std::sync::Arc;

use tabrunner::selector::{normalize_space, SelectorEngine, TokenFilter};
use tabrunner::{AutomationError, Document, ElementHandle, Locator, LocatorType};

const ORDERS_PAGE: &str = r#"<html><head><title>Orders</title></head><body>
<header id="top" class="site-header"><a href="/">Home</a><a href="/orders">Orders</a></header>
<main>
  <form id="xKcayf" class="jss123">
    <label for="email">Email</label>
    <input name="email" placeholder="you@example.com">
    <input type="checkbox" class="active">
    <button type="submit" class="btn btn-primary">Send</button>
    <button type="button" class="btn">Send</button>
  </form>
  <ul class="list">
    <li>Item</li><li>Item</li><li><span>It's "quoted"</span></li>
  </ul>
  <img alt="Logo" src="/logo.png">
  <div><div>Same</div></div>
  <p></p><p></p>
</main></body></html>"#;

const SVG_PAGE: &str = r#"<html><body>
<svg><defs><linearGradient><stop offset="0"></stop></linearGradient><clipPath><rect></rect></clipPath></defs></svg>
<svg viewBox="0 0 10 10"><linearGradient></linearGradient><foreignObject><p>Inside</p></foreignObject></svg>
</body></html>"#;

fn find(doc: &Document, css: &str) -> ElementHandle {
    let engine = SelectorEngine::default();
    engine
        .resolve(doc, &Locator::css(css))
        .expect("valid selector")
        .unwrap_or_else(|| panic!("nothing matches {css}"))
}

#[test]
fn generated_locators_resolve_back_to_their_element() {
    let engine = SelectorEngine::default();

    for page in [ORDERS_PAGE, SVG_PAGE] {
        let doc = Document::parse(page);
        for handle in doc.handles() {
            let locator = engine.generate(&doc, handle).expect("generate");
            let resolved = engine.resolve(&doc, &locator).expect("resolve");
            assert_eq!(
                resolved,
                Some(handle),
                "{locator} generated for <{}> resolved elsewhere",
                doc.local_name(handle)
            );
        }
    }
}

#[test]
fn foreign_elements_keep_their_case_in_structural_paths() {
    let doc = Document::parse(SVG_PAGE);
    let engine = SelectorEngine::default();
    let gradient = doc
        .handles()
        .filter(|h| doc.tag(*h) == "lineargradient")
        .nth(1)
        .expect("second gradient");

    assert_eq!(doc.local_name(gradient), "linearGradient");
    let locator = engine.generate(&doc, gradient).unwrap();
    assert_eq!(
        locator,
        Locator::css("html > body:nth-of-type(1) > svg:nth-of-type(2) > linearGradient:nth-of-type(1)")
    );
    assert_eq!(engine.resolve(&doc, &locator).unwrap(), Some(gradient));
}

#[test]
fn hashed_ids_and_classes_are_never_used() {
    let doc = Document::parse(ORDERS_PAGE);
    let engine = SelectorEngine::default();

    for handle in doc.handles() {
        let locator = engine.generate(&doc, handle).unwrap();
        assert!(!locator.value.contains("xKcayf"), "{locator}");
        assert!(!locator.value.contains("jss123"), "{locator}");
        assert!(!locator.value.contains(".active"), "{locator}");
    }
}

#[test]
fn unique_identity_attribute_wins() {
    let doc = Document::parse(ORDERS_PAGE);
    let engine = SelectorEngine::default();
    let header = find(&doc, "header");
    assert_eq!(engine.generate(&doc, header).unwrap(), Locator::css("#top"));
}

#[test]
fn unique_text_produces_semantic_xpath() {
    let doc = Document::parse(ORDERS_PAGE);
    let engine = SelectorEngine::default();
    let orders = find(&doc, "a[href='/orders']");
    assert_eq!(
        engine.generate(&doc, orders).unwrap(),
        Locator::xpath("//a[normalize-space()='Orders']")
    );

    let quoted = find(&doc, "span");
    let locator = engine.generate(&doc, quoted).unwrap();
    assert!(locator.value.starts_with("//span[normalize-space()=concat("));
}

#[test]
fn structural_attribute_class_and_content_attribute_rules() {
    let doc = Document::parse(ORDERS_PAGE);
    let engine = SelectorEngine::default();

    let email = find(&doc, "input[name]");
    assert_eq!(
        engine.generate(&doc, email).unwrap(),
        Locator::css("input[name=\"email\"]")
    );

    let primary = find(&doc, "button[type=submit]");
    assert_eq!(
        engine.generate(&doc, primary).unwrap(),
        Locator::css(".btn-primary")
    );

    let logo = find(&doc, "img");
    assert_eq!(
        engine.generate(&doc, logo).unwrap(),
        Locator::css("img[alt=\"Logo\"]")
    );
}

#[test]
fn ambiguous_elements_fall_back_to_structural_path() {
    let doc = Document::parse(ORDERS_PAGE);
    let engine = SelectorEngine::default();

    let second_button = find(&doc, "button[type=button]");
    let locator = engine.generate(&doc, second_button).unwrap();
    assert_eq!(locator.kind, LocatorType::Css);
    assert!(locator.value.contains("button:nth-of-type(2)"), "{locator}");
    assert!(locator.value.starts_with("html > body"), "{locator}");

    let second_p = find(&doc, "p + p");
    let locator = engine.generate(&doc, second_p).unwrap();
    assert!(locator.value.ends_with("p:nth-of-type(2)"), "{locator}");
}

#[test]
fn structural_path_stops_at_an_acceptable_id() {
    let doc = Document::parse(
        r#"<html><body><section id="results"><div><b></b></div><div><b></b></div></section></body></html>"#,
    );
    let engine = SelectorEngine::default();
    let second_b = engine
        .resolve_all(&doc, &Locator::css("b"))
        .unwrap()
        .pop()
        .unwrap();
    assert_eq!(
        engine.generate(&doc, second_b).unwrap(),
        Locator::css("section#results > div:nth-of-type(2) > b:nth-of-type(1)")
    );
}

#[test]
fn resolve_supports_every_locator_type() {
    let doc = Document::parse(ORDERS_PAGE);
    let engine = SelectorEngine::default();

    assert_eq!(
        engine.resolve_all(&doc, &Locator::css("li")).unwrap().len(),
        3
    );
    assert_eq!(
        engine
            .resolve_all(&doc, &Locator::xpath("//li[normalize-space()='Item']"))
            .unwrap()
            .len(),
        2
    );

    // every ancestor's markup contains the snippet too, so the element itself comes last
    let matched = engine
        .resolve_all(&doc, &Locator::textmatch("placeholder=\"you@example.com\""))
        .unwrap();
    assert_eq!(matched.last(), Some(&find(&doc, "input[name]")));
    assert_eq!(
        engine
            .resolve(&doc, &Locator::textmatch("you@example.com"))
            .unwrap(),
        Some(ElementHandle(0))
    );

    assert_eq!(
        engine
            .resolve(&doc, &Locator::css(".does-not-exist"))
            .unwrap(),
        None
    );
}

#[test]
fn malformed_locators_are_errors_not_misses() {
    let doc = Document::parse(ORDERS_PAGE);
    let engine = SelectorEngine::default();
    for locator in [
        Locator::css("div[[["),
        Locator::xpath("//div[@id="),
        Locator::textmatch(""),
        Locator::new(LocatorType::None, "x"),
    ] {
        assert!(
            matches!(
                engine.resolve(&doc, &locator),
                Err(AutomationError::InvalidLocator(_))
            ),
            "{locator} should be rejected"
        );
    }
}

struct RejectEverything;

impl TokenFilter for RejectEverything {
    fn is_generated_id(&self, _id: &str) -> bool {
        true
    }

    fn is_unstable_class(&self, _class: &str) -> bool {
        true
    }
}

#[test]
fn token_filter_is_pluggable() {
    let doc = Document::parse(ORDERS_PAGE);
    let engine = SelectorEngine::new(Arc::new(RejectEverything));
    let header = find(&doc, "header");
    let locator = engine.generate(&doc, header).unwrap();
    assert_ne!(locator, Locator::css("#top"));
    assert!(!locator.value.contains("site-header"));
    assert_eq!(engine.resolve(&doc, &locator).unwrap(), Some(header));
}

#[test]
fn normalize_space_is_available_to_callers() {
    assert_eq!(normalize_space("  About \n\t us  "), "About us");
    assert_eq!(normalize_space(""), "");
}
