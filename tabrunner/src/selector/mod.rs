//! Locator resolution and generation.
//!
//! [`SelectorEngine::resolve`] and [`SelectorEngine::resolve_all`] turn a
//! [`Locator`] into element handles of a [`Document`];
//! [`SelectorEngine::generate`] goes the other way and derives a locator that
//! re-resolves to the given element.
//!
//! Generation tries, in order: an acceptable unique identity attribute, a
//! unique text XPath (`normalize-space()` then `contains(text(), …)` for
//! interactive tags), structural attributes, a unique stable class, the text
//! XPath when it still resolves first to the element, short content
//! attributes, and finally a structural `nth-of-type` path anchored at the
//! nearest acceptable id.

mod filter;
mod generate;
mod xpath;

use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::document::{Document, ElementHandle};
use crate::errors::AutomationError;
use crate::locator::{Locator, LocatorType};

pub use filter::{HeuristicTokenFilter, TokenFilter};
pub use generate::{css_string, xpath_literal};
pub use xpath::normalize_space;

#[derive(Clone)]
pub struct SelectorEngine {
    filter: Arc<dyn TokenFilter>,
}

impl fmt::Debug for SelectorEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelectorEngine").finish_non_exhaustive()
    }
}

impl Default for SelectorEngine {
    fn default() -> Self {
        Self::new(Arc::new(HeuristicTokenFilter))
    }
}

impl SelectorEngine {
    pub fn new(filter: Arc<dyn TokenFilter>) -> Self {
        Self { filter }
    }

    pub fn filter(&self) -> &dyn TokenFilter {
        self.filter.as_ref()
    }

    /// First element matching `locator` in document order.
    pub fn resolve(
        &self,
        doc: &Document,
        locator: &Locator,
    ) -> Result<Option<ElementHandle>, AutomationError> {
        Ok(self.resolve_all(doc, locator)?.into_iter().next())
    }

    /// Every element matching `locator`, in document order.
    pub fn resolve_all(
        &self,
        doc: &Document,
        locator: &Locator,
    ) -> Result<Vec<ElementHandle>, AutomationError> {
        match locator.kind {
            LocatorType::Css => doc.select_css(&locator.value),
            LocatorType::Xpath => xpath::select(doc, &locator.value),
            LocatorType::Textmatch => {
                if locator.value.is_empty() {
                    return Err(AutomationError::InvalidLocator(
                        "textmatch locator must not be empty".to_string(),
                    ));
                }
                // Linear in the size of the tree; every element is serialized.
                let mut matched = Vec::new();
                for handle in doc.handles() {
                    if doc.outer_html(handle)?.contains(&locator.value) {
                        matched.push(handle);
                    }
                }
                Ok(matched)
            }
            LocatorType::None => Err(AutomationError::InvalidLocator(
                "locator of type 'none' cannot be resolved".to_string(),
            )),
        }
    }

    /// Derives a locator that resolves back to `el`.
    pub fn generate(&self, doc: &Document, el: ElementHandle) -> Result<Locator, AutomationError> {
        let locator = generate::generate(self, doc, el)?;
        debug!(element = el.0, %locator, "generated locator");
        Ok(locator)
    }

    /// True when `locator` matches `el` and nothing else.
    pub fn is_unique(&self, doc: &Document, locator: &Locator, el: ElementHandle) -> bool {
        matches!(self.resolve_all(doc, locator).as_deref(), Ok([only]) if *only == el)
    }

    pub(crate) fn resolves_first_to(
        &self,
        doc: &Document,
        locator: &Locator,
        el: ElementHandle,
    ) -> bool {
        matches!(self.resolve(doc, locator), Ok(Some(first)) if first == el)
    }
}
