//! Extension points for feature responses.
//!
//! ```text
//!   handler ──► after-request hooks ──► middleware ──► reply
//!                (mutate in place)      (replace)
//! ```
//!
//! A feature opts in to each hook kind. Hooks come from four tiers, applied in
//! registration order: the built-in library defaults, the user's middleware
//! directory, the project's middleware directory, and extensions found on the
//! search paths. Every process boots its own [`Registry`]; registries are
//! never shared across the bridge.

mod loader;
mod middleware;
mod registry;

use std::ops::Range;

use lsp_types::{Hover, HoverContents, MarkupContent, MarkupKind, Position};

use crate::error::RegistryError;
use crate::features::Feature;
use crate::store::Document;

pub use loader::{BootOptions, boot};
#[cfg(test)]
pub(crate) use middleware::register_library_defaults;
pub use registry::{HookKind, Registry};

/// Transforms a feature's response after the handler and after-request hooks ran.
pub trait Middleware<F: Feature>: Send + Sync {
    fn call(&self, response: F::Response, context: &HookContext<'_>) -> F::Response;
}

/// Adjusts a feature's response in place right after the handler produced it.
pub trait AfterRequestHook<F: Feature>: Send + Sync {
    fn after_request(&self, response: &mut F::Response, context: &HookContext<'_>);
}

/// A bundle of hooks, registered when activated at boot.
pub trait Extension: Send + Sync {
    fn name(&self) -> &str;

    fn activate(&self, registry: &mut Registry) -> Result<(), RegistryError>;
}

/// What a hook gets to look at besides the response.
#[derive(Debug, Clone)]
pub struct HookContext<'a> {
    pub document: &'a Document,
    /// Cursor position for position-based features.
    pub position: Option<Position>,
    /// Byte range of the identifier under the cursor.
    pub target: Option<Range<usize>>,
}

impl<'a> HookContext<'a> {
    pub fn new(document: &'a Document) -> Self {
        Self {
            document,
            position: None,
            target: None,
        }
    }

    pub fn at(document: &'a Document, position: Position) -> Self {
        Self {
            document,
            position: Some(position),
            target: document.word_at(document.offset_at(position)),
        }
    }

    pub fn target_text(&self) -> Option<&'a str> {
        let target = self.target.clone()?;
        self.document.text.get(target)
    }

    /// Range of the target, or an empty range at the cursor.
    pub fn target_range(&self) -> lsp_types::Range {
        match (&self.target, self.position) {
            (Some(target), _) => self.document.lsp_range(target.clone()),
            (None, Some(position)) => lsp_types::Range::new(position, position),
            (None, None) => lsp_types::Range::default(),
        }
    }

    /// A hover with empty markdown over the target, for middleware that
    /// wants to add content where the handler found nothing.
    pub fn empty_hover(&self) -> Hover {
        Hover {
            contents: HoverContents::Markup(MarkupContent {
                kind: MarkupKind::Markdown,
                value: String::new(),
            }),
            range: Some(self.target_range()),
        }
    }
}
