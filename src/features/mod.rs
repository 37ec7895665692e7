//! Feature request handlers.
//!
//! Each handler computes a base response from the document text, then hands
//! it to the registry so hooks registered for that feature can extend it.
//! The core treats all of them as opaque units of work.

mod code_actions;
mod code_lens;
mod diagnostics;
mod hover;
mod selection_ranges;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::FeatureError;
use crate::extensions::{HookKind, Registry};
use crate::protocol::Request;
use crate::store::{Document, Documents};

pub use code_actions::CodeActionsRequest;
pub use code_lens::CodeLensRequest;
pub use diagnostics::DiagnosticsRequest;
pub use hover::HoverRequest;

/// Identifies a feature in the registry, in `enabledFeatures`, and in
/// middleware files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FeatureKey {
    Hover,
    Diagnostics,
    CodeActions,
    CodeLens,
    SelectionRanges,
}

impl FeatureKey {
    pub const ALL: [FeatureKey; 5] = [
        Self::Hover,
        Self::Diagnostics,
        Self::CodeActions,
        Self::CodeLens,
        Self::SelectionRanges,
    ];

    /// Type-style name used in error messages.
    pub fn name(self) -> &'static str {
        match self {
            Self::Hover => "Hover",
            Self::Diagnostics => "Diagnostics",
            Self::CodeActions => "CodeActions",
            Self::CodeLens => "CodeLens",
            Self::SelectionRanges => "SelectionRanges",
        }
    }

    /// Name used by clients in `initializationOptions.enabledFeatures`.
    pub fn config_name(self) -> &'static str {
        match self {
            Self::Hover => "hover",
            Self::Diagnostics => "diagnostics",
            Self::CodeActions => "codeActions",
            Self::CodeLens => "codeLens",
            Self::SelectionRanges => "selectionRanges",
        }
    }

    pub fn method(self) -> &'static str {
        match self {
            Self::Hover => "textDocument/hover",
            Self::Diagnostics => "textDocument/diagnostic",
            Self::CodeActions => "textDocument/codeAction",
            Self::CodeLens => "textDocument/codeLens",
            Self::SelectionRanges => "textDocument/selectionRange",
        }
    }

    pub fn from_method(method: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|key| key.method() == method)
    }

    pub fn from_config_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|key| key.config_name() == name)
    }

    /// Hook kinds this feature runs. Registering any other kind fails.
    pub fn accepted_hooks(self) -> &'static [HookKind] {
        match self {
            Self::Hover | Self::Diagnostics | Self::CodeLens => {
                &[HookKind::AfterRequest, HookKind::Middleware]
            }
            Self::CodeActions | Self::SelectionRanges => &[],
        }
    }
}

impl std::fmt::Display for FeatureKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A feature whose responses can flow through typed hooks.
pub trait Feature: 'static {
    const KEY: FeatureKey;
    type Response: 'static;
}

/// Record every feature's hook opt-ins in `registry`.
pub fn declare(registry: &mut Registry) {
    for key in FeatureKey::ALL {
        for &kind in key.accepted_hooks() {
            registry.accept(key, kind);
        }
    }
}

/// Run the feature behind `key` for `request`.
pub fn run(
    key: FeatureKey,
    request: &Request,
    documents: &dyn Documents,
    registry: &Registry,
) -> Result<Value, FeatureError> {
    let value = match key {
        FeatureKey::Hover => serde_json::to_value(hover::handle(request, documents, registry)?),
        FeatureKey::Diagnostics => {
            let items = diagnostics::handle(request, documents, registry)?;
            serde_json::to_value(items).map(|items| serde_json::json!({ "kind": "full", "items": items }))
        }
        FeatureKey::CodeActions => serde_json::to_value(code_actions::handle(request, documents)?),
        FeatureKey::CodeLens => {
            serde_json::to_value(code_lens::handle(request, documents, registry)?)
        }
        FeatureKey::SelectionRanges => {
            serde_json::to_value(selection_ranges::handle(request, documents)?)
        }
    };
    value.map_err(|e| FeatureError::Store(e.into()))
}

pub(crate) fn params<P: DeserializeOwned>(request: &Request) -> Result<P, FeatureError> {
    serde_json::from_value(request.params.clone()).map_err(|source| FeatureError::InvalidParams {
        method: request.method.clone(),
        source,
    })
}

pub(crate) fn open_document(
    documents: &dyn Documents,
    uri: &lsp_types::Url,
) -> Result<Document, FeatureError> {
    documents
        .document(uri)?
        .ok_or_else(|| FeatureError::DocumentNotOpen(uri.clone()))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TextDocumentOnly {
    pub text_document: lsp_types::TextDocumentIdentifier,
}
