//! Declarative middleware read from TOML, plus the built-in library tier.
//!
//! A middleware file maps feature names to text rules:
//!
//! ```toml
//! [[hover]]
//! prepend = "Hello from middleware! "
//!
//! [[diagnostics]]
//! append = " (team style)"
//! ```

use std::marker::PhantomData;
use std::path::Path;
use std::sync::Arc;

use lsp_types::{CodeAction, CodeLens, Diagnostic, Hover, HoverContents, MarkupContent, MarkupKind};
use serde::Deserialize;
use tracing::{debug, warn};

use super::registry::RegistrationToken;
use super::{AfterRequestHook, HookContext, HookKind, Middleware, Registry};
use crate::error::{ExtensionError, RegistryError};
use crate::features::{
    CodeActionsRequest, CodeLensRequest, DiagnosticsRequest, Feature, FeatureKey, HoverRequest,
};

/// Source stamped on diagnostics by the library tier.
pub const LIBRARY_SOURCE: &str = "lantern";

/// Text added around every user-visible string of a response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TextRule {
    pub prepend: Option<String>,
    pub append: Option<String>,
}

impl TextRule {
    fn apply(&self, text: &mut String) {
        if let Some(prefix) = &self.prepend {
            text.insert_str(0, prefix);
        }
        if let Some(suffix) = &self.append {
            text.push_str(suffix);
        }
    }
}

/// Text rules per feature, in file order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HookTable {
    #[serde(default)]
    pub hover: Vec<TextRule>,
    #[serde(default)]
    pub diagnostics: Vec<TextRule>,
    #[serde(default)]
    pub code_lens: Vec<TextRule>,
    #[serde(default)]
    pub code_actions: Vec<TextRule>,
}

impl HookTable {
    pub fn is_empty(&self) -> bool {
        self.hover.is_empty()
            && self.diagnostics.is_empty()
            && self.code_lens.is_empty()
            && self.code_actions.is_empty()
    }

    /// Fail if any rule targets a feature that does not accept `kind` hooks.
    pub fn check(&self, registry: &Registry, kind: HookKind) -> Result<(), RegistryError> {
        let tables = [
            (FeatureKey::Hover, &self.hover),
            (FeatureKey::Diagnostics, &self.diagnostics),
            (FeatureKey::CodeLens, &self.code_lens),
            (FeatureKey::CodeActions, &self.code_actions),
        ];
        for (feature, rules) in tables {
            if !rules.is_empty() && !registry.accepts(feature, kind) {
                return Err(RegistryError::HookNotAccepted {
                    feature: feature.name(),
                    kind: kind.as_str(),
                });
            }
        }
        Ok(())
    }

    /// Register every rule as a hook of `kind`. Nothing is registered when
    /// [`HookTable::check`] fails.
    pub fn register(
        &self,
        registry: &mut Registry,
        kind: HookKind,
        source: &str,
    ) -> Result<Vec<RegistrationToken>, RegistryError> {
        self.check(registry, kind)?;
        let mut tokens = Vec::new();
        register_rules::<HoverRequest>(&self.hover, registry, kind, source, &mut tokens)?;
        register_rules::<DiagnosticsRequest>(
            &self.diagnostics,
            registry,
            kind,
            source,
            &mut tokens,
        )?;
        register_rules::<CodeLensRequest>(&self.code_lens, registry, kind, source, &mut tokens)?;
        register_rules::<CodeActionsRequest>(
            &self.code_actions,
            registry,
            kind,
            source,
            &mut tokens,
        )?;
        Ok(tokens)
    }
}

fn register_rules<F: TextTarget>(
    rules: &[TextRule],
    registry: &mut Registry,
    kind: HookKind,
    source: &str,
    tokens: &mut Vec<RegistrationToken>,
) -> Result<(), RegistryError> {
    for rule in rules {
        let hook = Arc::new(TextHook::<F>::new(rule.clone()));
        let token = match kind {
            HookKind::Middleware => registry.register_middleware::<F>(source, hook)?,
            HookKind::AfterRequest => registry.register_after_request::<F>(source, hook)?,
        };
        tokens.push(token);
    }
    Ok(())
}

/// A feature whose response carries text a [`TextRule`] can edit.
trait TextTarget: Feature {
    fn edit_text(response: &mut Self::Response, edit: &dyn Fn(&mut String));

    /// Middleware may produce a response where the handler had none.
    fn materialize(response: Self::Response, _context: &HookContext<'_>) -> Self::Response {
        response
    }
}

impl TextTarget for HoverRequest {
    fn edit_text(response: &mut Option<Hover>, edit: &dyn Fn(&mut String)) {
        if let Some(hover) = response {
            let contents = std::mem::replace(&mut hover.contents, HoverContents::Array(Vec::new()));
            let mut markup = into_markup(contents);
            edit(&mut markup.value);
            hover.contents = HoverContents::Markup(markup);
        }
    }

    fn materialize(response: Option<Hover>, context: &HookContext<'_>) -> Option<Hover> {
        Some(response.unwrap_or_else(|| context.empty_hover()))
    }
}

impl TextTarget for DiagnosticsRequest {
    fn edit_text(response: &mut Vec<Diagnostic>, edit: &dyn Fn(&mut String)) {
        for diagnostic in response {
            edit(&mut diagnostic.message);
        }
    }
}

impl TextTarget for CodeLensRequest {
    fn edit_text(response: &mut Vec<CodeLens>, edit: &dyn Fn(&mut String)) {
        for command in response.iter_mut().filter_map(|lens| lens.command.as_mut()) {
            edit(&mut command.title);
        }
    }
}

impl TextTarget for CodeActionsRequest {
    fn edit_text(response: &mut Option<Vec<CodeAction>>, edit: &dyn Fn(&mut String)) {
        for action in response.iter_mut().flatten() {
            edit(&mut action.title);
        }
    }
}

/// Collapse any hover contents into one markdown string.
fn into_markup(contents: HoverContents) -> MarkupContent {
    let value = match contents {
        HoverContents::Markup(markup) => return markup,
        HoverContents::Scalar(marked) => marked_text(&marked),
        HoverContents::Array(items) => items
            .iter()
            .map(marked_text)
            .collect::<Vec<_>>()
            .join("\n\n"),
    };
    MarkupContent {
        kind: MarkupKind::Markdown,
        value,
    }
}

fn marked_text(marked: &lsp_types::MarkedString) -> String {
    match marked {
        lsp_types::MarkedString::String(text) => text.clone(),
        lsp_types::MarkedString::LanguageString(block) => {
            format!("```{}\n{}\n```", block.language, block.value)
        }
    }
}

struct TextHook<F> {
    rule: TextRule,
    _feature: PhantomData<fn() -> F>,
}

impl<F> TextHook<F> {
    fn new(rule: TextRule) -> Self {
        Self {
            rule,
            _feature: PhantomData,
        }
    }
}

impl<F: TextTarget> Middleware<F> for TextHook<F> {
    fn call(&self, response: F::Response, context: &HookContext<'_>) -> F::Response {
        let mut response = F::materialize(response, context);
        F::edit_text(&mut response, &|text| self.rule.apply(text));
        response
    }
}

impl<F: TextTarget> AfterRequestHook<F> for TextHook<F> {
    fn after_request(&self, response: &mut F::Response, _context: &HookContext<'_>) {
        F::edit_text(response, &|text| self.rule.apply(text));
    }
}

/// Fills in `source` on diagnostics that lack one.
struct StampSource;

impl Middleware<DiagnosticsRequest> for StampSource {
    fn call(&self, mut response: Vec<Diagnostic>, _context: &HookContext<'_>) -> Vec<Diagnostic> {
        for diagnostic in &mut response {
            diagnostic
                .source
                .get_or_insert_with(|| LIBRARY_SOURCE.to_string());
        }
        response
    }
}

/// Register the hooks every process starts with.
pub fn register_library_defaults(registry: &mut Registry) -> Result<(), RegistryError> {
    registry.register_middleware::<DiagnosticsRequest>(LIBRARY_SOURCE, Arc::new(StampSource))?;
    Ok(())
}

/// Load every `*.toml` in `dir` as middleware, in file name order.
///
/// A missing directory is not an error. Files that fail to read, parse or
/// register are reported and skipped.
pub fn load_middleware_dir(dir: &Path, registry: &mut Registry, tier: &str) -> Vec<ExtensionError> {
    let mut errors = Vec::new();
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return errors,
        Err(source) => {
            errors.push(ExtensionError::Read {
                path: dir.display().to_string(),
                source,
            });
            return errors;
        }
    };

    let mut files: Vec<_> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.extension().is_some_and(|ext| ext == "toml"))
        .collect();
    files.sort();

    for path in files {
        let shown = path.display().to_string();
        let table = match std::fs::read_to_string(&path) {
            Ok(text) => match toml::from_str::<HookTable>(&text) {
                Ok(table) => table,
                Err(source) => {
                    errors.push(ExtensionError::Parse {
                        path: shown,
                        source,
                    });
                    continue;
                }
            },
            Err(source) => {
                errors.push(ExtensionError::Read {
                    path: shown,
                    source,
                });
                continue;
            }
        };

        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("middleware");
        if table.is_empty() {
            debug!(path = %shown, "Middleware file declares no rules");
            continue;
        }
        let source = format!("{}:{}", tier, stem);
        match table.register(registry, HookKind::Middleware, &source) {
            Ok(tokens) => debug!(path = %shown, hooks = tokens.len(), "Middleware loaded"),
            Err(e) => {
                warn!(path = %shown, error = %e, "Middleware rejected");
                errors.push(ExtensionError::Activation { name: source, source: e });
            }
        }
    }
    errors
}
