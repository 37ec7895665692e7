use lsp_types::{Hover, HoverContents, HoverParams, MarkupContent, MarkupKind};

use super::{Feature, FeatureKey, open_document, params};
use crate::error::FeatureError;
use crate::extensions::{HookContext, Registry};
use crate::protocol::Request;
use crate::store::{Document, Documents};

pub struct HoverRequest;

impl Feature for HoverRequest {
    const KEY: FeatureKey = FeatureKey::Hover;
    type Response = Option<Hover>;
}

pub(super) fn handle(
    request: &Request,
    documents: &dyn Documents,
    registry: &Registry,
) -> Result<Option<Hover>, FeatureError> {
    let params: HoverParams = params(request)?;
    let position = params.text_document_position_params;
    let document = open_document(documents, &position.text_document.uri)?;
    let context = HookContext::at(&document, position.position);

    let base = context.target_text().map(|word| Hover {
        contents: HoverContents::Markup(MarkupContent {
            kind: MarkupKind::Markdown,
            value: describe(&document, word),
        }),
        range: Some(context.target_range()),
    });
    Ok(registry.apply::<HoverRequest>(base, &context))
}

fn describe(document: &Document, word: &str) -> String {
    let count = occurrences(&document.text, word);
    let noun = if count == 1 { "occurrence" } else { "occurrences" };
    format!("`{}`\n\n{} {} in this file", word, count, noun)
}

/// Whole-word occurrences of `word` in `text`.
fn occurrences(text: &str, word: &str) -> usize {
    let is_word = |c: char| c.is_alphanumeric() || c == '_';
    text.match_indices(word)
        .filter(|&(start, _)| {
            let before = text[..start].chars().next_back();
            let after = text[start + word.len()..].chars().next();
            !before.is_some_and(is_word) && !after.is_some_and(is_word)
        })
        .count()
}
