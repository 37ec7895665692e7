use lsp_types::{SelectionRange, SelectionRangeParams};

use super::{open_document, params};
use crate::error::FeatureError;
use crate::protocol::Request;
use crate::store::{Document, Documents};

pub(super) fn handle(
    request: &Request,
    documents: &dyn Documents,
) -> Result<Vec<SelectionRange>, FeatureError> {
    let params: SelectionRangeParams = params(request)?;
    let document = open_document(documents, &params.text_document.uri)?;
    Ok(params
        .positions
        .into_iter()
        .map(|position| expand(&document, position))
        .collect())
}

/// Word, then trimmed line, then the whole document. Steps that would
/// repeat their parent's range are skipped.
fn expand(document: &Document, position: lsp_types::Position) -> SelectionRange {
    let offset = document.offset_at(position);
    let mut steps = Vec::with_capacity(3);

    steps.push(document.lsp_range(0..document.text.len()));

    if let Some(line) = document.line(position.line as usize) {
        let line_start = document.offset_at(lsp_types::Position::new(position.line, 0));
        let leading = line.len() - line.trim_start().len();
        let trimmed = line.trim();
        if !trimmed.is_empty() {
            let start = line_start + leading;
            steps.push(document.lsp_range(start..start + trimmed.len()));
        }
    }

    if let Some(word) = document.word_at(offset) {
        steps.push(document.lsp_range(word));
    }
    steps.dedup();

    let mut steps = steps.into_iter();
    let outermost = steps.next().unwrap_or_default();
    steps.fold(
        SelectionRange {
            range: outermost,
            parent: None,
        },
        |parent, range| SelectionRange {
            range,
            parent: Some(Box::new(parent)),
        },
    )
}
