use lsp_types::{
    CodeAction, CodeActionKind, Diagnostic, DiagnosticSeverity, DocumentChanges, NumberOrString,
    OneOf, OptionalVersionedTextDocumentIdentifier, TextDocumentEdit, TextEdit, WorkspaceEdit,
};
use serde_json::json;

use super::{Feature, FeatureKey, TextDocumentOnly, open_document, params};
use crate::error::FeatureError;
use crate::extensions::{HookContext, Registry};
use crate::protocol::Request;
use crate::store::{Document, Documents};

pub struct DiagnosticsRequest;

impl Feature for DiagnosticsRequest {
    const KEY: FeatureKey = FeatureKey::Diagnostics;
    type Response = Vec<Diagnostic>;
}

pub(super) fn handle(
    request: &Request,
    documents: &dyn Documents,
    registry: &Registry,
) -> Result<Vec<Diagnostic>, FeatureError> {
    let params: TextDocumentOnly = params(request)?;
    let document = open_document(documents, &params.text_document.uri)?;
    let context = HookContext::new(&document);
    Ok(registry.apply::<DiagnosticsRequest>(lint(&document), &context))
}

/// Line-based style checks over the whole document.
fn lint(document: &Document) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    let mut offset = 0;
    for index in 0..document.line_count() {
        let Some(line) = document.line(index) else {
            break;
        };

        let trimmed = line.trim_end();
        if trimmed.len() < line.len() {
            let range = document.lsp_range(offset + trimmed.len()..offset + line.len());
            diagnostics.push(trailing_whitespace(document, range));
        }

        let indent = &line[..line.len() - line.trim_start().len()];
        if indent.contains('\t') {
            let range = document.lsp_range(offset..offset + indent.len());
            let mut diagnostic = Diagnostic::new(
                range,
                Some(DiagnosticSeverity::HINT),
                Some(NumberOrString::String("tab-indentation".into())),
                None,
                "Indentation uses tabs".into(),
                None,
                None,
            );
            diagnostic.data = Some(json!({ "correctable": false }));
            diagnostics.push(diagnostic);
        }

        offset += document
            .text
            .get(offset..)
            .and_then(|rest| rest.find('\n'))
            .map_or(line.len(), |newline| newline + 1);
    }
    diagnostics
}

fn trailing_whitespace(document: &Document, range: lsp_types::Range) -> Diagnostic {
    let fix = CodeAction {
        title: "Remove trailing whitespace".into(),
        kind: Some(CodeActionKind::QUICKFIX),
        edit: Some(WorkspaceEdit {
            document_changes: Some(DocumentChanges::Edits(vec![TextDocumentEdit {
                text_document: OptionalVersionedTextDocumentIdentifier {
                    uri: document.uri.clone(),
                    version: None,
                },
                edits: vec![OneOf::Left(TextEdit::new(range, String::new()))],
            }])),
            ..Default::default()
        }),
        is_preferred: Some(true),
        ..Default::default()
    };

    let mut diagnostic = Diagnostic::new(
        range,
        Some(DiagnosticSeverity::WARNING),
        Some(NumberOrString::String("trailing-whitespace".into())),
        None,
        "Trailing whitespace".into(),
        None,
        None,
    );
    diagnostic.data = Some(json!({ "correctable": true, "code_action": fix }));
    diagnostic
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::test_support::{URI, registry, state_with, uri};
    use lsp_types::Position;

    fn request() -> Request {
        Request::new(1, "textDocument/diagnostic", json!({ "textDocument": { "uri": URI } }))
    }

    #[test]
    fn test_trailing_whitespace_is_correctable() {
        let doc = Document::new(uri(), "fn a() {}  \r\nfn b() {}\n", 1);
        let diagnostics = lint(&doc);
        assert_eq!(diagnostics.len(), 1);

        let diagnostic = &diagnostics[0];
        assert_eq!(diagnostic.range.start, Position::new(0, 9));
        assert_eq!(diagnostic.range.end, Position::new(0, 11));

        let data = diagnostic.data.as_ref().unwrap();
        assert_eq!(data["correctable"], json!(true));
        assert_eq!(data["code_action"]["kind"], json!("quickfix"));
        assert_eq!(
            data.pointer("/code_action/edit/documentChanges/0/edits/0/range/start/character"),
            Some(&json!(9))
        );
        assert_eq!(
            data.pointer("/code_action/edit/documentChanges/0/textDocument/uri"),
            Some(&json!(URI))
        );
    }

    #[test]
    fn test_tab_indentation_is_a_hint() {
        let doc = Document::new(uri(), "ok\n\tindented\n", 1);
        let diagnostics = lint(&doc);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].severity, Some(DiagnosticSeverity::HINT));
        assert_eq!(diagnostics[0].range.start, Position::new(1, 0));
        assert_eq!(diagnostics[0].data, Some(json!({ "correctable": false })));
    }

    #[test]
    fn test_clean_document() {
        let state = state_with("fn main() {}\n");
        assert!(handle(&request(), &state, &registry()).unwrap().is_empty());
    }

    #[test]
    fn test_diagnostics_pass_through_hooks() {
        let state = state_with("x \n");
        let mut registry = registry();
        crate::extensions::register_library_defaults(&mut registry).unwrap();
        let diagnostics = handle(&request(), &state, &registry).unwrap();
        assert_eq!(diagnostics[0].source.as_deref(), Some("lantern"));
    }
}
