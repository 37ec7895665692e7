use lsp_types::{CodeAction, CodeActionParams, Diagnostic, Range};

use super::{Feature, FeatureKey, open_document, params};
use crate::error::FeatureError;
use crate::protocol::Request;
use crate::store::Documents;

pub struct CodeActionsRequest;

impl Feature for CodeActionsRequest {
    const KEY: FeatureKey = FeatureKey::CodeActions;
    type Response = Option<Vec<CodeAction>>;
}

/// Quick fixes carried by the diagnostics in the request context.
///
/// Returns `None` when the client sent no diagnostics at all.
pub(super) fn handle(
    request: &Request,
    documents: &dyn Documents,
) -> Result<Option<Vec<CodeAction>>, FeatureError> {
    let params: CodeActionParams = params(request)?;
    open_document(documents, &params.text_document.uri)?;

    let diagnostics = params.context.diagnostics;
    if diagnostics.is_empty() {
        return Ok(None);
    }
    let actions = diagnostics
        .iter()
        .filter_map(|diagnostic| correction(diagnostic, params.range))
        .collect();
    Ok(Some(actions))
}

/// The diagnostic's ready-made fix, if it is correctable and the fix edits
/// lines within `requested`.
fn correction(diagnostic: &Diagnostic, requested: Range) -> Option<CodeAction> {
    let data = diagnostic.data.as_ref()?;
    if data.get("correctable").and_then(|v| v.as_bool()) != Some(true) {
        return None;
    }
    let action = data.get("code_action")?;
    let edit_range: Range = serde_json::from_value(
        action
            .pointer("/edit/documentChanges/0/edits/0/range")?
            .clone(),
    )
    .ok()?;

    let covered = requested.start.line <= edit_range.start.line
        && edit_range.end.line <= requested.end.line;
    if !covered {
        return None;
    }
    serde_json::from_value(action.clone()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::test_support::{URI, state_with};
    use serde_json::{Value, json};

    fn fixable(line: u32) -> Value {
        json!({
            "range": { "start": { "line": line, "character": 3 }, "end": { "line": line, "character": 5 } },
            "message": "Trailing whitespace",
            "data": {
                "correctable": true,
                "code_action": {
                    "title": "Remove trailing whitespace",
                    "kind": "quickfix",
                    "isPreferred": true,
                    "edit": { "documentChanges": [{
                        "textDocument": { "uri": URI, "version": null },
                        "edits": [{
                            "range": { "start": { "line": line, "character": 3 }, "end": { "line": line, "character": 5 } },
                            "newText": ""
                        }]
                    }]}
                }
            }
        })
    }

    fn request(start: u32, end: u32, diagnostics: Vec<Value>) -> Request {
        Request::new(
            4,
            "textDocument/codeAction",
            json!({
                "textDocument": { "uri": URI },
                "range": { "start": { "line": start, "character": 0 }, "end": { "line": end, "character": 0 } },
                "context": { "diagnostics": diagnostics }
            }),
        )
    }

    #[test]
    fn test_no_diagnostics_is_null() {
        let state = state_with("abc  \n");
        assert_eq!(handle(&request(0, 3, vec![]), &state).unwrap(), None);
    }

    #[test]
    fn test_keeps_fixes_inside_requested_lines() {
        let state = state_with("a  \nb  \nc  \n");
        let actions = handle(&request(1, 2, vec![fixable(0), fixable(1), fixable(2)]), &state)
            .unwrap()
            .unwrap();
        assert_eq!(actions.len(), 2);
        assert_eq!(actions[0].title, "Remove trailing whitespace");
        assert_eq!(actions[0].is_preferred, Some(true));
    }

    #[test]
    fn test_skips_uncorrectable_diagnostics() {
        let state = state_with("\tx\n");
        let mut hint = fixable(0);
        hint["data"]["correctable"] = json!(false);
        let plain = json!({
            "range": { "start": { "line": 0, "character": 0 }, "end": { "line": 0, "character": 1 } },
            "message": "no data"
        });
        let actions = handle(&request(0, 5, vec![hint, plain]), &state).unwrap();
        assert_eq!(actions, Some(vec![]));
    }
}
