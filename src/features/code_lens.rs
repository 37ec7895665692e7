use lsp_types::{CodeLens, Command};
use serde_json::json;

use super::{Feature, FeatureKey, TextDocumentOnly, open_document, params};
use crate::error::FeatureError;
use crate::extensions::{HookContext, Registry};
use crate::protocol::Request;
use crate::store::{Document, Documents};

/// Client command that runs a test, with `[path, name]` arguments.
pub const RUN_TEST_COMMAND: &str = "lantern.runTest";

pub struct CodeLensRequest;

impl Feature for CodeLensRequest {
    const KEY: FeatureKey = FeatureKey::CodeLens;
    type Response = Vec<CodeLens>;
}

pub(super) fn handle(
    request: &Request,
    documents: &dyn Documents,
    registry: &Registry,
) -> Result<Vec<CodeLens>, FeatureError> {
    let params: TextDocumentOnly = params(request)?;
    let document = open_document(documents, &params.text_document.uri)?;
    let root = std::env::current_dir().ok();
    let path = relative_path(&document, root.as_deref());
    let context = HookContext::new(&document);
    Ok(registry.apply::<CodeLensRequest>(lenses(&document, &path), &context))
}

/// The document path relative to the working directory, for the test runner.
fn relative_path(document: &Document, root: Option<&std::path::Path>) -> String {
    let path = document
        .uri
        .to_file_path()
        .unwrap_or_else(|_| document.uri.path().into());
    root.and_then(|root| path.strip_prefix(root).ok())
        .unwrap_or(&path)
        .to_string_lossy()
        .into_owned()
}

enum TestItem<'a> {
    Group(&'a str),
    Case(&'a str),
}

fn classify(line: &str) -> Option<TestItem<'_>> {
    let line = line.trim_start();
    let line = line.strip_prefix("pub ").unwrap_or(line);
    for keyword in ["fn ", "def "] {
        if let Some(rest) = line.strip_prefix(keyword) {
            let name = identifier(rest);
            return name.starts_with("test_").then_some(TestItem::Case(name));
        }
    }
    for keyword in ["class ", "struct ", "mod "] {
        if let Some(rest) = line.strip_prefix(keyword) {
            let name = identifier(rest);
            let is_group = name.ends_with("Test") || name == "tests";
            return is_group.then_some(TestItem::Group(name));
        }
    }
    None
}

fn identifier(text: &str) -> &str {
    let end = text
        .find(|c: char| !(c.is_alphanumeric() || c == '_'))
        .unwrap_or(text.len());
    &text[..end]
}

fn lenses(document: &Document, path: &str) -> Vec<CodeLens> {
    (0..document.line_count())
        .filter_map(|index| {
            let line = document.line(index)?;
            let (title, name) = match classify(line)? {
                TestItem::Group(name) => ("Run all tests in this file", name),
                TestItem::Case(name) => ("Run this test", name),
            };
            let range = lsp_types::Range::new(
                lsp_types::Position::new(index as u32, 0),
                lsp_types::Position::new(index as u32, line.encode_utf16().count() as u32),
            );
            Some(CodeLens {
                range,
                command: Some(Command {
                    title: title.to_string(),
                    command: RUN_TEST_COMMAND.to_string(),
                    arguments: Some(vec![json!(path), json!(name)]),
                }),
                data: None,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::test_support::{URI, registry, state_with, uri};
    use std::path::Path;

    const SOURCE: &str = "\
mod tests {
    fn helper() {}

    #[test]
    fn test_parses() {}
}

class ParserTest
  def test_empty
  end
end
";

    #[test]
    fn test_lenses_for_groups_and_cases() {
        let doc = Document::new(uri(), SOURCE, 1);
        let lenses = lenses(&doc, "src/sample.rs");
        let summary: Vec<_> = lenses
            .iter()
            .map(|lens| {
                let command = lens.command.as_ref().unwrap();
                (lens.range.start.line, command.title.as_str(), command.arguments.clone().unwrap()[1].clone())
            })
            .collect();
        assert_eq!(
            summary,
            vec![
                (0, "Run all tests in this file", json!("tests")),
                (4, "Run this test", json!("test_parses")),
                (7, "Run all tests in this file", json!("ParserTest")),
                (8, "Run this test", json!("test_empty")),
            ]
        );
        assert_eq!(lenses[1].command.as_ref().unwrap().command, RUN_TEST_COMMAND);
    }

    #[test]
    fn test_relative_path() {
        let doc = Document::new(uri(), "", 1);
        assert_eq!(relative_path(&doc, Some(Path::new("/work"))), "src/sample.rs");
        assert_eq!(relative_path(&doc, Some(Path::new("/other"))), "/work/src/sample.rs");
    }

    #[test]
    fn test_handle_runs_hooks() {
        let state = state_with("fn test_one() {}\n");
        let request = Request::new(
            1,
            "textDocument/codeLens",
            json!({ "textDocument": { "uri": URI } }),
        );
        let lenses = handle(&request, &state, &registry()).unwrap();
        assert_eq!(lenses.len(), 1);
        assert_eq!(lenses[0].range.end.character, 16);
    }
}
