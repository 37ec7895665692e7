//! Open documents and the settings negotiated at `initialize`.
//!
//! The store lives inside the shared queue state. The main process mutates it
//! inline for the document lifecycle notifications; workers read it through the
//! bridge. [`Documents`] is the access surface both sides program against.

use std::collections::HashMap;
use std::ops::Range;

use lsp_types::{Position, TextDocumentContentChangeEvent, Url};
use serde::{Deserialize, Serialize};

use crate::error::{LanternError, Result};

/// A text document as last synchronized by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub uri: Url,
    pub text: String,
    pub version: i32,
    #[serde(skip)]
    line_offsets: Vec<usize>,
}

impl Document {
    pub fn new(uri: Url, text: impl Into<String>, version: i32) -> Self {
        let text = text.into();
        let line_offsets = compute_line_offsets(&text);
        Self {
            uri,
            text,
            version,
            line_offsets,
        }
    }

    /// Rebuild derived state after deserialization.
    fn reindex(mut self) -> Self {
        self.line_offsets = compute_line_offsets(&self.text);
        self
    }

    /// Apply one content change. A change without a range replaces the whole text.
    pub fn apply_change(&mut self, change: TextDocumentContentChangeEvent) {
        match change.range {
            None => self.text = change.text,
            Some(range) => {
                let start = self.offset_at(range.start);
                let end = self.offset_at(range.end).max(start);
                self.text.replace_range(start..end, &change.text);
            }
        }
        self.line_offsets = compute_line_offsets(&self.text);
    }

    pub fn line_count(&self) -> usize {
        self.line_offsets.len()
    }

    /// Text of line `line` without its terminator.
    pub fn line(&self, line: usize) -> Option<&str> {
        let start = *self.line_offsets.get(line)?;
        let end = self
            .line_offsets
            .get(line + 1)
            .copied()
            .unwrap_or(self.text.len());
        Some(self.text[start..end].trim_end_matches(['\n', '\r']))
    }

    /// Byte offset of an LSP position. Columns count UTF-16 code units and
    /// are clamped to the end of the line.
    pub fn offset_at(&self, position: Position) -> usize {
        let Some(line) = self.line(position.line as usize) else {
            return self.text.len();
        };
        let line_start = self.line_offsets[position.line as usize];
        let mut units = 0u32;
        for (idx, ch) in line.char_indices() {
            if units >= position.character {
                return line_start + idx;
            }
            units += ch.len_utf16() as u32;
        }
        line_start + line.len()
    }

    /// LSP position of a byte offset.
    pub fn position_at(&self, offset: usize) -> Position {
        let offset = offset.min(self.text.len());
        let line = self
            .line_offsets
            .iter()
            .rposition(|&o| o <= offset)
            .unwrap_or(0);
        let line_start = self.line_offsets[line];
        let character = self.text[line_start..offset]
            .chars()
            .map(|c| c.len_utf16() as u32)
            .sum();
        Position::new(line as u32, character)
    }

    pub fn lsp_range(&self, bytes: Range<usize>) -> lsp_types::Range {
        lsp_types::Range::new(self.position_at(bytes.start), self.position_at(bytes.end))
    }

    /// Byte range of the identifier touching `offset`, if any.
    pub fn word_at(&self, offset: usize) -> Option<Range<usize>> {
        let offset = offset.min(self.text.len());
        let is_word = |c: char| c.is_alphanumeric() || c == '_';

        let start = self.text[..offset]
            .char_indices()
            .rev()
            .take_while(|&(_, c)| is_word(c))
            .last()
            .map_or(offset, |(i, _)| i);
        let end = self.text[offset..]
            .char_indices()
            .find(|&(_, c)| !is_word(c))
            .map_or(self.text.len(), |(i, _)| offset + i);

        (start < end).then_some(start..end)
    }
}

fn compute_line_offsets(text: &str) -> Vec<usize> {
    let mut offsets = vec![0];
    offsets.extend(
        text.char_indices()
            .filter(|&(_, c)| c == '\n')
            .map(|(i, _)| i + 1),
    );
    offsets
}

/// Settings negotiated with the client at `initialize`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSettings {
    /// Number of worker processes to spawn on `initialized`.
    pub worker_count: usize,
    /// Feature keys the client asked for; `None` means all of them.
    pub enabled_features: Option<Vec<String>>,
}

/// All documents currently open in the editor.
#[derive(Debug, Default)]
pub struct DocumentStore {
    documents: HashMap<Url, Document>,
    settings: StoreSettings,
}

impl DocumentStore {
    pub fn new(worker_count: usize) -> Self {
        Self {
            documents: HashMap::new(),
            settings: StoreSettings {
                worker_count,
                enabled_features: None,
            },
        }
    }

    pub fn get(&self, uri: &Url) -> Option<&Document> {
        self.documents.get(uri)
    }

    pub fn insert(&mut self, document: Document) {
        self.documents.insert(document.uri.clone(), document);
    }

    pub fn change(
        &mut self,
        uri: &Url,
        version: i32,
        changes: Vec<TextDocumentContentChangeEvent>,
    ) -> Result<()> {
        let document = self
            .documents
            .get_mut(uri)
            .ok_or_else(|| LanternError::DocumentNotOpen(uri.clone()))?;
        for change in changes {
            document.apply_change(change);
        }
        document.version = version;
        Ok(())
    }

    pub fn remove(&mut self, uri: &Url) -> Result<Document> {
        self.documents
            .remove(uri)
            .ok_or_else(|| LanternError::DocumentNotOpen(uri.clone()))
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn clear(&mut self) {
        self.documents.clear();
    }

    #[cfg(test)]
    pub fn worker_count(&self) -> usize {
        self.settings.worker_count
    }

    pub fn settings(&self) -> &StoreSettings {
        &self.settings
    }

    pub fn set_settings(&mut self, settings: StoreSettings) {
        self.settings = settings;
    }
}

/// Access to the document store, local or across the bridge.
///
/// Every call is a single critical section on the owning side.
pub trait Documents {
    /// A snapshot of the document at `uri`.
    fn document(&self, uri: &Url) -> Result<Option<Document>>;

    fn open_document(&self, document: Document) -> Result<()>;

    fn change_document(
        &self,
        uri: &Url,
        version: i32,
        changes: Vec<TextDocumentContentChangeEvent>,
    ) -> Result<()>;

    fn close_document(&self, uri: &Url) -> Result<()>;

    fn settings(&self) -> Result<StoreSettings>;

    fn update_settings(&self, settings: StoreSettings) -> Result<()>;
}

/// Deserialize a document received over the bridge.
pub(crate) fn document_from_wire(document: Document) -> Document {
    document.reindex()
}

#[cfg(test)]
mod tests {
    use super::*;
    use lsp_types::Range as LspRange;

    fn uri(path: &str) -> Url {
        Url::parse(&format!("file:///{}", path)).unwrap()
    }

    fn change(range: Option<LspRange>, text: &str) -> TextDocumentContentChangeEvent {
        TextDocumentContentChangeEvent {
            range,
            range_length: None,
            text: text.to_string(),
        }
    }

    #[test]
    fn test_lines_and_positions() {
        let doc = Document::new(uri("a.rs"), "fn main() {\r\n    x\n}", 1);
        assert_eq!(doc.line_count(), 3);
        assert_eq!(doc.line(0), Some("fn main() {"));
        assert_eq!(doc.line(1), Some("    x"));
        assert_eq!(doc.line(3), None);

        let offset = doc.offset_at(Position::new(1, 4));
        assert_eq!(&doc.text[offset..offset + 1], "x");
        assert_eq!(doc.position_at(offset), Position::new(1, 4));
    }

    #[test]
    fn test_utf16_columns() {
        // '𝕏' is two UTF-16 code units and four UTF-8 bytes.
        let doc = Document::new(uri("u.rs"), "a𝕏b", 1);
        assert_eq!(doc.offset_at(Position::new(0, 3)), 5);
        assert_eq!(doc.position_at(5), Position::new(0, 3));
        // Columns past the end clamp to the line end.
        assert_eq!(doc.offset_at(Position::new(0, 80)), doc.text.len());
    }

    #[test]
    fn test_incremental_and_full_changes() {
        let mut doc = Document::new(uri("c.rs"), "let a = 1;\nlet b = 2;\n", 1);
        doc.apply_change(change(
            Some(LspRange::new(Position::new(1, 4), Position::new(1, 5))),
            "beta",
        ));
        assert_eq!(doc.text, "let a = 1;\nlet beta = 2;\n");
        assert_eq!(doc.line(1), Some("let beta = 2;"));

        doc.apply_change(change(None, "replaced"));
        assert_eq!(doc.text, "replaced");
        assert_eq!(doc.line_count(), 1);
    }

    #[test]
    fn test_word_at() {
        let doc = Document::new(uri("w.rs"), "foo_bar + baz", 1);
        assert_eq!(doc.word_at(3), Some(0..7));
        assert_eq!(doc.word_at(7), Some(0..7));
        assert_eq!(doc.word_at(8), None);
        assert_eq!(doc.word_at(13), Some(10..13));
    }

    #[test]
    fn test_store_lifecycle() {
        let mut store = DocumentStore::new(2);
        assert!(store.is_empty());
        assert_eq!(store.worker_count(), 2);

        store.insert(Document::new(uri("s.rs"), "x", 1));
        assert_eq!(store.len(), 1);

        store
            .change(&uri("s.rs"), 2, vec![change(None, "y")])
            .unwrap();
        assert_eq!(store.get(&uri("s.rs")).unwrap().version, 2);

        store.remove(&uri("s.rs")).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_change_unknown_document_fails() {
        let mut store = DocumentStore::new(1);
        let err = store.change(&uri("ghost.rs"), 1, vec![]).unwrap_err();
        assert!(matches!(err, LanternError::DocumentNotOpen(_)));
        assert!(store.remove(&uri("ghost.rs")).is_err());
    }

    #[test]
    fn test_wire_document_is_reindexed() {
        let doc = Document::new(uri("r.rs"), "a\nb", 1);
        let json = serde_json::to_string(&doc).unwrap();
        let back = document_from_wire(serde_json::from_str(&json).unwrap());
        assert_eq!(back.line(1), Some("b"));
        assert_eq!(back, doc);
    }
}
