//! Per-workspace document cache (spec §4.2).
//!
//! Maps a file URI to its language id, monotonic version, and last-known
//! content. The dispatcher consults this before issuing `didChange` so it
//! can enforce "version sent is strictly greater than the previous version
//! for that URI" (spec §8, invariant 1).

use std::collections::HashMap;

use lsp_types::{TextDocumentIdentifier, Url, VersionedTextDocumentIdentifier};

use lspbridge_core::error::LspError;

/// A single open document's cached state.
#[derive(Debug, Clone)]
pub struct DocumentEntry {
    /// LSP language id (`"python"`, `"typescript"`, `"vue"`, ...).
    pub language_id: String,
    /// Monotonic version, starting at 1 on open.
    pub version: i32,
    /// Last-known full text content.
    pub content: String,
}

/// The open-document set for one LSP connection.
#[derive(Debug, Default)]
pub struct DocumentCache {
    documents: HashMap<Url, DocumentEntry>,
}

impl DocumentCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the document is already tracked as open.
    pub fn is_open(&self, uri: &Url) -> bool {
        self.documents.contains_key(uri)
    }

    /// Records a newly opened document at version 1.
    ///
    /// If the document is already tracked this is a no-op that returns the
    /// existing entry's version, matching the worker's `ensure open`
    /// semantics: `didOpen` is only ever sent once per (connection, URI).
    pub fn open(&mut self, uri: Url, language_id: String, content: String) -> i32 {
        self.documents
            .entry(uri)
            .or_insert(DocumentEntry {
                language_id,
                version: 1,
                content,
            })
            .version
    }

    /// Applies a full-text update, incrementing the version.
    ///
    /// ## Errors
    /// Returns [`LspError::DocumentNotFound`] if the document isn't open.
    pub fn update(&mut self, uri: &Url, content: String) -> Result<i32, LspError> {
        let entry = self
            .documents
            .get_mut(uri)
            .ok_or_else(|| LspError::DocumentNotFound(uri.to_string()))?;
        entry.version += 1;
        entry.content = content;
        Ok(entry.version)
    }

    /// Removes a document from tracking.
    pub fn close(&mut self, uri: &Url) {
        self.documents.remove(uri);
    }

    /// Looks up the cached entry for a URI.
    pub fn get(&self, uri: &Url) -> Option<&DocumentEntry> {
        self.documents.get(uri)
    }

    /// Number of currently open documents (used by tests and status tools).
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Builds the unversioned `TextDocumentIdentifier` projection.
    pub fn identifier(uri: Url) -> TextDocumentIdentifier {
        TextDocumentIdentifier { uri }
    }

    /// Builds the versioned projection for a `didChange`-style request, or
    /// `None` if the document isn't open.
    pub fn versioned_identifier(&self, uri: &Url) -> Option<VersionedTextDocumentIdentifier> {
        self.documents.get(uri).map(|entry| VersionedTextDocumentIdentifier {
            uri: uri.clone(),
            version: entry.version,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uri(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_open_sets_version_one() {
        let mut cache = DocumentCache::new();
        let version = cache.open(uri("file:///a.py"), "python".into(), "x = 1".into());
        assert_eq!(version, 1);
    }

    #[test]
    fn test_reopen_is_idempotent() {
        let mut cache = DocumentCache::new();
        cache.open(uri("file:///a.py"), "python".into(), "x = 1".into());
        let version = cache.open(uri("file:///a.py"), "python".into(), "x = 2".into());
        assert_eq!(version, 1, "reopening an already-open document must not bump version");
    }

    #[test]
    fn test_update_increments_version_monotonically() {
        let mut cache = DocumentCache::new();
        let u = uri("file:///a.py");
        cache.open(u.clone(), "python".into(), "x = 1".into());

        let v2 = cache.update(&u, "x = 2".into()).unwrap();
        assert_eq!(v2, 2);
        let v3 = cache.update(&u, "x = 3".into()).unwrap();
        assert_eq!(v3, 3);
        assert!(v3 > v2);
    }

    #[test]
    fn test_update_unopened_document_fails() {
        let mut cache = DocumentCache::new();
        let err = cache.update(&uri("file:///missing.py"), "x".into());
        assert!(matches!(err, Err(LspError::DocumentNotFound(_))));
    }

    #[test]
    fn test_close_removes_entry() {
        let mut cache = DocumentCache::new();
        let u = uri("file:///a.py");
        cache.open(u.clone(), "python".into(), "x".into());
        cache.close(&u);
        assert!(!cache.is_open(&u));
    }
}
