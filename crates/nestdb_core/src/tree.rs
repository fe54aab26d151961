//! The document tree: collections, documents, and their metadata.
//!
//! A collection owns an ordered map of documents; a document owns an
//! ordered map of subcollections. Both are cheap to clone (shared inner
//! state) because the enclosing skip lists clone values out on every
//! lookup. Documents are immutable values: overwrite and patch build a
//! replacement and swap it through the parent skip list, so each mutation
//! is a single atomic skip-list operation.

use crate::error::{EngineError, EngineResult};
use nestdb_skiplist::{CancelToken, SkipList};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Authorship and modification stamps carried by every document.
///
/// `created_*` is written once, when the document first appears at its
/// path; `last_modified_*` is refreshed on every overwrite or patch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    /// Principal that created the document.
    pub created_by: String,
    /// Creation instant, Unix milliseconds.
    pub created_at: u64,
    /// Principal that last overwrote or patched the document.
    pub last_modified_by: String,
    /// Last modification instant, Unix milliseconds.
    pub last_modified_at: u64,
}

impl Metadata {
    /// Stamps a freshly created document.
    pub fn new(principal: &str, at_millis: u64) -> Self {
        Self {
            created_by: principal.to_string(),
            created_at: at_millis,
            last_modified_by: principal.to_string(),
            last_modified_at: at_millis,
        }
    }

    /// Stamps an overwrite or patch, preserving the creation fields.
    pub fn touched(&self, principal: &str, at_millis: u64) -> Self {
        Self {
            created_by: self.created_by.clone(),
            created_at: self.created_at,
            last_modified_by: principal.to_string(),
            last_modified_at: at_millis,
        }
    }
}

struct DocumentInner {
    name: String,
    uri: String,
    data: Value,
    meta: Metadata,
    collections: Arc<SkipList<String, Collection>>,
}

/// A JSON document with metadata and an ordered map of subcollections.
#[derive(Clone)]
pub struct Document {
    inner: Arc<DocumentInner>,
}

/// The wire shape of a full document serialisation.
#[derive(Serialize)]
struct DocumentView<'a> {
    path: String,
    doc: &'a Value,
    meta: &'a Metadata,
    uri: &'a str,
}

impl Document {
    /// Creates a document with an empty subcollection map.
    pub fn new(name: impl Into<String>, uri: impl Into<String>, data: Value, meta: Metadata) -> Self {
        Self::with_collections(name, uri, data, meta, Arc::new(SkipList::new()))
    }

    /// Creates a document that keeps an existing subcollection map. Used by
    /// patch, which touches only the payload and URI.
    pub fn with_collections(
        name: impl Into<String>,
        uri: impl Into<String>,
        data: Value,
        meta: Metadata,
        collections: Arc<SkipList<String, Collection>>,
    ) -> Self {
        Self {
            inner: Arc::new(DocumentInner {
                name: name.into(),
                uri: uri.into(),
                data,
                meta,
                collections,
            }),
        }
    }

    /// The document's name (its terminal path segment).
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The document's canonical URI.
    pub fn uri(&self) -> &str {
        &self.inner.uri
    }

    /// The stored JSON payload.
    pub fn data(&self) -> &Value {
        &self.inner.data
    }

    /// The document's metadata.
    pub fn meta(&self) -> &Metadata {
        &self.inner.meta
    }

    /// The subcollection map, shared with any patched successors.
    pub fn collections(&self) -> &Arc<SkipList<String, Collection>> {
        &self.inner.collections
    }

    /// Looks up a child subcollection.
    pub fn child(&self, name: &str) -> Option<Collection> {
        self.inner.collections.find(&name.to_string())
    }

    /// The full serialisation as a JSON value: `{path, doc, meta, uri}`.
    pub fn to_value(&self) -> EngineResult<Value> {
        let view = DocumentView {
            path: format!("/{}", self.inner.name),
            doc: &self.inner.data,
            meta: &self.inner.meta,
            uri: &self.inner.uri,
        };
        serde_json::to_value(view).map_err(|err| EngineError::marshal(err.to_string()))
    }

    /// The full serialisation as bytes.
    pub fn marshal(&self) -> EngineResult<Vec<u8>> {
        serde_json::to_vec(&self.to_value()?).map_err(|err| EngineError::marshal(err.to_string()))
    }
}

struct CollectionInner {
    name: String,
    uri: String,
    documents: Arc<SkipList<String, Document>>,
}

/// A named, ordered map of documents.
#[derive(Clone)]
pub struct Collection {
    inner: Arc<CollectionInner>,
}

impl Collection {
    /// Creates an empty collection.
    pub fn new(name: impl Into<String>, uri: impl Into<String>) -> Self {
        Self::with_documents(name, uri, Arc::new(SkipList::new()))
    }

    /// Creates a collection that keeps an existing document map. Used by
    /// patch, which touches only the URI.
    pub fn with_documents(
        name: impl Into<String>,
        uri: impl Into<String>,
        documents: Arc<SkipList<String, Document>>,
    ) -> Self {
        Self {
            inner: Arc::new(CollectionInner {
                name: name.into(),
                uri: uri.into(),
                documents,
            }),
        }
    }

    /// The collection's name (its terminal path segment).
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The collection's canonical URI.
    pub fn uri(&self) -> &str {
        &self.inner.uri
    }

    /// The document map, shared with any patched successors.
    pub fn documents(&self) -> &Arc<SkipList<String, Document>> {
        &self.inner.documents
    }

    /// Looks up a child document.
    pub fn child(&self, name: &str) -> Option<Document> {
        self.inner.documents.find(&name.to_string())
    }

    /// The body serialisation: a JSON array of the child documents' full
    /// serialisations, ascending by name.
    pub fn marshal(&self) -> EngineResult<Vec<u8>> {
        let cancel = CancelToken::new();
        let entries = self.inner.documents.entries(&cancel)?;
        let views = entries
            .iter()
            .map(|(_, document)| document.to_value())
            .collect::<EngineResult<Vec<Value>>>()?;
        serde_json::to_vec(&views).map_err(|err| EngineError::marshal(err.to_string()))
    }
}

/// A node in the tree walk: either variant resolves children by name and
/// serialises its own content.
#[derive(Clone)]
pub enum TreeEntry {
    /// A collection (including database roots).
    Collection(Collection),
    /// A document.
    Document(Document),
}

impl TreeEntry {
    /// Resolves a child by name. Collections resolve documents; documents
    /// resolve subcollections. A mismatched lookup is absent.
    pub fn child_by_name(&self, name: &str) -> Option<TreeEntry> {
        match self {
            TreeEntry::Collection(collection) => {
                collection.child(name).map(TreeEntry::Document)
            }
            TreeEntry::Document(document) => document.child(name).map(TreeEntry::Collection),
        }
    }

    /// Serialises this entry's content.
    pub fn marshal(&self) -> EngineResult<Vec<u8>> {
        match self {
            TreeEntry::Collection(collection) => collection.marshal(),
            TreeEntry::Document(document) => document.marshal(),
        }
    }
}
