//! The request orchestrator.
//!
//! Each HTTP verb becomes a walk down the tree followed by exactly one
//! terminal skip-list operation. The walk and the terminal operation happen
//! under a single coarse service lock so that a request never observes an
//! intermediate node that a concurrent delete has already detached: it
//! either resolves the terminal entity as present, or fails not-found with
//! no partial side effect.

use crate::error::{EngineError, EngineResult};
use crate::events::{ChangeEvent, EventBus, EventKind};
use crate::path::{self, kind_at};
use crate::tree::{now_millis, Collection, Document, Metadata, TreeEntry};
use nestdb_skiplist::SkipList;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::sync::mpsc::Receiver;
use tracing::debug;

/// A successful engine operation, ready for status mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The entity was created; the body is its URI serialisation.
    Created(Vec<u8>),
    /// The operation succeeded with a body (read, overwrite, patch).
    Ok(Vec<u8>),
    /// The operation succeeded with no body (delete).
    NoContent,
    /// The verbs allowed at the requested path.
    Allowed(&'static str),
}

/// Validation hook applied to document payloads produced inside a terminal
/// operation (the patch merge result). Returns the validator's message on
/// rejection.
pub type PayloadCheck<'a> = &'a dyn Fn(&Value) -> Result<(), String>;

/// The root of the document tree and the entry point for every request.
pub struct Datastore {
    /// Coarse lock held across each walk plus its terminal operation.
    walk: Mutex<()>,
    /// Root registry: database name to root collection.
    roots: SkipList<String, Collection>,
    events: EventBus,
}

impl Datastore {
    /// Creates an empty datastore.
    pub fn new() -> Self {
        Self {
            walk: Mutex::new(()),
            roots: SkipList::new(),
            events: EventBus::new(),
        }
    }

    /// The change-event bus fed by every successful mutation.
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Subscribes to changes at or under `raw_path`.
    pub fn subscribe(&self, raw_path: &str) -> EngineResult<Receiver<ChangeEvent>> {
        let segments = path::resolve(raw_path)?;
        Ok(self.events.subscribe(segments))
    }

    /// GET: serialises the addressed entity.
    pub fn get(&self, raw_path: &str) -> EngineResult<Outcome> {
        let segments = path::resolve(raw_path)?;
        let _walk = self.walk.lock();
        let entry = self.lookup(&segments)?;
        let body = entry.marshal()?;
        debug!(path = raw_path, bytes = body.len(), "get");
        Ok(Outcome::Ok(body))
    }

    /// PUT: creates a database root (failing if present), or
    /// creates-or-replaces a subcollection or document.
    pub fn put(
        &self,
        raw_path: &str,
        payload: Option<Value>,
        principal: &str,
    ) -> EngineResult<Outcome> {
        let segments = path::resolve(raw_path)?;
        let _walk = self.walk.lock();
        let uri = path::canonical_uri(&segments);

        if segments.len() == 1 {
            let name = segments[0].clone();
            let collection = Collection::new(name.clone(), uri.clone());
            self.roots.upsert(name.clone(), |_, current| match current {
                Some(_) => Err(EngineError::DatabaseExists { name: name.clone() }),
                None => Ok(collection.clone()),
            })?;
            debug!(path = raw_path, "database created");
            self.events.publish(EventKind::Update, &segments, &uri);
            return Ok(Outcome::Created(uri_body(&uri)?));
        }

        let parent = self.walk_to_parent(&segments)?;
        let terminal = segments[segments.len() - 1].clone();

        if segments.len() % 2 == 1 {
            // Odd depth past the root: a subcollection.
            let document = as_document(parent)?;
            let collection = Collection::new(terminal.clone(), uri.clone());
            document
                .collections()
                .upsert::<EngineError, _>(terminal, |_, _| Ok(collection.clone()))?;
            debug!(path = raw_path, "collection replaced");
            self.events.publish(EventKind::Update, &segments, &uri);
            return Ok(Outcome::Created(uri_body(&uri)?));
        }

        let collection = as_collection(parent)?;
        let data = payload
            .ok_or_else(|| EngineError::invalid_body("document body required"))?;
        let principal = principal.to_string();
        let now = now_millis();
        let name = terminal.clone();
        let inserted = collection.documents().upsert(terminal, |_, current| {
            let meta = match current {
                Some(existing) => existing.meta().touched(&principal, now),
                None => Metadata::new(&principal, now),
            };
            Ok::<_, EngineError>(Document::new(name.clone(), uri.clone(), data.clone(), meta))
        })?;
        debug!(path = raw_path, inserted, "document written");
        self.events.publish(EventKind::Update, &segments, &uri);
        let body = uri_body(&uri)?;
        Ok(if inserted {
            Outcome::Created(body)
        } else {
            Outcome::Ok(body)
        })
    }

    /// POST: create-only variant of PUT; conflicts when the terminal
    /// already exists. Not applicable to database roots.
    pub fn post(
        &self,
        raw_path: &str,
        payload: Option<Value>,
        principal: &str,
    ) -> EngineResult<Outcome> {
        let segments = path::resolve(raw_path)?;
        let _walk = self.walk.lock();
        if segments.len() == 1 {
            return Err(EngineError::MethodNotAllowed);
        }
        let uri = path::canonical_uri(&segments);
        let parent = self.walk_to_parent(&segments)?;
        let terminal = segments[segments.len() - 1].clone();
        let kind = kind_at(segments.len() - 1);

        if segments.len() % 2 == 1 {
            let document = as_document(parent)?;
            let name = terminal.clone();
            let collection = Collection::new(terminal.clone(), uri.clone());
            document.collections().upsert(terminal, |_, current| match current {
                Some(_) => Err(EngineError::conflict(kind, name.clone())),
                None => Ok(collection.clone()),
            })?;
        } else {
            let collection = as_collection(parent)?;
            let data = payload
                .ok_or_else(|| EngineError::invalid_body("document body required"))?;
            let principal = principal.to_string();
            let now = now_millis();
            let name = terminal.clone();
            collection.documents().upsert(terminal, |_, current| match current {
                Some(_) => Err(EngineError::conflict(kind, name.clone())),
                None => Ok(Document::new(
                    name.clone(),
                    uri.clone(),
                    data.clone(),
                    Metadata::new(&principal, now),
                )),
            })?;
        }
        debug!(path = raw_path, "created");
        self.events.publish(EventKind::Update, &segments, &uri);
        Ok(Outcome::Created(uri_body(&uri)?))
    }

    /// PATCH: on a collection, replaces the stored URI; on a document,
    /// applies the body as a JSON Merge Patch to the payload, revalidates
    /// it, and refreshes the modification stamps.
    pub fn patch(
        &self,
        raw_path: &str,
        patch: Value,
        principal: &str,
        check: PayloadCheck<'_>,
    ) -> EngineResult<Outcome> {
        let segments = path::resolve(raw_path)?;
        let _walk = self.walk.lock();
        if segments.len() == 1 {
            return Err(EngineError::MethodNotAllowed);
        }
        let uri = path::canonical_uri(&segments);
        let parent = self.walk_to_parent(&segments)?;
        let terminal = segments[segments.len() - 1].clone();
        let kind = kind_at(segments.len() - 1);

        if segments.len() % 2 == 1 {
            let document = as_document(parent)?;
            let new_uri = patch
                .get("uri")
                .and_then(Value::as_str)
                .ok_or_else(|| EngineError::invalid_body("uri field required"))?
                .to_string();
            let name = terminal.clone();
            document.collections().upsert::<EngineError, _>(terminal, |_, current| {
                let existing = current
                    .ok_or_else(|| EngineError::not_found(kind, name.clone()))?;
                Ok(Collection::with_documents(
                    existing.name().to_string(),
                    new_uri.clone(),
                    existing.documents().clone(),
                ))
            })?;
        } else {
            let collection = as_collection(parent)?;
            let principal = principal.to_string();
            let now = now_millis();
            let name = terminal.clone();
            collection.documents().upsert::<EngineError, _>(terminal, |_, current| {
                let existing = current
                    .ok_or_else(|| EngineError::not_found(kind, name.clone()))?;
                let mut merged = existing.data().clone();
                merge_patch(&mut merged, &patch);
                check(&merged).map_err(EngineError::schema)?;
                Ok(Document::with_collections(
                    existing.name().to_string(),
                    uri.clone(),
                    merged,
                    existing.meta().touched(&principal, now),
                    existing.collections().clone(),
                ))
            })?;
        }
        debug!(path = raw_path, "patched");
        self.events.publish(EventKind::Update, &segments, &uri);
        Ok(Outcome::Ok(uri_body(&uri)?))
    }

    /// DELETE: drops the addressed entity and its whole subtree.
    pub fn delete(&self, raw_path: &str) -> EngineResult<Outcome> {
        let segments = path::resolve(raw_path)?;
        let _walk = self.walk.lock();
        let uri = path::canonical_uri(&segments);
        let terminal = segments[segments.len() - 1].clone();
        let kind = kind_at(segments.len() - 1);

        if segments.len() == 1 {
            self.roots
                .remove(&terminal)
                .ok_or_else(|| EngineError::not_found(kind, &terminal))?;
        } else {
            let parent = self.walk_to_parent(&segments)?;
            if segments.len() % 2 == 1 {
                let document = as_document(parent)?;
                document
                    .collections()
                    .remove(&terminal)
                    .ok_or_else(|| EngineError::not_found(kind, &terminal))?;
            } else {
                let collection = as_collection(parent)?;
                collection
                    .documents()
                    .remove(&terminal)
                    .ok_or_else(|| EngineError::not_found(kind, &terminal))?;
            }
        }
        debug!(path = raw_path, "deleted");
        self.events.publish(EventKind::Delete, &segments, &uri);
        Ok(Outcome::NoContent)
    }

    /// OPTIONS: reports the verbs applicable at the path, by terminal
    /// presence.
    pub fn options(&self, raw_path: &str) -> EngineResult<Outcome> {
        let segments = path::resolve(raw_path)?;
        let _walk = self.walk.lock();
        if segments.len() == 1 {
            return Ok(Outcome::Allowed("OPTIONS, PUT, DELETE"));
        }
        let parent = self.walk_to_parent(&segments)?;
        let terminal = &segments[segments.len() - 1];
        let allowed = if parent.child_by_name(terminal).is_some() {
            "OPTIONS, GET, PUT, PATCH, DELETE"
        } else {
            "OPTIONS, PUT, POST"
        };
        Ok(Outcome::Allowed(allowed))
    }

    /// Resolves every segment, returning the terminal entry.
    fn lookup(&self, segments: &[String]) -> EngineResult<TreeEntry> {
        let root = self
            .roots
            .find(&segments[0])
            .ok_or_else(|| EngineError::not_found(kind_at(0), &segments[0]))?;
        let mut current = TreeEntry::Collection(root);
        for (offset, name) in segments[1..].iter().enumerate() {
            let index = offset + 1;
            current = current
                .child_by_name(name)
                .ok_or_else(|| EngineError::not_found(kind_at(index), name))?;
        }
        Ok(current)
    }

    /// Resolves all but the terminal segment, returning the entry that
    /// encloses the terminal. Requires at least two segments.
    fn walk_to_parent(&self, segments: &[String]) -> EngineResult<TreeEntry> {
        let root = self
            .roots
            .find(&segments[0])
            .ok_or_else(|| EngineError::not_found(kind_at(0), &segments[0]))?;
        let mut current = TreeEntry::Collection(root);
        for (offset, name) in segments[1..segments.len() - 1].iter().enumerate() {
            let index = offset + 1;
            current = current
                .child_by_name(name)
                .ok_or_else(|| EngineError::not_found(kind_at(index), name))?;
        }
        Ok(current)
    }
}

impl Default for Datastore {
    fn default() -> Self {
        Self::new()
    }
}

fn as_collection(entry: TreeEntry) -> EngineResult<Collection> {
    match entry {
        TreeEntry::Collection(collection) => Ok(collection),
        TreeEntry::Document(_) => Err(EngineError::invalid_path("path parity mismatch")),
    }
}

fn as_document(entry: TreeEntry) -> EngineResult<Document> {
    match entry {
        TreeEntry::Document(document) => Ok(document),
        TreeEntry::Collection(_) => Err(EngineError::invalid_path("path parity mismatch")),
    }
}

fn uri_body(uri: &str) -> EngineResult<Vec<u8>> {
    serde_json::to_vec(&serde_json::json!({ "uri": uri }))
        .map_err(|err| EngineError::marshal(err.to_string()))
}

/// RFC 7396 JSON Merge Patch.
fn merge_patch(target: &mut Value, patch: &Value) {
    match patch {
        Value::Object(changes) => {
            if !target.is_object() {
                *target = Value::Object(Map::new());
            }
            if let Value::Object(fields) = target {
                for (key, change) in changes {
                    if change.is_null() {
                        fields.remove(key);
                    } else {
                        merge_patch(fields.entry(key.clone()).or_insert(Value::Null), change);
                    }
                }
            }
        }
        replacement => *target = replacement.clone(),
    }
}
