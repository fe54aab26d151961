//! # NestDB Core
//!
//! The NestDB engine: an in-memory tree of JSON documents and collections,
//! addressable to arbitrary depth, backed everywhere by the concurrent skip
//! list from `nestdb_skiplist`.
//!
//! This crate provides:
//! - The tree model: collections, documents, metadata
//! - Path resolution (percent-decoding, version stripping, parity)
//! - The request orchestrator mapping verbs onto terminal skip-list
//!   operations
//! - The change-event bus feeding server-sent-event subscribers

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod engine;
mod error;
mod events;
mod tree;

pub mod path;

pub use engine::{Datastore, Outcome, PayloadCheck};
pub use error::{EngineError, EngineResult, EntityKind};
pub use events::{ChangeEvent, EventBus, EventKind};
pub use tree::{now_millis, Collection, Document, Metadata, TreeEntry};
