//! # NestDB Skip List
//!
//! A concurrent, ordered key-value map implemented as a lazy skip list.
//! Every ordered map in NestDB (the root registry of databases, each
//! collection's documents, each document's subcollections) is an instance
//! of this structure.
//!
//! The design follows the classic lazy skip list: per-node exclusive locks,
//! optimistic search with post-lock validation, and two-phase deletion
//! (logical mark, then physical unlink). Readers never take locks; a node is
//! visible exactly when it is fully linked and not marked, which a reader
//! decides with two atomic loads. Unlinked nodes are reclaimed through
//! epoch-based garbage collection so that in-flight readers can finish
//! traversing them safely.
//!
//! # Example
//!
//! ```
//! use nestdb_skiplist::{CancelToken, SkipList};
//!
//! let list: SkipList<String, u32> = SkipList::new();
//! list.upsert("b".to_string(), |_, _| Ok::<_, ()>(2)).unwrap();
//! list.upsert("a".to_string(), |_, _| Ok::<_, ()>(1)).unwrap();
//!
//! assert_eq!(list.find(&"a".to_string()), Some(1));
//!
//! let cancel = CancelToken::new();
//! let pairs = list.entries(&cancel).unwrap();
//! assert_eq!(pairs, vec![("a".to_string(), 1), ("b".to_string(), 2)]);
//! ```

#![warn(missing_docs)]

mod cancel;
mod list;
mod node;

pub use cancel::CancelToken;
pub use list::{QueryError, SkipList};
pub use node::{MAX_LEVEL, PROBABILITY};
