//! Skip list nodes and sentinels.

use crossbeam_epoch::Atomic;
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use std::sync::atomic::AtomicBool;

/// Highest forward-pointer level a node may occupy (levels are
/// `0..=MAX_LEVEL`).
pub const MAX_LEVEL: usize = 4;

/// Number of forward-pointer levels.
pub(crate) const LEVELS: usize = MAX_LEVEL + 1;

/// Branching probability for the geometric level draw.
pub const PROBABILITY: f64 = 0.5;

/// Where a node sits in the key order.
///
/// Sentinels are identified by explicit variants rather than by artificial
/// minimum/maximum key values, so the key type needs no distinguished
/// extremes.
pub(crate) enum Anchor<K> {
    /// Head sentinel, ordered strictly before every key.
    Head,
    /// A real entry.
    Key(K),
    /// Tail sentinel, ordered strictly after every key.
    Tail,
}

/// A single node.
///
/// The key is immutable after construction. The value slot is replaced only
/// while `lock` is held; `marked` and `fully_linked` are likewise written
/// only under `lock`, but may be read without it. Forward pointers at level
/// `i` are written only under the lock of the node that owns them.
pub(crate) struct Node<K, V> {
    pub(crate) anchor: Anchor<K>,
    pub(crate) value: Option<RwLock<V>>,
    pub(crate) top_level: usize,
    pub(crate) lock: Mutex<()>,
    pub(crate) marked: AtomicBool,
    pub(crate) fully_linked: AtomicBool,
    pub(crate) next: Vec<Atomic<Node<K, V>>>,
}

impl<K, V> Node<K, V> {
    pub(crate) fn head() -> Self {
        Self::sentinel(Anchor::Head)
    }

    pub(crate) fn tail() -> Self {
        Self::sentinel(Anchor::Tail)
    }

    fn sentinel(anchor: Anchor<K>) -> Self {
        Node {
            anchor,
            value: None,
            top_level: MAX_LEVEL,
            lock: Mutex::new(()),
            marked: AtomicBool::new(false),
            fully_linked: AtomicBool::new(true),
            next: (0..LEVELS).map(|_| Atomic::null()).collect(),
        }
    }

    pub(crate) fn data(key: K, value: V, top_level: usize) -> Self {
        Node {
            anchor: Anchor::Key(key),
            value: Some(RwLock::new(value)),
            top_level,
            lock: Mutex::new(()),
            marked: AtomicBool::new(false),
            fully_linked: AtomicBool::new(false),
            next: (0..=top_level).map(|_| Atomic::null()).collect(),
        }
    }

    pub(crate) fn key(&self) -> Option<&K> {
        match &self.anchor {
            Anchor::Key(key) => Some(key),
            Anchor::Head | Anchor::Tail => None,
        }
    }
}

impl<K: Ord, V> Node<K, V> {
    /// Whether this node orders strictly before `key`.
    pub(crate) fn is_before(&self, key: &K) -> bool {
        match &self.anchor {
            Anchor::Head => true,
            Anchor::Key(own) => own < key,
            Anchor::Tail => false,
        }
    }

    /// Whether this node carries exactly `key`. Sentinels carry no key.
    pub(crate) fn key_is(&self, key: &K) -> bool {
        matches!(&self.anchor, Anchor::Key(own) if own == key)
    }
}

impl<K, V: Clone> Node<K, V> {
    /// Clones the current value out of the slot. Sentinels have none.
    pub(crate) fn read_value(&self) -> Option<V> {
        self.value.as_ref().map(|slot| slot.read().clone())
    }
}

/// Draws a top level from the geometric distribution with parameter
/// [`PROBABILITY`], capped at [`MAX_LEVEL`].
pub(crate) fn random_level() -> usize {
    let mut rng = rand::thread_rng();
    let mut level = 0;
    while level < MAX_LEVEL && rng.gen_bool(PROBABILITY) {
        level += 1;
    }
    level
}
