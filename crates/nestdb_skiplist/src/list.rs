//! The concurrent skip list.

use crate::cancel::CancelToken;
use crate::node::{random_level, Node, LEVELS};
use crossbeam_epoch::{self as epoch, Guard, Owned, Shared};
use parking_lot::MutexGuard;
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;

/// Errors surfaced by range scans.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueryError {
    /// The scan's cancellation token fired between traversal steps.
    #[error("scan cancelled")]
    Cancelled,
}

/// A concurrent ordered map.
///
/// `find` is lock-free; `upsert` and `remove` take per-node locks along the
/// insertion/removal path only, validate optimistically, and retry on
/// interference. Removal is lazy: nodes are marked dead under their own
/// lock, then unlinked under their predecessors' locks, and finally freed
/// by the epoch collector once no reader can still be traversing them.
///
/// Locks are only ever acquired in ascending level order on nodes met
/// during a top-down search, with identical predecessors deduplicated, so
/// the lock graph is acyclic and the structure cannot deadlock.
pub struct SkipList<K, V> {
    head: epoch::Atomic<Node<K, V>>,
    tail: epoch::Atomic<Node<K, V>>,
    len: AtomicUsize,
}

/// Outcome of the shared search skeleton: the predecessor and successor at
/// every level, and the highest level at which the target key was seen.
struct Search<'g, K, V> {
    level_found: Option<usize>,
    preds: [Shared<'g, Node<K, V>>; LEVELS],
    succs: [Shared<'g, Node<K, V>>; LEVELS],
}

/// Predecessor locks held during a splice, deduplicated by node identity.
///
/// Adjacent levels frequently share a predecessor; acquiring the same lock
/// twice would self-deadlock. Predecessors arrive in ascending level order,
/// where repeats are always consecutive, so comparing against the most
/// recently locked node suffices. Dropping the set releases every lock.
struct LockSet<'g, K, V> {
    held: Vec<(*const Node<K, V>, MutexGuard<'g, ()>)>,
}

impl<'g, K, V> LockSet<'g, K, V> {
    fn new() -> Self {
        Self {
            held: Vec::with_capacity(LEVELS),
        }
    }

    fn acquire(&mut self, node: Shared<'g, Node<K, V>>) {
        let raw = node.as_raw();
        if self.held.last().map_or(true, |(locked, _)| *locked != raw) {
            // SAFETY: the caller's epoch pin keeps `node` alive for 'g.
            let guard = unsafe { node.deref() }.lock.lock();
            self.held.push((raw, guard));
        }
    }
}

impl<K, V> Default for SkipList<K, V>
where
    K: Ord + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> SkipList<K, V>
where
    K: Ord + Clone,
    V: Clone,
{
    /// Creates an empty list: a head and a tail sentinel linked at every
    /// level.
    pub fn new() -> Self {
        let list = SkipList {
            head: epoch::Atomic::new(Node::head()),
            tail: epoch::Atomic::new(Node::tail()),
            len: AtomicUsize::new(0),
        };
        // SAFETY: the list is not yet shared; nothing concurrent can
        // observe the half-initialised head.
        let guard = unsafe { epoch::unprotected() };
        let tail = list.tail.load(Ordering::Relaxed, guard);
        let head = list.head.load(Ordering::Relaxed, guard);
        for level in 0..LEVELS {
            // SAFETY: `head` was just allocated and is non-null.
            unsafe { head.deref() }.next[level].store(tail, Ordering::Relaxed);
        }
        list
    }

    /// Number of visible entries. Approximate under concurrent mutation.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    /// Whether the list holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Point lookup. Returns a clone of the value if a visible node with
    /// `key` exists at the moment of observation.
    ///
    /// Takes no locks; visibility is decided by two atomic loads of the
    /// matched node's state.
    pub fn find(&self, key: &K) -> Option<V> {
        let guard = &epoch::pin();
        let search = self.search(key, guard);
        let level = search.level_found?;
        // SAFETY: successors returned by `search` are non-null nodes kept
        // alive by the pin.
        let node = unsafe { search.succs[level].deref() };
        if node.fully_linked.load(Ordering::Acquire) && !node.marked.load(Ordering::Acquire) {
            node.read_value()
        } else {
            None
        }
    }

    /// Whether a visible node with `key` exists.
    pub fn contains(&self, key: &K) -> bool {
        self.find(key).is_some()
    }

    /// Inserts or updates the entry for `key`.
    ///
    /// `decide` is consulted with the current value when a visible node
    /// exists (`Some`), or with `None` when the key is absent, and returns
    /// the value to store. If it errors, the list is left untouched and the
    /// error propagates. `decide` may be consulted once per retry attempt
    /// under contention.
    ///
    /// Returns `true` if a new node was inserted, `false` if an existing
    /// node's value was replaced.
    pub fn upsert<E, F>(&self, key: K, mut decide: F) -> Result<bool, E>
    where
        F: FnMut(&K, Option<&V>) -> Result<V, E>,
    {
        let top_level = random_level();
        let guard = &epoch::pin();
        loop {
            let search = self.search(&key, guard);
            if let Some(level) = search.level_found {
                // SAFETY: successor from `search`, alive for the pin.
                let node = unsafe { search.succs[level].deref() };
                if !node.marked.load(Ordering::Acquire) {
                    // A concurrent inserter may still be splicing this node
                    // upward; wait for it to publish.
                    while !node.fully_linked.load(Ordering::Acquire) {
                        std::hint::spin_loop();
                    }
                    let _node_lock = node.lock.lock();
                    if node.marked.load(Ordering::Acquire) {
                        // Removed between the search and the lock.
                        continue;
                    }
                    let slot = match node.value.as_ref() {
                        Some(slot) => slot,
                        // Sentinels are never found by key.
                        None => continue,
                    };
                    let replacement = {
                        let current = slot.read();
                        decide(&key, Some(&*current))?
                    };
                    *slot.write() = replacement;
                    return Ok(false);
                }
                // Marked but still linked: its remover is mid-unlink. The
                // validation below would reject the splice anyway, so spin
                // until the node is gone.
                std::hint::spin_loop();
                continue;
            }

            let value = decide(&key, None)?;

            let mut locked = LockSet::new();
            let mut valid = true;
            for level in 0..=top_level {
                let pred = search.preds[level];
                let succ = search.succs[level];
                locked.acquire(pred);
                // SAFETY: preds/succs from `search`, alive for the pin.
                let pred_ref = unsafe { pred.deref() };
                let succ_ref = unsafe { succ.deref() };
                valid = !pred_ref.marked.load(Ordering::Acquire)
                    && !succ_ref.marked.load(Ordering::Acquire)
                    && pred_ref.next[level].load(Ordering::Acquire, guard) == succ;
                if !valid {
                    break;
                }
            }
            if !valid {
                // A neighbour changed under us; drop the locks and retry.
                continue;
            }

            let node = Node::data(key.clone(), value, top_level);
            for level in 0..=top_level {
                node.next[level].store(search.succs[level], Ordering::Relaxed);
            }
            let node = Owned::new(node).into_shared(guard);
            for level in 0..=top_level {
                // SAFETY: predecessors are locked and validated; splicing
                // bottom-up keeps every level-0-reachable chain sorted.
                unsafe { search.preds[level].deref() }.next[level].store(node, Ordering::Release);
            }
            // SAFETY: `node` was just allocated above.
            unsafe { node.deref() }
                .fully_linked
                .store(true, Ordering::Release);
            self.len.fetch_add(1, Ordering::Relaxed);
            return Ok(true);
        }
    }

    /// Removes the entry for `key`, returning its last value.
    ///
    /// Removal is lazy: the victim is marked dead under its own lock (the
    /// linearisation point), then unlinked at every level under its
    /// predecessors' locks, and finally handed to the epoch collector. Of
    /// any number of concurrent removers of the same key, exactly one
    /// returns the value.
    pub fn remove(&self, key: &K) -> Option<V> {
        let guard = &epoch::pin();
        let mut victim: Shared<'_, Node<K, V>> = Shared::null();
        let mut victim_lock: Option<MutexGuard<'_, ()>> = None;
        let mut top_level = 0;
        loop {
            let search = self.search(key, guard);
            if victim_lock.is_none() {
                let level = match search.level_found {
                    Some(level) => level,
                    None => return None,
                };
                let candidate = search.succs[level];
                // SAFETY: successor from `search`, alive for the pin.
                let node = unsafe { candidate.deref() };
                // The candidate must be seen at its apex: a lower-level
                // sighting can race an insert that has not yet linked the
                // node to its top level, and marking it then would strand
                // the upper links.
                if !node.fully_linked.load(Ordering::Acquire)
                    || node.marked.load(Ordering::Acquire)
                    || node.top_level != level
                {
                    return None;
                }
                let lock = node.lock.lock();
                if node.marked.load(Ordering::Acquire) {
                    // Another remover won the race.
                    return None;
                }
                node.marked.store(true, Ordering::Release);
                victim = candidate;
                victim_lock = Some(lock);
                top_level = node.top_level;
            }

            let mut locked = LockSet::new();
            let mut valid = true;
            for level in 0..=top_level {
                let pred = search.preds[level];
                locked.acquire(pred);
                // SAFETY: predecessor from `search`, alive for the pin.
                let pred_ref = unsafe { pred.deref() };
                valid = !pred_ref.marked.load(Ordering::Acquire)
                    && pred_ref.next[level].load(Ordering::Acquire, guard) == victim;
                if !valid {
                    break;
                }
            }
            if !valid {
                // Predecessors moved; re-search while keeping the mark.
                continue;
            }

            // SAFETY: `victim` was captured from a successful search.
            let victim_ref = unsafe { victim.deref() };
            for level in (0..=top_level).rev() {
                let succ = victim_ref.next[level].load(Ordering::Acquire, guard);
                // SAFETY: predecessors are locked and validated.
                unsafe { search.preds[level].deref() }.next[level].store(succ, Ordering::Release);
            }
            let value = victim_ref.read_value();
            drop(victim_lock);
            drop(locked);
            self.len.fetch_sub(1, Ordering::Relaxed);
            // SAFETY: the victim is unlinked at every level, so no new
            // traversal can reach it; the collector frees it once every
            // current pin has retired.
            unsafe { guard.defer_destroy(victim) };
            return value;
        }
    }

    /// Ordered scan of the closed key range `[start, end]`.
    ///
    /// The scan is weakly consistent: it walks the live level-0 chain, so
    /// concurrent inserts and removes may or may not be observed, but every
    /// emitted pair existed at the moment it was traversed, keys ascend,
    /// and no pair is emitted twice. The cancellation token is checked
    /// between successor reads.
    pub fn query(
        &self,
        cancel: &CancelToken,
        start: &K,
        end: &K,
    ) -> Result<Vec<(K, V)>, QueryError> {
        self.scan(cancel, Some(start), Some(end))
    }

    /// Ordered scan of every entry, with the same consistency and
    /// cancellation behaviour as [`query`](Self::query).
    pub fn entries(&self, cancel: &CancelToken) -> Result<Vec<(K, V)>, QueryError> {
        self.scan(cancel, None, None)
    }

    fn scan(
        &self,
        cancel: &CancelToken,
        start: Option<&K>,
        end: Option<&K>,
    ) -> Result<Vec<(K, V)>, QueryError> {
        let guard = &epoch::pin();
        let mut current = match start {
            Some(start) => self.search(start, guard).succs[0],
            None => {
                let head = self.head.load(Ordering::Acquire, guard);
                // SAFETY: the head sentinel lives as long as the list.
                unsafe { head.deref() }.next[0].load(Ordering::Acquire, guard)
            }
        };
        let mut results = Vec::new();
        loop {
            if cancel.is_cancelled() {
                return Err(QueryError::Cancelled);
            }
            // SAFETY: every chain terminates at the tail sentinel before
            // any null pointer, and the pin keeps traversed nodes alive.
            let node = unsafe { current.deref() };
            let key = match node.key() {
                Some(key) => key,
                None => break, // tail sentinel
            };
            if let Some(end) = end {
                if key > end {
                    break;
                }
            }
            if node.fully_linked.load(Ordering::Acquire) && !node.marked.load(Ordering::Acquire) {
                if let Some(value) = node.read_value() {
                    results.push((key.clone(), value));
                }
            }
            current = node.next[0].load(Ordering::Acquire, guard);
        }
        Ok(results)
    }

    /// Shared search skeleton: from the head at the top level, advance
    /// while the successor orders strictly before `key`, then descend.
    fn search<'g>(&self, key: &K, guard: &'g Guard) -> Search<'g, K, V> {
        let mut level_found = None;
        let mut preds = [Shared::null(); LEVELS];
        let mut succs = [Shared::null(); LEVELS];
        let mut pred = self.head.load(Ordering::Acquire, guard);
        for level in (0..LEVELS).rev() {
            // SAFETY: `pred` is the head sentinel or a node reached through
            // guarded loads; the pin keeps it alive. Chains terminate at
            // the tail sentinel, so successors are never null.
            let mut curr = unsafe { pred.deref() }.next[level].load(Ordering::Acquire, guard);
            loop {
                let curr_ref = unsafe { curr.deref() };
                if !curr_ref.is_before(key) {
                    break;
                }
                pred = curr;
                curr = curr_ref.next[level].load(Ordering::Acquire, guard);
            }
            if level_found.is_none() && unsafe { curr.deref() }.key_is(key) {
                level_found = Some(level);
            }
            preds[level] = pred;
            succs[level] = curr;
        }
        Search {
            level_found,
            preds,
            succs,
        }
    }
}

impl<K, V> Drop for SkipList<K, V> {
    fn drop(&mut self) {
        // SAFETY: `&mut self` guarantees no concurrent accessor. Walking
        // the level-0 chain visits every still-linked node exactly once;
        // nodes unlinked earlier were handed to the collector already.
        unsafe {
            let guard = epoch::unprotected();
            let mut current = self.head.load(Ordering::Relaxed, guard);
            while !current.is_null() {
                let next = current.deref().next[0].load(Ordering::Relaxed, guard);
                drop(current.into_owned());
                current = next;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn insert(list: &SkipList<u32, String>, key: u32, value: &str) {
        let inserted = list
            .upsert::<(), _>(key, |_, _| Ok(value.to_string()))
            .unwrap();
        assert!(inserted);
    }

    #[test]
    fn find_on_empty() {
        let list: SkipList<u32, String> = SkipList::new();
        assert_eq!(list.find(&1), None);
        assert!(list.is_empty());
    }

    #[test]
    fn insert_and_find() {
        let list = SkipList::new();
        insert(&list, 3, "three");
        insert(&list, 1, "one");
        insert(&list, 2, "two");

        assert_eq!(list.find(&1), Some("one".to_string()));
        assert_eq!(list.find(&2), Some("two".to_string()));
        assert_eq!(list.find(&3), Some("three".to_string()));
        assert_eq!(list.find(&4), None);
        assert_eq!(list.len(), 3);
    }

    #[test]
    fn upsert_updates_in_place() {
        let list = SkipList::new();
        insert(&list, 1, "first");

        let inserted = list
            .upsert::<(), _>(1, |_, current| {
                assert_eq!(current.map(String::as_str), Some("first"));
                Ok("second".to_string())
            })
            .unwrap();

        assert!(!inserted);
        assert_eq!(list.find(&1), Some("second".to_string()));
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn decide_error_leaves_list_unchanged() {
        let list = SkipList::new();
        insert(&list, 1, "kept");

        let err = list
            .upsert::<&str, _>(2, |_, _| Err("no"))
            .unwrap_err();
        assert_eq!(err, "no");
        assert_eq!(list.find(&2), None);

        let err = list
            .upsert::<&str, _>(1, |_, _| Err("still no"))
            .unwrap_err();
        assert_eq!(err, "still no");
        assert_eq!(list.find(&1), Some("kept".to_string()));
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn remove_present_and_absent() {
        let list = SkipList::new();
        insert(&list, 1, "one");

        assert_eq!(list.remove(&1), Some("one".to_string()));
        assert_eq!(list.find(&1), None);
        assert_eq!(list.remove(&1), None);
        assert!(list.is_empty());
    }

    #[test]
    fn reinsert_after_remove() {
        let list = SkipList::new();
        insert(&list, 1, "old");
        list.remove(&1);
        insert(&list, 1, "new");

        assert_eq!(list.find(&1), Some("new".to_string()));
    }

    #[test]
    fn query_respects_bounds_and_order() {
        let list = SkipList::new();
        for key in [5u32, 1, 9, 3, 7] {
            insert(&list, key, &key.to_string());
        }

        let cancel = CancelToken::new();
        let pairs = list.query(&cancel, &3, &7).unwrap();
        let keys: Vec<u32> = pairs.iter().map(|(key, _)| *key).collect();
        assert_eq!(keys, vec![3, 5, 7]);
    }

    #[test]
    fn query_empty_range() {
        let list = SkipList::new();
        insert(&list, 1, "one");
        insert(&list, 9, "nine");

        let cancel = CancelToken::new();
        let pairs = list.query(&cancel, &2, &8).unwrap();
        assert!(pairs.is_empty());
    }

    #[test]
    fn entries_scans_everything_in_order() {
        let list = SkipList::new();
        for key in [4u32, 2, 8, 6] {
            insert(&list, key, &key.to_string());
        }

        let cancel = CancelToken::new();
        let keys: Vec<u32> = list
            .entries(&cancel)
            .unwrap()
            .into_iter()
            .map(|(key, _)| key)
            .collect();
        assert_eq!(keys, vec![2, 4, 6, 8]);
    }

    #[test]
    fn cancelled_scan_errors() {
        let list = SkipList::new();
        insert(&list, 1, "one");

        let cancel = CancelToken::new();
        cancel.cancel();
        assert_eq!(list.entries(&cancel), Err(QueryError::Cancelled));
    }

    #[test]
    fn removed_keys_vanish_from_scans() {
        let list = SkipList::new();
        for key in 0u32..10 {
            insert(&list, key, "x");
        }
        for key in (0u32..10).step_by(2) {
            list.remove(&key);
        }

        let cancel = CancelToken::new();
        let keys: Vec<u32> = list
            .entries(&cancel)
            .unwrap()
            .into_iter()
            .map(|(key, _)| key)
            .collect();
        assert_eq!(keys, vec![1, 3, 5, 7, 9]);
        assert_eq!(list.len(), 5);
    }

    #[test]
    fn string_keys() {
        let list: SkipList<String, u32> = SkipList::new();
        for (key, value) in [("delta", 4u32), ("alpha", 1), ("charlie", 3), ("bravo", 2)] {
            list.upsert::<(), _>(key.to_string(), |_, _| Ok(value))
                .unwrap();
        }

        let cancel = CancelToken::new();
        let keys: Vec<String> = list
            .entries(&cancel)
            .unwrap()
            .into_iter()
            .map(|(key, _)| key)
            .collect();
        assert_eq!(keys, vec!["alpha", "bravo", "charlie", "delta"]);
    }
}
