//! Keyed two-generation content-hash store.
//!
//! `reset` opens a new snapshot generation; `set` upserts into it;
//! `changes` compares the open generation against the previous one and
//! yields created and deleted entries. A key whose content hash changed
//! appears in both lists, old value under deleted and new value under
//! created, which is what turns in-place updates into delete+create pairs
//! downstream.
//!
//! Not thread-safe; callers serialize through the reconciler lock.

use std::collections::BTreeMap;
use std::ops::Bound;

#[derive(Clone, Debug, PartialEq)]
pub struct Entry<V> {
    pub key: String,
    pub hash: u64,
    pub value: V,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Changes<V> {
    /// Keys absent from the previous generation, plus keys whose hash
    /// changed (reported with the current value).
    pub created: Vec<Entry<V>>,
    /// Keys not re-set in the current generation, plus keys whose hash
    /// changed (reported with the previous value).
    pub deleted: Vec<Entry<V>>,
}

#[derive(Debug, Default)]
pub struct DiffStore<V> {
    current: BTreeMap<String, (u64, V)>,
    previous: BTreeMap<String, (u64, V)>,
}

impl<V: Clone> DiffStore<V> {
    pub fn new() -> Self {
        DiffStore {
            current: BTreeMap::new(),
            previous: BTreeMap::new(),
        }
    }

    /// Begin a new snapshot generation. Entries of the finished generation
    /// become the comparison baseline; anything not re-set before the next
    /// [`DiffStore::changes`] call is reported as deleted.
    pub fn reset(&mut self) {
        self.previous = std::mem::take(&mut self.current);
    }

    /// Upsert a record for the current generation. At most one entry per key
    /// per snapshot; the last write wins.
    pub fn set(&mut self, key: impl Into<String>, hash: u64, value: V) {
        self.current.insert(key.into(), (hash, value));
    }

    /// Compare the current generation against the previous one. Idempotent
    /// until the next [`DiffStore::reset`].
    pub fn changes(&self) -> Changes<V> {
        let mut changes = Changes {
            created: Vec::new(),
            deleted: Vec::new(),
        };
        for (key, (hash, value)) in &self.current {
            match self.previous.get(key) {
                Some((prev_hash, _)) if prev_hash == hash => {}
                _ => changes.created.push(Entry {
                    key: key.clone(),
                    hash: *hash,
                    value: value.clone(),
                }),
            }
        }
        for (key, (hash, value)) in &self.previous {
            match self.current.get(key) {
                Some((cur_hash, _)) if cur_hash == hash => {}
                _ => changes.deleted.push(Entry {
                    key: key.clone(),
                    hash: *hash,
                    value: value.clone(),
                }),
            }
        }
        changes
    }

    /// Entries of the current generation whose key starts with `prefix`, in
    /// key order.
    pub fn get_by_prefix(&self, prefix: &str) -> Vec<Entry<V>> {
        self.current
            .range::<str, _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, (hash, value))| Entry {
                key: k.clone(),
                hash: *hash,
                value: value.clone(),
            })
            .collect()
    }

    /// Drop a key from both generations so it is neither compared against
    /// nor reported again. Used by the planner once a deletion is handled.
    pub fn delete(&mut self, key: &str) {
        self.current.remove(key);
        self.previous.remove(key);
    }

    pub fn len(&self) -> usize {
        self.current.len()
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn store_with(entries: &[(&str, u64, &str)]) -> DiffStore<String> {
        let mut store = DiffStore::new();
        for (key, hash, value) in entries {
            store.set(*key, *hash, value.to_string());
        }
        store
    }

    fn keys<V>(entries: &[Entry<V>]) -> Vec<&str> {
        entries.iter().map(|e| e.key.as_str()).collect()
    }

    #[test]
    fn test_first_generation_is_all_created() {
        let store = store_with(&[("a", 1, "va"), ("b", 2, "vb")]);
        let changes = store.changes();
        assert_eq!(keys(&changes.created), vec!["a", "b"]);
        assert!(changes.deleted.is_empty());
    }

    #[test]
    fn test_identical_snapshot_is_quiet() {
        let mut store = store_with(&[("a", 1, "va")]);
        store.reset();
        store.set("a", 1, "va".to_string());
        let changes = store.changes();
        assert!(changes.created.is_empty());
        assert!(changes.deleted.is_empty());
    }

    #[test]
    fn test_missing_key_is_deleted() {
        let mut store = store_with(&[("a", 1, "va"), ("b", 2, "vb")]);
        store.reset();
        store.set("a", 1, "va".to_string());
        let changes = store.changes();
        assert!(changes.created.is_empty());
        assert_eq!(keys(&changes.deleted), vec!["b"]);
        assert_eq!(changes.deleted[0].value, "vb");
    }

    #[test]
    fn test_changed_hash_reports_both_sides() {
        let mut store = store_with(&[("a", 1, "old")]);
        store.reset();
        store.set("a", 9, "new".to_string());
        let changes = store.changes();
        assert_eq!(keys(&changes.created), vec!["a"]);
        assert_eq!(changes.created[0].value, "new");
        assert_eq!(keys(&changes.deleted), vec!["a"]);
        assert_eq!(changes.deleted[0].value, "old");
        // disjoint when compared by key and hash
        assert_ne!(changes.created[0].hash, changes.deleted[0].hash);
    }

    #[test]
    fn test_changes_idempotent_until_reset() {
        let mut store = store_with(&[("a", 1, "va")]);
        store.reset();
        assert_eq!(store.changes(), store.changes());
    }

    #[test]
    fn test_delete_prevents_reappearance() {
        let mut store = store_with(&[("a", 1, "va")]);
        store.reset();
        // key vanished; planner handles the deletion and drops it
        assert_eq!(keys(&store.changes().deleted), vec!["a"]);
        store.delete("a");
        assert!(store.changes().deleted.is_empty());

        store.reset();
        assert!(store.changes().deleted.is_empty());
    }

    #[test]
    fn test_get_by_prefix() {
        let store = store_with(&[
            ("100||10.0.0.1", 1, "a"),
            ("100||10.0.0.2", 2, "b"),
            ("1001||10.0.0.3", 3, "c"),
            ("200||10.0.0.4", 4, "d"),
        ]);
        let hits = store.get_by_prefix("100||");
        assert_eq!(keys(&hits), vec!["100||10.0.0.1", "100||10.0.0.2"]);
        assert!(store.get_by_prefix("300").is_empty());
    }

    #[test]
    fn test_last_write_wins_within_generation() {
        let mut store = DiffStore::new();
        store.set("a", 1, "first".to_string());
        store.set("a", 2, "second".to_string());
        let changes = store.changes();
        assert_eq!(changes.created.len(), 1);
        assert_eq!(changes.created[0].value, "second");
    }
}
