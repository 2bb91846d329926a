//! ObjectIndex: reverse object-to-name map behind the descriptor views.
//!
//! Elements carry a precomputed u64 hash and indexing always uses the
//! stored hash, so the table can relocate elements during its own growth
//! without consulting the entries they describe. Equality probing is the
//! caller's job: the index stores names, and only the space can resolve
//! a name back to the object it is bound to.

use core::hash::{BuildHasher, Hash};
use hashbrown::HashTable;
use std::collections::hash_map::RandomState;

use crate::name::Name;

#[derive(Debug)]
struct IndexEntry {
    hash: u64,
    name: Name,
}

pub(crate) struct ObjectIndex {
    hasher: RandomState,
    table: HashTable<IndexEntry>,
}

impl ObjectIndex {
    pub(crate) fn new() -> Self {
        ObjectIndex {
            hasher: RandomState::new(),
            table: HashTable::new(),
        }
    }

    pub(crate) fn make_hash<O: Hash>(&self, object: &O) -> u64 {
        self.hasher.hash_one(object)
    }

    pub(crate) fn len(&self) -> usize {
        self.table.len()
    }

    /// Find the canonical name bound to an object. `eq` answers whether
    /// the entry under a candidate name is bound to the probed object.
    pub(crate) fn find(&self, hash: u64, mut eq: impl FnMut(Name) -> bool) -> Option<Name> {
        self.table
            .find(hash, |e| e.hash == hash && eq(e.name))
            .map(|e| e.name)
    }

    /// Bind `name` as the canonical holder for an object. If another name
    /// already holds it, that name comes back as the error and the index
    /// is unchanged.
    pub(crate) fn insert(
        &mut self,
        hash: u64,
        name: Name,
        mut eq: impl FnMut(Name) -> bool,
    ) -> Result<(), Name> {
        match self
            .table
            .entry(hash, |e| e.hash == hash && eq(e.name), |e| e.hash)
        {
            hashbrown::hash_table::Entry::Occupied(o) => Err(o.get().name),
            hashbrown::hash_table::Entry::Vacant(v) => {
                let _ = v.insert(IndexEntry { hash, name });
                Ok(())
            }
        }
    }

    /// Bind without probing for duplicates. Only valid when the caller
    /// has already established, under the same lock, that the object has
    /// no canonical name.
    pub(crate) fn insert_unique(&mut self, hash: u64, name: Name) {
        let _ = self
            .table
            .insert_unique(hash, IndexEntry { hash, name }, |e| e.hash);
    }

    /// Unlink a canonical binding. Returns false when `name` was not the
    /// canonical holder (collided entries never are).
    pub(crate) fn remove(&mut self, hash: u64, name: Name) -> bool {
        match self.table.find_entry(hash, |e| e.name == name) {
            Ok(occupied) => {
                occupied.remove();
                true
            }
            Err(_) => false,
        }
    }

    pub(crate) fn clear(&mut self) {
        self.table.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn name(i: u32) -> Name {
        Name::from_parts(i, 1)
    }

    /// Invariant: find resolves through the caller's equality probe, so
    /// only names whose entries still match the object are returned.
    #[test]
    fn find_uses_resolver() {
        let mut idx = ObjectIndex::new();
        let mut bound: HashMap<Name, u64> = HashMap::new();

        let h = idx.make_hash(&42u64);
        idx.insert(h, name(1), |n| bound.get(&n) == Some(&42)).unwrap();
        bound.insert(name(1), 42);

        assert_eq!(idx.find(h, |n| bound.get(&n) == Some(&42)), Some(name(1)));
        let h7 = idx.make_hash(&7u64);
        assert_eq!(idx.find(h7, |n| bound.get(&n) == Some(&7)), None);
    }

    /// Invariant: a second binding of the same object reports the
    /// canonical name and leaves the index unchanged.
    #[test]
    fn duplicate_binding_reports_canonical() {
        let mut idx = ObjectIndex::new();
        let mut bound: HashMap<Name, u64> = HashMap::new();

        let h = idx.make_hash(&9u64);
        idx.insert(h, name(1), |n| bound.get(&n) == Some(&9)).unwrap();
        bound.insert(name(1), 9);

        let err = idx
            .insert(h, name(2), |n| bound.get(&n) == Some(&9))
            .unwrap_err();
        assert_eq!(err, name(1));
        assert_eq!(idx.len(), 1);
    }

    /// Invariant: removal only unlinks the canonical name.
    #[test]
    fn remove_canonical_only() {
        let mut idx = ObjectIndex::new();
        let h = idx.make_hash(&5u64);
        idx.insert_unique(h, name(3));
        assert!(!idx.remove(h, name(4)));
        assert_eq!(idx.len(), 1);
        assert!(idx.remove(h, name(3)));
        assert_eq!(idx.len(), 0);
        assert!(!idx.remove(h, name(3)));
    }
}
