//! NameTree: splay-tree overflow storage for sparse names.
//!
//! Names whose index falls beyond the table horizon land here, keyed by
//! the full 64-bit name. Nodes live in a slotmap arena and link by key,
//! so a resident entry is reachable in O(1) once its node key is known.
//!
//! Mutating operations splay the touched key to the root (the classic
//! top-down restructuring), which keeps repeatedly-used regions cheap.
//! Lookups through a shared reference descend without restructuring so
//! they can run under a read lock.

use crate::entry::Entry;
use crate::name::Name;
use slotmap::{DefaultKey, SlotMap};

#[derive(Debug)]
struct TreeNode<O> {
    name: Name,
    entry: Entry<O>,
    left: Option<DefaultKey>,
    right: Option<DefaultKey>,
}

#[derive(Debug)]
pub(crate) struct NameTree<O> {
    nodes: SlotMap<DefaultKey, TreeNode<O>>,
    root: Option<DefaultKey>,
}

impl<O> Default for NameTree<O> {
    fn default() -> Self {
        Self::new()
    }
}

impl<O> NameTree<O> {
    pub(crate) fn new() -> Self {
        NameTree {
            nodes: SlotMap::with_key(),
            root: None,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Top-down splay: after this, the root is either the node for `key`
    /// or the last node visited on the search path.
    fn splay(&mut self, key: u64) {
        let Some(mut t) = self.root else { return };
        // Detached assembly chains. The left chain collects nodes smaller
        // than the key (linked by their right pointers); the right chain
        // collects larger nodes (linked by their left pointers).
        let mut left_head: Option<DefaultKey> = None;
        let mut left_tail: Option<DefaultKey> = None;
        let mut right_head: Option<DefaultKey> = None;
        let mut right_tail: Option<DefaultKey> = None;

        loop {
            let t_key = self.nodes[t].name.raw();
            if key < t_key {
                let Some(tl) = self.nodes[t].left else { break };
                let mut child = tl;
                if key < self.nodes[child].name.raw() {
                    // Rotate right.
                    let child_right = self.nodes[child].right;
                    self.nodes[t].left = child_right;
                    self.nodes[child].right = Some(t);
                    t = child;
                    let Some(next) = self.nodes[t].left else { break };
                    child = next;
                }
                // Link t into the right chain.
                match right_tail {
                    None => right_head = Some(t),
                    Some(rt) => self.nodes[rt].left = Some(t),
                }
                right_tail = Some(t);
                t = child;
            } else if key > t_key {
                let Some(tr) = self.nodes[t].right else { break };
                let mut child = tr;
                if key > self.nodes[child].name.raw() {
                    // Rotate left.
                    let child_left = self.nodes[child].left;
                    self.nodes[t].right = child_left;
                    self.nodes[child].left = Some(t);
                    t = child;
                    let Some(next) = self.nodes[t].right else { break };
                    child = next;
                }
                // Link t into the left chain.
                match left_tail {
                    None => left_head = Some(t),
                    Some(lt) => self.nodes[lt].right = Some(t),
                }
                left_tail = Some(t);
                t = child;
            } else {
                break;
            }
        }

        // Reassemble: chains become the root's subtrees, with the root's
        // own subtrees hung off the chain tails.
        if let Some(lt) = left_tail {
            let t_left = self.nodes[t].left;
            self.nodes[lt].right = t_left;
            self.nodes[t].left = left_head;
        }
        if let Some(rt) = right_tail {
            let t_right = self.nodes[t].right;
            self.nodes[rt].left = t_right;
            self.nodes[t].right = right_head;
        }
        self.root = Some(t);
    }

    pub(crate) fn find_key(&self, name: Name) -> Option<DefaultKey> {
        let key = name.raw();
        let mut cur = self.root;
        while let Some(k) = cur {
            let node = &self.nodes[k];
            let nk = node.name.raw();
            cur = if key < nk {
                node.left
            } else if key > nk {
                node.right
            } else {
                return Some(k);
            };
        }
        None
    }

    /// Non-restructuring lookup, usable under a shared borrow.
    pub(crate) fn get(&self, name: Name) -> Option<&Entry<O>> {
        self.find_key(name).map(|k| &self.nodes[k].entry)
    }

    pub(crate) fn get_mut(&mut self, name: Name) -> Option<&mut Entry<O>> {
        let k = self.find_key(name)?;
        Some(&mut self.nodes[k].entry)
    }

    pub(crate) fn node_entry(&self, key: DefaultKey) -> &Entry<O> {
        &self.nodes[key].entry
    }

    pub(crate) fn node_entry_mut(&mut self, key: DefaultKey) -> &mut Entry<O> {
        &mut self.nodes[key].entry
    }

    /// Insert an entry under `name`. On success the new node is the root
    /// and its arena key is returned; if the name is already present the
    /// entry comes back unchanged.
    pub(crate) fn insert(&mut self, name: Name, entry: Entry<O>) -> Result<DefaultKey, Entry<O>> {
        let key = name.raw();
        if self.root.is_none() {
            let k = self.nodes.insert(TreeNode {
                name,
                entry,
                left: None,
                right: None,
            });
            self.root = Some(k);
            return Ok(k);
        }
        self.splay(key);
        let r = self.root.unwrap();
        let r_key = self.nodes[r].name.raw();
        if r_key == key {
            return Err(entry);
        }
        // Split the old root around the new node.
        let (left, right) = if key < r_key {
            let rl = self.nodes[r].left.take();
            (rl, Some(r))
        } else {
            let rr = self.nodes[r].right.take();
            (Some(r), rr)
        };
        let k = self.nodes.insert(TreeNode {
            name,
            entry,
            left,
            right,
        });
        self.root = Some(k);
        Ok(k)
    }

    /// Remove the entry under `name`, if present.
    pub(crate) fn remove(&mut self, name: Name) -> Option<Entry<O>> {
        let key = name.raw();
        self.splay(key);
        let r = self.root?;
        if self.nodes[r].name != name {
            return None;
        }
        let node = self.nodes.remove(r).unwrap();
        match node.left {
            None => self.root = node.right,
            Some(l) => {
                // Splaying the removed key in the left subtree brings its
                // maximum to the root, which then has no right child.
                self.root = Some(l);
                self.splay(key);
                let nr = self.root.unwrap();
                debug_assert!(self.nodes[nr].right.is_none());
                self.nodes[nr].right = node.right;
            }
        }
        Some(node.entry)
    }

    /// In-order traversal (ascending raw-name order).
    pub(crate) fn for_each(&self, mut f: impl FnMut(Name, &Entry<O>)) {
        let mut stack: Vec<DefaultKey> = Vec::new();
        let mut cur = self.root;
        while cur.is_some() || !stack.is_empty() {
            while let Some(k) = cur {
                stack.push(k);
                cur = self.nodes[k].left;
            }
            let k = stack.pop().unwrap();
            f(self.nodes[k].name, &self.nodes[k].entry);
            cur = self.nodes[k].right;
        }
    }

    /// Consume the tree in order, handing each entry to `f`.
    pub(crate) fn drain(mut self, mut f: impl FnMut(Name, Entry<O>)) {
        let mut keys: Vec<DefaultKey> = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<DefaultKey> = Vec::new();
        let mut cur = self.root;
        while cur.is_some() || !stack.is_empty() {
            while let Some(k) = cur {
                stack.push(k);
                cur = self.nodes[k].left;
            }
            let k = stack.pop().unwrap();
            keys.push(k);
            cur = self.nodes[k].right;
        }
        for k in keys {
            let node = self.nodes.remove(k).unwrap();
            f(node.name, node.entry);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::right::RightType;
    use std::collections::BTreeMap;

    fn name(i: u64) -> Name {
        Name::from_raw(i)
    }

    fn entry(v: u64) -> Entry<u64> {
        let mut e = Entry::fresh(RightType::None);
        e.urefs = v as u32;
        e
    }

    /// Invariant: insert/get/remove agree with an ordered-map model over
    /// a scripted mix of ascending, descending, and interleaved keys.
    #[test]
    fn model_agreement() {
        let mut t: NameTree<u64> = NameTree::new();
        let mut model: BTreeMap<u64, u32> = BTreeMap::new();

        let keys: Vec<u64> = (0..40)
            .map(|i| if i % 2 == 0 { 1000 + i } else { 2000 - i })
            .collect();
        for (v, &k) in keys.iter().enumerate() {
            assert!(t.insert(name(k), entry(v as u64)).is_ok());
            model.insert(k, v as u32);
        }
        for &k in &keys {
            assert_eq!(t.get(name(k)).map(|e| e.urefs()), model.get(&k).copied());
        }
        assert!(t.get(name(1)).is_none());

        for &k in keys.iter().step_by(3) {
            assert_eq!(t.remove(name(k)).map(|e| e.urefs()), model.remove(&k));
        }
        for &k in &keys {
            assert_eq!(t.get(name(k)).map(|e| e.urefs()), model.get(&k).copied());
        }
        assert_eq!(t.len(), model.len());
    }

    /// Invariant: duplicate insertion returns the entry unchanged and
    /// leaves the resident one in place.
    #[test]
    fn duplicate_insert_rejected() {
        let mut t: NameTree<u64> = NameTree::new();
        t.insert(name(5), entry(1)).unwrap();
        let e = match t.insert(name(5), entry(2)) {
            Err(e) => e,
            Ok(_) => panic!("expected duplicate insert to fail"),
        };
        assert_eq!(e.urefs(), 2);
        assert_eq!(t.get(name(5)).unwrap().urefs(), 1);
        assert_eq!(t.len(), 1);
    }

    /// Invariant: removal of an absent key is a no-op returning None.
    #[test]
    fn remove_absent() {
        let mut t: NameTree<u64> = NameTree::new();
        assert!(t.remove(name(3)).is_none());
        t.insert(name(3), entry(1)).unwrap();
        assert!(t.remove(name(4)).is_none());
        assert_eq!(t.len(), 1);
    }

    /// Invariant: removing a node with two children keeps both subtrees
    /// reachable.
    #[test]
    fn remove_with_two_children() {
        let mut t: NameTree<u64> = NameTree::new();
        for k in [50u64, 25, 75, 10, 30, 60, 90] {
            t.insert(name(k), entry(k)).unwrap();
        }
        // Splay 50 back to the root so it has children on both sides.
        assert!(t.get(name(50)).is_some());
        t.splay(50);
        assert!(t.remove(name(50)).is_some());
        for k in [25u64, 75, 10, 30, 60, 90] {
            assert!(t.get(name(k)).is_some(), "lost key {k}");
        }
        assert_eq!(t.len(), 6);
    }

    /// Invariant: mutating operations splay the touched key to the root.
    #[test]
    fn splay_moves_to_root() {
        let mut t: NameTree<u64> = NameTree::new();
        for k in 1..=20u64 {
            t.insert(name(k), entry(k)).unwrap();
            assert_eq!(t.nodes[t.root.unwrap()].name, name(k));
        }
        t.splay(7);
        assert_eq!(t.nodes[t.root.unwrap()].name, name(7));
    }

    /// Invariant: traversal is in ascending raw-name order and visits
    /// every node once.
    #[test]
    fn in_order_traversal() {
        let mut t: NameTree<u64> = NameTree::new();
        let keys = [9u64, 3, 7, 1, 8, 2, 6, 4, 5];
        for &k in &keys {
            t.insert(name(k), entry(k)).unwrap();
        }
        let mut seen = Vec::new();
        t.for_each(|n, _| seen.push(n.raw()));
        assert_eq!(seen, vec![1, 2, 3, 4, 5, 6, 7, 8, 9]);
    }

    /// Invariant: drain hands back every entry in order and consumes the
    /// tree's storage.
    #[test]
    fn drain_in_order() {
        let mut t: NameTree<u64> = NameTree::new();
        for k in [4u64, 2, 6, 1, 3, 5, 7] {
            t.insert(name(k), entry(k)).unwrap();
        }
        let mut seen = Vec::new();
        t.drain(|n, e| seen.push((n.raw(), e.urefs())));
        assert_eq!(
            seen,
            vec![(1, 1), (2, 2), (3, 3), (4, 4), (5, 5), (6, 6), (7, 7)]
        );
    }
}
