//! Space: the user-facing capability name space.
//!
//! One reader/writer lock guards the structural state (table, tree,
//! reverse index, lifecycle flags). Lookups run under the read lock;
//! allocation, deallocation, binding, growth publishes, and teardown run
//! under the write lock. The table-growth allocation itself runs
//! unlocked, claimed by the `growing` flag; destroy waits out an
//! in-flight grower through the injected `WaitWake` seam.
//!
//! The space's reference count is the `Arc` strong count of its record,
//! so counting never contends with the structural lock. An active space
//! holds one reference to itself (the active-state reference, a linear
//! keepalive token); `destroy` returns it. Dropping every handle to an
//! active space therefore leaks the record rather than tearing it down —
//! destroy first.
//!
//! The `EntryRef`/`EntryMut` guards hold the lock they were minted
//! under. Calling other methods of the same space while holding one
//! deadlocks; the locks are not reentrant.

use core::fmt;
use core::hash::Hash;
use parking_lot::{MappedRwLockReadGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use slotmap::DefaultKey;
use std::sync::Arc;

use crate::entry::{Entry, RequestIndex, Target, UREFS_MAX};
use crate::index::ObjectIndex;
use crate::keepalive::{ArcCount, Token};
use crate::name::Name;
use crate::right::{DropCleanup, RightCleanup, RightType};
use crate::table::{EntryTable, StagedTable};
use crate::tree::NameTree;
use crate::wait::{CondvarWait, WaitToken, WaitWake};

/// Failures surfaced by space operations. Structural invariant breaks
/// are not errors; they panic.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum SpaceError {
    /// An allocation failed, or the table is at its configured maximum.
    ResourceShortage,
    /// The table free list is empty (thin allocation only; `entry_alloc`
    /// turns this into growth).
    NoRoom,
    /// Explicit-name allocation hit an occupied slot or tree position.
    NameInUse,
    /// The name does not resolve; stale generations land here too.
    NameNotFound,
    /// The null name, or an explicit allocation at the reserved index.
    InvalidName,
    /// The entry's right or binding does not fit the operation.
    InvalidRight,
    /// A reference delta would take the count below zero.
    InvalidValue,
    /// The user-reference count would exceed `UREFS_MAX`.
    UrefsOverflow,
    /// The space is no longer (or was never) active.
    SpaceDead,
}

impl fmt::Display for SpaceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SpaceError::ResourceShortage => "resource shortage",
            SpaceError::NoRoom => "no room in table",
            SpaceError::NameInUse => "name already in use",
            SpaceError::NameNotFound => "name not found",
            SpaceError::InvalidName => "invalid name",
            SpaceError::InvalidRight => "invalid right",
            SpaceError::InvalidValue => "invalid value",
            SpaceError::UrefsOverflow => "user-reference count overflow",
            SpaceError::SpaceDead => "space is dead",
        };
        f.write_str(s)
    }
}

impl std::error::Error for SpaceError {}

/// Construction parameters. The defaults give a small growable table,
/// the condvar sleeper, and drop-based right disposal.
pub struct SpaceConfig<O: 'static> {
    /// Table size at creation, in slots (the reserved slot 0 included).
    pub initial_size: u32,
    /// Ceiling for table growth, in slots.
    pub max_size: u32,
    pub wait: Arc<dyn WaitWake>,
    pub cleanup: Arc<dyn RightCleanup<O>>,
}

impl<O: 'static> Default for SpaceConfig<O> {
    fn default() -> Self {
        SpaceConfig {
            initial_size: 32,
            max_size: 1 << 20,
            wait: Arc::new(CondvarWait::new()),
            cleanup: Arc::new(DropCleanup),
        }
    }
}

struct State<O: 'static> {
    table: EntryTable<O>,
    tree: NameTree<O>,
    index: ObjectIndex,
    active: bool,
    growing: bool,
    active_token: Option<Token<ArcCount<SpaceInner<O>>>>,
}

impl<O: 'static> State<O> {
    /// Pop a fresh table name. A slot whose index the table grew past may
    /// advance into a generation some tree-resident name already carries;
    /// such a name is not fresh, so the slot is released and re-popped
    /// until the generation clears the tree.
    fn allocate_fresh(&mut self, right: RightType) -> Option<Name> {
        loop {
            let name = self.table.allocate(right)?;
            if self.tree.get(name).is_none() {
                return Some(name);
            }
            let _ = self.table.release(name.index());
        }
    }
}

struct SpaceInner<O: 'static> {
    state: RwLock<State<O>>,
    keepalive: ArcCount<SpaceInner<O>>,
    max_size: u32,
    wait: Arc<dyn WaitWake>,
    cleanup: Arc<dyn RightCleanup<O>>,
}

/// A per-task capability name space: names in, entries out.
///
/// Handles are cheap to clone; clones share one space record. The object
/// type `O` is the capability reference the space stores — cloning an
/// `O` takes a reference, dropping one releases it.
pub struct Space<O: 'static> {
    inner: Arc<SpaceInner<O>>,
}

impl<O: 'static> Clone for Space<O> {
    fn clone(&self) -> Self {
        Space {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Where an entry lives, recorded by the write guard so repeated access
/// needs no second lookup.
#[derive(Copy, Clone)]
enum Residency {
    Table(u32),
    Tree(DefaultKey),
}

/// Shared view of a live entry. Holds the space's read lock.
pub struct EntryRef<'a, O> {
    name: Name,
    guard: MappedRwLockReadGuard<'a, Entry<O>>,
}

impl<'a, O> EntryRef<'a, O> {
    pub fn name(&self) -> Name {
        self.name
    }
}

impl<'a, O> core::ops::Deref for EntryRef<'a, O> {
    type Target = Entry<O>;
    fn deref(&self) -> &Entry<O> {
        &self.guard
    }
}

/// Exclusive view of one entry. Holds the space's write lock; the
/// binding methods keep the reverse index in step with the target.
pub struct EntryMut<'a, O: 'static> {
    guard: RwLockWriteGuard<'a, State<O>>,
    name: Name,
    residency: Residency,
}

impl<'a, O: Clone + Eq + Hash + 'static> EntryMut<'a, O> {
    fn entry(&self) -> &Entry<O> {
        match self.residency {
            Residency::Table(i) => self.guard.table.entry_at(i),
            Residency::Tree(k) => self.guard.tree.node_entry(k),
        }
    }

    fn entry_mut(&mut self) -> &mut Entry<O> {
        match self.residency {
            Residency::Table(i) => self.guard.table.entry_at_mut(i),
            Residency::Tree(k) => self.guard.tree.node_entry_mut(k),
        }
    }

    pub fn name(&self) -> Name {
        self.name
    }

    pub fn right(&self) -> RightType {
        self.entry().right
    }

    pub fn set_right(&mut self, right: RightType) {
        self.entry_mut().right = right;
    }

    pub fn urefs(&self) -> u32 {
        self.entry().urefs
    }

    /// Overwrite the user-reference count. Counts above `UREFS_MAX` are a
    /// caller error.
    pub fn set_urefs(&mut self, urefs: u32) {
        assert!(urefs <= UREFS_MAX, "urefs above UREFS_MAX");
        self.entry_mut().urefs = urefs;
    }

    pub fn target(&self) -> &Target<O> {
        self.entry().target()
    }

    pub fn request(&self) -> Option<RequestIndex> {
        self.entry().request
    }

    /// Park a notification request on the entry, returning any displaced
    /// one.
    pub fn set_request(&mut self, request: RequestIndex) -> Option<RequestIndex> {
        self.entry_mut().request.replace(request)
    }

    pub fn take_request(&mut self) -> Option<RequestIndex> {
        self.entry_mut().request.take()
    }

    /// Bind a native object reference.
    pub fn bind_object(&mut self, object: O) {
        self.bind(Target::Object(object));
    }

    /// Bind an object reference through the descriptor-style view.
    pub fn bind_file(&mut self, object: O) {
        self.bind(Target::File(object));
    }

    fn bind(&mut self, target: Target<O>) {
        self.unbind_index();
        let name = self.name;
        let residency = self.residency;
        let State {
            table, tree, index, ..
        } = &mut *self.guard;
        let collided = {
            let obj = target.object().unwrap();
            let hash = index.make_hash(obj);
            index
                .insert(hash, name, |n| {
                    table
                        .lookup(n)
                        .or_else(|| tree.get(n))
                        .and_then(|e| e.target().object())
                        .map_or(false, |o| o == obj)
                })
                .is_err()
        };
        let entry = match residency {
            Residency::Table(i) => table.entry_at_mut(i),
            Residency::Tree(k) => tree.node_entry_mut(k),
        };
        entry.target = target;
        entry.collision = collided;
    }

    /// Drop the entry's binding, returning the object reference it held.
    pub fn clear_target(&mut self) -> Option<O> {
        self.unbind_index();
        let entry = self.entry_mut();
        core::mem::replace(&mut entry.target, Target::Null).into_object()
    }

    fn unbind_index(&mut self) {
        let name = self.name;
        let residency = self.residency;
        let State {
            table, tree, index, ..
        } = &mut *self.guard;
        let entry = match residency {
            Residency::Table(i) => table.entry_at_mut(i),
            Residency::Tree(k) => tree.node_entry_mut(k),
        };
        if let Some(obj) = entry.target.object() {
            if !entry.collision {
                let hash = index.make_hash(obj);
                let _ = index.remove(hash, name);
            }
        }
        entry.collision = false;
    }
}

/// Occupancy counters at one instant, taken under the read lock.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct SpaceStats {
    pub table_size: u32,
    pub table_free: u32,
    pub tree_total: u32,
    /// Tree entries whose index now falls under the table horizon
    /// (allocated by name before the table grew past them).
    pub tree_small: u32,
    /// Reverse-index bindings.
    pub indexed: u32,
    /// Live entries whose object was already indexed under another name
    /// when they bound it.
    pub collisions: u32,
}

impl<O: Clone + Eq + Hash + 'static> Space<O> {
    /// Create an active space whose table starts at `initial_size` slots.
    /// The new space holds the active-state reference, so
    /// `references() == 2` until destroy.
    pub fn create(initial_size: u32) -> Result<Self, SpaceError> {
        Self::with_config(SpaceConfig {
            initial_size,
            ..SpaceConfig::default()
        })
    }

    pub fn with_config(config: SpaceConfig<O>) -> Result<Self, SpaceError> {
        let table = EntryTable::with_size(config.initial_size)
            .map_err(|_| SpaceError::ResourceShortage)?;
        let size = table.size();
        let inner = Arc::new_cyclic(|weak| SpaceInner {
            state: RwLock::new(State {
                table,
                tree: NameTree::new(),
                index: ObjectIndex::new(),
                active: true,
                growing: false,
                active_token: None,
            }),
            keepalive: ArcCount::from_weak(weak),
            max_size: config.max_size,
            wait: config.wait,
            cleanup: config.cleanup,
        });
        // The active state holds its own reference, released by destroy.
        inner.state.write().active_token = Some(inner.keepalive.get());
        log::debug!("space created, table size {}", size);
        Ok(Space { inner })
    }

    /// Create an inactive space with no table. It can host nothing and
    /// holds no active-state reference; the record lives exactly as long
    /// as its handles.
    pub fn create_special() -> Self {
        let inner = Arc::new_cyclic(|weak| SpaceInner {
            state: RwLock::new(State {
                table: EntryTable::empty(),
                tree: NameTree::new(),
                index: ObjectIndex::new(),
                active: false,
                growing: false,
                active_token: None,
            }),
            keepalive: ArcCount::from_weak(weak),
            max_size: 0,
            wait: Arc::new(CondvarWait::new()),
            cleanup: Arc::new(DropCleanup),
        });
        log::debug!("special space created");
        Space { inner }
    }

    /// Tear the space down. Idempotent: the first call runs the teardown
    /// pass exactly once; later calls return immediately. Every live
    /// entry reaches the cleanup hook exactly once, after which the
    /// active-state reference is released.
    pub fn destroy(&self) {
        let mut st = self.inner.state.write();
        if !st.active {
            return;
        }
        st.active = false;
        // An in-flight grower owns staging state; wait it out rather
        // than yank the table from under it.
        while st.growing {
            log::trace!("destroy waiting out a table grow");
            let ticket = self.inner.wait.begin_wait(WaitToken::GROWTH);
            drop(st);
            self.inner.wait.finish_wait(WaitToken::GROWTH, ticket);
            st = self.inner.state.write();
        }
        let table = core::mem::replace(&mut st.table, EntryTable::empty());
        let tree = core::mem::take(&mut st.tree);
        st.index.clear();
        let token = st.active_token.take();
        drop(st);

        // Owning the structures makes the walk race-free.
        let mut cleaned = 0usize;
        for (name, entry) in table.into_live() {
            self.inner.cleanup.clean_right(name, entry);
            cleaned += 1;
        }
        tree.drain(|name, entry| {
            self.inner.cleanup.clean_right(name, entry);
            cleaned += 1;
        });
        log::debug!("space destroyed, {} entries cleaned", cleaned);

        if let Some(token) = token {
            let _ = self.inner.keepalive.put(token);
        }
    }

    /// Resolve a name to a shared entry view. Generation-stale names and
    /// free slots miss; sparse names are found in the tree.
    pub fn entry_lookup(&self, name: Name) -> Option<EntryRef<'_, O>> {
        let st = self.inner.state.read();
        RwLockReadGuard::try_map(st, |s| s.table.lookup(name).or_else(|| s.tree.get(name)))
            .ok()
            .map(|guard| EntryRef { name, guard })
    }

    /// Resolve a name to an exclusive entry view, for rebinding rights
    /// or arming notification requests in place.
    pub fn entry_lookup_mut(&self, name: Name) -> Option<EntryMut<'_, O>> {
        let st = self.inner.state.write();
        let residency = if st.table.lookup(name).is_some() {
            Residency::Table(name.index())
        } else {
            Residency::Tree(st.tree.find_key(name)?)
        };
        Some(EntryMut {
            guard: st,
            name,
            residency,
        })
    }

    /// Allocate from the table only; never grows. The fresh entry holds
    /// one user reference and carries `SendOnce` when asked, `None`
    /// otherwise.
    pub fn entry_get(&self, send_once: bool) -> Result<(Name, EntryMut<'_, O>), SpaceError> {
        let mut st = self.inner.state.write();
        if !st.active {
            return Err(SpaceError::SpaceDead);
        }
        let right = if send_once {
            RightType::SendOnce
        } else {
            RightType::None
        };
        let name = match st.allocate_fresh(right) {
            Some(n) => n,
            None => return Err(SpaceError::NoRoom),
        };
        Ok((
            name,
            EntryMut {
                guard: st,
                name,
                residency: Residency::Table(name.index()),
            },
        ))
    }

    /// Allocate a fresh entry, growing the table as needed.
    pub fn entry_alloc(&self, send_once: bool) -> Result<(Name, EntryMut<'_, O>), SpaceError> {
        loop {
            match self.entry_get(send_once) {
                Err(SpaceError::NoRoom) => self.grow()?,
                other => return other,
            }
        }
    }

    /// Allocate under a caller-chosen name. Indices under the table
    /// horizon claim the matching slot (adopting the name's generation);
    /// larger ones land in the tree under the full name.
    pub fn entry_alloc_name(&self, name: Name) -> Result<EntryMut<'_, O>, SpaceError> {
        if name.index() == 0 {
            return Err(SpaceError::InvalidName);
        }
        let mut st = self.inner.state.write();
        if !st.active {
            return Err(SpaceError::SpaceDead);
        }
        let residency = if name.index() < st.table.size() {
            if st.tree.get(name).is_some() {
                return Err(SpaceError::NameInUse);
            }
            if !st.table.allocate_name(name) {
                return Err(SpaceError::NameInUse);
            }
            Residency::Table(name.index())
        } else {
            match st.tree.insert(name, Entry::fresh(RightType::None)) {
                Ok(key) => Residency::Tree(key),
                Err(_) => return Err(SpaceError::NameInUse),
            }
        };
        Ok(EntryMut {
            guard: st,
            name,
            residency,
        })
    }

    /// Remove an entry, handing its record (and the object reference
    /// inside) to the caller. On a destroyed space every name is already
    /// gone, so this reports `NameNotFound`.
    pub fn entry_dealloc(&self, name: Name) -> Result<Entry<O>, SpaceError> {
        let mut st = self.inner.state.write();
        let State {
            table, tree, index, ..
        } = &mut *st;
        let entry = if table.lookup(name).is_some() {
            table.release(name.index())
        } else if let Some(e) = tree.remove(name) {
            e
        } else {
            return Err(SpaceError::NameNotFound);
        };
        if !entry.collision() {
            if let Some(obj) = entry.target().object() {
                let hash = index.make_hash(obj);
                let _ = index.remove(hash, name);
            }
        }
        Ok(entry)
    }

    /// The entry's user-reference count.
    pub fn entry_refs(&self, name: Name) -> Result<u32, SpaceError> {
        let st = self.inner.state.read();
        st.table
            .lookup(name)
            .or_else(|| st.tree.get(name))
            .map(|e| e.urefs())
            .ok_or(SpaceError::NameNotFound)
    }

    /// Adjust the user-reference count by `delta`. Reaching zero
    /// deallocates the entry and returns 0; the bounds are `InvalidValue`
    /// below zero and `UrefsOverflow` above `UREFS_MAX`.
    pub fn entry_add_refs(&self, name: Name, delta: i32) -> Result<u32, SpaceError> {
        let mut st = self.inner.state.write();
        let State {
            table, tree, index, ..
        } = &mut *st;
        let e = table
            .lookup_mut(name)
            .or_else(|| tree.get_mut(name))
            .ok_or(SpaceError::NameNotFound)?;
        let next = e.urefs as i64 + delta as i64;
        if next < 0 {
            return Err(SpaceError::InvalidValue);
        }
        if next > UREFS_MAX as i64 {
            return Err(SpaceError::UrefsOverflow);
        }
        if next == 0 {
            // The last user reference takes the entry with it.
            let entry = if table.lookup(name).is_some() {
                table.release(name.index())
            } else {
                tree.remove(name).unwrap()
            };
            if !entry.collision() {
                if let Some(obj) = entry.target().object() {
                    let hash = index.make_hash(obj);
                    let _ = index.remove(hash, name);
                }
            }
            return Ok(0);
        }
        e.urefs = next as u32;
        Ok(next as u32)
    }

    /// Take one more user reference on the entry.
    pub fn entry_hold(&self, name: Name) -> Result<u32, SpaceError> {
        self.entry_add_refs(name, 1)
    }

    /// The native-object view of a binding: a fresh reference to the
    /// object the entry holds, whichever flavor it was bound under.
    pub fn entry_file_to_port(&self, name: Name) -> Result<O, SpaceError> {
        let st = self.inner.state.read();
        let e = st
            .table
            .lookup(name)
            .or_else(|| st.tree.get(name))
            .ok_or(SpaceError::NameNotFound)?;
        e.target().object().cloned().ok_or(SpaceError::InvalidRight)
    }

    /// The descriptor-shaped view of an object: the name already bound
    /// to it, or a fresh send-right entry binding it. The passed
    /// reference folds into the existing binding or moves into the new
    /// one.
    pub fn entry_port_to_file(&self, object: O) -> Result<Name, SpaceError> {
        loop {
            {
                let mut st = self.inner.state.write();
                if !st.active {
                    return Err(SpaceError::SpaceDead);
                }
                let State {
                    table, tree, index, ..
                } = &mut *st;
                let hash = index.make_hash(&object);
                if let Some(existing) = index.find(hash, |n| {
                    table
                        .lookup(n)
                        .or_else(|| tree.get(n))
                        .and_then(|e| e.target().object())
                        .map_or(false, |o| *o == object)
                }) {
                    return Ok(existing);
                }
                if let Some(name) = st.allocate_fresh(RightType::Send) {
                    let State { table, index, .. } = &mut *st;
                    index.insert_unique(hash, name);
                    table.entry_at_mut(name.index()).target = Target::File(object);
                    log::trace!("descriptor view bound at {:?}", name);
                    return Ok(name);
                }
            }
            // Table exhausted; grow and retry.
            self.grow()?;
        }
    }

    /// Turn a bound entry into a dead name: the right becomes `DeadName`,
    /// the binding is dropped, and the object reference comes back to the
    /// caller. User references survive.
    pub fn entry_mark_dead(&self, name: Name) -> Result<O, SpaceError> {
        let mut st = self.inner.state.write();
        let State {
            table, tree, index, ..
        } = &mut *st;
        let e = table
            .lookup_mut(name)
            .or_else(|| tree.get_mut(name))
            .ok_or(SpaceError::NameNotFound)?;
        if e.target.is_null() {
            return Err(SpaceError::InvalidRight);
        }
        let was_collision = e.collision;
        e.collision = false;
        e.right = RightType::DeadName;
        let obj = core::mem::replace(&mut e.target, Target::Null)
            .into_object()
            .unwrap();
        if !was_collision {
            let hash = index.make_hash(&obj);
            let _ = index.remove(hash, name);
        }
        Ok(obj)
    }

    /// Visit every live entry under the read lock: table slots in index
    /// order, then tree entries in name order.
    pub fn for_each(&self, mut f: impl FnMut(Name, &Entry<O>)) {
        let st = self.inner.state.read();
        for (name, e) in st.table.live_iter() {
            f(name, e);
        }
        st.tree.for_each(f);
    }

    pub fn stats(&self) -> SpaceStats {
        let st = self.inner.state.read();
        let size = st.table.size();
        let mut collisions = 0u32;
        for (_, e) in st.table.live_iter() {
            if e.collision() {
                collisions += 1;
            }
        }
        let mut tree_total = 0u32;
        let mut tree_small = 0u32;
        st.tree.for_each(|n, e| {
            tree_total += 1;
            if n.index() < size {
                tree_small += 1;
            }
            if e.collision() {
                collisions += 1;
            }
        });
        SpaceStats {
            table_size: size,
            table_free: st.table.free_count(),
            tree_total,
            tree_small,
            indexed: st.index.len() as u32,
            collisions,
        }
    }

    pub fn is_active(&self) -> bool {
        self.inner.state.read().active
    }

    /// Number of references to the space record, the active-state
    /// reference included.
    pub fn references(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Grow the table one size class. Ok means a retry is worthwhile:
    /// either this call published a larger table or another free slot
    /// appeared while it was at it.
    fn grow(&self) -> Result<(), SpaceError> {
        let mut st = self.inner.state.write();
        loop {
            if !st.active {
                return Err(SpaceError::SpaceDead);
            }
            if st.table.has_free() {
                return Ok(());
            }
            if !st.growing {
                break;
            }
            // Another grower is in flight; wait for its publish.
            let ticket = self.inner.wait.begin_wait(WaitToken::GROWTH);
            drop(st);
            self.inner.wait.finish_wait(WaitToken::GROWTH, ticket);
            st = self.inner.state.write();
        }
        st.growing = true;
        let old_size = st.table.size();
        drop(st);

        // Stage the larger table without holding the lock.
        let new_size = old_size.saturating_mul(2).min(self.inner.max_size);
        if new_size <= old_size {
            return self.grow_fail(SpaceError::ResourceShortage);
        }
        let staged = match StagedTable::stage(new_size) {
            Ok(s) => s,
            Err(_) => return self.grow_fail(SpaceError::ResourceShortage),
        };

        let mut st = self.inner.state.write();
        debug_assert!(st.growing);
        assert_eq!(
            st.table.size(),
            old_size,
            "table changed under an in-flight grow"
        );
        if !st.active {
            st.growing = false;
            drop(st);
            self.inner.wait.wake(WaitToken::GROWTH);
            return Err(SpaceError::SpaceDead);
        }
        st.table.grow_into(staged);
        st.growing = false;
        drop(st);
        self.inner.wait.wake(WaitToken::GROWTH);
        log::debug!("space table grown, {} -> {} slots", old_size, new_size);
        Ok(())
    }

    fn grow_fail(&self, err: SpaceError) -> Result<(), SpaceError> {
        let mut st = self.inner.state.write();
        st.growing = false;
        drop(st);
        self.inner.wait.wake(WaitToken::GROWTH);
        log::warn!("space table growth failed: {}", err);
        Err(err)
    }
}

#[cfg(test)]
impl<O: Clone + Eq + Hash + 'static> Space<O> {
    fn test_set_growing(&self, growing: bool) {
        self.inner.state.write().growing = growing;
    }

    fn test_growing(&self) -> bool {
        self.inner.state.read().growing
    }
}
