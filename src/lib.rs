//! cap-space: a per-task capability name space. Names are dense
//! generation-tagged handles; entries carry a right type, a
//! user-reference count, and an object binding with a reverse index.
//!
//! Internal Design:
//!
//! Summary
//! - Goal: build `Space` in small layers so each piece can be reasoned
//!   about (and tested) independently.
//! - Layers:
//!   - `EntryTable<O>`: dense generational slot array with an
//!     index-threaded free list; slot 0 is the free-list head and is
//!     never handed out. Growth happens by splicing a pre-staged, larger
//!     array.
//!   - `NameTree<O>`: splay tree over full names for entries allocated
//!     beyond the table horizon. Read paths descend without
//!     restructuring; mutations splay.
//!   - `ObjectIndex`: reverse map from object reference to its canonical
//!     name, keyed by a stored hash so the object is never re-hashed by
//!     table maintenance.
//!   - `Space<O>`: the public surface; one reader/writer lock over the
//!     three structures plus the lifecycle state.
//!
//! Constraints
//! - Thread-safe: `Space<O>` is `Send`/`Sync` when `O` is; all structural
//!   state sits behind one `parking_lot` reader/writer lock.
//! - Names never migrate: an entry resolves under the same name for its
//!   whole life, across table growth, tree residency included.
//! - Reuse of a table slot advances its generation, so names held across
//!   a free/reallocate cycle go stale instead of aliasing.
//! - The space's reference count is the `Arc` strong count of its
//!   record; an active space pins itself with one linear keepalive
//!   token that only `destroy` releases. Never destroying an active
//!   space leaks the record.
//! - Growth allocates outside the lock under a `growing` claim; destroy
//!   and competing growers wait through the `WaitWake` seam, a two-phase
//!   begin/finish protocol with no lost-wakeup window.
//!
//! Why this split?
//! - Localize invariants: the free-list and generation rules live in
//!   `EntryTable`, ordering in `NameTree`, canonical-binding rules in
//!   `ObjectIndex`; `Space` composes them under one lock without
//!   re-proving them.
//! - Minimize unsafe: the raw-pointer strong-count handling is isolated
//!   in `keepalive::ArcCount`; everything structural is safe Rust.
//! - Clear failure boundaries: caller mistakes surface as `SpaceError`;
//!   broken structural invariants panic.
//!
//! Hasher and rehashing invariants
//! - Each reverse-index element stores a precomputed `u64` hash and all
//!   probing uses the stored hash; `O: Hash` runs only when a binding is
//!   made or looked up, never during table maintenance.
//!
//! Notes and non-goals
//! - Names are plain `u64` values to callers; the index/generation split
//!   is this crate's convention, not a protected secret.
//! - No message queues, no inter-space transfer semantics; an `O` is
//!   whatever reference type the surrounding system hands out.
//! - Entry guards (`EntryRef`/`EntryMut`) hold the space lock; calling
//!   back into the same space while holding one deadlocks.
//! - Public API surface is `Space` with its guards, errors, and the
//!   `WaitWake`/`RightCleanup` seams; the structural layers are
//!   implementation details (`table` is exported for the internal
//!   benches).

mod entry;
mod index;
mod keepalive;
mod name;
mod right;
mod space;
mod space_proptest;
pub mod table;
mod tree;
mod wait;

// Public surface
pub use entry::{Entry, RequestIndex, Target, UREFS_MAX};
pub use name::Name;
pub use right::{DropCleanup, RightCleanup, RightType};
pub use space::{EntryMut, EntryRef, Space, SpaceConfig, SpaceError, SpaceStats};
pub use wait::{CondvarWait, WaitTicket, WaitToken, WaitWake};
