//! Entry records: the per-name state held by the table and the tree.

use crate::right::RightType;

/// Ceiling for an entry's user-reference count.
pub const UREFS_MAX: u32 = 0xFFFF;

/// Index of a pending dead-name notification request, kept by the entry
/// so the requester can be found when the right changes state.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct RequestIndex(u32);

impl RequestIndex {
    pub fn new(v: u32) -> Self {
        RequestIndex(v)
    }

    pub fn value(self) -> u32 {
        self.0
    }
}

/// What a live entry points at. An entry holds at most one object
/// reference, published through either the native or the descriptor view.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Target<O> {
    /// No object bound (fresh entries and dead names).
    Null,
    /// A native object reference.
    Object(O),
    /// An object reference published through the descriptor-style view.
    File(O),
}

impl<O> Target<O> {
    pub fn object(&self) -> Option<&O> {
        match self {
            Target::Null => None,
            Target::Object(o) | Target::File(o) => Some(o),
        }
    }

    pub fn into_object(self) -> Option<O> {
        match self {
            Target::Null => None,
            Target::Object(o) | Target::File(o) => Some(o),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Target::Null)
    }
}

/// Per-name record. Field coherence with the reverse index is maintained
/// by the space; an entry only travels outside it by value, when
/// deallocation or teardown hands ownership to the caller.
#[derive(Debug)]
pub struct Entry<O> {
    pub(crate) right: RightType,
    pub(crate) urefs: u32,
    pub(crate) collision: bool,
    pub(crate) target: Target<O>,
    pub(crate) request: Option<RequestIndex>,
}

impl<O> Entry<O> {
    pub(crate) fn fresh(right: RightType) -> Self {
        Entry {
            right,
            urefs: 1,
            collision: false,
            target: Target::Null,
            request: None,
        }
    }

    pub fn right(&self) -> RightType {
        self.right
    }

    pub fn urefs(&self) -> u32 {
        self.urefs
    }

    /// True when another live entry already indexed the same object at the
    /// time this one bound it. Collided entries are not reverse-resolvable.
    pub fn collision(&self) -> bool {
        self.collision
    }

    pub fn target(&self) -> &Target<O> {
        &self.target
    }

    pub fn request(&self) -> Option<RequestIndex> {
        self.request
    }

    pub fn into_target(self) -> Target<O> {
        self.target
    }
}
