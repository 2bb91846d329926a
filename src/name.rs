//! Names: packed slot-index plus generation identifiers for space entries.
//!
//! A name is opaque to callers. The low 32 bits select a table slot (or a
//! tree position for sparse names); the high 32 bits carry the generation
//! the slot had when the entry was allocated. A name only resolves while
//! its generation matches the slot's current one, so a name held across
//! deallocation and reuse goes stale instead of aliasing the new occupant.

use core::fmt;

/// Opaque entry name. Packs `index` (low 32 bits) and `generation`
/// (high 32 bits).
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Name(u64);

impl Name {
    /// The never-resolving null name (index 0, generation 0).
    pub const NULL: Name = Name(0);

    pub fn from_parts(index: u32, generation: u32) -> Self {
        Name(((generation as u64) << 32) | index as u64)
    }

    pub fn from_raw(raw: u64) -> Self {
        Name(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }

    pub fn index(self) -> u32 {
        self.0 as u32
    }

    pub fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Name")
            .field("index", &self.index())
            .field("generation", &self.generation())
            .finish()
    }
}

/// Per-slot occupancy counter. Advances (wrapping) each time a slot goes
/// from free to allocated.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub(crate) struct Generation(u32);

impl Generation {
    pub(crate) const ZERO: Generation = Generation(0);

    pub(crate) fn from_value(v: u32) -> Self {
        Generation(v)
    }

    pub(crate) fn value(self) -> u32 {
        self.0
    }

    pub(crate) fn advanced(self) -> Self {
        Generation(self.0.wrapping_add(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Invariant: packing round-trips through parts and raw forms.
    #[test]
    fn pack_roundtrip() {
        let n = Name::from_parts(0x1234_5678, 0x9abc_def0);
        assert_eq!(n.index(), 0x1234_5678);
        assert_eq!(n.generation(), 0x9abc_def0);
        assert_eq!(Name::from_raw(n.raw()), n);
    }

    /// Invariant: NULL is index 0, generation 0, and nothing else is null.
    #[test]
    fn null_name() {
        assert_eq!(Name::NULL.index(), 0);
        assert_eq!(Name::NULL.generation(), 0);
        assert!(Name::NULL.is_null());
        assert!(!Name::from_parts(0, 1).is_null());
        assert!(!Name::from_parts(1, 0).is_null());
    }

    /// Invariant: generations advance by one and wrap at the 32-bit boundary.
    #[test]
    fn generation_advance_wraps() {
        let g = Generation::from_value(u32::MAX);
        assert_eq!(g.advanced().value(), 0);
        assert_eq!(Generation::ZERO.advanced().value(), 1);
    }
}
