//! Right classification and the teardown disposal hook.

use crate::entry::Entry;
use crate::name::Name;

/// What kind of right an entry carries. The space records this but never
/// interprets it; senders and receivers of capabilities give it meaning.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub enum RightType {
    /// Freshly allocated, not yet assigned.
    #[default]
    None,
    Send,
    Receive,
    SendOnce,
    PortSet,
    /// The underlying object died; the name survives so holders can learn.
    DeadName,
}

impl RightType {
    pub fn is_dead(self) -> bool {
        matches!(self, RightType::DeadName)
    }
}

/// Disposal hook for live entries released during space teardown.
///
/// Teardown hands each remaining entry here exactly once, by value, after
/// it has been unlinked from the space. Implementations dispose of the
/// object reference the entry carries (send a notification, drop a
/// receive right's queue, or simply let it drop).
pub trait RightCleanup<O>: Send + Sync {
    fn clean_right(&self, name: Name, entry: Entry<O>);
}

/// Default disposal: dropping the entry releases its object reference.
#[derive(Debug, Default)]
pub struct DropCleanup;

impl<O> RightCleanup<O> for DropCleanup {
    fn clean_right(&self, _name: Name, entry: Entry<O>) {
        drop(entry);
    }
}
