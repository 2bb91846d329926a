//! Linear keepalive tokens over an Arc strong count.
//!
//! A token is a zero-sized proof that one strong reference was taken on
//! the owning allocation. Dropping a token panics; the only valid way to
//! dispose of it is to return it to the originating counter via
//! `ArcCount::put`. This lets a structure hold a reference to itself
//! without a cyclic `Arc` field: the count is manipulated through a raw
//! pointer and the token keeps the bookkeeping honest.

use core::marker::PhantomData;
use std::sync::{Arc, Weak};

/// Zero-sized, linear token branded to its originating counter type.
pub(crate) struct Token<C: ?Sized> {
    // The fn-pointer phantom brands the token without inheriting the
    // counter's auto traits; tokens stay Send + Sync.
    _ctr: PhantomData<fn() -> C>,
}

impl<C: ?Sized> Token<C> {
    fn new() -> Self {
        Token { _ctr: PhantomData }
    }
}

impl<C: ?Sized> Drop for Token<C> {
    fn drop(&mut self) {
        // Intentional fail-fast on misuse: token must be consumed by put.
        panic!("keepalive token dropped without ArcCount::put");
    }
}

/// Arc-backed manual counter. Uses raw-pointer strong count manipulation.
pub(crate) struct ArcCount<T> {
    ptr: *const T,
    weak: Weak<T>,
}

// The raw pointer is only ever passed to Arc::increment_strong_count and
// Arc::decrement_strong_count, which are the thread-safe count ops.
unsafe impl<T: Send + Sync> Send for ArcCount<T> {}
unsafe impl<T: Send + Sync> Sync for ArcCount<T> {}

impl<T> ArcCount<T> {
    /// Build from the weak handle of the allocation this counter guards.
    /// Usable inside `Arc::new_cyclic`; the pointer is not dereferenced
    /// until `get` is called on a live allocation.
    pub(crate) fn from_weak(weak: &Weak<T>) -> Self {
        ArcCount {
            ptr: weak.as_ptr(),
            weak: weak.clone(),
        }
    }
}

impl<T: 'static> ArcCount<T> {
    /// Acquire one strong reference and return a linear token for it.
    pub(crate) fn get(&self) -> Token<Self> {
        debug_assert!(self.weak.strong_count() > 0);
        unsafe { Arc::increment_strong_count(self.ptr) };
        Token::new()
    }

    /// Return (consume) a previously acquired token. Returns true if this
    /// put released the last strong reference.
    pub(crate) fn put(&self, t: Token<Self>) -> bool {
        debug_assert!(self.weak.strong_count() > 0);
        let was_one = self.weak.strong_count() == 1;
        unsafe { Arc::decrement_strong_count(self.ptr) };
        core::mem::forget(t);
        was_one
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{catch_unwind, AssertUnwindSafe};

    /// Invariant: get raises the strong count by one, put lowers it and
    /// reports whether the counted reference was the last.
    #[test]
    fn get_put_tracks_strong_count() {
        let arc = Arc::new(17u32);
        let count = ArcCount::from_weak(&Arc::downgrade(&arc));
        assert_eq!(Arc::strong_count(&arc), 1);

        let token = count.get();
        assert_eq!(Arc::strong_count(&arc), 2);
        assert!(!count.put(token));
        assert_eq!(Arc::strong_count(&arc), 1);
    }

    /// Invariant: tokens are linear; dropping one without returning it
    /// panics.
    #[test]
    fn dropped_token_panics() {
        let arc = Arc::new(5u32);
        let count = ArcCount::from_weak(&Arc::downgrade(&arc));
        let token = count.get();
        let result = catch_unwind(AssertUnwindSafe(move || drop(token)));
        assert!(result.is_err());
        // The panic consumed the token but not the count it stood for;
        // rebalance so the allocation can drop.
        assert_eq!(Arc::strong_count(&arc), 2);
        assert!(!count.put(Token::new()));
        assert_eq!(Arc::strong_count(&arc), 1);
    }

    /// Invariant: put reports the last reference only when every other
    /// strong handle is gone.
    #[test]
    fn last_put_is_detected() {
        let arc = Arc::new(1u32);
        let weak = Arc::downgrade(&arc);
        let count = ArcCount::from_weak(&weak);
        let token = count.get();
        drop(arc);
        assert_eq!(weak.strong_count(), 1);
        assert!(count.put(token));
        assert_eq!(weak.strong_count(), 0);
    }
}
