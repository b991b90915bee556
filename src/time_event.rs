use std::cell::RefCell;
use std::rc::Rc;

use crate::Reactor;

/// A timer handler returns either a positive reschedule delay in
/// milliseconds, or [`NO_MORE`] to self-cancel.
pub type TimeHandler = Rc<RefCell<dyn FnMut(&mut Reactor, i64) -> i32>>;
pub type Finalizer = Rc<RefCell<dyn FnMut(&mut Reactor)>>;

/// Returned by a time handler to mean "do not reschedule me".
pub const NO_MORE: i32 = -1;

/// Sentinel `id` marking a node as logically deleted but not yet freed.
pub(crate) const TOMBSTONE: i64 = -1;

/// One node of the unordered timer list.
///
/// Timers live in a flat `Vec` rather than an actual linked structure: a
/// real doubly-linked list buys nothing in safe Rust once removal is
/// already tombstone-deferred, and a `Vec` gives the same O(1)
/// amortized insertion and O(N) expiration scan the design calls for.
/// New timers are appended at the end rather than inserted at a logical
/// head, and `nearest_timer`/`process_time_events` walk the whole vector
/// regardless of position, so traversal order (used only to break deadline
/// ties) is simply vector order.
pub(crate) struct TimeEvent {
    pub(crate) id: i64,
    pub(crate) when_sec: i64,
    pub(crate) when_ms: i64,
    pub(crate) handler: TimeHandler,
    pub(crate) finalizer: Option<Finalizer>,
    pub(crate) refcount: i32,
}

impl TimeEvent {
    pub(crate) fn is_tombstoned(&self) -> bool {
        self.id == TOMBSTONE
    }

    pub(crate) fn deadline_ms(&self) -> i64 {
        self.when_sec * 1000 + self.when_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: i64, deadline_ms: i64) -> TimeEvent {
        TimeEvent {
            id,
            when_sec: deadline_ms / 1000,
            when_ms: deadline_ms % 1000,
            handler: Rc::new(RefCell::new(|_: &mut Reactor, _: i64| NO_MORE)),
            finalizer: None,
            refcount: 0,
        }
    }

    #[test]
    fn deadline_ms_roundtrips() {
        let t = node(0, 12_345);
        assert_eq!(t.deadline_ms(), 12_345);
    }

    #[test]
    fn tombstone_sentinel_matches_id() {
        let mut t = node(7, 0);
        assert!(!t.is_tombstoned());
        t.id = TOMBSTONE;
        assert!(t.is_tombstoned());
    }
}
