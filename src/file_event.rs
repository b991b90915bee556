use std::cell::RefCell;
use std::os::unix::io::RawFd;
use std::rc::Rc;

use crate::mask::Mask;
use crate::Reactor;

/// A callback invoked when a registered fd becomes ready.
///
/// Handlers capture whatever state they need via closure capture rather
/// than receiving a separate opaque user pointer; a handler with no state
/// is simply a closure with an empty capture list.
pub type FileHandler = Rc<RefCell<dyn FnMut(&mut Reactor, RawFd, Mask)>>;

/// One slot of the dense, fd-indexed file-event table.
///
/// `mask == Mask::NONE` means the slot is free; every other field is only
/// meaningful while `mask` is non-empty.
#[derive(Default, Clone)]
pub(crate) struct FileEvent {
    pub(crate) mask: Mask,
    pub(crate) read_handler: Option<FileHandler>,
    pub(crate) write_handler: Option<FileHandler>,
}

impl FileEvent {
    /// True if the read and write slots hold the same callable, in which
    /// case the write handler must not be invoked again after the read
    /// handler already ran during the same dispatch.
    pub(crate) fn same_handler(&self) -> bool {
        match (&self.read_handler, &self.write_handler) {
            (Some(r), Some(w)) => Rc::ptr_eq(r, w),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handler() -> FileHandler {
        Rc::new(RefCell::new(|_: &mut Reactor, _: RawFd, _: Mask| {}))
    }

    #[test]
    fn free_slot_has_no_handler() {
        let fe = FileEvent::default();
        assert!(fe.mask.is_none());
        assert!(!fe.same_handler());
    }

    #[test]
    fn shared_handler_detected_by_identity() {
        let h = handler();
        let fe = FileEvent {
            mask: Mask::READABLE | Mask::WRITABLE,
            read_handler: Some(h.clone()),
            write_handler: Some(h),
        };
        assert!(fe.same_handler());
    }

    #[test]
    fn distinct_handlers_not_same() {
        let fe = FileEvent {
            mask: Mask::READABLE | Mask::WRITABLE,
            read_handler: Some(handler()),
            write_handler: Some(handler()),
        };
        assert!(!fe.same_handler());
    }
}
