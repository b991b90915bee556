use std::cell::RefCell;
use std::fmt;
use std::os::unix::io::RawFd;
use std::rc::Rc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::{Error, Result};
use crate::file_event::{FileEvent, FileHandler};
use crate::fired::FiredBuffer;
use crate::mask::Mask;
use crate::sys::{self, backend::Backend};
use crate::time_event::{Finalizer, TimeEvent, TimeHandler, NO_MORE, TOMBSTONE};

/// Flags accepted by [`Reactor::process_events`] and stored persistently on
/// the reactor (the `DontWait` bit).
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct Flags(u8);

impl Flags {
    pub const NONE: Flags = Flags(0);
    pub const FILE_EVENTS: Flags = Flags(1 << 0);
    pub const TIME_EVENTS: Flags = Flags(1 << 1);
    pub const DONT_WAIT: Flags = Flags(1 << 2);
    pub const CALL_BEFORE_SLEEP: Flags = Flags(1 << 3);
    pub const CALL_AFTER_SLEEP: Flags = Flags(1 << 4);

    pub const fn contains(self, other: Flags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for Flags {
    type Output = Flags;
    fn bitor(self, rhs: Self) -> Flags {
        Flags(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for Flags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Static identifier for the backend compiled into this build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    EventPort,
    Epoll,
    Kqueue,
    Poll,
}

impl BackendKind {
    fn from_name(name: &str) -> BackendKind {
        match name {
            "evport" => BackendKind::EventPort,
            "epoll" => BackendKind::Epoll,
            "kqueue" => BackendKind::Kqueue,
            _ => BackendKind::Poll,
        }
    }
}

impl AsRef<str> for BackendKind {
    fn as_ref(&self) -> &str {
        match self {
            BackendKind::EventPort => "evport",
            BackendKind::Epoll => "epoll",
            BackendKind::Kqueue => "kqueue",
            BackendKind::Poll => "poll",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_ref())
    }
}

/// Bundles the knobs a [`Reactor`] is constructed with.
pub struct ReactorConfig {
    setsize: usize,
    flags: Flags,
}

impl ReactorConfig {
    pub fn new(setsize: usize) -> ReactorConfig {
        ReactorConfig {
            setsize,
            flags: Flags::NONE,
        }
    }

    pub fn dont_wait(mut self, yes: bool) -> ReactorConfig {
        if yes {
            self.flags |= Flags::DONT_WAIT;
        }
        self
    }

    pub fn build(self) -> Result<Reactor> {
        Reactor::with_config(self)
    }
}

type HookFn = Rc<RefCell<dyn FnMut(&mut Reactor)>>;

/// The event loop: owns the file-event table, the timer list, the fired
/// buffer, and the backend.
pub struct Reactor {
    events: Vec<FileEvent>,
    maxfd: i32,
    setsize: usize,
    fired: FiredBuffer,
    timers: Vec<TimeEvent>,
    next_timer_id: i64,
    last_wall_time: i64,
    stop: bool,
    flags: Flags,
    before_sleep: Option<HookFn>,
    after_sleep: Option<HookFn>,
    backend: Box<dyn Backend>,
    backend_kind: BackendKind,
}

fn wall_clock_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

impl Reactor {
    /// Create a reactor sized to hold `setsize` fds, with no initial flags.
    pub fn new(setsize: usize) -> Result<Reactor> {
        ReactorConfig::new(setsize).build()
    }

    fn with_config(config: ReactorConfig) -> Result<Reactor> {
        let ReactorConfig { setsize, flags } = config;
        let backend = sys::backend::create(setsize).map_err(Error::Allocation)?;
        let backend_kind = BackendKind::from_name(backend.name());
        log::trace!("reactor created with {} backend, setsize {}", backend_kind, setsize);
        Ok(Reactor {
            events: vec![FileEvent::default(); setsize],
            maxfd: -1,
            setsize,
            fired: Vec::with_capacity(setsize),
            timers: Vec::new(),
            next_timer_id: 0,
            last_wall_time: wall_clock_ms() / 1000,
            stop: false,
            flags,
            before_sleep: None,
            after_sleep: None,
            backend,
            backend_kind,
        })
    }

    pub fn set_size(&self) -> usize {
        self.setsize
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend_kind
    }

    pub fn set_dont_wait(&mut self, yes: bool) {
        if yes {
            self.flags |= Flags::DONT_WAIT;
        } else {
            self.flags = Flags(self.flags.0 & !Flags::DONT_WAIT.0);
        }
    }

    pub fn set_before_sleep(&mut self, hook: impl FnMut(&mut Reactor) + 'static) {
        self.before_sleep = Some(Rc::new(RefCell::new(hook)));
    }

    pub fn set_after_sleep(&mut self, hook: impl FnMut(&mut Reactor) + 'static) {
        self.after_sleep = Some(Rc::new(RefCell::new(hook)));
    }

    /// Grow or shrink capacity. Fails with `TooSmall` if a live fd would be
    /// dropped; capacity is left unchanged on failure.
    pub fn resize(&mut self, new_size: usize) -> Result<()> {
        if self.maxfd >= new_size as i32 {
            return Err(Error::TooSmall {
                maxfd: self.maxfd,
                requested: new_size,
            });
        }
        self.backend.resize(new_size).map_err(Error::Backend)?;
        self.events.resize(new_size, FileEvent::default());
        self.fired.reserve(new_size.saturating_sub(self.fired.capacity()));
        self.setsize = new_size;
        log::trace!("reactor resized to {}", new_size);
        Ok(())
    }

    pub fn register_file(
        &mut self,
        fd: RawFd,
        mask: Mask,
        handler: impl FnMut(&mut Reactor, RawFd, Mask) + 'static,
    ) -> Result<()> {
        if fd as usize >= self.setsize {
            return Err(Error::Range {
                fd,
                setsize: self.setsize,
            });
        }
        let handler: FileHandler = Rc::new(RefCell::new(handler));
        let slot = &mut self.events[fd as usize];
        slot.mask |= mask;
        if mask.is_readable() {
            slot.read_handler = Some(handler.clone());
        }
        if mask.is_writable() {
            slot.write_handler = Some(handler);
        }
        if fd > self.maxfd {
            self.maxfd = fd;
        }
        self.backend
            .add_interest(fd, mask.for_backend())
            .map_err(Error::Backend)?;
        log::trace!("registered fd {} for {:?}", fd, mask);
        Ok(())
    }

    pub fn unregister_file(&mut self, fd: RawFd, mask: Mask) {
        if fd as usize >= self.setsize {
            return;
        }
        let slot = &mut self.events[fd as usize];
        if slot.mask.is_none() {
            return;
        }
        slot.mask = slot.mask - mask;
        if !slot.mask.is_readable() {
            slot.read_handler = None;
        }
        if !slot.mask.is_writable() {
            slot.write_handler = None;
        }
        if let Err(err) = self.backend.remove_interest(fd, mask.for_backend()) {
            // The failure is not propagated to the caller -- unregistering
            // has no error return -- but it's worth a warning rather than
            // silent discard.
            log::warn!("failed to drop backend interest for fd {}: {}", fd, err);
        }
        if self.events[fd as usize].mask.is_none() && fd == self.maxfd {
            self.maxfd = (0..fd).rev().find(|&f| !self.events[f as usize].mask.is_none()).unwrap_or(-1);
        }
        log::trace!("unregistered fd {} from {:?}", fd, mask);
    }

    pub fn file_interest(&self, fd: RawFd) -> Mask {
        if fd as usize >= self.setsize {
            return Mask::NONE;
        }
        self.events[fd as usize].mask
    }

    pub fn create_timer(
        &mut self,
        delay_ms: i64,
        handler: impl FnMut(&mut Reactor, i64) -> i32 + 'static,
        finalizer: Option<impl FnMut(&mut Reactor) + 'static>,
    ) -> i64 {
        let id = self.next_timer_id;
        self.next_timer_id += 1;
        let deadline_ms = wall_clock_ms() + delay_ms;
        let handler: TimeHandler = Rc::new(RefCell::new(handler));
        let finalizer: Option<Finalizer> = finalizer.map(|f| Rc::new(RefCell::new(f)) as Finalizer);
        self.timers.push(TimeEvent {
            id,
            when_sec: deadline_ms / 1000,
            when_ms: deadline_ms % 1000,
            handler,
            finalizer,
            refcount: 0,
        });
        log::trace!("created timer {} at +{}ms", id, delay_ms);
        id
    }

    /// Marks the timer tombstoned. Physical removal and the finalizer call
    /// always happen later, inside `process_time_events`, once `refcount`
    /// reaches zero — never inline here, regardless of whether the timer's
    /// own handler happens to be on the stack at the time of the call.
    pub fn delete_timer(&mut self, id: i64) -> Result<()> {
        let idx = self
            .timers
            .iter()
            .position(|t| t.id == id)
            .ok_or(Error::NotFound { id })?;
        self.timers[idx].id = TOMBSTONE;
        Ok(())
    }

    fn nearest_deadline_ms(&self) -> Option<i64> {
        self.timers
            .iter()
            .filter(|t| !t.is_tombstoned())
            .map(|t| t.deadline_ms())
            .min()
    }

    /// Run one dispatch iteration. Returns the number of file and timer
    /// events dispatched.
    pub fn process_events(&mut self, flags: Flags) -> usize {
        if !flags.contains(Flags::FILE_EVENTS) && !flags.contains(Flags::TIME_EVENTS) {
            return 0;
        }

        let process_timers = flags.contains(Flags::TIME_EVENTS);
        let dont_wait = flags.contains(Flags::DONT_WAIT) || self.flags.contains(Flags::DONT_WAIT);

        // Mirrors the reference loop's timeout computation exactly: the
        // nearest timer deadline wins whenever timers are in play and we're
        // allowed to block, a zero timeout wins whenever the caller asked
        // not to wait, and otherwise the backend blocks until an fd is
        // ready — the fd count itself never factors into this choice.
        let shortest = if process_timers && !dont_wait {
            self.nearest_deadline_ms()
        } else {
            None
        };
        let budget: Option<Duration> = match shortest {
            Some(deadline_ms) => {
                let remaining = (deadline_ms - wall_clock_ms()).max(0);
                Some(Duration::from_millis(remaining as u64))
            }
            None if dont_wait => Some(Duration::ZERO),
            None => None,
        };

        if flags.contains(Flags::CALL_BEFORE_SLEEP) {
            if let Some(hook) = self.before_sleep.clone() {
                hook.borrow_mut()(self);
            }
        }

        self.fired.clear();
        let n = match self.backend.poll(budget, &mut self.fired) {
            Ok(n) => n,
            Err(err) => {
                log::warn!("backend poll failed, treating as zero fired: {}", err);
                0
            }
        };

        if flags.contains(Flags::CALL_AFTER_SLEEP) {
            if let Some(hook) = self.after_sleep.clone() {
                hook.borrow_mut()(self);
            }
        }

        let mut count = 0;
        for i in 0..n {
            let (fd, fired_mask) = self.fired[i];
            count += self.dispatch_fd(fd, fired_mask);
        }

        if process_timers {
            count += self.process_time_events();
        }

        count
    }

    fn invoke_read(&mut self, fd: RawFd, fired_mask: Mask) -> bool {
        let handler = self.events[fd as usize].read_handler.clone();
        match handler {
            Some(h) => {
                h.borrow_mut()(self, fd, fired_mask);
                true
            }
            None => false,
        }
    }

    fn invoke_write(&mut self, fd: RawFd, fired_mask: Mask) -> bool {
        let handler = self.events[fd as usize].write_handler.clone();
        match handler {
            Some(h) => {
                h.borrow_mut()(self, fd, fired_mask);
                true
            }
            None => false,
        }
    }

    /// Dispatches one fired `(fd, mask)` pair. Normally the read handler
    /// runs before the write handler so a reply can go out in the same
    /// iteration as the request that produced it; barrier mode inverts
    /// that order so a pending write (e.g. an fsync done in `before_sleep`)
    /// completes before new input is served.
    fn dispatch_fd(&mut self, fd: RawFd, fired_mask: Mask) -> usize {
        let invert = self.events[fd as usize].mask.is_barrier();
        let mut count = 0;
        let mut already_fired = false;

        if !invert {
            let effective = self.events[fd as usize].mask & fired_mask;
            if effective.is_readable() && self.invoke_read(fd, fired_mask) {
                count += 1;
                already_fired = true;
            }
        }

        let fe = &self.events[fd as usize];
        let effective = fe.mask & fired_mask;
        if effective.is_writable() {
            let same = fe.same_handler();
            if !already_fired || !same {
                if self.invoke_write(fd, fired_mask) {
                    count += 1;
                    already_fired = true;
                }
            }
        }

        if invert {
            let fe = &self.events[fd as usize];
            let effective = fe.mask & fired_mask;
            if effective.is_readable() {
                let same = fe.same_handler();
                if !already_fired || !same {
                    if self.invoke_read(fd, fired_mask) {
                        count += 1;
                    }
                }
            }
        }

        count
    }

    /// Runs the wall-clock backward-jump check, the `max_id` snapshot guard
    /// that shields timers created during this pass from firing in the same
    /// pass, and the expiration scan.
    fn process_time_events(&mut self) -> usize {
        let now_sec = wall_clock_ms() / 1000;
        if now_sec < self.last_wall_time {
            log::warn!(
                "backward wall-clock jump detected ({} -> {}), expiring all timers",
                self.last_wall_time,
                now_sec
            );
            for t in &mut self.timers {
                t.when_sec = 0;
            }
        }
        self.last_wall_time = now_sec;

        let max_id = self.next_timer_id - 1;
        let now_ms = wall_clock_ms();

        let mut count = 0;
        let mut i = 0;
        while i < self.timers.len() {
            if self.timers[i].is_tombstoned() {
                if self.timers[i].refcount == 0 {
                    let node = self.timers.swap_remove(i);
                    if let Some(fin) = node.finalizer {
                        fin.borrow_mut()(self);
                    }
                    // swap_remove moved the last element into slot i; don't
                    // advance so it gets a chance to run this pass too.
                    continue;
                }
                i += 1;
                continue;
            }
            if self.timers[i].id > max_id {
                i += 1;
                continue;
            }
            if self.timers[i].deadline_ms() <= now_ms {
                self.timers[i].refcount += 1;
                let id = self.timers[i].id;
                let handler = self.timers[i].handler.clone();
                let retval = handler.borrow_mut()(self, id);
                // The handler may have mutated `self.timers` (creating new
                // timers only ever appends, tombstoning mutates in place),
                // so index `i` still refers to the same node.
                self.timers[i].refcount -= 1;
                if retval == NO_MORE {
                    self.timers[i].id = TOMBSTONE;
                } else {
                    let next_deadline = now_ms + retval as i64;
                    self.timers[i].when_sec = next_deadline / 1000;
                    self.timers[i].when_ms = next_deadline % 1000;
                }
                count += 1;
            }
            i += 1;
        }
        count
    }

    /// Clears `stop` and dispatches iterations until `stop_loop` is called.
    pub fn run(&mut self) {
        self.stop = false;
        let flags = Flags::FILE_EVENTS
            | Flags::TIME_EVENTS
            | Flags::CALL_BEFORE_SLEEP
            | Flags::CALL_AFTER_SLEEP;
        while !self.stop {
            self.process_events(flags);
        }
    }

    pub fn stop_loop(&mut self) {
        self.stop = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_out_of_range_fd_is_range_error() {
        let mut r = Reactor::new(4).unwrap();
        let err = r.register_file(10, Mask::READABLE, |_, _, _| {}).unwrap_err();
        assert!(matches!(err, Error::Range { fd: 10, setsize: 4 }));
    }

    #[test]
    fn maxfd_tracks_highest_registered_fd_and_recomputes_on_removal() {
        let mut r = Reactor::new(64).unwrap();
        r.register_file(3, Mask::READABLE, |_, _, _| {}).unwrap();
        r.register_file(9, Mask::READABLE, |_, _, _| {}).unwrap();
        assert_eq!(r.maxfd, 9);
        r.unregister_file(9, Mask::READABLE);
        assert_eq!(r.maxfd, 3);
        r.unregister_file(3, Mask::READABLE);
        assert_eq!(r.maxfd, -1);
    }

    #[test]
    fn timer_ids_strictly_increase() {
        let mut r = Reactor::new(4).unwrap();
        let a = r.create_timer(1000, |_, _| NO_MORE, None::<fn(&mut Reactor)>);
        let b = r.create_timer(1000, |_, _| NO_MORE, None::<fn(&mut Reactor)>);
        assert!(b > a);
    }

    #[test]
    fn delete_unknown_timer_is_not_found() {
        let mut r = Reactor::new(4).unwrap();
        assert!(matches!(r.delete_timer(999), Err(Error::NotFound { id: 999 })));
    }

    #[test]
    fn backward_clock_jump_expires_all_timers_in_one_pass() {
        let mut r = Reactor::new(4).unwrap();
        let fired = Rc::new(RefCell::new(0u32));
        let f1 = fired.clone();
        let f2 = fired.clone();
        r.create_timer(100_000, move |_, _| { *f1.borrow_mut() += 1; NO_MORE }, None::<fn(&mut Reactor)>);
        r.create_timer(200_000, move |_, _| { *f2.borrow_mut() += 1; NO_MORE }, None::<fn(&mut Reactor)>);

        // Neither timer is due yet.
        r.process_time_events();
        assert_eq!(*fired.borrow(), 0);

        // Simulate a backward wall-clock jump by advancing the snapshot
        // far past "now"; the next pass must treat every timer as expired.
        r.last_wall_time += 10_000;
        let count = r.process_time_events();
        assert_eq!(count, 2);
        assert_eq!(*fired.borrow(), 2);
    }

    #[test]
    fn resize_rejects_shrinking_below_maxfd() {
        let mut r = Reactor::new(64).unwrap();
        r.register_file(50, Mask::READABLE, |_, _, _| {}).unwrap();
        let before = r.file_interest(50);
        let err = r.resize(32).unwrap_err();
        assert!(matches!(err, Error::TooSmall { maxfd: 50, requested: 32 }));
        assert_eq!(r.file_interest(50), before);
        assert_eq!(r.setsize, 64);
    }
}
