use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;

use crate::mask::Mask;
use crate::sys::backend::Backend;

/// `epoll(7)`-backed implementation, used on Linux and Android.
///
/// Unlike a `Token`-indexed multiplexer, interest changes are applied
/// directly against `fd` with `EPOLL_CTL_ADD`/`MOD`/`DEL`; the reactor itself
/// is the only owner of per-fd state. `EPOLL_CTL_MOD` replaces a fd's whole
/// interest set rather than adding to it, so (like `evport.rs`) the backend
/// keeps its own `Vec<Mask>` of each fd's last-installed interest and always
/// re-submits the union/remainder rather than just the delta.
pub struct Epoll {
    ep: OwnedFd,
    events: Vec<libc::epoll_event>,
    interest: Vec<Mask>,
}

impl Epoll {
    pub fn new(setsize: usize) -> io::Result<Epoll> {
        let ep = unsafe { OwnedFd::from_raw_fd(syscall!(epoll_create1(libc::EPOLL_CLOEXEC))?) };
        Ok(Epoll {
            ep,
            events: Vec::with_capacity(setsize),
            interest: vec![Mask::NONE; setsize],
        })
    }

    fn ctl(&self, op: libc::c_int, fd: RawFd, events: u32) -> io::Result<()> {
        let mut event = libc::epoll_event { events, u64: fd as u64 };
        match syscall!(epoll_ctl(self.ep.as_raw_fd(), op, fd, &mut event)) {
            Ok(_) => Ok(()),
            // Nothing was registered yet; treat add-when-absent and
            // mod-when-absent uniformly by retrying as an add.
            Err(err) if op == libc::EPOLL_CTL_MOD && err.raw_os_error() == Some(libc::ENOENT) => {
                let mut event = libc::epoll_event { events, u64: fd as u64 };
                syscall!(epoll_ctl(self.ep.as_raw_fd(), libc::EPOLL_CTL_ADD, fd, &mut event))
                    .map(|_| ())
            }
            Err(err) => Err(err),
        }
    }
}

fn mask_to_epoll(mask: Mask) -> u32 {
    let mut events = 0u32;
    if mask.is_readable() {
        events |= (libc::EPOLLIN | libc::EPOLLRDHUP) as u32;
    }
    if mask.is_writable() {
        events |= libc::EPOLLOUT as u32;
    }
    events
}

impl Backend for Epoll {
    fn resize(&mut self, new_size: usize) -> io::Result<()> {
        self.events.reserve(new_size.saturating_sub(self.events.capacity()));
        self.interest.resize(new_size, Mask::NONE);
        Ok(())
    }

    fn add_interest(&mut self, fd: RawFd, add_mask: Mask) -> io::Result<()> {
        let wanted = self.interest[fd as usize] | add_mask;
        self.ctl(libc::EPOLL_CTL_MOD, fd, mask_to_epoll(wanted))
            .or_else(|_| self.ctl(libc::EPOLL_CTL_ADD, fd, mask_to_epoll(wanted)))?;
        self.interest[fd as usize] = wanted;
        Ok(())
    }

    fn remove_interest(&mut self, fd: RawFd, remove_mask: Mask) -> io::Result<()> {
        let remaining = self.interest[fd as usize] - remove_mask;
        if remaining.is_none() {
            match syscall!(epoll_ctl(self.ep.as_raw_fd(), libc::EPOLL_CTL_DEL, fd, std::ptr::null_mut())) {
                Ok(_) => {}
                Err(err) if err.raw_os_error() == Some(libc::ENOENT) => {}
                Err(err) => return Err(err),
            }
        } else {
            self.ctl(libc::EPOLL_CTL_MOD, fd, mask_to_epoll(remaining))?;
        }
        self.interest[fd as usize] = remaining;
        Ok(())
    }

    fn poll(
        &mut self,
        timeout: Option<Duration>,
        fired: &mut Vec<(RawFd, Mask)>,
    ) -> io::Result<usize> {
        let timeout_ms = timeout
            .map(|to| to.as_millis().min(i32::MAX as u128) as libc::c_int)
            .unwrap_or(-1);

        let cap = self.events.capacity().max(1);
        self.events.clear();
        let n = match syscall!(epoll_wait(
            self.ep.as_raw_fd(),
            self.events.as_mut_ptr(),
            cap as i32,
            timeout_ms,
        )) {
            Ok(n) => n as usize,
            Err(err) if err.raw_os_error() == Some(libc::EINTR) => 0,
            Err(err) => return Err(err),
        };
        unsafe { self.events.set_len(n) };

        for event in &self.events {
            let mut mask = Mask::NONE;
            let e = event.events as libc::c_int;
            if e & (libc::EPOLLIN | libc::EPOLLHUP | libc::EPOLLERR) != 0 {
                mask |= Mask::READABLE;
            }
            if e & (libc::EPOLLOUT | libc::EPOLLHUP | libc::EPOLLERR) != 0 {
                mask |= Mask::WRITABLE;
            }
            if !mask.is_none() {
                fired.push((event.u64 as RawFd, mask));
            }
        }
        Ok(self.events.len())
    }

    fn name(&self) -> &'static str {
        "epoll"
    }
}
