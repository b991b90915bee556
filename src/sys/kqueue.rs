use std::os::unix::io::{AsRawFd, RawFd};
use std::ptr;
use std::time::Duration;
use std::{cmp, io};

use crate::mask::Mask;
use crate::sys::backend::Backend;

#[cfg(not(target_os = "netbsd"))]
type Count = libc::c_int;
#[cfg(target_os = "netbsd")]
type Count = libc::size_t;

#[cfg(any(target_os = "freebsd", target_os = "openbsd"))]
type Filter = libc::c_short;
#[cfg(any(target_os = "macos", target_os = "ios"))]
type Filter = i16;
#[cfg(target_os = "netbsd")]
type Filter = u32;

macro_rules! kevent {
    ($id:expr, $filter:expr, $flags:expr) => {
        libc::kevent {
            ident: $id as libc::uintptr_t,
            filter: $filter as Filter,
            flags: $flags,
            fflags: 0,
            data: 0,
            udata: ptr::null_mut(),
        }
    };
}

/// `kqueue(2)`-backed implementation, used on the BSDs and macOS/iOS.
///
/// kqueue tracks read and write readiness as two independent filters per fd,
/// so `add_interest`/`remove_interest` translate one `Mask` into up to two
/// `EV_ADD`/`EV_DELETE` changes, ignoring `ENOENT` the way the registry
/// pattern in the rest of this crate's backends does for "wasn't there
/// anyway" removals.
pub struct Kqueue {
    kq: RawFd,
    events: Vec<libc::kevent>,
}

impl Kqueue {
    pub fn new(setsize: usize) -> io::Result<Kqueue> {
        let kq = syscall!(kqueue())?;
        syscall!(fcntl(kq, libc::F_SETFD, libc::FD_CLOEXEC))?;
        Ok(Kqueue {
            kq,
            events: Vec::with_capacity(setsize),
        })
    }

    fn change(&self, mut changes: Vec<libc::kevent>) -> io::Result<()> {
        syscall!(kevent(
            self.kq,
            changes.as_ptr(),
            changes.len() as Count,
            changes.as_mut_ptr(),
            changes.len() as Count,
            ptr::null(),
        ))
        .map(|_| ())
        .or_else(|err| {
            if err.raw_os_error() == Some(libc::EINTR) {
                Ok(())
            } else {
                Err(err)
            }
        })?;
        for event in &changes {
            let data = event.data;
            if (event.flags & libc::EV_ERROR) != 0
                && data != 0
                && data as i32 != libc::ENOENT
                && data as i32 != libc::EPIPE
            {
                return Err(io::Error::from_raw_os_error(data as i32));
            }
        }
        Ok(())
    }
}

impl Backend for Kqueue {
    fn resize(&mut self, new_size: usize) -> io::Result<()> {
        self.events.reserve(new_size.saturating_sub(self.events.capacity()));
        Ok(())
    }

    fn add_interest(&mut self, fd: RawFd, add_mask: Mask) -> io::Result<()> {
        let flags = libc::EV_CLEAR | libc::EV_RECEIPT | libc::EV_ADD;
        let mut changes = Vec::with_capacity(2);
        if add_mask.is_readable() {
            changes.push(kevent!(fd, libc::EVFILT_READ, flags));
        }
        if add_mask.is_writable() {
            changes.push(kevent!(fd, libc::EVFILT_WRITE, flags));
        }
        if changes.is_empty() {
            return Ok(());
        }
        self.change(changes)
    }

    fn remove_interest(&mut self, fd: RawFd, remove_mask: Mask) -> io::Result<()> {
        let flags = libc::EV_DELETE | libc::EV_RECEIPT;
        let mut changes = Vec::with_capacity(2);
        if remove_mask.is_readable() {
            changes.push(kevent!(fd, libc::EVFILT_READ, flags));
        }
        if remove_mask.is_writable() {
            changes.push(kevent!(fd, libc::EVFILT_WRITE, flags));
        }
        if changes.is_empty() {
            return Ok(());
        }
        self.change(changes)
    }

    fn poll(
        &mut self,
        timeout: Option<Duration>,
        fired: &mut Vec<(RawFd, Mask)>,
    ) -> io::Result<usize> {
        let ts = timeout.map(|to| libc::timespec {
            tv_sec: cmp::min(to.as_secs(), libc::time_t::MAX as u64) as libc::time_t,
            tv_nsec: libc::c_long::from(to.subsec_nanos() as i32),
        });
        let ts_ptr = ts.as_ref().map(|t| t as *const _).unwrap_or(ptr::null());

        let cap = self.events.capacity().max(1);
        self.events.clear();
        let n = match syscall!(kevent(
            self.kq,
            ptr::null(),
            0,
            self.events.as_mut_ptr(),
            cap as Count,
            ts_ptr,
        )) {
            Ok(n) => n as usize,
            Err(err) if err.raw_os_error() == Some(libc::EINTR) => 0,
            Err(err) => return Err(err),
        };
        unsafe { self.events.set_len(n) };

        for event in &self.events {
            let fd = event.ident as RawFd;
            // An error/EOF condition doesn't tell us which direction failed,
            // so (matching the epoll and poll(2) backends) it's folded into
            // both bits rather than just the filter it happened to arrive
            // on, so whichever handler is registered still gets a chance to
            // discover the failure.
            let err = (event.flags & libc::EV_ERROR) != 0
                || ((event.flags & libc::EV_EOF) != 0 && event.fflags != 0);
            let mut mask = Mask::NONE;
            if event.filter == libc::EVFILT_READ || err {
                mask |= Mask::READABLE;
            }
            if event.filter == libc::EVFILT_WRITE || err {
                mask |= Mask::WRITABLE;
            }
            fired.push((fd, mask));
        }
        Ok(self.events.len())
    }

    fn name(&self) -> &'static str {
        "kqueue"
    }
}

impl AsRawFd for Kqueue {
    fn as_raw_fd(&self) -> RawFd {
        self.kq
    }
}

impl Drop for Kqueue {
    fn drop(&mut self) {
        if let Err(err) = syscall!(close(self.kq)) {
            log::error!("error closing kqueue: {}", err);
        }
    }
}
