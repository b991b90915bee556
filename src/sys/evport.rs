use std::os::unix::io::{AsRawFd, RawFd};
use std::time::Duration;
use std::{cmp, io, ptr};

use crate::mask::Mask;
use crate::sys::backend::Backend;

/// Event ports (`port_create(3C)`), used on illumos and Solaris.
///
/// Unlike epoll/kqueue, a port association is one-shot: once `port_get`
/// reports an fd, the kernel automatically dissociates it. `add_interest`
/// therefore always re-associates with the fd's full desired mask rather
/// than incrementally adding bits, and the backend must remember each fd's
/// last-requested mask so `poll` can unconditionally re-arm it (with the
/// full wanted mask, not just whatever didn't fire) right after each
/// notification, mirroring how a level-triggered backend behaves.
pub struct EventPort {
    port: RawFd,
    interest: Vec<Mask>,
}

fn mask_to_events(mask: Mask) -> libc::c_int {
    let mut events = 0;
    if mask.is_readable() {
        events |= libc::POLLIN;
    }
    if mask.is_writable() {
        events |= libc::POLLOUT;
    }
    events
}

impl EventPort {
    pub fn new(setsize: usize) -> io::Result<EventPort> {
        let port = syscall!(port_create())?;
        Ok(EventPort {
            port,
            interest: vec![Mask::NONE; setsize],
        })
    }

    fn associate(&self, fd: RawFd, mask: Mask) -> io::Result<()> {
        syscall!(port_associate(
            self.port,
            libc::PORT_SOURCE_FD,
            fd as usize,
            mask_to_events(mask),
            ptr::null_mut(),
        ))
        .map(|_| ())
    }

    fn dissociate(&self, fd: RawFd) -> io::Result<()> {
        match syscall!(port_dissociate(self.port, libc::PORT_SOURCE_FD, fd as usize)) {
            Ok(_) => Ok(()),
            Err(err) if err.raw_os_error() == Some(libc::ENOENT) => Ok(()),
            Err(err) => Err(err),
        }
    }
}

impl Backend for EventPort {
    fn resize(&mut self, new_size: usize) -> io::Result<()> {
        self.interest.resize(new_size, Mask::NONE);
        Ok(())
    }

    fn add_interest(&mut self, fd: RawFd, add_mask: Mask) -> io::Result<()> {
        let wanted = self.interest[fd as usize] | add_mask;
        self.associate(fd, wanted)?;
        self.interest[fd as usize] = wanted;
        Ok(())
    }

    fn remove_interest(&mut self, fd: RawFd, remove_mask: Mask) -> io::Result<()> {
        let remaining = self.interest[fd as usize] - remove_mask;
        if remaining.is_none() {
            self.dissociate(fd)?;
        } else {
            self.associate(fd, remaining)?;
        }
        self.interest[fd as usize] = remaining;
        Ok(())
    }

    fn poll(
        &mut self,
        timeout: Option<Duration>,
        fired: &mut Vec<(RawFd, Mask)>,
    ) -> io::Result<usize> {
        let mut ts = timeout.map(|to| libc::timespec {
            tv_sec: cmp::min(to.as_secs(), libc::time_t::MAX as u64) as libc::time_t,
            tv_nsec: libc::c_long::from(to.subsec_nanos() as i32),
        });
        let ts_ptr = ts
            .as_mut()
            .map(|t| t as *mut _)
            .unwrap_or(ptr::null_mut());

        let mut events: [libc::port_event; 1] = unsafe { std::mem::zeroed() };
        let mut nget: u32 = 1;
        let before = fired.len();
        match syscall!(port_getn(
            self.port,
            events.as_mut_ptr(),
            events.len() as u32,
            &mut nget,
            ts_ptr,
        )) {
            Ok(_) => {}
            Err(err) if err.raw_os_error() == Some(libc::ETIME) => return Ok(0),
            Err(err) if err.raw_os_error() == Some(libc::EINTR) => return Ok(0),
            Err(err) => return Err(err),
        }

        for event in &events[..nget as usize] {
            let fd = event.portev_object as RawFd;
            let revents = event.portev_events;
            let mut mask = Mask::NONE;
            if revents & (libc::POLLIN | libc::POLLHUP | libc::POLLERR) != 0 {
                mask |= Mask::READABLE;
            }
            if revents & (libc::POLLOUT | libc::POLLHUP | libc::POLLERR) != 0 {
                mask |= Mask::WRITABLE;
            }
            if !mask.is_none() {
                fired.push((fd, mask));
            }
            // The association is now gone regardless of which bits fired
            // (port_getn is always one-shot), so re-arm with the fd's full
            // wanted interest whenever the reactor still wants it, so
            // level-triggered semantics are preserved until the caller
            // explicitly removes interest.
            let wanted = self.interest[fd as usize];
            if !wanted.is_none() {
                if let Err(err) = self.associate(fd, wanted) {
                    log::warn!("failed to re-associate fd {} with event port: {}", fd, err);
                }
            }
        }
        Ok(fired.len() - before)
    }

    fn name(&self) -> &'static str {
        "evport"
    }
}

impl AsRawFd for EventPort {
    fn as_raw_fd(&self) -> RawFd {
        self.port
    }
}

impl Drop for EventPort {
    fn drop(&mut self) {
        if let Err(err) = syscall!(close(self.port)) {
            log::error!("error closing event port: {}", err);
        }
    }
}
