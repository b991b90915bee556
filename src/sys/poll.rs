use std::convert::TryInto;
use std::os::unix::io::RawFd;
use std::time::{Duration, Instant};
use std::{cmp, io};

use crate::mask::Mask;
use crate::sys::backend::Backend;

#[cfg(not(target_os = "haiku"))]
const READ_EVENTS: libc::c_short = libc::POLLIN | libc::POLLRDHUP;
#[cfg(target_os = "haiku")]
const READ_EVENTS: libc::c_short = libc::POLLIN;

const WRITE_EVENTS: libc::c_short = libc::POLLOUT;

/// `poll(2)`-backed fallback used on any Unix without a native
/// readiness-event primitive.
///
/// A dense `Vec<libc::pollfd>` mirrors the reactor's own fd table one-to-one
/// by position: slot `i` holds the pollfd for fd `i`, with `fd` set to `-1`
/// when no interest is registered (poll(2) ignores negative fds). This
/// avoids the `HashMap<RawFd, index>` indirection used elsewhere, since the
/// reactor already guarantees a dense `[0, setsize)` fd space.
pub struct Poll {
    fds: Vec<libc::pollfd>,
}

impl Poll {
    pub fn new(setsize: usize) -> io::Result<Poll> {
        Ok(Poll {
            fds: vec![empty_pollfd(); setsize],
        })
    }
}

fn empty_pollfd() -> libc::pollfd {
    libc::pollfd {
        fd: -1,
        events: 0,
        revents: 0,
    }
}

fn mask_to_poll(mask: Mask) -> libc::c_short {
    let mut events = 0;
    if mask.is_readable() {
        events |= READ_EVENTS;
    }
    if mask.is_writable() {
        events |= WRITE_EVENTS;
    }
    events
}

impl Backend for Poll {
    fn resize(&mut self, new_size: usize) -> io::Result<()> {
        self.fds.resize(new_size, empty_pollfd());
        Ok(())
    }

    fn add_interest(&mut self, fd: RawFd, add_mask: Mask) -> io::Result<()> {
        let slot = &mut self.fds[fd as usize];
        slot.fd = fd;
        slot.events |= mask_to_poll(add_mask);
        Ok(())
    }

    fn remove_interest(&mut self, fd: RawFd, remove_mask: Mask) -> io::Result<()> {
        let slot = &mut self.fds[fd as usize];
        slot.events &= !mask_to_poll(remove_mask);
        if slot.events == 0 {
            slot.fd = -1;
        }
        Ok(())
    }

    fn poll(
        &mut self,
        timeout: Option<Duration>,
        fired: &mut Vec<(RawFd, Mask)>,
    ) -> io::Result<usize> {
        let deadline = timeout.map(|to| Instant::now() + to);
        let n = loop {
            let timeout_ms = deadline
                .map(|deadline| {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    let mut ms: u64 = remaining.as_millis().try_into().unwrap_or(u64::MAX);
                    if Duration::from_millis(ms) < remaining {
                        ms = ms.saturating_add(1);
                    }
                    cmp::min(ms, i32::MAX as u64) as libc::c_int
                })
                .unwrap_or(-1);

            match syscall!(poll(
                self.fds.as_mut_ptr(),
                self.fds.len() as libc::nfds_t,
                timeout_ms,
            )) {
                Ok(n) => break n as usize,
                Err(err) if err.raw_os_error() == Some(libc::EINTR) => return Ok(0),
                Err(err) if err.raw_os_error() == Some(libc::EAGAIN) => continue,
                Err(err) => return Err(err),
            }
        };

        if n == 0 {
            return Ok(0);
        }

        let mut seen = 0;
        for slot in &mut self.fds {
            if slot.fd < 0 || slot.revents == 0 {
                continue;
            }
            let mut mask = Mask::NONE;
            if slot.revents & (libc::POLLIN | libc::POLLHUP | libc::POLLERR) != 0 {
                mask |= Mask::READABLE;
            }
            if slot.revents & (libc::POLLOUT | libc::POLLHUP | libc::POLLERR) != 0 {
                mask |= Mask::WRITABLE;
            }
            if !mask.is_none() {
                fired.push((slot.fd, mask));
            }
            slot.revents = 0;
            seen += 1;
            if seen == n {
                break;
            }
        }
        Ok(fired.len())
    }

    fn name(&self) -> &'static str {
        "poll"
    }
}
