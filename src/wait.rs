use std::io;
use std::os::unix::io::RawFd;

use crate::mask::Mask;

/// Block on a single fd for at most `timeout_ms` (negative means forever),
/// returning the mask of events observed.
///
/// Backed by a one-shot `poll(2)` call rather than whichever backend the
/// caller's reactor happens to use, so this helper works even when no
/// reactor exists yet (e.g. waiting for a connect to complete before
/// handing the fd to a reactor). It touches no reactor state and is safe
/// to call from any context that owns `fd`. Error and hang-up conditions
/// are folded into `Mask::WRITABLE` so a caller attempting to write
/// discovers the broken connection.
pub fn wait_fd(fd: RawFd, mask: Mask, timeout_ms: i32) -> io::Result<Mask> {
    let mut events: libc::c_short = 0;
    if mask.is_readable() {
        events |= libc::POLLIN;
    }
    if mask.is_writable() {
        events |= libc::POLLOUT;
    }

    let mut pfd = libc::pollfd {
        fd,
        events,
        revents: 0,
    };

    loop {
        match syscall!(poll(&mut pfd, 1, timeout_ms)) {
            Ok(_) => break,
            Err(err) if err.raw_os_error() == Some(libc::EINTR) => continue,
            Err(err) => return Err(err),
        }
    }

    let mut fired = Mask::NONE;
    if pfd.revents & libc::POLLIN != 0 {
        fired |= Mask::READABLE;
    }
    if pfd.revents & libc::POLLOUT != 0 {
        fired |= Mask::WRITABLE;
    }
    if pfd.revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0 {
        fired |= Mask::WRITABLE;
    }
    Ok(fired)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::io::AsRawFd;

    #[test]
    fn readable_pipe_returns_immediately() {
        let (mut reader, mut writer) = os_pipe();
        std::io::Write::write_all(&mut writer, b"x").unwrap();
        let mask = wait_fd(reader.as_raw_fd(), Mask::READABLE, 1000).unwrap();
        assert!(mask.is_readable());
        let mut buf = [0u8; 1];
        std::io::Read::read_exact(&mut reader, &mut buf).unwrap();
    }

    #[test]
    fn timeout_with_nothing_ready() {
        let (reader, _writer) = os_pipe();
        let mask = wait_fd(reader.as_raw_fd(), Mask::READABLE, 50).unwrap();
        assert!(!mask.is_readable());
    }

    fn os_pipe() -> (std::fs::File, std::fs::File) {
        use std::os::unix::io::FromRawFd;
        let mut fds = [0; 2];
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
        unsafe {
            (
                std::fs::File::from_raw_fd(fds[0]),
                std::fs::File::from_raw_fd(fds[1]),
            )
        }
    }
}
