use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

use crate::mask::Mask;

/// The five operations every OS polling primitive must provide.
///
/// All implementations (`evport`, `epoll`, `kqueue`, `poll`) must produce
/// identical observable behavior: the same set of `(fd, mask)` pairs, in some
/// order, after the same sequence of interest changes and kernel events. The
/// reactor must tolerate any order within the fired buffer.
pub trait Backend {
    /// Grow or shrink capacity to `new_size`. The caller guarantees no
    /// interest is registered for any fd >= `new_size`.
    fn resize(&mut self, new_size: usize) -> io::Result<()>;

    /// Install readiness interest on `fd` for the union of the existing mask
    /// and `add_mask`. Idempotent. `Barrier` is filtered out before it
    /// reaches this call (see [`Mask::for_backend`]).
    fn add_interest(&mut self, fd: RawFd, add_mask: Mask) -> io::Result<()>;

    /// Clear the intersection of `remove_mask` with the fd's current
    /// interest.
    fn remove_interest(&mut self, fd: RawFd, remove_mask: Mask) -> io::Result<()>;

    /// Block at most `timeout` (`None` means forever), then append ready
    /// `(fd, mask)` pairs to `fired` and return how many were appended. An
    /// interrupted syscall must be absorbed and reported as zero fired, not
    /// propagated as an error.
    fn poll(
        &mut self,
        timeout: Option<Duration>,
        fired: &mut Vec<(RawFd, Mask)>,
    ) -> io::Result<usize>;

    /// Static identifier for diagnostics: `"evport"`, `"epoll"`, `"kqueue"`,
    /// or `"poll"`.
    fn name(&self) -> &'static str;
}

/// Create the backend selected for this target at compile time, sized to
/// hold readiness state for `setsize` fds.
///
/// Selection order: event ports > epoll > kqueue > poll, matching the
/// priority in which real OS multiplexing primitives are preferred.
pub fn create(setsize: usize) -> io::Result<Box<dyn Backend>> {
    super::create(setsize)
}
