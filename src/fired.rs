use std::os::unix::io::RawFd;

use crate::mask::Mask;

/// Scratch buffer the backend fills on each `poll`.
///
/// Valid only for the duration of one `process_events` call; the reactor
/// never reads it across iterations.
pub(crate) type FiredBuffer = Vec<(RawFd, Mask)>;
