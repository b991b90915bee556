use std::fmt;

/// Errors produced by the reactor.
///
/// All failures are signaled as values rather than panics. Backend errors
/// encountered during dispatch (as opposed to setup) are absorbed and
/// reported as zero fired events instead of reaching this type; see
/// [`Reactor::process_events`](crate::Reactor::process_events).
#[derive(Debug)]
pub enum Error {
    /// Memory could not be obtained while creating or resizing the backend.
    Allocation(std::io::Error),
    /// An fd fell outside `[0, setsize)`.
    Range { fd: i32, setsize: usize },
    /// A resize would have dropped a live fd.
    TooSmall { maxfd: i32, requested: usize },
    /// No timer with the given id is registered.
    NotFound { id: i64 },
    /// The OS polling primitive returned an unrecoverable error.
    Backend(std::io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Allocation(err) => write!(f, "failed to allocate backend state: {err}"),
            Error::Range { fd, setsize } => {
                write!(f, "fd {fd} is out of range for setsize {setsize}")
            }
            Error::TooSmall { maxfd, requested } => write!(
                f,
                "cannot resize to {requested}, maxfd {maxfd} is still registered"
            ),
            Error::NotFound { id } => write!(f, "no timer with id {id}"),
            Error::Backend(err) => write!(f, "backend error: {err}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Allocation(err) | Error::Backend(err) => Some(err),
            Error::Range { .. } | Error::TooSmall { .. } | Error::NotFound { .. } => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
