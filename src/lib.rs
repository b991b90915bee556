//! A single-threaded, event-driven reactor.
//!
//! Multiplexes file descriptor readiness and timers over one of four
//! interchangeable OS backends (event ports, epoll, kqueue, or a `poll(2)`
//! fallback), selected at compile time for the target platform. Unlike a
//! `Token`/`Registry`-based multiplexer, interest and handlers are indexed
//! directly by fd in a dense table, and timers are a first-class part of
//! the loop rather than left to a layer above.
//!
//! ```no_run
//! use reactor::{Reactor, NO_MORE};
//!
//! let mut r = Reactor::new(128).unwrap();
//! r.create_timer(1000, |r, _id| { r.stop_loop(); NO_MORE }, None::<fn(&mut Reactor)>);
//! r.run();
//! ```

#[macro_use]
mod macros;

mod error;
mod file_event;
mod fired;
mod mask;
mod reactor;
mod sys;
mod time_event;
mod wait;

pub use error::{Error, Result};
pub use mask::Mask;
pub use reactor::{BackendKind, Flags, Reactor, ReactorConfig};
pub use time_event::NO_MORE;
pub use wait::wait_fd;
