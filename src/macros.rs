//! Macros to ease conditional code based on target platform and enabled
//! features.

// Depending on the platform not all macros are used.
#![allow(unused_macros)]

/// Execute a system call that returns `-1` on error, turning it into an
/// `io::Result`.
macro_rules! syscall {
    ($fn: ident ( $($arg: expr),* $(,)* ) ) => {{
        let res = unsafe { libc::$fn($($arg, )*) };
        if res == -1 {
            Err(std::io::Error::last_os_error())
        } else {
            Ok(res)
        }
    }};
}

/// The target supports `illumos`/Solaris-style event ports.
macro_rules! cfg_evport_backend {
    ($($item:item)*) => {
        $(
            #[cfg(all(
                any(target_os = "illumos", target_os = "solaris"),
                not(reactor_force_poll_backend)
            ))]
            $item
        )*
    };
}

/// The target supports `epoll`.
macro_rules! cfg_epoll_backend {
    ($($item:item)*) => {
        $(
            #[cfg(all(
                any(target_os = "android", target_os = "linux"),
                not(reactor_force_poll_backend)
            ))]
            $item
        )*
    };
}

/// The target supports `kqueue`.
macro_rules! cfg_kqueue_backend {
    ($($item:item)*) => {
        $(
            #[cfg(all(
                any(
                    target_os = "dragonfly",
                    target_os = "freebsd",
                    target_os = "ios",
                    target_os = "macos",
                    target_os = "netbsd",
                    target_os = "openbsd",
                ),
                not(reactor_force_poll_backend)
            ))]
            $item
        )*
    };
}

/// The target falls back to the `poll(2)`-based select-equivalent backend:
/// any other Unix, or any target with `reactor_force_poll_backend` set.
macro_rules! cfg_poll_backend {
    ($($item:item)*) => {
        $(
            #[cfg(all(
                unix,
                any(
                    not(any(
                        target_os = "illumos",
                        target_os = "solaris",
                        target_os = "android",
                        target_os = "linux",
                        target_os = "dragonfly",
                        target_os = "freebsd",
                        target_os = "ios",
                        target_os = "macos",
                        target_os = "netbsd",
                        target_os = "openbsd",
                    )),
                    reactor_force_poll_backend
                )
            ))]
            $item
        )*
    };
}
