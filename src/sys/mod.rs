//! OS backend selection.
//!
//! Exactly one of `evport`, `epoll`, `kqueue`, `poll` is compiled in, chosen
//! by target platform (see the `cfg_*_backend!` macros in `crate::macros`).
//! `reactor_force_poll_backend` downgrades any target to the `poll(2)`
//! fallback, for testing the least capable backend on a capable host.

pub mod backend;

cfg_evport_backend! {
    mod evport;
    use evport::EventPort as Selected;
}

cfg_epoll_backend! {
    mod epoll;
    use epoll::Epoll as Selected;
}

cfg_kqueue_backend! {
    mod kqueue;
    use kqueue::Kqueue as Selected;
}

cfg_poll_backend! {
    mod poll;
    use poll::Poll as Selected;
}

pub(crate) fn create(setsize: usize) -> std::io::Result<Box<dyn backend::Backend>> {
    Ok(Box::new(Selected::new(setsize)?))
}
