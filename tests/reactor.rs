use std::cell::RefCell;
use std::os::unix::io::RawFd;
use std::rc::Rc;

use reactor::{Flags, Mask, Reactor, NO_MORE};

fn pipe() -> (RawFd, RawFd) {
    let mut fds = [0; 2];
    assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
    (fds[0], fds[1])
}

fn write_all(fd: RawFd, data: &[u8]) {
    let n = unsafe { libc::write(fd, data.as_ptr() as *const _, data.len()) };
    assert_eq!(n as usize, data.len());
}

fn socketpair() -> (RawFd, RawFd) {
    let mut fds = [0; 2];
    assert_eq!(
        unsafe { libc::socketpair(libc::AF_UNIX, libc::SOCK_STREAM, 0, fds.as_mut_ptr()) },
        0
    );
    (fds[0], fds[1])
}

#[test]
fn pipe_echo() {
    let (read_fd, write_fd) = pipe();
    let mut r = Reactor::new(128).unwrap();
    let observed = Rc::new(RefCell::new(Vec::new()));
    let observed2 = observed.clone();

    r.register_file(read_fd, Mask::READABLE, move |_r, fd, _mask| {
        let mut buf = [0u8; 16];
        let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut _, buf.len()) };
        observed2.borrow_mut().extend_from_slice(&buf[..n as usize]);
    })
    .unwrap();

    write_all(write_fd, b"hello");

    // force progress with a short timer so `process_events` doesn't block
    // forever if the fd somehow never becomes ready.
    r.create_timer(100, |r, _id| {
        r.stop_loop();
        NO_MORE
    }, None::<fn(&mut Reactor)>);

    r.process_events(Flags::FILE_EVENTS | Flags::TIME_EVENTS);

    assert_eq!(&observed.borrow()[..], b"hello");
    unsafe {
        libc::close(read_fd);
        libc::close(write_fd);
    }
}

#[test]
fn timer_cadence() {
    let mut r = Reactor::new(16).unwrap();
    let fired = Rc::new(RefCell::new(0u32));
    let fired2 = fired.clone();

    r.create_timer(
        30,
        move |_r, _id| {
            *fired2.borrow_mut() += 1;
            20
        },
        None::<fn(&mut Reactor)>,
    );

    let deadline = std::time::Instant::now() + std::time::Duration::from_millis(125);
    while std::time::Instant::now() < deadline {
        r.process_events(Flags::TIME_EVENTS | Flags::DONT_WAIT);
        std::thread::sleep(std::time::Duration::from_millis(5));
    }

    let count = *fired.borrow();
    assert!((4..=6).contains(&count), "expected ~5 firings, got {count}");
}

#[test]
fn self_deleting_timer() {
    let mut r = Reactor::new(16).unwrap();
    let fired = Rc::new(RefCell::new(0u32));
    let fired2 = fired.clone();
    let id_cell: Rc<RefCell<i64>> = Rc::new(RefCell::new(-1));
    let id_cell2 = id_cell.clone();

    let id = r.create_timer(
        0,
        move |r, _id| {
            *fired2.borrow_mut() += 1;
            let _ = r.delete_timer(*id_cell2.borrow());
            50
        },
        None::<fn(&mut Reactor)>,
    );
    *id_cell.borrow_mut() = id;

    // First pass: fires once and tombstones itself.
    r.process_events(Flags::TIME_EVENTS | Flags::DONT_WAIT);
    assert_eq!(*fired.borrow(), 1);

    // Subsequent passes must not fire it again, and it gets physically freed.
    for _ in 0..3 {
        r.process_events(Flags::TIME_EVENTS | Flags::DONT_WAIT);
    }
    assert_eq!(*fired.borrow(), 1);
}

#[test]
fn barrier_ordering() {
    // A connected stream socket is readable (peer wrote to it) and writable
    // (its own send buffer has room) at the same time, unlike a pipe end.
    let (a, b) = socketpair();
    write_all(b, b"x");

    let mut r = Reactor::new(128).unwrap();
    let log = Rc::new(RefCell::new(Vec::new()));
    let log_r = log.clone();
    let log_w = log.clone();

    r.register_file(a, Mask::READABLE, move |_r, fd, _mask| {
        let mut buf = [0u8; 1];
        unsafe { libc::read(fd, buf.as_mut_ptr() as *mut _, buf.len()) };
        log_r.borrow_mut().push("read");
    })
    .unwrap();
    r.register_file(a, Mask::WRITABLE | Mask::BARRIER, move |_r, _fd, _mask| {
        log_w.borrow_mut().push("write");
    })
    .unwrap();

    r.process_events(Flags::FILE_EVENTS | Flags::DONT_WAIT);

    assert_eq!(&log.borrow()[..], &["write", "read"]);

    unsafe {
        libc::close(a);
        libc::close(b);
    }
}

#[test]
fn resize_refused() {
    let (read_fd, _write_fd) = pipe();
    let mut r = Reactor::new(64).unwrap();
    r.register_file(read_fd, Mask::READABLE, |_r, _fd, _mask| {}).unwrap();

    // Force maxfd up to 50 regardless of which small fd `pipe()` handed back,
    // by registering a second, higher-numbered descriptor via dup2.
    let high_fd = 50;
    assert_eq!(unsafe { libc::dup2(read_fd, high_fd) }, high_fd);
    r.register_file(high_fd, Mask::READABLE, |_r, _fd, _mask| {}).unwrap();

    let before = r.file_interest(high_fd);
    let err = r.resize(32).unwrap_err();
    assert!(matches!(err, reactor::Error::TooSmall { .. }));
    assert_eq!(r.file_interest(high_fd), before);

    unsafe {
        libc::close(read_fd);
        libc::close(high_fd);
    }
}
