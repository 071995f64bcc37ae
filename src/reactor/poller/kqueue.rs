//! `kqueue` backend for macOS and FreeBSD.
//!
//! kqueue tracks read and write filters separately, which maps one to one
//! onto channel directions: arming adds a filter, disarming deletes it. The
//! wake-up source is an `EVFILT_USER` event on the queue itself.

use super::common::{Interest, Waker};
use crate::reactor::Direction;
use crate::reactor::event::Event;

use libc::{
    EV_ADD, EV_CLEAR, EV_DELETE, EVFILT_READ, EVFILT_USER, EVFILT_WRITE, NOTE_TRIGGER,
    kevent, kqueue, timespec,
};
use std::io;
use std::os::fd::{FromRawFd, OwnedFd, RawFd};
use std::sync::Arc;
use std::time::Duration;
use std::{mem, ptr};

/// Identifier of the user event used for wake-ups.
const WAKE_IDENT: usize = 0;

pub(crate) struct KqueuePoller {
    /// Reusable buffer for kernel events.
    events: Vec<kevent>,

    /// Waker owning the kqueue descriptor itself.
    waker: Arc<Waker>,
}

fn change(ident: usize, filter: i16, flags: u16, fflags: u32) -> kevent {
    let mut ev: kevent = unsafe { mem::zeroed() };
    ev.ident = ident as _;
    ev.filter = filter as _;
    ev.flags = flags as _;
    ev.fflags = fflags as _;
    ev
}

fn submit(kq: RawFd, ev: &kevent) -> io::Result<()> {
    let rc = unsafe { libc::kevent(kq, ev, 1, ptr::null_mut(), 0, ptr::null()) };
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

impl Waker {
    /// Interrupts a blocking `kevent` wait.
    pub(crate) fn wake(&self) {
        let ev = change(WAKE_IDENT, EVFILT_USER, 0, NOTE_TRIGGER);
        let _ = submit(self.fd(), &ev);
    }
}

impl KqueuePoller {
    pub(crate) fn new() -> io::Result<Self> {
        let raw = unsafe { kqueue() };
        if raw < 0 {
            return Err(io::Error::last_os_error());
        }
        let kq = unsafe { OwnedFd::from_raw_fd(raw) };

        submit(raw, &change(WAKE_IDENT, EVFILT_USER, EV_ADD | EV_CLEAR, 0))?;

        Ok(Self {
            events: Vec::with_capacity(64),
            waker: Arc::new(Waker(kq)),
        })
    }

    pub(crate) fn waker(&self) -> Arc<Waker> {
        self.waker.clone()
    }

    /// Adds the filters switched on and deletes the ones switched off.
    pub(crate) fn update(&self, fd: RawFd, previous: Interest, next: Interest) -> io::Result<()> {
        for (direction, filter) in [(Direction::Read, EVFILT_READ), (Direction::Write, EVFILT_WRITE)] {
            let was = previous.contains(direction);
            let wants = next.contains(direction);

            if was == wants {
                continue;
            }

            let flags = if wants { EV_ADD } else { EV_DELETE };
            match submit(self.waker.fd(), &change(fd as usize, filter, flags, 0)) {
                Err(e) if !wants && e.raw_os_error() == Some(libc::ENOENT) => {}
                other => other?,
            }
        }

        Ok(())
    }

    /// Drops any registration for `fd`, ignoring missing filters.
    pub(crate) fn remove(&self, fd: RawFd) {
        for filter in [EVFILT_READ, EVFILT_WRITE] {
            let _ = submit(self.waker.fd(), &change(fd as usize, filter, EV_DELETE, 0));
        }
    }

    /// Waits for readiness and fills `events` (cleared first).
    ///
    /// An interrupted wait returns with no events.
    pub(crate) fn poll(
        &mut self,
        events: &mut Vec<Event>,
        timeout: Option<Duration>,
    ) -> io::Result<()> {
        events.clear();

        let ts = timeout.map(|t| timespec {
            tv_sec: t.as_secs().min(libc::time_t::MAX as u64) as libc::time_t,
            tv_nsec: t.subsec_nanos() as _,
        });
        let ts_ptr = ts.as_ref().map_or(ptr::null(), |t| t as *const timespec);

        let n = unsafe {
            libc::kevent(
                self.waker.fd(),
                ptr::null(),
                0,
                self.events.as_mut_ptr(),
                self.events.capacity() as i32,
                ts_ptr,
            )
        };

        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(err);
        }

        unsafe {
            self.events.set_len(n as usize);
        }

        for ev in &self.events {
            if ev.filter == EVFILT_USER {
                continue;
            }

            // End of file arrives on the filter that was armed; the next
            // syscall in that direction observes it.
            let fd = ev.ident as RawFd;
            let readable = ev.filter == EVFILT_READ;
            let writable = ev.filter == EVFILT_WRITE;

            if let Some(e) = events.iter_mut().find(|e| e.fd == fd) {
                e.readable |= readable;
                e.writable |= writable;
            } else {
                events.push(Event {
                    fd,
                    readable,
                    writable,
                });
            }
        }

        unsafe {
            self.events.set_len(0);
        }

        Ok(())
    }
}
