//! Linux `epoll` backend.
//!
//! Descriptors are registered with their own number as the event token, so
//! an event maps straight back to `(fd, direction)`. An internal `eventfd`
//! is registered under a reserved token to interrupt `epoll_wait`.

use super::common::{Interest, Waker};
use super::timeout_millis;
use crate::reactor::event::Event;

use libc::{
    EFD_CLOEXEC, EFD_NONBLOCK, EPOLL_CLOEXEC, EPOLL_CTL_ADD, EPOLL_CTL_DEL, EPOLL_CTL_MOD,
    EPOLLERR, EPOLLHUP, EPOLLIN, EPOLLOUT, EPOLLRDHUP, epoll_create1, epoll_ctl, epoll_event,
    epoll_wait, eventfd,
};
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::sync::Arc;
use std::time::Duration;

/// Reserved token used for the wake-up event. Descriptors are never negative,
/// so it cannot collide with a registered fd.
const WAKE_TOKEN: u64 = u64::MAX;

pub(crate) struct EpollPoller {
    /// The epoll instance.
    epoll: OwnedFd,

    /// Reusable buffer for kernel events.
    events: Vec<epoll_event>,

    /// Waker wrapping the internal eventfd.
    waker: Arc<Waker>,
}

impl Waker {
    /// Interrupts a blocking `epoll_wait`.
    pub(crate) fn wake(&self) {
        let buf: u64 = 1;
        // A full counter already guarantees a pending wake-up.
        unsafe {
            libc::write(self.fd(), &buf as *const u64 as *const _, 8);
        }
    }
}

impl EpollPoller {
    pub(crate) fn new() -> io::Result<Self> {
        let raw = unsafe { epoll_create1(EPOLL_CLOEXEC) };
        if raw < 0 {
            return Err(io::Error::last_os_error());
        }
        let epoll = unsafe { OwnedFd::from_raw_fd(raw) };

        let raw = unsafe { eventfd(0, EFD_NONBLOCK | EFD_CLOEXEC) };
        if raw < 0 {
            return Err(io::Error::last_os_error());
        }
        let wake_fd = unsafe { OwnedFd::from_raw_fd(raw) };

        let mut event = epoll_event {
            events: EPOLLIN as u32,
            u64: WAKE_TOKEN,
        };
        let rc = unsafe { epoll_ctl(epoll.as_raw_fd(), EPOLL_CTL_ADD, raw, &mut event) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(Self {
            epoll,
            events: Vec::with_capacity(64),
            waker: Arc::new(Waker(wake_fd)),
        })
    }

    pub(crate) fn waker(&self) -> Arc<Waker> {
        self.waker.clone()
    }

    /// Moves `fd` from the `previous` interest set to `next`, adding,
    /// modifying or deleting the registration as needed.
    pub(crate) fn update(&self, fd: RawFd, previous: Interest, next: Interest) -> io::Result<()> {
        let op = match (previous.is_empty(), next.is_empty()) {
            (true, true) => return Ok(()),
            (true, false) => EPOLL_CTL_ADD,
            (false, false) => EPOLL_CTL_MOD,
            (false, true) => EPOLL_CTL_DEL,
        };

        let mut flags = 0;
        if next.read {
            flags |= EPOLLIN | EPOLLRDHUP;
        }
        if next.write {
            flags |= EPOLLOUT;
        }

        let mut event = epoll_event {
            events: flags as u32,
            u64: fd as u64,
        };

        let rc = unsafe { epoll_ctl(self.epoll.as_raw_fd(), op, fd, &mut event) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(())
    }

    /// Drops any registration for `fd`, ignoring "not registered".
    pub(crate) fn remove(&self, fd: RawFd) {
        unsafe {
            epoll_ctl(
                self.epoll.as_raw_fd(),
                EPOLL_CTL_DEL,
                fd,
                std::ptr::null_mut(),
            );
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

        let n = unsafe {
            epoll_wait(
                self.epoll.as_raw_fd(),
                self.events.as_mut_ptr(),
                self.events.capacity() as i32,
                timeout_millis(timeout),
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
            if ev.u64 == WAKE_TOKEN {
                let mut buf = 0u64;
                unsafe {
                    libc::read(self.waker.fd(), &mut buf as *mut u64 as *mut _, 8);
                }
                continue;
            }

            let hangup = ev.events & ((EPOLLERR | EPOLLHUP) as u32) != 0;

            events.push(Event {
                fd: ev.u64 as RawFd,
                readable: hangup || ev.events & ((EPOLLIN | EPOLLRDHUP) as u32) != 0,
                writable: hangup || ev.events & (EPOLLOUT as u32) != 0,
            });
        }

        unsafe {
            self.events.set_len(0);
        }

        Ok(())
    }
}
