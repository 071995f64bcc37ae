//! Platform-specific readiness poller.
//!
//! Both backends expose the same surface to the reactor:
//! - `new()` creates the poller and its wake-up source,
//! - `update(fd, previous, next)` moves a descriptor between interest sets,
//! - `poll(events, timeout)` blocks until readiness, a wake-up or the timeout.
//!
//! Registrations are level-triggered: a descriptor that stays readable keeps
//! being reported until its read interest is dropped.

pub(crate) mod common;

#[cfg(any(target_os = "macos", target_os = "freebsd"))]
mod kqueue;

#[cfg(target_os = "linux")]
mod epoll;

#[cfg(any(target_os = "macos", target_os = "freebsd"))]
pub(crate) type Poller = kqueue::KqueuePoller;

#[cfg(target_os = "linux")]
pub(crate) type Poller = epoll::EpollPoller;

#[cfg(unix)]
pub(crate) mod unix;

#[cfg(unix)]
pub(crate) use unix as platform;

use std::time::Duration;

/// Converts a poll timeout to whole milliseconds, rounding up so a short
/// timeout never degrades into a busy loop.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
pub(crate) fn timeout_millis(timeout: Option<Duration>) -> i32 {
    match timeout {
        None => -1,
        Some(t) => t.as_nanos().div_ceil(1_000_000).min(i32::MAX as u128) as i32,
    }
}
