// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Cooperative cancellation shared by servers and sessions.
//
// A gate pairs a sticky cancel flag with a wake pipe and records which thread
// currently owns each direction (read side and write side). The state lock is
// only held around this bookkeeping; the native wait itself runs unlocked and
// also polls the wake pipe, so `cancel` can always get in and abort it.

use std::os::fd::{AsRawFd, BorrowedFd};
use std::sync::{Mutex, MutexGuard};
use std::thread::{self, ThreadId};

use tracing::{event, Level};

use crate::error::{Error, Result};
use crate::platform::posix::{self, Deadline, WakePipe};

/// Which operation slot a caller occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Direction {
    /// Reads, waits for data and accepts.
    Read,
    /// Writes.
    Write,
}

#[derive(Debug, Default)]
struct GateState {
    cancelled: bool,
    read_thread: Option<ThreadId>,
    write_thread: Option<ThreadId>,
}

impl GateState {
    fn slot(&mut self, dir: Direction) -> &mut Option<ThreadId> {
        match dir {
            Direction::Read => &mut self.read_thread,
            Direction::Write => &mut self.write_thread,
        }
    }
}

pub(crate) struct Gate {
    state: Mutex<GateState>,
    wake: WakePipe,
}

impl Gate {
    pub(crate) fn new() -> Result<Self> {
        Ok(Self {
            state: Mutex::new(GateState::default()),
            wake: WakePipe::new().map_err(Error::from_os)?,
        })
    }

    fn state(&self) -> MutexGuard<'_, GateState> {
        // Plain flags; a panicking holder cannot leave them half-updated.
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Claim the `dir` slot for the calling thread.
    ///
    /// Fails with `Cancelled` once cancelled (checked first, so a caller
    /// racing a cancelled owner learns about the cancellation) and with `busy`
    /// if another thread holds the slot.
    pub(crate) fn enter(&self, dir: Direction, busy: Error) -> Result<GateGuard<'_>> {
        let mut st = self.state();
        if st.cancelled {
            return Err(Error::Cancelled);
        }
        let slot = st.slot(dir);
        if slot.is_some() {
            return Err(busy);
        }
        *slot = Some(thread::current().id());
        Ok(GateGuard { gate: self, dir })
    }

    /// `true` while some thread holds the `dir` slot.
    pub(crate) fn is_active(&self, dir: Direction) -> bool {
        self.state().slot(dir).is_some()
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.state().cancelled
    }

    /// Set the cancel flag and poke whoever is blocked. Idempotent.
    pub(crate) fn cancel(&self) {
        let mut st = self.state();
        if st.cancelled {
            return;
        }
        st.cancelled = true;
        event!(
            Level::DEBUG,
            message = "cancel",
            reader = ?st.read_thread,
            writer = ?st.write_thread
        );
        if let Err(e) = self.wake.poke() {
            // The flag alone still stops the next attempt.
            event!(Level::WARN, message = "wake-up poke failed", error = %e);
        }
    }
}

/// Ownership of one direction slot; released on drop.
pub(crate) struct GateGuard<'a> {
    gate: &'a Gate,
    dir: Direction,
}

impl GateGuard<'_> {
    /// `Err(Cancelled)` if the gate has been cancelled.
    pub(crate) fn check(&self) -> Result<()> {
        if self.gate.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    /// Block until `fd` reports any of `interest`, the deadline passes or the
    /// gate is cancelled.
    ///
    /// Returns the native `revents` of `fd`, or `None` on timeout. Signal
    /// interruptions are retried against the same deadline.
    pub(crate) fn wait(
        &self,
        fd: BorrowedFd<'_>,
        interest: libc::c_short,
        deadline: &Deadline,
    ) -> Result<Option<libc::c_short>> {
        loop {
            self.check()?;
            let mut fds = [
                posix::pollfd(fd.as_raw_fd(), interest),
                posix::pollfd(self.gate.wake.raw_fd(), libc::POLLIN),
            ];
            match posix::poll(&mut fds, deadline.poll_timeout()) {
                Ok(0) => {}
                Ok(_) => {
                    if fds[1].revents != 0 {
                        return Err(Error::Cancelled);
                    }
                    if fds[0].revents != 0 {
                        return Ok(Some(fds[0].revents));
                    }
                }
                Err(e) if posix::is_interrupted(&e) => {}
                Err(e) => return Err(Error::from_os(e)),
            }
            if deadline.expired() {
                return Ok(None);
            }
        }
    }
}

impl Drop for GateGuard<'_> {
    fn drop(&mut self) {
        *self.gate.state().slot(self.dir) = None;
    }
}
