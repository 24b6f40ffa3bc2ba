// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Multiplexed waiting over a dynamic set of borrowed pipe and socket handles.
//
// The handle table and the platform wait structure are kept in lock-step:
// row `i` of one always describes row `i` of the other. Every operation holds
// the table lock for its whole duration, including the native wait; a second
// thread arriving meanwhile fails fast with `ConcurrentAccess` instead of
// queueing behind it.

use std::sync::{Mutex, MutexGuard, TryLockError};

use tracing::{event, Level};

use crate::error::{Error, Result};
use crate::events::Events;
use crate::handle::{HandleKind, PipeEnd, PollHandle};
use crate::platform::posix::{self, Deadline, Peek};
use crate::platform::PlatformWaitSet;

/// Hard cap on the number of rows in one poll set.
pub const MAX_POLL_HANDLES: usize = 64;

/// Rows are allocated in chunks of this size.
pub const POLL_GROW_BY: usize = 16;

/// One registered handle.
#[derive(Debug, Clone, Copy)]
pub struct HandleEntry<'h> {
    handle: PollHandle<'h>,
    id: u32,
    events: Events,
    final_entry: bool,
}

impl<'h> HandleEntry<'h> {
    pub fn handle(&self) -> PollHandle<'h> {
        self.handle
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    /// Events requested at registration (or by the last `events_change`).
    pub fn events(&self) -> Events {
        self.events
    }

    /// `true` for the last row referencing this particular handle.
    pub fn is_final_entry(&self) -> bool {
        self.final_entry
    }
}

/// A handle reported ready by [`PollSet::wait`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ready {
    pub id: u32,
    pub events: Events,
}

struct Table<'h> {
    entries: Vec<HandleEntry<'h>>,
    native: PlatformWaitSet,
    allocated: usize,
}

impl<'h> Table<'h> {
    fn position(&self, id: u32) -> Option<usize> {
        self.entries.iter().position(|e| e.id == id)
    }

    fn grow_if_full(&mut self) {
        if self.entries.len() < self.allocated {
            return;
        }
        let chunk = POLL_GROW_BY.min(MAX_POLL_HANDLES - self.allocated);
        self.entries.reserve_exact(chunk);
        self.native.reserve_exact(chunk);
        self.allocated += chunk;
    }

    /// Give back whole unused chunks so that add-then-remove is a no-op.
    fn shrink_to_fit_chunks(&mut self) {
        let wanted = self.entries.len().div_ceil(POLL_GROW_BY) * POLL_GROW_BY;
        if wanted < self.allocated {
            self.entries.shrink_to(wanted);
            self.native.shrink_to(wanted);
            self.allocated = wanted;
        }
    }

    /// The first row with a relevant event after a native wait.
    fn harvest(&self) -> Option<Ready> {
        for (idx, entry) in self.entries.iter().enumerate() {
            let mut events = self.native.ready_events(idx);
            if events.is_empty() {
                continue;
            }
            // A dying socket may report only READ. If a peek finds end-of-data
            // instead of bytes, call it an error.
            if entry.handle.kind() == HandleKind::Socket
                && events & (Events::READ | Events::ERROR) == Events::READ
                && matches!(posix::peek(entry.handle.borrowed()), Ok(Peek::Eof))
            {
                events |= Events::ERROR;
            }
            events &= entry.events | Events::ERROR;
            if !events.is_empty() {
                return Some(Ready {
                    id: entry.id,
                    events,
                });
            }
        }
        None
    }
}

/// A set of borrowed handles that one thread at a time can block on.
pub struct PollSet<'h> {
    table: Mutex<Table<'h>>,
}

impl<'h> Default for PollSet<'h> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'h> PollSet<'h> {
    /// An empty poll set. Nothing is allocated until the first `add`.
    pub fn new() -> Self {
        Self {
            table: Mutex::new(Table {
                entries: Vec::new(),
                native: PlatformWaitSet::new(),
                allocated: 0,
            }),
        }
    }

    fn busy(&self) -> Result<MutexGuard<'_, Table<'h>>> {
        match self.table.try_lock() {
            Ok(guard) => Ok(guard),
            Err(TryLockError::WouldBlock) => Err(Error::ConcurrentAccess),
            // Rows are only mutated after every fallible step, so the table is
            // consistent even if a previous holder panicked.
            Err(TryLockError::Poisoned(p)) => Ok(p.into_inner()),
        }
    }

    /// Register `handle` under `id`, waiting for `events`.
    ///
    /// The same handle may be registered under several ids; the newest row
    /// becomes its final entry.
    pub fn add(&self, handle: PollHandle<'h>, events: Events, id: u32) -> Result<()> {
        if !Events::is_valid_request(events.bits()) {
            return Err(Error::InvalidArgument("events must be a non-empty subset of READ | WRITE | ERROR"));
        }
        let mut table = self.busy()?;
        if table.position(id).is_some() {
            return Err(Error::DuplicateId(id));
        }
        if table.entries.len() >= MAX_POLL_HANDLES {
            return Err(Error::SetFull);
        }
        handle.check_pollable(events)?;
        let revents =
            posix::probe(handle.borrowed(), events.to_poll_interest()).map_err(Error::from_os)?;
        if revents & libc::POLLNVAL != 0 {
            return Err(Error::HandleNotPollable("descriptor is not open"));
        }

        table.grow_if_full();
        for entry in table.entries.iter_mut() {
            if entry.handle.same_handle(&handle) {
                entry.final_entry = false;
            }
        }
        table.entries.push(HandleEntry {
            handle,
            id,
            events,
            final_entry: true,
        });
        table.native.push(handle.as_raw_fd(), events);

        event!(Level::TRACE, message = "poll set add", id, fd = handle.as_raw_fd(), events = ?events, count = table.entries.len());
        Ok(())
    }

    /// Register the read or write end of a pipe.
    pub fn add_pipe<F: std::os::fd::AsFd>(&self, pipe: &'h F, end: PipeEnd, events: Events, id: u32) -> Result<()> {
        let handle = match end {
            PipeEnd::Read => PollHandle::pipe_read(pipe),
            PipeEnd::Write => PollHandle::pipe_write(pipe),
        };
        self.add(handle, events, id)
    }

    /// Register a socket.
    pub fn add_socket<F: std::os::fd::AsFd>(&self, socket: &'h F, events: Events, id: u32) -> Result<()> {
        self.add(PollHandle::socket(socket), events, id)
    }

    /// Unregister `id`.
    pub fn remove(&self, id: u32) -> Result<()> {
        let mut table = self.busy()?;
        let idx = table.position(id).ok_or(Error::NotFound(id))?;
        let removed = table.entries.remove(idx);
        table.native.remove(idx);

        if removed.final_entry {
            if let Some(entry) = table
                .entries
                .iter_mut()
                .rev()
                .find(|e| e.handle.same_handle(&removed.handle))
            {
                entry.final_entry = true;
            }
        }
        table.shrink_to_fit_chunks();

        event!(Level::TRACE, message = "poll set remove", id, count = table.entries.len());
        Ok(())
    }

    /// Replace the events requested for `id` in place.
    pub fn events_change(&self, id: u32, events: Events) -> Result<()> {
        if !Events::is_valid_request(events.bits()) {
            return Err(Error::InvalidArgument("events must be a non-empty subset of READ | WRITE | ERROR"));
        }
        let mut table = self.busy()?;
        let idx = table.position(id).ok_or(Error::NotFound(id))?;
        table.entries[idx].handle.check_pollable(events)?;
        table.entries[idx].events = events;
        table.native.set_events(idx, events);
        Ok(())
    }

    /// The handle registered under `id`.
    pub fn query_handle(&self, id: u32) -> Result<PollHandle<'h>> {
        self.entry(id).map(|e| e.handle)
    }

    /// Events currently requested for `id`.
    pub fn events(&self, id: u32) -> Result<Events> {
        self.entry(id).map(|e| e.events)
    }

    /// A copy of the row registered under `id`.
    pub fn entry(&self, id: u32) -> Result<HandleEntry<'h>> {
        let table = self.busy()?;
        let idx = table.position(id).ok_or(Error::NotFound(id))?;
        Ok(table.entries[idx])
    }

    /// Number of registered rows.
    pub fn count(&self) -> Result<usize> {
        Ok(self.busy()?.entries.len())
    }

    /// Number of rows currently allocated.
    pub fn capacity(&self) -> Result<usize> {
        Ok(self.busy()?.allocated)
    }

    /// Block until a handle is ready or `timeout_ms` elapses (`None` waits forever).
    ///
    /// Signal interruptions are retried against the deadline captured on entry.
    /// An empty set sleeps for the timeout and reports [`Error::Timeout`], or
    /// fails with [`Error::Deadlock`] when asked to wait forever.
    pub fn wait(&self, timeout_ms: Option<u64>) -> Result<Ready> {
        self.wait_worker(timeout_ms, true)
    }

    /// Like [`wait`](Self::wait), but returns [`Error::Interrupted`] on the
    /// first signal interruption instead of retrying.
    pub fn wait_no_resume(&self, timeout_ms: Option<u64>) -> Result<Ready> {
        self.wait_worker(timeout_ms, false)
    }

    fn wait_worker(&self, timeout_ms: Option<u64>, resume: bool) -> Result<Ready> {
        let mut table = self.busy()?;
        let deadline = Deadline::after_ms(timeout_ms);

        if table.entries.is_empty() {
            if deadline.is_infinite() {
                return Err(Error::Deadlock);
            }
            while let Some(left) = deadline.remaining().filter(|d| !d.is_zero()) {
                std::thread::sleep(left);
            }
            return Err(Error::Timeout);
        }

        loop {
            match table.native.wait(&deadline) {
                Ok(0) => {}
                Ok(_) => {
                    if let Some(ready) = table.harvest() {
                        event!(Level::TRACE, message = "poll set ready", id = ready.id, events = ?ready.events);
                        return Ok(ready);
                    }
                }
                Err(e) if posix::is_interrupted(&e) => {
                    if !resume {
                        return Err(Error::Interrupted);
                    }
                }
                Err(e) => return Err(Error::from_os(e)),
            }
            if deadline.expired() {
                return Err(Error::Timeout);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixStream;

    #[test]
    fn growth_happens_in_chunks() {
        let socks: Vec<_> = (0..POLL_GROW_BY + 1).map(|_| UnixStream::pair().expect("pair")).collect();
        let set = PollSet::new();
        assert_eq!(set.capacity().unwrap(), 0);

        for (i, (a, _)) in socks.iter().enumerate() {
            set.add_socket(a, Events::READ, i as u32).expect("add");
        }
        assert_eq!(set.count().unwrap(), POLL_GROW_BY + 1);
        assert_eq!(set.capacity().unwrap(), 2 * POLL_GROW_BY);

        set.remove(POLL_GROW_BY as u32).expect("remove");
        assert_eq!(set.capacity().unwrap(), POLL_GROW_BY);
    }

    #[test]
    fn table_never_exceeds_cap() {
        let socks: Vec<_> = (0..MAX_POLL_HANDLES).map(|_| UnixStream::pair().expect("pair")).collect();
        let extra = UnixStream::pair().expect("pair");
        let set = PollSet::new();
        for (i, (a, _)) in socks.iter().enumerate() {
            set.add_socket(a, Events::READ, i as u32).expect("add");
        }
        assert_eq!(set.capacity().unwrap(), MAX_POLL_HANDLES);
        let err = set.add_socket(&extra.0, Events::READ, 1000).unwrap_err();
        assert!(matches!(err, Error::SetFull));
        assert_eq!(set.count().unwrap(), MAX_POLL_HANDLES);
    }

    #[test]
    fn final_entry_moves_to_newest_row() {
        let (a, _b) = UnixStream::pair().expect("pair");
        let set = PollSet::new();
        set.add_socket(&a, Events::READ, 1).unwrap();
        set.add_socket(&a, Events::WRITE, 2).unwrap();
        assert!(!set.entry(1).unwrap().is_final_entry());
        assert!(set.entry(2).unwrap().is_final_entry());

        set.remove(2).unwrap();
        assert!(set.entry(1).unwrap().is_final_entry());
    }
}
