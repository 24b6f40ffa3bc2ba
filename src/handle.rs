// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Borrowed pipe and socket handles that can be registered in a poll set.

use std::os::fd::{AsFd, AsRawFd, BorrowedFd, RawFd};

use crate::error::{Error, Result};
use crate::events::Events;
use crate::platform::posix::{self, FdType};

/// Which end of a pipe a handle refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeEnd {
    Read,
    Write,
}

/// The kind of object behind a [`PollHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleKind {
    Pipe(PipeEnd),
    Socket,
}

/// A pipe end or socket borrowed for the lifetime `'h`.
///
/// The poll set never closes the descriptor; the owner keeps it alive for at
/// least as long as the registration.
#[derive(Debug, Clone, Copy)]
pub struct PollHandle<'h> {
    kind: HandleKind,
    fd: BorrowedFd<'h>,
}

impl<'h> PollHandle<'h> {
    /// The read end of a pipe.
    pub fn pipe_read<F: AsFd>(fd: &'h F) -> Self {
        Self {
            kind: HandleKind::Pipe(PipeEnd::Read),
            fd: fd.as_fd(),
        }
    }

    /// The write end of a pipe.
    pub fn pipe_write<F: AsFd>(fd: &'h F) -> Self {
        Self {
            kind: HandleKind::Pipe(PipeEnd::Write),
            fd: fd.as_fd(),
        }
    }

    /// A connected, listening or otherwise pollable socket.
    pub fn socket<F: AsFd>(fd: &'h F) -> Self {
        Self {
            kind: HandleKind::Socket,
            fd: fd.as_fd(),
        }
    }

    pub fn kind(&self) -> HandleKind {
        self.kind
    }

    pub fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    /// `true` if both refer to the same underlying descriptor.
    pub fn same_handle(&self, other: &PollHandle<'_>) -> bool {
        self.as_raw_fd() == other.as_raw_fd()
    }

    /// Check that this handle can be waited on for `events`.
    ///
    /// A pipe's read end cannot wait for WRITE and its write end cannot wait
    /// for READ. The descriptor itself must be a FIFO or a socket matching
    /// the declared kind; regular files and the like are rejected.
    pub(crate) fn check_pollable(&self, events: Events) -> Result<()> {
        match self.kind {
            HandleKind::Pipe(PipeEnd::Read) if events.contains(Events::WRITE) => {
                return Err(Error::HandleNotPollable("read end of a pipe cannot wait for WRITE"));
            }
            HandleKind::Pipe(PipeEnd::Write) if events.contains(Events::READ) => {
                return Err(Error::HandleNotPollable("write end of a pipe cannot wait for READ"));
            }
            _ => {}
        }

        let actual = posix::fd_type(self.fd).map_err(Error::from_os)?;
        match (self.kind, actual) {
            (HandleKind::Pipe(_), FdType::Fifo) | (HandleKind::Socket, FdType::Socket) => Ok(()),
            (HandleKind::Pipe(_), _) => Err(Error::HandleNotPollable("descriptor is not a pipe")),
            (HandleKind::Socket, _) => Err(Error::HandleNotPollable("descriptor is not a socket")),
        }
    }

    pub(crate) fn borrowed(&self) -> BorrowedFd<'h> {
        self.fd
    }
}
