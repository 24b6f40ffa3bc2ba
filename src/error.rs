// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Error taxonomy shared by the poll set and the local IPC transport.

use std::io;

use thiserror::Error;

/// Any error produced by a [`PollSet`](crate::PollSet), [`Server`](crate::Server)
/// or [`Session`](crate::Session).
///
/// Ordinary runtime outcomes (timeout, broken pipe, cancellation) are plain
/// variants, never panics. Native errors that have no dedicated variant are
/// carried through [`Error::Io`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A caller-supplied argument is outside the accepted domain.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// An endpoint name contains characters that are not allowed.
    #[error("invalid endpoint name: {0:?}")]
    InvalidName(String),

    /// The native address built from an endpoint name does not fit the platform buffer.
    #[error("endpoint name too long ({len} bytes, limit {max})")]
    NameTooLong { len: usize, max: usize },

    /// The id is already registered in the poll set.
    #[error("id {0} is already registered")]
    DuplicateId(u32),

    /// No entry is registered under the id.
    #[error("id {0} is not registered")]
    NotFound(u32),

    /// The handle kind, its direction or the requested events cannot be waited on.
    #[error("handle cannot be polled: {0}")]
    HandleNotPollable(&'static str),

    /// The poll set already holds the maximum number of handles.
    #[error("poll set is full")]
    SetFull,

    /// Another thread is currently operating on the same object.
    #[error("concurrent access")]
    ConcurrentAccess,

    /// The resource is already in use by another operation (listen, write).
    #[error("resource busy")]
    ResourceBusy,

    /// The timeout elapsed before anything became ready.
    #[error("operation timed out")]
    Timeout,

    /// An infinite wait was requested on a set that can never become ready.
    #[error("infinite wait on an empty poll set")]
    Deadlock,

    /// The native wait was interrupted by a signal.
    ///
    /// Only returned by [`PollSet::wait_no_resume`](crate::PollSet::wait_no_resume);
    /// every other blocking call retries internally.
    #[error("interrupted")]
    Interrupted,

    /// The operation was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// The peer closed the connection and no unread data remains.
    #[error("broken pipe")]
    BrokenPipe,

    /// The platform offers no facility for the requested query.
    #[error("not supported on this platform")]
    NotSupported,

    /// A native error without a more specific variant.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// A specialized `Result` for poll and IPC operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Translate a native error into the common taxonomy.
    pub fn from_os(err: io::Error) -> Self {
        match err.raw_os_error() {
            #[cfg(unix)]
            Some(libc::EPIPE) | Some(libc::ECONNRESET) | Some(libc::ENOTCONN) => Error::BrokenPipe,
            #[cfg(unix)]
            Some(libc::ETIMEDOUT) => Error::Timeout,
            #[cfg(unix)]
            Some(libc::EINTR) => Error::Interrupted,
            _ => Error::Io(err),
        }
    }

    /// `true` for conditions the blocking loops retry instead of reporting.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Interrupted => true,
            Error::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
            ),
            _ => false,
        }
    }
}

impl From<Error> for io::Error {
    fn from(value: Error) -> Self {
        match value {
            Error::Io(error) => error,
            Error::Timeout => io::Error::new(io::ErrorKind::TimedOut, value),
            Error::BrokenPipe => io::Error::new(io::ErrorKind::BrokenPipe, value),
            Error::Interrupted => io::Error::new(io::ErrorKind::Interrupted, value),
            Error::InvalidArgument(_) | Error::InvalidName(_) => {
                io::Error::new(io::ErrorKind::InvalidInput, value)
            }
            Error::NotFound(_) => io::Error::new(io::ErrorKind::NotFound, value),
            Error::NotSupported => io::Error::new(io::ErrorKind::Unsupported, value),
            _ => io::Error::other(value),
        }
    }
}
