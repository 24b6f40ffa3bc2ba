// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Listening side of the local IPC transport.

use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd};
use std::path::{Path, PathBuf};

use bitflags::bitflags;
use tracing::{event, Level};

use crate::cancel::{Direction, Gate};
use crate::error::{Error, Result};
use crate::ipc_name;
use crate::platform::posix::{self, Deadline};
use crate::session::Session;

/// Pending-connection backlog passed to `listen(2)`.
pub const LISTEN_BACKLOG: libc::c_int = 16;

bitflags! {
    /// Creation flags for [`Server`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ServerFlags: u32 {
        /// The server is expected to accept more than one session.
        ///
        /// Listening repeatedly works either way; the flag is kept so callers
        /// can state their intent.
        const MULTI_SESSION = 0x1;
        /// Treat the name as a filesystem path instead of a portable name.
        const NATIVE_NAME = 0x2;
    }
}

/// A bound, listening local IPC endpoint.
///
/// Share it between threads with `Arc<Server>` to call [`cancel`](Self::cancel)
/// while another thread is blocked in [`listen`](Self::listen). Dropping the
/// server cancels it, closes the socket and removes the endpoint file.
pub struct Server {
    name: String,
    flags: ServerFlags,
    path: PathBuf,
    endpoint: posix::FileId,
    socket: OwnedFd,
    gate: Gate,
}

impl Server {
    /// Bind and listen on the endpoint for `name`.
    ///
    /// If the address is in use by a socket file nobody listens on any more,
    /// that file is removed and the bind retried once. A live server or a
    /// non-socket file at the path makes creation fail instead.
    pub fn create(name: &str, flags: ServerFlags) -> Result<Self> {
        let native = flags.contains(ServerFlags::NATIVE_NAME);
        let (path, addr) = ipc_name::construct_address(name, native)?;
        let socket = posix::stream_socket().map_err(Error::from_os)?;

        if let Err(e) = posix::bind(socket.as_fd(), &addr) {
            if e.raw_os_error() != Some(libc::EADDRINUSE) || !Self::reclaim_stale(&path, &addr)? {
                return Err(Error::from_os(e));
            }
            posix::bind(socket.as_fd(), &addr).map_err(Error::from_os)?;
        }

        // The endpoint file exists from here on and must go if setup fails.
        let finish = || -> Result<(Gate, posix::FileId)> {
            let endpoint = posix::socket_file_id(&path)
                .map_err(Error::from_os)?
                .ok_or(Error::InvalidArgument("bound endpoint is not a socket"))?;
            posix::listen(socket.as_fd(), LISTEN_BACKLOG).map_err(Error::from_os)?;
            posix::set_nonblocking(socket.as_raw_fd()).map_err(Error::from_os)?;
            Ok((Gate::new()?, endpoint))
        };
        let (gate, endpoint) = match finish() {
            Ok(done) => done,
            Err(e) => {
                let _ = posix::unlink(&path);
                return Err(e);
            }
        };

        event!(Level::DEBUG, message = "server created", name, path = %path.display(), flags = ?flags);
        Ok(Self {
            name: name.to_string(),
            flags,
            path,
            endpoint,
            socket,
            gate,
        })
    }

    /// Remove the socket file left at `path` by a server that is gone.
    ///
    /// Returns `false`, touching nothing, if the path holds anything other
    /// than a socket or if a server still accepts connections on it.
    fn reclaim_stale(path: &Path, addr: &posix::UnixAddr) -> Result<bool> {
        match posix::socket_file_id(path) {
            Ok(Some(_)) => {}
            Ok(None) => return Ok(false),
            // Vanished in between; the retried bind will tell.
            Err(e) if e.raw_os_error() == Some(libc::ENOENT) => return Ok(true),
            Err(e) => return Err(Error::from_os(e)),
        }
        if !posix::endpoint_is_stale(addr).map_err(Error::from_os)? {
            event!(Level::DEBUG, message = "endpoint in use by a live server", path = %path.display());
            return Ok(false);
        }
        event!(Level::DEBUG, message = "removing stale endpoint", path = %path.display());
        match posix::unlink(path) {
            Ok(()) => Ok(true),
            Err(e) if e.raw_os_error() == Some(libc::ENOENT) => Ok(true),
            Err(e) => Err(Error::from_os(e)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn flags(&self) -> ServerFlags {
        self.flags
    }

    /// Filesystem path of the bound endpoint.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Block until a client connects and return the server side of the new session.
    ///
    /// Only one thread may listen at a time; others get [`Error::ResourceBusy`].
    /// Returns [`Error::Cancelled`] if [`cancel`](Self::cancel) was called
    /// before or during the wait, or races with a successful accept.
    pub fn listen(&self) -> Result<Session> {
        let guard = self.gate.enter(Direction::Read, Error::ResourceBusy)?;
        let deadline = Deadline::after_ms(None);
        loop {
            guard.wait(self.socket.as_fd(), libc::POLLIN, &deadline)?;
            match posix::accept(self.socket.as_fd()) {
                Ok(conn) => {
                    // A cancel that raced the accept wins; `conn` is closed on return.
                    guard.check()?;
                    let session = Session::from_accepted(conn)?;
                    event!(Level::DEBUG, message = "accepted", name = %self.name);
                    return Ok(session);
                }
                Err(e)
                    if posix::is_would_block(&e)
                        || posix::is_interrupted(&e)
                        || e.raw_os_error() == Some(libc::ECONNABORTED) =>
                {
                    continue;
                }
                Err(e) => return Err(Error::from_os(e)),
            }
        }
    }

    /// Abort a blocked or future [`listen`](Self::listen). Idempotent.
    pub fn cancel(&self) {
        self.gate.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.gate.is_cancelled()
    }

    /// Change the group owning the endpoint file.
    pub fn grant_group_access(&self, gid: u32) -> Result<()> {
        posix::chgrp(&self.path, gid).map_err(Error::from_os)
    }

    /// Set the permission bits (`0o777` mask) of the endpoint file.
    pub fn set_access_mode(&self, mode: u32) -> Result<()> {
        if mode & !0o777 != 0 {
            return Err(Error::InvalidArgument("access mode has bits outside 0o777"));
        }
        posix::chmod(&self.path, mode).map_err(Error::from_os)
    }

    /// Cancel and tear down. Equivalent to dropping the server.
    pub fn destroy(self) {
        drop(self);
    }
}

impl AsFd for Server {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.socket.as_fd()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.gate.cancel();
        // Only remove the file if it is still ours; another server may have
        // bound the name after ours was deleted.
        match posix::socket_file_id(&self.path) {
            Ok(Some(id)) if id == self.endpoint => {
                if let Err(e) = posix::unlink(&self.path) {
                    event!(Level::DEBUG, message = "endpoint unlink failed", path = %self.path.display(), error = %e);
                }
            }
            Ok(_) => {
                event!(Level::DEBUG, message = "endpoint replaced, leaving it", path = %self.path.display());
            }
            Err(e) => {
                event!(Level::DEBUG, message = "endpoint already gone", path = %self.path.display(), error = %e);
            }
        }
        event!(Level::DEBUG, message = "server destroyed", name = %self.name);
    }
}
