// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// One established local IPC connection: a reference-counted, bidirectional
// byte stream over a connected AF_UNIX socket.

use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd};
use std::sync::Arc;

use bitflags::bitflags;
use tracing::{event, Level};

use crate::cancel::{Direction, Gate, GateGuard};
use crate::error::{Error, Result};
use crate::events::Events;
use crate::ipc_name;
use crate::platform::posix::{self, Deadline, Peek};
use crate::platform::PeerIdentity;

bitflags! {
    /// Connection flags for [`Session::connect`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SessionFlags: u32 {
        /// Treat the name as a filesystem path instead of a portable name.
        const NATIVE_NAME = 0x1;
    }
}

struct SessionInner {
    socket: OwnedFd,
    server_side: bool,
    gate: Gate,
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        event!(Level::TRACE, message = "session released", fd = self.socket.as_raw_fd(), server_side = self.server_side);
    }
}

/// A connected local IPC session.
///
/// Cloning retains the session and dropping a clone releases it; the socket is
/// closed when the last clone goes. One read-direction call (read, read
/// without blocking, wait for data) and one write may run at the same time;
/// a second concurrent call in the same direction fails with
/// [`Error::ConcurrentAccess`].
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Connect to the server listening on `name`.
    pub fn connect(name: &str, flags: SessionFlags) -> Result<Self> {
        let native = flags.contains(SessionFlags::NATIVE_NAME);
        let (path, addr) = ipc_name::construct_address(name, native)?;
        let socket = posix::stream_socket().map_err(Error::from_os)?;
        posix::connect(socket.as_fd(), &addr).map_err(Error::from_os)?;
        let session = Self::from_socket(socket, false)?;
        event!(Level::DEBUG, message = "connected", path = %path.display());
        Ok(session)
    }

    /// Wrap a connection returned by `accept`. Dropping on failure closes it.
    pub(crate) fn from_accepted(conn: OwnedFd) -> Result<Self> {
        Self::from_socket(conn, true)
    }

    fn from_socket(socket: OwnedFd, server_side: bool) -> Result<Self> {
        posix::set_nonblocking(socket.as_raw_fd()).map_err(Error::from_os)?;
        let gate = Gate::new()?;
        Ok(Self {
            inner: Arc::new(SessionInner {
                socket,
                server_side,
                gate,
            }),
        })
    }

    fn fd(&self) -> BorrowedFd<'_> {
        self.inner.socket.as_fd()
    }

    /// `true` for sessions produced by [`Server::listen`](crate::Server::listen).
    pub fn is_server_side(&self) -> bool {
        self.inner.server_side
    }

    /// Number of live clones of this session.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    fn enter_read(&self) -> Result<GateGuard<'_>> {
        self.inner.gate.enter(Direction::Read, Error::ConcurrentAccess)
    }

    /// Read what is available, blocking until at least one byte arrives.
    ///
    /// Returns [`Error::BrokenPipe`] once the peer has closed and every pending
    /// byte has been consumed.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let guard = self.enter_read()?;
        self.read_blocking(&guard, buf)
    }

    /// Read until `buf` is full.
    pub fn read_exact(&self, buf: &mut [u8]) -> Result<()> {
        let guard = self.enter_read()?;
        let mut done = 0;
        while done < buf.len() {
            match self.read_blocking(&guard, &mut buf[done..])? {
                0 => continue,
                n => done += n,
            }
        }
        Ok(())
    }

    fn read_blocking(&self, guard: &GateGuard<'_>, buf: &mut [u8]) -> Result<usize> {
        let deadline = Deadline::after_ms(None);
        loop {
            guard.check()?;
            match posix::recv(self.fd(), buf, 0) {
                Ok(0) => return self.confirm_zero_read(),
                Ok(n) => return Ok(n),
                Err(e) if posix::is_interrupted(&e) => continue,
                Err(e) if posix::is_would_block(&e) => {
                    guard.wait(self.fd(), libc::POLLIN, &deadline)?;
                }
                Err(e) => return Err(Error::from_os(e)),
            }
        }
    }

    /// Read whatever is available without blocking; `Ok(0)` means nothing was.
    pub fn read_nonblocking(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let guard = self.enter_read()?;
        loop {
            guard.check()?;
            match posix::recv(self.fd(), buf, 0) {
                Ok(0) => return self.confirm_zero_read(),
                Ok(n) => return Ok(n),
                Err(e) if posix::is_interrupted(&e) => continue,
                Err(e) if posix::is_would_block(&e) => return Ok(0),
                Err(e) => return Err(Error::from_os(e)),
            }
        }
    }

    /// A zero-byte receive is only end-of-stream once the heuristic confirms it.
    fn confirm_zero_read(&self) -> Result<usize> {
        if posix::is_connection_broken(self.fd(), true).map_err(Error::from_os)? {
            event!(Level::DEBUG, message = "peer closed", fd = self.fd().as_raw_fd());
            return Err(Error::BrokenPipe);
        }
        Ok(0)
    }

    /// Write all of `buf`, blocking while the socket buffer is full.
    pub fn write(&self, buf: &[u8]) -> Result<()> {
        let guard = self
            .inner
            .gate
            .enter(Direction::Write, Error::ConcurrentAccess)?;
        let deadline = Deadline::after_ms(None);
        let mut sent = 0;
        while sent < buf.len() {
            guard.check()?;
            match posix::send(self.fd(), &buf[sent..]) {
                Ok(n) => sent += n,
                Err(e) if posix::is_interrupted(&e) => continue,
                Err(e) if posix::is_would_block(&e) => {
                    guard.wait(self.fd(), libc::POLLOUT, &deadline)?;
                }
                Err(e) => return Err(Error::from_os(e)),
            }
        }
        Ok(())
    }

    /// Writes are synchronous, so there is nothing to flush. Still reports
    /// [`Error::ResourceBusy`] while a write is in progress.
    pub fn flush(&self) -> Result<()> {
        if self.inner.gate.is_active(Direction::Write) {
            return Err(Error::ResourceBusy);
        }
        Ok(())
    }

    /// Block until data can be read, the peer hangs up ([`Error::BrokenPipe`])
    /// or `timeout_ms` elapses ([`Error::Timeout`]; `None` waits forever).
    ///
    /// The timeout bounds the whole call, including internal retries.
    pub fn wait_for_data(&self, timeout_ms: Option<u64>) -> Result<()> {
        let guard = self.enter_read()?;
        let deadline = Deadline::after_ms(timeout_ms);
        let fd = self.fd();
        loop {
            let revents = match guard.wait(fd, (Events::READ | Events::ERROR).to_poll_interest(), &deadline)? {
                Some(revents) => revents,
                None => return Err(Error::Timeout),
            };
            let hangup = Events::from_poll_revents(revents).contains(Events::ERROR);
            match posix::peek(fd).map_err(Error::from_os)? {
                Peek::Data => return Ok(()),
                Peek::Eof => return Err(Error::BrokenPipe),
                Peek::Empty => {
                    if posix::is_connection_broken(fd, hangup).map_err(Error::from_os)? {
                        return Err(Error::BrokenPipe);
                    }
                }
            }
            if deadline.expired() {
                return Err(Error::Timeout);
            }
        }
    }

    /// Abort blocked and future reads, writes and waits on every clone. Idempotent.
    pub fn cancel(&self) {
        self.inner.gate.cancel();
    }

    /// Cancel, then release this reference.
    pub fn close(self) {
        self.cancel();
        drop(self);
    }

    /// Credentials of the peer process as of connection time.
    pub fn peer_identity(&self) -> Result<PeerIdentity> {
        posix::peer_identity(self.fd())
            .map_err(Error::from_os)?
            .ok_or(Error::NotSupported)
    }

    /// Process id of the peer.
    pub fn query_process(&self) -> Result<u32> {
        self.peer_identity()?.pid.ok_or(Error::NotSupported)
    }

    /// Effective user id of the peer.
    pub fn query_user_id(&self) -> Result<u32> {
        Ok(self.peer_identity()?.uid)
    }

    /// Effective group id of the peer.
    pub fn query_group_id(&self) -> Result<u32> {
        Ok(self.peer_identity()?.gid)
    }
}

impl AsFd for Session {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("fd", &self.inner.socket.as_raw_fd())
            .field("server_side", &self.inner.server_side)
            .field("cancelled", &self.inner.gate.is_cancelled())
            .finish()
    }
}

impl io::Read for &Session {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match Session::read(*self, buf) {
            Err(Error::BrokenPipe) => Ok(0),
            other => other.map_err(io::Error::from),
        }
    }
}

impl io::Write for &Session {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Session::write(*self, buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(Session::flush(*self)?)
    }
}
