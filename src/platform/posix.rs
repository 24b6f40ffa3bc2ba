// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// POSIX glue: poll(2), the self-pipe used to poke blocked threads, AF_UNIX
// stream socket primitives, the broken-connection heuristic and peer
// credential queries.

use std::ffi::CString;
use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::time::{Duration, Instant};

use crate::events::Events;

// ---------------------------------------------------------------------------
// Timeouts
// ---------------------------------------------------------------------------

/// Wall-clock budget of one blocking call.
///
/// Captured once when the call starts; every retry asks for what is left
/// instead of restarting the full interval.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Deadline {
    start: Instant,
    timeout: Option<Duration>,
}

impl Deadline {
    pub(crate) fn after_ms(timeout_ms: Option<u64>) -> Self {
        Self {
            start: Instant::now(),
            timeout: timeout_ms.map(Duration::from_millis),
        }
    }

    pub(crate) fn is_infinite(&self) -> bool {
        self.timeout.is_none()
    }

    /// Remaining budget; `None` when infinite, `Some(ZERO)` once exhausted.
    pub(crate) fn remaining(&self) -> Option<Duration> {
        self.timeout
            .map(|t| t.saturating_sub(self.start.elapsed()))
    }

    pub(crate) fn expired(&self) -> bool {
        matches!(self.remaining(), Some(d) if d.is_zero())
    }

    /// Remaining budget as a `poll(2)` timeout argument.
    ///
    /// Rounds up so that a sub-millisecond remainder still waits instead of
    /// spinning on zero-timeout polls.
    pub(crate) fn poll_timeout(&self) -> libc::c_int {
        match self.remaining() {
            None => -1,
            Some(d) => {
                let mut ms = d.as_millis();
                if d.subsec_nanos() % 1_000_000 != 0 {
                    ms += 1;
                }
                ms.min(libc::c_int::MAX as u128) as libc::c_int
            }
        }
    }
}

// ---------------------------------------------------------------------------
// poll(2)
// ---------------------------------------------------------------------------

pub(crate) fn pollfd(fd: RawFd, events: libc::c_short) -> libc::pollfd {
    libc::pollfd {
        fd,
        events,
        revents: 0,
    }
}

/// One native multiplexed wait. `EINTR` is returned to the caller untouched.
pub(crate) fn poll(fds: &mut [libc::pollfd], timeout: libc::c_int) -> io::Result<usize> {
    let rc = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(rc as usize)
}

pub(crate) fn is_interrupted(err: &io::Error) -> bool {
    matches!(err.raw_os_error(), Some(libc::EINTR))
}

pub(crate) fn is_would_block(err: &io::Error) -> bool {
    matches!(err.raw_os_error(), Some(e) if e == libc::EAGAIN || e == libc::EWOULDBLOCK)
}

/// What kind of object a descriptor refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FdType {
    Fifo,
    Socket,
    Other,
}

pub(crate) fn fd_type(fd: BorrowedFd<'_>) -> io::Result<FdType> {
    let mut st: libc::stat = unsafe { std::mem::zeroed() };
    if unsafe { libc::fstat(fd.as_raw_fd(), &mut st) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(match st.st_mode & libc::S_IFMT {
        libc::S_IFIFO => FdType::Fifo,
        libc::S_IFSOCK => FdType::Socket,
        _ => FdType::Other,
    })
}

/// Zero-timeout probe of a single descriptor. Returns the raw `revents`.
pub(crate) fn probe(fd: BorrowedFd<'_>, events: libc::c_short) -> io::Result<libc::c_short> {
    let mut fds = [pollfd(fd.as_raw_fd(), events)];
    loop {
        match poll(&mut fds, 0) {
            Ok(_) => return Ok(fds[0].revents),
            Err(e) if is_interrupted(&e) => continue,
            Err(e) => return Err(e),
        }
    }
}

// ---------------------------------------------------------------------------
// PlatformWaitSet: flat pollfd array kept in lock-step with the handle table
// ---------------------------------------------------------------------------

/// Native backing structure of a poll set: one `pollfd` per table row.
pub(crate) struct PlatformWaitSet {
    fds: Vec<libc::pollfd>,
}

impl PlatformWaitSet {
    pub(crate) fn new() -> Self {
        Self { fds: Vec::new() }
    }

    pub(crate) fn reserve_exact(&mut self, additional: usize) {
        self.fds.reserve_exact(additional);
    }

    pub(crate) fn shrink_to(&mut self, capacity: usize) {
        self.fds.shrink_to(capacity);
    }

    pub(crate) fn push(&mut self, fd: RawFd, events: Events) {
        self.fds.push(pollfd(fd, events.to_poll_interest()));
    }

    pub(crate) fn remove(&mut self, idx: usize) {
        self.fds.remove(idx);
    }

    pub(crate) fn set_events(&mut self, idx: usize, events: Events) {
        self.fds[idx].events = events.to_poll_interest();
    }

    /// One native wait over every row. `EINTR` is returned untouched.
    pub(crate) fn wait(&mut self, deadline: &Deadline) -> io::Result<usize> {
        for fd in &mut self.fds {
            fd.revents = 0;
        }
        poll(&mut self.fds, deadline.poll_timeout())
    }

    /// Abstract events reported for row `idx` by the last `wait`.
    pub(crate) fn ready_events(&self, idx: usize) -> Events {
        Events::from_poll_revents(self.fds[idx].revents)
    }
}

// ---------------------------------------------------------------------------
// Descriptor flags
// ---------------------------------------------------------------------------

fn set_fd_flag(fd: RawFd, get: libc::c_int, set: libc::c_int, flag: libc::c_int) -> io::Result<()> {
    let cur = unsafe { libc::fcntl(fd, get) };
    if cur < 0 {
        return Err(io::Error::last_os_error());
    }
    if cur & flag != 0 {
        return Ok(());
    }
    if unsafe { libc::fcntl(fd, set, cur | flag) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

pub(crate) fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    set_fd_flag(fd, libc::F_GETFL, libc::F_SETFL, libc::O_NONBLOCK)
}

pub(crate) fn set_cloexec(fd: RawFd) -> io::Result<()> {
    set_fd_flag(fd, libc::F_GETFD, libc::F_SETFD, libc::FD_CLOEXEC)
}

// ---------------------------------------------------------------------------
// WakePipe: targeted wake-up of a thread blocked in poll(2)
// ---------------------------------------------------------------------------

/// A non-blocking self-pipe.
///
/// Every blocking wait of an IPC object also polls the read end, so writing a
/// byte to the write end aborts that wait. The byte is never drained: once
/// poked, the pipe stays readable and every later wait returns immediately.
pub(crate) struct WakePipe {
    rx: OwnedFd,
    tx: OwnedFd,
}

impl WakePipe {
    pub(crate) fn new() -> io::Result<Self> {
        let mut fds = [0 as RawFd; 2];
        if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
            return Err(io::Error::last_os_error());
        }
        // Owned from here on so an fcntl failure below closes both ends.
        let rx = unsafe { OwnedFd::from_raw_fd(fds[0]) };
        let tx = unsafe { OwnedFd::from_raw_fd(fds[1]) };
        for fd in [rx.as_raw_fd(), tx.as_raw_fd()] {
            set_nonblocking(fd)?;
            set_cloexec(fd)?;
        }
        Ok(Self { rx, tx })
    }

    pub(crate) fn raw_fd(&self) -> RawFd {
        self.rx.as_raw_fd()
    }

    /// Make the read end readable. A full pipe already is, so `EAGAIN` is fine.
    pub(crate) fn poke(&self) -> io::Result<()> {
        let byte = 1u8;
        loop {
            let rc = unsafe {
                libc::write(
                    self.tx.as_raw_fd(),
                    &byte as *const u8 as *const libc::c_void,
                    1,
                )
            };
            if rc >= 0 {
                return Ok(());
            }
            let err = io::Error::last_os_error();
            if is_interrupted(&err) {
                continue;
            }
            if is_would_block(&err) {
                return Ok(());
            }
            return Err(err);
        }
    }
}

// ---------------------------------------------------------------------------
// AF_UNIX stream sockets
// ---------------------------------------------------------------------------

// Apple has no MSG_NOSIGNAL; its sockets get SO_NOSIGPIPE instead.
#[cfg(any(
    target_os = "linux",
    target_os = "android",
    target_os = "freebsd",
    target_os = "dragonfly",
    target_os = "openbsd",
    target_os = "netbsd"
))]
const SEND_FLAGS: libc::c_int = libc::MSG_NOSIGNAL;
#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "freebsd",
    target_os = "dragonfly",
    target_os = "openbsd",
    target_os = "netbsd"
)))]
const SEND_FLAGS: libc::c_int = 0;

/// Usable length of `sockaddr_un::sun_path`, excluding the terminating NUL.
pub(crate) fn sun_path_max() -> usize {
    let addr: libc::sockaddr_un = unsafe { std::mem::zeroed() };
    addr.sun_path.len() - 1
}

/// A native socket address for a filesystem path.
pub(crate) struct UnixAddr {
    addr: libc::sockaddr_un,
    len: libc::socklen_t,
}

impl UnixAddr {
    /// Fails with `ENAMETOOLONG` instead of truncating.
    pub(crate) fn from_path(path: &Path) -> io::Result<Self> {
        let bytes = path.as_os_str().as_bytes();
        if bytes.len() > sun_path_max() {
            return Err(io::Error::from_raw_os_error(libc::ENAMETOOLONG));
        }
        if bytes.contains(&0) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "path contains an interior NUL byte",
            ));
        }
        let mut addr: libc::sockaddr_un = unsafe { std::mem::zeroed() };
        addr.sun_family = libc::AF_UNIX as libc::sa_family_t;
        for (dst, &src) in addr.sun_path.iter_mut().zip(bytes) {
            *dst = src as libc::c_char;
        }
        let base = std::mem::size_of::<libc::sa_family_t>();
        #[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
        let base = base + std::mem::size_of::<u8>();
        #[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
        {
            addr.sun_len = (base + bytes.len() + 1) as u8;
        }
        Ok(Self {
            addr,
            len: (base + bytes.len() + 1) as libc::socklen_t,
        })
    }

    fn as_ptr(&self) -> *const libc::sockaddr {
        &self.addr as *const libc::sockaddr_un as *const libc::sockaddr
    }
}

/// A new close-on-exec `AF_UNIX` stream socket.
pub(crate) fn stream_socket() -> io::Result<OwnedFd> {
    #[cfg(any(target_os = "linux", target_os = "android"))]
    let ty = libc::SOCK_STREAM | libc::SOCK_CLOEXEC;
    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    let ty = libc::SOCK_STREAM;

    let fd = unsafe { libc::socket(libc::AF_UNIX, ty, 0) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    let fd = unsafe { OwnedFd::from_raw_fd(fd) };
    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    set_cloexec(fd.as_raw_fd())?;
    #[cfg(any(target_os = "macos", target_os = "ios"))]
    set_no_sigpipe(fd.as_raw_fd())?;
    Ok(fd)
}

#[cfg(any(target_os = "macos", target_os = "ios"))]
fn set_no_sigpipe(fd: RawFd) -> io::Result<()> {
    let one: libc::c_int = 1;
    let rc = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_NOSIGPIPE,
            &one as *const libc::c_int as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

pub(crate) fn bind(fd: BorrowedFd<'_>, addr: &UnixAddr) -> io::Result<()> {
    if unsafe { libc::bind(fd.as_raw_fd(), addr.as_ptr(), addr.len) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

pub(crate) fn listen(fd: BorrowedFd<'_>, backlog: libc::c_int) -> io::Result<()> {
    if unsafe { libc::listen(fd.as_raw_fd(), backlog) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Blocking connect; `EINTR` is retried since the connection keeps progressing.
pub(crate) fn connect(fd: BorrowedFd<'_>, addr: &UnixAddr) -> io::Result<()> {
    loop {
        if unsafe { libc::connect(fd.as_raw_fd(), addr.as_ptr(), addr.len) } == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if is_interrupted(&err) {
            continue;
        }
        return Err(err);
    }
}

/// Non-blocking accept on a listening socket. The new socket is close-on-exec.
pub(crate) fn accept(fd: BorrowedFd<'_>) -> io::Result<OwnedFd> {
    #[cfg(any(target_os = "linux", target_os = "android"))]
    let rc = unsafe {
        libc::accept4(
            fd.as_raw_fd(),
            std::ptr::null_mut(),
            std::ptr::null_mut(),
            libc::SOCK_CLOEXEC,
        )
    };
    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    let rc = unsafe { libc::accept(fd.as_raw_fd(), std::ptr::null_mut(), std::ptr::null_mut()) };

    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    let conn = unsafe { OwnedFd::from_raw_fd(rc) };
    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    set_cloexec(conn.as_raw_fd())?;
    #[cfg(any(target_os = "macos", target_os = "ios"))]
    set_no_sigpipe(conn.as_raw_fd())?;
    Ok(conn)
}

pub(crate) fn send(fd: BorrowedFd<'_>, buf: &[u8]) -> io::Result<usize> {
    let rc = unsafe {
        libc::send(
            fd.as_raw_fd(),
            buf.as_ptr() as *const libc::c_void,
            buf.len(),
            SEND_FLAGS | libc::MSG_DONTWAIT,
        )
    };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(rc as usize)
}

pub(crate) fn recv(fd: BorrowedFd<'_>, buf: &mut [u8], flags: libc::c_int) -> io::Result<usize> {
    let rc = unsafe {
        libc::recv(
            fd.as_raw_fd(),
            buf.as_mut_ptr() as *mut libc::c_void,
            buf.len(),
            flags | libc::MSG_DONTWAIT,
        )
    };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(rc as usize)
}

/// Outcome of a non-consuming look at the receive queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Peek {
    /// At least one byte is waiting.
    Data,
    /// Nothing is waiting but the stream is still open.
    Empty,
    /// The peer closed the stream (or reset it) and nothing is left.
    Eof,
}

/// Peek one byte without consuming it and without blocking.
pub(crate) fn peek(fd: BorrowedFd<'_>) -> io::Result<Peek> {
    let mut byte = [0u8; 1];
    loop {
        match recv(fd, &mut byte, libc::MSG_PEEK) {
            Ok(0) => return Ok(Peek::Eof),
            Ok(_) => return Ok(Peek::Data),
            Err(e) if is_interrupted(&e) => continue,
            Err(e) if is_would_block(&e) => return Ok(Peek::Empty),
            Err(e) if is_reset(&e) => return Ok(Peek::Eof),
            Err(e) => return Err(e),
        }
    }
}

fn is_reset(err: &io::Error) -> bool {
    matches!(err.raw_os_error(), Some(libc::EPIPE) | Some(libc::ECONNRESET))
}

fn is_broken(err: &io::Error) -> bool {
    matches!(
        err.raw_os_error(),
        Some(libc::EPIPE) | Some(libc::ECONNRESET) | Some(libc::ENOTCONN)
    )
}

/// `true` when a zero-length send reports a broken or reset connection.
fn zero_length_send_fails(fd: BorrowedFd<'_>) -> bool {
    match send(fd, &[]) {
        Ok(_) => false,
        Err(e) => is_broken(&e),
    }
}

/// Decide whether the peer of a connected stream socket is gone.
///
/// When the native wait already reported a hang-up or error the connection is
/// suspect; otherwise a zero-length send is used to find out. In both cases the
/// verdict is only "broken" if a peek confirms that no unread data arrived in
/// the meantime.
pub(crate) fn is_connection_broken(fd: BorrowedFd<'_>, hangup_reported: bool) -> io::Result<bool> {
    if !hangup_reported && !zero_length_send_fails(fd) {
        return Ok(false);
    }
    Ok(peek(fd)? == Peek::Eof)
}

// ---------------------------------------------------------------------------
// Filesystem endpoint
// ---------------------------------------------------------------------------

fn c_path(path: &Path) -> io::Result<CString> {
    CString::new(path.as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
}

pub(crate) fn unlink(path: &Path) -> io::Result<()> {
    let c = c_path(path)?;
    if unsafe { libc::unlink(c.as_ptr()) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

pub(crate) fn chmod(path: &Path, mode: u32) -> io::Result<()> {
    let c = c_path(path)?;
    if unsafe { libc::chmod(c.as_ptr(), mode as libc::mode_t) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Device and inode of a filesystem object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FileId {
    dev: u64,
    ino: u64,
}

/// Identity of the socket file at `path`, without following symlinks.
///
/// `Ok(None)` when something other than a socket lives there.
pub(crate) fn socket_file_id(path: &Path) -> io::Result<Option<FileId>> {
    let c = c_path(path)?;
    let mut st: libc::stat = unsafe { std::mem::zeroed() };
    if unsafe { libc::lstat(c.as_ptr(), &mut st) } != 0 {
        return Err(io::Error::last_os_error());
    }
    if st.st_mode & libc::S_IFMT != libc::S_IFSOCK {
        return Ok(None);
    }
    #[allow(clippy::unnecessary_cast)]
    Ok(Some(FileId {
        dev: st.st_dev as u64,
        ino: st.st_ino as u64,
    }))
}

/// `true` if nobody accepts connections on `addr` any more.
///
/// Connects without blocking: a refused connection means the endpoint is a
/// leftover, while success or a full backlog means a server is alive.
pub(crate) fn endpoint_is_stale(addr: &UnixAddr) -> io::Result<bool> {
    let probe = stream_socket()?;
    set_nonblocking(probe.as_raw_fd())?;
    match connect(probe.as_fd(), addr) {
        Ok(()) => Ok(false),
        Err(e) => match e.raw_os_error() {
            Some(libc::ECONNREFUSED) | Some(libc::ENOENT) => Ok(true),
            Some(libc::EAGAIN) | Some(libc::EINPROGRESS) => Ok(false),
            _ => Err(e),
        },
    }
}

/// Change the group of `path`, leaving the owner alone.
pub(crate) fn chgrp(path: &Path, gid: u32) -> io::Result<()> {
    let c = c_path(path)?;
    if unsafe { libc::chown(c.as_ptr(), libc::uid_t::MAX, gid as libc::gid_t) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Peer credentials
// ---------------------------------------------------------------------------

/// Credentials of the process on the other end, as of connection time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerIdentity {
    /// Process id, when the platform reports it.
    pub pid: Option<u32>,
    pub uid: u32,
    pub gid: u32,
}

#[cfg(any(target_os = "linux", target_os = "android"))]
pub(crate) fn peer_identity(fd: BorrowedFd<'_>) -> io::Result<Option<PeerIdentity>> {
    let mut cred: libc::ucred = unsafe { std::mem::zeroed() };
    let mut len = std::mem::size_of::<libc::ucred>() as libc::socklen_t;
    let rc = unsafe {
        libc::getsockopt(
            fd.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_PEERCRED,
            &mut cred as *mut libc::ucred as *mut libc::c_void,
            &mut len,
        )
    };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(Some(PeerIdentity {
        pid: u32::try_from(cred.pid).ok().filter(|&p| p != 0),
        uid: cred.uid,
        gid: cred.gid,
    }))
}

#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "openbsd",
    target_os = "netbsd",
    target_os = "dragonfly"
))]
pub(crate) fn peer_identity(fd: BorrowedFd<'_>) -> io::Result<Option<PeerIdentity>> {
    let mut uid: libc::uid_t = 0;
    let mut gid: libc::gid_t = 0;
    if unsafe { libc::getpeereid(fd.as_raw_fd(), &mut uid, &mut gid) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(Some(PeerIdentity {
        pid: None,
        uid,
        gid,
    }))
}

#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "openbsd",
    target_os = "netbsd",
    target_os = "dragonfly"
)))]
pub(crate) fn peer_identity(_fd: BorrowedFd<'_>) -> io::Result<Option<PeerIdentity>> {
    Ok(None)
}
