// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Abstract readiness events and their translation from native poll bits.

use bitflags::bitflags;

bitflags! {
    /// Readiness events a handle can be waited on for, and reported with.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Events: u32 {
        /// Data can be read (or a connection accepted).
        const READ = 0x1;
        /// Data can be written.
        const WRITE = 0x2;
        /// An error or hang-up condition is pending.
        const ERROR = 0x4;
    }
}

impl Events {
    /// `true` for a non-empty subset of READ | WRITE | ERROR with no stray bits.
    pub fn is_valid_request(bits: u32) -> bool {
        bits != 0 && Events::from_bits(bits).is_some()
    }

    /// Native `poll(2)` interest bits for these events.
    ///
    /// ERROR has no interest bit: `POLLERR`/`POLLHUP`/`POLLNVAL` are always reported.
    #[cfg(unix)]
    pub(crate) fn to_poll_interest(self) -> libc::c_short {
        let mut bits: libc::c_short = 0;
        if self.contains(Events::READ) {
            bits |= libc::POLLIN;
        }
        if self.contains(Events::WRITE) {
            bits |= libc::POLLOUT;
        }
        #[cfg(any(target_os = "linux", target_os = "android"))]
        if self.contains(Events::ERROR) {
            bits |= libc::POLLRDHUP;
        }
        bits
    }

    /// Fold native `revents` bits into abstract events.
    ///
    /// Read-class bits (normal, band, priority) become READ, write-class bits
    /// become WRITE, and error, hang-up and invalid-handle bits become ERROR.
    #[cfg(unix)]
    pub fn from_poll_revents(revents: libc::c_short) -> Events {
        let mut ev = Events::empty();
        if revents & (libc::POLLIN | libc::POLLPRI | libc::POLLRDNORM | libc::POLLRDBAND) != 0 {
            ev |= Events::READ;
        }
        if revents & (libc::POLLOUT | libc::POLLWRNORM | libc::POLLWRBAND) != 0 {
            ev |= Events::WRITE;
        }
        if revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0 {
            ev |= Events::ERROR;
        }
        #[cfg(any(target_os = "linux", target_os = "android"))]
        if revents & libc::POLLRDHUP != 0 {
            ev |= Events::ERROR;
        }
        ev
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_validation() {
        assert!(Events::is_valid_request(Events::READ.bits()));
        assert!(Events::is_valid_request(Events::all().bits()));
        assert!(!Events::is_valid_request(0));
        assert!(!Events::is_valid_request(0x8));
        assert!(!Events::is_valid_request(Events::READ.bits() | 0x100));
    }

    #[test]
    fn read_class_bits_fold_into_read() {
        assert_eq!(Events::from_poll_revents(libc::POLLIN), Events::READ);
        assert_eq!(Events::from_poll_revents(libc::POLLPRI), Events::READ);
        assert_eq!(Events::from_poll_revents(libc::POLLRDBAND), Events::READ);
    }

    #[test]
    fn write_class_bits_fold_into_write() {
        assert_eq!(Events::from_poll_revents(libc::POLLOUT), Events::WRITE);
        assert_eq!(Events::from_poll_revents(libc::POLLWRBAND), Events::WRITE);
    }

    #[test]
    fn error_class_bits_fold_into_error() {
        assert_eq!(Events::from_poll_revents(libc::POLLERR), Events::ERROR);
        assert_eq!(Events::from_poll_revents(libc::POLLHUP), Events::ERROR);
        assert_eq!(Events::from_poll_revents(libc::POLLNVAL), Events::ERROR);
        assert_eq!(
            Events::from_poll_revents(libc::POLLIN | libc::POLLHUP),
            Events::READ | Events::ERROR
        );
    }

    #[test]
    fn interest_has_no_error_bit() {
        let bits = Events::ERROR.to_poll_interest();
        assert_eq!(bits & (libc::POLLIN | libc::POLLOUT), 0);
        assert_eq!(Events::READ.to_poll_interest() & libc::POLLIN, libc::POLLIN);
    }
}
