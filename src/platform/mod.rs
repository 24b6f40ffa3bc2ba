// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors

// Only the POSIX poll-array backend exists today. Re-export it under the
// uniform names the rest of the crate uses.

#[cfg(unix)]
pub mod posix;

#[cfg(unix)]
pub use posix::PeerIdentity;
#[cfg(unix)]
pub(crate) use posix::PlatformWaitSet;

#[cfg(not(unix))]
compile_error!("localipc currently supports POSIX platforms only");
