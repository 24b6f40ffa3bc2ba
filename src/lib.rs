// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Synchronous multiplexed waiting over pipe and socket handles, and a
// same-host connection-oriented IPC transport (server + sessions) over
// AF_UNIX stream sockets. POSIX only.

mod platform;

mod error;
pub use error::{Error, Result};

mod events;
pub use events::Events;

mod handle;
pub use handle::{HandleKind, PipeEnd, PollHandle};

mod poll_set;
pub use poll_set::{HandleEntry, PollSet, Ready, MAX_POLL_HANDLES, POLL_GROW_BY};

pub mod ipc_name;

mod cancel;

mod server;
pub use server::{Server, ServerFlags, LISTEN_BACKLOG};

mod session;
pub use session::{Session, SessionFlags};

pub use platform::PeerIdentity;
