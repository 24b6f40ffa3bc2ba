// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Endpoint naming for local IPC.
// Portable names live in a private namespace under the IPC root directory;
// native names are filesystem paths used as-is.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::error::{Error, Result};
use crate::platform::posix::{self, UnixAddr};

/// Directory holding portable endpoints unless overridden.
pub const DEFAULT_IPC_ROOT: &str = "/tmp";

/// Environment variable that overrides [`DEFAULT_IPC_ROOT`]; read once per process.
pub const IPC_ROOT_ENV: &str = "LOCALIPC_DIR";

/// Prefix prepended to every portable name inside the root directory.
pub const ENDPOINT_PREFIX: &str = ".localipc-";

/// The directory portable endpoints are created in.
pub fn ipc_root() -> &'static Path {
    static ROOT: OnceLock<PathBuf> = OnceLock::new();
    ROOT.get_or_init(|| match std::env::var_os(IPC_ROOT_ENV) {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => PathBuf::from(DEFAULT_IPC_ROOT),
    })
}

/// Check that `name` is acceptable.
///
/// Portable names must be non-empty 7-bit text without control characters
/// and without path separators (`/` or `\`). Native names only need to be
/// non-empty; `&str` already guarantees valid UTF-8.
pub fn validate_name(name: &str, native: bool) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidName(name.to_string()));
    }
    if native {
        if name.contains('\0') {
            return Err(Error::InvalidName(name.to_string()));
        }
        return Ok(());
    }
    let bad = name
        .bytes()
        .any(|b| b < 0x20 || b == 0x7f || b >= 0x80 || b == b'/' || b == b'\\');
    if bad {
        return Err(Error::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Filesystem path of the endpoint for `name`.
///
/// Fails with [`Error::NameTooLong`] when the path would not fit in a native
/// socket address; names are never silently truncated.
pub fn endpoint_path(name: &str, native: bool) -> Result<PathBuf> {
    validate_name(name, native)?;
    let path = if native {
        PathBuf::from(name)
    } else {
        ipc_root().join(format!("{ENDPOINT_PREFIX}{name}"))
    };
    let len = path.as_os_str().len();
    let max = posix::sun_path_max();
    if len > max {
        return Err(Error::NameTooLong { len, max });
    }
    Ok(path)
}

/// Path plus the native socket address built from it.
pub(crate) fn construct_address(name: &str, native: bool) -> Result<(PathBuf, UnixAddr)> {
    let path = endpoint_path(name, native)?;
    let addr = UnixAddr::from_path(&path).map_err(|e| match e.raw_os_error() {
        Some(libc::ENAMETOOLONG) => Error::NameTooLong {
            len: path.as_os_str().len(),
            max: posix::sun_path_max(),
        },
        _ => Error::from_os(e),
    })?;
    Ok((path, addr))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn portable_names_reject_separators_and_control_chars() {
        assert!(validate_name("testchan", false).is_ok());
        assert!(validate_name("with space-and_dots.1", false).is_ok());
        for bad in ["", "a/b", "a\\b", "tab\there", "del\x7f", "caf\u{e9}"] {
            assert!(
                matches!(validate_name(bad, false), Err(Error::InvalidName(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn native_names_accept_paths() {
        assert!(validate_name("/run/user/1000/sock", true).is_ok());
        assert!(validate_name("relative/caf\u{e9}", true).is_ok());
        assert!(validate_name("", true).is_err());
    }

    #[test]
    fn portable_name_maps_into_root_with_prefix() {
        let path = endpoint_path("foo", false).expect("path");
        assert_eq!(path.parent(), Some(ipc_root()));
        let file = path.file_name().unwrap().to_str().unwrap();
        assert_eq!(file, format!("{ENDPOINT_PREFIX}foo"));
    }

    #[test]
    fn native_name_is_used_verbatim() {
        let path = endpoint_path("/var/tmp/x.sock", true).expect("path");
        assert_eq!(path, PathBuf::from("/var/tmp/x.sock"));
    }

    #[test]
    fn long_names_fail_instead_of_truncating() {
        let long = "n".repeat(posix::sun_path_max());
        match endpoint_path(&long, false) {
            Err(Error::NameTooLong { len, max }) => assert!(len > max),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            construct_address(&long, false),
            Err(Error::NameTooLong { .. })
        ));
    }
}
