//! Utility modules for the engine

pub mod target_parser;

use crate::network::socket::RawSocket;
use std::path::{Path, PathBuf};

/// Check whether the process may open raw sockets.
///
/// Root always may; otherwise a raw socket is opened and dropped so that
/// `CAP_NET_RAW` granted through file capabilities is detected as well.
pub fn has_raw_socket_privilege() -> bool {
    if is_root() {
        return true;
    }

    match RawSocket::new_tcp() {
        Ok(_) => true,
        Err(e) => {
            log::debug!("Raw socket unavailable: {}", e);
            false
        }
    }
}

#[cfg(unix)]
pub fn is_root() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail
    unsafe { libc::geteuid() == 0 }
}

#[cfg(not(unix))]
pub fn is_root() -> bool {
    false
}

/// Locate an executable the way a shell would.
///
/// Names containing a path separator are checked directly.
pub fn find_executable(program: &str) -> Option<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return is_executable(candidate).then(|| candidate.to_path_buf());
    }

    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(program))
        .find(|path| is_executable(path))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Format a duration in milliseconds with two decimals
pub fn format_ms(duration: std::time::Duration) -> String {
    format!("{:.2} ms", duration.as_secs_f64() * 1000.0)
}
