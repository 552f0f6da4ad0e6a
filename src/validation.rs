use crate::probe::MONITOR_SOCKET_NAME;
use std::os::unix::fs::MetadataExt;
use std::path::{Component, Path};
use validator::ValidationError;

/// Capacity of `sun_path` in `sockaddr_un`, trailing NUL included.
const SUN_PATH_MAX: usize = 108;

fn lib_dir_error(message: &'static str) -> ValidationError {
    let mut err = ValidationError::new("lib_dir");
    err.message = Some(message.into());
    err
}

/// Checks that a directory is usable as the probe's lib directory.
///
/// The emulator is pointed at `<dir>/capabilities.monitor.sock` plus a
/// pidfile next to it and creates both itself, after privileges have
/// been dropped. The directory therefore has to exist up front, be
/// writable, and be named by an absolute path short enough that the
/// socket path still fits in a unix socket address.
pub fn validate_writable_dir(path: &str) -> Result<(), ValidationError> {
    let dir = Path::new(path);

    if !dir.is_absolute() {
        return Err(lib_dir_error("lib directory must be an absolute path"));
    }
    if path.bytes().any(|b| b == 0) {
        return Err(lib_dir_error("lib directory path contains a NUL byte"));
    }
    if dir.components().any(|c| c == Component::ParentDir) {
        return Err(lib_dir_error("lib directory path must not step through .."));
    }
    // dir + '/' + socket name + NUL
    if path.len() + 1 + MONITOR_SOCKET_NAME.len() >= SUN_PATH_MAX {
        return Err(lib_dir_error(
            "lib directory path leaves no room for the monitor socket name",
        ));
    }

    let Ok(metadata) = dir.metadata() else {
        return Err(lib_dir_error("lib directory does not exist"));
    };
    if !metadata.is_dir() {
        return Err(lib_dir_error("lib directory is not a directory"));
    }
    if metadata.mode() & 0o200 == 0 {
        return Err(lib_dir_error("lib directory is not writable"));
    }

    Ok(())
}
