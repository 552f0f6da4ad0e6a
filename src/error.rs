use std::io;
use std::path::PathBuf;
use thiserror::Error;
use validator::ValidationErrors;

/// Represents all possible errors that can occur while probing a QEMU
/// binary or maintaining the capability cache.
#[derive(Error, Debug)]
pub enum CapsError {
    /// The emulator binary cannot be stat'ed
    #[error("cannot check QEMU binary {path}: {source}")]
    Binary {
        path: PathBuf,
        source: io::Error,
    },

    /// The emulator binary exists but is not executable
    #[error("QEMU binary {0} is not executable")]
    NotExecutable(PathBuf),

    /// Spawning the emulator failed outright (exec error, not a nonzero exit)
    #[error("failed to run {binary}: {source}")]
    Spawn {
        binary: PathBuf,
        source: io::Error,
    },

    /// A probe invocation exited with a status the probe cannot tolerate
    #[error("{binary} exited with status {status}")]
    ProbeExit { binary: PathBuf, status: i32 },

    /// The version preamble of the help output did not parse
    #[error("cannot parse {binary} version number in '{excerpt}'")]
    HelpVersion { binary: PathBuf, excerpt: String },

    /// Malformed textual device listing
    #[error("malformed QEMU device list string, {0}")]
    DeviceListing(&'static str),

    /// The monitor reported an architecture outside the known set
    #[error("unknown QEMU arch {0}")]
    UnknownArch(String),

    /// I/O error on the monitor socket
    #[error("monitor I/O error: {0}")]
    Monitor(#[from] io::Error),

    /// The monitor sent a reply the client cannot interpret
    #[error("malformed monitor reply: {0}")]
    Protocol(String),

    /// A monitor command was rejected by the emulator
    #[error("monitor command '{command}' failed: {class}: {desc}")]
    Command {
        command: String,
        class: String,
        desc: String,
    },

    /// The monitor did not answer within the allotted time
    #[error("monitor did not reply to '{0}' in time")]
    Timeout(String),

    /// Error during serialization/deserialization of monitor messages
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Error validating the cache configuration
    #[error("validation error: {0}")]
    Validation(#[from] ValidationErrors),

    /// The add-fd live probe could not be prepared
    #[error("unable to probe for add-fd: {0}")]
    AddFdProbe(io::Error),
}

/// Result type for capability probing operations
pub type CapsResult<T> = Result<T, CapsError>;
