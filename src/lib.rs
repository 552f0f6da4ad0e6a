//! Capability probing and caching for QEMU emulator binaries.
//!
//! Given the path to a `qemu-system-*` binary, this crate determines
//! what that specific build supports (command line options, emulated
//! device types and their properties, CPU models, machine types,
//! accelerator state and monitor commands) and caches the result per
//! binary, revalidating against the binary's mtime.
//!
//! Discovery runs over one of two protocols. Binaries of version 1.2
//! and newer are started in a minimal throwaway configuration and
//! interrogated through their structured monitor ([`QmpMonitor`]);
//! older binaries fall back to parsing the textual `-help`, `-M ?`,
//! `-cpu ?` and `-device ?` output. Both paths feed the same
//! [`FlagSet`] over the closed [`CapsFlag`] enumeration, whose string
//! names are a stable on-disk contract.

#[cfg(test)]
mod tests;

pub mod arch;
pub mod cache;
pub mod caps;
mod device;
pub mod error;
pub mod flags;
mod help;
mod listing;
pub mod models;
pub mod monitor;
mod probe;
pub mod validation;

pub use arch::Arch;
pub use cache::{CacheConfig, CapsCache};
pub use caps::QemuCaps;
pub use error::{CapsError, CapsResult};
pub use flags::{CapsFlag, FlagSet};
pub use models::{KvmState, MachineEntry, MachineType, MonitorVersion, VersionTriple};
pub use monitor::{MonitorCallbacks, MonitorOperations, NullCallbacks, QmpMonitor};
