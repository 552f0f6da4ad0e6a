use serde::{Deserialize, Serialize};

/// A machine type (board/chipset configuration) the emulator can
/// instantiate. A machine may be known under an alternative name; the
/// alias resolves to the canonical `name`, the canonical name resolves
/// to itself. Within a capability record the default machine, if any,
/// sits at index 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineType {
    /// Canonical machine name
    pub name: String,
    /// Alternative name resolving to `name`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl MachineType {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            alias: None,
        }
    }

    pub fn with_alias(name: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            alias: Some(alias.into()),
        }
    }
}

/// One machine record as reported by the monitor's machine query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineEntry {
    /// Canonical machine name
    pub name: String,
    /// Alternative name resolving to `name`
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub alias: Option<String>,
    /// Whether the emulator picks this machine when none is requested
    #[serde(rename = "is-default", default)]
    pub is_default: bool,
}

/// The three-part emulator version as reported by the monitor.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct VersionTriple {
    pub major: u32,
    pub minor: u32,
    pub micro: u32,
}

/// Version information from the monitor's version query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorVersion {
    pub qemu: VersionTriple,
    /// Distribution package string, empty for upstream builds
    #[serde(default)]
    pub package: String,
}

/// Accelerator state from the monitor's KVM query. `present` means the
/// binary was built with KVM support; `enabled` means KVM is in use for
/// this process.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct KvmState {
    pub enabled: bool,
    pub present: bool,
}

/// Wire shape shared by the monitor's name-list queries (commands,
/// events, object types, object properties, CPU definitions).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct NamedEntry {
    pub name: String,
}
