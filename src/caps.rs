use crate::arch::Arch;
use crate::cache::CacheConfig;
use crate::error::{CapsError, CapsResult};
use crate::flags::{CapsFlag, FlagSet};
use crate::models::MachineType;
use crate::monitor::MonitorOperations;
use crate::probe;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Everything one specific emulator binary supports: its version, its
/// target architecture, the capability flags, the machine types it can
/// instantiate (default first) and the CPU models it knows.
///
/// A record is built once by the probe and then only observed; the
/// cache hands out shared references, [`Clone`] produces a decoupled
/// copy.
#[derive(Debug, Clone)]
pub struct QemuCaps {
    pub(crate) used_monitor: bool,
    pub(crate) binary: Option<PathBuf>,
    pub(crate) mtime: Option<SystemTime>,
    pub(crate) version: u32,
    pub(crate) kvm_version: u32,
    pub(crate) arch: Arch,
    pub(crate) flags: FlagSet,
    pub(crate) machine_types: Vec<MachineType>,
    pub(crate) cpu_definitions: Vec<String>,
}

impl Default for QemuCaps {
    fn default() -> Self {
        Self::new()
    }
}

impl QemuCaps {
    /// A synthetic record with no backing binary. Always valid; used by
    /// callers that assemble capabilities by hand.
    pub fn new() -> Self {
        Self {
            used_monitor: false,
            binary: None,
            mtime: None,
            version: 0,
            kvm_version: 0,
            arch: Arch::host(),
            flags: FlagSet::new(),
            machine_types: Vec::new(),
            cpu_definitions: Vec::new(),
        }
    }

    /// Probes `binary` and builds its capability record. The monitor
    /// probe is attempted first; binaries too old for it fall back to
    /// help-output discovery.
    pub(crate) async fn for_binary(binary: &Path, config: &CacheConfig) -> CapsResult<Self> {
        let metadata = fs::metadata(binary).map_err(|e| CapsError::Binary {
            path: binary.to_path_buf(),
            source: e,
        })?;
        // catching the exec() failure instead would happen in the
        // subprocess, where no useful error can be fed back
        if !metadata.is_file() || metadata.permissions().mode() & 0o111 == 0 {
            return Err(CapsError::NotExecutable(binary.to_path_buf()));
        }

        let mut caps = QemuCaps::new();
        caps.binary = Some(binary.to_path_buf());
        caps.mtime = Some(metadata.modified().map_err(|e| CapsError::Binary {
            path: binary.to_path_buf(),
            source: e,
        })?);

        if !probe::probe_via_monitor(&mut caps, binary, config).await? {
            probe::probe_via_help(&mut caps, binary, config).await?;
        }

        Ok(caps)
    }

    /// Whether the record still describes the binary on disk. Synthetic
    /// records are always valid.
    pub fn is_valid(&self) -> bool {
        let (Some(binary), Some(mtime)) = (&self.binary, self.mtime) else {
            return true;
        };
        match fs::metadata(binary).and_then(|m| m.modified()) {
            Ok(current) => current == mtime,
            Err(_) => false,
        }
    }

    pub fn has(&self, flag: CapsFlag) -> bool {
        self.flags.contains(flag)
    }

    pub fn set(&mut self, flag: CapsFlag) {
        self.flags.set(flag);
    }

    pub fn clear(&mut self, flag: CapsFlag) {
        self.flags.clear(flag);
    }

    pub fn flags(&self) -> &FlagSet {
        &self.flags
    }

    pub fn binary(&self) -> Option<&Path> {
        self.binary.as_deref()
    }

    pub fn mtime(&self) -> Option<SystemTime> {
        self.mtime
    }

    /// Encoded as major * 1_000_000 + minor * 1_000 + micro.
    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn kvm_version(&self) -> u32 {
        self.kvm_version
    }

    pub fn arch(&self) -> Arch {
        self.arch
    }

    /// Machine types, default (if any) at index 0.
    pub fn machine_types(&self) -> &[MachineType] {
        &self.machine_types
    }

    pub fn cpu_definitions(&self) -> &[String] {
        &self.cpu_definitions
    }

    pub fn add_cpu_definition(&mut self, name: impl Into<String>) {
        self.cpu_definitions.push(name.into());
    }

    /// Whether the record was built through the monitor probe rather
    /// than help-output parsing.
    pub fn used_monitor(&self) -> bool {
        self.used_monitor
    }

    /// Resolves a machine alias to its canonical name. Canonical names
    /// (and names the record does not know) resolve to themselves.
    pub fn canonical_machine<'a>(&'a self, name: &'a str) -> &'a str {
        for machine in &self.machine_types {
            if machine.alias.as_deref() == Some(name) {
                return &machine.name;
            }
        }
        name
    }

    /// Re-derives the command and event driven capabilities from a live
    /// monitor session. Records built by the monitor probe already
    /// carry them, so this is a no-op for those.
    pub async fn probe_monitor(&mut self, mon: &mut dyn MonitorOperations) -> CapsResult<()> {
        if self.used_monitor {
            return Ok(());
        }

        probe::probe_commands(self, mon).await?;
        probe::probe_events(&mut self.flags, mon).await?;

        Ok(())
    }
}
