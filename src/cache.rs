use crate::caps::QemuCaps;
use crate::error::CapsResult;
use crate::validation::validate_writable_dir;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use validator::Validate;

/// Configuration shared by every probe a cache runs.
#[derive(Debug, Clone, Validate)]
pub struct CacheConfig {
    /// Directory for the probe's monitor socket and pidfile. The
    /// daemonized emulator creates files here itself, so it must be
    /// writable by the configured uid.
    #[validate(custom = "validate_writable_dir")]
    pub lib_dir: String,
    /// User to run probe processes as; `None` inherits the manager's
    pub run_uid: Option<u32>,
    /// Group to run probe processes as; `None` inherits the manager's
    pub run_gid: Option<u32>,
}

impl CacheConfig {
    pub fn new(lib_dir: impl Into<String>) -> Self {
        Self {
            lib_dir: lib_dir.into(),
            run_uid: None,
            run_gid: None,
        }
    }
}

/// Per-binary capability cache.
///
/// Entries are keyed by binary path, created on demand and revalidated
/// against the binary's mtime on every lookup. The single lock also
/// serializes the slow path: probes are infrequent, expensive and
/// bounded by the emulator's startup latency anyway, and the fixed
/// socket/pidfile names under `lib_dir` permit only one probe in
/// flight.
pub struct CapsCache {
    config: CacheConfig,
    binaries: Mutex<HashMap<PathBuf, Arc<QemuCaps>>>,
}

impl CapsCache {
    pub fn new(config: CacheConfig) -> CapsResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            binaries: Mutex::new(HashMap::new()),
        })
    }

    /// Returns the capability record for `binary`, probing it first if
    /// the cache has no fresh entry. A cold lookup blocks for as long
    /// as the probe takes: spawning the binary and, for modern
    /// binaries, a full monitor session.
    pub async fn lookup(&self, binary: impl AsRef<Path>) -> CapsResult<Arc<QemuCaps>> {
        let binary = binary.as_ref();
        let mut binaries = self.binaries.lock().await;

        if let Some(caps) = binaries.get(binary) {
            if caps.is_valid() {
                return Ok(Arc::clone(caps));
            }
            log::debug!(
                "cached capabilities no longer valid for {}",
                binary.display()
            );
            binaries.remove(binary);
        }

        log::debug!("creating capabilities for {}", binary.display());
        let caps = Arc::new(QemuCaps::for_binary(binary, &self.config).await?);
        binaries.insert(binary.to_path_buf(), Arc::clone(&caps));

        Ok(caps)
    }

    /// Like [`lookup`](Self::lookup), but returns a deep copy that
    /// stays untouched by later cache replacement.
    pub async fn lookup_copy(&self, binary: impl AsRef<Path>) -> CapsResult<QemuCaps> {
        let caps = self.lookup(binary).await?;
        Ok((*caps).clone())
    }
}
