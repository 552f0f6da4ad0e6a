use crate::cache::{CacheConfig, CapsCache};
use crate::caps::QemuCaps;
use crate::error::CapsError;
use crate::flags::CapsFlag;
use crate::Arch;
use std::fs::{self, OpenOptions};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// A stand-in emulator: declines the monitor probe (nonzero exit on
/// -S), then serves canned help, machine and CPU listings. Every -help
/// invocation is tallied in probe.count next to the script.
const FAKE_EMULATOR: &str = r#"#!/bin/sh
dir="$(dirname "$0")"
case "$1" in
    -S)
        exit 1
        ;;
    -help)
        echo probed >> "$dir/probe.count"
        cat <<'EOF'
QEMU emulator version 1.0.1, Copyright (c) 2003-2011 Fabrice Bellard
-drive [file=file][,if=type][,cache=writethrough|writeback|none|directsync|unsafe][,format=f]
       [,readonly=on|off][,aio=threads|native]
-chardev spicevmc,id=id
-vnc display
-no-shutdown
EOF
        ;;
    -M)
        cat <<'EOF'
Supported machines are:
pc         Standard PC (alias of pc-1.0)
pc-1.0     Standard PC (default)
isapc      ISA-only PC
EOF
        ;;
    -cpu)
        cat <<'EOF'
x86       qemu64
x86       [Opteron_G3]
EOF
        ;;
esac
exit 0
"#;

fn write_fake_emulator(dir: &Path) -> PathBuf {
    let binary = dir.join("qemu-system-x86_64");
    fs::write(&binary, FAKE_EMULATOR).unwrap();
    fs::set_permissions(&binary, fs::Permissions::from_mode(0o755)).unwrap();
    binary
}

fn probe_count(dir: &Path) -> usize {
    fs::read_to_string(dir.join("probe.count"))
        .map(|s| s.lines().count())
        .unwrap_or(0)
}

fn test_cache(dir: &TempDir) -> CapsCache {
    CapsCache::new(CacheConfig::new(dir.path().to_str().unwrap())).unwrap()
}

#[tokio::test]
async fn test_cold_lookup_probes_the_binary() {
    let dir = TempDir::new().unwrap();
    let binary = write_fake_emulator(dir.path());
    let cache = test_cache(&dir);

    let caps = cache.lookup(&binary).await.unwrap();

    assert_eq!(caps.version(), 1000001);
    assert_eq!(caps.arch(), Arch::X86_64);
    assert!(!caps.used_monitor());

    assert!(caps.has(CapsFlag::Drive));
    assert!(caps.has(CapsFlag::DriveFormat));
    assert!(caps.has(CapsFlag::DriveAio));
    assert!(caps.has(CapsFlag::DriveCacheDirectsync));
    assert!(caps.has(CapsFlag::DriveCacheUnsafe));
    assert!(caps.has(CapsFlag::Chardev));
    assert!(caps.has(CapsFlag::ChardevSpicevmc));
    assert!(caps.has(CapsFlag::Vnc));
    assert!(caps.has(CapsFlag::NoShutdown));
    assert!(caps.has(CapsFlag::PciMultibus));
    assert!(caps.has(CapsFlag::MonitorJson));

    assert_eq!(caps.machine_types()[0].name, "pc-1.0");
    assert_eq!(caps.machine_types()[0].alias.as_deref(), Some("pc"));
    assert_eq!(caps.machine_types()[1].name, "isapc");
    assert_eq!(caps.cpu_definitions(), ["qemu64", "Opteron_G3"]);

    assert_eq!(probe_count(dir.path()), 1);
}

#[tokio::test]
async fn test_hit_returns_shared_record_without_reprobing() {
    let dir = TempDir::new().unwrap();
    let binary = write_fake_emulator(dir.path());
    let cache = test_cache(&dir);

    let first = cache.lookup(&binary).await.unwrap();
    let second = cache.lookup(&binary).await.unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(probe_count(dir.path()), 1);
}

#[tokio::test]
async fn test_concurrent_lookups_probe_at_most_once() {
    let dir = TempDir::new().unwrap();
    let binary = write_fake_emulator(dir.path());
    let cache = Arc::new(test_cache(&dir));

    let (a, b) = tokio::join!(cache.lookup(&binary), cache.lookup(&binary));
    let (a, b) = (a.unwrap(), b.unwrap());

    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(a.version(), b.version());
    assert_eq!(a.flags(), b.flags());
    assert_eq!(probe_count(dir.path()), 1);
}

#[tokio::test]
async fn test_mtime_bump_triggers_reprobe() {
    let dir = TempDir::new().unwrap();
    let binary = write_fake_emulator(dir.path());
    let cache = test_cache(&dir);

    let first = cache.lookup(&binary).await.unwrap();

    let file = OpenOptions::new().append(true).open(&binary).unwrap();
    file.set_modified(first.mtime().unwrap() + Duration::from_secs(10))
        .unwrap();
    drop(file);

    let second = cache.lookup(&binary).await.unwrap();

    assert!(!Arc::ptr_eq(&first, &second));
    assert!(second.mtime().unwrap() > first.mtime().unwrap());
    assert_eq!(probe_count(dir.path()), 2);
}

#[tokio::test]
async fn test_lookup_copy_is_decoupled() {
    let dir = TempDir::new().unwrap();
    let binary = write_fake_emulator(dir.path());
    let cache = test_cache(&dir);

    let mut copy = cache.lookup_copy(&binary).await.unwrap();
    copy.clear(CapsFlag::Drive);
    copy.add_cpu_definition("athlon");

    let cached = cache.lookup(&binary).await.unwrap();
    assert!(cached.has(CapsFlag::Drive));
    assert_eq!(cached.cpu_definitions(), ["qemu64", "Opteron_G3"]);
    assert_eq!(probe_count(dir.path()), 1);
}

#[tokio::test]
async fn test_missing_binary_is_fatal() {
    let dir = TempDir::new().unwrap();
    let cache = test_cache(&dir);

    let err = cache
        .lookup(dir.path().join("qemu-system-x86_64"))
        .await
        .unwrap_err();
    assert!(matches!(err, CapsError::Binary { .. }));
}

#[tokio::test]
async fn test_non_executable_binary_is_fatal() {
    let dir = TempDir::new().unwrap();
    let binary = dir.path().join("qemu-system-x86_64");
    fs::write(&binary, FAKE_EMULATOR).unwrap();
    fs::set_permissions(&binary, fs::Permissions::from_mode(0o644)).unwrap();
    let cache = test_cache(&dir);

    let err = cache.lookup(&binary).await.unwrap_err();
    assert!(matches!(err, CapsError::NotExecutable(_)));
}

#[tokio::test]
async fn test_failed_probe_installs_nothing() {
    let dir = TempDir::new().unwrap();
    let binary = dir.path().join("qemu-system-x86_64");
    // declines the monitor probe and prints garbage for -help
    fs::write(&binary, "#!/bin/sh\ncase \"$1\" in -S) exit 1;; esac\necho nonsense\n").unwrap();
    fs::set_permissions(&binary, fs::Permissions::from_mode(0o755)).unwrap();
    let cache = test_cache(&dir);

    let err = cache.lookup(&binary).await.unwrap_err();
    assert!(matches!(err, CapsError::HelpVersion { .. }));

    // the fatal error was not cached; a fixed binary probes cleanly
    write_fake_emulator(dir.path());
    let caps = cache.lookup(&binary).await.unwrap();
    assert_eq!(caps.version(), 1000001);
}

#[test]
fn test_synthetic_record_is_always_valid() {
    let caps = QemuCaps::new();
    assert!(caps.is_valid());
    assert!(caps.binary().is_none());
}

#[test]
fn test_config_requires_absolute_writable_dir() {
    assert!(CapsCache::new(CacheConfig::new("relative/dir")).is_err());
    assert!(CapsCache::new(CacheConfig::new("/nonexistent-qemu-caps-dir")).is_err());
    assert!(CapsCache::new(CacheConfig::new("/var/lib/../lib/vmm")).is_err());

    // the monitor socket path must still fit in a unix socket address
    let too_deep = format!("/var/lib/{}", "q".repeat(120));
    assert!(CapsCache::new(CacheConfig::new(too_deep)).is_err());

    let dir = TempDir::new().unwrap();
    assert!(CapsCache::new(CacheConfig::new(dir.path().to_str().unwrap())).is_ok());
}
