use crate::arch::Arch;
use crate::cache::CacheConfig;
use crate::caps::QemuCaps;
use crate::device::{
    apply_string_flags, parse_device_flags, reconcile_device_flags, DEVICE_QUERY_TYPES,
    OBJECT_PROP_FLAGS, OBJECT_TYPE_FLAGS,
};
use crate::error::{CapsError, CapsResult};
use crate::flags::{CapsFlag, FlagSet};
use crate::help;
use crate::listing::{cpu_model_parser, parse_machine_listing};
use crate::models::MachineType;
use crate::monitor::{MonitorOperations, NullCallbacks, QmpMonitor};
use std::env;
use std::fs::File;
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use tokio::process::Command;

/// The ".sock"/".pidfile" suffixes avoid a clash with a domain named
/// "capabilities". The pidfile lives in the lib directory rather than
/// the run directory because the daemonized emulator, not the manager,
/// creates it.
pub(crate) const MONITOR_SOCKET_NAME: &str = "capabilities.monitor.sock";
const PIDFILE_NAME: &str = "capabilities.pidfile";

const PASSTHROUGH_ENV: &[&str] = &[
    "PATH",
    "HOME",
    "USER",
    "LOGNAME",
    "TMPDIR",
    "LD_PRELOAD",
    "LD_LIBRARY_PATH",
];

/// Monitor command names that prove a capability.
const MONITOR_COMMAND_FLAGS: &[(&str, CapsFlag)] = &[
    ("system_wakeup", CapsFlag::Wakeup),
    ("transaction", CapsFlag::Transaction),
    ("block_job_cancel", CapsFlag::BlockJobSync),
    ("block-job-cancel", CapsFlag::BlockJobAsync),
    ("dump-guest-memory", CapsFlag::DumpGuestMemory),
    ("query-spice", CapsFlag::Spice),
    ("query-kvm", CapsFlag::Kvm),
    ("block-commit", CapsFlag::BlockCommit),
    ("query-vnc", CapsFlag::Vnc),
    ("drive-mirror", CapsFlag::DriveMirror),
    ("blockdev-snapshot-sync", CapsFlag::BlockdevSnapshotSync),
    ("add-fd", CapsFlag::AddFd),
    ("nbd-server-start", CapsFlag::NbdServer),
];

/// Monitor event names that prove a capability.
const MONITOR_EVENT_FLAGS: &[(&str, CapsFlag)] = &[
    ("BALLOON_CHANGE", CapsFlag::BalloonEvent),
    ("SPICE_MIGRATE_COMPLETED", CapsFlag::SeamlessMigration),
];

/// Capabilities assumed present in any build new enough for the monitor
/// probe (>= 1.2.0). A lower bound: later steps may clear entries
/// again, e.g. the accelerator-state demotion.
const MONITOR_BASELINE_FLAGS: &[CapsFlag] = &[
    CapsFlag::VncColon,
    CapsFlag::NoReboot,
    CapsFlag::Drive,
    CapsFlag::Name,
    CapsFlag::Uuid,
    CapsFlag::VnetHdr,
    CapsFlag::MigrateQemuTcp,
    CapsFlag::MigrateQemuExec,
    CapsFlag::DriveCacheV2,
    CapsFlag::DriveFormat,
    CapsFlag::Vga,
    CapsFlag::Compat010,
    CapsFlag::MemPath,
    CapsFlag::DriveSerial,
    CapsFlag::MigrateQemuUnix,
    CapsFlag::Chardev,
    CapsFlag::MonitorJson,
    CapsFlag::Balloon,
    CapsFlag::Device,
    CapsFlag::Sdl,
    CapsFlag::SmpTopology,
    CapsFlag::Netdev,
    CapsFlag::Rtc,
    CapsFlag::VhostNet,
    CapsFlag::NoHpet,
    CapsFlag::Nodefconfig,
    CapsFlag::BootMenu,
    CapsFlag::Fsdev,
    CapsFlag::NameProcess,
    CapsFlag::DriveReadonly,
    CapsFlag::SmbiosType,
    CapsFlag::VgaNone,
    CapsFlag::MigrateQemuFd,
    CapsFlag::DriveAio,
    CapsFlag::ChardevSpicevmc,
    CapsFlag::DeviceQxlVga,
    CapsFlag::DriveCacheDirectsync,
    CapsFlag::NoShutdown,
    CapsFlag::DriveCacheUnsafe,
    CapsFlag::FsdevReadonly,
    CapsFlag::VirtioBlkSgIo,
    CapsFlag::DriveCopyOnRead,
    CapsFlag::CpuHost,
    CapsFlag::FsdevWriteout,
    CapsFlag::DriveIotune,
    CapsFlag::Wakeup,
    CapsFlag::NoUserConfig,
    CapsFlag::NetdevBridge,
    CapsFlag::SeccompSandbox,
    CapsFlag::NoKvmPit,
];

/// Builds a probe invocation with the restricted execution environment
/// every probe uses: a sanitized environment, the configured uid/gid,
/// no ambient capabilities, and captured output. When earlier discovery
/// already established default-config suppression, the matching option
/// is added.
fn probe_command(binary: &Path, flags: Option<&FlagSet>, config: &CacheConfig) -> Command {
    let mut cmd = Command::new(binary);

    if let Some(flags) = flags {
        if flags.contains(CapsFlag::NoUserConfig) {
            cmd.arg("-no-user-config");
        } else if flags.contains(CapsFlag::Nodefconfig) {
            cmd.arg("-nodefconfig");
        }
    }

    cmd.env_clear();
    for key in PASSTHROUGH_ENV {
        if let Ok(value) = env::var(key) {
            cmd.env(key, value);
        }
    }

    if let Some(gid) = config.run_gid {
        cmd.gid(gid);
    }
    if let Some(uid) = config.run_uid {
        cmd.uid(uid);
    }

    unsafe {
        cmd.pre_exec(|| {
            // EINVAL just means the kernel predates the ambient set
            if libc::prctl(libc::PR_CAP_AMBIENT, libc::PR_CAP_AMBIENT_CLEAR_ALL, 0, 0, 0) < 0 {
                let err = io::Error::last_os_error();
                if err.raw_os_error() != Some(libc::EINVAL) {
                    return Err(err);
                }
            }
            Ok(())
        });
    }

    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    cmd
}

async fn run_probe(cmd: &mut Command, binary: &Path) -> CapsResult<Output> {
    cmd.output().await.map_err(|e| CapsError::Spawn {
        binary: binary.to_path_buf(),
        source: e,
    })
}

fn check_status(output: &Output, binary: &Path) -> CapsResult<()> {
    if output.status.success() {
        Ok(())
    } else {
        Err(CapsError::ProbeExit {
            binary: binary.to_path_buf(),
            status: output.status.code().unwrap_or(-1),
        })
    }
}

/// Kills the daemonized probe emulator and unlinks its pidfile on every
/// exit path of the monitor probe.
struct ProbeCleanup {
    pid: Option<i32>,
    pidfile: PathBuf,
}

impl ProbeCleanup {
    fn new(pidfile: PathBuf) -> Self {
        Self { pid: None, pidfile }
    }
}

impl Drop for ProbeCleanup {
    fn drop(&mut self) {
        if let Some(pid) = self.pid {
            log::debug!("killing monitor probe process {pid}");
            if unsafe { libc::kill(pid, libc::SIGKILL) } < 0 {
                let err = io::Error::last_os_error();
                if err.raw_os_error() != Some(libc::ESRCH) {
                    log::error!("failed to kill process {pid}: {err}");
                }
            }
        }
        let _ = std::fs::remove_file(&self.pidfile);
    }
}

async fn read_pidfile(path: &Path) -> Option<i32> {
    let contents = tokio::fs::read_to_string(path).await.ok()?;
    contents.trim().parse().ok().filter(|pid| *pid > 0)
}

/// Attempts capability discovery through a short-lived monitor session.
///
/// Returns `Ok(false)` when the binary declined (nonzero exit, missing
/// pidfile, unreachable or too-old monitor), which sends the caller to
/// the help-based path. Errors after a clean session start are real
/// failures and surface.
pub(crate) async fn probe_via_monitor(
    caps: &mut QemuCaps,
    binary: &Path,
    config: &CacheConfig,
) -> CapsResult<bool> {
    let lib_dir = Path::new(&config.lib_dir);
    let monitor_path = lib_dir.join(MONITOR_SOCKET_NAME);
    let pidfile = lib_dir.join(PIDFILE_NAME);
    let monitor_arg = format!("unix:{},server,nowait", monitor_path.display());

    log::debug!("trying monitor capability probe of {}", binary.display());

    let mut cleanup = ProbeCleanup::new(pidfile.clone());

    // -daemonize (rather than detaching the child ourselves)
    // synchronizes with the emulator creating its monitor socket:
    // control does not return until the socket exists
    let mut cmd = probe_command(binary, None, config);
    cmd.args([
        "-S",
        "-no-user-config",
        "-nodefaults",
        "-nographic",
        "-M",
        "none",
        "-qmp",
    ])
    .arg(&monitor_arg)
    .arg("-pidfile")
    .arg(&pidfile)
    .arg("-daemonize");

    let output = run_probe(&mut cmd, binary).await?;
    if !output.status.success() {
        log::debug!(
            "{} exited with {}, not a monitor-capable binary",
            binary.display(),
            output.status
        );
        return Ok(false);
    }

    let Some(pid) = read_pidfile(&pidfile).await else {
        log::debug!("failed to read pidfile {}", pidfile.display());
        return Ok(false);
    };
    cleanup.pid = Some(pid);

    let mut mon = match QmpMonitor::open(&monitor_path, Box::new(NullCallbacks)).await {
        Ok(mon) => mon,
        Err(e) => {
            log::debug!("failed to connect to monitor: {e}");
            return Ok(false);
        }
    };

    if let Err(e) = mon.negotiate().await {
        log::debug!("failed to negotiate monitor capabilities: {e}");
        return Ok(false);
    }

    let version = match mon.version().await {
        Ok(version) => version,
        Err(e) => {
            log::debug!("failed to query monitor version: {e}");
            return Ok(false);
        }
    };
    let (major, minor, micro) = (version.qemu.major, version.qemu.minor, version.qemu.micro);
    log::debug!("got version {major}.{minor}.{micro} ({})", version.package);

    if major < 1 || (major == 1 && minor < 2) {
        log::debug!("not new enough for monitor capability detection");
        return Ok(false);
    }

    caps.version = help::encode_version(major, minor, micro);
    caps.used_monitor = true;

    run_monitor_session(caps, &mut mon).await?;

    Ok(true)
}

/// The query sequence run against a negotiated monitor of a >= 1.2
/// binary. Split from the session setup so scripted monitors can drive
/// it in tests.
pub(crate) async fn run_monitor_session(
    caps: &mut QemuCaps,
    mon: &mut dyn MonitorOperations,
) -> CapsResult<()> {
    caps.flags.set_all(MONITOR_BASELINE_FLAGS.iter().copied());

    let arch_name = mon.target_arch().await?;
    caps.arch =
        Arch::from_qemu_name(&arch_name).ok_or(CapsError::UnknownArch(arch_name))?;

    // only the PC architectures have PCI-multibus and -no-acpi
    if caps.arch.is_x86() {
        caps.flags.set(CapsFlag::PciMultibus);
        caps.flags.set(CapsFlag::NoAcpi);
    }

    probe_commands(caps, mon).await?;
    probe_events(&mut caps.flags, mon).await?;
    probe_objects(&mut caps.flags, mon).await?;
    probe_monitor_machine_types(caps, mon).await?;
    caps.cpu_definitions = mon.cpu_definitions().await?;
    probe_kvm_state(&mut caps.flags, mon).await?;

    Ok(())
}

pub(crate) async fn probe_commands(
    caps: &mut QemuCaps,
    mon: &mut dyn MonitorOperations,
) -> CapsResult<()> {
    let commands = mon.commands().await?;
    apply_string_flags(&mut caps.flags, MONITOR_COMMAND_FLAGS, &commands);

    // add-fd appearing in the command list only proves the command
    // exists; the 1.3+ semantics (managed set numbering, the -add-fd
    // command line counterpart) are checked with a live registration
    if caps.flags.contains(CapsFlag::AddFd) {
        let dev_null = File::open("/dev/null").map_err(CapsError::AddFdProbe)?;
        if let Err(e) = mon.add_fd(0, dev_null.as_raw_fd(), "/dev/null").await {
            log::debug!("add-fd probe failed: {e}");
            caps.flags.clear(CapsFlag::AddFd);
        }
    }

    Ok(())
}

pub(crate) async fn probe_events(
    flags: &mut FlagSet,
    mon: &mut dyn MonitorOperations,
) -> CapsResult<()> {
    let events = mon.events().await?;
    apply_string_flags(flags, MONITOR_EVENT_FLAGS, &events);
    Ok(())
}

async fn probe_objects(flags: &mut FlagSet, mon: &mut dyn MonitorOperations) -> CapsResult<()> {
    let types = mon.object_types().await?;
    apply_string_flags(flags, OBJECT_TYPE_FLAGS, &types);

    for (type_name, table) in OBJECT_PROP_FLAGS {
        let props = mon.object_properties(type_name).await?;
        apply_string_flags(flags, table, &props);
    }

    reconcile_device_flags(flags);

    Ok(())
}

async fn probe_monitor_machine_types(
    caps: &mut QemuCaps,
    mon: &mut dyn MonitorOperations,
) -> CapsResult<()> {
    let entries = mon.machines().await?;

    let mut machines = Vec::with_capacity(entries.len());
    let mut def_idx = 0;
    for (i, entry) in entries.into_iter().enumerate() {
        if entry.is_default {
            def_idx = i;
        }
        machines.push(MachineType {
            name: entry.name,
            alias: entry.alias,
        });
    }
    if def_idx > 0 {
        let default = machines.remove(def_idx);
        machines.insert(0, default);
    }

    caps.machine_types = machines;
    Ok(())
}

async fn probe_kvm_state(flags: &mut FlagSet, mon: &mut dyn MonitorOperations) -> CapsResult<()> {
    if !flags.contains(CapsFlag::Kvm) {
        return Ok(());
    }

    let state = mon.kvm_state().await?;

    // The kvm flag so far only records that query-kvm exists, not that
    // KVM support is actually available or on by default. Absent
    // support clears the flag; present-but-disabled demotes it to
    // "must be enabled explicitly".
    if !state.present {
        flags.clear(CapsFlag::Kvm);
    } else if !state.enabled {
        flags.clear(CapsFlag::Kvm);
        flags.set(CapsFlag::EnableKvm);
    }

    Ok(())
}

/// Legacy discovery for binaries the monitor probe declined: parse the
/// help output, then run the conditional device query and the
/// machine-type and CPU-model listings.
pub(crate) async fn probe_via_help(
    caps: &mut QemuCaps,
    binary: &Path,
    config: &CacheConfig,
) -> CapsResult<()> {
    caps.arch = help::arch_from_binary(binary)?;

    let mut cmd = probe_command(binary, None, config);
    cmd.arg("-help");
    let output = run_probe(&mut cmd, binary).await?;
    check_status(&output, binary)?;
    let help_text = String::from_utf8_lossy(&output.stdout);

    let parsed = help::parse_help(binary, &help_text, &mut caps.flags)?;
    caps.version = parsed.version;
    caps.kvm_version = parsed.kvm_version;

    if caps.arch.is_x86() {
        caps.flags.set(CapsFlag::PciMultibus);
    } else {
        // -no-acpi only works on the PC architectures even if the help
        // text advertises it
        caps.flags.clear(CapsFlag::NoAcpi);
    }

    // the device query only yields anything where qemu understands the
    // 0.13+ notion of "-device driver,?"
    if caps.flags.contains(CapsFlag::Device) && help_text.contains("-device driver,?") {
        probe_device_flags(caps, binary, config).await?;
    }

    probe_cpu_models(caps, binary, config).await?;
    probe_machine_types(caps, binary, config).await?;

    Ok(())
}

async fn probe_device_flags(
    caps: &mut QemuCaps,
    binary: &Path,
    config: &CacheConfig,
) -> CapsResult<()> {
    let mut cmd = probe_command(binary, Some(&caps.flags), config);
    cmd.args(["-device", "?"]);
    for type_name in DEVICE_QUERY_TYPES {
        cmd.arg("-device").arg(format!("{type_name},?"));
    }

    let output = run_probe(&mut cmd, binary).await?;
    check_status(&output, binary)?;

    // -help goes to stdout, but -device ? goes to stderr
    let text = String::from_utf8_lossy(&output.stderr);
    parse_device_flags(&mut caps.flags, &text)
}

async fn probe_cpu_models(
    caps: &mut QemuCaps,
    binary: &Path,
    config: &CacheConfig,
) -> CapsResult<()> {
    let Some(parse) = cpu_model_parser(caps.arch) else {
        log::debug!("don't know how to parse {} CPU models", caps.arch);
        return Ok(());
    };

    let mut cmd = probe_command(binary, Some(&caps.flags), config);
    cmd.args(["-cpu", "?"]);
    let output = run_probe(&mut cmd, binary).await?;
    check_status(&output, binary)?;

    caps.cpu_definitions = parse(&String::from_utf8_lossy(&output.stdout));
    Ok(())
}

async fn probe_machine_types(
    caps: &mut QemuCaps,
    binary: &Path,
    config: &CacheConfig,
) -> CapsResult<()> {
    let mut cmd = probe_command(binary, Some(&caps.flags), config);
    cmd.args(["-M", "?"]);

    // a nonzero exit from older qemu that did not understand '-M ?' is
    // tolerated
    let output = run_probe(&mut cmd, binary).await?;

    caps.machine_types = parse_machine_listing(&String::from_utf8_lossy(&output.stdout));
    Ok(())
}
