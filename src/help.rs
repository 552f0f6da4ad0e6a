use crate::arch::Arch;
use crate::error::{CapsError, CapsResult};
use crate::flags::{CapsFlag, FlagSet};
use lazy_static::lazy_static;
use regex::Regex;
use std::path::Path;

/// What the version preamble of a `-help` dump revealed.
///
/// `qemu-kvm` builds append a parenthesized marker after the version:
/// `(qemu-kvm-x.y.z)` in stable releases, `(kvm-NN)` for kvm up to 85,
/// `(qemu-kvm-devel-NN)` afterwards. Only the `(kvm-` form carries a
/// standalone KVM version number.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParsedHelp {
    /// Encoded as major * 1_000_000 + minor * 1_000 + micro
    pub version: u32,
    /// Whether this is a KVM-accelerated build variant
    pub is_kvm: bool,
    /// KVM release number, 0 unless the `(kvm-` marker was present
    pub kvm_version: u32,
}

const QEMU_SYSTEM_PREFIX: &str = "qemu-system-";
const QEMU_KVM_VER_PREFIX: &str = "(qemu-kvm-";
const KVM_VER_PREFIX: &str = "(kvm-";

lazy_static! {
    static ref HELP_VERSION_RE: Regex =
        Regex::new(r"^QEMU (?:PC )?emulator version[ \t]+(\d+)\.(\d+)(?:\.(\d+))?").unwrap();
}

/// Derives the target architecture from the binary's file name. A
/// `qemu-system-<arch>` suffix decodes through the usual alias table;
/// anything else is assumed to be a native-arch build.
pub(crate) fn arch_from_binary(binary: &Path) -> CapsResult<Arch> {
    let name = binary.to_string_lossy();
    match name.find(QEMU_SYSTEM_PREFIX) {
        Some(pos) => {
            let suffix = &name[pos + QEMU_SYSTEM_PREFIX.len()..];
            Arch::from_qemu_name(suffix)
                .ok_or_else(|| CapsError::UnknownArch(suffix.to_string()))
        }
        None => Ok(Arch::host()),
    }
}

/// Parses the full `-help` output: extracts the version triple and the
/// accelerator marker, then derives every capability the help text and
/// the version gates give evidence for. Machine-type and CPU-model
/// tables are never touched here.
pub(crate) fn parse_help(
    binary: &Path,
    help: &str,
    flags: &mut FlagSet,
) -> CapsResult<ParsedHelp> {
    let bad_version = || CapsError::HelpVersion {
        binary: binary.to_path_buf(),
        excerpt: help.lines().next().unwrap_or("").to_string(),
    };

    let caps = HELP_VERSION_RE.captures(help).ok_or_else(bad_version)?;
    let major: u32 = caps[1].parse().map_err(|_| bad_version())?;
    let minor: u32 = caps[2].parse().map_err(|_| bad_version())?;
    let micro: u32 = caps
        .get(3)
        .map(|m| m.as_str().parse())
        .transpose()
        .map_err(|_| bad_version())?
        .unwrap_or(0);

    let mut parsed = ParsedHelp {
        version: encode_version(major, minor, micro),
        ..Default::default()
    };

    let rest = help[caps.get(0).unwrap().end()..].trim_start_matches([' ', '\t']);
    if rest.starts_with(QEMU_KVM_VER_PREFIX) {
        parsed.is_kvm = true;
    } else if let Some(tail) = rest.strip_prefix(KVM_VER_PREFIX) {
        parsed.is_kvm = true;
        let digits: String = tail.chars().take_while(|c| c.is_ascii_digit()).collect();
        parsed.kvm_version = digits.parse().map_err(|_| bad_version())?;
    }

    compute_cmd_flags(help, parsed, flags);

    log::debug!(
        "version {}.{}.{}, cooked version {}, flags {}",
        major,
        minor,
        micro,
        parsed.version,
        flags
    );
    if parsed.kvm_version != 0 {
        log::debug!("KVM version {} detected", parsed.kvm_version);
    } else if parsed.is_kvm {
        log::debug!("qemu-kvm version {}.{}.{} detected", major, minor, micro);
    }

    Ok(parsed)
}

pub(crate) fn encode_version(major: u32, minor: u32, micro: u32) -> u32 {
    major * 1_000_000 + minor * 1_000 + micro
}

/// Every rule is an independent substring (or version) test; evaluation
/// order only matters where one option name is a suffix of another.
fn compute_cmd_flags(help: &str, parsed: ParsedHelp, flags: &mut FlagSet) {
    let ParsedHelp {
        version,
        is_kvm,
        kvm_version,
    } = parsed;

    if help.contains("-no-kqemu") {
        flags.set(CapsFlag::Kqemu);
    }
    if help.contains("-enable-kqemu") {
        flags.set(CapsFlag::EnableKqemu);
    }
    if help.contains("-no-kvm") {
        flags.set(CapsFlag::Kvm);
    }
    if help.contains("-enable-kvm") {
        flags.set(CapsFlag::EnableKvm);
    }
    if help.contains("-no-reboot") {
        flags.set(CapsFlag::NoReboot);
    }
    if help.contains("-name") {
        flags.set(CapsFlag::Name);
        if help.contains(",process=") {
            flags.set(CapsFlag::NameProcess);
        }
    }
    if help.contains("-uuid") {
        flags.set(CapsFlag::Uuid);
    }
    // "-domid" is a substring of "-xen-domid", hence the else branch
    if help.contains("-xen-domid") {
        flags.set(CapsFlag::XenDomid);
    } else if help.contains("-domid") {
        flags.set(CapsFlag::Domid);
    }
    if help.contains("-drive") {
        flags.set(CapsFlag::Drive);
        if let Some(pos) = help.find("cache=") {
            let tail = &help[pos..];
            if let Some(end) = tail.find(']') {
                let block = &tail[..end];
                if !block.contains("on|off") {
                    flags.set(CapsFlag::DriveCacheV2);
                }
                if block.contains("directsync") {
                    flags.set(CapsFlag::DriveCacheDirectsync);
                }
                if block.contains("unsafe") {
                    flags.set(CapsFlag::DriveCacheUnsafe);
                }
            }
        }
        if help.contains("format=") {
            flags.set(CapsFlag::DriveFormat);
        }
        if help.contains("readonly=") {
            flags.set(CapsFlag::DriveReadonly);
        }
        if help.contains("aio=threads|native") {
            flags.set(CapsFlag::DriveAio);
        }
        if help.contains("copy-on-read=on|off") {
            flags.set(CapsFlag::DriveCopyOnRead);
        }
        if help.contains("bps=") {
            flags.set(CapsFlag::DriveIotune);
        }
    }
    if let Some(pos) = help.find("-vga") {
        if !help.contains("-std-vga") {
            let tail = &help[pos..];
            flags.set(CapsFlag::Vga);
            if tail.contains("|qxl") {
                flags.set(CapsFlag::VgaQxl);
            }
            if let (Some(none_at), Some(nl)) = (tail.find("|none"), tail.find('\n')) {
                if none_at < nl {
                    flags.set(CapsFlag::VgaNone);
                }
            }
        }
    }
    if help.contains("-spice") {
        flags.set(CapsFlag::Spice);
    }
    if help.contains("-vnc") {
        flags.set(CapsFlag::Vnc);
    }
    if help.contains("seamless-migration=") {
        flags.set(CapsFlag::SeamlessMigration);
    }
    if help.contains("boot=on") {
        flags.set(CapsFlag::DriveBoot);
    }
    if help.contains("serial=s") {
        flags.set(CapsFlag::DriveSerial);
    }
    if help.contains("-pcidevice") {
        flags.set(CapsFlag::PciDevice);
    }
    if help.contains("-mem-path") {
        flags.set(CapsFlag::MemPath);
    }
    if help.contains("-chardev") {
        flags.set(CapsFlag::Chardev);
        if help.contains("-chardev spicevmc") {
            flags.set(CapsFlag::ChardevSpicevmc);
        }
    }
    if help.contains("-balloon") {
        flags.set(CapsFlag::Balloon);
    }
    if help.contains("-device") {
        flags.set(CapsFlag::Device);
        // When -device was introduced, qemu already supported drive's
        // readonly option but didn't advertise that.
        flags.set(CapsFlag::DriveReadonly);
    }
    if help.contains("-nodefconfig") {
        flags.set(CapsFlag::Nodefconfig);
    }
    if help.contains("-no-user-config") {
        flags.set(CapsFlag::NoUserConfig);
    }
    // The trailing ' ' avoids a bogus match on -rtc-td-hack
    if help.contains("-rtc ") {
        flags.set(CapsFlag::Rtc);
    }
    if help.contains("-rtc-td-hack") {
        flags.set(CapsFlag::RtcTdHack);
    }
    if help.contains("-no-hpet") {
        flags.set(CapsFlag::NoHpet);
    }
    if help.contains("-no-acpi") {
        flags.set(CapsFlag::NoAcpi);
    }
    if help.contains("-no-kvm-pit-reinjection") {
        flags.set(CapsFlag::NoKvmPit);
    }
    if help.contains("-tdf") {
        flags.set(CapsFlag::Tdf);
    }
    if help.contains("-enable-nesting") {
        flags.set(CapsFlag::Nesting);
    }
    if help.contains(",menu=on") {
        flags.set(CapsFlag::BootMenu);
    }
    if help.contains(",reboot-timeout=rb_time") {
        flags.set(CapsFlag::RebootTimeout);
    }
    if let Some(pos) = help.find("-fsdev") {
        let tail = &help[pos..];
        flags.set(CapsFlag::Fsdev);
        if tail.contains("readonly") {
            flags.set(CapsFlag::FsdevReadonly);
        }
        if tail.contains("writeout") {
            flags.set(CapsFlag::FsdevWriteout);
        }
    }
    if help.contains("-smbios type") {
        flags.set(CapsFlag::SmbiosType);
    }
    if help.contains("-sandbox") {
        flags.set(CapsFlag::SeccompSandbox);
    }

    // -netdev exists on 0.12, but the matching monitor commands needed
    // for hotplug do not, so it is only trusted from 0.13 on.
    if let Some(pos) = help.find("-netdev") {
        if version >= 13000 {
            if help[pos..].contains("bridge") {
                flags.set(CapsFlag::NetdevBridge);
            }
            flags.set(CapsFlag::Netdev);
        }
    }

    if help.contains("-sdl") {
        flags.set(CapsFlag::Sdl);
    }
    if help.contains("cores=") && help.contains("threads=") && help.contains("sockets=") {
        flags.set(CapsFlag::SmpTopology);
    }

    if version >= 9000 {
        flags.set(CapsFlag::VncColon);
    }

    if is_kvm && (version >= 10000 || kvm_version >= 74) {
        flags.set(CapsFlag::VnetHdr);
    }

    if help.contains(",vhost=") {
        flags.set(CapsFlag::VhostNet);
    }

    // SIGTERM handling is buggy when combined with -no-shutdown on qemu
    // 0.14.* and 0.15.0, so the option is not used for those versions.
    if help.contains("-no-shutdown") && (version < 14000 || version > 15000) {
        flags.set(CapsFlag::NoShutdown);
    }

    if help.contains("dump-guest-core=on|off") {
        flags.set(CapsFlag::DumpGuestCore);
    }

    // -incoming variants:
    //   tcp    (kvm >= 79, qemu >= 0.10.0)
    //   exec   (kvm >= 80, qemu >= 0.10.0)
    //   unix   (qemu >= 0.12.0)
    //   fd     (qemu >= 0.12.0)
    //   stdio  (all earlier kvm)
    // The pre-kvm-79 tcp support blocked the monitor console while
    // waiting for data, so it is treated as absent.
    if version >= 10000 {
        flags.set(CapsFlag::MigrateQemuTcp);
        flags.set(CapsFlag::MigrateQemuExec);
        if version >= 12000 {
            flags.set(CapsFlag::MigrateQemuUnix);
            flags.set(CapsFlag::MigrateQemuFd);
        }
    } else if kvm_version >= 79 {
        flags.set(CapsFlag::MigrateQemuTcp);
        if kvm_version >= 80 {
            flags.set(CapsFlag::MigrateQemuExec);
        }
    } else if kvm_version > 0 {
        flags.set(CapsFlag::MigrateKvmStdio);
    }

    if version >= 10000 {
        flags.set(CapsFlag::Compat010);
    }

    if version >= 11000 {
        flags.set(CapsFlag::VirtioBlkSgIo);
    }

    // JSON mode existed on 0.12.0 but was too incomplete to use; 0.13.0
    // is the first release good enough. Distribution builds labeled
    // 0.12.x with backports advertise themselves in the help text.
    if version >= 13000 {
        flags.set(CapsFlag::MonitorJson);
    } else if version >= 12000 && help.contains("libvirt") {
        flags.set(CapsFlag::MonitorJson);
        flags.set(CapsFlag::Netdev);
    }

    if version >= 13000 {
        flags.set(CapsFlag::PciMultifunction);
    }

    // rombar is advertised by -device pci-assign,? only on much newer
    // binaries than actually support it; it exists from 0.12 onward.
    if version >= 12000 {
        flags.set(CapsFlag::PciRombar);
    }

    if version >= 11000 {
        flags.set(CapsFlag::CpuHost);
    }

    if version >= 1002000 {
        flags.set(CapsFlag::DeviceVideoPrimary);
    }
}
