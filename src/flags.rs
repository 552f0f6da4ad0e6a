use std::fmt;
use std::str::FromStr;

/// Pairs every capability with the string name used to persist it. The
/// names are read back from domain status files across daemon restarts,
/// so existing entries must never be renamed or reordered; new
/// capabilities are appended at the end.
macro_rules! capability_flags {
    ($( $variant:ident => $name:literal, )+) => {
        /// One discrete feature a QEMU binary may support: a command-line
        /// option, an emulated device type, a device property, a monitor
        /// command, or a behavior implied by the binary's version.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u16)]
        pub enum CapsFlag {
            $( $variant, )+
        }

        impl CapsFlag {
            /// Number of known capabilities.
            pub const COUNT: usize = [$( $name ),+].len();

            /// Every capability, in persistence order.
            pub const ALL: [CapsFlag; Self::COUNT] = [$( CapsFlag::$variant, )+];

            /// The stable on-disk name of this capability.
            pub fn name(self) -> &'static str {
                match self {
                    $( CapsFlag::$variant => $name, )+
                }
            }

            /// Resolves a persisted name back to a capability. Returns
            /// `None` for names this build does not know about.
            pub fn from_name(name: &str) -> Option<CapsFlag> {
                match name {
                    $( $name => Some(CapsFlag::$variant), )+
                    _ => None,
                }
            }
        }
    };
}

capability_flags! {
    Kqemu => "kqemu",
    VncColon => "vnc-colon",
    NoReboot => "no-reboot",
    Drive => "drive",
    DriveBoot => "drive-boot",
    Name => "name",
    Uuid => "uuid",
    Domid => "domid",
    VnetHdr => "vnet-hdr",
    MigrateKvmStdio => "migrate-kvm-stdio",
    MigrateQemuTcp => "migrate-qemu-tcp",
    MigrateQemuExec => "migrate-qemu-exec",
    DriveCacheV2 => "drive-cache-v2",
    Kvm => "kvm",
    DriveFormat => "drive-format",
    Vga => "vga",
    Compat010 => "0.10",
    PciDevice => "pci-device",
    MemPath => "mem-path",
    DriveSerial => "drive-serial",
    XenDomid => "xen-domid",
    MigrateQemuUnix => "migrate-qemu-unix",
    Chardev => "chardev",
    EnableKvm => "enable-kvm",
    MonitorJson => "monitor-json",
    Balloon => "balloon",
    Device => "device",
    Sdl => "sdl",
    SmpTopology => "smp-topology",
    Netdev => "netdev",
    Rtc => "rtc",
    VhostNet => "vhost-net",
    RtcTdHack => "rtc-td-hack",
    NoHpet => "no-hpet",
    NoKvmPit => "no-kvm-pit",
    Tdf => "tdf",
    PciConfigfd => "pci-configfd",
    Nodefconfig => "nodefconfig",
    BootMenu => "boot-menu",
    EnableKqemu => "enable-kqemu",
    Fsdev => "fsdev",
    Nesting => "nesting",
    NameProcess => "name-process",
    DriveReadonly => "drive-readonly",
    SmbiosType => "smbios-type",
    VgaQxl => "vga-qxl",
    Spice => "spice",
    VgaNone => "vga-none",
    MigrateQemuFd => "migrate-qemu-fd",
    BootIndex => "boot-index",
    HdaDuplex => "hda-duplex",
    DriveAio => "drive-aio",
    PciMultibus => "pci-multibus",
    PciBootindex => "pci-bootindex",
    CcidEmulated => "ccid-emulated",
    CcidPassthru => "ccid-passthru",
    ChardevSpicevmc => "chardev-spicevmc",
    DeviceSpicevmc => "device-spicevmc",
    VirtioTxAlg => "virtio-tx-alg",
    DeviceQxlVga => "device-qxl-vga",
    PciMultifunction => "pci-multifunction",
    VirtioIoeventfd => "virtio-blk-pci.ioeventfd",
    Sga => "sga",
    VirtioBlkEventIdx => "virtio-blk-pci.event_idx",
    VirtioNetEventIdx => "virtio-net-pci.event_idx",
    DriveCacheDirectsync => "cache-directsync",
    Piix3UsbUhci => "piix3-usb-uhci",
    Piix4UsbUhci => "piix4-usb-uhci",
    UsbEhci => "usb-ehci",
    Ich9UsbEhci1 => "ich9-usb-ehci1",
    Vt82c686bUsbUhci => "vt82c686b-usb-uhci",
    PciOhci => "pci-ohci",
    UsbRedir => "usb-redir",
    UsbHub => "usb-hub",
    NoShutdown => "no-shutdown",
    DriveCacheUnsafe => "cache-unsafe",
    PciRombar => "rombar",
    Ich9Ahci => "ich9-ahci",
    NoAcpi => "no-acpi",
    FsdevReadonly => "fsdev-readonly",
    VirtioBlkScsi => "virtio-blk-pci.scsi",
    VirtioBlkSgIo => "blk-sg-io",
    DriveCopyOnRead => "drive-copy-on-read",
    CpuHost => "cpu-host",
    FsdevWriteout => "fsdev-writeout",
    DriveIotune => "drive-iotune",
    Wakeup => "system_wakeup",
    ScsiDiskChannel => "scsi-disk.channel",
    ScsiBlock => "scsi-block",
    Transaction => "transaction",
    BlockJobSync => "block-job-sync",
    BlockJobAsync => "block-job-async",
    ScsiCd => "scsi-cd",
    IdeCd => "ide-cd",
    NoUserConfig => "no-user-config",
    HdaMicro => "hda-micro",
    DumpGuestMemory => "dump-guest-memory",
    NecUsbXhci => "nec-usb-xhci",
    VirtioS390 => "virtio-s390",
    BalloonEvent => "balloon-event",
    NetdevBridge => "bridge",
    ScsiLsi => "lsi",
    VirtioScsiPci => "virtio-scsi-pci",
    Blockio => "blockio",
    DisableS3 => "disable-s3",
    DisableS4 => "disable-s4",
    UsbRedirFilter => "usb-redir.filter",
    IdeDriveWwn => "ide-drive.wwn",
    ScsiDiskWwn => "scsi-disk.wwn",
    SeccompSandbox => "seccomp-sandbox",
    RebootTimeout => "reboot-timeout",
    DumpGuestCore => "dump-guest-core",
    SeamlessMigration => "seamless-migration",
    BlockCommit => "block-commit",
    Vnc => "vnc",
    DriveMirror => "drive-mirror",
    UsbRedirBootindex => "usb-redir.bootindex",
    UsbHostBootindex => "usb-host.bootindex",
    BlockdevSnapshotSync => "blockdev-snapshot-sync",
    DeviceQxl => "qxl",
    DeviceVga => "VGA",
    DeviceCirrusVga => "cirrus-vga",
    DeviceVmwareSvga => "vmware-svga",
    DeviceVideoPrimary => "device-video-primary",
    SclpS390 => "s390-sclp",
    DeviceUsbSerial => "usb-serial",
    DeviceUsbNet => "usb-net",
    AddFd => "add-fd",
    NbdServer => "nbd-server",
    DeviceVirtioRng => "virtio-rng",
    ObjectRngRandom => "rng-random",
    ObjectRngEgd => "rng-egd",
}

const WORDS: usize = (CapsFlag::COUNT + 63) / 64;

/// Dense bit set over [`CapsFlag`].
///
/// The textual form produced by [`fmt::Display`] lists the names of the
/// set flags, comma separated, in enumeration order. Parsing accepts the
/// same form and ignores names the current enumeration does not know, so
/// records written by a newer build still load.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct FlagSet {
    bits: [u64; WORDS],
}

impl FlagSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, flag: CapsFlag) {
        let idx = flag as usize;
        self.bits[idx / 64] |= 1 << (idx % 64);
    }

    pub fn clear(&mut self, flag: CapsFlag) {
        let idx = flag as usize;
        self.bits[idx / 64] &= !(1 << (idx % 64));
    }

    pub fn contains(&self, flag: CapsFlag) -> bool {
        let idx = flag as usize;
        self.bits[idx / 64] & (1 << (idx % 64)) != 0
    }

    pub fn set_all<I: IntoIterator<Item = CapsFlag>>(&mut self, flags: I) {
        for flag in flags {
            self.set(flag);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bits.iter().all(|w| *w == 0)
    }

    /// Iterates the set flags in enumeration order.
    pub fn iter(&self) -> impl Iterator<Item = CapsFlag> + '_ {
        CapsFlag::ALL.iter().copied().filter(|f| self.contains(*f))
    }
}

impl fmt::Display for FlagSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for flag in self.iter() {
            if !first {
                f.write_str(",")?;
            }
            f.write_str(flag.name())?;
            first = false;
        }
        Ok(())
    }
}

impl fmt::Debug for FlagSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FlagSet({})", self)
    }
}

impl FromStr for FlagSet {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut set = FlagSet::new();
        for name in s.split(',').filter(|n| !n.is_empty()) {
            if let Some(flag) = CapsFlag::from_name(name) {
                set.set(flag);
            }
        }
        Ok(set)
    }
}
