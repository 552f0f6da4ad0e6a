use crate::error::{CapsError, CapsResult};
use crate::flags::{CapsFlag, FlagSet};

/// Device/object type names that map directly to a capability.
pub(crate) const OBJECT_TYPE_FLAGS: &[(&str, CapsFlag)] = &[
    ("hda-duplex", CapsFlag::HdaDuplex),
    ("hda-micro", CapsFlag::HdaMicro),
    ("ccid-card-emulated", CapsFlag::CcidEmulated),
    ("ccid-card-passthru", CapsFlag::CcidPassthru),
    ("piix3-usb-uhci", CapsFlag::Piix3UsbUhci),
    ("piix4-usb-uhci", CapsFlag::Piix4UsbUhci),
    ("usb-ehci", CapsFlag::UsbEhci),
    ("ich9-usb-ehci1", CapsFlag::Ich9UsbEhci1),
    ("vt82c686b-usb-uhci", CapsFlag::Vt82c686bUsbUhci),
    ("pci-ohci", CapsFlag::PciOhci),
    ("nec-usb-xhci", CapsFlag::NecUsbXhci),
    ("usb-redir", CapsFlag::UsbRedir),
    ("usb-hub", CapsFlag::UsbHub),
    ("ich9-ahci", CapsFlag::Ich9Ahci),
    ("virtio-blk-s390", CapsFlag::VirtioS390),
    ("sclpconsole", CapsFlag::SclpS390),
    ("lsi53c895a", CapsFlag::ScsiLsi),
    ("virtio-scsi-pci", CapsFlag::VirtioScsiPci),
    ("spicevmc", CapsFlag::DeviceSpicevmc),
    ("qxl-vga", CapsFlag::DeviceQxlVga),
    ("qxl", CapsFlag::DeviceQxl),
    ("sga", CapsFlag::Sga),
    ("scsi-block", CapsFlag::ScsiBlock),
    ("scsi-cd", CapsFlag::ScsiCd),
    ("ide-cd", CapsFlag::IdeCd),
    ("VGA", CapsFlag::DeviceVga),
    ("cirrus-vga", CapsFlag::DeviceCirrusVga),
    ("vmware-svga", CapsFlag::DeviceVmwareSvga),
    ("usb-serial", CapsFlag::DeviceUsbSerial),
    ("usb-net", CapsFlag::DeviceUsbNet),
    ("virtio-rng-pci", CapsFlag::DeviceVirtioRng),
    ("rng-random", CapsFlag::ObjectRngRandom),
    ("rng-egd", CapsFlag::ObjectRngEgd),
];

const VIRTIO_BLK_PROPS: &[(&str, CapsFlag)] = &[
    ("multifunction", CapsFlag::PciMultifunction),
    ("bootindex", CapsFlag::BootIndex),
    ("ioeventfd", CapsFlag::VirtioIoeventfd),
    ("event_idx", CapsFlag::VirtioBlkEventIdx),
    ("scsi", CapsFlag::VirtioBlkScsi),
    ("logical_block_size", CapsFlag::Blockio),
];

const VIRTIO_NET_PROPS: &[(&str, CapsFlag)] = &[
    ("tx", CapsFlag::VirtioTxAlg),
    ("event_idx", CapsFlag::VirtioNetEventIdx),
];

const PCI_ASSIGN_PROPS: &[(&str, CapsFlag)] = &[
    ("rombar", CapsFlag::PciRombar),
    ("configfd", CapsFlag::PciConfigfd),
    ("bootindex", CapsFlag::PciBootindex),
];

const SCSI_DISK_PROPS: &[(&str, CapsFlag)] = &[
    ("channel", CapsFlag::ScsiDiskChannel),
    ("wwn", CapsFlag::ScsiDiskWwn),
];

const IDE_DRIVE_PROPS: &[(&str, CapsFlag)] = &[("wwn", CapsFlag::IdeDriveWwn)];

const PIIX4_PM_PROPS: &[(&str, CapsFlag)] = &[
    ("disable_s3", CapsFlag::DisableS3),
    ("disable_s4", CapsFlag::DisableS4),
];

const USB_REDIR_PROPS: &[(&str, CapsFlag)] = &[
    ("filter", CapsFlag::UsbRedirFilter),
    ("bootindex", CapsFlag::UsbRedirBootindex),
];

const USB_HOST_PROPS: &[(&str, CapsFlag)] = &[("bootindex", CapsFlag::UsbHostBootindex)];

/// Per-type property tables, keyed by object type name.
pub(crate) const OBJECT_PROP_FLAGS: &[(&str, &[(&str, CapsFlag)])] = &[
    ("virtio-blk-pci", VIRTIO_BLK_PROPS),
    ("virtio-net-pci", VIRTIO_NET_PROPS),
    ("virtio-blk-s390", VIRTIO_BLK_PROPS),
    ("virtio-net-s390", VIRTIO_NET_PROPS),
    ("pci-assign", PCI_ASSIGN_PROPS),
    ("kvm-pci-assign", PCI_ASSIGN_PROPS),
    ("scsi-disk", SCSI_DISK_PROPS),
    ("ide-drive", IDE_DRIVE_PROPS),
    ("PIIX4_PM", PIIX4_PM_PROPS),
    ("usb-redir", USB_REDIR_PROPS),
    ("usb-host", USB_HOST_PROPS),
];

/// Types queried with `-device <type>,?` on the legacy path. qemu 0.13+
/// silently ignores unrecognized types when the queries are combined
/// with a plain `-device ?`, so the whole batch goes into one spawn.
pub(crate) const DEVICE_QUERY_TYPES: &[&str] = &[
    "pci-assign",
    "virtio-blk-pci",
    "virtio-net-pci",
    "scsi-disk",
    "PIIX4_PM",
    "usb-redir",
    "ide-drive",
    "usb-host",
];

const OBJECT_TYPE_PREFIX: &str = "name \"";

/// Extracts every `name "<type>"` occurrence from the combined device
/// query output. An unterminated quote is a fatal parse error.
pub(crate) fn parse_object_types(text: &str) -> CapsResult<Vec<String>> {
    let mut types = Vec::new();
    let mut rest = text;

    while let Some(pos) = rest.find(OBJECT_TYPE_PREFIX) {
        let after = &rest[pos + OBJECT_TYPE_PREFIX.len()..];
        let Some(end) = after.find('"') else {
            return Err(CapsError::DeviceListing("missing quote"));
        };
        types.push(after[..end].to_string());
        rest = &after[end..];
    }

    Ok(types)
}

/// Extracts the property names of one type from the combined output:
/// lines of the form `<type>.<prop>=<desc>`. Lines opening a new
/// `name "…"` section reset the context.
pub(crate) fn parse_object_props(text: &str, type_name: &str) -> CapsResult<Vec<String>> {
    let mut props = Vec::new();

    for line in text.lines() {
        if line.starts_with(OBJECT_TYPE_PREFIX) {
            continue;
        }
        let Some(rest) = line.strip_prefix(type_name) else {
            continue;
        };
        let Some(rest) = rest.strip_prefix('.') else {
            continue;
        };
        let Some(eq) = rest.find('=') else {
            return Err(CapsError::DeviceListing("missing '='"));
        };
        props.push(rest[..eq].to_string());
    }

    Ok(props)
}

/// Sets every flag whose table entry names a value present in `values`.
pub(crate) fn apply_string_flags(
    flags: &mut FlagSet,
    table: &[(&str, CapsFlag)],
    values: &[String],
) {
    for (name, flag) in table {
        if values.iter().any(|v| v == name) {
            flags.set(*flag);
        }
    }
}

/// Reconciles mutually exclusive and implied flags once a discovery
/// pass has finished:
/// - `-chardev spicevmc` (detected from the help text) is preferred
///   over `-device spicevmc`
/// - a binary with the newer `-device qxl` supports `-vga qxl` as well
pub(crate) fn reconcile_device_flags(flags: &mut FlagSet) {
    if flags.contains(CapsFlag::ChardevSpicevmc) {
        flags.clear(CapsFlag::DeviceSpicevmc);
    }
    if flags.contains(CapsFlag::DeviceQxl) {
        flags.set(CapsFlag::VgaQxl);
    }
}

/// Runs both parses over one combined `-device ?` dump and applies the
/// lookup tables.
pub(crate) fn parse_device_flags(flags: &mut FlagSet, text: &str) -> CapsResult<()> {
    let types = parse_object_types(text)?;
    apply_string_flags(flags, OBJECT_TYPE_FLAGS, &types);

    for (type_name, table) in OBJECT_PROP_FLAGS {
        let props = parse_object_props(text, type_name)?;
        apply_string_flags(flags, table, &props);
    }

    reconcile_device_flags(flags);

    Ok(())
}
