use crate::device::{
    parse_device_flags, parse_object_props, parse_object_types, reconcile_device_flags,
};
use crate::error::CapsError;
use crate::flags::{CapsFlag, FlagSet};

const DEVICE_DUMP: &str = "\
name \"virtio-scsi-pci\", bus PCI
name \"qxl\", bus PCI, desc \"Spice QXL GPU (secondary)\"
name \"usb-redir\", bus usb-bus
name \"spicevmc\", bus PCI
virtio-blk-pci.ioeventfd=on/off
virtio-blk-pci.bootindex=int32
virtio-blk-pci.scsi=on/off
scsi-disk.wwn=hex64
scsi-disk.channel=uint32
usb-redir.filter=string
PIIX4_PM.disable_s3=uint8
";

#[test]
fn test_parse_object_types() {
    let types = parse_object_types(DEVICE_DUMP).unwrap();
    assert_eq!(types, vec!["virtio-scsi-pci", "qxl", "usb-redir", "spicevmc"]);
}

#[test]
fn test_parse_object_types_missing_quote_is_fatal() {
    let err = parse_object_types("name \"virtio-blk-pci").unwrap_err();
    match err {
        CapsError::DeviceListing(reason) => assert_eq!(reason, "missing quote"),
        other => panic!("expected DeviceListing error, got {other:?}"),
    }
}

#[test]
fn test_parse_object_props() {
    let props = parse_object_props(DEVICE_DUMP, "virtio-blk-pci").unwrap();
    assert_eq!(props, vec!["ioeventfd", "bootindex", "scsi"]);

    let props = parse_object_props(DEVICE_DUMP, "scsi-disk").unwrap();
    assert_eq!(props, vec!["wwn", "channel"]);

    // a type the dump does not mention yields nothing
    let props = parse_object_props(DEVICE_DUMP, "ide-drive").unwrap();
    assert!(props.is_empty());
}

#[test]
fn test_parse_object_props_missing_equals_is_fatal() {
    let err = parse_object_props("scsi-disk.wwn\n", "scsi-disk").unwrap_err();
    match err {
        CapsError::DeviceListing(reason) => assert_eq!(reason, "missing '='"),
        other => panic!("expected DeviceListing error, got {other:?}"),
    }
}

#[test]
fn test_device_dump_sets_flags() {
    let mut flags = FlagSet::new();
    parse_device_flags(&mut flags, DEVICE_DUMP).unwrap();

    for flag in [
        CapsFlag::VirtioScsiPci,
        CapsFlag::DeviceQxl,
        CapsFlag::UsbRedir,
        CapsFlag::DeviceSpicevmc,
        CapsFlag::VirtioIoeventfd,
        CapsFlag::BootIndex,
        CapsFlag::VirtioBlkScsi,
        CapsFlag::ScsiDiskWwn,
        CapsFlag::ScsiDiskChannel,
        CapsFlag::UsbRedirFilter,
        CapsFlag::DisableS3,
    ] {
        assert!(flags.contains(flag), "missing {}", flag.name());
    }
    assert!(!flags.contains(CapsFlag::DisableS4));
}

#[test]
fn test_chardev_spicevmc_wins_over_device() {
    // -chardev spicevmc was already found in the help text
    let mut flags = FlagSet::new();
    flags.set(CapsFlag::ChardevSpicevmc);

    parse_device_flags(&mut flags, DEVICE_DUMP).unwrap();

    assert!(flags.contains(CapsFlag::ChardevSpicevmc));
    assert!(!flags.contains(CapsFlag::DeviceSpicevmc));
}

#[test]
fn test_qxl_device_implies_vga_qxl() {
    let mut flags = FlagSet::new();
    parse_device_flags(&mut flags, DEVICE_DUMP).unwrap();
    assert!(flags.contains(CapsFlag::VgaQxl));
}

#[test]
fn test_reconcile_is_idempotent() {
    let mut flags = FlagSet::new();
    flags.set(CapsFlag::ChardevSpicevmc);
    flags.set(CapsFlag::DeviceSpicevmc);
    flags.set(CapsFlag::DeviceQxl);

    reconcile_device_flags(&mut flags);
    let once = flags.clone();
    reconcile_device_flags(&mut flags);

    assert_eq!(flags, once);
    assert!(!flags.contains(CapsFlag::DeviceSpicevmc));
    assert!(flags.contains(CapsFlag::VgaQxl));
}
