use crate::arch::Arch;
use crate::listing::{cpu_model_parser, parse_machine_listing};
use crate::models::MachineType;

#[test]
fn test_machine_listing_with_alias_and_default() {
    let output = "\
Supported machines are:
pc        Standard PC (alias of pc-1.0)
pc-1.0    Standard PC v1.0 (default)
isapc     ISA-only PC
";
    let machines = parse_machine_listing(output);

    assert_eq!(
        machines,
        vec![
            MachineType::with_alias("pc-1.0", "pc"),
            MachineType::new("isapc"),
        ]
    );
}

#[test]
fn test_machine_listing_rotates_default_to_front() {
    let output = "\
Supported machines are:
prep      PowerPC PREP platform
mac99     Mac99 based PowerMAC
g3beige   Heathrow based PowerMAC (default)
";
    let machines = parse_machine_listing(output);

    assert_eq!(machines[0], MachineType::new("g3beige"));
    // relative order of the others is preserved
    assert_eq!(machines[1], MachineType::new("prep"));
    assert_eq!(machines[2], MachineType::new("mac99"));
}

#[test]
fn test_machine_listing_without_default_keeps_order() {
    let output = "\
Supported machines are:
spike     RISC-V Spike board
virt      generic virtual platform
";
    let machines = parse_machine_listing(output);
    assert_eq!(
        machines,
        vec![MachineType::new("spike"), MachineType::new("virt")]
    );
}

#[test]
fn test_machine_listing_alias_without_canonical_record() {
    // the canonical target never shows up as its own record; the alias
    // record is preserved as parsed
    let output = "pc        Standard PC (alias of pc-0.15)\n";
    let machines = parse_machine_listing(output);
    assert_eq!(machines, vec![MachineType::with_alias("pc-0.15", "pc")]);
}

#[test]
fn test_machine_listing_skips_malformed_lines() {
    let output = "\
Supported machines are:
no-space-line
pc        Standard PC (alias of pc-1.0
isapc     ISA-only PC
";
    // the unterminated alias invalidates that record only
    let machines = parse_machine_listing(output);
    assert_eq!(machines, vec![MachineType::new("isapc")]);
}

#[test]
fn test_machine_aliases_are_a_partial_function() {
    let output = "\
pc-1.2    Standard PC (alias of pc)
pc        Standard PC (default)
isapc     ISA-only PC
";
    let machines = parse_machine_listing(output);

    for (i, machine) in machines.iter().enumerate() {
        if let Some(alias) = &machine.alias {
            // no duplicate aliases, no alias shadowing a canonical name
            assert!(!machines.iter().any(|m| m.name == *alias));
            assert!(!machines[..i].iter().any(|m| m.alias.as_ref() == Some(alias)));
        }
    }
    assert_eq!(machines[0], MachineType::with_alias("pc", "pc-1.2"));
}

#[test]
fn test_x86_model_listing() {
    let output = "\
Available CPU models:
x86       [qemu64]
x86       Opteron_G3
note: some models are marked\n";
    let parse = cpu_model_parser(Arch::X86_64).unwrap();
    assert_eq!(parse(output), vec!["qemu64", "Opteron_G3"]);
}

#[test]
fn test_x86_model_listing_i686() {
    let output = "x86       [coreduo]\n";
    let parse = cpu_model_parser(Arch::I686).unwrap();
    assert_eq!(parse(output), vec!["coreduo"]);
}

#[test]
fn test_ppc64_model_listing() {
    let output = "\
PowerPC 970fx           PVR 003c0301
PowerPC POWER7          PVR 003f0201
garbage line
";
    let parse = cpu_model_parser(Arch::Ppc64).unwrap();
    assert_eq!(parse(output), vec!["970fx", "POWER7"]);
}

#[test]
fn test_unhandled_arch_has_no_model_parser() {
    assert!(cpu_model_parser(Arch::S390x).is_none());
    assert!(cpu_model_parser(Arch::Armv7l).is_none());
}
