use std::fmt;

/// Target architectures a `qemu-system-*` binary can emulate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arch {
    Alpha,
    Armv7l,
    Aarch64,
    Cris,
    I686,
    Lm32,
    M68k,
    Microblaze,
    Mips,
    Mipsel,
    Mips64,
    Mips64el,
    Ppc,
    Ppc64,
    S390,
    S390x,
    Sh4,
    Sparc,
    Sparc64,
    Unicore32,
    X86_64,
    Xtensa,
}

impl Arch {
    /// Decodes the architecture names QEMU uses in binary suffixes and
    /// monitor replies. `i386` and `arm` are aliases for the canonical
    /// `i686` and `armv7l` tags.
    pub fn from_qemu_name(name: &str) -> Option<Arch> {
        match name {
            "i386" | "i686" => Some(Arch::I686),
            "arm" | "armv7l" => Some(Arch::Armv7l),
            "alpha" => Some(Arch::Alpha),
            "aarch64" => Some(Arch::Aarch64),
            "cris" => Some(Arch::Cris),
            "lm32" => Some(Arch::Lm32),
            "m68k" => Some(Arch::M68k),
            "microblaze" => Some(Arch::Microblaze),
            "mips" => Some(Arch::Mips),
            "mipsel" => Some(Arch::Mipsel),
            "mips64" => Some(Arch::Mips64),
            "mips64el" => Some(Arch::Mips64el),
            "ppc" => Some(Arch::Ppc),
            "ppc64" => Some(Arch::Ppc64),
            "s390" => Some(Arch::S390),
            "s390x" => Some(Arch::S390x),
            "sh4" => Some(Arch::Sh4),
            "sparc" => Some(Arch::Sparc),
            "sparc64" => Some(Arch::Sparc64),
            "unicore32" => Some(Arch::Unicore32),
            "x86_64" => Some(Arch::X86_64),
            "xtensa" => Some(Arch::Xtensa),
            _ => None,
        }
    }

    /// The name QEMU uses for this architecture in binary suffixes.
    pub fn qemu_name(self) -> &'static str {
        match self {
            Arch::I686 => "i386",
            Arch::Armv7l => "arm",
            other => other.name(),
        }
    }

    /// The canonical architecture tag.
    pub fn name(self) -> &'static str {
        match self {
            Arch::Alpha => "alpha",
            Arch::Armv7l => "armv7l",
            Arch::Aarch64 => "aarch64",
            Arch::Cris => "cris",
            Arch::I686 => "i686",
            Arch::Lm32 => "lm32",
            Arch::M68k => "m68k",
            Arch::Microblaze => "microblaze",
            Arch::Mips => "mips",
            Arch::Mipsel => "mipsel",
            Arch::Mips64 => "mips64",
            Arch::Mips64el => "mips64el",
            Arch::Ppc => "ppc",
            Arch::Ppc64 => "ppc64",
            Arch::S390 => "s390",
            Arch::S390x => "s390x",
            Arch::Sh4 => "sh4",
            Arch::Sparc => "sparc",
            Arch::Sparc64 => "sparc64",
            Arch::Unicore32 => "unicore32",
            Arch::X86_64 => "x86_64",
            Arch::Xtensa => "xtensa",
        }
    }

    /// The architecture of the host this process runs on.
    pub fn host() -> Arch {
        match std::env::consts::ARCH {
            "x86" => Arch::I686,
            "arm" => Arch::Armv7l,
            "aarch64" => Arch::Aarch64,
            "mips" => Arch::Mips,
            "mips64" => Arch::Mips64,
            "powerpc" => Arch::Ppc,
            "powerpc64" => Arch::Ppc64,
            "s390x" => Arch::S390x,
            "sparc64" => Arch::Sparc64,
            _ => Arch::X86_64,
        }
    }

    /// Whether this is one of the PC architectures. PCI-multibus and
    /// `-no-acpi` only apply to these.
    pub fn is_x86(self) -> bool {
        matches!(self, Arch::I686 | Arch::X86_64)
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
