//! Architecture descriptors
//!
//! An [`Arch`] is an immutable value table: word size, alignment, register
//! naming, the stack/instruction pointer ids, the ignored-register set,
//! endianness and the calling-convention register order. Nothing here
//! mutates once built; the classifier and scheduler only ever read through
//! a `&Arch`.

use std::collections::{BTreeSet, HashMap};

/// Opaque machine register identifier, unique within a single [`Arch`].
pub type RegisterId = u32;

/// Byte order used when packing words into a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endianness {
    Little,
    Big,
}

/// A named register: its id and width in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterInfo {
    pub id: RegisterId,
    pub size: u8,
}

/// Immutable architecture descriptor.
#[derive(Debug, Clone)]
pub struct Arch {
    pub name: &'static str,
    pub word_bits: u32,
    pub align: u32,
    registers: HashMap<&'static str, RegisterInfo>,
    names_by_id: HashMap<RegisterId, &'static str>,
    pub sp: RegisterId,
    pub ip: RegisterId,
    pub lr: Option<RegisterId>,
    pub ignored: BTreeSet<RegisterId>,
    pub endianness: Endianness,
    pub calling_convention: Vec<RegisterId>,
}

impl Arch {
    /// Word size in bytes.
    pub const fn word_bytes(&self) -> u32 {
        self.word_bits / 8
    }

    /// Maximum candidate window size in bytes to sweep for this
    /// architecture: 10 for x86/x64, 20 for RISC architectures.
    pub const fn max_gadget_size(&self) -> usize {
        match self.word_bits {
            32 | 64 if self.align == 1 => 10,
            _ => 20,
        }
    }

    pub fn register_id(&self, name: &str) -> Option<RegisterId> {
        self.registers.get(name).map(|r| r.id)
    }

    pub fn register_info(&self, name: &str) -> Option<RegisterInfo> {
        self.registers.get(name).copied()
    }

    pub fn register_name(&self, id: RegisterId) -> Option<&'static str> {
        self.names_by_id.get(&id).copied()
    }

    pub fn is_ignored(&self, id: RegisterId) -> bool {
        self.ignored.contains(&id)
    }

    /// Every register id this architecture names, in no particular
    /// order — used by the scheduler's write-memory-triple and
    /// read-add-jump searches, which must range over register pairs.
    pub fn all_register_ids(&self) -> Vec<RegisterId> {
        self.names_by_id.keys().copied().collect()
    }

    fn build(
        name: &'static str,
        word_bits: u32,
        align: u32,
        regs: &[(&'static str, RegisterId, u8)],
        sp: &'static str,
        ip: &'static str,
        lr: Option<&'static str>,
        ignored: &[&'static str],
        endianness: Endianness,
        calling_convention: &[&'static str],
    ) -> Self {
        let mut registers = HashMap::new();
        let mut names_by_id = HashMap::new();
        for (rname, id, size) in regs {
            registers.insert(*rname, RegisterInfo { id: *id, size: *size });
            names_by_id.insert(*id, *rname);
        }
        let lookup = |n: &str| registers.get(n).unwrap_or_else(|| panic!("unknown register {n} in arch {name}")).id;
        let ignored = ignored.iter().map(|n| lookup(n)).collect();
        let calling_convention = calling_convention.iter().map(|n| lookup(n)).collect();
        Arch {
            name,
            word_bits,
            align,
            sp: lookup(sp),
            ip: lookup(ip),
            lr: lr.map(lookup),
            ignored,
            endianness,
            calling_convention,
            registers,
            names_by_id,
        }
    }

    /// 32-bit x86.
    pub fn x86() -> Self {
        Self::build(
            "x86",
            32,
            1,
            &[
                ("eax", 0, 4),
                ("ecx", 1, 4),
                ("edx", 2, 4),
                ("ebx", 3, 4),
                ("esp", 4, 4),
                ("ebp", 5, 4),
                ("esi", 6, 4),
                ("edi", 7, 4),
                ("eip", 8, 4),
                ("eflags", 9, 4),
            ],
            "esp",
            "eip",
            None,
            &["eflags"],
            Endianness::Little,
            &["ecx", "edx"],
        )
    }

    /// 64-bit amd64 / x86-64.
    pub fn amd64() -> Self {
        Self::build(
            "AMD64",
            64,
            1,
            &[
                ("rax", 0, 8),
                ("rcx", 1, 8),
                ("rdx", 2, 8),
                ("rbx", 3, 8),
                ("rsp", 4, 8),
                ("rbp", 5, 8),
                ("rsi", 6, 8),
                ("rdi", 7, 8),
                ("r8", 8, 8),
                ("r9", 9, 8),
                ("r10", 10, 8),
                ("r11", 11, 8),
                ("r12", 12, 8),
                ("r13", 13, 8),
                ("r14", 14, 8),
                ("r15", 15, 8),
                ("rip", 16, 8),
                ("rflags", 17, 8),
            ],
            "rsp",
            "rip",
            None,
            &["rflags"],
            Endianness::Little,
            &["rdi", "rsi", "rdx", "rcx", "r8", "r9"],
        )
    }

    /// 32-bit little-endian ARM (A32).
    pub fn arm() -> Self {
        Self::build(
            "ARM",
            32,
            4,
            &[
                ("r0", 0, 4),
                ("r1", 1, 4),
                ("r2", 2, 4),
                ("r3", 3, 4),
                ("r4", 4, 4),
                ("r5", 5, 4),
                ("r6", 6, 4),
                ("r7", 7, 4),
                ("r8", 8, 4),
                ("r9", 9, 4),
                ("r10", 10, 4),
                ("r11", 11, 4),
                ("r12", 12, 4),
                ("sp", 13, 4),
                ("lr", 14, 4),
                ("pc", 15, 4),
                ("cpsr", 16, 4),
            ],
            "sp",
            "pc",
            Some("lr"),
            &["cpsr"],
            Endianness::Little,
            &["r0", "r1", "r2", "r3"],
        )
    }

    /// Thumb-mode ARM: same registers, 2-byte instruction alignment.
    pub fn arm_thumb() -> Self {
        let mut a = Self::arm();
        a.name = "ARMTHUMB";
        a.align = 2;
        a
    }

    /// 32-bit big-endian MIPS.
    pub fn mips() -> Self {
        Self::build(
            "MIPS",
            32,
            4,
            &[
                ("zero", 0, 4),
                ("at", 1, 4),
                ("v0", 2, 4),
                ("v1", 3, 4),
                ("a0", 4, 4),
                ("a1", 5, 4),
                ("a2", 6, 4),
                ("a3", 7, 4),
                ("t9", 25, 4),
                ("sp", 29, 4),
                ("ra", 31, 4),
                ("pc", 32, 4),
            ],
            "sp",
            "pc",
            Some("ra"),
            &["zero"],
            Endianness::Big,
            &["a0", "a1", "a2", "a3"],
        )
    }

    /// 64-bit big-endian MIPS.
    pub fn mips64() -> Self {
        let mut a = Self::mips();
        a.name = "MIPS64";
        a.word_bits = 64;
        a
    }

    /// 32-bit big-endian PowerPC.
    pub fn ppc() -> Self {
        Self::build(
            "PPC",
            32,
            4,
            &[
                ("r0", 0, 4),
                ("r1", 1, 4),
                ("r2", 2, 4),
                ("r3", 3, 4),
                ("r4", 4, 4),
                ("r5", 5, 4),
                ("lr", 32, 4),
                ("pc", 33, 4),
                ("cr", 34, 4),
                ("xer", 35, 4),
            ],
            "r1",
            "pc",
            Some("lr"),
            &["cr", "xer"],
            Endianness::Big,
            &["r3", "r4", "r5"],
        )
    }

    /// Look up an architecture by name, e.g. from the CLI's `-arch` flag.
    pub fn by_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "X86" => Some(Self::x86()),
            "AMD64" | "X86_64" | "X64" => Some(Self::amd64()),
            "ARM" => Some(Self::arm()),
            "ARMTHUMB" | "ARM_THUMB" => Some(Self::arm_thumb()),
            "MIPS" => Some(Self::mips()),
            "MIPS64" => Some(Self::mips64()),
            "PPC" | "POWERPC" => Some(Self::ppc()),
            _ => None,
        }
    }
}
