//! The external binary-reader contract.
//!
//! ELF/PE parsing and symbol-table resolution are out of scope; this
//! module only defines the shape the Finder and Scheduler read through.
//! The writable-region query is kept separate from segment flags as
//! [`BinaryReader::writable_region`], since the allocator's input region
//! need not coincide with any one loaded segment.

/// One loaded segment: its bytes, its load address, and whether it is
/// executable/writable.
#[derive(Debug, Clone)]
pub struct Segment {
    pub bytes: Vec<u8>,
    pub address: u64,
    pub executable: bool,
    pub writable: bool,
}

/// The writable region the scheduler's bump allocator draws from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WritableRegion {
    pub address: u64,
    pub size: u64,
}

/// External collaborator: enumerates segments, resolves symbols,
/// reports PIE-ness, and answers GOT/libc-offset queries used by the
/// shellcode-address read-add-jump fallback.
pub trait BinaryReader {
    /// Human-readable name, used in `SymbolNotFound` messages.
    fn name(&self) -> &str;

    /// All segments worth sweeping for gadgets.
    fn segments(&self) -> &[Segment];

    /// The writable region the allocator should draw from.
    fn writable_region(&self) -> WritableRegion;

    /// Resolve a symbol's address from the static symbol table, the
    /// dynamic symbol table, or the dynamic segment, in that order.
    fn resolve_symbol(&self, name: &str) -> Option<u64>;

    /// Whether the binary carries a dynamic segment (PIE / shared
    /// object), meaning its addresses need an external load base to be
    /// absolute.
    fn is_pie(&self) -> bool;

    /// The configured load base for this binary, or `0` if none was
    /// supplied.
    fn base_address(&self) -> u64;

    /// The binary's physical (on-disk / default-link) base address.
    fn physical_base_address(&self) -> u64;

    /// GOT entry address for an imported function, if present.
    fn got_entry(&self, function: &str) -> Option<u64>;

    /// Byte offset from `from` to `to` within the libc this binary was
    /// linked against, if both are resolvable.
    fn libc_offset(&self, from: &str, to: &str) -> Option<i64>;

    /// Whether to warn that both the configured base address and the
    /// segment's physical address are zero — a strong hint that
    /// addresses produced downstream will be meaningless.
    fn needs_base_address_warning(&self) -> bool {
        self.base_address() == 0 && self.physical_base_address() == 0 && self.is_pie()
    }
}

/// A minimal in-memory [`BinaryReader`] used by tests and by callers who
/// have already parsed segments/symbols through their own tooling.
#[derive(Debug, Clone, Default)]
pub struct StaticBinary {
    pub name: String,
    pub segments: Vec<Segment>,
    pub writable: WritableRegion,
    pub symbols: std::collections::HashMap<String, u64>,
    pub pie: bool,
    pub base: u64,
    pub physical_base: u64,
    pub got: std::collections::HashMap<String, u64>,
    pub libc_offsets: std::collections::HashMap<(String, String), i64>,
}

impl BinaryReader for StaticBinary {
    fn name(&self) -> &str {
        &self.name
    }

    fn segments(&self) -> &[Segment] {
        &self.segments
    }

    fn writable_region(&self) -> WritableRegion {
        self.writable
    }

    fn resolve_symbol(&self, name: &str) -> Option<u64> {
        self.symbols.get(name).copied()
    }

    fn is_pie(&self) -> bool {
        self.pie
    }

    fn base_address(&self) -> u64 {
        self.base
    }

    fn physical_base_address(&self) -> u64 {
        self.physical_base
    }

    fn got_entry(&self, function: &str) -> Option<u64> {
        self.got.get(function).copied()
    }

    fn libc_offset(&self, from: &str, to: &str) -> Option<i64> {
        self.libc_offsets.get(&(from.to_string(), to.to_string())).copied()
    }
}
