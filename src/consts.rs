//! Tunable constants
//!
//! Every magic number used by more than one module lives here with a
//! doc comment explaining why it has the value it does, rather than
//! being inlined at each call site.

/// Number of independent random-emulation rounds the classifier runs
/// before accepting a candidate's classification.
pub const NUM_VALIDATIONS: usize = 5;

/// Number of low bits masked off a shellcode address to find its
/// containing page, for `mprotect`/`syscall` shellcode-address fixups.
pub const PAGE_MASK: u64 = !0xFFFu64;

/// Page size assumed for `mprotect`/`syscall` shellcode-address fixups.
pub const PAGE_SIZE: u64 = 0x1000;

/// `PROT_READ | PROT_WRITE | PROT_EXEC`, passed to `mprotect`.
pub const PROT_RWX: i64 = 7;

/// Default filler byte used for chain padding (`'K'`, ASCII `0x4B`) when
/// no constraint on the byte value applies.
pub const FILLER_BYTE: u8 = b'K';

/// Filler byte used when padding shellcode buffers, which must not
/// introduce stray non-zero bytes into the written region.
pub const SHELLCODE_FILLER_BYTE: u8 = 0x00;

/// Largest `address - register_value` displacement the classifier will
/// accept as "this register plausibly formed the base" for a memory
/// access; without a bound, any random register trivially "explains"
/// any address via an enormous coincidental displacement.
pub const MAX_DISPLACEMENT: u64 = 0x1_0000;

/// Stack-frame traffic tolerance: a memory access within this many bytes
/// of the input `SP` is accepted as ordinary stack read/write noise
/// rather than rejected as an unexplained side effect.
pub const STACK_FRAME_RANGE: u64 = 4096;

/// `mprotect` syscall numbers, keyed by architecture name, used by the
/// `syscall`-based shellcode-address fixup when `mprotect` isn't
/// directly exported.
pub fn mprotect_syscall_number(arch_name: &str) -> Option<i64> {
    match arch_name {
        "AMD64" => Some(10),
        "x86" => Some(125),
        "ARM" => Some(125),
        "ARMTHUMB" => Some(125),
        "MIPS" => Some(4125),
        "MIPS64" => Some(5010),
        "PPC" => Some(125),
        _ => None,
    }
}

/// Probe list of commonly-imported libc functions used by the
/// read-add-jump shellcode-address fallback strategy.
pub const SHELLCODE_PROBE_FUNCTIONS: &[&str] = &["printf", "puts", "read", "open", "close", "exit"];
