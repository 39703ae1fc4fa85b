//! Payload emitter: pack a 64-bit value into a word of
//! `arch.word_bits / 8` bytes in the architecture's endianness, with
//! two's-complement wraparound for negative values.

use crate::arch::{Arch, Endianness};

/// Pack `value` into a `word_bytes`-byte little/big-endian word.
pub fn pack_word(value: u64, arch: &Arch) -> Vec<u8> {
    let word = arch.word_bytes() as usize;
    let full = match arch.endianness {
        Endianness::Little => value.to_le_bytes(),
        Endianness::Big => value.to_be_bytes(),
    };
    match arch.endianness {
        Endianness::Little => full[..word].to_vec(),
        Endianness::Big => full[8 - word..].to_vec(),
    }
}

/// Pack a signed value, interpreting it as two's-complement.
pub fn pack_signed(value: i64, arch: &Arch) -> Vec<u8> {
    pack_word(value as u64, arch)
}

/// Inverse of [`pack_word`]: recover the integer whose packed
/// representation is `bytes` (a `word_bytes`-long slice), used by the
/// scheduler's write-memory chain to turn raw target bytes into the
/// constant a `StoreMem` gadget's value register must carry.
pub fn unpack_word(bytes: &[u8], arch: &Arch) -> u64 {
    let word = arch.word_bytes() as usize;
    let mut full = [0u8; 8];
    match arch.endianness {
        Endianness::Little => full[..word.min(8)].copy_from_slice(&bytes[..word.min(8)]),
        Endianness::Big => full[8 - word.min(8)..].copy_from_slice(&bytes[..word.min(8)]),
    }
    match arch.endianness {
        Endianness::Little => u64::from_le_bytes(full),
        Endianness::Big => u64::from_be_bytes(full),
    }
}
