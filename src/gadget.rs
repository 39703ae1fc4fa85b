//! The gadget algebra.
//!
//! A closed sum type replaces a class hierarchy: one [`Gadget`] header
//! struct, tagged by [`Variant`], with per-variant behaviour (`validate`,
//! `chain`, `complexity`) implemented as plain functions on the tag
//! rather than virtual dispatch. `issubclass` checks on gadget families
//! (e.g. "is this any arithmetic-load gadget?") become explicit
//! variant-family matches via [`Variant::is_load_family`] and friends.

use std::collections::BTreeSet;

use strum::EnumIter;
use thiserror::Error;

use crate::arch::{Arch, RegisterId};
use crate::payload;

/// The six binary ALU operations the classifier recognises:
/// `Add/Sub/Mul/And/Or/Xor`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    And,
    Or,
    Xor,
}

impl ArithOp {
    pub fn apply(&self, a: u64, b: u64) -> u64 {
        match self {
            ArithOp::Add => a.wrapping_add(b),
            ArithOp::Sub => a.wrapping_sub(b),
            ArithOp::Mul => a.wrapping_mul(b),
            ArithOp::And => a & b,
            ArithOp::Or => a | b,
            ArithOp::Xor => a ^ b,
        }
    }
}

/// The gadget variant tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Variant {
    LoadConst,
    MoveReg,
    LoadMem,
    StoreMem,
    LoadMemJump,
    Jump,
    Arith(ArithOp),
    LoadArith(ArithOp),
    StoreArith(ArithOp),
}

impl Variant {
    /// Any variant that writes a register from a memory load, including
    /// the register-jump-terminated [`Variant::LoadMemJump`].
    pub fn is_load_family(&self) -> bool {
        matches!(self, Variant::LoadMem | Variant::LoadMemJump | Variant::LoadArith(_))
    }

    /// Any variant that writes to memory.
    pub fn is_store_family(&self) -> bool {
        matches!(self, Variant::StoreMem | Variant::StoreArith(_))
    }

    /// Any variant whose output is purely register-to-register ALU.
    pub fn is_register_arith(&self) -> bool {
        matches!(self, Variant::Arith(_))
    }
}

/// Errors raised by [`Gadget::validate`] — a rejected candidate, never
/// surfaced to a user; the caller simply drops the gadget.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GadgetError {
    #[error("negative stack offset")]
    NegativeStackOffset,
    #[error("ip_in_stack_offset exceeds stack_offset")]
    IpOffsetExceedsStack,
    #[error("ip_in_stack_offset missing for non-Jump variant")]
    MissingIpOffset,
    #[error("LoadMem displacement exceeds stack_offset with SP base")]
    LoadPastFrame,
    #[error("output register is reserved (SP, IP, or ignored)")]
    ReservedOutput,
    #[error("LoadMem(SP) would overwrite the chain's own next-address slot")]
    OverwritesOwnLink,
    #[error("clobbers set includes output, IP, SP, or an ignored register")]
    InvalidClobbers,
    #[error("wrong input arity for {0:?}: expected {1}, got {2}")]
    WrongArity(Variant, usize, usize),
    #[error("Jump variant must write IP")]
    JumpMustWriteIp,
    #[error("non-Jump variant must not write IP")]
    NonJumpWritesIp,
}

/// A classified gadget: one reusable instruction-sequence primitive
///.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gadget {
    pub address: u64,
    pub variant: Variant,
    /// Ordered list of register ids read.
    pub inputs: Vec<RegisterId>,
    /// Register id written, or `None` for stores.
    pub output: Option<RegisterId>,
    /// Ordered integer parameters: immediates, memory displacements,
    /// loaded constants.
    pub params: Vec<i64>,
    /// Registers written and discarded.
    pub clobbers: BTreeSet<RegisterId>,
    /// Non-negative bytes SP advances during execution.
    pub stack_offset: u64,
    /// Offset within the post-gadget stack where the next gadget's
    /// address is consumed, or `None` for [`Variant::Jump`].
    pub ip_in_stack_offset: Option<u64>,
}

/// Deduplication identity: `(variant_tag, inputs, output, params,
/// address)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GadgetKey {
    variant: Variant,
    inputs: Vec<RegisterId>,
    output: Option<RegisterId>,
    params: Vec<i64>,
    address: u64,
}

impl Gadget {
    pub fn key(&self) -> GadgetKey {
        GadgetKey {
            variant: self.variant,
            inputs: self.inputs.clone(),
            output: self.output,
            params: self.params.clone(),
            address: self.address,
        }
    }

    /// `stack_offset + |clobbers|`, lower is better.
    pub fn complexity(&self) -> u64 {
        self.stack_offset + self.clobbers.len() as u64
    }

    pub fn clobbers_any_of(&self, registers: &[RegisterId]) -> bool {
        registers.iter().any(|r| self.clobbers.contains(r))
    }

    pub fn uses_any_of(&self, registers: &[RegisterId]) -> bool {
        registers.iter().any(|r| self.inputs.contains(r) || self.output == Some(*r))
    }

    /// Per-variant arity/shape sanity, then the invariants shared by
    /// every variant.
    pub fn validate(&self, arch: &Arch) -> Result<(), GadgetError> {
        self.validate_shape()?;

        if self.variant == Variant::Jump {
            if self.output != Some(arch.ip) {
                return Err(GadgetError::JumpMustWriteIp);
            }
        } else if self.output == Some(arch.ip) {
            return Err(GadgetError::NonJumpWritesIp);
        }

        if self.variant != Variant::Jump {
            let ip_off = self.ip_in_stack_offset.ok_or(GadgetError::MissingIpOffset)?;
            if ip_off > self.stack_offset {
                return Err(GadgetError::IpOffsetExceedsStack);
            }
        }

        if self.variant.is_load_family() {
            let disp = self.params.first().copied().unwrap_or(0);
            let base_is_sp = self.inputs.first() == Some(&arch.sp);
            if base_is_sp && disp >= 0 && (disp as u64) > self.stack_offset {
                return Err(GadgetError::LoadPastFrame);
            }
            if base_is_sp {
                if let Some(ip_off) = self.ip_in_stack_offset {
                    if disp == ip_off as i64 {
                        return Err(GadgetError::OverwritesOwnLink);
                    }
                }
            }
        }

        if let Some(out) = self.output {
            if arch.is_ignored(out) || out == arch.sp || (out == arch.ip && self.variant != Variant::Jump) {
                return Err(GadgetError::ReservedOutput);
            }
        }

        for c in &self.clobbers {
            if Some(*c) == self.output || *c == arch.ip || *c == arch.sp || arch.is_ignored(*c) {
                return Err(GadgetError::InvalidClobbers);
            }
        }

        Ok(())
    }

    fn validate_shape(&self) -> Result<(), GadgetError> {
        let expect = |n: usize| -> Result<(), GadgetError> {
            if self.inputs.len() != n {
                Err(GadgetError::WrongArity(self.variant, n, self.inputs.len()))
            } else {
                Ok(())
            }
        };
        match self.variant {
            Variant::LoadConst => expect(0),
            Variant::MoveReg | Variant::Jump => expect(1),
            Variant::LoadMem => expect(1),
            Variant::LoadMemJump => expect(2),
            Variant::StoreMem => expect(2),
            Variant::Arith(_) => expect(2),
            Variant::LoadArith(_) => expect(2),
            Variant::StoreArith(_) => expect(2),
        }
    }

    /// Emit this gadget's stack-frame fragment: `stack_offset` filler
    /// bytes with the next-gadget-address slot patched in at
    /// `ip_in_stack_offset`, and — for pop-style loads — the argument
    /// `value` patched in at the `params[0]` displacement.
    ///
    /// The caller is responsible for placing this gadget's own address
    /// immediately before this fragment; it is not included here.
    pub fn chain(&self, next: u64, value: Option<i64>, arch: &Arch, filler: u8) -> Vec<u8> {
        let word = arch.word_bytes() as usize;
        let mut buf = vec![filler; self.stack_offset as usize];

        if let Some(off) = self.ip_in_stack_offset {
            place_word(&mut buf, off as usize, next, arch);
        }

        if let Some(v) = value {
            if let Some(&disp) = self.params.first() {
                if disp >= 0 {
                    place_word(&mut buf, disp as usize, v as u64, arch);
                }
            }
        }
        let _ = word;
        buf
    }
}

fn place_word(buf: &mut [u8], offset: usize, value: u64, arch: &Arch) {
    let word = arch.word_bytes() as usize;
    if offset + word > buf.len() {
        return;
    }
    let packed = payload::pack_word(value, arch);
    buf[offset..offset + word].copy_from_slice(&packed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::Arch;

    fn pop_rdi_ret() -> (Gadget, Arch) {
        let arch = Arch::amd64();
        let rdi = arch.register_id("rdi").unwrap();
        let sp = arch.sp;
        let g = Gadget {
            address: 0x1000,
            variant: Variant::LoadMem,
            inputs: vec![sp],
            output: Some(rdi),
            params: vec![0],
            clobbers: BTreeSet::new(),
            stack_offset: 16,
            ip_in_stack_offset: Some(8),
        };
        (g, arch)
    }

    #[test]
    fn pop_ret_validates() {
        let (g, arch) = pop_rdi_ret();
        assert!(g.validate(&arch).is_ok());
        assert_eq!(g.complexity(), 16);
    }

    #[test]
    fn output_sp_is_rejected() {
        let (mut g, arch) = pop_rdi_ret();
        g.output = Some(arch.sp);
        assert_eq!(g.validate(&arch), Err(GadgetError::ReservedOutput));
    }

    #[test]
    fn loadmem_overwriting_own_link_is_rejected() {
        let (mut g, arch) = pop_rdi_ret();
        g.params = vec![8];
        assert_eq!(g.validate(&arch), Err(GadgetError::OverwritesOwnLink));
    }

    #[test]
    fn chain_patches_next_and_value() {
        let (g, arch) = pop_rdi_ret();
        let bytes = g.chain(0x2000, Some(0x4141414141414141), &arch, b'K');
        assert_eq!(bytes.len(), 16);
        assert_eq!(&bytes[0..8], &0x4141414141414141u64.to_le_bytes());
        assert_eq!(&bytes[8..16], &0x2000u64.to_le_bytes());
    }
}
