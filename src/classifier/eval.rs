//! Concrete random emulation of one candidate's IR.
//!
//! Inputs are generated lazily on first read by a PRNG seeded
//! deterministically from the candidate's address and round number, then
//! held stable for the round. Writes go to separate output maps so a
//! read of a location never observes that round's own write unless the
//! IR wrote it earlier in program order.

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::arch::{Arch, RegisterId};
use crate::error::ClassifyError;
use crate::ir::{BinOp, Expr, IrBlock, Stmt, TmpId, UnOp};

/// Result of emulating one round: the input/output register and memory
/// maps the candidate-fact enumeration reads.
#[derive(Debug, Clone)]
pub struct RoundState {
    pub input_regs: HashMap<RegisterId, u64>,
    pub output_regs: HashMap<RegisterId, u64>,
    pub input_mem: HashMap<u64, u64>,
    pub output_mem: HashMap<u64, u64>,
    pub sp_input: u64,
}

struct Evaluator<'a> {
    arch: &'a Arch,
    rng: StdRng,
    input_regs: HashMap<RegisterId, u64>,
    output_regs: HashMap<RegisterId, u64>,
    input_mem: HashMap<u64, u64>,
    output_mem: HashMap<u64, u64>,
    tmps: HashMap<TmpId, u64>,
    address: u64,
}

impl<'a> Evaluator<'a> {
    fn new(arch: &'a Arch, seed: u64, address: u64) -> Self {
        Evaluator {
            arch,
            rng: StdRng::seed_from_u64(seed),
            input_regs: HashMap::new(),
            output_regs: HashMap::new(),
            input_mem: HashMap::new(),
            output_mem: HashMap::new(),
            tmps: HashMap::new(),
            address,
        }
    }

    /// A random value in `[0, 2^(word_bits-2))`, aligned to the
    /// architecture's instruction alignment.
    fn random_value(&mut self) -> u64 {
        let bits = self.arch.word_bits - 2;
        let max = if bits >= 64 { u64::MAX } else { (1u64 << bits) - 1 };
        let raw: u64 = self.rng.gen_range(0..=max);
        let align = self.arch.align.max(1) as u64;
        raw - (raw % align)
    }

    fn read_reg(&mut self, reg: RegisterId) -> u64 {
        if let Some(v) = self.output_regs.get(&reg) {
            return *v;
        }
        if let Some(v) = self.input_regs.get(&reg) {
            return *v;
        }
        let v = self.random_value();
        self.input_regs.insert(reg, v);
        v
    }

    fn read_mem(&mut self, addr: u64) -> u64 {
        if let Some(v) = self.output_mem.get(&addr) {
            return *v;
        }
        if let Some(v) = self.input_mem.get(&addr) {
            return *v;
        }
        let v = self.random_value();
        self.input_mem.insert(addr, v);
        v
    }

    fn eval_expr(&mut self, expr: &Expr) -> Result<u64, ClassifyError> {
        match expr {
            Expr::Get(r) => Ok(self.read_reg(*r)),
            Expr::RdTmp(t) => self
                .tmps
                .get(t)
                .copied()
                .ok_or_else(|| ClassifyError::UnsupportedIr(format!("read of uninitialised tmp{t}"), self.address)),
            Expr::Load(addr_expr) => {
                let addr = self.eval_expr(addr_expr)?;
                Ok(self.read_mem(addr))
            }
            Expr::Const(c) => Ok(*c),
            Expr::Unop(op, inner) => {
                let v = self.eval_expr(inner)?;
                Ok(match op {
                    UnOp::Neg => v.wrapping_neg(),
                    UnOp::Not => !v,
                    UnOp::Extend => v,
                })
            }
            Expr::Binop(op, a, b) => {
                let a = self.eval_expr(a)?;
                let b = self.eval_expr(b)?;
                Ok(match op {
                    BinOp::Add => a.wrapping_add(b),
                    BinOp::Sub => a.wrapping_sub(b),
                    BinOp::Mul => a.wrapping_mul(b),
                    BinOp::And => a & b,
                    BinOp::Or => a | b,
                    BinOp::Xor => a ^ b,
                    BinOp::Shl => a.wrapping_shl(b as u32),
                    BinOp::Shr => a.wrapping_shr(b as u32),
                })
            }
            Expr::Unsupported(name) => Err(ClassifyError::UnsupportedIr(name.clone(), self.address)),
        }
    }

    fn step(&mut self, stmt: &Stmt) -> Result<(), ClassifyError> {
        match stmt {
            Stmt::WrTmp { tmp, expr } => {
                let v = self.eval_expr(expr)?;
                self.tmps.insert(*tmp, v);
                Ok(())
            }
            Stmt::Put { reg, expr } => {
                let v = self.eval_expr(expr)?;
                self.output_regs.insert(*reg, v);
                Ok(())
            }
            Stmt::Store { addr, data } => {
                let addr = self.eval_expr(addr)?;
                let v = self.eval_expr(data)?;
                self.output_mem.insert(addr, v);
                Ok(())
            }
            Stmt::IMark { address, .. } => {
                self.address = *address;
                Ok(())
            }
            Stmt::NoOp | Stmt::AbiHint => Ok(()),
            Stmt::Exit { guard, dst } => {
                let taken = match guard {
                    Some(g) => self.eval_expr(g)? != 0,
                    None => true,
                };
                if taken {
                    let v = self.eval_expr(dst)?;
                    self.output_regs.insert(self.arch.ip, v);
                }
                Ok(())
            }
        }
    }
}

/// Emulate one round of `block` with a PRNG seeded from
/// `(address, round)`.
pub fn run_round(block: &IrBlock, arch: &Arch, address: u64, round: usize) -> Result<RoundState, ClassifyError> {
    let seed = address.wrapping_mul(0x9E3779B97F4A7C15).wrapping_add(round as u64);
    let mut ev = Evaluator::new(arch, seed, address);
    for stmt in &block.stmts {
        ev.step(stmt)?;
    }
    let sp_input = ev.read_reg(arch.sp);
    Ok(RoundState {
        input_regs: ev.input_regs,
        output_regs: ev.output_regs,
        input_mem: ev.input_mem,
        output_mem: ev.output_mem,
        sp_input,
    })
}
