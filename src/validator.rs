//! Optional SMT validator.
//!
//! Used only to cross-check the probabilistic classifier, never to
//! discover gadgets. IR statements are translated into bit-vector
//! assignments (SSA: every write introduces a new name) and memory into
//! an array-of-bytes; the solver is asked whether the negation of the
//! classified relation is satisfiable. `unsat` proves the classification;
//! any IR node the translator can't model makes the validator abstain —
//! never a false positive.

use std::collections::HashMap;
use std::fmt::Write as _;

use crate::arch::Arch;
use crate::gadget::{ArithOp, Gadget, Variant};
use crate::ir::{BinOp, Expr, IrBlock, Stmt, UnOp};

/// The solver's answer to "is `¬constraint` satisfiable?".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The negation is unsatisfiable: the classification is proven.
    Valid,
    /// The negation is satisfiable: the classification is falsified.
    Falsified,
    /// The translator or solver could not decide.
    Unknown,
}

/// A translated bit-vector/array constraint, opaque to this crate —
/// the external solver's query language owns its concrete shape.
#[derive(Debug, Clone)]
pub struct Constraint {
    /// A human-readable SMT-LIB-ish rendering, useful for logging and
    /// for solvers that accept a textual query.
    pub rendering: String,
}

/// External collaborator: bit-vector/array theories with check-sat and
/// model extraction. Internals out of scope; only the contract is
/// specified.
pub trait SmtSolver {
    fn check_unsat(&self, constraint: &Constraint) -> Verdict;
}

/// A solver that never runs — used when no real SMT backend is wired
/// in. Always abstains, matching "never a false positive".
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSolver;

impl SmtSolver for NullSolver {
    fn check_unsat(&self, _constraint: &Constraint) -> Verdict {
        Verdict::Unknown
    }
}

struct Translator {
    out: String,
    next_ssa: u32,
    ok: bool,
    /// Latest SSA name each register was last written under, for
    /// referencing a gadget's final value in its claimed relation.
    reg_after: HashMap<u32, String>,
    /// Latest SSA name memory was last written under, if any store
    /// occurred.
    mem_after: Option<String>,
}

impl Translator {
    fn new() -> Self {
        Translator { out: String::new(), next_ssa: 0, ok: true, reg_after: HashMap::new(), mem_after: None }
    }

    fn fresh(&mut self, prefix: &str) -> String {
        let n = self.next_ssa;
        self.next_ssa += 1;
        format!("{prefix}_{n}")
    }

    fn translate_expr(&mut self, e: &Expr) -> String {
        match e {
            Expr::Get(r) => format!("reg{r}_before"),
            Expr::RdTmp(t) => format!("tmp{t}"),
            Expr::Load(addr) => {
                let a = self.translate_expr(addr);
                format!("(select mem_before {a})")
            }
            Expr::Const(c) => format!("(_ bv{c} 64)"),
            Expr::Unop(op, inner) => {
                let v = self.translate_expr(inner);
                match op {
                    UnOp::Neg => format!("(bvneg {v})"),
                    UnOp::Not => format!("(bvnot {v})"),
                    UnOp::Extend => v,
                }
            }
            Expr::Binop(op, a, b) => {
                let a = self.translate_expr(a);
                let b = self.translate_expr(b);
                let opname = match op {
                    BinOp::Add => "bvadd",
                    BinOp::Sub => "bvsub",
                    BinOp::Mul => "bvmul",
                    BinOp::And => "bvand",
                    BinOp::Or => "bvor",
                    BinOp::Xor => "bvxor",
                    BinOp::Shl => "bvshl",
                    BinOp::Shr => "bvlshr",
                };
                format!("({opname} {a} {b})")
            }
            Expr::Unsupported(_) => {
                self.ok = false;
                "unsupported".to_string()
            }
        }
    }

    fn translate_stmt(&mut self, s: &Stmt) {
        if !self.ok {
            return;
        }
        match s {
            Stmt::WrTmp { tmp, expr } => {
                let v = self.translate_expr(expr);
                let _ = writeln!(self.out, "(assert (= tmp{tmp} {v}))");
            }
            Stmt::Put { reg, expr } => {
                let v = self.translate_expr(expr);
                let name = self.fresh(&format!("reg{reg}_after"));
                let _ = writeln!(self.out, "(assert (= {name} {v}))");
                self.reg_after.insert(*reg, name);
            }
            Stmt::Store { addr, data } => {
                let a = self.translate_expr(addr);
                let d = self.translate_expr(data);
                let name = self.fresh("mem_after");
                let _ = writeln!(self.out, "(assert (= {name} (store mem_before {a} {d})))");
                self.mem_after = Some(name);
            }
            Stmt::IMark { .. } | Stmt::NoOp | Stmt::AbiHint => {}
            Stmt::Exit { guard, dst } => {
                if let Some(g) = guard {
                    self.translate_expr(g);
                }
                self.translate_expr(dst);
            }
        }
    }
}

fn arith_smt_op(op: ArithOp) -> &'static str {
    match op {
        ArithOp::Add => "bvadd",
        ArithOp::Sub => "bvsub",
        ArithOp::Mul => "bvmul",
        ArithOp::And => "bvand",
        ArithOp::Or => "bvor",
        ArithOp::Xor => "bvxor",
    }
}

fn bv(v: i64) -> String {
    format!("(_ bv{} 64)", v as u64)
}

/// Build the SMT formula for the relation `gadget` claims to implement,
/// in terms of the translated block's before/after SSA names. `None` if
/// the gadget's shape doesn't carry enough fields to state the claim
/// (shouldn't happen for a gadget that already passed
/// [`Gadget::validate`]).
fn claim_formula(t: &Translator, gadget: &Gadget, arch: &Arch) -> Option<String> {
    let reg_before = |r: u32| format!("reg{r}_before");
    let reg_final = |r: u32| t.reg_after.get(&r).cloned().unwrap_or_else(|| reg_before(r));
    let mem_final = || t.mem_after.clone().unwrap_or_else(|| "mem_before".to_string());

    match gadget.variant {
        Variant::LoadConst => {
            let out = gadget.output?;
            let c = *gadget.params.first()?;
            Some(format!("(= {} {})", reg_final(out), bv(c)))
        }
        Variant::MoveReg => {
            let out = gadget.output?;
            let inp = *gadget.inputs.first()?;
            Some(format!("(= {} {})", reg_final(out), reg_before(inp)))
        }
        Variant::Jump => {
            let out = gadget.output?;
            let inp = *gadget.inputs.first()?;
            let delta = gadget.params.first().copied().unwrap_or(0);
            Some(format!("(= {} (bvadd {} {}))", reg_final(out), reg_before(inp), bv(delta)))
        }
        Variant::LoadMem => {
            let out = gadget.output?;
            let base = *gadget.inputs.first()?;
            let disp = gadget.params.first().copied().unwrap_or(0);
            Some(format!("(= {} (select mem_before (bvadd {} {})))", reg_final(out), reg_before(base), bv(disp)))
        }
        Variant::LoadMemJump => {
            let out = gadget.output?;
            let base = *gadget.inputs.first()?;
            let jump_reg = *gadget.inputs.get(1)?;
            let disp = gadget.params.first().copied().unwrap_or(0);
            let load = format!("(= {} (select mem_before (bvadd {} {})))", reg_final(out), reg_before(base), bv(disp));
            let jump = format!("(= {} {})", reg_final(arch.ip), reg_before(jump_reg));
            Some(format!("(and {load} {jump})"))
        }
        Variant::StoreMem => {
            let base = *gadget.inputs.first()?;
            let val = *gadget.inputs.get(1)?;
            let disp = gadget.params.first().copied().unwrap_or(0);
            let addr = format!("(bvadd {} {})", reg_before(base), bv(disp));
            Some(format!("(= (select {} {}) {})", mem_final(), addr, reg_before(val)))
        }
        Variant::Arith(op) => {
            let out = gadget.output?;
            let a = *gadget.inputs.first()?;
            let b = *gadget.inputs.get(1)?;
            Some(format!("(= {} ({} {} {}))", reg_final(out), arith_smt_op(op), reg_before(a), reg_before(b)))
        }
        Variant::LoadArith(op) => {
            let out = gadget.output?;
            let acc = *gadget.inputs.first()?;
            let base = *gadget.inputs.get(1)?;
            let disp = gadget.params.first().copied().unwrap_or(0);
            let load = format!("(select mem_before (bvadd {} {}))", reg_before(base), bv(disp));
            Some(format!("(= {} ({} {} {}))", reg_final(out), arith_smt_op(op), reg_before(acc), load))
        }
        Variant::StoreArith(op) => {
            let base = *gadget.inputs.first()?;
            let val = *gadget.inputs.get(1)?;
            let disp = gadget.params.first().copied().unwrap_or(0);
            let addr = format!("(bvadd {} {})", reg_before(base), bv(disp));
            let old = format!("(select mem_before {addr})");
            Some(format!("(= (select {} {}) ({} {} {}))", mem_final(), addr, arith_smt_op(op), old, reg_before(val)))
        }
    }
}

/// Translate `block`'s semantics, assert `gadget`'s claimed relation
/// negated, and ask whether that negation is satisfiable. `unsat` proves
/// the classification; abstains (`Unknown`) on any unmodeled IR node or
/// a gadget shape the claim can't be stated for.
pub fn validate(gadget: &Gadget, block: &IrBlock, arch: &Arch, solver: &dyn SmtSolver) -> Verdict {
    let mut t = Translator::new();
    for stmt in &block.stmts {
        t.translate_stmt(stmt);
        if !t.ok {
            return Verdict::Unknown;
        }
    }
    let claim = match claim_formula(&t, gadget, arch) {
        Some(c) => c,
        None => return Verdict::Unknown,
    };
    let rendering = format!(
        "; classified as {:?} inputs={:?} output={:?} params={:?}\n{}(assert (not {}))\n",
        gadget.variant, gadget.inputs, gadget.output, gadget.params, t.out, claim
    );
    solver.check_unsat(&Constraint { rendering })
}
