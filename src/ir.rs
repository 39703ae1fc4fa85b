//! The external disassembler/lifter contract.
//!
//! ELF parsing, disassembly and IR lifting are explicitly out of scope
//!; this module only defines the shape a lifter must produce so
//! the classifier can emulate it. A real lifter (e.g. a VEX/IR frontend)
//! plugs in by implementing [`Lifter`].

use crate::arch::RegisterId;
use crate::error::LiftError;

/// An opaque IR temporary identifier, scoped to one [`IrBlock`].
pub type TmpId = u32;

/// Unary IR operators the evaluator understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Not,
    /// Zero- or sign-extend to a wider width; the evaluator treats both
    /// uniformly since it only tracks `u64` values.
    Extend,
}

/// Binary IR operators the evaluator understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    And,
    Or,
    Xor,
    Shl,
    Shr,
}

/// An IR expression: `Get`, `RdTmp`, `Load`, `Const`, `Unop`, `Binop`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    /// Read of a machine register.
    Get(RegisterId),
    /// Read of an IR temporary.
    RdTmp(TmpId),
    /// Memory load at the given address expression.
    Load(Box<Expr>),
    /// A literal constant.
    Const(u64),
    Unop(UnOp, Box<Expr>),
    Binop(BinOp, Box<Expr>, Box<Expr>),
    /// A node the lifter could not normalise into the above — e.g. SIMD,
    /// floating point, or architecture-specific state the translator
    /// from the real disassembler's IR doesn't model. Evaluating this
    /// abandons the round.
    Unsupported(String),
}

/// An IR statement: `WrTmp`, `Put`, `Store`, `IMark`, `NoOp`, `AbiHint`,
/// `Exit`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stmt {
    /// Write an expression's value into a temporary.
    WrTmp { tmp: TmpId, expr: Expr },
    /// Write an expression's value into a machine register.
    Put { reg: RegisterId, expr: Expr },
    /// Store an expression's value into memory at an address expression.
    Store { addr: Expr, data: Expr },
    /// Instruction boundary marker; carries the address and length of one
    /// lifted machine instruction.
    IMark { address: u64, length: u32 },
    /// No-op, e.g. lifted from a `nop` or unmodeled side-effect-free
    /// instruction.
    NoOp,
    /// ABI hint (e.g. a stack-redzone annotation); carries no semantics
    /// the evaluator needs to act on.
    AbiHint,
    /// A (possibly conditional) control-flow exit.
    Exit { guard: Option<Expr>, dst: Expr },
}

/// A lifted sequence of IR statements for one candidate byte window.
#[derive(Debug, Clone, Default)]
pub struct IrBlock {
    pub stmts: Vec<Stmt>,
}

/// External collaborator: lifts raw bytes at a load address into IR.
/// Internals (disassembly, IR construction) are out of scope; only the
/// contract is specified here.
pub trait Lifter {
    fn lift(&self, bytes: &[u8], address: u64, arch_name: &str) -> Result<IrBlock, LiftError>;
}

/// A lifter that rejects every window. Wiring a real disassembler/IR
/// frontend in is outside this crate's scope; this stands in so the
/// pipeline still type-checks and runs end to end (classifying nothing)
/// until one is substituted, the same role [`crate::validator::NullSolver`]
/// plays for the solver boundary.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullLifter;

impl Lifter for NullLifter {
    fn lift(&self, _bytes: &[u8], address: u64, _arch_name: &str) -> Result<IrBlock, LiftError> {
        Err(LiftError { address, reason: "no lifter configured".into() })
    }
}
