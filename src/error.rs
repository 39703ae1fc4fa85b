//! Crate-wide error types
//!
//! Discard-class errors ([`ClassifyError`], [`LiftError`]) never escape
//! as a top-level [`RopError`] — callers log them at debug level and
//! drop the candidate. Only fatal errors become [`RopError`] variants:
//! there is no retry, the whole run aborts.

use thiserror::Error;

use crate::arch::RegisterId;

/// Lifting failure from the external disassembler/lifter. Discard-class:
/// the offending window is silently skipped.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("lifter rejected window at {address:#x}: {reason}")]
pub struct LiftError {
    pub address: u64,
    pub reason: String,
}

/// Failure to emulate a candidate window to completion. Discard-class:
/// that round is abandoned and the candidate dropped.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClassifyError {
    /// An IR statement or expression opcode the evaluator does not
    /// recognise.
    #[error("unsupported IR opcode `{0}` at {1:#x}")]
    UnsupportedIr(String, u64),
    /// Lifting failed outright.
    #[error(transparent)]
    Lift(#[from] LiftError),
    /// The window's stack offset disagreed across validation rounds.
    #[error("stack offset disagreement across rounds at {0:#x}")]
    StackOffsetMismatch(u64),
}

/// Fatal errors raised while compiling a goal list into a payload.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// A named function could not be located in any supplied file.
    #[error("symbol not found: {0}")]
    SymbolNotFound(String),
    /// No load-stack or load-const gadget exists for a required argument
    /// register.
    #[error("no gadget to set register {register} for goal {goal}")]
    NoGadgetForRegister { register: RegisterId, goal: String },
    /// No `(addr-load, val-load, store)` triple exists to write memory.
    #[error("no write-memory strategy available")]
    NoWriteMemoryStrategy,
    /// All shellcode-address fixup strategies failed.
    #[error("no shellcode-address strategy available")]
    NoShellcodeStrategy,
    /// A buffer handed to the single-word writer isn't a word multiple.
    #[error("buffer of length {len} is not a multiple of the {word} byte word size")]
    AlignmentMismatch { len: usize, word: usize },
    /// A goal tag the scheduler does not recognise.
    #[error("unknown goal tag: {0}")]
    UnknownGoal(String),
}

/// Top-level crate error, the only error type that propagates out of the
/// public API and that the CLI binaries print.
#[derive(Debug, Error)]
pub enum RopError {
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("malformed gadget cache: {0}")]
    CacheFormat(String),
    #[error("unknown architecture: {0}")]
    UnknownArch(String),
}
