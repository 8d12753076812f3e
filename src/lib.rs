//! Post-link loop-folding and loop-unrolling analysis for x86-64 binaries.
//!
//! Two related passes live here:
//!
//! - **Loop fold** ([`rewriter::fold_loop`]): detects a fully unrolled
//!   single-block loop — the compiler already peeled every iteration into
//!   straight-line code — and collapses it back into one iteration plus a
//!   branch, shrinking code size with no change in behavior.
//! - **Loop unroll** ([`unroll::unroll_loop`]): the inverse transform for
//!   loops with a small, statically-known trip count.
//!
//! Both are built on the same three-stage pipeline: [`induction`] recovers
//! the register that drives the loop and its per-iteration step,
//! [`grouping`] partitions the body into equally-shaped repetitions (fold
//! only), and the pass-specific entry point assembles the rewritten body
//! or reports a [`error::RejectionReason`] explaining why it left the loop
//! alone.
//!
//! Everything below is written against the narrow machine-code interface
//! in [`mc`] rather than against a numeric opcode encoding — no opcode
//! number or hardcoded register id appears outside that module.

pub mod config;
pub mod error;
pub mod grouping;
pub mod induction;
pub mod mc;
pub mod memory_operand;
pub mod profile;
pub mod rewriter;
pub mod unroll;

pub mod prelude {
    pub use crate::config::PassConfig;
    pub use crate::error::{RejectionBucket, RejectionReason};
    pub use crate::induction::{BinaryLoop, Candidate};
    pub use crate::mc::{DispExpr, Inst, MemoryOperandRaw, Opcode, Operand, RegId, RegSet};
    pub use crate::memory_operand::MemoryOperand;
    pub use crate::profile::{LoopLocation, LoopProfiler, Temperature};
    pub use crate::rewriter::{fold_loop, FoldedLoop};
    pub use crate::unroll::{choose_unroll_factor, unroll_loop, UnrolledLoop};
}
