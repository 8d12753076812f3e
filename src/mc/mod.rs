//! The machine-code abstraction layer.
//!
//! This is the boundary named in spec §6: a narrow, host-supplied
//! "instruction-builder abstraction" that the rest of the crate is written
//! against instead of against numeric opcodes or a hardcoded register
//! layout. [`x86`] is the one concrete implementation shipped with this
//! crate; a real deployment would swap it for whatever `BinaryContext`
//! equivalent the host already has.

pub mod expr;
pub mod regset;
pub mod x86;

pub use expr::DispExpr;
pub use regset::RegSet;
pub use x86::{Inst, MemoryOperandRaw, Opcode, Operand, RegId};
