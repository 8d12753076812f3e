//! A concrete, minimal x86-64 instruction model.
//!
//! This plays the role of BOLT's `BinaryContext`/`MCInstrAnalysis` plus
//! `MCInst`: the narrow surface the specification calls the
//! "Instruction-builder / MC layer abstraction" (spec §6). The host
//! framework this crate is extracted from ships a far richer version
//! (hundreds of real x86 opcodes, full `MCRegisterInfo`); this one models
//! exactly the opcode classes and register aliasing the loop-fold analysis
//! inspects, named rather than numbered so the core never compares against
//! a bare opcode integer.

use crate::mc::expr::DispExpr;
use crate::mc::regset::RegSet;

/// A register id in the reference register file below.
pub type RegId = u32;

/// General-purpose 64-bit registers, in `RegId` order.
pub const RAX: RegId = 0;
pub const RCX: RegId = 1;
pub const RDX: RegId = 2;
pub const RBX: RegId = 3;
pub const RSP: RegId = 4;
pub const RBP: RegId = 5;
pub const RSI: RegId = 6;
pub const RDI: RegId = 7;
pub const R8: RegId = 8;
pub const R9: RegId = 9;
pub const R10: RegId = 10;
pub const R11: RegId = 11;
pub const R12: RegId = 12;
pub const R13: RegId = 13;
pub const R14: RegId = 14;
pub const R15: RegId = 15;

/// Number of 64-bit GPRs; 32-bit aliases occupy `GPR64_COUNT..2*GPR64_COUNT`,
/// xmm registers start right after.
pub const GPR64_COUNT: RegId = 16;
/// First xmm register id.
pub const XMM0: RegId = 2 * GPR64_COUNT;

/// The 32-bit sub-register alias of a 64-bit GPR (`EAX` for `RAX`, etc).
pub const fn gpr32_alias(gpr64: RegId) -> RegId {
    gpr64 + GPR64_COUNT
}

/// The xmm register with the given index (0..16).
pub const fn xmm(index: RegId) -> RegId {
    XMM0 + index
}

/// Width class of a register, used only to compute aliasing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Width {
    Gpr64,
    Gpr32,
    Xmm,
}

fn width_of(reg: RegId) -> Width {
    if reg < GPR64_COUNT {
        Width::Gpr64
    } else if reg < XMM0 {
        Width::Gpr32
    } else {
        Width::Xmm
    }
}

/// Register aliases of `reg`.
///
/// `only_smaller` mirrors `getAliases(Reg, OnlySmaller=true)`: it returns
/// `reg` together with any strictly-narrower alias (the 32-bit name of a
/// 64-bit GPR), but not a wider superregister. Without it, aliasing is
/// symmetric: a 64-bit GPR and its 32-bit name alias each other both ways.
/// xmm registers have no sub-register aliases in this model.
pub fn aliases(reg: RegId, only_smaller: bool) -> RegSet {
    let mut set = RegSet::single(reg);
    match width_of(reg) {
        Width::Gpr64 => {
            set.insert(gpr32_alias(reg));
        }
        Width::Gpr32 => {
            if !only_smaller {
                set.insert(reg - GPR64_COUNT);
            }
        }
        Width::Xmm => {}
    }
    set
}

/// A raw memory operand as handed back by the evaluator, before it is
/// wrapped into a [`crate::memory_operand::MemoryOperand`] with its opcode
/// tag attached.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryOperandRaw {
    pub base: Option<RegId>,
    pub scale: i64,
    pub index: Option<RegId>,
    pub disp: i64,
    pub seg: Option<RegId>,
    pub disp_expr: Option<DispExpr>,
}

impl MemoryOperandRaw {
    /// A plain `[base + disp]` addressing mode.
    pub fn based(base: RegId, disp: i64) -> Self {
        Self {
            base: Some(base),
            scale: 1,
            index: None,
            disp,
            seg: None,
            disp_expr: None,
        }
    }

    /// A scaled-index addressing mode `[base + index*scale + disp]`.
    pub fn scaled_index(base: RegId, index: RegId, scale: i64, disp: i64) -> Self {
        Self {
            base: Some(base),
            scale,
            index: Some(index),
            disp,
            seg: None,
            disp_expr: None,
        }
    }

    /// The effective displacement: the raw `disp` plus the constant
    /// contribution of `disp_expr`, if any.
    pub fn effective_disp(&self) -> i64 {
        self.disp
            + self
                .disp_expr
                .as_ref()
                .map(DispExpr::constant_contribution)
                .unwrap_or(0)
    }
}

/// One operand of an [`Inst`].
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Reg(RegId),
    Imm(i64),
    Mem(MemoryOperandRaw),
    /// A branch target symbol, compared by name against a block's own
    /// label.
    Symbol(String),
}

impl Operand {
    pub fn as_reg(&self) -> Option<RegId> {
        match self {
            Self::Reg(r) => Some(*r),
            _ => None,
        }
    }

    pub fn as_imm(&self) -> Option<i64> {
        match self {
            Self::Imm(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_mem(&self) -> Option<&MemoryOperandRaw> {
        match self {
            Self::Mem(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_symbol(&self) -> Option<&str> {
        match self {
            Self::Symbol(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

/// The opcode classes the loop-fold analysis distinguishes. Each names the
/// *behavior* the analysis cares about rather than a numeric encoding; the
/// host's real instruction set has many opcodes that map to the same class
/// here (e.g. every scalar-load mnemonic is `MovLoad`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    /// `dst(reg) <- [mem]`
    MovLoad,
    /// `[mem] <- src(reg)`
    MovStore,
    /// Three-operand `dst, src, imm` add-immediate, already in canonical
    /// form (the host's one-operand `ADD64i32`-style encoding is rewritten
    /// to this shape the moment it is seen; see [`Inst::normalize_add_imm`]).
    AddRI,
    /// One-operand add-immediate on an implicit accumulator register,
    /// mirroring `ADD64i32` before normalization.
    AddImmAcc,
    /// Three-operand `dst, src, imm` subtract-immediate.
    SubRI,
    /// Two-operand compare.
    Cmp,
    /// Conditional branch to a symbol.
    Jcc,
    /// Unconditional branch to a symbol.
    Jmp,
    /// Scalar double-precision add, read-modify-write on operand 0
    /// (`addsd xmm, xmm/m64`). Eligible for the swap heuristic.
    AddSd,
    /// Packed doubleword add, read-modify-write on operand 0. Eligible for
    /// the swap heuristic.
    PAddD,
    /// Packed quadword add, read-modify-write on operand 0. Eligible for
    /// the swap heuristic.
    PAddQ,
    /// `xorps dst, src`. When `dst == src` this is the zero idiom, not a
    /// real producer of its operand; otherwise an ordinary read-modify-write
    /// bitwise op.
    Xorps,
    /// A generic read-modify-write ALU op on operand 0, for instructions
    /// the analysis only needs to track as "some computation", such as
    /// `imul`/`add reg, reg`.
    AluRmw,
}

impl Opcode {
    /// Whether this opcode participates in the pairwise-swap heuristic's
    /// fixed opcode set (packed-add variants, scalar double add).
    pub const fn is_swap_heuristic_candidate(self) -> bool {
        matches!(self, Self::AddSd | Self::PAddD | Self::PAddQ)
    }
}

/// A single decoded instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct Inst {
    pub opcode: Opcode,
    pub operands: Vec<Operand>,
}

impl Inst {
    pub fn new(opcode: Opcode, operands: Vec<Operand>) -> Self {
        Self { opcode, operands }
    }

    pub fn mov_load(dst: RegId, mem: MemoryOperandRaw) -> Self {
        Self::new(Opcode::MovLoad, vec![Operand::Reg(dst), Operand::Mem(mem)])
    }

    pub fn mov_store(mem: MemoryOperandRaw, src: RegId) -> Self {
        Self::new(Opcode::MovStore, vec![Operand::Mem(mem), Operand::Reg(src)])
    }

    /// `add dst, src, imm` in already-canonical three-operand form.
    pub fn add_ri(dst: RegId, src: RegId, imm: i64) -> Self {
        Self::new(
            Opcode::AddRI,
            vec![Operand::Reg(dst), Operand::Reg(src), Operand::Imm(imm)],
        )
    }

    /// `sub dst, src, imm` in canonical three-operand form.
    pub fn sub_ri(dst: RegId, src: RegId, imm: i64) -> Self {
        Self::new(
            Opcode::SubRI,
            vec![Operand::Reg(dst), Operand::Reg(src), Operand::Imm(imm)],
        )
    }

    /// The one-operand accumulator-implicit add form (`ADD64i32`-alike):
    /// `add rax, imm`, pre-normalization.
    pub fn add_imm_acc(imm: i64) -> Self {
        Self::new(Opcode::AddImmAcc, vec![Operand::Imm(imm)])
    }

    pub fn cmp(lhs: RegId, rhs: Operand) -> Self {
        Self::new(Opcode::Cmp, vec![Operand::Reg(lhs), rhs])
    }

    pub fn jcc(target: impl Into<String>) -> Self {
        Self::new(Opcode::Jcc, vec![Operand::Symbol(target.into())])
    }

    pub fn jmp(target: impl Into<String>) -> Self {
        Self::new(Opcode::Jmp, vec![Operand::Symbol(target.into())])
    }

    pub fn addsd(dst: RegId, src: Operand) -> Self {
        Self::new(Opcode::AddSd, vec![Operand::Reg(dst), src])
    }

    pub fn paddd(dst: RegId, src: Operand) -> Self {
        Self::new(Opcode::PAddD, vec![Operand::Reg(dst), src])
    }

    pub fn paddq(dst: RegId, src: Operand) -> Self {
        Self::new(Opcode::PAddQ, vec![Operand::Reg(dst), src])
    }

    pub fn xorps(dst: RegId, src: RegId) -> Self {
        Self::new(Opcode::Xorps, vec![Operand::Reg(dst), Operand::Reg(src)])
    }

    /// --- Predicates ---

    pub fn is_branch(&self) -> bool {
        matches!(self.opcode, Opcode::Jcc | Opcode::Jmp)
    }

    pub fn is_compare(&self) -> bool {
        matches!(self.opcode, Opcode::Cmp)
    }

    /// True for the canonical three-operand form *and* the one-operand
    /// accumulator form (the latter only becomes a true `ADD reg, imm` once
    /// normalized; callers that need the canonical shape should normalize
    /// first).
    pub fn is_add_ri(&self) -> bool {
        matches!(self.opcode, Opcode::AddRI | Opcode::AddImmAcc)
    }

    pub fn is_sub_ri(&self) -> bool {
        matches!(self.opcode, Opcode::SubRI)
    }

    pub fn target_symbol(&self) -> Option<&str> {
        self.operands.first().and_then(Operand::as_symbol)
    }

    /// The single memory operand of this instruction, if it has one.
    pub fn memory_operand(&self) -> Option<&MemoryOperandRaw> {
        self.operands.iter().find_map(Operand::as_mem)
    }

    pub fn memory_operand_mut(&mut self) -> Option<&mut MemoryOperandRaw> {
        self.operands.iter_mut().find_map(|o| match o {
            Operand::Mem(m) => Some(m),
            _ => None,
        })
    }

    /// Rewrite a one-operand `ADD64i32`-alike instruction (implicit
    /// accumulator) into the canonical three-operand `dst, src, imm` form
    /// on `accumulator`. No-op, returns `false`, for any other opcode.
    ///
    /// This is the normalization spec §4.2 calls out by name: "a
    /// one-operand `ADD64i32` is rewritten to the three-operand
    /// `ADD64ri32` on `RAX`". We parameterize the accumulator register so
    /// the rewrite isn't hardcoded to a numeric register id.
    pub fn normalize_add_imm(&mut self, accumulator: RegId) -> bool {
        if self.opcode != Opcode::AddImmAcc {
            return false;
        }
        let Some(imm) = self.operands.first().and_then(Operand::as_imm) else {
            return false;
        };
        self.opcode = Opcode::AddRI;
        self.operands = vec![
            Operand::Reg(accumulator),
            Operand::Reg(accumulator),
            Operand::Imm(imm),
        ];
        true
    }

    /// Registers this instruction writes.
    pub fn written_regs(&self) -> RegSet {
        match self.opcode {
            Opcode::MovLoad | Opcode::AddRI | Opcode::SubRI => self
                .operands
                .first()
                .and_then(Operand::as_reg)
                .map(RegSet::single)
                .unwrap_or_default(),
            Opcode::AddImmAcc => RegSet::empty(), // defined only after normalization
            Opcode::MovStore | Opcode::Cmp | Opcode::Jcc | Opcode::Jmp => RegSet::empty(),
            Opcode::AddSd | Opcode::PAddD | Opcode::PAddQ | Opcode::Xorps | Opcode::AluRmw => self
                .operands
                .first()
                .and_then(Operand::as_reg)
                .map(RegSet::single)
                .unwrap_or_default(),
        }
    }

    /// Registers this instruction reads, *excluding* registers only
    /// referenced inside a memory operand's base/index (those are folded
    /// in separately by callers that care, since the def/use chain and the
    /// memory-offset classification treat them differently).
    pub fn source_regs(&self) -> RegSet {
        let mem_regs = self.memory_regs();
        let mut regs = match self.opcode {
            Opcode::MovLoad => RegSet::empty(),
            Opcode::MovStore => self
                .operands
                .get(1)
                .and_then(Operand::as_reg)
                .map(RegSet::single)
                .unwrap_or_default(),
            Opcode::AddRI | Opcode::SubRI => self
                .operands
                .get(1)
                .and_then(Operand::as_reg)
                .map(RegSet::single)
                .unwrap_or_default(),
            Opcode::AddImmAcc => RegSet::empty(),
            Opcode::Cmp => self
                .operands
                .iter()
                .filter_map(Operand::as_reg)
                .collect(),
            Opcode::Jcc | Opcode::Jmp => RegSet::empty(),
            Opcode::AddSd | Opcode::PAddD | Opcode::PAddQ | Opcode::AluRmw => {
                let mut s = self
                    .operands
                    .first()
                    .and_then(Operand::as_reg)
                    .map(RegSet::single)
                    .unwrap_or_default();
                if let Some(r) = self.operands.get(1).and_then(Operand::as_reg) {
                    s.insert(r);
                }
                s
            }
            Opcode::Xorps => self
                .operands
                .get(1)
                .and_then(Operand::as_reg)
                .map(RegSet::single)
                .unwrap_or_default(),
        };
        regs.union_with(mem_regs);
        regs
    }

    /// Base/index registers referenced by this instruction's memory
    /// operand, if any.
    fn memory_regs(&self) -> RegSet {
        let Some(mem) = self.memory_operand() else {
            return RegSet::empty();
        };
        let mut s = RegSet::empty();
        if let Some(b) = mem.base {
            s.insert(b);
        }
        if let Some(i) = mem.index {
            s.insert(i);
        }
        s
    }

    /// The `xorps xmm, xmm` zero idiom: a register xored with itself,
    /// which the specification says is a constant source, not a producer.
    pub fn is_xorps_zero_idiom(&self) -> bool {
        self.opcode == Opcode::Xorps
            && self.operands.first().and_then(Operand::as_reg)
                == self.operands.get(1).and_then(Operand::as_reg)
    }

    /// Fold `delta` into this instruction's displacement, preserving any
    /// symbolic part — the `addToImm` helper from spec §6.
    pub fn add_to_imm(&mut self, delta: i64) {
        if let Some(mem) = self.memory_operand_mut() {
            mem.disp += delta;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alias_32_and_64_bit_overlap() {
        let a = aliases(RAX, false);
        assert!(a.contains(RAX));
        assert!(a.contains(gpr32_alias(RAX)));
    }

    #[test]
    fn only_smaller_excludes_superregister() {
        let a = aliases(gpr32_alias(RAX), true);
        assert!(a.contains(gpr32_alias(RAX)));
        assert!(!a.contains(RAX));
    }

    #[test]
    fn normalize_rewrites_to_three_operand_form() {
        let mut inst = Inst::add_imm_acc(32);
        assert!(inst.normalize_add_imm(RAX));
        assert_eq!(inst.opcode, Opcode::AddRI);
        assert_eq!(inst.operands[2], Operand::Imm(32));
    }

    #[test]
    fn zero_idiom_detected_only_when_same_register() {
        assert!(Inst::xorps(xmm(0), xmm(0)).is_xorps_zero_idiom());
        assert!(!Inst::xorps(xmm(0), xmm(1)).is_xorps_zero_idiom());
    }
}
