//! M: the memory-operand model.
//!
//! Wraps the raw addressing-mode fields the MC layer hands back together
//! with the opcode that referenced them, and implements the comparisons the
//! induction analyzer and grouping engine run over memory accesses.

use crate::mc::{DispExpr, Inst, MemoryOperandRaw, Opcode, RegId};

/// Which addressing-mode slot a register occupies within a memory operand.
/// `getLoopUnrollFactor`'s "same position as the first seed operand" check
/// (spec §4.2) needs this to tell `[reg + disp]` apart from `[other + reg*s]`
/// — both address the register, but only one of them is the same pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegPosition {
    Base,
    Index,
}

/// A memory operand tagged with the opcode of the instruction that
/// referenced it.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryOperand {
    pub base: Option<RegId>,
    pub scale: i64,
    pub index: Option<RegId>,
    pub disp: i64,
    pub seg: Option<RegId>,
    pub disp_expr: Option<DispExpr>,
    pub opcode: Opcode,
}

impl MemoryOperand {
    /// Build a [`MemoryOperand`] from an instruction's raw memory operand,
    /// if it has one.
    pub fn from_instruction(inst: &Inst) -> Option<Self> {
        let mem = inst.memory_operand()?;
        Some(Self::from_raw(mem, inst.opcode))
    }

    fn from_raw(mem: &MemoryOperandRaw, opcode: Opcode) -> Self {
        Self {
            base: mem.base,
            scale: mem.scale,
            index: mem.index,
            disp: mem.disp,
            seg: mem.seg,
            disp_expr: mem.disp_expr.clone(),
            opcode,
        }
    }

    /// The displacement actually used for offset arithmetic: the raw
    /// field plus the constant contribution of a symbolic expression.
    pub fn effective_disp(&self) -> i64 {
        self.disp
            + self
                .disp_expr
                .as_ref()
                .map(DispExpr::constant_contribution)
                .unwrap_or(0)
    }

    /// The symbol name carried by this operand's displacement expression,
    /// if any.
    pub fn symbol_name(&self) -> Option<&str> {
        self.disp_expr.as_ref().and_then(DispExpr::symbol_name)
    }

    /// Which slot, if any, `reg` occupies in this operand. `base` is checked
    /// first, so a (degenerate) operand with `reg` in both slots reports
    /// `Base`.
    pub fn position_of(&self, reg: RegId) -> Option<RegPosition> {
        if self.base == Some(reg) {
            Some(RegPosition::Base)
        } else if self.index == Some(reg) {
            Some(RegPosition::Index)
        } else {
            None
        }
    }

    /// Whether two memory operands are equal in every field except
    /// displacement: same base, scale, index, segment, and symbol (if
    /// any) — which is exactly what "same array accessed at a different
    /// offset" means for the induction analyzer.
    ///
    /// `buggy_self_compare` reproduces a defect in the instruction this
    /// crate was extracted from: its symbol-name comparison read the first
    /// operand's symbol twice instead of comparing against the second
    /// operand's, so any operand with a symbolic displacement always
    /// compared equal to itself on the symbol check regardless of what the
    /// other operand's symbol actually was. Set to `true` to reproduce that
    /// behavior bit-for-bit; `false` for the corrected comparison.
    pub fn eq_modulo_disp(&self, other: &Self, buggy_self_compare: bool) -> bool {
        if self.base != other.base || self.scale != other.scale || self.index != other.index {
            return false;
        }
        if self.seg != other.seg {
            return false;
        }
        let s1 = self.symbol_name();
        let s2 = if buggy_self_compare {
            self.symbol_name()
        } else {
            other.symbol_name()
        };
        s1 == s2
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mc::x86::{RAX, RBX};

    fn op(base: RegId, disp: i64) -> MemoryOperand {
        MemoryOperand {
            base: Some(base),
            scale: 1,
            index: None,
            disp,
            seg: None,
            disp_expr: None,
            opcode: Opcode::MovLoad,
        }
    }

    #[test]
    fn equal_modulo_disp_ignores_offset() {
        let a = op(RAX, 0);
        let b = op(RAX, 32);
        assert!(a.eq_modulo_disp(&b, false));
    }

    #[test]
    fn different_base_is_not_equal() {
        let a = op(RAX, 0);
        let b = op(RBX, 0);
        assert!(!a.eq_modulo_disp(&b, false));
    }

    #[test]
    fn position_of_distinguishes_base_and_index() {
        let based = op(RAX, 0);
        assert_eq!(based.position_of(RAX), Some(RegPosition::Base));
        assert_eq!(based.position_of(RBX), None);

        let mut scaled = op(RBX, 0);
        scaled.index = Some(RAX);
        scaled.scale = 4;
        assert_eq!(scaled.position_of(RAX), Some(RegPosition::Index));
        assert_eq!(scaled.position_of(RBX), Some(RegPosition::Base));
    }

    #[test]
    fn buggy_compare_ignores_other_operands_symbol() {
        let mut a = op(RAX, 0);
        a.disp_expr = Some(DispExpr::symbol_plus_constant("table_a", 0));
        let mut b = op(RAX, 0);
        b.disp_expr = Some(DispExpr::symbol_plus_constant("table_b", 0));

        // Corrected comparison distinguishes the two symbols.
        assert!(!a.eq_modulo_disp(&b, false));
        // The documented bug compares `a` against itself and always passes.
        assert!(a.eq_modulo_disp(&b, true));
    }
}
