//! The symbolic displacement-expression shapes the evaluator can hand back.

/// A displacement expression, standing in for the host's `MCExpr` tree.
///
/// Only the depth-1 shapes the specification names are ever inspected:
/// a bare constant, a bare symbol reference, or a `Binary(lhs, rhs)` whose
/// right operand is a constant (folded into the effective displacement) and
/// whose left operand may be a symbol reference (compared for the "same
/// global symbol" check). Deeper nesting is legal to construct but the core
/// never looks past one level, matching the host's own behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispExpr {
    /// A literal addend, already folded in by the evaluator at construction
    /// time in most real instructions; kept as a variant so a disassembler
    /// that prefers to hand back `DispExpr` uniformly still has a case for
    /// it.
    Constant(i64),
    /// A reference to a named symbol with no additional offset.
    SymbolRef(String),
    /// `lhs OP rhs`. The core only understands `rhs` being `Constant` and
    /// `lhs` being `SymbolRef`; any other shape is accepted but treated as
    /// contributing zero to the effective displacement and no symbol name.
    Binary {
        /// Left-hand side.
        lhs: Box<DispExpr>,
        /// Right-hand side.
        rhs: Box<DispExpr>,
    },
}

impl DispExpr {
    /// Convenience constructor for the one shape the core actually builds:
    /// `symbol + constant`.
    pub fn symbol_plus_constant(symbol: impl Into<String>, constant: i64) -> Self {
        Self::Binary {
            lhs: Box::new(Self::SymbolRef(symbol.into())),
            rhs: Box::new(Self::Constant(constant)),
        }
    }

    /// The constant contribution of this expression to the effective
    /// displacement: the value if this is directly a `Constant`, or the
    /// right-hand constant of a `Binary` whose RHS is constant; zero
    /// otherwise.
    pub fn constant_contribution(&self) -> i64 {
        match self {
            Self::Constant(v) => *v,
            Self::Binary { rhs, .. } => match rhs.as_ref() {
                Self::Constant(v) => *v,
                _ => 0,
            },
            Self::SymbolRef(_) => 0,
        }
    }

    /// The symbol name carried by this expression, if it is a bare
    /// `SymbolRef` or a `Binary` whose left operand is one. Only depth-1
    /// shapes are inspected, per the specification.
    pub fn symbol_name(&self) -> Option<&str> {
        match self {
            Self::SymbolRef(name) => Some(name),
            Self::Binary { lhs, .. } => match lhs.as_ref() {
                Self::SymbolRef(name) => Some(name),
                _ => None,
            },
            Self::Constant(_) => None,
        }
    }
}
