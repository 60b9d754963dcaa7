//! The closed set of operators the range algebra knows how to pull back and
//! push forward through.
//!
//! This is deliberately a small, flat enumeration rather than an open trait:
//! every pull-back/push-forward case in [`crate::range`] matches on it
//! exhaustively, so adding an opcode here forces every call site that needs
//! to know about it to be revisited.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// An IR operator, named after its p-code-style mnemonic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[non_exhaustive]
pub enum Opcode {
    /// Identity: output equals the single input.
    Copy,
    /// Two's-complement addition.
    IntAdd,
    /// Two's-complement subtraction.
    IntSub,
    /// Two's-complement multiplication.
    IntMult,
    /// Bitwise AND.
    IntAnd,
    /// Bitwise OR.
    IntOr,
    /// Bitwise XOR.
    IntXor,
    /// Logical shift left.
    IntShl,
    /// Logical shift right.
    IntShr,
    /// Arithmetic shift right.
    IntSar,
    /// Two's-complement negation.
    IntNegate,
    /// Bitwise NOT.
    IntNot,
    /// Zero extension.
    IntZext,
    /// Sign extension.
    IntSext,
    /// Truncation / sub-piece extraction.
    IntSubPiece,
    /// Equality comparison, produces a one-byte boolean.
    IntEqual,
    /// Signed or unsigned `<` comparison, produces a one-byte boolean.
    IntLess { signed: bool },
    /// Signed or unsigned `<=` comparison, produces a one-byte boolean.
    IntLessEqual { signed: bool },
    /// Conditional branch on a one-byte boolean condition.
    ConditionalBranch,
    /// Phi-like join of multiple reaching definitions.
    MultiEqual,
}

impl Opcode {
    /// Number of input operands this opcode takes.
    ///
    /// `MultiEqual` is variable-arity; callers that need the actual operand
    /// count for a particular instance must read it from the IR's
    /// [`crate::ir::Operation::inputs`] rather than from this helper.
    pub fn arity(self) -> OpArity {
        match self {
            Opcode::Copy
            | Opcode::IntNegate
            | Opcode::IntNot
            | Opcode::IntZext
            | Opcode::IntSext
            | Opcode::IntSubPiece => OpArity::Unary,
            Opcode::IntAdd
            | Opcode::IntSub
            | Opcode::IntMult
            | Opcode::IntAnd
            | Opcode::IntOr
            | Opcode::IntXor
            | Opcode::IntShl
            | Opcode::IntShr
            | Opcode::IntSar
            | Opcode::IntEqual
            | Opcode::IntLess { .. }
            | Opcode::IntLessEqual { .. } => OpArity::Binary,
            Opcode::ConditionalBranch => OpArity::Unary,
            Opcode::MultiEqual => OpArity::Variadic,
        }
    }

    /// Whether swapping the two operands of a binary form yields the same
    /// result. Used by pull-back to decide which slot a known constant may
    /// occupy without needing a second case per side.
    pub fn is_commutative(self) -> bool {
        matches!(
            self,
            Opcode::IntAdd | Opcode::IntMult | Opcode::IntAnd | Opcode::IntOr | Opcode::IntXor | Opcode::IntEqual
        )
    }

    /// Whether the output of this opcode is a one-byte boolean rather than
    /// a value of the input's size.
    pub fn produces_boolean(self) -> bool {
        matches!(
            self,
            Opcode::IntEqual | Opcode::IntLess { .. } | Opcode::IntLessEqual { .. }
        )
    }
}

/// How many operands an [`Opcode`] instance takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpArity {
    Unary,
    Binary,
    Variadic,
}
