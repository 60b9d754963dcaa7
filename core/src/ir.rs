//! The narrow interface the solver consumes an intermediate representation
//! through.
//!
//! Everything in this module is a collaborator contract, not a concrete
//! type: the opcodes, variables, operations and basic blocks themselves are
//! out of scope (see the crate's top-level documentation) and belong to the
//! decompiler embedding this crate. The solver only ever calls these
//! methods; it never constructs a `Variable` or `Operation` itself.

use crate::opcode::Opcode;

/// A program variable tracked by the analysis.
///
/// Implementors typically wrap an index into the embedder's own SSA-variable
/// table; `Eq + Hash` identity is how the solver deduplicates variables
/// reached while walking backward from the sinks.
pub trait Variable: Copy + Eq + std::hash::Hash {
    /// The concrete [`Operation`] type this IR uses.
    type Operation: Operation<Variable = Self>;

    /// Size of this variable in bytes. Determines the modulus `2^(8*size)`
    /// every [`crate::range::CircleRange`] derived for it is taken over.
    fn size_bytes(self) -> u32;

    /// The operation that defines this variable, or `None` if it is an
    /// input (a function parameter, a load from unanalyzed memory, etc.)
    /// with no further backward data-flow.
    fn defining_operation(self) -> Option<Self::Operation>;

    /// If this variable was defined by a constant load, its value.
    ///
    /// Pulled out as its own query (rather than forcing callers to inspect
    /// `defining_operation`) because constant-ness is checked on nearly
    /// every path through `establishValueSets` and `iterate`.
    fn constant_value(self) -> Option<u64>;

    /// Every operation that reads this variable as an input operand.
    ///
    /// Constraint generation (spec.md §4.4) walks these to decide which
    /// uses a branch-derived equation applies to; solver graph discovery
    /// does not need this (it walks [`Operation::inputs`] instead).
    fn uses(self) -> Vec<Self::Operation>;
}

/// A single defining operation: an opcode plus its ordered operands.
pub trait Operation: Copy {
    /// The concrete [`Variable`] type this IR uses.
    type Variable: Variable<Operation = Self>;

    /// The concrete [`FlowBlock`] type this IR uses.
    type Block: FlowBlock<Variable = Self::Variable>;

    /// The opcode this operation instantiates.
    fn opcode(self) -> Opcode;

    /// The operation's input operands, in operand-slot order.
    fn inputs(self) -> Vec<Self::Variable>;

    /// The single variable this operation defines.
    fn output(self) -> Self::Variable;

    /// The basic block this operation lives in. Only consulted by
    /// constraint generation, to test whether a use is dominated by a
    /// conditional branch's split point.
    fn block(self) -> Self::Block;
}

/// A basic block, queried only for dominance and branch introspection during
/// constraint generation (§4.4).
pub trait FlowBlock: Copy + Eq {
    /// The concrete [`Variable`] type this IR uses.
    type Variable: Variable;

    /// Whether `self` dominates `other` in the containing function's
    /// dominator tree. Reflexive: a block dominates itself.
    fn dominates(self, other: Self) -> bool;

    /// If this block ends in a conditional branch, the variable carrying
    /// the one-byte boolean condition and the comparison operation that
    /// produced it (when available — constraint generation degrades
    /// gracefully to "no constraint" when it is not).
    fn branch_condition(self) -> Option<Self::Variable>;

    /// The two successor blocks of a conditional branch, as `(taken,
    /// not_taken)` for a true condition. `None` for blocks that do not end
    /// in a conditional branch.
    fn branch_targets(self) -> Option<(Self, Self)>;
}
