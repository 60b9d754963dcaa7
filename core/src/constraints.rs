//! Constraint generation: deriving [`CircleRange`] equations from
//! conditional branches (spec.md §4.4).
//!
//! A conditional branch `if (x OP c) { taken } else { not_taken }` tells the
//! solver that, along the `taken` edge, `x` is constrained to whatever
//! pre-image makes `x OP c` evaluate to `1`; along `not_taken`, to the
//! pre-image making it `0`. Both pre-images are computed with the same
//! `pullBackBinary` machinery [`crate::range`] already uses for ordinary
//! data-flow, just with the output fixed to a known boolean singleton
//! instead of read off a successor's current range.

use crate::ir::{FlowBlock, Operation, Variable};
use crate::opcode::Opcode;
use crate::range::CircleRange;
use crate::solver::ValueSetSolver;

/// For a conditional branch whose condition is defined by a comparison of a
/// variable against a constant, the non-constant operand plus the range it
/// must lie in along the true and false edges respectively.
///
/// Returns `None` when the condition is not of that shape (e.g. both
/// operands are variables, or the opcode is not a supported comparison) —
/// constraint generation degrades to "no constraint" in that case, per
/// spec.md §4.4's framing as an enrichment, not a required precondition.
pub(crate) fn constraints_from_cbranch<V: Variable>(cond: V) -> Option<(V, CircleRange, CircleRange)> {
    let op = cond.defining_operation()?;
    let opc = op.opcode();
    if !matches!(opc, Opcode::IntEqual | Opcode::IntLess { .. } | Opcode::IntLessEqual { .. }) {
        return None;
    }
    let inputs = op.inputs();
    if inputs.len() != 2 {
        return None;
    }

    let (const_slot, const_val, var) = if let Some(c) = inputs[0].constant_value() {
        (0usize, c, inputs[1])
    } else if let Some(c) = inputs[1].constant_value() {
        (1usize, c, inputs[0])
    } else {
        return None;
    };

    let in_size = var.size_bytes();
    let bool_mask = CircleRange::mask_of_size_bits(8);
    let true_out = CircleRange::single(1, bool_mask);
    let false_out = CircleRange::single(0, bool_mask);

    let true_range = true_out.pull_back_binary(opc, const_val, const_slot, in_size, 1).ok()?;
    let false_range = false_out.pull_back_binary(opc, const_val, const_slot, in_size, 1).ok()?;
    Some((var, true_range, false_range))
}

/// Walks every block's conditional branch, deriving and attaching equations
/// to the uses it dominates.
///
/// Corresponds to spec.md §4.4's `constraintsFromPath` + `applyConstraints`:
/// a fact learned on the taken edge is attached only to uses dominated by
/// the taken successor (and symmetrically for the not-taken edge), so a
/// fact learned on one branch is never applied to the other. Equations on a
/// use already carrying one from an enclosing branch are intersected, not
/// replaced (see [`crate::value_set::ValueSet::add_equation`]), which is
/// how nested dominator-subtree facts compose.
pub(crate) fn apply_constraints<V: Variable>(
    solver: &mut ValueSetSolver<V>,
    blocks: &[<V::Operation as Operation>::Block],
) {
    for &block in blocks {
        let Some(cond) = block.branch_condition() else { continue };
        let Some((taken, not_taken)) = block.branch_targets() else { continue };
        let Some((var, true_range, false_range)) = constraints_from_cbranch(cond) else { continue };

        apply_to_dominated(solver, var, taken, true_range);
        apply_to_dominated(solver, var, not_taken, false_range);
    }
}

fn apply_to_dominated<V: Variable>(
    solver: &mut ValueSetSolver<V>,
    var: V,
    split_point: <V::Operation as Operation>::Block,
    range: CircleRange,
) {
    for use_op in var.uses() {
        if !split_point.dominates(use_op.block()) {
            continue;
        }
        let Some(slot) = use_op.inputs().iter().position(|&v| v == var) else { continue };
        solver.add_equation(use_op.output(), slot, range);
    }
}
