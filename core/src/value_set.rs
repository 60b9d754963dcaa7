//! `ValueSet`: the solver's per-variable node — a current range, the
//! equations constraining its inputs, and the bookkeeping needed to detect
//! when widening should kick in.

use smallvec::SmallVec;

use crate::equation::Equation;
use crate::opcode::Opcode;
use crate::range::CircleRange;
use crate::utils::indexing::newtype_id;
use crate::utils::Idx;

newtype_id!(ValueSetId);

/// Whether a tracked value is an absolute integer or an offset relative to
/// the designated stack-pointer variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCode {
    Absolute,
    StackOffset,
}

/// One tracked variable's node in the solver's data-flow graph.
///
/// Mutating methods are `pub(crate)`: only [`crate::solver::ValueSetSolver`]
/// is meant to drive iteration, so the type's public surface (outside this
/// crate) is read-only, per the "friend access" design constraint — the
/// solver is the only privileged mutator, enforced here by ordinary crate
/// visibility rather than a runtime check.
#[derive(Debug, Clone)]
pub struct ValueSet {
    type_code: TypeCode,
    opcode: Option<Opcode>,
    arity: usize,
    range: CircleRange,
    iteration: u32,
    equations: SmallVec<[Equation; 4]>,
    landmark: Option<CircleRange>,
    /// The [`crate::partition::Partition`] this node heads, if any.
    part_head: Option<crate::partition::PartitionId>,
    /// Intrusive successor link threading a partition's member nodes.
    next: Option<ValueSetId>,
}

impl ValueSet {
    /// Initializes a node from its defining operation.
    ///
    /// - A constant-defined variable collapses immediately to the constant
    ///   singleton.
    /// - A copy-like operator (`Opcode::Copy`) starts empty; it aliases the
    ///   input's eventual range once `iterate` runs.
    /// - Anything else (including input variables with no defining
    ///   operation) also starts empty and grows monotonically.
    pub(crate) fn new_varnode(
        type_code: TypeCode,
        opcode: Option<Opcode>,
        arity: usize,
        constant: Option<u64>,
        mask: u64,
    ) -> Self {
        let range = match constant {
            Some(v) => CircleRange::single(v, mask),
            None => CircleRange::empty(mask),
        };
        ValueSet {
            type_code,
            opcode,
            arity,
            range,
            iteration: 0,
            equations: SmallVec::new(),
            landmark: None,
            part_head: None,
            next: None,
        }
    }

    // READ-ONLY ACCESSORS
    // ============================================================================================

    pub fn range(&self) -> &CircleRange {
        &self.range
    }

    /// Direct mutable access to the current range, used only by the
    /// solver's root-seeding step (spec.md §4.5 step 1); ordinary iteration
    /// goes through [`Self::iterate`] instead.
    pub(crate) fn range_mut(&mut self) -> &mut CircleRange {
        &mut self.range
    }

    pub fn type_code(&self) -> TypeCode {
        self.type_code
    }

    pub fn opcode(&self) -> Option<Opcode> {
        self.opcode
    }

    pub fn arity(&self) -> usize {
        self.arity
    }

    pub fn iteration_count(&self) -> u32 {
        self.iteration
    }

    pub fn equations(&self) -> &[Equation] {
        &self.equations
    }

    pub fn landmark(&self) -> Option<&CircleRange> {
        self.landmark.as_ref()
    }

    pub fn part_head(&self) -> Option<crate::partition::PartitionId> {
        self.part_head
    }

    pub(crate) fn next(&self) -> Option<ValueSetId> {
        self.next
    }

    // SOLVER-PRIVILEGED MUTATORS
    // ============================================================================================

    pub(crate) fn set_next(&mut self, next: Option<ValueSetId>) {
        self.next = next;
    }

    pub(crate) fn set_part_head(&mut self, head: crate::partition::PartitionId) {
        self.part_head = Some(head);
    }

    /// Records a per-input constraint learned from a dominating branch.
    ///
    /// A slot already carrying an equation (reached via nested dominating
    /// branches, e.g. `if a { if b { ... } }`) is tightened by intersecting
    /// the two constraints rather than replaced, per `constraintsFromPath`'s
    /// "intersecting inherited facts" (spec.md §4.4).
    pub(crate) fn add_equation(&mut self, slot: usize, range: CircleRange) {
        if let Some(existing) = self.equations.iter_mut().find(|e| e.slot == slot) {
            let (_, merged) = existing.range.intersect(&range);
            existing.range = merged;
        } else {
            self.equations.push(Equation::new(slot, range));
        }
    }

    /// Records a widening landmark: the containment target `widen` will
    /// extrapolate the unstable bound out to once this node crosses
    /// `widen_after` iterations.
    ///
    /// Always the full range of this node's mask, not the range just
    /// replaced. An earlier design stored the pre-update range itself (truer
    /// to "a range the solver has previously witnessed"), but for a node
    /// still growing every sweep that range is, by construction, strictly
    /// smaller than the value about to be widened — `widen` would then pull
    /// the unstable bound *back* to it, shrinking the range and breaking the
    /// monotonicity `solve` depends on. Widening toward the full range keeps
    /// the stable bound exact and gives up precision only on the bound (and
    /// stride) still moving, which is sound and converges in one step; see
    /// DESIGN.md for the stride-precision this trades away.
    pub(crate) fn add_landmark(&mut self, range: CircleRange) {
        self.landmark = Some(range);
    }

    /// Increments the iteration counter; called each time the solver
    /// re-enters a partition containing this node.
    pub(crate) fn looped(&mut self) {
        self.iteration += 1;
    }

    /// Recomputes this node's range from the current ranges of its
    /// predecessors (already fetched by the solver, in operand-slot order),
    /// applying any recorded equations and widening once the iteration
    /// count crosses `widen_after`.
    ///
    /// Returns `true` iff the range changed.
    pub(crate) fn iterate(&mut self, inputs: &[CircleRange], widen_after: u32) -> bool {
        let Some(opc) = self.opcode else {
            // Input variable with no defining operation: nothing to
            // recompute from predecessors.
            return false;
        };

        // Step 1: apply per-slot equations.
        let constrained: SmallVec<[CircleRange; 4]> = inputs
            .iter()
            .enumerate()
            .map(|(slot, r)| match self.equations.iter().find(|e| e.slot == slot) {
                Some(eq) => r.intersect(&eq.range).1,
                None => *r,
            })
            .collect();

        // Step 2: push the defining opcode forward.
        let mask = self.range.mask();
        let size = mask_to_byte_size(mask);
        let forwarded = match (opc.arity(), constrained.as_slice()) {
            (crate::opcode::OpArity::Unary, [a]) => a.push_forward_unary(opc, size, size),
            (crate::opcode::OpArity::Binary, [a, b]) => {
                crate::range::push_forward_binary(opc, a, b, size, size, mask.min(1 << 16).max(1))
            },
            (crate::opcode::OpArity::Variadic, parts) => {
                // Phi-like join: the forward image is the union of all
                // reaching definitions.
                parts.iter().fold(CircleRange::empty(mask), |acc, r| {
                    let (status, u) = acc.circle_union(r);
                    match status {
                        crate::range::UnionStatus::Produced => u,
                        crate::range::UnionStatus::Failed => acc.minimal_container(r, mask.min(1 << 16).max(1)),
                    }
                })
            },
            _ => CircleRange::full(mask),
        };

        // Step 3: meet with the existing range.
        let (status, merged) = self.range.circle_union(&forwarded);
        let merged = match status {
            crate::range::UnionStatus::Produced => merged,
            crate::range::UnionStatus::Failed => self.range.minimal_container(&forwarded, mask.min(1 << 16).max(1)),
        };

        // Step 4: widen against the landmark once past the threshold. The
        // landmark is the full range (see `add_landmark`), so this pins
        // whichever bound hasn't moved since the last change and pushes the
        // other out to unbounded.
        let widened = if self.iteration >= widen_after {
            match self.landmark {
                Some(landmark) => merged.widen(&landmark, merged.get_min() == self.range.get_min()),
                None => merged,
            }
        } else {
            merged
        };

        let changed = widened != self.range;
        if changed {
            self.add_landmark(CircleRange::full(mask));
        }
        self.range = widened;
        changed
    }
}

fn mask_to_byte_size(mask: u64) -> u32 {
    if mask == u64::MAX {
        8
    } else {
        ((64 - mask.leading_zeros()).div_ceil(8)).max(1)
    }
}
