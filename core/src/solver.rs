//! `ValueSetSolver`: the fixpoint iterator that assigns a [`CircleRange`] to
//! every variable reachable backward from a set of sinks.
//!
//! Graph discovery ([`ValueSetSolver::establish_value_sets`]) and iteration
//! ([`ValueSetSolver::solve`]) are kept as two separate passes, matching
//! spec.md §6's split: the first allocates (arenas, the topological order,
//! partitions); the second does not (§5 — "memory allocation occurs only
//! during `establishValueSets` and `establishTopologicalOrder`; the main
//! iteration loop allocates nothing").

use std::collections::{HashMap, VecDeque};

use smallvec::SmallVec;

use crate::constraints::apply_constraints;
use crate::errors::SolverConfigError;
use crate::ir::{Operation, Variable};
use crate::partition::{Partition, PartitionId};
use crate::range::CircleRange;
use crate::topo::weak_topological_order;
use crate::utils::IndexVec;
use crate::value_set::{TypeCode, ValueSet, ValueSetId};

/// Tunables for [`ValueSetSolver::solve`].
///
/// Both fields are named explicitly rather than left as bare constants
/// because spec.md §9 flags the widening trigger as an Open Question: a
/// caller that sees non-termination or premature imprecision on real input
/// needs to be able to retune it without patching the solver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SolverConfig {
    /// Hard ceiling on the total number of node iterations across the
    /// whole solve. Exceeding it is a normal, sound outcome (spec.md §7):
    /// affected nodes simply retain their last monotone approximation.
    pub max_iterations: usize,
    /// Number of times a node iterates without the solver widening it
    /// against its landmark. spec.md §4.5 suggests "e.g. 3" but leaves the
    /// exact value unspecified; see DESIGN.md for the chosen default.
    pub widen_after: u32,
}

impl SolverConfig {
    pub fn new(max_iterations: usize, widen_after: u32) -> Result<Self, SolverConfigError> {
        if max_iterations == 0 {
            return Err(SolverConfigError::ZeroIterationBudget);
        }
        if widen_after == 0 {
            return Err(SolverConfigError::ZeroWideningThreshold);
        }
        Ok(SolverConfig { max_iterations, widen_after })
    }
}

impl Default for SolverConfig {
    fn default() -> Self {
        SolverConfig { max_iterations: 10_000, widen_after: 3 }
    }
}

/// Read-only summary of a completed (or capped) solve, for a caller's
/// diagnostics UI. Not named in spec.md §6's interface; supplemented per
/// SPEC_FULL.md §C.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SolveStats {
    /// Number of node iterations actually performed.
    pub iterations: usize,
    /// Number of times the walk restarted a partition from its head.
    pub sweeps: usize,
    /// Number of distinct nodes that crossed the widening threshold.
    pub nodes_widened: usize,
    /// Number of (possibly nested) partitions discovered.
    pub partitions: usize,
}

/// A span of the flat iteration order belonging to one [`Partition`].
#[derive(Debug, Clone, Copy)]
struct PartitionSpan {
    id: PartitionId,
    start_idx: usize,
    stop_idx: usize,
}

/// The fixpoint solver. Owns every [`ValueSet`] and [`Partition`] it
/// creates; external IR variables are never mutated, only read through the
/// [`crate::ir::Variable`]/[`crate::ir::Operation`] contracts.
///
/// Single-threaded, synchronous, used once per function analyzed (spec.md
/// §5) — there is no API to reset or reuse an instance across sink sets.
pub struct ValueSetSolver<V: Variable> {
    arena: IndexVec<ValueSetId, ValueSet>,
    partitions: IndexVec<PartitionId, Partition>,
    var_to_id: HashMap<V, ValueSetId>,
    id_to_var: IndexVec<ValueSetId, V>,
    /// Flat weak-topological order over discovered nodes.
    order: Vec<ValueSetId>,
    /// Variables with no defining operation: seeded to full (unless
    /// constant) at the start of `solve`.
    roots: Vec<ValueSetId>,
    spans: Vec<PartitionSpan>,
    num_iterations: usize,
    stats: SolveStats,
}

impl<V: Variable> Default for ValueSetSolver<V> {
    fn default() -> Self {
        ValueSetSolver {
            arena: IndexVec::new(),
            partitions: IndexVec::new(),
            var_to_id: HashMap::new(),
            id_to_var: IndexVec::new(),
            order: Vec::new(),
            roots: Vec::new(),
            spans: Vec::new(),
            num_iterations: 0,
            stats: SolveStats::default(),
        }
    }
}

impl<V: Variable> ValueSetSolver<V> {
    pub fn new() -> Self {
        Self::default()
    }

    // GRAPH CONSTRUCTION
    // ============================================================================================

    /// Builds the solver's graph backward from `sinks`: every variable that
    /// (transitively) contributes to a sink gets a [`ValueSet`]; the result
    /// is decomposed into a weak topological order of [`Partition`]s.
    ///
    /// `stack_reg`, if given, designates the variable whose own `ValueSet`s
    /// (i.e. itself, not variables merely derived from it — see DESIGN.md)
    /// get [`TypeCode::StackOffset`] instead of [`TypeCode::Absolute`].
    ///
    /// `blocks` supplies the basic blocks constraint generation (spec.md
    /// §4.4) needs to test use-site dominance; spec.md §6 does not thread
    /// blocks through `establishValueSets` explicitly, but constraint
    /// generation cannot run without them, so this crate adds the
    /// parameter here (documented as an Open Question resolution in
    /// DESIGN.md) rather than invent a second public entry point.
    #[tracing::instrument(name = "establish_value_sets", skip_all, fields(sinks = sinks.len()))]
    pub fn establish_value_sets(
        &mut self,
        sinks: &[V],
        stack_reg: Option<V>,
        blocks: &[<V::Operation as Operation>::Block],
    ) {
        self.discover(sinks, stack_reg);
        let (order, spans) = self.build_topological_order();
        self.order = order;
        self.install_partitions(spans);
        apply_constraints(self, blocks);
    }

    /// Backward BFS from `sinks`, allocating a [`ValueSet`] for every newly
    /// discovered variable.
    fn discover(&mut self, sinks: &[V], stack_reg: Option<V>) {
        let mut queue: VecDeque<V> = sinks.iter().copied().collect();
        for &sink in sinks {
            self.ensure_node(sink, stack_reg);
        }
        while let Some(var) = queue.pop_front() {
            if let Some(op) = var.defining_operation() {
                for input in op.inputs() {
                    if !self.var_to_id.contains_key(&input) {
                        self.ensure_node(input, stack_reg);
                        queue.push_back(input);
                    }
                }
            } else {
                let id = self.var_to_id[&var];
                self.roots.push(id);
            }
        }
    }

    fn ensure_node(&mut self, var: V, stack_reg: Option<V>) -> ValueSetId {
        if let Some(&id) = self.var_to_id.get(&var) {
            return id;
        }
        let type_code = if stack_reg == Some(var) { TypeCode::StackOffset } else { TypeCode::Absolute };
        let op = var.defining_operation();
        let opcode = op.map(|o| o.opcode());
        let arity = op.map(|o| o.inputs().len()).unwrap_or(0);
        let mask = CircleRange::mask_of_size_bits(var.size_bytes() * 8);
        let vs = ValueSet::new_varnode(type_code, opcode, arity, var.constant_value(), mask);
        let id = self.arena.push(vs).expect("fewer than u32::MAX variables reachable from the sinks");
        self.var_to_id.insert(var, id);
        let pushed = self.id_to_var.push(var).expect("id_to_var mirrors arena 1:1");
        debug_assert_eq!(pushed, id);
        id
    }

    /// Successor edges for the weak topological order: the discovered
    /// variables that read `v` as an operand. Corresponds to spec.md §4.3's
    /// `ValueSetEdge` ("successors are the ValueSets of variables read by
    /// operations whose output is this variable's definition-use chain").
    fn successors_of(&self, v: ValueSetId) -> SmallVec<[ValueSetId; 4]> {
        let var = self.id_to_var[v];
        var.uses()
            .into_iter()
            .filter_map(|op| self.var_to_id.get(&op.output()).copied())
            .collect()
    }

    fn build_topological_order(&self) -> (Vec<ValueSetId>, Vec<crate::topo::PartitionSpan<ValueSetId>>) {
        weak_topological_order(&self.roots, |v| self.successors_of(v))
    }

    fn install_partitions(&mut self, spans: Vec<crate::topo::PartitionSpan<ValueSetId>>) {
        let pos: HashMap<ValueSetId, usize> =
            self.order.iter().enumerate().map(|(i, &id)| (id, i)).collect();
        for span in spans {
            let Some(&start_idx) = pos.get(&span.head) else { continue };
            let stop_idx = span
                .members
                .iter()
                .filter_map(|m| pos.get(m).copied())
                .max()
                .unwrap_or(start_idx);
            let stop_node = self.order[stop_idx];
            let part = Partition::new(span.head, stop_node);
            let part_id = self.partitions.push(part).expect("fewer than u32::MAX partitions");
            self.arena[span.head].set_part_head(part_id);
            // Thread `next` across the span's members in flat order, so the
            // intrusive chain from `start_node` to `stop_node` mirrors
            // spec.md §4.3's pointer-graph description.
            for w in span.members.windows(2) {
                self.arena[w[0]].set_next(Some(w[1]));
            }
            self.spans.push(PartitionSpan { id: part_id, start_idx, stop_idx });
        }
        self.spans.sort_by_key(|s| s.stop_idx - s.start_idx);
        self.stats.partitions = self.partitions.len();
    }

    // CONSTRAINT ATTACHMENT (called by `crate::constraints`)
    // ============================================================================================

    /// Attaches an equation to the `ValueSet` of `var`, if `var` is part of
    /// this solver's discovered graph. A no-op otherwise: the variable a
    /// branch constrains may not contribute to any sink.
    pub(crate) fn add_equation(&mut self, var: V, slot: usize, range: CircleRange) {
        if let Some(&id) = self.var_to_id.get(&var) {
            self.arena[id].add_equation(slot, range);
        }
    }

    // FIXPOINT DRIVER
    // ============================================================================================

    /// Runs the fixpoint loop to convergence or until `config.max_iterations`
    /// total node iterations have been performed, whichever comes first.
    #[tracing::instrument(name = "solve", skip_all)]
    pub fn solve(&mut self, config: SolverConfig) {
        self.seed_roots();

        let n = self.order.len();
        if n == 0 {
            return;
        }

        let mut widened: std::collections::HashSet<ValueSetId> = std::collections::HashSet::new();
        let mut iterations = 0usize;
        let mut sweeps = 0usize;
        let mut i = 0usize;

        loop {
            if iterations >= config.max_iterations {
                tracing::warn!(iterations, "solver hit max_iterations before full convergence");
                break;
            }

            let starts: SmallVec<[usize; 2]> =
                self.span_indices_starting_at(i).collect();
            for &span_idx in &starts {
                self.partitions[self.spans[span_idx].id].clear_dirty();
            }

            let id = self.order[i];
            let pre_iteration = self.arena[id].iteration_count();
            let changed = self.iterate_node(id, config.widen_after);
            iterations += 1;
            if pre_iteration < config.widen_after && self.arena[id].iteration_count() >= config.widen_after {
                widened.insert(id);
            }

            if changed {
                for span_idx in self.span_indices_covering(i) {
                    self.partitions[self.spans[span_idx].id].mark_dirty();
                }
            }

            let ends: SmallVec<[usize; 2]> = self.span_indices_ending_at(i).collect();
            let mut restarted = false;
            for &span_idx in &ends {
                let span = self.spans[span_idx];
                if self.partitions[span.id].is_dirty() {
                    i = span.start_idx;
                    sweeps += 1;
                    restarted = true;
                    break;
                }
            }
            if restarted {
                continue;
            }

            if i + 1 >= n {
                break;
            }
            i += 1;
        }

        self.num_iterations = iterations;
        self.stats.iterations = iterations;
        self.stats.sweeps = sweeps;
        self.stats.nodes_widened = widened.len();
        tracing::info!(
            iterations,
            sweeps,
            nodes_widened = widened.len(),
            "value-set solve finished"
        );
    }

    /// Every root's `ValueSet` is full unless it already collapsed to a
    /// constant singleton at construction time (spec.md §4.5 step 1).
    fn seed_roots(&mut self) {
        for &id in &self.roots {
            let vs = &mut self.arena[id];
            if vs.range().is_empty() {
                let mask = vs.range().mask();
                *vs.range_mut() = CircleRange::full(mask);
            }
        }
    }

    fn iterate_node(&mut self, id: ValueSetId, widen_after: u32) -> bool {
        let var = self.id_to_var[id];
        let inputs: SmallVec<[CircleRange; 4]> = match var.defining_operation() {
            None => SmallVec::new(),
            Some(op) => op
                .inputs()
                .iter()
                .map(|input_var| {
                    let input_id = self.var_to_id[input_var];
                    *self.arena[input_id].range()
                })
                .collect(),
        };
        self.arena[id].looped();
        self.arena[id].iterate(&inputs, widen_after)
    }

    fn span_indices_starting_at(&self, idx: usize) -> impl Iterator<Item = usize> + '_ {
        self.spans.iter().enumerate().filter(move |(_, s)| s.start_idx == idx).map(|(i, _)| i)
    }

    fn span_indices_ending_at(&self, idx: usize) -> impl Iterator<Item = usize> + '_ {
        self.spans.iter().enumerate().filter(move |(_, s)| s.stop_idx == idx).map(|(i, _)| i)
    }

    fn span_indices_covering(&self, idx: usize) -> impl Iterator<Item = usize> + '_ {
        self.spans
            .iter()
            .enumerate()
            .filter(move |(_, s)| s.start_idx <= idx && idx <= s.stop_idx)
            .map(|(i, _)| i)
    }

    // QUERIES
    // ============================================================================================

    pub fn get_num_iterations(&self) -> usize {
        self.num_iterations
    }

    pub fn stats(&self) -> SolveStats {
        self.stats
    }

    /// The computed range for `var`, if it was reached backward from the
    /// sinks during `establish_value_sets`.
    pub fn get_value_set(&self, var: V) -> Option<&ValueSet> {
        let id = *self.var_to_id.get(&var)?;
        self.arena.get(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcode::Opcode;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    struct V(u32);

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct B;

    impl crate::ir::FlowBlock for B {
        type Variable = V;
        fn dominates(self, _other: Self) -> bool {
            true
        }
        fn branch_condition(self) -> Option<Self::Variable> {
            None
        }
        fn branch_targets(self) -> Option<(Self, Self)> {
            None
        }
    }

    #[derive(Debug, Clone, Copy)]
    struct Op {
        opcode: Opcode,
        inputs: &'static [V],
        output: V,
    }

    impl Operation for Op {
        type Variable = V;
        type Block = B;
        fn opcode(self) -> Opcode {
            self.opcode
        }
        fn inputs(self) -> Vec<V> {
            self.inputs.to_vec()
        }
        fn output(self) -> V {
            self.output
        }
        fn block(self) -> B {
            B
        }
    }

    // A tiny fixed program: v0 = const 0; v1 = v0 + const(4); v2 = multiequal(v0, v1)
    // i.e. a single-iteration loop body `i = 0; i = i + 4;` joined by a phi.
    const V0: V = V(0);
    const V1: V = V(1);
    const V2: V = V(2);
    const C4: V = V(100);

    impl Variable for V {
        type Operation = Op;

        fn size_bytes(self) -> u32 {
            4
        }

        fn defining_operation(self) -> Option<Op> {
            match self {
                V0 => None,
                C4 => None,
                V1 => Some(Op { opcode: Opcode::IntAdd, inputs: &[V0, C4], output: V1 }),
                V2 => Some(Op { opcode: Opcode::MultiEqual, inputs: &[V0, V1], output: V2 }),
                _ => None,
            }
        }

        fn constant_value(self) -> Option<u64> {
            match self {
                V0 => Some(0),
                C4 => Some(4),
                _ => None,
            }
        }

        fn uses(self) -> Vec<Op> {
            match self {
                V0 => vec![
                    Op { opcode: Opcode::IntAdd, inputs: &[V0, C4], output: V1 },
                    Op { opcode: Opcode::MultiEqual, inputs: &[V0, V1], output: V2 },
                ],
                C4 => vec![Op { opcode: Opcode::IntAdd, inputs: &[V0, C4], output: V1 }],
                V1 => vec![Op { opcode: Opcode::MultiEqual, inputs: &[V0, V1], output: V2 }],
                _ => vec![],
            }
        }
    }

    #[test]
    fn acyclic_phi_chain_converges_in_one_sweep() {
        let mut solver: ValueSetSolver<V> = ValueSetSolver::new();
        solver.establish_value_sets(&[V2], None, &[]);
        solver.solve(SolverConfig::default());

        let v1 = solver.get_value_set(V1).unwrap();
        assert_eq!(v1.range().get_min(), Some(4));
        assert_eq!(v1.range().get_size(), 1);

        let v2 = solver.get_value_set(V2).unwrap();
        // multiequal(0, 4) over a 4-byte domain: the union of two
        // singletons isn't a single arc, so it widens to a container.
        assert!(v2.range().contains(0));
        assert!(v2.range().contains(4));
    }
}
