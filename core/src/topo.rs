//! Bourdoncle's weak topological order, computed without recursing once per
//! graph vertex.
//!
//! The textbook presentation is two mutually recursive procedures, `visit`
//! and `component`, each calling itself once per graph edge — on a deeply
//! nested or merely large function this can exceed the native call stack.
//! This builds the same order with an explicit work-list instead: a flat
//! stack of `Frontier` actions plays the role of the call stack, and small
//! per-vertex side tables (`dfn`, `min_head`, `loop_flag`) hold the state
//! that would otherwise live in `visit`'s stack frame. The shape of the
//! work-list — an explicit `Visit`/`Finish` pair per activation, with edges
//! processed as their own scheduled step — follows the same pattern used to
//! de-recurse a DFS-based loop-detection pass over a control-flow graph.

use std::collections::HashMap;
use std::hash::Hash;

use smallvec::SmallVec;

/// A node of the weak topological order: either a single vertex, or a
/// nested strongly-connected component with its own head and recursively
/// ordered body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WtoComponent<N> {
    Vertex(N),
    Component { head: N, body: Vec<WtoComponent<N>> },
}

/// A strongly-connected component discovered during construction, as a
/// flattened, head-first member list — exactly what the solver needs to
/// build a [`crate::partition::Partition`] and link its members' `next`
/// fields.
#[derive(Debug, Clone)]
pub struct PartitionSpan<N> {
    pub head: N,
    pub members: Vec<N>,
}

/// Computes the weak topological order reachable from `roots`, plus the
/// set of non-trivial (loop-forming) components discovered along the way.
///
/// `successors` may be called more than once per vertex (the component
/// re-scan step re-fetches a vertex's successor list each sweep), so it
/// should be cheap — an index into an adjacency list, not a recomputation.
pub fn weak_topological_order<N, F>(roots: &[N], mut successors: F) -> (Vec<N>, Vec<PartitionSpan<N>>)
where
    N: Copy + Eq + Hash,
    F: FnMut(N) -> SmallVec<[N; 4]>,
{
    let mut builder = WtoBuilder::default();
    for &root in roots {
        builder.visit_root(root, &mut successors);
    }
    let order = builder.out_stack.pop().expect("root output buffer");
    let mut flat = Vec::new();
    let mut spans = Vec::new();
    flatten(&order, &mut flat, &mut spans);
    (flat, spans)
}

fn flatten<N: Copy>(components: &[WtoComponent<N>], flat: &mut Vec<N>, spans: &mut Vec<PartitionSpan<N>>) {
    for c in components {
        match c {
            WtoComponent::Vertex(v) => flat.push(*v),
            WtoComponent::Component { head, body } => {
                let start = flat.len();
                flat.push(*head);
                flatten(body, flat, spans);
                let members = flat[start..].to_vec();
                spans.push(PartitionSpan { head: *head, members });
            },
        }
    }
}

enum Frontier<N> {
    Visit(N),
    /// Reads `child`'s `dfn` once it is resolved (either freshly assigned by
    /// a nested `Visit`, or already present from an earlier visit / a prior
    /// component sweep) and folds it into `parent`'s `min_head`.
    ProcessEdge(N, N),
    Finish(N),
    ComponentSweep(N),
}

#[derive(Default)]
struct WtoBuilder<N: Eq + Hash> {
    num: u32,
    dfn: HashMap<N, u32>,
    min_head: HashMap<N, u32>,
    loop_flag: HashMap<N, bool>,
    tarjan_stack: Vec<N>,
    out_stack: Vec<Vec<WtoComponent<N>>>,
    work: Vec<Frontier<N>>,
}

const DONE: u32 = u32::MAX;

impl<N: Copy + Eq + Hash> WtoBuilder<N> {
    fn visit_root<F: FnMut(N) -> SmallVec<[N; 4]>>(&mut self, root: N, successors: &mut F) {
        if self.out_stack.is_empty() {
            self.out_stack.push(Vec::new());
        }
        self.work.push(Frontier::Visit(root));
        self.drain(successors);
    }

    fn drain<F: FnMut(N) -> SmallVec<[N; 4]>>(&mut self, successors: &mut F) {
        while let Some(frame) = self.work.pop() {
            match frame {
                Frontier::Visit(v) => self.visit(v, successors),
                Frontier::ProcessEdge(parent, child) => self.process_edge(parent, child),
                Frontier::Finish(v) => self.finish(v),
                Frontier::ComponentSweep(v) => self.component_sweep(v, successors),
            }
        }
    }

    fn visit<F: FnMut(N) -> SmallVec<[N; 4]>>(&mut self, v: N, successors: &mut F) {
        if self.dfn.contains_key(&v) {
            // Already visited (in progress, on a prior component sweep, or
            // permanently done); the pending `ProcessEdge` will read its
            // dfn directly.
            return;
        }
        self.num += 1;
        self.dfn.insert(v, self.num);
        self.min_head.insert(v, self.num);
        self.loop_flag.insert(v, false);
        self.tarjan_stack.push(v);

        self.work.push(Frontier::Finish(v));
        for w in successors(v).into_iter().rev() {
            self.work.push(Frontier::ProcessEdge(v, w));
            self.work.push(Frontier::Visit(w));
        }
    }

    fn process_edge(&mut self, parent: N, child: N) {
        let child_dfn = *self.dfn.get(&child).expect("child visited before its edge is processed");
        let head = *self.min_head.get(&parent).expect("parent is mid-visit");
        if child_dfn <= head {
            self.min_head.insert(parent, child_dfn);
            self.loop_flag.insert(parent, true);
        }
    }

    fn finish(&mut self, v: N) {
        let head = *self.min_head.get(&v).expect("min_head recorded by visit");
        let dfn_v = *self.dfn.get(&v).expect("dfn recorded by visit");
        if head != dfn_v {
            // Not a head: stays on the Tarjan stack, to be reset and
            // revisited once the ancestor that *is* this component's head
            // finishes.
            return;
        }

        self.dfn.insert(v, DONE);
        loop {
            let w = self.tarjan_stack.pop().expect("v must still be on the stack");
            if w == v {
                break;
            }
            self.dfn.remove(&w);
        }

        if *self.loop_flag.get(&v).unwrap_or(&false) {
            self.out_stack.push(Vec::new());
            self.work.push(Frontier::ComponentSweep(v));
        } else {
            self.emit(WtoComponent::Vertex(v));
        }
    }

    fn component_sweep<F: FnMut(N) -> SmallVec<[N; 4]>>(&mut self, v: N, successors: &mut F) {
        for w in successors(v) {
            if !self.dfn.contains_key(&w) {
                self.work.push(Frontier::ComponentSweep(v));
                self.work.push(Frontier::Visit(w));
                return;
            }
        }
        let body = self.out_stack.pop().expect("component sweep pushed its own body buffer");
        self.emit(WtoComponent::Component { head: v, body });
    }

    fn emit(&mut self, c: WtoComponent<N>) {
        self.out_stack.last_mut().expect("at least one output buffer").push(c);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edges(graph: &[(u32, &[u32])]) -> impl FnMut(u32) -> SmallVec<[u32; 4]> + '_ {
        move |v| graph.iter().find(|(n, _)| *n == v).map(|(_, s)| s.iter().copied().collect()).unwrap_or_default()
    }

    #[test]
    fn acyclic_chain_is_a_flat_order() {
        let graph = [(1u32, &[2u32][..]), (2, &[3][..]), (3, &[][..])];
        let (order, spans) = weak_topological_order(&[1], edges(&graph));
        assert_eq!(order, vec![1, 2, 3]);
        assert!(spans.is_empty());
    }

    #[test]
    fn simple_loop_becomes_one_component_headed_by_the_entry() {
        // 1 -> 2 -> 3 -> 2 (loop on 2,3), 3 -> 4 (exit)
        let graph = [(1u32, &[2u32][..]), (2, &[3][..]), (3, &[2, 4][..]), (4, &[][..])];
        let (order, spans) = weak_topological_order(&[1], edges(&graph));
        assert_eq!(order, vec![1, 2, 3, 4]);
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].head, 2);
        assert_eq!(spans[0].members, vec![2, 3]);
    }

    #[test]
    fn nested_loops_produce_nested_components() {
        // 1 -> 2 -> 3 -> 4 -> 3 (inner loop), 4 -> 2 (outer loop)
        let graph = [(1u32, &[2u32][..]), (2, &[3][..]), (3, &[4][..]), (4, &[3, 2][..])];
        let (order, spans) = weak_topological_order(&[1], edges(&graph));
        assert_eq!(order, vec![1, 2, 3, 4]);
        assert_eq!(spans.len(), 2);
        let outer = spans.iter().find(|s| s.head == 2).unwrap();
        assert_eq!(outer.members, vec![2, 3, 4]);
        let inner = spans.iter().find(|s| s.head == 3).unwrap();
        assert_eq!(inner.members, vec![3, 4]);
    }
}
