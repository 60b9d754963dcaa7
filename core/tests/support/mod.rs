//! A minimal, in-memory IR implementing [`vsa_core::ir`]'s collaborator
//! traits, built for exercising [`vsa_core::solver::ValueSetSolver`]
//! end-to-end without pulling in a real decompiler.
//!
//! Handles (`Var`, `Op`, `Block`) are `Copy` references into a leaked
//! [`Program`]: acceptable for test fixtures, where the program lives for
//! the duration of the test process, but not a pattern this crate itself
//! uses anywhere in non-test code.

#![allow(dead_code)]

use vsa_core::ir::{FlowBlock, Operation, Variable};
use vsa_core::Opcode;

pub struct VarDef {
    size: u32,
    def_op: Option<usize>,
    constant: Option<u64>,
}

pub struct OpDef {
    opcode: Opcode,
    inputs: Vec<usize>,
    output: usize,
    block: usize,
}

pub struct BlockDef {
    /// Indices of every block (including `self`) that dominates this one.
    dominators: Vec<usize>,
    branch_condition: Option<usize>,
    branch_targets: Option<(usize, usize)>,
}

pub struct Program {
    vars: Vec<VarDef>,
    ops: Vec<OpDef>,
    blocks: Vec<BlockDef>,
}

#[derive(Clone, Copy)]
pub struct Var {
    program: &'static Program,
    idx: usize,
}

impl PartialEq for Var {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.program, other.program) && self.idx == other.idx
    }
}
impl Eq for Var {}
impl std::hash::Hash for Var {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        (self.program as *const Program as usize).hash(state);
        self.idx.hash(state);
    }
}
impl std::fmt::Debug for Var {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Var({})", self.idx)
    }
}

#[derive(Clone, Copy)]
pub struct Op {
    program: &'static Program,
    idx: usize,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Block {
    program_ptr: usize,
    idx: usize,
}

impl Block {
    fn program(self) -> &'static Program {
        // SAFETY: constructed only from a live `&'static Program`.
        unsafe { &*(self.program_ptr as *const Program) }
    }
}

impl Variable for Var {
    type Operation = Op;

    fn size_bytes(self) -> u32 {
        self.program.vars[self.idx].size
    }

    fn defining_operation(self) -> Option<Op> {
        self.program.vars[self.idx].def_op.map(|i| Op { program: self.program, idx: i })
    }

    fn constant_value(self) -> Option<u64> {
        self.program.vars[self.idx].constant
    }

    fn uses(self) -> Vec<Op> {
        self.program
            .ops
            .iter()
            .enumerate()
            .filter(|(_, o)| o.inputs.contains(&self.idx))
            .map(|(i, _)| Op { program: self.program, idx: i })
            .collect()
    }
}

impl Operation for Op {
    type Variable = Var;
    type Block = Block;

    fn opcode(self) -> Opcode {
        self.program.ops[self.idx].opcode
    }

    fn inputs(self) -> Vec<Var> {
        self.program.ops[self.idx].inputs.iter().map(|&i| Var { program: self.program, idx: i }).collect()
    }

    fn output(self) -> Var {
        Var { program: self.program, idx: self.program.ops[self.idx].output }
    }

    fn block(self) -> Block {
        Block { program_ptr: self.program as *const Program as usize, idx: self.program.ops[self.idx].block }
    }
}

impl FlowBlock for Block {
    type Variable = Var;

    fn dominates(self, other: Self) -> bool {
        self.program().blocks[other.idx].dominators.contains(&self.idx)
    }

    fn branch_condition(self) -> Option<Var> {
        self.program().blocks[self.idx].branch_condition.map(|i| Var { program: self.program(), idx: i })
    }

    fn branch_targets(self) -> Option<(Self, Self)> {
        self.program().blocks[self.idx].branch_targets.map(|(t, n)| {
            (Block { program_ptr: self.program_ptr, idx: t }, Block { program_ptr: self.program_ptr, idx: n })
        })
    }
}

/// Builds a [`Program`] incrementally, then leaks it to obtain the
/// `'static` lifetime the `Copy` handles need.
#[derive(Default)]
pub struct ProgramBuilder {
    vars: Vec<VarDef>,
    ops: Vec<OpDef>,
    blocks: Vec<BlockDef>,
}

impl ProgramBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// A free input variable (no defining operation).
    pub fn input(&mut self, size: u32) -> usize {
        self.vars.push(VarDef { size, def_op: None, constant: None });
        self.vars.len() - 1
    }

    /// A constant-valued variable.
    pub fn constant(&mut self, size: u32, value: u64) -> usize {
        self.vars.push(VarDef { size, def_op: None, constant: Some(value) });
        self.vars.len() - 1
    }

    /// A new basic block. `dominators` should list every block (including
    /// this one, once created) that dominates it; pass the dominator set of
    /// the block it was created after for a simple linear/structured CFG.
    pub fn block(&mut self) -> usize {
        self.blocks.push(BlockDef { dominators: Vec::new(), branch_condition: None, branch_targets: None });
        let idx = self.blocks.len() - 1;
        self.blocks[idx].dominators.push(idx);
        idx
    }

    /// Marks `dominator` as dominating `block` (and transitively whatever
    /// already dominates `dominator`).
    pub fn add_dominator(&mut self, block: usize, dominator: usize) {
        let transitive = self.blocks[dominator].dominators.clone();
        for d in transitive {
            if !self.blocks[block].dominators.contains(&d) {
                self.blocks[block].dominators.push(d);
            }
        }
    }

    pub fn set_branch(&mut self, block: usize, cond: usize, taken: usize, not_taken: usize) {
        self.blocks[block].branch_condition = Some(cond);
        self.blocks[block].branch_targets = Some((taken, not_taken));
    }

    /// Appends an operation, allocating its output variable, and returns
    /// the output variable's index.
    pub fn op(&mut self, opcode: Opcode, inputs: Vec<usize>, out_size: u32, block: usize) -> usize {
        let output = self.reserve(out_size);
        self.op_into(opcode, inputs, output, block);
        output
    }

    /// A variable with no defining operation yet, to be wired up later via
    /// [`Self::op_into`]. Needed to build a loop-carried phi: the phi's
    /// inputs include a value defined *after* it in build order.
    pub fn reserve(&mut self, size: u32) -> usize {
        self.vars.push(VarDef { size, def_op: None, constant: None });
        self.vars.len() - 1
    }

    /// Appends an operation whose output is an already-reserved variable.
    pub fn op_into(&mut self, opcode: Opcode, inputs: Vec<usize>, output: usize, block: usize) -> usize {
        self.ops.push(OpDef { opcode, inputs, output, block });
        let op_idx = self.ops.len() - 1;
        self.vars[output].def_op = Some(op_idx);
        op_idx
    }

    pub fn build(self) -> &'static Program {
        Box::leak(Box::new(Program { vars: self.vars, ops: self.ops, blocks: self.blocks }))
    }
}

pub fn var(program: &'static Program, idx: usize) -> Var {
    Var { program, idx }
}

pub fn block(program: &'static Program, idx: usize) -> Block {
    Block { program_ptr: program as *const Program as usize, idx }
}
