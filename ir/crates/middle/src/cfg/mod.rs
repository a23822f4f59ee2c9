use std::fmt::{
    Display,
    Formatter,
};

pub use builder::GraphBuilder;
pub use domtree::DomTree;
use index_vec::IndexVec;
pub use loops::{
    LoopId,
    LoopInformation,
    LoopsOutward,
};
#[allow(unused_imports)]
pub use petgraph::{
    prelude::*,
    visit::Walker,
};
use smallvec::SmallVec;

use crate::{
    environment::{
        EnvId,
        Environment,
    },
    instruction::{
        Instr,
        InstrId,
    },
};

mod builder;
mod domtree;
mod linear_order;
mod loops;

index_vec::define_index_type! {
    pub struct BasicBlockId = u32;

    DISPLAY_FORMAT = "bb{}";
}

impl From<BasicBlockId> for NodeIndex {
    fn from(value: BasicBlockId) -> Self {
        Self::new(value.index())
    }
}

impl From<NodeIndex> for BasicBlockId {
    fn from(value: NodeIndex) -> Self {
        Self::new(value.index())
    }
}

/// Control flow edges. Node `i` is basic block `i`.
pub type FlowGraph = DiGraph<BasicBlockId, ()>;

/// A use of a value as input `input_index` of `user`.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct Use {
    pub user: InstrId,
    pub input_index: usize,
}

/// A use of a value in slot `slot` of an environment.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct EnvUse {
    pub env: EnvId,
    pub slot: usize,
}

/// A method in SSA form.
///
/// The graph owns every block, instruction, environment and loop for its whole lifetime.
/// Everything else refers to them by id.
#[derive(Debug, Clone)]
pub struct Graph {
    flow: FlowGraph,
    pub basic_blocks: IndexVec<BasicBlockId, BasicBlock>,
    pub instructions: IndexVec<InstrId, Instr>,
    pub environments: IndexVec<EnvId, Environment>,
    pub loops: IndexVec<LoopId, LoopInformation>,
    uses: IndexVec<InstrId, SmallVec<[Use; 2]>>,
    env_uses: IndexVec<InstrId, SmallVec<[EnvUse; 2]>>,
    entry_block: Option<BasicBlockId>,
    debuggable: bool,
    has_irreducible_loops: bool,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl Graph {
    pub fn new() -> Self {
        Self {
            flow: FlowGraph::new(),
            basic_blocks: IndexVec::new(),
            instructions: IndexVec::new(),
            environments: IndexVec::new(),
            loops: IndexVec::new(),
            uses: IndexVec::new(),
            env_uses: IndexVec::new(),
            entry_block: None,
            debuggable: false,
            has_irreducible_loops: false,
        }
    }

    pub fn entry_block(&self) -> BasicBlockId {
        self.entry_block
            .unwrap_or_else(|| panic!("Entry block has not been created"))
    }

    pub fn block(&self, id: BasicBlockId) -> &BasicBlock {
        &self.basic_blocks[id]
    }

    pub fn instr(&self, id: InstrId) -> &Instr {
        &self.instructions[id]
    }

    pub fn env(&self, id: EnvId) -> &Environment {
        &self.environments[id]
    }

    pub fn loop_info(&self, id: LoopId) -> &LoopInformation {
        &self.loops[id]
    }

    pub const fn is_debuggable(&self) -> bool {
        self.debuggable
    }

    pub const fn has_irreducible_loops(&self) -> bool {
        self.has_irreducible_loops
    }

    pub fn predecessors(&self, block: BasicBlockId) -> &[BasicBlockId] {
        &self.basic_blocks[block].predecessors
    }

    pub fn successors(&self, block: BasicBlockId) -> &[BasicBlockId] {
        &self.basic_blocks[block].successors
    }

    /// Non-environment uses of `instr`, in the order they were created.
    pub fn uses(&self, instr: InstrId) -> &[Use] {
        &self.uses[instr]
    }

    pub fn env_uses(&self, instr: InstrId) -> &[EnvUse] {
        &self.env_uses[instr]
    }

    pub fn has_uses(&self, instr: InstrId) -> bool {
        !self.uses[instr].is_empty()
    }

    pub fn has_environment_uses(&self, instr: InstrId) -> bool {
        !self.env_uses[instr].is_empty()
    }

    /// The innermost loop `block` belongs to.
    pub fn loop_of(&self, block: BasicBlockId) -> Option<&LoopInformation> {
        self.basic_blocks[block].loop_info.map(|id| &self.loops[id])
    }

    pub fn is_in_loop(&self, block: BasicBlockId) -> bool {
        self.basic_blocks[block].loop_info.is_some()
    }

    pub fn is_loop_header(&self, block: BasicBlockId) -> bool {
        self.loop_of(block)
            .map_or(false, |loop_info| loop_info.header == block)
    }

    /// Iterates over the loop of `block` and then over every enclosing loop.
    pub fn loops_outward(&self, block: BasicBlockId) -> LoopsOutward<'_> {
        LoopsOutward::new(self, self.basic_blocks[block].loop_info)
    }

    /// A try block has at least one exceptional successor.
    pub fn is_try_block(&self, block: BasicBlockId) -> bool {
        self.catch_successors(block).next().is_some()
    }

    pub fn catch_successors(&self, block: BasicBlockId) -> impl Iterator<Item = BasicBlockId> + '_ {
        self.successors(block)
            .iter()
            .copied()
            .filter(|successor| self.basic_blocks[*successor].is_catch_block)
    }

    pub fn can_throw_into_catch_block(&self, instr: InstrId) -> bool {
        let instr = &self.instructions[instr];
        instr.kind.can_throw() && self.is_try_block(instr.block)
    }

    /// Walks the environment chain of `instr` from the innermost environment outward.
    pub fn environment_chain(&self, instr: InstrId) -> impl Iterator<Item = &Environment> + '_ {
        let mut next = self.instructions[instr].environment;
        std::iter::from_fn(move || {
            let env = &self.environments[next?];
            next = env.parent;
            Some(env)
        })
    }

    pub fn dom_tree(&self) -> DomTree {
        DomTree::compute(self)
    }

    pub(crate) const fn flow(&self) -> &FlowGraph {
        &self.flow
    }

    pub fn post_order(&self) -> Vec<BasicBlockId> {
        DfsPostOrder::new(&self.flow, self.entry_block().into())
            .iter(&self.flow)
            .map(BasicBlockId::from)
            .collect()
    }

    pub fn reverse_post_order(&self) -> Vec<BasicBlockId> {
        let mut order = self.post_order();
        order.reverse();
        order
    }

    fn new_basic_block(&mut self, is_catch_block: bool) -> BasicBlockId {
        let id = self.basic_blocks.next_idx();
        let node = self.flow.add_node(id);
        debug_assert_eq!(node.index(), id.index());
        self.basic_blocks.push(BasicBlock::new(id, is_catch_block));
        if self.entry_block.is_none() {
            self.entry_block = Some(id);
        }
        id
    }

    fn add_edge(&mut self, from: BasicBlockId, to: BasicBlockId) {
        self.flow.add_edge(from.into(), to.into(), ());
        self.basic_blocks[from].successors.push(to);
        self.basic_blocks[to].predecessors.push(from);
    }

    fn push_instr(&mut self, instr: Instr) -> InstrId {
        let id = instr.id;
        for (input_index, input) in instr.inputs.iter().enumerate() {
            self.uses[*input].push(Use {
                user: id,
                input_index,
            });
        }
        self.instructions.push(instr);
        self.uses.push(SmallVec::new());
        self.env_uses.push(SmallVec::new());
        id
    }
}

impl Display for Graph {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let indent = "    ";
        for bb in &self.basic_blocks {
            write!(f, "{bb}")?;
            if bb.is_catch_block {
                write!(f, " (catch)")?;
            }
            if !bb.predecessors.is_empty() {
                write!(f, " <- ")?;
                for (index, pred) in bb.predecessors.iter().enumerate() {
                    if index > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{pred}")?;
                }
            }
            writeln!(f, ":")?;
            for instr in bb.phis.iter().chain(&bb.instructions) {
                let instr = &self.instructions[*instr];
                write!(f, "{indent}{}", instr.display(self))?;
                if let Some(env) = instr.environment {
                    write!(f, " {}", self.environments[env])?;
                }
                writeln!(f)?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct BasicBlock {
    pub id: BasicBlockId,
    /// Ordered. Phi input `i` flows in from predecessor `i`.
    pub predecessors: SmallVec<[BasicBlockId; 2]>,
    pub successors: SmallVec<[BasicBlockId; 2]>,
    pub phis: Vec<InstrId>,
    pub instructions: Vec<InstrId>,
    pub is_catch_block: bool,
    /// Innermost loop containing this block.
    pub loop_info: Option<LoopId>,
}

impl BasicBlock {
    pub fn new(id: BasicBlockId, is_catch_block: bool) -> Self {
        Self {
            id,
            predecessors: SmallVec::new(),
            successors: SmallVec::new(),
            phis: Vec::new(),
            instructions: Vec::new(),
            is_catch_block,
            loop_info: None,
        }
    }

    pub fn predecessor_index_of(&self, predecessor: BasicBlockId) -> usize {
        self.predecessors
            .iter()
            .position(|pred| *pred == predecessor)
            .unwrap_or_else(|| panic!("{predecessor} is not a predecessor of {}", self.id))
    }

    pub fn last_instruction(&self) -> Option<InstrId> {
        self.instructions.last().copied()
    }
}

impl Display for BasicBlock {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id)
    }
}
