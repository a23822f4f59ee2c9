use smallvec::SmallVec;
use tracing::debug;

use super::{
    loops::{
        find_loops,
        LoopAnalysis,
    },
    BasicBlockId,
    EnvUse,
    Graph,
};
use crate::{
    environment::{
        EnvId,
        Environment,
    },
    instruction::{
        Const,
        Instr,
        InstrId,
        InstrKind,
    },
    Type,
};

/// Builds a [`Graph`].
///
/// Blocks, edges and instructions can be added in any order. [`GraphBuilder::finish`]
/// computes the loop information once the shape of the graph is final.
#[derive(Debug, Default)]
pub struct GraphBuilder {
    graph: Graph,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new block. The first block created is the entry block.
    pub fn create_bb(&mut self) -> BasicBlockId {
        self.graph.new_basic_block(false)
    }

    /// Creates an exception handler block.
    pub fn create_catch_bb(&mut self) -> BasicBlockId {
        self.graph.new_basic_block(true)
    }

    /// Adds the edge `from -> to`. The edge order defines predecessor and successor indices.
    pub fn add_edge(&mut self, from: BasicBlockId, to: BasicBlockId) {
        self.graph.add_edge(from, to);
    }

    pub fn set_debuggable(&mut self, debuggable: bool) {
        self.graph.debuggable = debuggable;
    }

    pub fn parameter(&mut self, bb: BasicBlockId, index: u32, ty: Type) -> InstrId {
        self.add(bb, InstrKind::Parameter { index }, ty, &[])
    }

    pub fn constant(&mut self, bb: BasicBlockId, value: Const) -> InstrId {
        self.add(bb, InstrKind::Constant(value), value.ty(), &[])
    }

    /// Adds a phi without inputs; they are added with [`GraphBuilder::add_phi_input`].
    pub fn phi(&mut self, bb: BasicBlockId, ty: Type) -> InstrId {
        let id = self.graph.instructions.next_idx();
        let instr = Instr::new(id, bb, ty, InstrKind::Phi, SmallVec::new(), id.to_string());
        self.graph.push_instr(instr);
        self.graph.basic_blocks[bb].phis.push(id);
        id
    }

    pub fn add_phi_input(&mut self, phi: InstrId, input: InstrId) {
        assert!(self.graph.instructions[phi].is_phi(), "{phi} is not a phi");
        let input_index = self.graph.instructions[phi].inputs.len();
        self.graph.instructions[phi].inputs.push(input);
        self.graph.uses[input].push(super::Use {
            user: phi,
            input_index,
        });
    }

    /// Appends an instruction to `bb`.
    pub fn add(
        &mut self,
        bb: BasicBlockId,
        kind: InstrKind,
        ty: Type,
        inputs: &[InstrId],
    ) -> InstrId {
        assert!(!matches!(kind, InstrKind::Phi), "use GraphBuilder::phi to create phis");
        let id = self.graph.instructions.next_idx();
        let instr = Instr::new(id, bb, ty, kind, SmallVec::from_slice(inputs), id.to_string());
        self.graph.push_instr(instr);
        self.graph.basic_blocks[bb].instructions.push(id);
        id
    }

    /// Attaches a new environment to `holder`.
    ///
    /// Passing `parent` links the new environment to an enclosing one; the holder always
    /// points at the most recently attached (innermost) environment.
    pub fn environment(
        &mut self,
        holder: InstrId,
        slots: &[Option<InstrId>],
        parent: Option<EnvId>,
    ) -> EnvId {
        let id = self.graph.environments.next_idx();
        for (slot, value) in slots.iter().enumerate() {
            if let Some(value) = value {
                self.graph.env_uses[*value].push(EnvUse { env: id, slot });
            }
        }
        self.graph.environments.push(Environment {
            id,
            slots: SmallVec::from_slice(slots),
            parent,
            holder,
        });
        self.graph.instructions[holder].environment = Some(id);
        id
    }

    pub fn set_emitted_at_use_site(&mut self, instr: InstrId) {
        self.graph.instructions[instr].emitted_at_use_site = true;
    }

    pub fn set_symbol(&mut self, instr: InstrId, symbol: impl Into<String>) {
        self.graph.instructions[instr].symbol = symbol.into();
    }

    pub const fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Finalizes the graph and computes its loop information.
    pub fn finish(mut self) -> Graph {
        let LoopAnalysis {
            loops,
            innermost,
            has_irreducible_loops,
        } = find_loops(&self.graph);
        for (bb, loop_info) in innermost.into_iter_enumerated() {
            self.graph.basic_blocks[bb].loop_info = loop_info;
        }
        debug!(
            "Built graph with {} blocks, {} instructions and {} loops",
            self.graph.basic_blocks.len(),
            self.graph.instructions.len(),
            loops.len()
        );
        self.graph.loops = loops;
        self.graph.has_irreducible_loops = has_irreducible_loops;
        self.graph
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::BinOp;

    #[test]
    fn uses_are_recorded_in_input_order() {
        let mut builder = GraphBuilder::new();
        let bb = builder.create_bb();
        let a = builder.parameter(bb, 0, Type::Int32);
        let sum = builder.add(bb, InstrKind::Binary(BinOp::Add), Type::Int32, &[a, a]);
        builder.add(bb, InstrKind::Return, Type::Void, &[sum]);
        let graph = builder.finish();

        let uses = graph.uses(a);
        assert_eq!(uses.len(), 2);
        assert_eq!((uses[0].user, uses[0].input_index), (sum, 0));
        assert_eq!((uses[1].user, uses[1].input_index), (sum, 1));
        assert!(graph.has_uses(sum));
    }

    #[test]
    fn environments_chain_from_innermost() {
        let mut builder = GraphBuilder::new();
        let bb = builder.create_bb();
        let a = builder.parameter(bb, 0, Type::Int32);
        let b = builder.parameter(bb, 1, Type::Reference);
        let check = builder.add(bb, InstrKind::NullCheck, Type::Reference, &[b]);
        let outer = builder.environment(check, &[Some(a)], None);
        let inner = builder.environment(check, &[Some(b), None], Some(outer));
        builder.add(bb, InstrKind::ReturnVoid, Type::Void, &[]);
        let graph = builder.finish();

        let chain: Vec<EnvId> = graph.environment_chain(check).map(|env| env.id).collect();
        assert_eq!(chain, vec![inner, outer]);
        assert_eq!(graph.env_uses(a), &[EnvUse { env: outer, slot: 0 }]);
        assert_eq!(graph.env_uses(b), &[EnvUse { env: inner, slot: 0 }]);
        assert!(graph.has_environment_uses(a));
    }

    #[test]
    fn edges_keep_predecessor_order() {
        let mut builder = GraphBuilder::new();
        let entry = builder.create_bb();
        let left = builder.create_bb();
        let right = builder.create_bb();
        let join = builder.create_bb();
        builder.add_edge(entry, left);
        builder.add_edge(entry, right);
        builder.add_edge(right, join);
        builder.add_edge(left, join);
        let graph = builder.finish();

        assert_eq!(graph.predecessors(join), &[right, left]);
        assert_eq!(graph.block(join).predecessor_index_of(left), 1);
        assert_eq!(graph.successors(entry), &[left, right]);
    }
}
