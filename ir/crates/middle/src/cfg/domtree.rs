use petgraph::{
    algo::dominators::Dominators,
    prelude::NodeIndex,
};

use super::{
    BasicBlockId,
    Graph,
};

pub struct DomTree {
    dominators: Dominators<NodeIndex>,
}

impl DomTree {
    pub fn compute(graph: &Graph) -> Self {
        Self {
            dominators: petgraph::algo::dominators::simple_fast(
                graph.flow(),
                graph.entry_block().into(),
            ),
        }
    }

    pub fn idom(&self, basic_block: BasicBlockId) -> Option<BasicBlockId> {
        self.dominators
            .immediate_dominator(basic_block.into())
            .map(BasicBlockId::from)
    }

    /// Returns true if `a` dominates `b`.
    ///
    /// A basic block `a` dominates `b` if every path from the entry block to `b` must go
    /// through `a`.
    /// Every block dominates itself.
    ///
    /// **Note** that false is returned if `b` is not reachable from the entry block.
    pub fn dominates(&self, a: BasicBlockId, b: BasicBlockId) -> bool {
        let Some(mut dominators) = self.dominators.dominators(b.into()) else {
            return false;
        };
        dominators.any(|node_idx| node_idx == a.into())
    }

    pub fn strictly_dominates(&self, a: BasicBlockId, b: BasicBlockId) -> bool {
        a != b && self.dominates(a, b)
    }

    pub fn is_reachable(&self, basic_block: BasicBlockId) -> bool {
        self.dominators.dominators(basic_block.into()).is_some()
    }
}
