use fixedbitset::FixedBitSet;
use index_vec::IndexVec;
use petgraph::visit::{
    depth_first_search,
    Control,
    Dfs,
    DfsEvent,
};
use smallvec::SmallVec;
use tracing::debug;

use super::{
    BasicBlockId,
    DomTree,
    Graph,
};

index_vec::define_index_type! {
    pub struct LoopId = u32;

    DISPLAY_FORMAT = "loop{}";
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct LoopInformation {
    pub id: LoopId,
    pub header: BasicBlockId,
    /// Sources of the edges jumping back to `header`.
    pub back_edges: SmallVec<[BasicBlockId; 2]>,
    /// Every block of the loop, nested loops included.
    pub blocks: FixedBitSet,
    pub parent: Option<LoopId>,
    /// The header does not dominate every back edge.
    pub irreducible: bool,
}

impl LoopInformation {
    pub fn contains(&self, block: BasicBlockId) -> bool {
        self.blocks.contains(block.index())
    }

    /// Whether this loop is nested in `other`.
    pub fn is_in(&self, other: &Self) -> bool {
        other.contains(self.header)
    }

    pub fn number_of_back_edges(&self) -> usize {
        self.back_edges.len()
    }

    pub fn block_count(&self) -> usize {
        self.blocks.count_ones(..)
    }
}

/// Iterator over a loop and its enclosing loops, innermost first.
pub struct LoopsOutward<'graph> {
    graph: &'graph Graph,
    current: Option<LoopId>,
}

impl<'graph> LoopsOutward<'graph> {
    pub(super) const fn new(graph: &'graph Graph, start: Option<LoopId>) -> Self {
        Self {
            graph,
            current: start,
        }
    }
}

impl<'graph> Iterator for LoopsOutward<'graph> {
    type Item = &'graph LoopInformation;

    fn next(&mut self) -> Option<Self::Item> {
        let loop_info = &self.graph.loops[self.current?];
        self.current = loop_info.parent;
        Some(loop_info)
    }
}

pub(super) struct LoopAnalysis {
    pub loops: IndexVec<LoopId, LoopInformation>,
    pub innermost: IndexVec<BasicBlockId, Option<LoopId>>,
    pub has_irreducible_loops: bool,
}

/// Finds the loops of `graph`.
///
/// Back edges are found by a depth-first search from the entry block. All back edges
/// targeting the same block form one loop.
pub(super) fn find_loops(graph: &Graph) -> LoopAnalysis {
    let block_count = graph.basic_blocks.len();
    let mut back_edges: Vec<(BasicBlockId, BasicBlockId)> = Vec::new();
    depth_first_search(graph.flow(), Some(graph.entry_block().into()), |event| {
        if let DfsEvent::BackEdge(source, target) = event {
            back_edges.push((source.into(), target.into()));
        }
        Control::<()>::Continue
    });
    back_edges.sort_by_key(|(source, header)| (*header, *source));

    let dom_tree = DomTree::compute(graph);
    let mut loops: IndexVec<LoopId, LoopInformation> = IndexVec::new();
    let mut has_irreducible_loops = false;
    for (source, header) in back_edges {
        if let Some(existing) = loops.iter_mut().find(|l| l.header == header) {
            existing.back_edges.push(source);
            continue;
        }
        let id = loops.next_idx();
        loops.push(LoopInformation {
            id,
            header,
            back_edges: SmallVec::from_elem(source, 1),
            blocks: FixedBitSet::with_capacity(block_count),
            parent: None,
            irreducible: false,
        });
    }

    for loop_info in &mut loops {
        loop_info.irreducible = loop_info
            .back_edges
            .iter()
            .any(|source| !dom_tree.dominates(loop_info.header, *source));
        has_irreducible_loops |= loop_info.irreducible;
        populate(graph, loop_info);
        debug!(
            "Found {}{} with header {} and {} blocks",
            loop_info.id,
            if loop_info.irreducible { " (irreducible)" } else { "" },
            loop_info.header,
            loop_info.block_count()
        );
    }

    // Loops are ordered by size; ties go to the lower id. A loop's parent is the next
    // loop in that order containing its header.
    let key = |loop_info: &LoopInformation| (loop_info.block_count(), loop_info.id);
    let parents: Vec<Option<LoopId>> = loops
        .iter()
        .map(|inner| {
            loops
                .iter()
                .filter(|outer| key(outer) > key(inner) && inner.is_in(outer))
                .min_by_key(|outer| key(outer))
                .map(|outer| outer.id)
        })
        .collect();
    for (loop_info, parent) in loops.iter_mut().zip(parents) {
        loop_info.parent = parent;
    }

    let mut innermost: IndexVec<BasicBlockId, Option<LoopId>> =
        IndexVec::from_vec(vec![None; block_count]);
    for block in graph.basic_blocks.indices() {
        innermost[block] = loops
            .iter()
            .find(|l| l.header == block)
            .or_else(|| {
                loops
                    .iter()
                    .filter(|l| l.contains(block))
                    .min_by_key(|l| key(l))
            })
            .map(|l| l.id);
    }

    LoopAnalysis {
        loops,
        innermost,
        has_irreducible_loops,
    }
}

/// Collects the blocks that reach a back edge without passing through the header.
///
/// For an irreducible loop this walk could escape towards the entry, so it is restricted
/// to blocks reachable from the header.
fn populate(graph: &Graph, loop_info: &mut LoopInformation) {
    let block_count = graph.basic_blocks.len();
    let mut reachable_from_header = FixedBitSet::with_capacity(block_count);
    let mut dfs = Dfs::new(graph.flow(), loop_info.header.into());
    while let Some(node) = dfs.next(graph.flow()) {
        reachable_from_header.insert(node.index());
    }

    loop_info.blocks.insert(loop_info.header.index());
    let mut worklist: Vec<BasicBlockId> = loop_info.back_edges.to_vec();
    while let Some(block) = worklist.pop() {
        if loop_info.blocks.contains(block.index())
            || !reachable_from_header.contains(block.index())
        {
            continue;
        }
        loop_info.blocks.insert(block.index());
        worklist.extend(graph.predecessors(block).iter().copied());
    }
}
