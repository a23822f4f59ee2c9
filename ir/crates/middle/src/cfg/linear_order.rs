use index_vec::IndexVec;
use tracing::debug;

use super::{
    BasicBlockId,
    Graph,
    LoopId,
};

impl Graph {
    /// Computes the order in which the register allocator walks the blocks.
    ///
    /// A block is only placed once all of its forward predecessors are placed, and the
    /// blocks of a loop are kept contiguous so that a value live across the loop gets a
    /// single range covering it.
    pub fn linear_order(&self) -> Vec<BasicBlockId> {
        let mut forward_predecessors: IndexVec<BasicBlockId, usize> = self
            .basic_blocks
            .iter()
            .map(|block| {
                let mut count = block.predecessors.len();
                if self.is_loop_header(block.id) {
                    count -= self.loops[block.loop_info.unwrap_or_else(|| {
                        unreachable!("{} is a loop header without a loop", block.id)
                    })]
                    .number_of_back_edges();
                }
                count
            })
            .collect();

        let mut order = Vec::with_capacity(self.basic_blocks.len());
        let mut placed: IndexVec<BasicBlockId, bool> =
            IndexVec::from_vec(vec![false; self.basic_blocks.len()]);
        let mut worklist = vec![self.entry_block()];
        while let Some(current) = worklist.pop() {
            order.push(current);
            placed[current] = true;
            for successor in self.successors(current).iter().copied() {
                let remaining = forward_predecessors[successor];
                if remaining == 1 {
                    self.add_to_linearization_worklist(&mut worklist, successor);
                }
                forward_predecessors[successor] = remaining.saturating_sub(1);
            }
        }

        for block in self.basic_blocks.indices() {
            if !placed[block] {
                debug!("{block} was not reached by linearization, appending it");
                order.push(block);
            }
        }
        debug!("Linear order: {:?}", order);
        order
    }

    /// Inserts `block` into the worklist (a stack) so that it is popped before any block
    /// that belongs to a loop `block` is not part of.
    fn add_to_linearization_worklist(&self, worklist: &mut Vec<BasicBlockId>, block: BasicBlockId) {
        let block_loop = self.basic_blocks[block].loop_info;
        let insert_at = worklist
            .iter()
            .rposition(|current| {
                let current_loop = self.basic_blocks[*current].loop_info;
                current_loop == block_loop
                    || current_loop.is_none()
                    || self.is_inner_loop(current_loop, block_loop)
            })
            .map_or(0, |position| position + 1);
        worklist.insert(insert_at, block);
    }

    /// Whether `inner` is a loop nested in `outer`.
    fn is_inner_loop(&self, outer: Option<LoopId>, inner: Option<LoopId>) -> bool {
        match (outer, inner) {
            (Some(outer), Some(inner)) if outer != inner => {
                self.loops[inner].is_in(&self.loops[outer])
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use tracing_test::traced_test;

    use crate::test::{
        create_diamond,
        create_nested_loops,
        create_simple_loop,
    };

    #[test]
    #[traced_test]
    fn entry_comes_first_and_every_block_is_placed_once() {
        let (graph, _) = create_diamond();
        let order = graph.linear_order();
        assert_eq!(order[0], graph.entry_block());
        assert_eq!(order.len(), graph.basic_blocks.len());
        let mut sorted = order.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), order.len());
    }

    #[test]
    #[traced_test]
    fn diamond_join_comes_after_both_branches() {
        let (graph, blocks) = create_diamond();
        let order = graph.linear_order();
        let position = |block| order.iter().position(|b| *b == block).unwrap();
        assert!(position(blocks.join) > position(blocks.then));
        assert!(position(blocks.join) > position(blocks.otherwise));
        assert!(position(blocks.then) > position(blocks.entry));
    }

    #[test]
    #[traced_test]
    fn loop_body_is_contiguous() {
        let (graph, blocks) = create_simple_loop();
        let order = graph.linear_order();
        assert_eq!(
            order,
            vec![
                blocks.entry,
                blocks.pre_header,
                blocks.header,
                blocks.body,
                blocks.exit,
                blocks.exit_block,
            ]
        );
    }

    #[test]
    #[traced_test]
    fn nested_loops_are_contiguous() {
        let (graph, blocks) = create_nested_loops();
        let order = graph.linear_order();
        let outer = graph.loop_of(blocks.outer_header).unwrap();
        let inner = graph.loop_of(blocks.inner_header).unwrap();
        for loop_info in [outer, inner] {
            let positions: Vec<usize> = order
                .iter()
                .enumerate()
                .filter(|(_, block)| loop_info.contains(**block))
                .map(|(position, _)| position)
                .collect();
            let first = positions[0];
            let last = positions[positions.len() - 1];
            assert_eq!(
                last - first + 1,
                positions.len(),
                "blocks of {} are not contiguous in {:?}",
                loop_info.id,
                order
            );
            assert_eq!(order[first], loop_info.header);
        }
    }
}
