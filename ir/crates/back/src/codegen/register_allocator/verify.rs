use std::fmt::{
    Display,
    Formatter,
};

use fixedbitset::FixedBitSet;
use tern_middle::{
    cfg::DomTree,
    BasicBlockId,
    Graph,
    InstrId,
};

use crate::codegen::register_allocator::{
    interval::{
        IntervalId,
        LifetimePosition,
    },
    SsaLivenessAnalysis,
};

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum LivenessError {
    UnsortedRanges(IntervalId),
    UseNotCovered {
        value: InstrId,
        position: LifetimePosition,
    },
    DefinitionDoesNotDominateUse {
        value: InstrId,
        user: InstrId,
    },
    LiveInIrreducibleLoop {
        value: InstrId,
        header: BasicBlockId,
    },
    LiveOutMismatch {
        block: BasicBlockId,
    },
    LoopRangeMissing {
        value: InstrId,
        header: BasicBlockId,
    },
    MissingCatchPhiEnvSlot {
        holder: InstrId,
        phi: InstrId,
        value: InstrId,
    },
}

impl Display for LivenessError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnsortedRanges(interval) => {
                write!(f, "Ranges of {interval} are not sorted and disjoint")
            }
            Self::UseNotCovered { value, position } => {
                write!(f, "{value} is used at {position} but not live there")
            }
            Self::DefinitionDoesNotDominateUse { value, user } => {
                write!(f, "Definition of {value} does not dominate its use in {user}")
            }
            Self::LiveInIrreducibleLoop { value, header } => write!(
                f,
                "{value} is live into {header}, the header of an irreducible loop"
            ),
            Self::LiveOutMismatch { block } => write!(
                f,
                "Live out set of {block} is not the union of the live in sets of its successors"
            ),
            Self::LoopRangeMissing { value, header } => write!(
                f,
                "{value} is live into {header} but does not cover the whole loop"
            ),
            Self::MissingCatchPhiEnvSlot { holder, phi, value } => write!(
                f,
                "{value} flows into catch phi {phi} but is not kept alive by {holder}"
            ),
        }
    }
}

/// Checks the intervals and live sets computed by [`SsaLivenessAnalysis`].
pub struct LivenessVerifier<'a> {
    graph: &'a Graph,
    liveness: &'a SsaLivenessAnalysis<'a>,
}

impl<'a> LivenessVerifier<'a> {
    pub const fn new(graph: &'a Graph, liveness: &'a SsaLivenessAnalysis<'a>) -> Self {
        Self { graph, liveness }
    }

    pub fn verify(self) -> Vec<LivenessError> {
        let mut errors = vec![];
        let domtree = self.graph.dom_tree();
        for interval in self.liveness.intervals().iter() {
            let sorted = interval
                .ranges()
                .windows(2)
                .all(|pair| pair[0].end < pair[1].start);
            if !sorted {
                errors.push(LivenessError::UnsortedRanges(interval.id()));
            }
        }
        for index in 0..self.liveness.number_of_ssa_values() {
            let value = self.liveness.instruction_from_ssa_index(index);
            self.verify_uses(value, &domtree, &mut errors);
        }
        for bb in &self.graph.basic_blocks {
            if !domtree.is_reachable(bb.id) {
                continue;
            }
            self.verify_live_out(bb.id, &mut errors);
            if let Some(loop_info) = self
                .graph
                .loop_of(bb.id)
                .filter(|loop_info| loop_info.header == bb.id)
            {
                if loop_info.irreducible {
                    self.verify_irreducible_header(bb.id, &mut errors);
                } else if !self.graph.has_irreducible_loops() {
                    let end = self.liveness.loop_lifetime_end(loop_info);
                    self.verify_loop_ranges(bb.id, end, &mut errors);
                }
            }
            for holder in bb.instructions.iter().copied() {
                if self.graph.can_throw_into_catch_block(holder) {
                    self.verify_catch_phi_inputs(holder, &mut errors);
                }
            }
        }
        errors
    }

    fn covers_use(&self, interval: IntervalId, position: LifetimePosition) -> bool {
        let intervals = self.liveness.intervals();
        intervals.siblings(interval).any(|sibling| {
            intervals[sibling]
                .ranges()
                .iter()
                .any(|range| range.start < position && position <= range.end)
        })
    }

    fn verify_uses(&self, value: InstrId, domtree: &DomTree, errors: &mut Vec<LivenessError>) {
        let Some(interval) = self.liveness.interval_of(value) else {
            return;
        };
        let definition = self.graph.instr(value);
        let definition_position = self.liveness.lifetime_position(value);
        for use_position in self.liveness.intervals().uses(interval) {
            let Some(user) = use_position.user else {
                continue;
            };
            if !self.covers_use(interval, use_position.position) {
                errors.push(LivenessError::UseNotCovered {
                    value,
                    position: use_position.position,
                });
            }
            let user_instr = self.graph.instr(user);
            let used_in = if user_instr.is_phi() {
                self.graph.predecessors(user_instr.block)[use_position.input_index]
            } else {
                user_instr.block
            };
            let dominates = domtree.dominates(definition.block, used_in)
                && definition_position < use_position.position;
            if !dominates {
                errors.push(LivenessError::DefinitionDoesNotDominateUse { value, user });
            }
        }
    }

    fn verify_live_out(&self, block: BasicBlockId, errors: &mut Vec<LivenessError>) {
        let mut expected = FixedBitSet::with_capacity(self.liveness.number_of_ssa_values());
        for successor in self.graph.successors(block) {
            expected.union_with(self.liveness.live_in(*successor));
        }
        if !expected.ones().eq(self.liveness.live_out(block).ones()) {
            errors.push(LivenessError::LiveOutMismatch { block });
        }
    }

    fn verify_irreducible_header(&self, header: BasicBlockId, errors: &mut Vec<LivenessError>) {
        for index in self.liveness.live_in(header).ones() {
            let value = self.liveness.instruction_from_ssa_index(index);
            let instr = self.graph.instr(value);
            if !(instr.is_constant() && instr.block == self.graph.entry_block()) {
                errors.push(LivenessError::LiveInIrreducibleLoop { value, header });
            }
        }
    }

    fn verify_loop_ranges(
        &self,
        header: BasicBlockId,
        end: LifetimePosition,
        errors: &mut Vec<LivenessError>,
    ) {
        let intervals = self.liveness.intervals();
        let start = self.liveness.block_lifetime_start(header);
        for index in self.liveness.live_in(header).ones() {
            let value = self.liveness.instruction_from_ssa_index(index);
            let Some(interval) = self.liveness.interval_of(value) else {
                continue;
            };
            let covered = (start..end).all(|position| {
                intervals
                    .siblings(interval)
                    .any(|sibling| intervals[sibling].covers(position))
            });
            if !covered {
                errors.push(LivenessError::LoopRangeMissing { value, header });
            }
        }
    }

    /// A non-constant input of a catch phi must be live when the throwing instruction runs.
    fn verify_catch_phi_inputs(&self, holder: InstrId, errors: &mut Vec<LivenessError>) {
        let block = self.graph.instr(holder).block;
        let position = self.liveness.lifetime_position(holder) + 1;
        for catch_block in self.graph.catch_successors(block) {
            let catch_block = self.graph.block(catch_block);
            let input_index = catch_block.predecessor_index_of(block);
            for phi in catch_block.phis.iter().copied() {
                let Some(value) = self.graph.instr(phi).inputs.get(input_index).copied() else {
                    continue;
                };
                if self.graph.instr(value).is_constant() {
                    continue;
                }
                let kept_alive = self.liveness.interval_of(value).map_or(false, |interval| {
                    let recorded = self
                        .liveness
                        .intervals()
                        .env_uses(interval)
                        .iter()
                        .any(|env_use| {
                            env_use.position == position
                                && self.graph.env(env_use.env).holder == holder
                        });
                    recorded && self.covers_use(interval, position)
                });
                if !kept_alive {
                    errors.push(LivenessError::MissingCatchPhiEnvSlot { holder, phi, value });
                }
            }
        }
    }
}
