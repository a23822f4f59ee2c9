use std::fmt::{
    Display,
    Formatter,
};

use fixedbitset::FixedBitSet;
use index_vec::IndexVec;
use itertools::Itertools;
use tern_middle::{
    cfg::LoopInformation,
    BasicBlockId,
    EnvId,
    Graph,
    InstrId,
};
use tracing::{
    debug,
    trace,
};

use crate::codegen::{
    locations::{
        LocationSummary,
        LocationTable,
    },
    register_allocator::{
        interval::{
            EnvUsePosition,
            IntervalId,
            Intervals,
            LifetimePosition,
            UsePosition,
        },
        LivenessConfig,
        LivenessVerifier,
    },
    CodeGenerator,
};

/// How far [`SsaLivenessAnalysis::analyze`] got.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, strum_macros::Display)]
pub enum LivenessState {
    Uninitialized,
    /// Every instruction has a lifetime position and, if it produces a value, an SSA index.
    Numbered,
    /// Live ranges are built, the block sets are not final yet.
    RangesBuilt,
    Converged,
}

#[derive(Debug, Clone, Default)]
struct BlockInfo {
    live_in: FixedBitSet,
    live_out: FixedBitSet,
    kill: FixedBitSet,
    lifetime_start: LifetimePosition,
    lifetime_end: LifetimePosition,
}

#[derive(Debug, Clone, Copy, Default)]
struct InstrInfo {
    ssa_index: Option<usize>,
    position: Option<LifetimePosition>,
    interval: Option<IntervalId>,
}

/// Computes the live intervals of every SSA value of a graph.
///
/// Blocks are numbered in linear order. Every block start and every instruction takes two
/// lifetime positions; phis share the position of their block start. Live ranges are built in
/// one backward pass over the linear order, after which the block live sets are iterated to a
/// fixed point to account for back edges.
pub struct SsaLivenessAnalysis<'graph> {
    graph: &'graph Graph,
    config: LivenessConfig,
    state: LivenessState,
    linear_order: Vec<BasicBlockId>,
    blocks: IndexVec<BasicBlockId, BlockInfo>,
    instrs: IndexVec<InstrId, InstrInfo>,
    locations: LocationTable,
    intervals: Intervals,
    instructions_from_ssa_index: Vec<InstrId>,
    /// One entry per even lifetime position. `None` marks the start of a block.
    instructions_from_position: Vec<Option<InstrId>>,
    blocks_from_position: Vec<BasicBlockId>,
}

impl<'graph> SsaLivenessAnalysis<'graph> {
    pub fn new(graph: &'graph Graph, config: LivenessConfig) -> Self {
        Self {
            graph,
            config,
            state: LivenessState::Uninitialized,
            linear_order: Vec::new(),
            blocks: graph
                .basic_blocks
                .indices()
                .map(|_| BlockInfo::default())
                .collect(),
            instrs: graph
                .instructions
                .indices()
                .map(|_| InstrInfo::default())
                .collect(),
            locations: graph.instructions.indices().map(|_| None).collect(),
            intervals: Intervals::new(),
            instructions_from_ssa_index: Vec::new(),
            instructions_from_position: Vec::new(),
            blocks_from_position: Vec::new(),
        }
    }

    /// Runs the whole analysis, asking `codegen` for the locations of every instruction.
    pub fn analyze(&mut self, codegen: &mut impl CodeGenerator) {
        assert_eq!(
            self.state,
            LivenessState::Uninitialized,
            "Liveness was already analyzed"
        );
        self.linear_order = self.graph.linear_order();
        debug!(
            "Linear order: {}",
            self.linear_order.iter().map(ToString::to_string).join(", ")
        );
        self.number_instructions(codegen);
        self.compute_liveness();
        if self.config.dump_intervals {
            debug!("Live intervals:\n{self}");
        }
        if self.config.check_invariants {
            let errors = LivenessVerifier::new(self.graph, self).verify();
            assert!(
                errors.is_empty(),
                "Liveness analysis produced invalid intervals:\n{}",
                errors.iter().join("\n")
            );
        }
    }

    fn number_instructions(&mut self, codegen: &mut impl CodeGenerator) {
        let graph = self.graph;
        codegen.start_graph(graph);
        let mut position = 0;
        for block in self.linear_order.clone() {
            let block_data = graph.block(block);
            self.blocks[block].lifetime_start = position;
            for phi in block_data.phis.iter().copied() {
                self.allocate_locations(codegen, phi);
                self.instrs[phi].position = Some(position);
            }
            self.instructions_from_position.push(None);
            self.blocks_from_position.push(block);
            position += 2;
            for instr in block_data.instructions.iter().copied() {
                self.allocate_locations(codegen, instr);
                self.instructions_from_position.push(Some(instr));
                self.blocks_from_position.push(block);
                self.instrs[instr].position = Some(position);
                position += 2;
            }
            self.blocks[block].lifetime_end = position;
            debug!(
                "Numbered {block}: [{}, {position})",
                self.blocks[block].lifetime_start
            );
        }
        self.state = LivenessState::Numbered;
    }

    /// Gives `instr` its locations and, if it produces a value, an SSA index and an interval.
    fn allocate_locations(&mut self, codegen: &mut impl CodeGenerator, instr: InstrId) {
        let summary = codegen.allocate_locations(self.graph, instr);
        let produces_value = summary
            .as_ref()
            .map_or(false, |summary| summary.out().is_valid());
        self.locations[instr] = summary;
        if !produces_value {
            return;
        }
        let ty = self.graph.instr(instr).ty;
        let interval = self.intervals.make_interval(ty, Some(instr));
        let info = &mut self.instrs[instr];
        info.ssa_index = Some(self.instructions_from_ssa_index.len());
        info.interval = Some(interval);
        self.instructions_from_ssa_index.push(instr);
    }

    fn compute_liveness(&mut self) {
        let values = self.number_of_ssa_values();
        for info in &mut self.blocks {
            info.live_in = FixedBitSet::with_capacity(values);
            info.live_out = FixedBitSet::with_capacity(values);
            info.kill = FixedBitSet::with_capacity(values);
        }
        self.compute_live_ranges();
        self.state = LivenessState::RangesBuilt;
        self.compute_live_in_and_live_out_sets();
        self.state = LivenessState::Converged;
    }

    fn compute_live_ranges(&mut self) {
        let graph = self.graph;
        let values = self.number_of_ssa_values();
        for block in self.linear_order.clone().into_iter().rev() {
            let mut live_in = FixedBitSet::with_capacity(values);
            let mut kill = FixedBitSet::with_capacity(values);

            for successor in graph.successors(block).iter().copied() {
                live_in.union_with(&self.blocks[successor].live_in);
                let successor = graph.block(successor);
                // Catch phi inputs are kept alive by the environments of throwing instructions.
                if successor.is_catch_block {
                    continue;
                }
                let input_index = successor.predecessor_index_of(block);
                for phi in successor.phis.iter().copied() {
                    let input = graph.instr(phi).input_at(input_index);
                    self.add_phi_use(input, phi, input_index, block);
                    live_in.insert(self.expect_ssa_index(input));
                }
            }

            let BlockInfo {
                lifetime_start,
                lifetime_end,
                ..
            } = self.blocks[block];
            for index in live_in.ones() {
                let interval = self.expect_interval(self.instructions_from_ssa_index[index]);
                self.intervals[interval].add_range(lifetime_start, lifetime_end);
            }

            for current in graph.block(block).instructions.iter().rev().copied() {
                if let Some(index) = self.instrs[current].ssa_index {
                    kill.insert(index);
                    live_in.set(index, false);
                    let interval = self.expect_interval(current);
                    let from = self.lifetime_position(current);
                    self.intervals[interval].set_from(from);
                }
                self.process_environment(current, &mut live_in);
                if graph.instr(current).emitted_at_use_site {
                    debug_assert!(
                        self.locations[current]
                            .as_ref()
                            .map_or(true, |summary| summary.out().is_invalid()),
                        "{current} is emitted at its use site but has an output"
                    );
                } else {
                    self.process_inputs(current, &mut live_in);
                }
            }

            for phi in graph.block(block).phis.iter().copied() {
                if let Some(index) = self.instrs[phi].ssa_index {
                    kill.insert(index);
                    live_in.set(index, false);
                    let interval = self.expect_interval(phi);
                    self.intervals[interval].set_from(lifetime_start);
                }
            }

            if let Some(loop_info) = graph
                .loop_of(block)
                .filter(|loop_info| loop_info.header == block)
            {
                if self.config.check_invariants {
                    self.check_no_live_in_irreducible_loop(block, &live_in);
                }
                let loop_end = self.loop_lifetime_end(loop_info);
                for index in live_in.ones() {
                    let interval = self.expect_interval(self.instructions_from_ssa_index[index]);
                    self.intervals[interval].add_loop_range(lifetime_start, loop_end);
                }
            }

            debug!(
                "{block} live in: {{{}}}",
                live_in
                    .ones()
                    .map(|index| self.instructions_from_ssa_index[index])
                    .join(", ")
            );
            let info = &mut self.blocks[block];
            info.live_in = live_in;
            info.kill = kill;
        }
    }

    /// Records the environment uses of `holder`.
    ///
    /// Values the runtime may need while `holder` executes are made live.
    fn process_environment(&mut self, holder: InstrId, live_in: &mut FixedBitSet) {
        let graph = self.graph;
        for env in graph.environment_chain(holder) {
            for (slot, value) in env.slots.iter().enumerate() {
                let Some(value) = *value else {
                    continue;
                };
                let keep_alive = self.should_be_live_for_environment(holder, value);
                if keep_alive {
                    let index = self.instrs[value].ssa_index.unwrap_or_else(|| {
                        panic!("{value} must stay alive for {} but has no SSA index", env.id)
                    });
                    live_in.insert(index);
                }
                if self.instrs[value].interval.is_some() {
                    self.add_env_use(value, holder, env.id, slot, keep_alive);
                }
            }
        }
    }

    fn should_be_live_for_environment(&self, holder: InstrId, value: InstrId) -> bool {
        let graph = self.graph;
        graph.instr(holder).is_deoptimize()
            || graph.can_throw_into_catch_block(holder)
            || graph.is_debuggable()
            || graph.instr(value).ty.is_reference()
    }

    /// Records the uses of the inputs of `current`.
    ///
    /// Inputs emitted at their use site have no location of their own: their inputs are used
    /// by `current` instead.
    fn process_inputs(&mut self, current: InstrId, live_in: &mut FixedBitSet) {
        let graph = self.graph;
        let mut worklist = vec![current];
        while let Some(user) = worklist.pop() {
            for (input_index, input) in graph.instr(user).inputs.iter().copied().enumerate() {
                let has_in_location = self.locations[user]
                    .as_ref()
                    .map_or(false, |summary| summary.in_at(input_index).is_valid());
                let has_out_location = self.locations[input]
                    .as_ref()
                    .map_or(false, |summary| summary.out().is_valid());
                if has_in_location {
                    assert!(
                        has_out_location,
                        "{user} expects input {input_index} in a location but {input} produces no value"
                    );
                    self.add_use(input, user, input_index, current);
                    live_in.insert(self.expect_ssa_index(input));
                } else if !has_out_location {
                    let folded = graph.instr(input);
                    assert!(
                        folded.emitted_at_use_site,
                        "{input} has no output but is not emitted at its use site"
                    );
                    assert!(!folded.is_phi(), "Phi {input} cannot be emitted at its use site");
                    worklist.push(input);
                }
            }
        }
    }

    /// Records that input `input_index` of `user` reads `value` when `actual_user` executes.
    ///
    /// `actual_user` differs from `user` when `user` is emitted at its use site. Inputs the
    /// user pins to a location, or that share their register with the output, are used at the
    /// position of the user itself. All others are used right after it.
    pub fn add_use(
        &mut self,
        value: InstrId,
        user: InstrId,
        input_index: usize,
        actual_user: InstrId,
    ) {
        let graph = self.graph;
        let interval = self.expect_interval(value);
        let Some(summary) = self.locations[user].as_ref() else {
            return;
        };
        let mut position = self.lifetime_position(actual_user) + 1;
        if summary.is_fixed_input(input_index) || summary.output_uses_same_as(input_index) {
            assert_eq!(
                user, actual_user,
                "{user} is emitted at its use site but pins its input {input_index}"
            );
            position -= 1;
        } else if summary.in_at(input_index).is_invalid() {
            return;
        }
        let block = graph.instr(user).block;
        if graph.is_in_loop(block) {
            self.add_back_edge_uses(interval, value, block);
        }
        trace!("{value} is used by {user} at {position}");
        self.intervals
            .insert_use(interval, UsePosition::new(user, input_index, position));
        let start = self.blocks[block].lifetime_start;
        self.intervals[interval].add_range(start, position);
    }

    /// Records that `value` flows into input `input_index` of `phi` at the end of `predecessor`.
    ///
    /// No range is added. The value is live in `predecessor` through its live-in set.
    pub fn add_phi_use(
        &mut self,
        value: InstrId,
        phi: InstrId,
        input_index: usize,
        predecessor: BasicBlockId,
    ) {
        let interval = self.instrs[value]
            .interval
            .unwrap_or_else(|| panic!("Input {value} of phi {phi} has no interval"));
        if self.graph.is_in_loop(predecessor) {
            self.add_back_edge_uses(interval, value, predecessor);
        }
        let position = self.blocks[predecessor].lifetime_end;
        trace!("{value} flows into {phi} at {position}");
        self.intervals
            .insert_use(interval, UsePosition::new(phi, input_index, position));
    }

    fn add_env_use(
        &mut self,
        value: InstrId,
        holder: InstrId,
        env: EnvId,
        slot: usize,
        keep_alive: bool,
    ) {
        let interval = self.expect_interval(value);
        let position = self.lifetime_position(holder) + 1;
        self.intervals
            .insert_env_use(interval, EnvUsePosition { env, slot, position });
        if keep_alive {
            let start = self.blocks[self.graph.instr(holder).block].lifetime_start;
            self.intervals[interval].add_range(start, position);
        }
    }

    /// Adds a synthesized use at the end of every loop around `block` that `value` is live
    /// across, so the allocator keeps it alive over the back edge.
    fn add_back_edge_uses(&mut self, interval: IntervalId, value: InstrId, block: BasicBlockId) {
        let graph = self.graph;
        // The linear order of an irreducible loop may place its body before the header.
        if graph.has_irreducible_loops() {
            return;
        }
        let definition = self.lifetime_position(value);
        let first_use = self
            .intervals
            .uses(interval)
            .first()
            .map(|use_position| use_position.position);
        for loop_info in graph.loops_outward(block) {
            if definition >= self.blocks[loop_info.header].lifetime_start {
                break;
            }
            let back_edge_end = self.loop_lifetime_end(loop_info);
            if first_use.map_or(false, |first_use| first_use <= back_edge_end) {
                break;
            }
            trace!("{value} is used across the back edge of {} at {back_edge_end}", loop_info.id);
            self.intervals
                .insert_use(interval, UsePosition::synthesized(back_edge_end));
        }
    }

    /// Records that `temp` is used by `user`, the instruction that needs it.
    pub fn add_temp_use(&mut self, temp: IntervalId, user: InstrId, temp_index: usize) {
        let position = self.lifetime_position(user);
        self.intervals.add_temp_use(temp, user, temp_index, position);
    }

    fn compute_live_in_and_live_out_sets(&mut self) {
        let post_order = self.graph.post_order();
        let mut iterations = 0;
        loop {
            iterations += 1;
            let mut changed = false;
            for block in post_order.iter().copied() {
                // live_in only depends on live_out, the kill set is final.
                if self.update_live_out(block) && self.update_live_in(block) {
                    if self.config.check_invariants {
                        let live_in = self.blocks[block].live_in.clone();
                        self.check_no_live_in_irreducible_loop(block, &live_in);
                    }
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
        debug!("Live sets converged after {iterations} iterations");
    }

    fn update_live_out(&mut self, block: BasicBlockId) -> bool {
        let mut live_out = std::mem::take(&mut self.blocks[block].live_out);
        let before = live_out.count_ones(..);
        for successor in self.graph.successors(block) {
            live_out.union_with(&self.blocks[*successor].live_in);
        }
        let changed = live_out.count_ones(..) != before;
        self.blocks[block].live_out = live_out;
        changed
    }

    fn update_live_in(&mut self, block: BasicBlockId) -> bool {
        let info = &mut self.blocks[block];
        let mut incoming = info.live_out.clone();
        incoming.difference_with(&info.kill);
        let before = info.live_in.count_ones(..);
        info.live_in.union_with(&incoming);
        info.live_in.count_ones(..) != before
    }

    /// Only constants of the entry block may be live into the header of an irreducible loop.
    fn check_no_live_in_irreducible_loop(&self, block: BasicBlockId, live_in: &FixedBitSet) {
        let graph = self.graph;
        let Some(loop_info) = graph
            .loop_of(block)
            .filter(|loop_info| loop_info.header == block && loop_info.irreducible)
        else {
            return;
        };
        for index in live_in.ones() {
            let value = self.instructions_from_ssa_index[index];
            let instr = graph.instr(value);
            assert!(
                instr.is_constant() && instr.block == graph.entry_block(),
                "{value} is live into {block}, the header of irreducible {}",
                loop_info.id
            );
        }
    }

    fn expect_state(&self, state: LivenessState) {
        assert!(
            self.state >= state,
            "Liveness is {} but the query needs {state}",
            self.state
        );
    }

    fn expect_ssa_index(&self, instr: InstrId) -> usize {
        self.instrs[instr]
            .ssa_index
            .unwrap_or_else(|| panic!("{instr} has no SSA index"))
    }

    fn expect_interval(&self, instr: InstrId) -> IntervalId {
        self.instrs[instr]
            .interval
            .unwrap_or_else(|| panic!("{instr} has no live interval"))
    }

    pub const fn graph(&self) -> &'graph Graph {
        self.graph
    }

    pub const fn config(&self) -> LivenessConfig {
        self.config
    }

    pub const fn state(&self) -> LivenessState {
        self.state
    }

    pub fn linear_order(&self) -> &[BasicBlockId] {
        self.expect_state(LivenessState::Numbered);
        &self.linear_order
    }

    pub fn live_in(&self, block: BasicBlockId) -> &FixedBitSet {
        self.expect_state(LivenessState::Converged);
        &self.blocks[block].live_in
    }

    pub fn live_out(&self, block: BasicBlockId) -> &FixedBitSet {
        self.expect_state(LivenessState::Converged);
        &self.blocks[block].live_out
    }

    pub fn kill(&self, block: BasicBlockId) -> &FixedBitSet {
        self.expect_state(LivenessState::Converged);
        &self.blocks[block].kill
    }

    pub fn number_of_ssa_values(&self) -> usize {
        self.expect_state(LivenessState::Numbered);
        self.instructions_from_ssa_index.len()
    }

    pub fn instruction_from_ssa_index(&self, index: usize) -> InstrId {
        self.expect_state(LivenessState::Numbered);
        self.instructions_from_ssa_index[index]
    }

    /// The instruction at lifetime position `index * 2`, or `None` at a block start.
    pub fn instruction_from_position(&self, index: usize) -> Option<InstrId> {
        self.expect_state(LivenessState::Numbered);
        self.instructions_from_position[index]
    }

    pub fn block_from_position(&self, index: usize) -> BasicBlockId {
        self.expect_state(LivenessState::Numbered);
        self.blocks_from_position[index]
    }

    pub fn is_at_block_boundary(&self, index: usize) -> bool {
        self.instruction_from_position(index).is_none()
    }

    pub fn max_lifetime_position(&self) -> LifetimePosition {
        self.expect_state(LivenessState::Numbered);
        self.instructions_from_position.len() * 2 - 1
    }

    pub fn ssa_index(&self, instr: InstrId) -> Option<usize> {
        self.instrs[instr].ssa_index
    }

    pub fn lifetime_position(&self, instr: InstrId) -> LifetimePosition {
        self.instrs[instr]
            .position
            .unwrap_or_else(|| panic!("{instr} has not been numbered"))
    }

    pub fn block_lifetime_start(&self, block: BasicBlockId) -> LifetimePosition {
        self.expect_state(LivenessState::Numbered);
        self.blocks[block].lifetime_start
    }

    pub fn block_lifetime_end(&self, block: BasicBlockId) -> LifetimePosition {
        self.expect_state(LivenessState::Numbered);
        self.blocks[block].lifetime_end
    }

    /// End of the last back edge of `loop_info`.
    pub fn loop_lifetime_end(&self, loop_info: &LoopInformation) -> LifetimePosition {
        loop_info
            .back_edges
            .iter()
            .map(|back_edge| self.blocks[*back_edge].lifetime_end)
            .max()
            .unwrap_or_else(|| panic!("{} has no back edge", loop_info.id))
    }

    /// The parent interval of the value `instr` defines.
    pub fn interval_of(&self, instr: InstrId) -> Option<IntervalId> {
        self.instrs[instr].interval
    }

    pub fn locations(&self, instr: InstrId) -> Option<&LocationSummary> {
        self.locations[instr].as_ref()
    }

    pub fn locations_mut(&mut self, instr: InstrId) -> Option<&mut LocationSummary> {
        self.locations[instr].as_mut()
    }

    pub const fn location_table(&self) -> &LocationTable {
        &self.locations
    }

    pub const fn intervals(&self) -> &Intervals {
        &self.intervals
    }

    pub fn intervals_mut(&mut self) -> &mut Intervals {
        &mut self.intervals
    }

    /// The instruction a temp interval was created for.
    pub fn temp_user(&self, temp: IntervalId) -> InstrId {
        let interval = &self.intervals[temp];
        assert!(interval.is_temp(), "{temp} is not a temp interval");
        self.instruction_from_position(interval.start() / 2)
            .unwrap_or_else(|| panic!("Temp interval {temp} starts at a block boundary"))
    }

    /// Which temp of its user `temp` stands for.
    pub fn temp_index(&self, temp: IntervalId) -> usize {
        assert!(self.intervals[temp].is_temp(), "{temp} is not a temp interval");
        self.intervals
            .uses(temp)
            .first()
            .unwrap_or_else(|| panic!("Temp interval {temp} is not used"))
            .input_index
    }

    /// The sibling of an input of the defining instruction that holds the same register as
    /// `interval` where the definition happens.
    fn input_sibling_sharing_register(
        &self,
        interval: IntervalId,
    ) -> Option<(IntervalId, LifetimePosition)> {
        let this = &self.intervals[interval];
        if this.is_split() {
            return None;
        }
        let register = this.register()?;
        let definition = self.intervals.defined_by(interval)?;
        let position = self.lifetime_position(definition);
        self.graph
            .instr(definition)
            .inputs
            .iter()
            .filter_map(|input| self.interval_of(*input))
            .filter_map(|input| {
                self.intervals
                    .siblings(input)
                    .find(|sibling| self.intervals[*sibling].covers(position))
            })
            .find(|sibling| {
                let sibling = &self.intervals[*sibling];
                sibling.is_floating_point() == this.is_floating_point()
                    && sibling.register() == Some(register)
            })
            .map(|sibling| (sibling, position))
    }

    /// Whether the unsplit `interval` got the register of one of the inputs of its definition.
    pub fn is_using_input_register(&self, interval: IntervalId) -> bool {
        self.input_sibling_sharing_register(interval).is_some()
    }

    /// Whether sharing that input register is sound: the output may not overlap the inputs
    /// and the input dies at the definition.
    pub fn can_use_input_register(&self, interval: IntervalId) -> bool {
        let overlaps = self
            .intervals
            .defined_by(interval)
            .and_then(|definition| self.locations(definition))
            .map_or(true, LocationSummary::output_can_overlap_with_inputs);
        if overlaps {
            return false;
        }
        self.input_sibling_sharing_register(interval)
            .map_or(false, |(input, position)| !self.intervals[input].covers(position + 1))
    }
}

impl Display for SsaLivenessAnalysis<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for (index, instr) in self.instructions_from_ssa_index.iter().enumerate() {
            let Some(interval) = self.instrs[*instr].interval else {
                continue;
            };
            writeln!(
                f,
                "{index} {}: {}",
                self.graph.instr(*instr),
                self.intervals.display(interval)
            )?;
        }
        Ok(())
    }
}
