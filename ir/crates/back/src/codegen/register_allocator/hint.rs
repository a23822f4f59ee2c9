use tern_middle::InstrKind;

use crate::codegen::{
    locations::{
        Location,
        Policy,
        Reg,
    },
    register_allocator::{
        interval::{
            IntervalId,
            LifetimePosition,
        },
        SsaLivenessAnalysis,
    },
};

const fn register_or_low_register(location: Location) -> Option<Reg> {
    match location {
        Location::Register(reg) | Location::FpuRegister(reg) => Some(reg),
        Location::RegisterPair { low, .. } | Location::FpuRegisterPair { low, .. } => Some(low),
        _ => None,
    }
}

/// Picks a register for `interval` that is likely to save a move.
///
/// `free_until[reg]` is the position up to which `reg` is free. Candidates are, in order: the
/// register suggested by the definition, the register the value had at the end of a
/// predecessor when the interval starts a block, and the register a later user expects it in.
pub fn find_first_register_hint(
    interval: IntervalId,
    free_until: &[LifetimePosition],
    liveness: &SsaLivenessAnalysis,
) -> Option<Reg> {
    let graph = liveness.graph();
    let intervals = liveness.intervals();
    let this = &intervals[interval];
    if this.is_temp() || this.is_high_interval() {
        return None;
    }
    let is_free_until = |reg: Reg, position: LifetimePosition| free_until[reg as usize] >= position;
    let start = this.start();
    let end = this.end();

    if this.is_parent() && intervals.defined_by(interval).is_some() {
        if let Some(hint) = find_hint_at_definition(interval, liveness) {
            if free_until[hint as usize] > start {
                return Some(hint);
            }
        }
    }

    if this.is_split() && liveness.is_at_block_boundary(start / 2) {
        let block = liveness.block_from_position(start / 2);
        let next_register_use = intervals
            .first_register_use(interval, liveness.location_table())
            .unwrap_or(LifetimePosition::MAX);
        for predecessor in graph.predecessors(block) {
            let position = liveness.block_lifetime_end(*predecessor) - 1;
            // Siblings after this one have no location yet.
            if position >= start {
                continue;
            }
            let existing = intervals
                .sibling_at(this.parent(), position)
                .and_then(|sibling| intervals[sibling].register());
            if let Some(reg) = existing {
                if is_free_until(reg, next_register_use) {
                    return Some(reg);
                }
            }
        }
    }

    for use_position in intervals.uses(interval) {
        if use_position.position > end {
            break;
        }
        let Some(user) = use_position.user else {
            continue;
        };
        if use_position.position < start {
            continue;
        }
        let user_instr = graph.instr(user);
        if user_instr.is_phi() {
            let phi_location = liveness
                .interval_of(user)
                .map_or(Location::Invalid, |phi| intervals.to_location(phi, graph));
            if let Some(reg) = register_or_low_register(phi_location) {
                if is_free_until(reg, use_position.position) {
                    return Some(reg);
                }
            }
            // The value dies at the phi, so a register of another input may be reused.
            let predecessors = graph.predecessors(user_instr.block);
            let dies_at_phi =
                end == liveness.block_lifetime_end(predecessors[use_position.input_index]);
            if !dies_at_phi {
                continue;
            }
            for (index, input) in user_instr.inputs.iter().enumerate() {
                if index == use_position.input_index {
                    continue;
                }
                let Some(input_interval) = liveness.interval_of(*input) else {
                    continue;
                };
                let position = liveness.block_lifetime_end(predecessors[index]) - 1;
                let location = intervals.location_at(input_interval, position, graph);
                if let Some(reg) = register_or_low_register(location) {
                    if is_free_until(reg, use_position.position) {
                        return Some(reg);
                    }
                }
            }
        } else {
            let Some(summary) = liveness.locations(user) else {
                continue;
            };
            let expected = summary.in_at(use_position.input_index);
            // The register is blocked from the start of the user on.
            let position = liveness.lifetime_position(user) - 1;
            if let Some(reg) = register_or_low_register(expected) {
                if is_free_until(reg, position) {
                    return Some(reg);
                }
            }
        }
    }
    None
}

/// The register of an input whose interval ends where `interval` is defined.
pub fn find_hint_at_definition(
    interval: IntervalId,
    liveness: &SsaLivenessAnalysis,
) -> Option<Reg> {
    let graph = liveness.graph();
    let intervals = liveness.intervals();
    let this = &intervals[interval];
    if this.is_temp() || this.is_high_interval() {
        return None;
    }
    let definition = graph.instr(intervals.defined_by(interval)?);
    match definition.kind {
        InstrKind::Phi => {
            // Catch phi inputs arrive through the runtime.
            if graph.block(definition.block).is_catch_block {
                return None;
            }
            let predecessors = graph.predecessors(definition.block);
            definition
                .inputs
                .iter()
                .enumerate()
                .find_map(|(index, input)| {
                    let end = liveness.block_lifetime_end(predecessors[index]);
                    let input_interval = liveness.interval_of(*input)?;
                    let sibling = intervals.sibling_at(input_interval, end - 1)?;
                    if intervals[sibling].end() != end {
                        return None;
                    }
                    register_or_low_register(intervals.to_location(sibling, graph))
                })
        }
        _ => {
            let summary = liveness.locations(definition.id)?;
            if summary.out() != Location::Unallocated(Policy::SameAsFirstInput) {
                return None;
            }
            let start = this.start();
            let input_interval = liveness.interval_of(definition.input_at(0))?;
            let sibling = intervals.sibling_at(input_interval, start - 1)?;
            if intervals[sibling].end() != start {
                return None;
            }
            register_or_low_register(intervals.to_location(sibling, graph))
        }
    }
}

#[cfg(test)]
mod tests {
    use tracing_test::traced_test;

    use super::*;
    use crate::{
        codegen::targets::x86_64::PhysicalRegister,
        test::{
            analyze,
            create_diamond,
            create_loop,
        },
    };

    const NO_REGISTER_BUSY: [LifetimePosition; 16] = [LifetimePosition::MAX; 16];

    #[test]
    #[traced_test]
    fn phi_reuses_the_register_of_an_input_dying_at_the_edge() {
        let (graph, values) = create_loop();
        let mut liveness = analyze(&graph);
        let zero = liveness.interval_of(values.zero).unwrap();
        let i = liveness.interval_of(values.i).unwrap();
        assert_eq!(find_hint_at_definition(i, &liveness), None);

        liveness.intervals_mut()[zero].set_register(3);
        assert_eq!(find_hint_at_definition(i, &liveness), Some(3));
        assert_eq!(find_first_register_hint(i, &NO_REGISTER_BUSY, &liveness), Some(3));

        let mut busy = NO_REGISTER_BUSY;
        busy[3] = 8;
        assert_ne!(find_first_register_hint(i, &busy, &liveness), Some(3));
    }

    #[test]
    #[traced_test]
    fn same_as_first_input_reuses_the_register_of_its_input() {
        let (graph, values) = create_loop();
        let mut liveness = analyze(&graph);
        let i = liveness.interval_of(values.i).unwrap();
        let next = liveness.interval_of(values.next).unwrap();
        liveness.intervals_mut()[i].set_register(5);
        // `i` is still live after `next` across the back edge.
        assert_eq!(find_hint_at_definition(next, &liveness), None);

        let sibling = liveness.intervals_mut().split_at(i, 20).unwrap();
        assert_eq!(find_hint_at_definition(next, &liveness), Some(5));
        assert_eq!(liveness.intervals()[sibling].start(), 22);
    }

    #[test]
    #[traced_test]
    fn split_at_block_start_reuses_the_register_of_a_predecessor() {
        let (graph, values) = create_loop();
        let mut liveness = analyze(&graph);
        let i = liveness.interval_of(values.i).unwrap();
        let sibling = liveness.intervals_mut().split_at(i, 20).unwrap();
        liveness.intervals_mut()[i].set_register(5);
        assert_eq!(find_first_register_hint(sibling, &NO_REGISTER_BUSY, &liveness), Some(5));

        // Falls back to the register the return expects its input in.
        let mut busy = NO_REGISTER_BUSY;
        busy[5] = 0;
        assert_eq!(
            find_first_register_hint(sibling, &busy, &liveness),
            Some(PhysicalRegister::RAX.id())
        );
    }

    #[test]
    #[traced_test]
    fn input_dying_at_a_phi_takes_the_register_of_another_input() {
        let (graph, values) = create_diamond();
        let mut liveness = analyze(&graph);
        let a = liveness.interval_of(values.a).unwrap();
        let zero = liveness.interval_of(values.zero).unwrap();
        // The constant flowing in from `otherwise` sits in a register at the end of that block.
        liveness.intervals_mut()[zero].set_register(7);
        let sibling = liveness.intervals_mut().split_at(a, 14).unwrap();
        assert_eq!(find_first_register_hint(sibling, &NO_REGISTER_BUSY, &liveness), Some(7));

        let mut busy = NO_REGISTER_BUSY;
        busy[7] = 10;
        assert_eq!(find_first_register_hint(sibling, &busy, &liveness), None);
    }

    #[test]
    #[traced_test]
    fn temps_get_no_hint() {
        let (graph, values) = create_loop();
        let mut liveness = analyze(&graph);
        let temp = liveness
            .intervals_mut()
            .make_temp_interval(tern_middle::Type::Int32);
        liveness.add_temp_use(temp, values.next, 0);
        assert_eq!(find_first_register_hint(temp, &NO_REGISTER_BUSY, &liveness), None);
        assert_eq!(find_hint_at_definition(temp, &liveness), None);
    }
}
