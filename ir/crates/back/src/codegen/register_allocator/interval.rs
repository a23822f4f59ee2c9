use std::{
    fmt::{
        Display,
        Formatter,
    },
    ops::{
        Index,
        IndexMut,
    },
};

use index_vec::IndexVec;
use smallvec::SmallVec;
use tern_middle::{
    EnvId,
    Graph,
    InstrId,
    Type,
};

use crate::codegen::{
    locations::{
        Location,
        LocationTable,
        Policy,
        Reg,
        VREG_SIZE,
    },
    CodeGenerator,
};

index_vec::define_index_type! {
    pub struct IntervalId = u32;

    DISPLAY_FORMAT = "i{}";
}

/// Position of a program point in the linear order.
///
/// Instructions sit on even positions. The odd position after an instruction is where its
/// inputs are read.
pub type LifetimePosition = usize;

/// The half open range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LiveRange {
    pub start: LifetimePosition,
    pub end: LifetimePosition,
}

impl LiveRange {
    pub fn new(start: LifetimePosition, end: LifetimePosition) -> Self {
        assert!(start < end, "Empty live range [{start},{end})");
        Self { start, end }
    }

    pub const fn length(&self) -> usize {
        self.end - self.start
    }

    pub const fn covers(&self, position: LifetimePosition) -> bool {
        self.start <= position && position < self.end
    }

    pub const fn is_before(&self, other: &Self) -> bool {
        self.end <= other.start
    }

    pub const fn intersects_with(&self, other: &Self) -> bool {
        self.start < other.end && other.start < self.end
    }
}

impl Display for LiveRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{},{})", self.start, self.end)
    }
}

/// A read of the value by input `input_index` of `user`.
///
/// Uses without a user are synthesized at the end of loops to keep a value alive across
/// the back edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UsePosition {
    pub user: Option<InstrId>,
    pub input_index: usize,
    pub position: LifetimePosition,
}

impl UsePosition {
    pub const fn new(user: InstrId, input_index: usize, position: LifetimePosition) -> Self {
        Self {
            user: Some(user),
            input_index,
            position,
        }
    }

    pub const fn synthesized(position: LifetimePosition) -> Self {
        Self {
            user: None,
            input_index: 0,
            position,
        }
    }

    pub const fn is_synthesized(&self) -> bool {
        self.user.is_none()
    }

    /// Whether the user reads the value from an unallocated register location.
    pub fn requires_register(&self, locations: &LocationTable) -> bool {
        let Some(user) = self.user else {
            return false;
        };
        locations[user].as_ref().map_or(false, |summary| {
            let location = summary.in_at(self.input_index);
            location.is_unallocated() && location.requires_register_kind()
        })
    }
}

/// A reference to the value from slot `slot` of an environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EnvUsePosition {
    pub env: EnvId,
    pub slot: usize,
    pub position: LifetimePosition,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SafepointPosition {
    pub instr: InstrId,
    pub position: LifetimePosition,
    /// The safepoint is a call on the main path.
    pub will_call: bool,
}

/// The lifetime of one SSA value, or of one split part of it.
///
/// A value starts with a single interval, its parent. Splitting creates siblings that cover
/// the later parts of the lifetime; they share the parent's uses, definition and spill slot.
#[derive(Debug, Clone)]
pub struct LiveInterval {
    id: IntervalId,
    parent: IntervalId,
    next_sibling: Option<IntervalId>,
    /// Sorted, disjoint and never adjacent.
    ranges: SmallVec<[LiveRange; 2]>,
    /// Sorted by position. Only populated on the parent.
    uses: Vec<UsePosition>,
    env_uses: Vec<EnvUsePosition>,
    safepoints: Vec<SafepointPosition>,
    ty: Type,
    register: Option<Reg>,
    spill_slot: Option<i32>,
    is_fixed: bool,
    is_temp: bool,
    is_high: bool,
    high_or_low: Option<IntervalId>,
    defined_by: Option<InstrId>,
}

impl LiveInterval {
    fn new(id: IntervalId, ty: Type) -> Self {
        Self {
            id,
            parent: id,
            next_sibling: None,
            ranges: SmallVec::new(),
            uses: Vec::new(),
            env_uses: Vec::new(),
            safepoints: Vec::new(),
            ty,
            register: None,
            spill_slot: None,
            is_fixed: false,
            is_temp: false,
            is_high: false,
            high_or_low: None,
            defined_by: None,
        }
    }

    pub const fn id(&self) -> IntervalId {
        self.id
    }

    pub const fn ty(&self) -> Type {
        self.ty
    }

    pub const fn parent(&self) -> IntervalId {
        self.parent
    }

    pub const fn next_sibling(&self) -> Option<IntervalId> {
        self.next_sibling
    }

    pub fn is_parent(&self) -> bool {
        self.parent == self.id
    }

    pub fn is_split(&self) -> bool {
        !self.is_parent() || self.next_sibling.is_some()
    }

    pub const fn is_fixed(&self) -> bool {
        self.is_fixed
    }

    pub const fn is_temp(&self) -> bool {
        self.is_temp
    }

    pub const fn is_floating_point(&self) -> bool {
        self.ty.is_floating_point()
    }

    pub const fn is_high_interval(&self) -> bool {
        self.is_high
    }

    pub const fn is_low_interval(&self) -> bool {
        !self.is_high && self.high_or_low.is_some()
    }

    pub const fn has_high_interval(&self) -> bool {
        self.is_low_interval()
    }

    pub const fn high_or_low_interval(&self) -> Option<IntervalId> {
        self.high_or_low
    }

    pub const fn register(&self) -> Option<Reg> {
        self.register
    }

    pub const fn has_register(&self) -> bool {
        self.register.is_some()
    }

    pub fn set_register(&mut self, reg: Reg) {
        self.register = Some(reg);
    }

    pub fn clear_register(&mut self) {
        assert!(!self.is_fixed, "Cannot clear the register of fixed interval {}", self.id);
        self.register = None;
    }

    pub fn ranges(&self) -> &[LiveRange] {
        &self.ranges
    }

    pub fn first_range(&self) -> Option<&LiveRange> {
        self.ranges.first()
    }

    pub fn last_range(&self) -> Option<&LiveRange> {
        self.ranges.last()
    }

    pub fn start(&self) -> LifetimePosition {
        self.first_range()
            .unwrap_or_else(|| panic!("Interval {} has no ranges", self.id))
            .start
    }

    pub fn end(&self) -> LifetimePosition {
        self.last_range()
            .unwrap_or_else(|| panic!("Interval {} has no ranges", self.id))
            .end
    }

    pub fn length(&self) -> usize {
        self.end() - self.start()
    }

    pub fn is_dead_at(&self, position: LifetimePosition) -> bool {
        self.end() <= position
    }

    pub fn is_defined_at(&self, position: LifetimePosition) -> bool {
        self.start() <= position && !self.is_dead_at(position)
    }

    pub fn covers(&self, position: LifetimePosition) -> bool {
        let index = self.ranges.partition_point(|range| range.end <= position);
        self.ranges
            .get(index)
            .map_or(false, |range| range.start <= position)
    }

    /// The first position covered by both intervals.
    pub fn first_intersection_with(&self, other: &Self) -> Option<LifetimePosition> {
        let (mut mine, mut theirs) = (0, 0);
        while let (Some(a), Some(b)) = (self.ranges.get(mine), other.ranges.get(theirs)) {
            if a.intersects_with(b) {
                return Some(a.start.max(b.start));
            }
            if a.is_before(b) {
                mine += 1;
            } else {
                theirs += 1;
            }
        }
        None
    }

    /// Adds `[start, end)`, merging it with every range it overlaps or touches.
    pub fn add_range(&mut self, start: LifetimePosition, end: LifetimePosition) {
        let new = LiveRange::new(start, end);
        let first = self.ranges.partition_point(|range| range.end < start);
        let last = self.ranges.partition_point(|range| range.start <= end);
        if first == last {
            self.ranges.insert(first, new);
            return;
        }
        let merged = LiveRange::new(
            start.min(self.ranges[first].start),
            end.max(self.ranges[last - 1].end),
        );
        self.ranges.drain(first + 1..last);
        self.ranges[first] = merged;
    }

    /// Makes the interval cover the loop `[start, end)` it is live into.
    ///
    /// Ranges ending inside the loop are absorbed.
    pub fn add_loop_range(&mut self, start: LifetimePosition, end: LifetimePosition) {
        assert!(
            !self.ranges.is_empty(),
            "Interval {} is live into a loop but has no ranges",
            self.id
        );
        debug_assert!(start <= self.start());
        let Some(after_loop) = self.ranges.iter().position(|range| range.end >= end) else {
            self.ranges.clear();
            self.ranges.push(LiveRange::new(start, end));
            return;
        };
        if self.ranges[after_loop].start <= end {
            self.ranges.drain(..after_loop);
            self.ranges[0].start = start;
        } else if after_loop == 0 {
            self.ranges.insert(0, LiveRange::new(start, end));
        } else {
            self.ranges.drain(..after_loop - 1);
            self.ranges[0] = LiveRange::new(start, end);
        }
    }

    /// Moves the start of the interval to the definition at `from`.
    ///
    /// A definition without any range is given a range of its own so that the value gets a
    /// location even when nothing reads it.
    pub fn set_from(&mut self, from: LifetimePosition) {
        match self.ranges.first_mut() {
            Some(first) => {
                debug_assert!(from < first.end, "{from} is past the first range of {}", self.id);
                first.start = from;
            }
            None => self.ranges.push(LiveRange::new(from, from + 2)),
        }
    }

    pub fn safepoints(&self) -> &[SafepointPosition] {
        &self.safepoints
    }

    pub fn add_safepoint(&mut self, instr: InstrId, position: LifetimePosition, will_call: bool) {
        if let Some(last) = self.safepoints.last() {
            assert!(
                last.position < position,
                "Safepoints of {} must be added in increasing order",
                self.id
            );
        }
        self.safepoints.push(SafepointPosition {
            instr,
            position,
            will_call,
        });
    }

    pub fn has_will_call_safepoint(&self) -> bool {
        self.safepoints.iter().any(|safepoint| safepoint.will_call)
    }

    pub fn find_safepoint_just_before(
        &self,
        position: LifetimePosition,
    ) -> Option<&SafepointPosition> {
        let index = self
            .safepoints
            .partition_point(|safepoint| safepoint.position < position);
        index.checked_sub(1).map(|index| &self.safepoints[index])
    }
}

/// Arena owning every interval of one analysis.
#[derive(Debug, Default, Clone)]
pub struct Intervals {
    intervals: IndexVec<IntervalId, LiveInterval>,
}

impl Index<IntervalId> for Intervals {
    type Output = LiveInterval;

    fn index(&self, index: IntervalId) -> &Self::Output {
        &self.intervals[index]
    }
}

impl IndexMut<IntervalId> for Intervals {
    fn index_mut(&mut self, index: IntervalId) -> &mut Self::Output {
        &mut self.intervals[index]
    }
}

impl Intervals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LiveInterval> {
        self.intervals.iter()
    }

    fn push(&mut self, ty: Type) -> IntervalId {
        let id = self.intervals.next_idx();
        self.intervals.push(LiveInterval::new(id, ty))
    }

    /// A new interval for the value defined by `defined_by`.
    pub fn make_interval(&mut self, ty: Type, defined_by: Option<InstrId>) -> IntervalId {
        let id = self.push(ty);
        self.intervals[id].defined_by = defined_by;
        id
    }

    /// An interval blocking the physical register `reg`.
    pub fn make_fixed_interval(&mut self, reg: Reg, ty: Type) -> IntervalId {
        let id = self.push(ty);
        let interval = &mut self.intervals[id];
        interval.register = Some(reg);
        interval.is_fixed = true;
        id
    }

    pub fn make_temp_interval(&mut self, ty: Type) -> IntervalId {
        let id = self.push(ty);
        self.intervals[id].is_temp = true;
        id
    }

    fn parent_of(&self, id: IntervalId) -> &LiveInterval {
        &self.intervals[self.intervals[id].parent]
    }

    /// The instruction defining the value, shared by all siblings.
    pub fn defined_by(&self, id: IntervalId) -> Option<InstrId> {
        self.parent_of(id).defined_by
    }

    pub fn uses(&self, id: IntervalId) -> &[UsePosition] {
        &self.parent_of(id).uses
    }

    pub fn env_uses(&self, id: IntervalId) -> &[EnvUsePosition] {
        &self.parent_of(id).env_uses
    }

    /// Records `use_position`, keeping the uses sorted.
    pub fn insert_use(&mut self, id: IntervalId, use_position: UsePosition) {
        let parent = self.intervals[id].parent;
        let uses = &mut self.intervals[parent].uses;
        let at = uses.partition_point(|existing| existing.position < use_position.position);
        uses.insert(at, use_position);
    }

    pub fn insert_env_use(&mut self, id: IntervalId, env_use: EnvUsePosition) {
        let parent = self.intervals[id].parent;
        let env_uses = &mut self.intervals[parent].env_uses;
        let at = env_uses.partition_point(|existing| existing.position < env_use.position);
        env_uses.insert(at, env_use);
    }

    /// A temp is used by a single instruction, at its position.
    pub fn add_temp_use(
        &mut self,
        id: IntervalId,
        user: InstrId,
        temp_index: usize,
        position: LifetimePosition,
    ) {
        assert!(self.intervals[id].is_temp, "{id} is not a temp interval");
        assert!(self.uses(id).is_empty(), "Temp interval {id} is already used");
        self.insert_use(id, UsePosition::new(user, temp_index, position));
        self.intervals[id].add_range(position, position + 1);
    }

    pub fn has_synthesized_use_at(&self, id: IntervalId, position: LifetimePosition) -> bool {
        self.uses(id)
            .iter()
            .any(|use_position| use_position.is_synthesized() && use_position.position == position)
    }

    pub fn spill_slot(&self, id: IntervalId) -> Option<i32> {
        self.parent_of(id).spill_slot
    }

    pub fn set_spill_slot(&mut self, id: IntervalId, slot: i32) {
        let parent = self.intervals[id].parent;
        let interval = &mut self.intervals[parent];
        assert!(!interval.is_fixed && !interval.is_temp, "{id} cannot be spilled");
        interval.spill_slot = Some(slot);
    }

    /// Whether the output of the defining instruction must be in a register.
    pub fn definition_requires_register(&self, id: IntervalId, locations: &LocationTable) -> bool {
        let Some(summary) = self
            .defined_by(id)
            .and_then(|instr| locations[instr].as_ref())
        else {
            return false;
        };
        let first_input_in_register = || {
            summary.input_count() > 0 && {
                let first = summary.in_at(0);
                first.is_register()
                    || first.is_fpu_register()
                    || first.is_pair()
                    || first.requires_register_kind()
            }
        };
        match summary.out() {
            Location::Unallocated(Policy::RequiresRegister | Policy::RequiresFpuRegister) => true,
            Location::Unallocated(Policy::SameAsFirstInput) => first_input_in_register(),
            Location::Register(_) | Location::RegisterPair { .. } => true,
            _ => false,
        }
    }

    pub fn first_register_use_after(
        &self,
        id: IntervalId,
        position: LifetimePosition,
        locations: &LocationTable,
    ) -> Option<LifetimePosition> {
        let interval = &self.intervals[id];
        if interval.is_temp {
            return (position == interval.start()).then_some(position);
        }
        if interval.is_parent()
            && position == interval.start()
            && self.definition_requires_register(id, locations)
        {
            return Some(position);
        }
        let end = interval.end();
        self.uses(id)
            .iter()
            .take_while(|use_position| use_position.position <= end)
            .find(|use_position| {
                use_position.position > position && use_position.requires_register(locations)
            })
            .map(|use_position| use_position.position)
    }

    pub fn first_register_use(
        &self,
        id: IntervalId,
        locations: &LocationTable,
    ) -> Option<LifetimePosition> {
        self.first_register_use_after(id, self.intervals[id].start(), locations)
    }

    pub fn first_use_after(
        &self,
        id: IntervalId,
        position: LifetimePosition,
    ) -> Option<LifetimePosition> {
        let interval = &self.intervals[id];
        if interval.is_temp {
            return (position == interval.start()).then_some(position);
        }
        if interval.is_parent() && position == interval.start() {
            return Some(position);
        }
        let end = interval.end();
        self.uses(id)
            .iter()
            .take_while(|use_position| use_position.position <= end)
            .find(|use_position| use_position.position > position)
            .map(|use_position| use_position.position)
    }

    /// Whether the interval has no register yet although some use needs one.
    pub fn requires_register(&self, id: IntervalId, locations: &LocationTable) -> bool {
        !self.intervals[id].has_register() && self.first_register_use(id, locations).is_some()
    }

    /// Splits the interval at `position` and returns the sibling covering the rest.
    ///
    /// Returns `None` if the interval ends before `position`. Splitting a low interval also
    /// splits its high half and links the two new siblings.
    pub fn split_at(&mut self, id: IntervalId, position: LifetimePosition) -> Option<IntervalId> {
        let interval = &self.intervals[id];
        assert!(!interval.is_temp, "Cannot split temp interval {id}");
        assert!(!interval.is_fixed, "Cannot split fixed interval {id}");
        assert!(!interval.is_high, "Split {id} through its low interval");
        assert!(
            position > interval.start(),
            "Cannot split {id} at {position}, which is not after its start"
        );
        if interval.end() <= position {
            return None;
        }
        let high = interval.high_or_low;
        let sibling = self.split_one(id, position);
        if let Some(high) = high {
            let high_sibling = self.split_one(high, position);
            self.intervals[sibling].high_or_low = Some(high_sibling);
            self.intervals[high_sibling].high_or_low = Some(sibling);
            self.intervals[high_sibling].is_high = true;
        }
        Some(sibling)
    }

    fn split_one(&mut self, id: IntervalId, position: LifetimePosition) -> IntervalId {
        let (ty, parent, next_sibling) = {
            let interval = &self.intervals[id];
            (interval.ty, interval.parent, interval.next_sibling)
        };
        let sibling = self.push(ty);
        let interval = &mut self.intervals[id];
        let first_after = interval
            .safepoints
            .partition_point(|safepoint| safepoint.position < position);
        let safepoints = interval.safepoints.split_off(first_after);

        let index = interval.ranges.partition_point(|range| range.end <= position);
        let ranges: SmallVec<[LiveRange; 2]> = if interval.ranges[index].start >= position {
            // In a lifetime hole.
            debug_assert!(index > 0);
            interval.ranges.drain(index..).collect()
        } else {
            let mut rest: SmallVec<[LiveRange; 2]> = interval.ranges.drain(index..).collect();
            let covering = rest[0];
            interval.ranges.push(LiveRange::new(covering.start, position));
            rest[0].start = position;
            rest
        };
        interval.next_sibling = Some(sibling);

        let new = &mut self.intervals[sibling];
        new.parent = parent;
        new.next_sibling = next_sibling;
        new.ranges = ranges;
        new.safepoints = safepoints;
        sibling
    }

    /// `id` followed by every later sibling.
    pub fn siblings(&self, id: IntervalId) -> impl Iterator<Item = IntervalId> + '_ {
        std::iter::successors(Some(id), |current| self.intervals[*current].next_sibling)
    }

    /// The sibling live at `position`, searching from `id` onward.
    pub fn sibling_at(&self, id: IntervalId, position: LifetimePosition) -> Option<IntervalId> {
        self.siblings(id)
            .take_while(|sibling| self.intervals[*sibling].start() <= position)
            .find(|sibling| self.intervals[*sibling].is_defined_at(position))
    }

    pub fn last_sibling(&self, id: IntervalId) -> IntervalId {
        self.siblings(id).last().unwrap_or(id)
    }

    pub fn location_at(
        &self,
        id: IntervalId,
        position: LifetimePosition,
        graph: &Graph,
    ) -> Location {
        self.sibling_at(id, position)
            .map_or(Location::Invalid, |sibling| self.to_location(sibling, graph))
    }

    pub fn number_of_spill_slots_needed(&self, id: IntervalId, graph: &Graph) -> usize {
        if let Some(definition) = self.defined_by(id).map(|instr| graph.instr(instr)) {
            let vector = if definition.is_phi() {
                definition
                    .inputs
                    .get(1)
                    .and_then(|input| graph.instr(*input).vector_bytes())
            } else {
                definition.vector_bytes()
            };
            if let Some(bytes) = vector {
                return bytes as usize / VREG_SIZE as usize;
            }
        }
        match self.intervals[id].ty {
            Type::Int64 | Type::Float64 => 2,
            _ => 1,
        }
    }

    /// Where the value lives for the span of this sibling.
    pub fn to_location(&self, id: IntervalId, graph: &Graph) -> Location {
        let interval = &self.intervals[id];
        assert!(!interval.is_high, "Ask the low interval of {id} for its location");
        if let Some(reg) = interval.register {
            let high = interval.high_or_low.map(|high| {
                self.intervals[high]
                    .register
                    .unwrap_or_else(|| panic!("High interval {high} of {id} has no register"))
            });
            return match (interval.is_floating_point(), high) {
                (true, Some(high)) => Location::FpuRegisterPair { low: reg, high },
                (true, None) => Location::FpuRegister(reg),
                (false, Some(high)) => Location::RegisterPair { low: reg, high },
                (false, None) => Location::Register(reg),
            };
        }
        if let Some(definition) = self.defined_by(id) {
            if graph.instr(definition).is_constant() {
                return Location::Constant(definition);
            }
        }
        let Some(slot) = self.spill_slot(id) else {
            return Location::Invalid;
        };
        match self.number_of_spill_slots_needed(id, graph) {
            1 => Location::StackSlot(slot),
            2 => Location::DoubleStackSlot(slot),
            4 => Location::SimdStackSlot(slot),
            count => panic!("Unexpected number of spill slots {count} for {id}"),
        }
    }

    /// Whether `location` is the kind of register this interval can be assigned.
    pub fn same_register_kind(&self, id: IntervalId, location: Location) -> bool {
        let interval = &self.intervals[id];
        let paired = interval.is_low_interval() || interval.is_high_interval();
        match (interval.is_floating_point(), paired) {
            (true, true) => location.is_fpu_register_pair(),
            (true, false) => location.is_fpu_register(),
            (false, true) => location.is_register_pair(),
            (false, false) => location.is_register(),
        }
    }

    /// Creates the high half of a value that needs a register pair.
    pub fn add_high_interval(&mut self, id: IntervalId, is_temp: bool) -> IntervalId {
        let low = &self.intervals[id];
        assert!(low.is_parent(), "{id} must not be split before adding a high interval");
        assert!(low.high_or_low.is_none(), "{id} already has a high or low interval");
        let mut high = low.clone();
        let high_id = self.intervals.next_idx();
        high.id = high_id;
        high.parent = high_id;
        high.next_sibling = None;
        high.safepoints.clear();
        high.register = None;
        high.spill_slot = None;
        high.is_fixed = false;
        high.is_temp = is_temp;
        high.is_high = true;
        high.high_or_low = Some(id);
        self.intervals.push(high);
        self.intervals[id].high_or_low = Some(high_id);
        high_id
    }

    pub fn display(&self, id: IntervalId) -> IntervalDisplay<'_> {
        IntervalDisplay {
            intervals: self,
            id,
            codegen: None,
        }
    }

    /// Like [`Intervals::display`], naming registers through `codegen`.
    pub fn display_with_context<'a>(
        &'a self,
        id: IntervalId,
        codegen: &'a dyn CodeGenerator,
    ) -> IntervalDisplay<'a> {
        IntervalDisplay {
            intervals: self,
            id,
            codegen: Some(codegen),
        }
    }
}

pub struct IntervalDisplay<'a> {
    intervals: &'a Intervals,
    id: IntervalId,
    codegen: Option<&'a dyn CodeGenerator>,
}

impl Display for IntervalDisplay<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let interval = &self.intervals[self.id];
        write!(f, "ranges: {{ ")?;
        for range in interval.ranges() {
            write!(f, "{range} ")?;
        }
        write!(f, "}}, uses: {{ ")?;
        let (start, end) = interval
            .first_range()
            .zip(interval.last_range())
            .map_or((0, 0), |(first, last)| (first.start, last.end));
        let in_sibling = |position: LifetimePosition| start <= position && position <= end;
        for use_position in self.intervals.uses(self.id) {
            if in_sibling(use_position.position) {
                write!(f, "{} ", use_position.position)?;
            }
        }
        write!(f, "}}, {{ ")?;
        for env_use in self.intervals.env_uses(self.id) {
            if in_sibling(env_use.position) {
                write!(f, "{} ", env_use.position)?;
            }
        }
        write!(
            f,
            "}}, is_fixed: {}, is_split: {}, is_low: {}, is_high: {}",
            interval.is_fixed(),
            interval.is_split(),
            interval.is_low_interval(),
            interval.is_high_interval()
        )?;
        let Some(codegen) = self.codegen else {
            return Ok(());
        };
        if let Some(reg) = interval.register() {
            let name = if interval.is_floating_point() {
                codegen.fpu_register_name(reg)
            } else {
                codegen.core_register_name(reg)
            };
            write!(f, ", register: {name}")?;
        }
        if let Some(slot) = self.intervals.spill_slot(self.id) {
            write!(f, ", spill_slot: {slot}")?;
        }
        if let Some(definition) = self.intervals.defined_by(self.id) {
            write!(f, ", defined_by: {definition}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tern_middle::{
        instruction::Const,
        GraphBuilder,
        InstrKind,
    };

    use super::*;
    use crate::codegen::targets::x86_64::X86_64LocationBuilder;

    fn interval_with(intervals: &mut Intervals, ranges: &[(usize, usize)]) -> IntervalId {
        let id = intervals.make_interval(Type::Int32, None);
        for (start, end) in ranges.iter().rev() {
            intervals[id].add_range(*start, *end);
        }
        id
    }

    fn ranges_of(interval: &LiveInterval) -> Vec<(usize, usize)> {
        interval
            .ranges()
            .iter()
            .map(|range| (range.start, range.end))
            .collect()
    }

    #[test]
    fn add_range_merges_overlapping_and_adjacent_ranges() {
        let inputs: [(&[(usize, usize)], (usize, usize), &[(usize, usize)]); 6] = [
            // Disjoint, before everything
            (&[(10, 12)], (2, 4), &[(2, 4), (10, 12)]),
            // Touching the following range
            (&[(10, 12)], (4, 10), &[(4, 12)]),
            // Swallowing several ranges
            (&[(4, 6), (8, 10), (14, 16)], (2, 12), &[(2, 12), (14, 16)]),
            // Inside an existing range
            (&[(2, 20)], (4, 6), &[(2, 20)]),
            // Bridging a hole
            (&[(2, 4), (8, 10)], (4, 8), &[(2, 10)]),
            // Disjoint, after everything
            (&[(2, 4)], (6, 8), &[(2, 4), (6, 8)]),
        ];
        for (existing, (start, end), expected) in inputs {
            let mut intervals = Intervals::new();
            let id = interval_with(&mut intervals, existing);
            intervals[id].add_range(start, end);
            assert_eq!(
                ranges_of(&intervals[id]),
                expected,
                "adding [{start},{end}) to {existing:?} should give {expected:?}"
            );
        }
    }

    #[test]
    fn add_loop_range_covers_the_whole_loop() {
        let inputs: [(&[(usize, usize)], (usize, usize), &[(usize, usize)]); 4] = [
            // Everything ends inside the loop
            (&[(10, 14), (16, 18)], (10, 30), &[(10, 30)]),
            // A range straddles the end of the loop
            (&[(10, 14), (28, 40)], (10, 30), &[(10, 40)]),
            // A range starts after the loop
            (&[(10, 14), (34, 40)], (10, 30), &[(10, 30), (34, 40)]),
            // A range ends exactly at the end of the loop
            (&[(10, 12), (20, 30), (40, 42)], (10, 30), &[(10, 30), (40, 42)]),
        ];
        for (existing, (start, end), expected) in inputs {
            let mut intervals = Intervals::new();
            let id = interval_with(&mut intervals, existing);
            intervals[id].add_loop_range(start, end);
            assert_eq!(
                ranges_of(&intervals[id]),
                expected,
                "loop [{start},{end}) over {existing:?} should give {expected:?}"
            );
        }
    }

    #[test]
    fn set_from_trims_or_creates_the_first_range() {
        let mut intervals = Intervals::new();
        let used = interval_with(&mut intervals, &[(0, 12), (16, 20)]);
        intervals[used].set_from(6);
        assert_eq!(ranges_of(&intervals[used]), vec![(6, 12), (16, 20)]);

        let unused = intervals.make_interval(Type::Int32, None);
        intervals[unused].set_from(8);
        assert_eq!(ranges_of(&intervals[unused]), vec![(8, 10)]);
    }

    #[test]
    fn position_queries() {
        let mut intervals = Intervals::new();
        let id = interval_with(&mut intervals, &[(2, 6), (10, 14)]);
        let interval = &intervals[id];
        let inputs = [
            (1, false, false, false),
            (2, true, true, false),
            (6, false, true, false),
            (8, false, true, false),
            (13, true, true, false),
            (14, false, false, true),
        ];
        for (position, covers, defined, dead) in inputs {
            assert_eq!(
                interval.covers(position),
                covers,
                "{interval:?} should cover {position}: {covers}"
            );
            assert_eq!(interval.is_defined_at(position), defined, "{position} defined: {defined}");
            assert_eq!(interval.is_dead_at(position), dead, "{position} dead: {dead}");
        }
        assert_eq!(interval.length(), 12);
    }

    #[test]
    fn first_intersection() {
        let inputs: [(&[(usize, usize)], &[(usize, usize)], Option<usize>); 4] = [
            (&[(2, 6)], &[(6, 10)], None),
            (&[(2, 6)], &[(4, 10)], Some(4)),
            (&[(2, 4), (12, 20)], &[(6, 10), (16, 18)], Some(16)),
            (&[(2, 4), (8, 10)], &[(4, 8), (10, 12)], None),
        ];
        for (a, b, expected) in inputs {
            let mut intervals = Intervals::new();
            let a_id = interval_with(&mut intervals, a);
            let b_id = interval_with(&mut intervals, b);
            let (a_interval, b_interval) = (&intervals[a_id], &intervals[b_id]);
            assert_eq!(
                a_interval.first_intersection_with(b_interval),
                expected,
                "{a:?} and {b:?} should first intersect at {expected:?}"
            );
            assert_eq!(b_interval.first_intersection_with(a_interval), expected);
        }
    }

    #[test]
    fn split_inside_a_range() {
        let mut intervals = Intervals::new();
        let id = interval_with(&mut intervals, &[(2, 10), (14, 20)]);
        intervals[id].add_safepoint(InstrId::new(0), 4, false);
        intervals[id].add_safepoint(InstrId::new(1), 8, true);
        intervals.insert_use(id, UsePosition::new(InstrId::new(2), 0, 9));

        let sibling = intervals.split_at(id, 6).unwrap();
        assert_eq!(ranges_of(&intervals[id]), vec![(2, 6)]);
        assert_eq!(ranges_of(&intervals[sibling]), vec![(6, 10), (14, 20)]);
        assert_eq!(intervals[sibling].parent(), id);
        assert!(intervals[id].is_split());
        assert!(intervals[sibling].is_split());
        assert_eq!(intervals[id].safepoints().len(), 1);
        assert!(intervals[sibling].has_will_call_safepoint());
        assert!(!intervals[id].has_will_call_safepoint());
        assert_eq!(intervals.uses(sibling), intervals.uses(id));

        assert_eq!(intervals.sibling_at(id, 3), Some(id));
        assert_eq!(intervals.sibling_at(id, 6), Some(sibling));
        assert_eq!(intervals.sibling_at(id, 12), Some(sibling));
        assert_eq!(intervals.sibling_at(id, 20), None);
        assert_eq!(intervals.last_sibling(id), sibling);
    }

    #[test]
    fn split_in_a_hole_and_past_the_end() {
        let mut intervals = Intervals::new();
        let id = interval_with(&mut intervals, &[(2, 6), (14, 20)]);
        assert_eq!(intervals.split_at(id, 20), None);

        let sibling = intervals.split_at(id, 10).unwrap();
        assert_eq!(ranges_of(&intervals[id]), vec![(2, 6)]);
        assert_eq!(ranges_of(&intervals[sibling]), vec![(14, 20)]);

        let last = intervals.split_at(sibling, 16).unwrap();
        let chain: Vec<_> = intervals.siblings(id).collect();
        assert_eq!(chain, vec![id, sibling, last]);
    }

    #[test]
    fn safepoint_just_before() {
        let mut intervals = Intervals::new();
        let id = interval_with(&mut intervals, &[(0, 40)]);
        for (index, position) in [6, 12, 20].into_iter().enumerate() {
            intervals[id].add_safepoint(InstrId::new(index), position, false);
        }
        let interval = &intervals[id];
        let before = |position| interval.find_safepoint_just_before(position).map(|s| s.position);
        assert_eq!(before(6), None);
        assert_eq!(before(7), Some(6));
        assert_eq!(before(20), Some(12));
        assert_eq!(before(30), Some(20));
    }

    #[test]
    fn locations_of_siblings() {
        let mut builder = GraphBuilder::new();
        let bb = builder.create_bb();
        let long = builder.parameter(bb, 0, Type::Int64);
        let int = builder.parameter(bb, 1, Type::Int32);
        let constant = builder.constant(bb, Const::Int(7));
        builder.add(bb, InstrKind::ReturnVoid, Type::Void, &[]);
        let graph = builder.finish();

        let mut intervals = Intervals::new();
        let long_interval = intervals.make_interval(Type::Int64, Some(long));
        intervals[long_interval].add_range(2, 20);
        intervals[long_interval].set_register(3);
        let spilled = intervals.split_at(long_interval, 10).unwrap();
        intervals.set_spill_slot(spilled, 16);

        assert_eq!(intervals.location_at(long_interval, 4, &graph), Location::Register(3));
        assert_eq!(
            intervals.location_at(long_interval, 12, &graph),
            Location::DoubleStackSlot(16)
        );
        assert_eq!(intervals.location_at(long_interval, 22, &graph), Location::Invalid);
        // Stable across calls
        assert_eq!(
            intervals.to_location(spilled, &graph),
            intervals.to_location(spilled, &graph)
        );

        let int_interval = intervals.make_interval(Type::Int32, Some(int));
        intervals[int_interval].add_range(4, 8);
        assert_eq!(intervals.to_location(int_interval, &graph), Location::Invalid);
        intervals.set_spill_slot(int_interval, 4);
        assert_eq!(intervals.to_location(int_interval, &graph), Location::StackSlot(4));

        let constant_interval = intervals.make_interval(Type::Int32, Some(constant));
        intervals[constant_interval].add_range(6, 8);
        assert_eq!(
            intervals.to_location(constant_interval, &graph),
            Location::Constant(constant)
        );
    }

    #[test]
    fn high_intervals_pair_their_registers() {
        let mut builder = GraphBuilder::new();
        let bb = builder.create_bb();
        let long = builder.parameter(bb, 0, Type::Int64);
        let user = builder.add(bb, InstrKind::Return, Type::Void, &[long]);
        let graph = builder.finish();

        let mut intervals = Intervals::new();
        let low = intervals.make_interval(Type::Int64, Some(long));
        intervals[low].add_range(2, 12);
        intervals.insert_use(low, UsePosition::new(user, 0, 5));
        let high = intervals.add_high_interval(low, false);
        assert!(intervals[low].is_low_interval());
        assert!(intervals[high].is_high_interval());
        assert_eq!(ranges_of(&intervals[high]), vec![(2, 12)]);
        assert_eq!(intervals.uses(high).len(), 1);
        assert!(intervals.same_register_kind(low, Location::RegisterPair { low: 0, high: 1 }));
        assert!(!intervals.same_register_kind(low, Location::Register(0)));

        intervals[low].set_register(0);
        intervals[high].set_register(2);
        assert_eq!(
            intervals.to_location(low, &graph),
            Location::RegisterPair { low: 0, high: 2 }
        );

        let sibling = intervals.split_at(low, 6).unwrap();
        let high_sibling = intervals[sibling].high_or_low_interval().unwrap();
        assert!(intervals[high_sibling].is_high_interval());
        assert_eq!(ranges_of(&intervals[high_sibling]), vec![(6, 12)]);
    }

    #[test]
    fn register_uses() {
        let mut builder = GraphBuilder::new();
        let bb = builder.create_bb();
        let array = builder.parameter(bb, 0, Type::Reference);
        let check = builder.add(bb, InstrKind::NullCheck, Type::Reference, &[array]);
        let length = builder.add(bb, InstrKind::ArrayLength, Type::Int32, &[array]);
        builder.add(bb, InstrKind::Return, Type::Void, &[length]);
        let graph = builder.finish();

        let mut codegen = X86_64LocationBuilder::new();
        let locations: LocationTable = graph
            .instructions
            .indices()
            .map(|instr| codegen.allocate_locations(&graph, instr))
            .collect();

        let mut intervals = Intervals::new();
        let id = intervals.make_interval(Type::Reference, Some(array));
        intervals[id].add_range(2, 8);
        intervals.insert_use(id, UsePosition::new(length, 0, 7));
        intervals.insert_use(id, UsePosition::new(check, 0, 5));
        intervals.insert_use(id, UsePosition::synthesized(8));

        let positions: Vec<_> = intervals.uses(id).iter().map(|u| u.position).collect();
        assert_eq!(positions, vec![5, 7, 8]);
        assert!(intervals.has_synthesized_use_at(id, 8));
        // The parameter arrives in a fixed register.
        assert!(intervals.definition_requires_register(id, &locations));
        assert_eq!(intervals.first_register_use(id, &locations), Some(2));
        assert_eq!(intervals.first_register_use_after(id, 3, &locations), Some(7));
        assert_eq!(intervals.first_register_use_after(id, 7, &locations), None);
        assert_eq!(intervals.first_use_after(id, 2), Some(2));
        assert_eq!(intervals.first_use_after(id, 5), Some(7));
        assert!(intervals.requires_register(id, &locations));
        intervals[id].set_register(7);
        assert!(!intervals.requires_register(id, &locations));
    }

    #[test]
    fn temps_live_for_one_position() {
        let mut intervals = Intervals::new();
        let temp = intervals.make_temp_interval(Type::Int32);
        intervals.add_temp_use(temp, InstrId::new(3), 1, 12);
        assert_eq!(ranges_of(&intervals[temp]), vec![(12, 13)]);
        assert_eq!(intervals.uses(temp)[0].input_index, 1);
        let locations = LocationTable::new();
        assert_eq!(intervals.first_register_use(temp, &locations), Some(12));
    }

    #[test]
    fn display() {
        let mut intervals = Intervals::new();
        let id = interval_with(&mut intervals, &[(2, 6)]);
        intervals.insert_use(id, UsePosition::new(InstrId::new(1), 0, 6));
        assert_eq!(
            intervals.display(id).to_string(),
            "ranges: { [2,6) }, uses: { 6 }, { }, is_fixed: false, is_split: false, is_low: false, is_high: false"
        );

        let codegen = X86_64LocationBuilder::new();
        intervals[id].set_register(0);
        intervals.set_spill_slot(id, 8);
        assert!(intervals
            .display_with_context(id, &codegen)
            .to_string()
            .ends_with(", register: RAX, spill_slot: 8"));
    }
}
