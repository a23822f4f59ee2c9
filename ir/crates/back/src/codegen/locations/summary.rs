use std::fmt::{
    Display,
    Formatter,
};

use fixedbitset::FixedBitSet;
use index_vec::IndexVec;
use smallvec::SmallVec;
use tern_middle::{
    Instr,
    InstrId,
};

use super::{
    Location,
    OutputOverlap,
    Policy,
    Reg,
};

/// Location summaries of a graph, indexed by instruction. `None` for instructions the code
/// generator does not need a summary for.
pub type LocationTable = IndexVec<InstrId, Option<LocationSummary>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CallKind {
    #[default]
    NoCall,
    CallOnMainAndSlowPath,
    CallOnSlowPath,
    CallOnMainOnly,
}

/// A set of core and floating point registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RegisterSet {
    core_registers: u32,
    floating_point_registers: u32,
}

impl RegisterSet {
    pub const fn empty() -> Self {
        Self {
            core_registers: 0,
            floating_point_registers: 0,
        }
    }

    pub const fn all_fpu() -> Self {
        Self {
            core_registers: 0,
            floating_point_registers: u32::MAX,
        }
    }

    /// Adds a register or both halves of a register pair.
    pub fn add(&mut self, location: Location) {
        match location {
            Location::Register(reg) => self.add_core(reg),
            Location::FpuRegister(reg) => self.add_fpu(reg),
            Location::RegisterPair { low, high } => {
                self.add_core(low);
                self.add_core(high);
            }
            Location::FpuRegisterPair { low, high } => {
                self.add_fpu(low);
                self.add_fpu(high);
            }
            other => panic!("Cannot add {other} to a register set"),
        }
    }

    pub fn remove(&mut self, location: Location) {
        match location {
            Location::Register(reg) => self.core_registers &= !bit(reg),
            Location::FpuRegister(reg) => self.floating_point_registers &= !bit(reg),
            other => panic!("Cannot remove {other} from a register set"),
        }
    }

    pub fn add_core(&mut self, reg: Reg) {
        self.core_registers |= bit(reg);
    }

    pub fn add_fpu(&mut self, reg: Reg) {
        self.floating_point_registers |= bit(reg);
    }

    pub fn contains_core(&self, reg: Reg) -> bool {
        self.core_registers & bit(reg) != 0
    }

    pub fn contains_fpu(&self, reg: Reg) -> bool {
        self.floating_point_registers & bit(reg) != 0
    }

    /// Whether every register of `location` is in the set.
    pub fn contains(&self, location: Location) -> bool {
        match location {
            Location::Register(reg) => self.contains_core(reg),
            Location::FpuRegister(reg) => self.contains_fpu(reg),
            Location::RegisterPair { low, high } => {
                self.contains_core(low) && self.contains_core(high)
            }
            Location::FpuRegisterPair { low, high } => {
                self.contains_fpu(low) && self.contains_fpu(high)
            }
            _ => false,
        }
    }

    pub const fn overlaps(&self, other: &Self) -> bool {
        self.core_registers & other.core_registers != 0
            || self.floating_point_registers & other.floating_point_registers != 0
    }

    pub const fn core_registers(&self) -> u32 {
        self.core_registers
    }

    pub const fn floating_point_registers(&self) -> u32 {
        self.floating_point_registers
    }

    pub const fn count(&self) -> u32 {
        self.core_registers.count_ones() + self.floating_point_registers.count_ones()
    }
}

fn bit(reg: Reg) -> u32 {
    assert!(reg < u32::BITS, "Register {reg} does not fit in a register set");
    1 << reg
}

/// The locations an instruction expects its inputs, temporaries and output in, plus what it
/// needs at a safepoint.
///
/// Built once by the code generator while instructions are numbered; the register allocator
/// later replaces the unallocated locations with the ones it picked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationSummary {
    inputs: SmallVec<[Location; 3]>,
    temps: SmallVec<[Location; 2]>,
    output: Location,
    output_overlaps: OutputOverlap,
    call_kind: CallKind,
    intrinsified: bool,
    has_custom_slow_path_calling_convention: bool,
    /// Stack slots holding references at the safepoint. Only present if the instruction can call.
    stack_mask: Option<FixedBitSet>,
    /// Registers holding references at the safepoint.
    register_mask: u32,
    live_registers: RegisterSet,
    custom_slow_path_caller_saves: RegisterSet,
}

impl LocationSummary {
    pub fn new(instr: &Instr, call_kind: CallKind) -> Self {
        Self::with_input_count(instr.inputs.len(), call_kind)
    }

    pub fn with_input_count(input_count: usize, call_kind: CallKind) -> Self {
        let stack_mask = (call_kind != CallKind::NoCall).then(|| FixedBitSet::with_capacity(0));
        Self {
            inputs: SmallVec::from_elem(Location::Invalid, input_count),
            temps: SmallVec::new(),
            output: Location::Invalid,
            output_overlaps: OutputOverlap::Overlap,
            call_kind,
            intrinsified: false,
            has_custom_slow_path_calling_convention: false,
            stack_mask,
            register_mask: 0,
            live_registers: RegisterSet::empty(),
            custom_slow_path_caller_saves: RegisterSet::empty(),
        }
    }

    pub fn set_in_at(&mut self, at: usize, location: Location) {
        self.inputs[at] = location;
    }

    pub fn in_at(&self, at: usize) -> Location {
        self.inputs[at]
    }

    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    pub fn inputs(&self) -> &[Location] {
        &self.inputs
    }

    /// Sets the output; the output of a summary is only set once.
    pub fn set_out(&mut self, location: Location) {
        self.set_out_with_overlap(location, OutputOverlap::Overlap);
    }

    pub fn set_out_with_overlap(&mut self, location: Location, overlaps: OutputOverlap) {
        assert!(
            self.output.is_invalid(),
            "Output was already set to {}",
            self.output
        );
        self.output_overlaps = overlaps;
        self.output = location;
    }

    /// Replaces an output that was only known approximately, such as the stack slot of a
    /// parameter before the frame size is known.
    pub fn update_out(&mut self, location: Location) {
        assert!(
            self.output.is_stack_slot()
                || self.output.is_double_stack_slot()
                || self.output.is_unallocated(),
            "Cannot update output {}",
            self.output
        );
        self.output = location;
    }

    pub const fn out(&self) -> Location {
        self.output
    }

    pub fn add_temp(&mut self, location: Location) {
        self.temps.push(location);
    }

    pub fn add_register_temps(&mut self, count: usize) {
        for _ in 0..count {
            self.add_temp(Location::requires_register());
        }
    }

    pub fn temp_at(&self, at: usize) -> Location {
        self.temps[at]
    }

    pub fn set_temp_at(&mut self, at: usize, location: Location) {
        assert!(
            self.temps[at].is_unallocated() || self.temps[at].is_invalid(),
            "Temp {at} was already allocated to {}",
            self.temps[at]
        );
        self.temps[at] = location;
    }

    pub fn temp_count(&self) -> usize {
        self.temps.len()
    }

    pub fn has_temps(&self) -> bool {
        !self.temps.is_empty()
    }

    pub const fn call_kind(&self) -> CallKind {
        self.call_kind
    }

    pub fn can_call(&self) -> bool {
        self.call_kind != CallKind::NoCall
    }

    pub const fn will_call(&self) -> bool {
        matches!(
            self.call_kind,
            CallKind::CallOnMainOnly | CallKind::CallOnMainAndSlowPath
        )
    }

    pub const fn calls_on_slow_path(&self) -> bool {
        matches!(
            self.call_kind,
            CallKind::CallOnSlowPath | CallKind::CallOnMainAndSlowPath
        )
    }

    pub const fn only_calls_on_slow_path(&self) -> bool {
        matches!(self.call_kind, CallKind::CallOnSlowPath)
    }

    pub const fn calls_on_main_and_slow_path(&self) -> bool {
        matches!(self.call_kind, CallKind::CallOnMainAndSlowPath)
    }

    pub fn needs_safepoint(&self) -> bool {
        self.can_call()
    }

    pub fn set_custom_slow_path_caller_saves(&mut self, caller_saves: RegisterSet) {
        assert!(
            self.only_calls_on_slow_path(),
            "Only summaries calling on the slow path only can have custom caller saves"
        );
        self.has_custom_slow_path_calling_convention = true;
        self.custom_slow_path_caller_saves = caller_saves;
    }

    pub const fn has_custom_slow_path_calling_convention(&self) -> bool {
        self.has_custom_slow_path_calling_convention
    }

    pub const fn custom_slow_path_caller_saves(&self) -> RegisterSet {
        self.custom_slow_path_caller_saves
    }

    pub fn set_stack_bit(&mut self, index: usize) {
        let mask = self
            .stack_mask
            .as_mut()
            .unwrap_or_else(|| panic!("A summary that cannot call has no stack mask"));
        mask.grow(index + 1);
        mask.insert(index);
    }

    pub fn clear_stack_bit(&mut self, index: usize) {
        let mask = self
            .stack_mask
            .as_mut()
            .unwrap_or_else(|| panic!("A summary that cannot call has no stack mask"));
        if index < mask.len() {
            mask.set(index, false);
        }
    }

    pub const fn stack_mask(&self) -> Option<&FixedBitSet> {
        self.stack_mask.as_ref()
    }

    pub fn set_register_bit(&mut self, reg: Reg) {
        self.register_mask |= bit(reg);
    }

    pub const fn register_mask(&self) -> u32 {
        self.register_mask
    }

    pub fn register_contains_object(&self, reg: Reg) -> bool {
        self.register_mask & bit(reg) != 0
    }

    pub fn add_live_register(&mut self, location: Location) {
        self.live_registers.add(location);
    }

    pub const fn live_registers(&self) -> &RegisterSet {
        &self.live_registers
    }

    pub fn live_registers_mut(&mut self) -> &mut RegisterSet {
        &mut self.live_registers
    }

    pub const fn number_of_live_registers(&self) -> u32 {
        self.live_registers.count()
    }

    pub fn output_uses_same_as(&self, input_index: usize) -> bool {
        input_index == 0 && self.output == Location::Unallocated(Policy::SameAsFirstInput)
    }

    /// Whether input `input_index` is pinned to a register, a register pair or a stack slot.
    pub fn is_fixed_input(&self, input_index: usize) -> bool {
        let input = self.inputs[input_index];
        input.is_register()
            || input.is_fpu_register()
            || input.is_pair()
            || input.is_stack_slot()
            || input.is_double_stack_slot()
    }

    pub fn output_can_overlap_with_inputs(&self) -> bool {
        self.output_overlaps == OutputOverlap::Overlap
    }

    pub const fn output_overlaps(&self) -> OutputOverlap {
        self.output_overlaps
    }

    pub fn set_intrinsified(&mut self, intrinsified: bool) {
        self.intrinsified = intrinsified;
    }

    pub const fn intrinsified(&self) -> bool {
        self.intrinsified
    }
}

impl Display for LocationSummary {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "(")?;
        for (index, input) in self.inputs.iter().enumerate() {
            if index > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{input}")?;
        }
        write!(f, ") -> {}", self.output)?;
        if !self.temps.is_empty() {
            write!(f, " temps: [")?;
            for (index, temp) in self.temps.iter().enumerate() {
                if index > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{temp}")?;
            }
            write!(f, "]")?;
        }
        if self.can_call() {
            write!(f, " {:?}", self.call_kind)?;
        }
        Ok(())
    }
}
