use rustc_hash::FxHashMap;
use strum::{
    IntoStaticStr,
    VariantArray,
};
use tern_middle::{
    Graph,
    InstrId,
    InstrKind,
    Type,
};
use tracing::trace;

use crate::codegen::{
    locations::{
        CallKind,
        Location,
        LocationSummary,
        Reg,
        RegisterSet,
    },
    targets::calling_convention::{
        systemv::SystemV,
        CallingConvention,
        Slot,
    },
    CodeGenerator,
};

/// General purpose registers, in hardware encoding order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoStaticStr, VariantArray)]
pub enum PhysicalRegister {
    RAX,
    RCX,
    RDX,
    RBX,
    RSP,
    RBP,
    RSI,
    RDI,
    R8,
    R9,
    R10,
    R11,
    R12,
    R13,
    R14,
    R15,
}

impl PhysicalRegister {
    pub const fn id(self) -> Reg {
        self as Reg
    }

    pub fn from_id(reg: Reg) -> Option<Self> {
        Self::VARIANTS.get(usize::try_from(reg).ok()?).copied()
    }

    pub fn name(self) -> &'static str {
        self.into()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoStaticStr, VariantArray)]
pub enum FpuRegister {
    XMM0,
    XMM1,
    XMM2,
    XMM3,
    XMM4,
    XMM5,
    XMM6,
    XMM7,
    XMM8,
    XMM9,
    XMM10,
    XMM11,
    XMM12,
    XMM13,
    XMM14,
    XMM15,
}

impl FpuRegister {
    pub const fn id(self) -> Reg {
        self as Reg
    }

    pub fn from_id(reg: Reg) -> Option<Self> {
        Self::VARIANTS.get(usize::try_from(reg).ok()?).copied()
    }

    pub fn name(self) -> &'static str {
        self.into()
    }
}

impl From<Slot<PhysicalRegister, FpuRegister>> for Location {
    fn from(slot: Slot<PhysicalRegister, FpuRegister>) -> Self {
        match slot {
            Slot::Register(reg) => Self::Register(reg.id()),
            Slot::FpuRegister(reg) => Self::FpuRegister(reg.id()),
            Slot::Stack { offset, ty } if ty.is_64bit() => Self::DoubleStackSlot(offset),
            Slot::Stack { offset, .. } => Self::StackSlot(offset),
        }
    }
}

/// Picks x86-64 locations for every instruction of a graph.
///
/// Parameter locations are cached for the graph passed to `start_graph`, or for the first graph
/// asked about when `start_graph` was never called.
#[derive(Debug, Default)]
pub struct X86_64LocationBuilder {
    parameter_locations: Option<FxHashMap<InstrId, Location>>,
}

impl X86_64LocationBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn parameter_location(&mut self, graph: &Graph, instr: InstrId) -> Location {
        let locations = self
            .parameter_locations
            .get_or_insert_with(|| Self::compute_parameter_locations(graph));
        locations
            .get(&instr)
            .copied()
            .unwrap_or_else(|| panic!("{instr} is not a parameter of the entry block"))
    }

    fn compute_parameter_locations(graph: &Graph) -> FxHashMap<InstrId, Location> {
        let mut parameters: Vec<(u32, InstrId)> = graph
            .block(graph.entry_block())
            .instructions
            .iter()
            .filter_map(|id| match graph.instr(*id).kind {
                InstrKind::Parameter { index } => Some((index, *id)),
                _ => None,
            })
            .collect();
        parameters.sort_unstable();
        let slots = SystemV::parameter_slots(
            parameters
                .iter()
                .map(|(_, id)| graph.instr(*id).ty),
        );
        parameters
            .iter()
            .zip(slots)
            .map(|((_, id), slot)| (*id, Location::from(slot)))
            .collect()
    }

    /// A condition feeding a branch is materialized unless it is folded into the branch.
    fn is_materialized_condition(graph: &Graph, condition: InstrId) -> bool {
        !graph.instr(condition).emitted_at_use_site
    }

    /// Summary of a check that throws from its slow path.
    fn throwing_slow_path_summary(graph: &Graph, instr: InstrId) -> LocationSummary {
        let mut summary = LocationSummary::new(graph.instr(instr), CallKind::CallOnSlowPath);
        if !graph.can_throw_into_catch_block(instr) {
            summary.set_custom_slow_path_caller_saves(RegisterSet::empty());
        }
        summary
    }

    const fn register_for(ty: Type) -> Location {
        if ty.is_floating_point() {
            Location::requires_fpu_register()
        } else {
            Location::requires_register()
        }
    }
}

impl CodeGenerator for X86_64LocationBuilder {
    fn start_graph(&mut self, graph: &Graph) {
        self.parameter_locations = Some(Self::compute_parameter_locations(graph));
    }

    fn allocate_locations(&mut self, graph: &Graph, id: InstrId) -> Option<LocationSummary> {
        let instr = graph.instr(id);
        let mut summary = LocationSummary::new(instr, CallKind::NoCall);
        match instr.kind {
            InstrKind::Constant(_) => summary.set_out(Location::Constant(id)),
            InstrKind::Parameter { .. } => {
                summary.set_out(self.parameter_location(graph, id));
            }
            InstrKind::Phi => {
                for index in 0..instr.inputs.len() {
                    summary.set_in_at(index, Location::any());
                }
                summary.set_out(Location::any());
            }
            InstrKind::Binary(_) => {
                summary.set_in_at(0, Self::register_for(instr.ty));
                summary.set_in_at(1, Location::any());
                summary.set_out(Location::same_as_first_input());
            }
            InstrKind::Condition(_) => {
                let lhs = graph.instr(instr.input_at(0));
                summary.set_in_at(0, Self::register_for(lhs.ty));
                summary.set_in_at(1, Location::any());
                if !instr.emitted_at_use_site {
                    summary.set_out(Location::requires_register());
                }
            }
            InstrKind::If => {
                if let Some(condition) = instr.inputs.first().copied() {
                    if Self::is_materialized_condition(graph, condition) {
                        summary.set_in_at(0, Location::any());
                    }
                }
            }
            InstrKind::Return => {
                let value = graph.instr(instr.input_at(0));
                let slot = SystemV::return_slot(value.ty)
                    .unwrap_or_else(|| panic!("{id} returns {value}, which has no value"));
                summary.set_in_at(0, Location::from(slot));
            }
            InstrKind::ReturnVoid | InstrKind::Goto | InstrKind::Exit => {}
            InstrKind::NullCheck => {
                summary = Self::throwing_slow_path_summary(graph, id);
                summary.set_in_at(0, Location::any());
                if graph.has_uses(id) || graph.has_environment_uses(id) {
                    summary.set_out(Location::same_as_first_input());
                }
            }
            InstrKind::BoundsCheck => {
                summary = Self::throwing_slow_path_summary(graph, id);
                summary.set_in_at(0, Location::requires_register());
                summary.set_in_at(1, Location::any());
                if graph.has_uses(id) || graph.has_environment_uses(id) {
                    summary.set_out(Location::same_as_first_input());
                }
            }
            InstrKind::ArrayLength => {
                summary.set_in_at(0, Location::requires_register());
                summary.set_out(Location::requires_register());
            }
            InstrKind::ArrayGet => {
                summary.set_in_at(0, Location::requires_register());
                summary.set_in_at(1, Location::any());
                summary.set_out(Self::register_for(instr.ty));
            }
            InstrKind::ArraySet => {
                let value = graph.instr(instr.input_at(2));
                let needs_write_barrier = value.ty.is_reference();
                if needs_write_barrier {
                    summary = LocationSummary::new(instr, CallKind::CallOnSlowPath);
                }
                summary.set_in_at(0, Location::requires_register());
                summary.set_in_at(1, Location::any());
                summary.set_in_at(2, Self::register_for(value.ty));
                if needs_write_barrier {
                    summary.add_register_temps(2);
                }
            }
            InstrKind::Deoptimize => {
                summary = LocationSummary::new(instr, CallKind::CallOnSlowPath);
                summary.set_custom_slow_path_caller_saves(RegisterSet::empty());
                if let Some(condition) = instr.inputs.first().copied() {
                    if Self::is_materialized_condition(graph, condition) {
                        summary.set_in_at(0, Location::any());
                    }
                }
            }
            InstrKind::InvokeStatic => {
                summary = LocationSummary::new(instr, CallKind::CallOnMainOnly);
                let arguments = instr.inputs.iter().map(|input| graph.instr(*input).ty);
                for (index, slot) in SystemV::parameter_slots(arguments).enumerate() {
                    summary.set_in_at(index, Location::from(slot));
                }
                if let Some(slot) = SystemV::return_slot(instr.ty) {
                    summary.set_out(Location::from(slot));
                }
            }
            InstrKind::SuspendCheck => {
                summary = LocationSummary::new(instr, CallKind::CallOnSlowPath);
                summary.set_custom_slow_path_caller_saves(RegisterSet::empty());
            }
            InstrKind::Throw => {
                summary = LocationSummary::new(instr, CallKind::CallOnMainOnly);
                summary.set_in_at(0, Location::Register(PhysicalRegister::RDI.id()));
            }
            InstrKind::VecOp { .. } => {
                for index in 0..instr.inputs.len() {
                    summary.set_in_at(index, Location::requires_fpu_register());
                }
                summary.set_out(Location::requires_fpu_register());
            }
        }
        trace!("Locations of {id}: {summary}");
        Some(summary)
    }

    fn number_of_core_registers(&self) -> usize {
        PhysicalRegister::VARIANTS.len()
    }

    fn number_of_fpu_registers(&self) -> usize {
        FpuRegister::VARIANTS.len()
    }

    fn core_register_name(&self, reg: Reg) -> &'static str {
        PhysicalRegister::from_id(reg).map_or("<invalid>", PhysicalRegister::name)
    }

    fn fpu_register_name(&self, reg: Reg) -> &'static str {
        FpuRegister::from_id(reg).map_or("<invalid>", FpuRegister::name)
    }
}
