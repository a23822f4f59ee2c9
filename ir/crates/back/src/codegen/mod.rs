use tern_middle::{
    Graph,
    InstrId,
};

use crate::codegen::locations::{
    LocationSummary,
    Reg,
};

pub mod locations;
pub mod register_allocator;
pub mod targets;

/// The architecture specific side of register allocation.
pub trait CodeGenerator {
    /// Called before the locations of any instruction of `graph` are requested.
    fn start_graph(&mut self, _graph: &Graph) {}

    /// Picks the locations `instr` expects its inputs and output in.
    ///
    /// Returns `None` for instructions that need no locations at all.
    fn allocate_locations(&mut self, graph: &Graph, instr: InstrId) -> Option<LocationSummary>;

    fn number_of_core_registers(&self) -> usize;

    fn number_of_fpu_registers(&self) -> usize;

    fn core_register_name(&self, reg: Reg) -> &'static str;

    fn fpu_register_name(&self, reg: Reg) -> &'static str;
}
