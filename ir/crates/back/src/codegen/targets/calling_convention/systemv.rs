use tern_middle::Type;

use crate::codegen::targets::{
    calling_convention::{
        CallingConvention,
        Slot,
    },
    x86_64::{
        FpuRegister,
        PhysicalRegister,
    },
};

const CORE_ARGUMENT_REGISTERS: [PhysicalRegister; 6] = [
    PhysicalRegister::RDI,
    PhysicalRegister::RSI,
    PhysicalRegister::RDX,
    PhysicalRegister::RCX,
    PhysicalRegister::R8,
    PhysicalRegister::R9,
];

const FPU_ARGUMENT_REGISTERS: [FpuRegister; 8] = [
    FpuRegister::XMM0,
    FpuRegister::XMM1,
    FpuRegister::XMM2,
    FpuRegister::XMM3,
    FpuRegister::XMM4,
    FpuRegister::XMM5,
    FpuRegister::XMM6,
    FpuRegister::XMM7,
];

/// Every stack argument takes one eight byte slot.
const STACK_SLOT_SIZE: i32 = 8;

#[derive(Default)]
pub struct SystemV;

impl CallingConvention for SystemV {
    type Reg = PhysicalRegister;
    type FpuReg = FpuRegister;

    fn parameter_slots(
        params: impl Iterator<Item = Type>,
    ) -> impl Iterator<Item = Slot<Self::Reg, Self::FpuReg>> {
        let mut used_core = 0;
        let mut used_fpu = 0;
        let mut stack_offset = 0;
        params.map(move |ty| {
            if ty.is_floating_point() && used_fpu < FPU_ARGUMENT_REGISTERS.len() {
                used_fpu += 1;
                return Slot::FpuRegister(FPU_ARGUMENT_REGISTERS[used_fpu - 1]);
            }
            if !ty.is_floating_point() && used_core < CORE_ARGUMENT_REGISTERS.len() {
                used_core += 1;
                return Slot::Register(CORE_ARGUMENT_REGISTERS[used_core - 1]);
            }
            let offset = stack_offset;
            stack_offset += STACK_SLOT_SIZE;
            Slot::Stack { offset, ty }
        })
    }

    fn return_slot(ty: Type) -> Option<Slot<Self::Reg, Self::FpuReg>> {
        match ty {
            Type::Void => None,
            ty if ty.is_floating_point() => Some(Slot::FpuRegister(FpuRegister::XMM0)),
            _ => Some(Slot::Register(PhysicalRegister::RAX)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parameters_fill_registers_by_class_then_the_stack() {
        let params = [
            Type::Int32,
            Type::Float64,
            Type::Reference,
            Type::Int64,
            Type::Int32,
            Type::Int32,
            Type::Int32,
            Type::Int64,
            Type::Float32,
        ];
        let slots: Vec<_> = SystemV::parameter_slots(params.into_iter()).collect();
        assert_eq!(
            slots,
            vec![
                Slot::Register(PhysicalRegister::RDI),
                Slot::FpuRegister(FpuRegister::XMM0),
                Slot::Register(PhysicalRegister::RSI),
                Slot::Register(PhysicalRegister::RDX),
                Slot::Register(PhysicalRegister::RCX),
                Slot::Register(PhysicalRegister::R8),
                Slot::Register(PhysicalRegister::R9),
                Slot::Stack {
                    offset: 0,
                    ty: Type::Int64
                },
                Slot::FpuRegister(FpuRegister::XMM1),
            ]
        );
    }

    #[test]
    fn return_slot_by_type() {
        assert_eq!(SystemV::return_slot(Type::Void), None);
        assert_eq!(
            SystemV::return_slot(Type::Float32),
            Some(Slot::FpuRegister(FpuRegister::XMM0))
        );
        assert_eq!(
            SystemV::return_slot(Type::Reference),
            Some(Slot::Register(PhysicalRegister::RAX))
        );
    }
}
