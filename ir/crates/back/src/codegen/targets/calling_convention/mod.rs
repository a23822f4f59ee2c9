use tern_middle::Type;

pub mod systemv;

/// Where a parameter or return value is passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot<R, F> {
    Register(R),
    FpuRegister(F),
    /// Byte offset into the caller's outgoing argument area.
    Stack { offset: i32, ty: Type },
}

pub trait CallingConvention {
    type Reg: Copy;
    type FpuReg: Copy;

    fn parameter_slots(
        params: impl Iterator<Item = Type>,
    ) -> impl Iterator<Item = Slot<Self::Reg, Self::FpuReg>>;

    /// `None` for `void`.
    fn return_slot(ty: Type) -> Option<Slot<Self::Reg, Self::FpuReg>>;
}
