use std::fmt::{
    Display,
    Formatter,
};

use strum::VariantArray;
use tern_middle::{
    Graph,
    InstrId,
};

pub use summary::{
    CallKind,
    LocationSummary,
    LocationTable,
    RegisterSet,
};

mod summary;

/// Hardware id of a core or floating point register.
pub type Reg = u32;

/// Size of a virtual register slot on the stack, in bytes.
pub const VREG_SIZE: i32 = 4;

/// Allocation constraint of an [`Location::Unallocated`] location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum_macros::Display, VariantArray)]
#[strum(serialize_all = "snake_case")]
pub enum Policy {
    Any,
    RequiresRegister,
    RequiresFpuRegister,
    SameAsFirstInput,
}

/// Whether the output of an instruction may share the storage of one of its inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OutputOverlap {
    #[default]
    Overlap,
    NoOverlap,
}

/// Where a value lives, or is expected to live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Location {
    #[default]
    Invalid,
    Constant(InstrId),
    StackSlot(i32),
    DoubleStackSlot(i32),
    SimdStackSlot(i32),
    Register(Reg),
    FpuRegister(Reg),
    RegisterPair {
        low: Reg,
        high: Reg,
    },
    FpuRegisterPair {
        low: Reg,
        high: Reg,
    },
    Unallocated(Policy),
}

mod tag {
    pub const INVALID: u64 = 0;
    pub const CONSTANT: u64 = 1;
    pub const STACK_SLOT: u64 = 2;
    pub const DOUBLE_STACK_SLOT: u64 = 3;
    pub const REGISTER: u64 = 4;
    pub const FPU_REGISTER: u64 = 6;
    pub const REGISTER_PAIR: u64 = 7;
    pub const FPU_REGISTER_PAIR: u64 = 8;
    pub const SIMD_STACK_SLOT: u64 = 10;
    pub const UNALLOCATED: u64 = 11;
}

const KIND_BITS: u32 = 4;
const KIND_MASK: u64 = (1 << KIND_BITS) - 1;
const CONSTANT_MASK: u64 = 0x3;
const PAYLOAD_BITS: u32 = u64::BITS - KIND_BITS;
const STACK_INDEX_BIAS: i64 = 1 << (PAYLOAD_BITS - 1);
const PAIR_HALF_BITS: u32 = 16;

const _: () = {
    let tags = [
        tag::INVALID,
        tag::STACK_SLOT,
        tag::DOUBLE_STACK_SLOT,
        tag::REGISTER,
        tag::FPU_REGISTER,
        tag::REGISTER_PAIR,
        tag::FPU_REGISTER_PAIR,
        tag::SIMD_STACK_SLOT,
        tag::UNALLOCATED,
    ];
    let mut i = 0;
    while i < tags.len() {
        assert!(
            tags[i] & CONSTANT_MASK != tag::CONSTANT,
            "a location tag collides with the constant tag"
        );
        assert!(tags[i] <= KIND_MASK);
        i += 1;
    }
};

impl Location {
    pub const fn no_location() -> Self {
        Self::Invalid
    }

    pub const fn any() -> Self {
        Self::Unallocated(Policy::Any)
    }

    pub const fn requires_register() -> Self {
        Self::Unallocated(Policy::RequiresRegister)
    }

    pub const fn requires_fpu_register() -> Self {
        Self::Unallocated(Policy::RequiresFpuRegister)
    }

    pub const fn same_as_first_input() -> Self {
        Self::Unallocated(Policy::SameAsFirstInput)
    }

    /// The constant itself if `instr` is a constant, a core register otherwise.
    pub fn register_or_constant(graph: &Graph, instr: InstrId) -> Self {
        if graph.instr(instr).is_constant() {
            Self::Constant(instr)
        } else {
            Self::requires_register()
        }
    }

    pub fn fpu_register_or_constant(graph: &Graph, instr: InstrId) -> Self {
        if graph.instr(instr).is_constant() {
            Self::Constant(instr)
        } else {
            Self::requires_fpu_register()
        }
    }

    pub const fn is_valid(&self) -> bool {
        !matches!(self, Self::Invalid)
    }

    pub const fn is_invalid(&self) -> bool {
        matches!(self, Self::Invalid)
    }

    pub const fn is_constant(&self) -> bool {
        matches!(self, Self::Constant(_))
    }

    pub const fn is_register(&self) -> bool {
        matches!(self, Self::Register(_))
    }

    pub const fn is_fpu_register(&self) -> bool {
        matches!(self, Self::FpuRegister(_))
    }

    pub const fn is_register_pair(&self) -> bool {
        matches!(self, Self::RegisterPair { .. })
    }

    pub const fn is_fpu_register_pair(&self) -> bool {
        matches!(self, Self::FpuRegisterPair { .. })
    }

    pub const fn is_pair(&self) -> bool {
        self.is_register_pair() || self.is_fpu_register_pair()
    }

    /// Register, fpu register or a pair of either.
    pub const fn is_register_kind(&self) -> bool {
        matches!(
            self,
            Self::Register(_)
                | Self::FpuRegister(_)
                | Self::RegisterPair { .. }
                | Self::FpuRegisterPair { .. }
        )
    }

    pub const fn is_stack_slot(&self) -> bool {
        matches!(self, Self::StackSlot(_))
    }

    pub const fn is_double_stack_slot(&self) -> bool {
        matches!(self, Self::DoubleStackSlot(_))
    }

    pub const fn is_simd_stack_slot(&self) -> bool {
        matches!(self, Self::SimdStackSlot(_))
    }

    pub const fn is_stack_slot_kind(&self) -> bool {
        matches!(
            self,
            Self::StackSlot(_) | Self::DoubleStackSlot(_) | Self::SimdStackSlot(_)
        )
    }

    pub const fn is_unallocated(&self) -> bool {
        matches!(self, Self::Unallocated(_))
    }

    pub fn constant(&self) -> InstrId {
        match self {
            Self::Constant(instr) => *instr,
            other => panic!("{other} is not a constant location"),
        }
    }

    /// The register of a [`Location::Register`] or [`Location::FpuRegister`].
    pub fn reg(&self) -> Reg {
        match self {
            Self::Register(reg) | Self::FpuRegister(reg) => *reg,
            other => panic!("{other} is not a register location"),
        }
    }

    pub fn low(&self) -> Reg {
        match self {
            Self::RegisterPair { low, .. } | Self::FpuRegisterPair { low, .. } => *low,
            other => panic!("{other} is not a register pair"),
        }
    }

    pub fn high(&self) -> Reg {
        match self {
            Self::RegisterPair { high, .. } | Self::FpuRegisterPair { high, .. } => *high,
            other => panic!("{other} is not a register pair"),
        }
    }

    pub fn stack_index(&self) -> i32 {
        match self {
            Self::StackSlot(index) | Self::DoubleStackSlot(index) | Self::SimdStackSlot(index) => {
                *index
            }
            other => panic!("{other} is not a stack location"),
        }
    }

    pub fn high_stack_index(&self, word_size: i32) -> i32 {
        match self {
            Self::DoubleStackSlot(index) => index + word_size,
            other => panic!("{other} is not a double stack slot"),
        }
    }

    pub fn policy(&self) -> Policy {
        match self {
            Self::Unallocated(policy) => *policy,
            other => panic!("{other} has no allocation policy"),
        }
    }

    pub const fn requires_register_kind(&self) -> bool {
        matches!(
            self,
            Self::Unallocated(Policy::RequiresRegister | Policy::RequiresFpuRegister)
        )
    }

    pub fn to_low(&self) -> Self {
        match *self {
            Self::RegisterPair { low, .. } => Self::Register(low),
            Self::FpuRegisterPair { low, .. } => Self::FpuRegister(low),
            Self::DoubleStackSlot(index) => Self::StackSlot(index),
            other => panic!("{other} has no low half"),
        }
    }

    pub fn to_high(&self) -> Self {
        match *self {
            Self::RegisterPair { high, .. } => Self::Register(high),
            Self::FpuRegisterPair { high, .. } => Self::FpuRegister(high),
            Self::DoubleStackSlot(_) => Self::StackSlot(self.high_stack_index(VREG_SIZE)),
            other => panic!("{other} has no high half"),
        }
    }

    /// Equal locations contain each other; pairs and double stack slots also contain their halves.
    pub fn contains(&self, other: Self) -> bool {
        if *self == other {
            return true;
        }
        if self.is_pair() || self.is_double_stack_slot() {
            return self.to_low() == other || self.to_high() == other;
        }
        false
    }

    pub fn overlaps_with(&self, other: Self) -> bool {
        self.contains(other) || other.contains(*self)
    }

    pub const fn kind_name(&self) -> &'static str {
        match self {
            Self::Invalid => "I",
            Self::Constant(_) => "C",
            Self::StackSlot(_) => "S",
            Self::DoubleStackSlot(_) => "DS",
            Self::SimdStackSlot(_) => "SIMD",
            Self::Register(_) => "R",
            Self::FpuRegister(_) => "F",
            Self::RegisterPair { .. } => "RP",
            Self::FpuRegisterPair { .. } => "FP",
            Self::Unallocated(_) => "U",
        }
    }

    /// Packs the location into the word layout used by stack maps.
    pub fn encode(&self) -> u64 {
        let (kind, payload) = match *self {
            Self::Invalid => (tag::INVALID, 0),
            Self::Constant(instr) => return (u64::from(instr.raw()) << 2) | tag::CONSTANT,
            Self::StackSlot(index) => (tag::STACK_SLOT, encode_stack_index(index)),
            Self::DoubleStackSlot(index) => (tag::DOUBLE_STACK_SLOT, encode_stack_index(index)),
            Self::SimdStackSlot(index) => (tag::SIMD_STACK_SLOT, encode_stack_index(index)),
            Self::Register(reg) => (tag::REGISTER, u64::from(reg)),
            Self::FpuRegister(reg) => (tag::FPU_REGISTER, u64::from(reg)),
            Self::RegisterPair { low, high } => (tag::REGISTER_PAIR, encode_pair(low, high)),
            Self::FpuRegisterPair { low, high } => {
                (tag::FPU_REGISTER_PAIR, encode_pair(low, high))
            }
            Self::Unallocated(policy) => (tag::UNALLOCATED, policy as u64),
        };
        debug_assert!(payload < 1 << PAYLOAD_BITS);
        (payload << KIND_BITS) | kind
    }

    pub fn decode(value: u64) -> Self {
        if value & CONSTANT_MASK == tag::CONSTANT {
            let raw = u32::try_from(value >> 2)
                .unwrap_or_else(|_| panic!("{value:#x} does not encode a constant location"));
            return Self::Constant(InstrId::from_raw(raw));
        }
        let payload = value >> KIND_BITS;
        match value & KIND_MASK {
            tag::INVALID => Self::Invalid,
            tag::STACK_SLOT => Self::StackSlot(decode_stack_index(payload)),
            tag::DOUBLE_STACK_SLOT => Self::DoubleStackSlot(decode_stack_index(payload)),
            tag::SIMD_STACK_SLOT => Self::SimdStackSlot(decode_stack_index(payload)),
            tag::REGISTER => Self::Register(decode_reg(payload)),
            tag::FPU_REGISTER => Self::FpuRegister(decode_reg(payload)),
            tag::REGISTER_PAIR => {
                let (low, high) = decode_pair(payload);
                Self::RegisterPair { low, high }
            }
            tag::FPU_REGISTER_PAIR => {
                let (low, high) = decode_pair(payload);
                Self::FpuRegisterPair { low, high }
            }
            tag::UNALLOCATED => {
                let policy = usize::try_from(payload)
                    .ok()
                    .and_then(|index| Policy::VARIANTS.get(index))
                    .unwrap_or_else(|| panic!("{payload} is not an allocation policy"));
                Self::Unallocated(*policy)
            }
            kind => panic!("{kind} is not a location kind"),
        }
    }
}

fn encode_stack_index(index: i32) -> u64 {
    let biased = i64::from(index) + STACK_INDEX_BIAS;
    u64::try_from(biased).unwrap_or_else(|_| panic!("Stack index {index} is out of range"))
}

fn decode_stack_index(payload: u64) -> i32 {
    let biased =
        i64::try_from(payload).unwrap_or_else(|_| panic!("{payload:#x} is not a stack index"));
    i32::try_from(biased - STACK_INDEX_BIAS)
        .unwrap_or_else(|_| panic!("{payload:#x} is not a stack index"))
}

fn encode_pair(low: Reg, high: Reg) -> u64 {
    assert!(
        low < 1 << PAIR_HALF_BITS && high < 1 << PAIR_HALF_BITS,
        "Register pair ({low}, {high}) does not fit in the payload"
    );
    (u64::from(low) << PAIR_HALF_BITS) | u64::from(high)
}

fn decode_pair(payload: u64) -> (Reg, Reg) {
    let mask = (1 << PAIR_HALF_BITS) - 1;
    (
        decode_reg(payload >> PAIR_HALF_BITS),
        decode_reg(payload & mask),
    )
}

fn decode_reg(payload: u64) -> Reg {
    Reg::try_from(payload).unwrap_or_else(|_| panic!("{payload:#x} is not a register id"))
}

impl Display for Location {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let kind = self.kind_name();
        match self {
            Self::Invalid => write!(f, "{kind}"),
            Self::Constant(instr) => write!(f, "{kind}({instr})"),
            Self::StackSlot(index) | Self::DoubleStackSlot(index) | Self::SimdStackSlot(index) => {
                write!(f, "{kind}({index})")
            }
            Self::Register(reg) | Self::FpuRegister(reg) => write!(f, "{kind}({reg})"),
            Self::RegisterPair { low, high } | Self::FpuRegisterPair { low, high } => {
                write!(f, "{kind}({low},{high})")
            }
            Self::Unallocated(policy) => write!(f, "{kind}({policy})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoding_is_lossless() {
        let locations = [
            Location::Invalid,
            Location::Constant(InstrId::from_raw(0)),
            Location::Constant(InstrId::from_raw(77)),
            Location::StackSlot(0),
            Location::StackSlot(-16),
            Location::DoubleStackSlot(24),
            Location::SimdStackSlot(i32::MIN),
            Location::Register(3),
            Location::FpuRegister(15),
            Location::RegisterPair { low: 1, high: 2 },
            Location::FpuRegisterPair {
                low: 0xffff,
                high: 0,
            },
            Location::any(),
            Location::same_as_first_input(),
            Location::requires_fpu_register(),
        ];
        for location in locations {
            let encoded = location.encode();
            assert_eq!(
                Location::decode(encoded),
                location,
                "{location} was encoded as {encoded:#x}"
            );
        }
    }

    #[test]
    fn only_constants_carry_the_constant_tag() {
        let locations = [
            Location::Invalid,
            Location::StackSlot(5),
            Location::Register(1),
            Location::FpuRegister(9),
            Location::RegisterPair { low: 4, high: 5 },
            Location::SimdStackSlot(8),
            Location::requires_register(),
        ];
        for location in locations {
            assert_ne!(location.encode() & CONSTANT_MASK, tag::CONSTANT, "{location}");
        }
        assert_eq!(
            Location::Constant(InstrId::from_raw(9)).encode() & CONSTANT_MASK,
            tag::CONSTANT
        );
    }

    #[test]
    #[should_panic(expected = "does not fit")]
    fn oversized_pair_is_rejected() {
        Location::RegisterPair {
            low: 1 << 16,
            high: 0,
        }
        .encode();
    }

    #[test]
    fn pairs_contain_their_halves() {
        let inputs = [
            // A pair contains its low register
            (Location::RegisterPair { low: 0, high: 1 }, Location::Register(0), true),
            // A pair contains its high register
            (Location::RegisterPair { low: 0, high: 1 }, Location::Register(1), true),
            // Core and fpu registers with the same id are different
            (Location::RegisterPair { low: 0, high: 1 }, Location::FpuRegister(1), false),
            (
                Location::FpuRegisterPair { low: 2, high: 3 },
                Location::FpuRegister(3),
                true,
            ),
            // A double stack slot contains both of its words
            (Location::DoubleStackSlot(8), Location::StackSlot(8), true),
            (Location::DoubleStackSlot(8), Location::StackSlot(12), true),
            (Location::DoubleStackSlot(8), Location::StackSlot(16), false),
            // Plain locations only contain themselves
            (Location::StackSlot(8), Location::StackSlot(8), true),
            (Location::Register(0), Location::RegisterPair { low: 0, high: 1 }, false),
        ];
        for (outer, inner, should_contain) in inputs {
            assert_eq!(
                outer.contains(inner),
                should_contain,
                "{outer} should contain {inner}: {should_contain}"
            );
        }
    }

    #[test]
    fn overlap_is_symmetric() {
        let pair = Location::RegisterPair { low: 6, high: 7 };
        let low = Location::Register(6);
        assert!(pair.overlaps_with(low));
        assert!(low.overlaps_with(pair));
        assert!(!low.overlaps_with(Location::Register(7)));
    }

    #[test]
    fn halves_of_double_stack_slot() {
        let slot = Location::DoubleStackSlot(16);
        assert_eq!(slot.to_low(), Location::StackSlot(16));
        assert_eq!(slot.to_high(), Location::StackSlot(20));
        assert_eq!(slot.high_stack_index(8), 24);
    }

    #[test]
    fn display_uses_short_kind_names() {
        assert_eq!(Location::Invalid.to_string(), "I");
        assert_eq!(Location::Register(2).to_string(), "R(2)");
        assert_eq!(Location::DoubleStackSlot(-8).to_string(), "DS(-8)");
        assert_eq!(
            Location::FpuRegisterPair { low: 1, high: 2 }.to_string(),
            "FP(1,2)"
        );
        assert_eq!(Location::any().to_string(), "U(any)");
        assert_eq!(Location::Constant(InstrId::from_raw(3)).to_string(), "C(v3)");
    }

    #[test]
    fn requires_register_kind_only_for_register_policies() {
        assert!(Location::requires_register().requires_register_kind());
        assert!(Location::requires_fpu_register().requires_register_kind());
        assert!(!Location::any().requires_register_kind());
        assert!(!Location::same_as_first_input().requires_register_kind());
        assert!(!Location::Register(0).requires_register_kind());
    }
}
