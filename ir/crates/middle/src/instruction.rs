use std::fmt::{
    Display,
    Formatter,
};

use smallvec::SmallVec;
use strum_macros::Display;

use crate::{
    cfg::{
        BasicBlockId,
        Graph,
    },
    environment::EnvId,
    Type,
};

index_vec::define_index_type! {
    pub struct InstrId = u32;

    DISPLAY_FORMAT = "v{}";
}

/// An instruction of the SSA graph.
///
/// Phis are instructions too. They live in [`crate::cfg::BasicBlock::phis`] and their
/// input `i` flows in from predecessor `i` of their block.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Instr {
    pub id: InstrId,
    pub block: BasicBlockId,
    pub ty: Type,
    pub kind: InstrKind,
    pub inputs: SmallVec<[InstrId; 3]>,
    pub environment: Option<EnvId>,
    /// Folded into its consumer by the code generator and never materialized.
    pub emitted_at_use_site: bool,
    /// Unique symbol for debugging purposes.
    pub symbol: String,
}

impl Instr {
    pub fn new(
        id: InstrId,
        block: BasicBlockId,
        ty: Type,
        kind: InstrKind,
        inputs: SmallVec<[InstrId; 3]>,
        symbol: String,
    ) -> Self {
        Self {
            id,
            block,
            ty,
            kind,
            inputs,
            environment: None,
            emitted_at_use_site: false,
            symbol,
        }
    }

    pub const fn is_phi(&self) -> bool {
        matches!(self.kind, InstrKind::Phi)
    }

    pub const fn is_constant(&self) -> bool {
        matches!(self.kind, InstrKind::Constant(_))
    }

    pub const fn is_parameter(&self) -> bool {
        matches!(self.kind, InstrKind::Parameter { .. })
    }

    pub const fn is_deoptimize(&self) -> bool {
        matches!(self.kind, InstrKind::Deoptimize)
    }

    pub const fn produces_value(&self) -> bool {
        !matches!(self.ty, Type::Void)
    }

    pub fn input_at(&self, index: usize) -> InstrId {
        self.inputs[index]
    }

    /// Number of bytes of the SIMD value this instruction produces, if it produces one.
    pub const fn vector_bytes(&self) -> Option<u32> {
        match self.kind {
            InstrKind::VecOp { bytes } => Some(bytes),
            _ => None,
        }
    }

    pub const fn returns_simd_value(&self) -> bool {
        self.vector_bytes().is_some()
    }

    pub fn display<'a>(&'a self, graph: &'a Graph) -> InstrDisplay<'a> {
        InstrDisplay(graph, self)
    }
}

impl Display for Instr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "%{}", self.symbol)
    }
}

pub struct InstrDisplay<'a>(&'a Graph, &'a Instr);

impl Display for InstrDisplay<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let instr = self.1;
        if instr.produces_value() {
            write!(f, "{} {} = ", instr.ty, instr)?;
        }
        match &instr.kind {
            InstrKind::Constant(value) => write!(f, "const {value}")?,
            InstrKind::Parameter { index } => write!(f, "param {index}")?,
            InstrKind::Binary(op) => write!(f, "{op}")?,
            InstrKind::Condition(op) => write!(f, "cmp {op}")?,
            kind => write!(f, "{kind}")?,
        }
        for (index, input) in instr.inputs.iter().enumerate() {
            let separator = if index == 0 { " " } else { ", " };
            write!(f, "{separator}{}", self.0.instr(*input))?;
        }
        if instr.emitted_at_use_site {
            write!(f, " (at use site)")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Display)]
#[strum(serialize_all = "snake_case")]
pub enum InstrKind {
    Parameter { index: u32 },
    Constant(Const),
    Phi,
    Binary(BinOp),
    Condition(CondOp),
    If,
    Goto,
    Return,
    ReturnVoid,
    Exit,
    NullCheck,
    ArrayLength,
    BoundsCheck,
    ArrayGet,
    ArraySet,
    Deoptimize,
    InvokeStatic,
    SuspendCheck,
    Throw,
    /// An operation producing a SIMD value of `bytes` bytes.
    VecOp { bytes: u32 },
}

impl InstrKind {
    /// Whether executing the instruction may raise an exception that a catch block can observe.
    pub const fn can_throw(&self) -> bool {
        matches!(
            self,
            Self::NullCheck | Self::BoundsCheck | Self::ArraySet | Self::InvokeStatic | Self::Throw
        )
    }

    pub const fn is_control_flow(&self) -> bool {
        matches!(
            self,
            Self::If | Self::Goto | Self::Return | Self::ReturnVoid | Self::Exit | Self::Throw
        )
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum Const {
    Int(i32),
    Long(i64),
    /// Raw bits of an `f32`.
    Float(u32),
    /// Raw bits of an `f64`.
    Double(u64),
    Null,
}

impl Const {
    pub const fn ty(&self) -> Type {
        match self {
            Self::Int(_) => Type::Int32,
            Self::Long(_) => Type::Int64,
            Self::Float(_) => Type::Float32,
            Self::Double(_) => Type::Float64,
            Self::Null => Type::Reference,
        }
    }
}

impl Display for Const {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Int(value) => write!(f, "{value}"),
            Self::Long(value) => write!(f, "{value}l"),
            Self::Float(bits) => write!(f, "{}f", f32::from_bits(*bits)),
            Self::Double(bits) => write!(f, "{}d", f64::from_bits(*bits)),
            Self::Null => write!(f, "null"),
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Display)]
#[strum(serialize_all = "lowercase")]
pub enum BinOp {
    Add,
    Sub,
    Mul,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Display)]
#[strum(serialize_all = "lowercase")]
pub enum CondOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}
