use std::fmt::{
    Display,
    Formatter,
};

/// The type of a value produced by an instruction.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum Type {
    Bool,
    Int8,
    Uint16,
    Int32,
    Int64,
    Float32,
    Float64,
    /// A managed object reference. The collector must be able to find these.
    Reference,
    Void,
}

impl Type {
    pub const fn size(&self) -> u32 {
        match self {
            Self::Bool | Self::Int8 => 1,
            Self::Uint16 => 2,
            Self::Int32 | Self::Float32 | Self::Reference => 4,
            Self::Int64 | Self::Float64 => 8,
            Self::Void => 0,
        }
    }

    pub const fn is_floating_point(&self) -> bool {
        matches!(self, Self::Float32 | Self::Float64)
    }

    pub const fn is_64bit(&self) -> bool {
        matches!(self, Self::Int64 | Self::Float64)
    }

    pub const fn is_reference(&self) -> bool {
        matches!(self, Self::Reference)
    }
}

impl Display for Type {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool => write!(f, "bool"),
            Self::Int8 => write!(f, "i8"),
            Self::Uint16 => write!(f, "u16"),
            Self::Int32 => write!(f, "i32"),
            Self::Int64 => write!(f, "i64"),
            Self::Float32 => write!(f, "f32"),
            Self::Float64 => write!(f, "f64"),
            Self::Reference => write!(f, "ref"),
            Self::Void => write!(f, "void"),
        }
    }
}
