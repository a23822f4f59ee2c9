#![deny(clippy::enum_glob_use)]
#![warn(clippy::pedantic, clippy::nursery)]
#![forbid(unsafe_code)]
#![allow(clippy::module_name_repetitions)]

pub use cfg::{
    BasicBlock,
    BasicBlockId,
    Graph,
    GraphBuilder,
};
pub use environment::{
    EnvId,
    Environment,
};
pub use instruction::{
    Instr,
    InstrId,
    InstrKind,
};
pub use ty::Type;
pub use verifier::{
    VerifyError,
    Verifier,
};

pub mod cfg;
pub mod environment;
pub mod instruction;
#[cfg(test)]
pub mod test;
pub mod ty;
pub mod verifier;
