pub mod calling_convention;
pub mod x86_64;
