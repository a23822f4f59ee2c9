use std::fmt::{
    Display,
    Formatter,
};

use smallvec::SmallVec;

use crate::instruction::InstrId;

index_vec::define_index_type! {
    pub struct EnvId = u32;

    DISPLAY_FORMAT = "env{}";
}

/// Snapshot of the interpreter's virtual registers at an instruction.
///
/// The runtime reads it to rebuild interpreter frames on deoptimization and to deliver
/// exceptions to catch blocks. Inlined frames chain to the environment of their caller
/// through `parent`.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Environment {
    pub id: EnvId,
    /// One entry per virtual register; `None` if the register holds nothing the runtime needs.
    pub slots: SmallVec<[Option<InstrId>; 8]>,
    pub parent: Option<EnvId>,
    /// The instruction this environment is attached to.
    pub holder: InstrId,
}

impl Environment {
    pub fn size(&self) -> usize {
        self.slots.len()
    }

    pub fn instr_at(&self, slot: usize) -> Option<InstrId> {
        self.slots[slot]
    }
}

impl Display for Environment {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}[", self.id)?;
        for (index, slot) in self.slots.iter().enumerate() {
            if index > 0 {
                write!(f, ", ")?;
            }
            match slot {
                Some(instr) => write!(f, "{instr}")?,
                None => write!(f, "_")?,
            }
        }
        write!(f, "]")
    }
}
