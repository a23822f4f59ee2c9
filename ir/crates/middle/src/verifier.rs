use std::fmt::{
    Display,
    Formatter,
};

use crate::{
    cfg::{
        BasicBlockId,
        Graph,
    },
    instruction::InstrId,
};

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum VerifyError {
    PhiArityMismatch {
        phi: InstrId,
        inputs: usize,
        predecessors: usize,
    },
    UsedBeforeDefinition {
        value: InstrId,
        user: InstrId,
    },
    UseNotDominatedByDefinition {
        value: InstrId,
        user: InstrId,
    },
    VoidInput {
        value: InstrId,
        user: InstrId,
    },
    UnreachableBlock(BasicBlockId),
    MissingCatchPhiEnvSlot {
        holder: InstrId,
        phi: InstrId,
        value: InstrId,
    },
}

impl Display for VerifyError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PhiArityMismatch {
                phi,
                inputs,
                predecessors,
            } => write!(
                f,
                "Phi {phi} has {inputs} inputs but its block has {predecessors} predecessors"
            ),
            Self::UsedBeforeDefinition { value, user } => {
                write!(f, "{value} used by {user} before its definition")
            }
            Self::UseNotDominatedByDefinition { value, user } => {
                write!(f, "Definition of {value} does not dominate its use in {user}")
            }
            Self::VoidInput { value, user } => {
                write!(f, "{user} uses {value}, which does not produce a value")
            }
            Self::UnreachableBlock(bb) => write!(f, "{bb} is not reachable from the entry block"),
            Self::MissingCatchPhiEnvSlot { holder, phi, value } => write!(
                f,
                "{holder} can throw into a catch block, but its environment does not hold {value} (input of catch phi {phi})"
            ),
        }
    }
}

/// Checks the structural properties the liveness analysis relies on.
#[derive(Debug, Clone)]
pub struct Verifier<'graph> {
    graph: &'graph Graph,
}

impl<'graph> Verifier<'graph> {
    pub const fn new(graph: &'graph Graph) -> Self {
        Self { graph }
    }

    pub fn verify(self) -> Vec<VerifyError> {
        let mut errors = vec![];
        let domtree = self.graph.dom_tree();
        for bb in &self.graph.basic_blocks {
            if !domtree.is_reachable(bb.id) {
                errors.push(VerifyError::UnreachableBlock(bb.id));
                continue;
            }
            for phi in bb.phis.iter().copied() {
                let instr = self.graph.instr(phi);
                if bb.is_catch_block {
                    continue;
                }
                if instr.inputs.len() != bb.predecessors.len() {
                    errors.push(VerifyError::PhiArityMismatch {
                        phi,
                        inputs: instr.inputs.len(),
                        predecessors: bb.predecessors.len(),
                    });
                    continue;
                }
                for (input, pred) in instr.inputs.iter().zip(&bb.predecessors) {
                    let defined_in = self.graph.instr(*input).block;
                    if !domtree.dominates(defined_in, *pred) {
                        errors.push(VerifyError::UseNotDominatedByDefinition {
                            value: *input,
                            user: phi,
                        });
                    }
                }
            }
            for (position, user) in bb.instructions.iter().copied().enumerate() {
                let instr = self.graph.instr(user);
                for value in instr.inputs.iter().copied() {
                    let definition = self.graph.instr(value);
                    if !definition.produces_value() {
                        errors.push(VerifyError::VoidInput { value, user });
                    }
                    if definition.block == bb.id {
                        let defined_before = definition.is_phi()
                            || bb.instructions[..position].contains(&value);
                        if !defined_before {
                            errors.push(VerifyError::UsedBeforeDefinition { value, user });
                        }
                    } else if !domtree.dominates(definition.block, bb.id) {
                        errors.push(VerifyError::UseNotDominatedByDefinition { value, user });
                    }
                }
                if self.graph.can_throw_into_catch_block(user) {
                    self.verify_catch_phi_env_slots(user, &mut errors);
                }
            }
        }
        errors
    }

    /// Every input a catch phi receives from the throwing block must be recorded in the
    /// environment of the throwing instruction, except constants.
    fn verify_catch_phi_env_slots(&self, holder: InstrId, errors: &mut Vec<VerifyError>) {
        let block = self.graph.instr(holder).block;
        for catch_block in self.graph.catch_successors(block) {
            let catch_block = self.graph.block(catch_block);
            let pred_index = catch_block.predecessor_index_of(block);
            for phi in catch_block.phis.iter().copied() {
                let Some(value) = self.graph.instr(phi).inputs.get(pred_index).copied() else {
                    continue;
                };
                if self.graph.instr(value).is_constant() {
                    continue;
                }
                let recorded = self
                    .graph
                    .environment_chain(holder)
                    .any(|env| env.slots.contains(&Some(value)));
                if !recorded {
                    errors.push(VerifyError::MissingCatchPhiEnvSlot { holder, phi, value });
                }
            }
        }
    }
}
