use crate::{
    cfg::{
        BasicBlockId,
        Graph,
        GraphBuilder,
    },
    instruction::{
        Const,
        CondOp,
        InstrKind,
    },
    Type,
};

pub struct DiamondBlocks {
    pub entry: BasicBlockId,
    pub then: BasicBlockId,
    pub otherwise: BasicBlockId,
    pub join: BasicBlockId,
}

/// `entry -> {then, otherwise} -> join`, with a phi in `join`.
pub fn create_diamond() -> (Graph, DiamondBlocks) {
    let mut builder = GraphBuilder::new();
    let entry = builder.create_bb();
    let then = builder.create_bb();
    let otherwise = builder.create_bb();
    let join = builder.create_bb();
    builder.add_edge(entry, then);
    builder.add_edge(entry, otherwise);
    builder.add_edge(then, join);
    builder.add_edge(otherwise, join);

    let a = builder.parameter(entry, 0, Type::Int32);
    let zero = builder.constant(entry, Const::Int(0));
    let cond = builder.add(entry, InstrKind::Condition(CondOp::Eq), Type::Bool, &[a, zero]);
    builder.add(entry, InstrKind::If, Type::Void, &[cond]);
    builder.add(then, InstrKind::Goto, Type::Void, &[]);
    builder.add(otherwise, InstrKind::Goto, Type::Void, &[]);
    let phi = builder.phi(join, Type::Int32);
    builder.add_phi_input(phi, a);
    builder.add_phi_input(phi, zero);
    builder.add(join, InstrKind::Return, Type::Void, &[phi]);
    (
        builder.finish(),
        DiamondBlocks {
            entry,
            then,
            otherwise,
            join,
        },
    )
}

pub struct SimpleLoopBlocks {
    pub entry: BasicBlockId,
    pub pre_header: BasicBlockId,
    pub header: BasicBlockId,
    pub body: BasicBlockId,
    pub exit: BasicBlockId,
    pub exit_block: BasicBlockId,
}

/// `entry -> pre_header -> header <-> body`, `header -> exit -> exit_block`.
pub fn create_simple_loop() -> (Graph, SimpleLoopBlocks) {
    let mut builder = GraphBuilder::new();
    let entry = builder.create_bb();
    let pre_header = builder.create_bb();
    let header = builder.create_bb();
    let body = builder.create_bb();
    let exit = builder.create_bb();
    let exit_block = builder.create_bb();
    builder.add_edge(entry, pre_header);
    builder.add_edge(pre_header, header);
    builder.add_edge(header, body);
    builder.add_edge(header, exit);
    builder.add_edge(body, header);
    builder.add_edge(exit, exit_block);

    let a = builder.parameter(entry, 0, Type::Int32);
    builder.add(entry, InstrKind::Goto, Type::Void, &[]);
    builder.add(pre_header, InstrKind::Goto, Type::Void, &[]);
    let phi = builder.phi(header, Type::Int32);
    let cond = builder.add(header, InstrKind::Condition(CondOp::Lt), Type::Bool, &[phi, a]);
    builder.add(header, InstrKind::If, Type::Void, &[cond]);
    builder.add(body, InstrKind::Goto, Type::Void, &[]);
    builder.add_phi_input(phi, a);
    builder.add_phi_input(phi, a);
    builder.add(exit, InstrKind::Return, Type::Void, &[phi]);
    builder.add(exit_block, InstrKind::Exit, Type::Void, &[]);
    (
        builder.finish(),
        SimpleLoopBlocks {
            entry,
            pre_header,
            header,
            body,
            exit,
            exit_block,
        },
    )
}

pub struct NestedLoopBlocks {
    pub entry: BasicBlockId,
    pub outer_header: BasicBlockId,
    pub inner_header: BasicBlockId,
    pub inner_body: BasicBlockId,
    pub outer_latch: BasicBlockId,
    pub exit: BasicBlockId,
}

/// An outer loop whose body is an inner loop followed by a latch.
pub fn create_nested_loops() -> (Graph, NestedLoopBlocks) {
    let mut builder = GraphBuilder::new();
    let entry = builder.create_bb();
    let outer_header = builder.create_bb();
    let inner_header = builder.create_bb();
    let inner_body = builder.create_bb();
    let outer_latch = builder.create_bb();
    let exit = builder.create_bb();
    builder.add_edge(entry, outer_header);
    builder.add_edge(outer_header, exit);
    builder.add_edge(outer_header, inner_header);
    builder.add_edge(inner_header, outer_latch);
    builder.add_edge(inner_header, inner_body);
    builder.add_edge(inner_body, inner_header);
    builder.add_edge(outer_latch, outer_header);

    builder.add(entry, InstrKind::Goto, Type::Void, &[]);
    builder.add(outer_header, InstrKind::If, Type::Void, &[]);
    builder.add(inner_header, InstrKind::If, Type::Void, &[]);
    builder.add(inner_body, InstrKind::Goto, Type::Void, &[]);
    builder.add(outer_latch, InstrKind::Goto, Type::Void, &[]);
    builder.add(exit, InstrKind::ReturnVoid, Type::Void, &[]);
    (
        builder.finish(),
        NestedLoopBlocks {
            entry,
            outer_header,
            inner_header,
            inner_body,
            outer_latch,
            exit,
        },
    )
}

/// Two blocks jumping into each other, both reachable from the entry.
pub fn create_irreducible_loop() -> Graph {
    let mut builder = GraphBuilder::new();
    let entry = builder.create_bb();
    let left = builder.create_bb();
    let right = builder.create_bb();
    let exit = builder.create_bb();
    builder.add_edge(entry, left);
    builder.add_edge(entry, right);
    builder.add_edge(left, right);
    builder.add_edge(right, left);
    builder.add_edge(right, exit);

    builder.add(entry, InstrKind::If, Type::Void, &[]);
    builder.add(left, InstrKind::Goto, Type::Void, &[]);
    builder.add(right, InstrKind::If, Type::Void, &[]);
    builder.add(exit, InstrKind::ReturnVoid, Type::Void, &[]);
    builder.finish()
}
