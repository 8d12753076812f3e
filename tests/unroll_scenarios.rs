//! End-to-end scenarios for the ancillary loop-unroll pass.

use bolt_loop_fold::mc::x86::{MemoryOperandRaw, RAX, RBX};
use bolt_loop_fold::prelude::*;

fn single_iteration_body() -> Vec<Inst> {
    vec![
        Inst::mov_load(RBX, MemoryOperandRaw::based(RAX, 0)),
        Inst::mov_store(MemoryOperandRaw::based(RAX, 0), RBX),
        Inst::add_ri(RAX, RAX, 8),
        Inst::cmp(RAX, Operand::Imm(800)),
        Inst::jcc("body"),
    ]
}

#[test]
fn unrolls_into_four_independent_copies() {
    let body = single_iteration_body();
    let candidate = bolt_loop_fold::induction::find_induction_register(&body, RAX).unwrap();
    let unrolled = unroll_loop(&body, &candidate, 4).unwrap();

    assert_eq!(unrolled.factor, 4);
    let loads = unrolled
        .body
        .iter()
        .filter(|i| matches!(i.opcode, Opcode::MovLoad))
        .count();
    assert_eq!(loads, 4);

    let update = unrolled.body.iter().find(|i| i.is_add_ri()).unwrap();
    assert_eq!(update.operands[2].as_imm(), Some(32));
}

#[test]
fn trip_count_below_two_declines_to_unroll() {
    let body = vec![
        Inst::mov_load(RBX, MemoryOperandRaw::based(RAX, 0)),
        Inst::add_ri(RAX, RAX, 8),
        Inst::cmp(RAX, Operand::Imm(8)),
        Inst::jcc("body"),
    ];
    // A one-trip loop has nothing to gain from unrolling.
    assert!(choose_unroll_factor(&body, RAX, 8).is_none());
}

#[test]
fn profiler_classifies_hot_loop_for_aggressive_unroll() {
    let mut profiler = LoopProfiler::new();
    profiler.record(LoopLocation::new("memcpy_like", 0), 1);
    profiler.record(LoopLocation::new("memcpy_like", 1), 4);
    profiler.record(LoopLocation::new("memcpy_like", 2), 64);
    profiler.record(LoopLocation::new("memcpy_like", 3), 4096);

    let classification = profiler.classify();
    assert_eq!(
        classification[&LoopLocation::new("memcpy_like", 3)],
        Temperature::Hot
    );
    assert_eq!(
        classification[&LoopLocation::new("memcpy_like", 0)],
        Temperature::Cold
    );
}

#[test]
fn unroll_factor_below_two_rejected() {
    let body = single_iteration_body();
    let candidate = bolt_loop_fold::induction::find_induction_register(&body, RAX).unwrap();
    assert_eq!(
        unroll_loop(&body, &candidate, 1),
        Err(RejectionReason::FactorTooSmall)
    );
}
