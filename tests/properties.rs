//! Property tests over the induction analyzer's arithmetic-progression
//! check: it should accept exactly the offset sets that really are one,
//! regardless of how many terms or what the step is.

use bolt_loop_fold::induction::get_loop_unroll_factor;
use bolt_loop_fold::mc::x86::{MemoryOperandRaw, RAX, RBX};
use bolt_loop_fold::mc::{Inst, Opcode};
use quickcheck_macros::quickcheck;

fn body_with_offsets(offsets: &[i64]) -> Vec<Inst> {
    offsets
        .iter()
        .map(|&o| Inst::mov_load(RBX, MemoryOperandRaw::based(RAX, o)))
        .collect()
}

#[quickcheck]
fn accepts_any_nonzero_step_progression(base: i32, step: i32, terms: u8) -> bool {
    let step = step as i64;
    let terms = (terms % 8) as i64 + 2; // at least 2 terms
    if step == 0 {
        return true;
    }
    let offsets: Vec<i64> = (0..terms).map(|i| base as i64 + i * step).collect();
    let body = body_with_offsets(&offsets);
    match get_loop_unroll_factor(&body, RAX, &[Opcode::Jcc]) {
        Some(factor) => factor == terms,
        None => false,
    }
}

#[quickcheck]
fn rejects_a_single_out_of_step_term(base: i32, step: i32) -> bool {
    let step = step as i64;
    if step == 0 {
        return true;
    }
    // Three evenly-spaced terms, then one deliberately off by one unit and
    // far enough away that it can never accidentally collide with (and so
    // dedup away into) one of the first three.
    let offsets = vec![
        base as i64,
        base as i64 + step,
        base as i64 + 2 * step,
        base as i64 + 10 * step + 1,
    ];
    let body = body_with_offsets(&offsets);
    get_loop_unroll_factor(&body, RAX, &[Opcode::Jcc]).is_none()
}

#[quickcheck]
fn fewer_than_two_distinct_offsets_never_accepted(base: i32) -> bool {
    let body = body_with_offsets(&[base as i64, base as i64]);
    get_loop_unroll_factor(&body, RAX, &[Opcode::Jcc]).is_none()
}
