//! The ancillary loop-unroll pass.
//!
//! Where the fold pass collapses an already-unrolled body down to one
//! iteration, this pass goes the other way: given a loop with a small,
//! statically-known trip count, it replicates the per-iteration
//! instructions `Factor` times and folds the control cluster's bound/step
//! accordingly, trading a conditional branch for straight-line code. It
//! reuses the same induction-register recovery the fold pass does, since
//! both need to know which register drives the loop and which
//! instructions are "control" rather than "body".

use tracing::{debug, instrument};

use crate::error::RejectionReason;
use crate::induction::{find_induction_register, get_unroll_count, iteration_analysis, Candidate};
use crate::mc::{Inst, Opcode, RegId};

#[derive(Debug, Clone)]
pub struct UnrolledLoop {
    pub body: Vec<Inst>,
    pub factor: usize,
}

/// Recover the induction register and decide how many times to replicate
/// the body, capped at `max_factor`. Returns `None` if the trip count
/// can't be statically bounded (the unroll pass then leaves the loop
/// alone rather than guessing).
pub fn choose_unroll_factor(
    body: &[Inst],
    accumulator: RegId,
    max_factor: i64,
) -> Option<(Candidate, usize)> {
    let candidate = find_induction_register(body, accumulator)?;
    let loop_info = iteration_analysis(body, accumulator)?;
    let factor = get_unroll_count(&loop_info, max_factor)?;
    Some((candidate, factor as usize))
}

/// Replicate `body`'s per-iteration instructions `factor` times.
///
/// Each copy's memory operands addressed by the induction register are
/// shifted by `i * step` for copy index `i`, and the trailing control
/// cluster (update/compare/branch) is rewritten to advance by
/// `step * factor` per pass through the unrolled block, exactly undoing
/// what [`crate::rewriter::fold_loop`] would do to the result.
#[instrument(skip(body), fields(len = body.len(), factor))]
pub fn unroll_loop(
    body: &[Inst],
    candidate: &Candidate,
    factor: usize,
) -> Result<UnrolledLoop, RejectionReason> {
    if factor < 2 {
        return Err(RejectionReason::FactorTooSmall);
    }
    let Some(branch_idx) = body.iter().rposition(Inst::is_branch) else {
        return Err(RejectionReason::NoSelfBranch);
    };

    let update_idx = candidate.update_index;
    let cmp_idx = body.iter().position(|inst| {
        inst.is_compare() && inst.operands.first().and_then(|o| o.as_reg()) == Some(candidate.reg)
    });

    let mut control: Vec<usize> = vec![update_idx, branch_idx];
    control.extend(cmp_idx);
    control.sort_unstable();
    control.dedup();

    let per_iteration: Vec<usize> = (0..body.len()).filter(|i| !control.contains(i)).collect();

    let mut unrolled = Vec::with_capacity(per_iteration.len() * factor + control.len());
    for copy in 0..factor {
        let shift = candidate.step * copy as i64;
        for &i in &per_iteration {
            let mut inst = body[i].clone();
            shift_memory_operand(&mut inst, candidate.reg, shift);
            unrolled.push(inst);
        }
    }

    for &i in &control {
        let mut inst = body[i].clone();
        if i == update_idx {
            scale_update_immediate(&mut inst, factor as i64);
        }
        unrolled.push(inst);
    }

    debug!(factor, reg = ?candidate.reg, "loop unrolled");
    Ok(UnrolledLoop {
        body: unrolled,
        factor,
    })
}

fn shift_memory_operand(inst: &mut Inst, induction_reg: RegId, shift: i64) {
    if shift == 0 {
        return;
    }
    if let Some(mem) = inst.memory_operand() {
        if mem.base == Some(induction_reg) || mem.index == Some(induction_reg) {
            inst.add_to_imm(shift);
        }
    }
}

fn scale_update_immediate(inst: &mut Inst, factor: i64) {
    if !matches!(inst.opcode, Opcode::AddRI | Opcode::SubRI) {
        return;
    }
    if let Some(imm) = inst.operands.get(2).and_then(|o| o.as_imm()) {
        inst.operands[2] = crate::mc::Operand::Imm(imm * factor);
    }
}
