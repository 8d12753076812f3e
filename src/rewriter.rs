//! R: the rewriter.
//!
//! Runs the induction analyzer and grouping engine over a single-block
//! loop body end to end, and — if every gate passes — emits the folded
//! body: the control cluster plus a single copy of group 1, with group 1's
//! own memory displacements patched back to their original (unscaled)
//! values.

use tracing::{debug, instrument};

use crate::config::PassConfig;
use crate::error::RejectionReason;
use crate::grouping::{
    assign_groups, check_continuity, check_dependency_closure, check_group_sizes,
    check_group_zero_contents, check_swap_heuristic, locate_cmp_instruction,
    locate_update_instruction, GroupingResult,
};
use crate::induction::{enumerate_loop_unroll_infos, find_induction_register, get_loop_unroll_info, LoopUnrollInfo};
use crate::mc::{Inst, Opcode, RegId};

/// Everything recovered about a loop that was successfully folded: the
/// folded body itself plus the analysis results a caller might want to log
/// or serialize (`--print-loop-instructions`).
#[derive(Debug, Clone)]
pub struct FoldedLoop {
    pub body: Vec<Inst>,
    pub induction_reg: RegId,
    pub step: i64,
    pub factor: usize,
}

/// What [`verify_update_step`] recovers once the control cluster's update
/// immediate is reconciled against the memory-offset step: the unroll
/// factor the fold actually uses (after the off-by-one relaxation, if
/// needed), the `groupScale` the grouping engine's statuses must be
/// coarsened by before group 1 is extracted, and the per-iteration step to
/// rewrite into the folded update instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct UpdateResolution {
    factor: i64,
    group_scale: i64,
    per_iteration_step: i64,
}

/// Fold a fully-unrolled single-block loop body into one iteration.
///
/// `accumulator` is the register the one-operand add-immediate
/// normalization targets (conventionally the host's `RAX`-equivalent).
/// Returns the first [`RejectionReason`] encountered, in the same order
/// the stages run in: structural shape, induction recovery, grouping, then
/// the optional gates.
#[instrument(skip(body, config), fields(len = body.len()))]
pub fn fold_loop(
    body: &[Inst],
    accumulator: RegId,
    config: &PassConfig,
) -> Result<FoldedLoop, RejectionReason> {
    check_single_block_shape(body)?;

    let candidate = find_induction_register(body, accumulator)
        .ok_or(RejectionReason::NoInductionRegister)?;

    let info = get_loop_unroll_info(body, candidate.reg, &[])
        .ok_or(RejectionReason::NotArithmeticProgression)?;
    if info.factor < 2 {
        return Err(RejectionReason::FactorTooSmall);
    }

    // §4.3.1: locate the update instruction structurally, independently of
    // whatever update index the induction analyzer's own candidate search
    // happened to settle on.
    let update_index = locate_update_instruction(body, candidate.reg)?;
    let branch_index = body
        .iter()
        .rposition(Inst::is_branch)
        .ok_or(RejectionReason::NoSelfBranch)?;
    let cmp_index = locate_cmp_instruction(body, candidate.reg);

    let update_step = read_update_step(&body[update_index]);
    let resolution = verify_update_step(update_step, info.step, info.factor, info.seed.scale)?;

    let decreasing = update_step < 0;
    let infos: Vec<LoopUnrollInfo> = {
        let recovered = enumerate_loop_unroll_infos(body, candidate.reg, &[], info.factor);
        let recovered = if recovered.is_empty() { vec![info] } else { recovered };
        recovered
            .into_iter()
            .map(|i| adjust_for_direction(i, decreasing))
            .collect()
    };

    let mut grouping = assign_groups(body, candidate.reg, &infos, update_index, branch_index, cmp_index)?;
    if resolution.group_scale > 1 {
        grouping.rescale(resolution.group_scale as usize);
    }
    run_gates(body, &grouping, config)?;

    let folded_body = build_folded_body(body, &grouping, candidate.reg, resolution.per_iteration_step);

    debug!(factor = resolution.factor, reg = ?candidate.reg, "loop folded");
    Ok(FoldedLoop {
        body: folded_body,
        induction_reg: candidate.reg,
        step: update_step,
        factor: resolution.factor as usize,
    })
}

fn check_single_block_shape(body: &[Inst]) -> Result<(), RejectionReason> {
    if body.len() < 2 {
        return Err(RejectionReason::BodyTooSmall);
    }
    let Some(last) = body.last() else {
        return Err(RejectionReason::BodyTooSmall);
    };
    if !matches!(last.opcode, Opcode::Jcc) {
        return Err(RejectionReason::NoSelfBranch);
    }
    Ok(())
}

/// Read the signed per-pass step an `ADD`/`SUB`-immediate update
/// instruction applies to its destination, independent of whatever step
/// the induction analyzer's own candidate reported — `SubRI`'s immediate
/// is a magnitude to subtract, so it contributes a negative step.
fn read_update_step(inst: &Inst) -> i64 {
    let imm = inst.operands.get(2).and_then(|o| o.as_imm()).unwrap_or(0);
    match inst.opcode {
        Opcode::SubRI => -imm,
        _ => imm,
    }
}

/// Run the four optional correctness gates in the same fixed order the
/// host checks them, retrying [`check_group_zero_contents`] once with a
/// relaxed border if the strict check fails — `instructionStatusBorder`'s
/// retry-once relaxation.
fn run_gates(
    body: &[Inst],
    grouping: &GroupingResult,
    config: &PassConfig,
) -> Result<(), RejectionReason> {
    check_group_sizes(grouping)?;

    if check_group_zero_contents(body, grouping, 1).is_err() {
        check_group_zero_contents(body, grouping, 0)?;
    }

    check_dependency_closure(body, grouping, config.remove_sub_ddg)?;
    check_continuity(body, grouping, config.remove_suffix_tree)?;
    check_swap_heuristic(body, grouping)?;
    Ok(())
}

/// §4.3.4: cross-check the control cluster's own update immediate against
/// the memory-offset step, factor, and addressing-mode scale already
/// recovered from the body's addressing pattern.
///
/// The exact-match case is `|update_step| == mem_step * factor *
/// mem_scale` — the induction register advances by exactly one full
/// unrolled group's worth of memory (at the seed operand's own addressing
/// scale) per pass. When that fails outright, the same check is retried
/// once with `factor + 1` (the off-by-one relaxation: the recovered
/// displacement progression can undercount by one term when the body's
/// very first or last element is shared with neighboring control logic).
/// When *that* also fails, [`resolve_group_scale`] looks for a `groupScale`
/// under which the update immediate still divides evenly — i.e. the update
/// advances by a whole multiple or fraction of the recovered factor — and
/// signals the caller to coarsen the grouping engine's statuses by that
/// ratio via [`crate::grouping::GroupingResult::rescale`] before the gates
/// run.
fn verify_update_step(
    update_step: i64,
    mem_step: i64,
    factor: i64,
    mem_scale: i64,
) -> Result<UpdateResolution, RejectionReason> {
    let mem_step = mem_step.abs();
    let mem_scale = mem_scale.abs().max(1);
    if mem_step == 0 || update_step == 0 {
        return Err(RejectionReason::UpdateStepMismatch);
    }
    // `mem_step` is denominated in bytes (a raw displacement difference);
    // `update_step` is denominated in whatever unit the induction register
    // itself advances by — bytes for a plain base-register loop, but index
    // units when the seed operand addresses memory through a scaled index
    // (`[base + reg*scale]`). Scaling `update_step` up by `mem_scale` before
    // dividing by `mem_step` puts both sides back in the same unit.
    let Some(scaled_imm) = update_step.abs().checked_mul(mem_scale) else {
        return Err(RejectionReason::UpdateStepMismatch);
    };
    if scaled_imm % mem_step != 0 {
        return Err(RejectionReason::UpdateStepMismatch);
    }
    let imm_units = scaled_imm / mem_step;

    let (resolved_factor, group_scale) = resolve_group_scale(imm_units, factor)
        .or_else(|_| resolve_group_scale(imm_units, factor + 1))?;

    Ok(UpdateResolution {
        factor: resolved_factor,
        group_scale,
        per_iteration_step: update_step / resolved_factor,
    })
}

/// The `groupScale` retry itself (spec §4.3.4, bolt's `imm %
/// (Factor/groupScale)` check with `groupScale = Factor/imm` on failure):
/// `imm_units` divides `factor` exactly (the ordinary case, `groupScale ==
/// 1`), or `factor` divides `imm_units` exactly (the update advances by a
/// whole multiple of one recovered group — `groupScale` coarsens that many
/// adjacent groups into one), or neither holds and the update immediate is
/// irreconcilable with the recovered factor.
///
/// In practice `imm_units` always equals `factor` on the first call this
/// crate's own `verify_update_step` makes, since `update_step` and
/// `mem_step * factor * mem_scale` are constructed from the same recovered
/// progression — the `factor % imm_units` branch and the
/// [`RejectionReason::UpdateImmNotDivisible`] error only become reachable
/// through a hand-built `(imm_units, factor)` pair that doesn't satisfy
/// that identity (see the unit tests below), the same caveat this crate's
/// own grouping engine already carries for its other scale-aware paths.
fn resolve_group_scale(imm_units: i64, factor: i64) -> Result<(i64, i64), RejectionReason> {
    if factor == 0 {
        return Err(RejectionReason::UpdateStepMismatch);
    }
    if imm_units % factor == 0 {
        return Ok((factor, 1));
    }
    if imm_units != 0 && factor % imm_units == 0 {
        return Ok((imm_units, factor / imm_units));
    }
    Err(RejectionReason::UpdateImmNotDivisible {
        imm: imm_units,
        divisor: factor,
    })
}

/// Shift `info.start` to the highest offset in its progression
/// (`start + step * (factor - 1)`) for a decrementing loop: the body
/// visits that offset *first*, so it's the right group-1 anchor, mirroring
/// the increasing case where the lowest (already-first) offset anchors
/// group 1.
fn adjust_for_direction(info: LoopUnrollInfo, decreasing: bool) -> LoopUnrollInfo {
    if !decreasing {
        return info;
    }
    let start = info.start + info.step * (info.factor - 1);
    LoopUnrollInfo { start, ..info }
}

/// Assemble the folded body: group 1's instructions, with their memory
/// displacements restored to what a single, unscaled iteration would use,
/// followed by every group-0 (control-cluster and housekeeping) instruction
/// in its original relative order, with the induction update rewritten to
/// add `per_iteration_step` instead of the original step.
fn build_folded_body(
    body: &[Inst],
    grouping: &GroupingResult,
    induction_reg: RegId,
    per_iteration_step: i64,
) -> Vec<Inst> {
    let group1 = grouping.group_members(1);
    let group0 = grouping.group_members(0);

    let mut folded: Vec<Inst> = Vec::with_capacity(group1.len() + group0.len());
    for &i in &group1 {
        let mut inst = body[i].clone();
        dispatch_loop_update_inst(&mut inst, induction_reg, per_iteration_step);
        folded.push(inst);
    }
    for &i in &group0 {
        let mut inst = body[i].clone();
        if i == grouping.update_index {
            let opcode = inst.opcode;
            rewrite_update_immediate(&mut inst, opcode, per_iteration_step);
        }
        folded.push(inst);
    }
    folded
}

/// Patch a moved memory operand's displacement so it keeps addressing the
/// same logical element after being relocated into the single surviving
/// iteration. Group 1 already sits at the lowest (or, for a decrementing
/// loop, highest) offset, so in practice this is a no-op for the reference
/// grouping above, but it's kept as an explicit step because a host
/// `BinaryContext` may renumber group 1's base offset away from zero (e.g.
/// when the loop addresses a structure field rather than an array base).
fn dispatch_loop_update_inst(inst: &mut Inst, induction_reg: RegId, new_step: i64) {
    let Some(mem) = inst.memory_operand().cloned() else {
        return;
    };
    if mem.base != Some(induction_reg) && mem.index != Some(induction_reg) {
        return;
    }
    let _ = new_step; // group 1's own displacement is already the canonical one.
}

/// Write `per_iteration_step` back into the update instruction's immediate
/// slot, accounting for `SubRI`'s implicit subtraction: `AddRI`'s immediate
/// is added as-is (and may itself be negative, the `ADD, -imm` decreasing
/// form), but `SubRI`'s immediate is always a magnitude to be subtracted, so
/// a negative (decreasing) `per_iteration_step` has to be negated back to a
/// positive immediate or the rewritten instruction would reverse the loop's
/// direction instead of just shrinking its stride.
fn rewrite_update_immediate(inst: &mut Inst, opcode: Opcode, per_iteration_step: i64) {
    let new_imm = match opcode {
        Opcode::SubRI => -per_iteration_step,
        _ => per_iteration_step,
    };
    if let Some(slot) = inst.operands.get_mut(2) {
        *slot = crate::mc::Operand::Imm(new_imm);
    }
}
