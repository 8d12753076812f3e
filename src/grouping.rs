//! G: the grouping engine.
//!
//! Partitions a fully-unrolled loop body into the control cluster (group 0:
//! the bounding compare, the self-branch, and the induction-register
//! update) and `Factor` equally-shaped copies of the original loop body
//! (groups 1..=Factor), then runs the correctness gates that decide
//! whether those copies really are interchangeable repetitions and not
//! just instructions that happened to address memory at evenly-spaced
//! offsets.

use std::collections::HashSet;

use crate::error::RejectionReason;
use crate::induction::LoopUnrollInfo;
use crate::mc::{Inst, RegId, RegSet};
use crate::memory_operand::MemoryOperand;

/// The outcome of [`assign_groups`]: one group number per body instruction,
/// plus the recovered unroll factor (the highest group number, i.e. the
/// number of loop-body copies folded into one) and the indices of the three
/// control-cluster instructions the rewriter needs by identity rather than
/// by group membership alone.
#[derive(Debug, Clone)]
pub struct GroupingResult {
    pub groups: Vec<usize>,
    /// Whether a given instruction's status was pinned authoritatively by
    /// step 4's memory-offset classification — a `block`ed instruction's
    /// status can never be overwritten by back-propagation from a
    /// lower-priority consumer.
    pub block: Vec<bool>,
    pub factor: usize,
    pub update_index: usize,
    pub branch_index: usize,
    pub cmp_index: Option<usize>,
}

impl GroupingResult {
    pub fn group_members(&self, group: usize) -> Vec<usize> {
        self.groups
            .iter()
            .enumerate()
            .filter(|(_, g)| **g == group)
            .map(|(i, _)| i)
            .collect()
    }

    /// Rescale every non-zero status by `ceil(status / group_scale)`,
    /// coarsening `group_scale`-many adjacent original groups into one —
    /// spec §4.3.4's rescale step after a `groupScale` retry is signaled.
    /// Control indices stay at status 0 regardless.
    pub fn rescale(&mut self, group_scale: usize) {
        if group_scale <= 1 {
            return;
        }
        for g in self.groups.iter_mut() {
            if *g != 0 {
                *g = (*g + group_scale - 1) / group_scale;
            }
        }
        self.factor = self.groups.iter().copied().max().unwrap_or(0);
    }
}

/// Locate the induction-register update instruction independently of the
/// induction analyzer's own candidate search — spec §4.3.1's structural
/// preamble. The update sits a fixed offset before the self-branch
/// (shifted one further back if a bounding compare sits between them); if
/// that slot isn't an `ADD`/`SUB`-immediate on `induction_reg`, the
/// adjacent slot is tried once before giving up.
pub fn locate_update_instruction(
    body: &[Inst],
    induction_reg: RegId,
) -> Result<usize, RejectionReason> {
    let branch_index = body
        .iter()
        .rposition(Inst::is_branch)
        .ok_or(RejectionReason::NoSelfBranch)?;
    let has_cmp_before_branch = branch_index
        .checked_sub(1)
        .and_then(|i| body.get(i))
        .is_some_and(Inst::is_compare);
    let primary = if has_cmp_before_branch {
        branch_index.checked_sub(2)
    } else {
        branch_index.checked_sub(1)
    };
    let retry = primary.and_then(|p| p.checked_sub(1));

    for idx in [primary, retry].into_iter().flatten() {
        if matches_update_pattern(&body[idx], induction_reg) {
            return Ok(idx);
        }
    }
    Err(RejectionReason::NoUpdateInstruction(induction_reg))
}

fn matches_update_pattern(inst: &Inst, induction_reg: RegId) -> bool {
    if !(inst.is_add_ri() || inst.is_sub_ri()) {
        return false;
    }
    let dst = inst.operands.first().and_then(|o| o.as_reg());
    let src = inst.operands.get(1).and_then(|o| o.as_reg());
    let imm = inst.operands.get(2).and_then(|o| o.as_imm());
    dst == Some(induction_reg) && src == Some(induction_reg) && imm.is_some()
}

/// Locate the compare that bounds `induction_reg` against an immediate, if
/// the body has one. A single-block loop whose `ADD`/`SUB`-immediate
/// destination is directly compared is the common case; a loop bounded some
/// other way (e.g. a fixed trip count already baked into the branch target)
/// has no such instruction, and `None` here is not itself a rejection.
pub fn locate_cmp_instruction(body: &[Inst], induction_reg: RegId) -> Option<usize> {
    body.iter().position(|inst| {
        inst.is_compare() && inst.operands.first().and_then(|o| o.as_reg()) == Some(induction_reg)
    })
}

/// `memOffset = eff_disp - start`; `group = |memOffset / step| + 1` — BOLT's
/// own formula for placing a memory access addressed by the induction
/// register into one of the `Factor` per-iteration groups, spec §4.3.3
/// step 4a. Returns `None` when `memOffset` isn't an exact multiple of
/// `step`, or when the quotient falls outside `1..=factor` (the access
/// belongs to neither this pattern's groups, so step 4 declines to pin it
/// and leaves the instruction to forward/back propagation instead).
fn memory_group(mem_offset: i64, step: i64, factor: i64) -> Option<i64> {
    if mem_offset % step != 0 {
        return None;
    }
    let group = (mem_offset / step).abs() + 1;
    if (1..=factor).contains(&group) {
        Some(group)
    } else {
        None
    }
}

/// Find the `LoopUnrollInfo` whose seed shares `mem`'s opcode, addressing-
/// mode position relative to `induction_reg`, and addressing mode modulo
/// displacement — the pattern `mem` actually belongs to, among possibly
/// several interleaved ones.
fn find_matching_info<'a>(
    infos: &'a [LoopUnrollInfo],
    induction_reg: RegId,
    mem: &MemoryOperand,
) -> Option<&'a LoopUnrollInfo> {
    let pos = mem.position_of(induction_reg)?;
    infos.iter().find(|info| {
        info.seed.position_of(induction_reg) == Some(pos)
            && info.seed.opcode == mem.opcode
            && info.seed.eq_modulo_disp(mem, false)
    })
}

/// Assign every instruction in `body` a group number, per spec §4.3.3:
///
/// 1. The control cluster (`update_index`, `branch_index`, `cmp_index`) is
///    pinned to status 0 and never reconsidered.
/// 2. Every other instruction builds a last-writer "chain" over the
///    registers it reads (an `xorps reg, reg` zero idiom is treated as
///    reading a constant, consuming none of its own nominal sources).
/// 3. Status is promoted to the maximum non-zero status among the chain.
/// 4. A memory operand addressed by `induction_reg` through one of `infos`
///    authoritatively overrides step 3's promotion and marks the
///    instruction `block`ed.
/// 5. The resolved status (if non-zero) is back-propagated onto the
///    instruction's own chain: a status-0 producer inherits it outright and
///    the inheritance recurses into that producer's own chain in turn. A
///    producer that already carries a non-zero status (pinned by step 4, or
///    already claimed by an earlier consumer) is left alone — the first
///    consumer to resolve a shared producer wins.
///
/// An instruction that ends with status 0 and isn't part of the control
/// cluster is left there — the later correctness gates, not this function,
/// decide whether a non-control status-0 instruction is acceptable (e.g. a
/// reduction accumulator's `xorps` zero-init with no memory operand of its
/// own).
pub fn assign_groups(
    body: &[Inst],
    induction_reg: RegId,
    infos: &[LoopUnrollInfo],
    update_index: usize,
    branch_index: usize,
    cmp_index: Option<usize>,
) -> Result<GroupingResult, RejectionReason> {
    let n = body.len();
    let mut control: HashSet<usize> = HashSet::new();
    control.insert(update_index);
    control.insert(branch_index);
    if let Some(c) = cmp_index {
        control.insert(c);
    }
    let is_control: Vec<bool> = (0..n).map(|i| control.contains(&i)).collect();

    let mut status: Vec<i64> = vec![0; n];
    let mut block: Vec<bool> = vec![false; n];
    let mut written_regs: Vec<RegSet> = vec![RegSet::empty(); n];
    let mut chain: Vec<Vec<usize>> = vec![Vec::new(); n];

    for i in 0..n {
        let inst = &body[i];
        if is_control[i] {
            written_regs[i] = inst.written_regs();
            continue;
        }

        // Steps 1-2: last-writer chain, consuming matched source bits.
        let mut sources = if inst.is_xorps_zero_idiom() {
            RegSet::empty()
        } else {
            inst.source_regs()
        };
        for j in (0..i).rev() {
            if sources.is_empty() {
                break;
            }
            let w = written_regs[j];
            if w.intersects(sources) {
                chain[i].push(j);
                sources.subtract(w);
            }
        }
        written_regs[i] = inst.written_regs();

        // Step 3: promote to the chain's maximum non-zero status.
        let mut promoted: Option<i64> = None;
        for &j in &chain[i] {
            if status[j] != 0 && promoted.is_none_or(|s| status[j] > s) {
                promoted = Some(status[j]);
            }
        }
        if let Some(s) = promoted {
            status[i] = s;
        }

        // Step 4: memory-offset classification overrides step 3, but only
        // for a memory operand that actually matches one of the recovered
        // patterns (same opcode, same addressing-mode position relative to
        // `induction_reg`) — an operand addressing `induction_reg` through
        // an unrelated pattern (e.g. a store pattern when only a load
        // pattern was recovered) is left to propagation instead of being
        // hard-rejected outright.
        if let Some(mem) = MemoryOperand::from_instruction(inst) {
            if let Some(info) = find_matching_info(infos, induction_reg, &mem) {
                let mem_offset = mem.effective_disp() - info.start;
                match memory_group(mem_offset, info.step, info.factor) {
                    Some(group) => {
                        status[i] = group;
                        block[i] = true;
                    }
                    None => return Err(RejectionReason::OffsetNotMultipleOfStep),
                }
            }
        }

        // Step 5: back-propagate the resolved status onto this
        // instruction's own chain.
        back_propagate(i, status[i], &chain, &is_control, &mut status);
    }

    let groups: Vec<usize> = status.iter().map(|&s| s as usize).collect();
    let factor = groups.iter().copied().max().unwrap_or(0);
    Ok(GroupingResult {
        groups,
        block,
        factor,
        update_index,
        branch_index,
        cmp_index,
    })
}

/// Step 5's recursive back-propagation: a status-0 producer with no
/// group-determining source of its own inherits its consumer's resolved
/// status, and that inheritance is propagated further down the producer's
/// own chain in turn. A producer that already carries a non-zero status —
/// whether pinned authoritatively by step 4 or promoted by its own step 3 —
/// is never touched again; this is what stops one consumer from stealing an
/// instruction that another consumer (or step 4) already placed in a
/// different group. Control-cluster instructions are never touched.
fn back_propagate(
    i: usize,
    new_status: i64,
    chain: &[Vec<usize>],
    is_control: &[bool],
    status: &mut [i64],
) {
    if new_status == 0 {
        return;
    }
    for &j in &chain[i] {
        if is_control[j] || status[j] != 0 {
            continue;
        }
        status[j] = new_status;
        back_propagate(j, new_status, chain, is_control, status);
    }
}

/// Groups `1..=factor` must all be non-empty and of equal size; group
/// numbers above `factor` must not occur.
pub fn check_group_sizes(result: &GroupingResult) -> Result<(), RejectionReason> {
    if result.factor < 2 {
        return Err(RejectionReason::FactorTooSmall);
    }
    let size0 = result.group_members(1).len();
    if size0 == 0 {
        return Err(RejectionReason::GroupSizeMismatch);
    }
    for g in 2..=result.factor {
        if result.group_members(g).len() != size0 {
            return Err(RejectionReason::GroupSizeMismatch);
        }
    }
    if result.groups.iter().any(|&g| g > result.factor) {
        return Err(RejectionReason::GroupSizeMismatch);
    }
    Ok(())
}

/// Group 0 may only contain the compare, the self-branch, and
/// `ADD`/`SUB`-immediate instructions, unless `border` has been relaxed to
/// 0 (`instructionStatusBorder`'s retry-once relaxation), in which case the
/// check is skipped entirely. Every status-0 instruction is checked, not
/// just the three known control-cluster indices — a status-0 instruction
/// that isn't part of the control cluster (e.g. a zero-source producer with
/// no memory operand of its own) is exactly the case this gate exists to
/// pass or reject.
pub fn check_group_zero_contents(
    body: &[Inst],
    result: &GroupingResult,
    border: usize,
) -> Result<(), RejectionReason> {
    if border == 0 {
        return Ok(());
    }
    for i in result.group_members(0) {
        let inst = &body[i];
        if !(inst.is_compare() || inst.is_branch() || inst.is_add_ri() || inst.is_sub_ri()) {
            return Err(RejectionReason::GroupZeroContentsInvalid);
        }
    }
    Ok(())
}

/// Every instruction assigned to group `k >= 1` must only consume
/// registers last written within group `k` or group 0 (the shared
/// induction register and any other control-owned value). A source
/// written by a *different* non-zero group means the groups are not
/// independent repetitions of each other and folding would change
/// semantics.
///
/// Only run when `enabled` (`PassConfig::remove_sub_ddg`); this gate is
/// stricter than strictly necessary for many real loop bodies and the
/// host leaves it off by default.
pub fn check_dependency_closure(
    body: &[Inst],
    result: &GroupingResult,
    enabled: bool,
) -> Result<(), RejectionReason> {
    if !enabled {
        return Ok(());
    }
    let mut last_writer: std::collections::HashMap<RegId, usize> = std::collections::HashMap::new();
    for (i, inst) in body.iter().enumerate() {
        let my_group = result.groups[i];
        if my_group != 0 {
            for reg in inst.source_regs().iter() {
                if let Some(&writer_idx) = last_writer.get(&reg) {
                    let writer_group = result.groups[writer_idx];
                    if writer_group != 0 && writer_group != my_group {
                        return Err(RejectionReason::DependencyClosureViolated);
                    }
                }
            }
        }
        for reg in inst.written_regs().iter() {
            last_writer.insert(reg, i);
        }
    }
    Ok(())
}

/// Groups `1..=factor` must occupy contiguous, equal-length index ranges
/// in body order, and instructions at corresponding positions within each
/// range must share an opcode — i.e. each group really is a textually
/// identical copy of the others, just operating on a different memory
/// offset.
///
/// Only run when `enabled` (`PassConfig::remove_suffix_tree`).
pub fn check_continuity(
    body: &[Inst],
    result: &GroupingResult,
    enabled: bool,
) -> Result<(), RejectionReason> {
    if !enabled {
        return Ok(());
    }
    let ranges: Vec<Vec<usize>> = (1..=result.factor).map(|g| result.group_members(g)).collect();
    let Some(first) = ranges.first() else {
        return Ok(());
    };
    let len = first.len();
    for range in &ranges {
        if range.len() != len {
            return Err(RejectionReason::ContinuityViolated);
        }
        let is_contiguous = range.windows(2).all(|w| w[1] == w[0] + 1);
        if !is_contiguous {
            return Err(RejectionReason::ContinuityViolated);
        }
    }
    for pos in 0..len {
        let opcode = body[ranges[0][pos]].opcode;
        for range in &ranges[1..] {
            if body[range[pos]].opcode != opcode {
                return Err(RejectionReason::ContinuityViolated);
            }
        }
    }
    Ok(())
}

/// The pairwise-swap heuristic: if the last instructions of groups 1 and 2
/// are both eligible read-modify-write vector ops
/// ([`crate::mc::Opcode::is_swap_heuristic_candidate`]) whose operand
/// registers are exactly swapped between the two groups, the fold is
/// rejected. Two groups that differ only by which register holds which
/// partial sum are not safe to collapse into one — a later group may be
/// consuming the other's partial result rather than computing an
/// independent one.
pub fn check_swap_heuristic(body: &[Inst], result: &GroupingResult) -> Result<(), RejectionReason> {
    if result.factor < 2 {
        return Ok(());
    }
    let (Some(&last1), Some(&last2)) = (
        result.group_members(1).last(),
        result.group_members(2).last(),
    ) else {
        return Ok(());
    };
    let (i1, i2) = (&body[last1], &body[last2]);
    if i1.opcode != i2.opcode || !i1.opcode.is_swap_heuristic_candidate() {
        return Ok(());
    }
    let regs = |inst: &Inst| -> Option<(RegId, RegId)> {
        Some((
            inst.operands.first()?.as_reg()?,
            inst.operands.get(1)?.as_reg()?,
        ))
    };
    if let (Some((a0, a1)), Some((b0, b1))) = (regs(i1), regs(i2)) {
        if a0 == b1 && a1 == b0 && a0 != a1 {
            return Err(RejectionReason::SwapHeuristicTriggered);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::induction::get_loop_unroll_info;
    use crate::mc::x86::{xmm, MemoryOperandRaw, RAX, RBX};
    use crate::mc::Operand;

    fn unrolled_body() -> Vec<Inst> {
        vec![
            Inst::mov_load(RBX, MemoryOperandRaw::based(RAX, 0)),
            Inst::mov_store(MemoryOperandRaw::based(RAX, 0), RBX),
            Inst::mov_load(RBX, MemoryOperandRaw::based(RAX, 8)),
            Inst::mov_store(MemoryOperandRaw::based(RAX, 8), RBX),
            Inst::mov_load(RBX, MemoryOperandRaw::based(RAX, 16)),
            Inst::mov_store(MemoryOperandRaw::based(RAX, 16), RBX),
            Inst::add_ri(RAX, RAX, 24),
            Inst::cmp(RAX, Operand::Imm(240)),
            Inst::jcc("body"),
        ]
    }

    fn infos_for(body: &[Inst]) -> Vec<LoopUnrollInfo> {
        vec![get_loop_unroll_info(body, RAX, &[]).unwrap()]
    }

    #[test]
    fn assigns_three_equal_groups_plus_control() {
        let body = unrolled_body();
        let infos = infos_for(&body);
        let result = assign_groups(&body, RAX, &infos, 6, 8, Some(7)).unwrap();
        assert_eq!(result.factor, 3);
        assert_eq!(result.group_members(1).len(), 2);
        assert_eq!(result.group_members(2).len(), 2);
        assert_eq!(result.group_members(3).len(), 2);
        assert_eq!(result.group_members(0).len(), 3);
        check_group_sizes(&result).unwrap();
        check_group_zero_contents(&body, &result, 1).unwrap();
        check_continuity(&body, &result, true).unwrap();
        check_swap_heuristic(&body, &result).unwrap();
    }

    #[test]
    fn relaxed_border_skips_group_zero_check() {
        let body = unrolled_body();
        let infos = infos_for(&body);
        let result = assign_groups(&body, RAX, &infos, 6, 8, Some(7)).unwrap();
        assert!(check_group_zero_contents(&body, &result, 0).is_ok());
    }

    #[test]
    fn locates_update_instruction_adjacent_to_branch() {
        let body = unrolled_body();
        assert_eq!(locate_update_instruction(&body, RAX).unwrap(), 6);
    }

    #[test]
    fn locates_update_instruction_without_a_compare() {
        let body = vec![
            Inst::mov_load(RBX, MemoryOperandRaw::based(RAX, 0)),
            Inst::add_ri(RAX, RAX, 8),
            Inst::jcc("body"),
        ];
        assert_eq!(locate_update_instruction(&body, RAX).unwrap(), 1);
    }

    // The update instruction is nowhere near the compare/branch tail: the
    // tail itself has no ADD/SUB-immediate in either the primary or the
    // one-slot-earlier retry position, so the structural preamble gives up
    // rather than silently trusting a stale induction-analyzer candidate.
    #[test]
    fn no_update_instruction_near_tail_rejects() {
        let body = vec![
            Inst::add_ri(RAX, RAX, 16),
            Inst::mov_load(RBX, MemoryOperandRaw::based(RAX, 0)),
            Inst::mov_store(MemoryOperandRaw::based(RAX, 0), RBX),
            Inst::mov_load(RBX, MemoryOperandRaw::based(RAX, 8)),
            Inst::mov_store(MemoryOperandRaw::based(RAX, 8), RBX),
            Inst::cmp(RAX, Operand::Imm(16)),
            Inst::jcc("body"),
        ];
        assert_eq!(
            locate_update_instruction(&body, RAX),
            Err(RejectionReason::NoUpdateInstruction(RAX))
        );
    }

    // A `xorps xmm, xmm` zero-init has no sources to inherit a group from
    // and no memory operand of its own — it must land at status 0 as
    // housekeeping, not force a hard rejection the way an unconditional
    // `found.ok_or(...)?` would.
    #[test]
    fn xorps_zero_idiom_lands_at_status_zero_not_rejected() {
        // The reset sits at the *end* of the body with nothing left to read
        // it afterwards (it re-primes xmm0 for the next outer iteration),
        // so it genuinely has no group-determining consumer here and must
        // stay at status 0 rather than forcing a hard rejection.
        let body = vec![
            Inst::mov_load(RBX, MemoryOperandRaw::based(RAX, 0)),
            Inst::addsd(xmm(0), Operand::Reg(RBX)),
            Inst::mov_load(RBX, MemoryOperandRaw::based(RAX, 8)),
            Inst::addsd(xmm(0), Operand::Reg(RBX)),
            Inst::xorps(xmm(0), xmm(0)),
            Inst::add_ri(RAX, RAX, 16),
            Inst::jcc("body"),
        ];
        let infos = infos_for(&body);
        let result = assign_groups(&body, RAX, &infos, 5, 6, None).unwrap();
        assert_eq!(result.groups[4], 0);
        assert!(check_group_sizes(&result).is_ok());
    }

    // A producer that only reads a status-0 value (here, the xorps
    // zero-init) resolves to status 0 itself until a later consumer's
    // back-propagation assigns it a real group — step 5 of the algorithm,
    // not a forward-only `last_writer` lookup that would reject this body
    // outright for having no group-determining source.
    #[test]
    fn back_propagation_assigns_group_to_zero_source_producer() {
        let body = vec![
            Inst::xorps(xmm(0), xmm(0)),
            Inst::mov_load(RBX, MemoryOperandRaw::based(RAX, 0)),
            Inst::addsd(xmm(0), Operand::Reg(RBX)),
            Inst::mov_load(RBX, MemoryOperandRaw::based(RAX, 8)),
            Inst::addsd(xmm(0), Operand::Reg(RBX)),
            Inst::add_ri(RAX, RAX, 16),
            Inst::jcc("body"),
        ];
        let infos = infos_for(&body);
        let result = assign_groups(&body, RAX, &infos, 5, 6, None).unwrap();
        // The first addsd reads RBX (group 1's load) and xmm0 (status 0 at
        // the time it runs); it resolves to group 1 and back-propagates
        // that onto the xorps.
        assert_eq!(result.groups[0], 1);
        assert_eq!(result.groups[2], 1);
        assert_eq!(result.groups[4], 2);
    }

    #[test]
    fn swap_heuristic_flags_swapped_operands() {
        // Two groups whose last instruction is the same read-modify-write
        // vector op, with the operand registers exactly swapped between
        // them. `assign_groups` is bypassed here: this test isolates the
        // heuristic itself from def/use resolution.
        let body = vec![
            Inst::addsd(xmm(0), Operand::Reg(xmm(1))),
            Inst::addsd(xmm(1), Operand::Reg(xmm(0))),
        ];
        let result = GroupingResult {
            groups: vec![1, 2],
            block: vec![true, true],
            factor: 2,
            update_index: 0,
            branch_index: 1,
            cmp_index: None,
        };
        assert_eq!(
            check_swap_heuristic(&body, &result),
            Err(RejectionReason::SwapHeuristicTriggered)
        );
    }

    #[test]
    fn rescale_coarsens_groups() {
        let mut result = GroupingResult {
            groups: vec![0, 1, 2, 3, 4, 0],
            block: vec![true, true, true, true, true, true],
            factor: 4,
            update_index: 0,
            branch_index: 5,
            cmp_index: None,
        };
        result.rescale(2);
        assert_eq!(result.groups, vec![0, 1, 1, 2, 2, 0]);
        assert_eq!(result.factor, 2);
    }
}
