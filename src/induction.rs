//! I: induction-variable recovery over a single-block loop body.
//!
//! `BinaryLoop` accumulates what this analysis learns about one candidate
//! loop: which register drives it, its per-iteration step, and — once a
//! bounding compare is found — the iteration range used by the unroll
//! pass's trip-count estimate. Everything here only ever reads the body;
//! nothing is mutated until the grouping engine and rewriter commit to a
//! fold.

use crate::mc::{Inst, Opcode, RegId};
use crate::memory_operand::MemoryOperand;

/// Accumulated induction-analysis state for one loop body.
#[derive(Debug, Clone, Default)]
pub struct BinaryLoop {
    pub induction_reg: Option<RegId>,
    pub step: i64,
    iteration_begin: Option<i64>,
    iteration_end: Option<i64>,
}

impl BinaryLoop {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_induction_reg(&mut self, reg: RegId, step: i64) {
        self.induction_reg = Some(reg);
        self.step = step;
    }

    pub fn set_iteration_begin(&mut self, value: i64) {
        self.iteration_begin = Some(value);
    }

    pub fn set_iteration_end(&mut self, value: i64) {
        self.iteration_end = Some(value);
    }

    pub fn iteration_begin(&self) -> Option<i64> {
        self.iteration_begin
    }

    pub fn iteration_end(&self) -> Option<i64> {
        self.iteration_end
    }

    /// Whether both ends of the iteration range have been set and the
    /// range is non-degenerate.
    pub fn is_bound_valid(&self) -> bool {
        match (self.iteration_begin, self.iteration_end) {
            (Some(b), Some(e)) => e != b,
            _ => false,
        }
    }

    /// Trip count implied by the recovered bound and step, if both are
    /// known. Rounds away a partial final iteration in the caller's favor
    /// (the unroll pass treats this as an upper bound, not an exact count).
    pub fn trip_count(&self) -> Option<i64> {
        if self.step == 0 {
            return None;
        }
        let (begin, end) = (self.iteration_begin?, self.iteration_end?);
        let span = end - begin;
        if span == 0 || (span > 0) != (self.step > 0) {
            return None;
        }
        Some(span / self.step + if span % self.step != 0 { 1 } else { 0 })
    }
}

/// An induction-register candidate: the register an `ADD`/`SUB`-immediate
/// instruction updates, the index of that instruction in the body, and the
/// per-iteration step it applies (negative for a decrementing loop).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub reg: RegId,
    pub update_index: usize,
    pub step: i64,
}

/// Whether `reg` is used as a base or index register in some memory operand
/// elsewhere in `body`, at the *same addressing-mode position and opcode* as
/// the first operand it was seen in — the `isIteratorRegister` test, read
/// together with `getLoopUnrollFactor`'s "same position, same opcode as the
/// seed" requirement (spec §4.2): an induction variable earns its name by
/// repeatedly addressing the *same kind* of memory access, not merely by
/// appearing somewhere in a base/index slot once and something unrelated
/// elsewhere.
fn is_iterator_register(body: &[Inst], reg: RegId) -> bool {
    let mut seed: Option<MemoryOperand> = None;
    for inst in body {
        let Some(mem) = MemoryOperand::from_instruction(inst) else {
            continue;
        };
        let Some(pos) = mem.position_of(reg) else {
            continue;
        };
        match &seed {
            None => seed = Some(mem),
            Some(seed_mem) => {
                if seed_mem.position_of(reg) == Some(pos)
                    && seed_mem.opcode == mem.opcode
                    && seed_mem.eq_modulo_disp(&mem, false)
                {
                    return true;
                }
            }
        }
    }
    false
}

/// Scan `body` for `ADD`/`SUB`-immediate instructions whose destination
/// register also addresses memory somewhere in the block, in body order.
/// One-operand accumulator-implicit forms are normalized onto
/// `accumulator` before inspection, mirroring the pre-pass that rewrites
/// `ADD64i32` into the three-operand `ADD64ri32` shape.
pub fn find_induction_candidates(body: &[Inst], accumulator: RegId) -> Vec<Candidate> {
    let mut normalized: Vec<Inst> = body.to_vec();
    for inst in &mut normalized {
        inst.normalize_add_imm(accumulator);
    }

    let mut out = Vec::new();
    for (idx, inst) in normalized.iter().enumerate() {
        let sign = match inst.opcode {
            Opcode::AddRI => 1,
            Opcode::SubRI => -1,
            _ => continue,
        };
        let Some(dst) = inst.operands.first().and_then(|o| o.as_reg()) else {
            continue;
        };
        let Some(imm) = inst.operands.get(2).and_then(|o| o.as_imm()) else {
            continue;
        };
        if is_iterator_register(body, dst) {
            out.push(Candidate {
                reg: dst,
                update_index: idx,
                step: sign * imm,
            });
        }
    }
    out
}

/// The first induction candidate that passes `isIteratorRegister`, i.e.
/// [`find_induction_candidates`]'s first result in body order. Returns
/// `None` when no `ADD`/`SUB`-immediate instruction in the body addresses
/// memory with its own destination register.
pub fn find_induction_register(body: &[Inst], accumulator: RegId) -> Option<Candidate> {
    find_induction_candidates(body, accumulator).into_iter().next()
}

/// Re-validate a specific register as the loop's induction variable:
/// it must have at least one `ADD`/`SUB`-immediate update in the body and
/// must address memory somewhere in the block.
pub fn check_induction_reg(body: &[Inst], reg: RegId, accumulator: RegId) -> bool {
    find_induction_candidates(body, accumulator)
        .iter()
        .any(|c| c.reg == reg)
        && is_iterator_register(body, reg)
}

/// Locate the compare instruction that bounds the induction register
/// against an immediate, and report `(begin, end)` in iteration-count
/// terms relative to the first memory access's displacement.
///
/// The body has no preheader to read an initial value from (a single-block
/// loop by definition starts and ends inside the block), so `begin` is
/// fixed at 0 and `end` is the number of wrap-arounds implied by the
/// comparison immediate divided by the recovered step's magnitude.
pub fn check_cmp_instruction(body: &[Inst], induction_reg: RegId, step: i64) -> Option<(i64, i64)> {
    if step == 0 {
        return None;
    }
    let cmp = body.iter().find(|inst| {
        inst.is_compare()
            && inst
                .operands
                .first()
                .and_then(|o| o.as_reg())
                .is_some_and(|r| r == induction_reg)
    })?;
    let bound = cmp.operands.get(1).and_then(|o| o.as_imm())?;
    Some((0, bound / step.abs()))
}

/// Run the full induction analysis over `body`: find the induction
/// register, its step, and — if a bounding compare exists — the iteration
/// range. Returns a populated [`BinaryLoop`] regardless of whether the
/// bound was recovered; callers check [`BinaryLoop::is_bound_valid`]
/// before relying on it.
pub fn iteration_analysis(body: &[Inst], accumulator: RegId) -> Option<BinaryLoop> {
    let candidate = find_induction_register(body, accumulator)?;
    let mut loop_info = BinaryLoop::new();
    loop_info.set_induction_reg(candidate.reg, candidate.step);
    if let Some((begin, end)) = check_cmp_instruction(body, candidate.reg, candidate.step) {
        loop_info.set_iteration_begin(begin);
        loop_info.set_iteration_end(end);
    }
    Some(loop_info)
}

/// Estimate an unroll count for the ancillary loop-unroll pass: the
/// recovered trip count, clamped to `max_factor`, or `None` if no bound
/// was recovered (the pass then falls back to its configured default).
pub fn get_unroll_count(loop_info: &BinaryLoop, max_factor: i64) -> Option<i64> {
    if !loop_info.is_bound_valid() {
        return None;
    }
    let trips = loop_info.trip_count()?;
    if trips < 2 {
        return None;
    }
    Some(trips.min(max_factor))
}

/// `LoopUnrollInfo` from spec §4.3.2: one arithmetic progression of memory
/// displacements addressed through the induction register, all sharing the
/// same opcode and the same addressing-mode position as `seed` (the first
/// matching operand encountered) — the concrete `MemOp` the grouping engine
/// cross-checks every other instruction's memory operand against.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopUnrollInfo {
    pub factor: i64,
    pub step: i64,
    pub start: i64,
    pub seed: MemoryOperand,
}

/// Every memory operand in `body` addressed by `induction_reg`, restricted
/// to the ones matching `seed`'s opcode, position, and addressing mode
/// modulo displacement — `eq_modulo_disp`, spec §4.1's "same array accessed
/// at a different offset" test. Instructions whose opcode is in `exclude`,
/// or whose operand is `eq_modulo_disp`-equal to one of `exclude_mem_ops`
/// (used by [`enumerate_loop_unroll_infos`] to skip already-claimed
/// patterns), are skipped entirely, including as a candidate seed.
fn seed_and_offsets(
    body: &[Inst],
    induction_reg: RegId,
    exclude_opcodes: &[Opcode],
    exclude_mem_ops: &[MemoryOperand],
) -> Option<(MemoryOperand, Vec<i64>)> {
    let mut seed: Option<MemoryOperand> = None;
    let mut offsets = Vec::new();
    for inst in body {
        if exclude_opcodes.contains(&inst.opcode) {
            continue;
        }
        let Some(mem) = MemoryOperand::from_instruction(inst) else {
            continue;
        };
        if mem.position_of(induction_reg).is_none() {
            continue;
        }
        if exclude_mem_ops
            .iter()
            .any(|excluded| excluded.opcode == mem.opcode && excluded.eq_modulo_disp(&mem, false))
        {
            continue;
        }
        match &seed {
            None => {
                seed = Some(mem.clone());
                offsets.push(mem.effective_disp());
            }
            Some(s) => {
                if s.opcode == mem.opcode
                    && s.position_of(induction_reg) == mem.position_of(induction_reg)
                    && s.eq_modulo_disp(&mem, false)
                {
                    offsets.push(mem.effective_disp());
                }
            }
        }
    }
    Some((seed?, offsets))
}

/// The unroll factor implied by a set of offsets addressed through the
/// induction register: the offsets must form an arithmetic progression of
/// at least two distinct values with a non-zero common difference, and the
/// factor is the number of terms.
///
/// `exclude` skips designated opcodes (e.g. the update instruction itself,
/// which also touches the induction register but not through a memory
/// operand, so in practice this only matters for bodies whose update
/// instruction is itself a load/store addressed by the register it
/// updates).
pub fn get_loop_unroll_factor(body: &[Inst], induction_reg: RegId, exclude: &[Opcode]) -> Option<i64> {
    get_loop_unroll_info(body, induction_reg, exclude).map(|info| info.factor)
}

/// As [`get_loop_unroll_factor`], but also reports the recovered `Step`
/// (the arithmetic progression's common difference), `Start` (its first
/// term), and the `seed` operand spec §4.3.2's `LoopUnrollInfo` carries.
pub fn get_loop_unroll_info(
    body: &[Inst],
    induction_reg: RegId,
    exclude: &[Opcode],
) -> Option<LoopUnrollInfo> {
    get_loop_unroll_info_excluding(body, induction_reg, exclude, &[])
}

/// As [`get_loop_unroll_info`], additionally skipping any memory operand
/// that's `eq_modulo_disp`-equal (same opcode too) to one of
/// `exclude_mem_ops` — the hook [`enumerate_loop_unroll_infos`] uses to find
/// a *second*, distinct addressing pattern in the same body.
pub fn get_loop_unroll_info_excluding(
    body: &[Inst],
    induction_reg: RegId,
    exclude_opcodes: &[Opcode],
    exclude_mem_ops: &[MemoryOperand],
) -> Option<LoopUnrollInfo> {
    let (seed, mut offsets) = seed_and_offsets(body, induction_reg, exclude_opcodes, exclude_mem_ops)?;
    offsets.sort_unstable();
    offsets.dedup();
    if offsets.len() < 2 {
        return None;
    }
    let step = offsets[1] - offsets[0];
    if step == 0 {
        return None;
    }
    for pair in offsets.windows(2) {
        if pair[1] - pair[0] != step {
            return None;
        }
    }
    Some(LoopUnrollInfo {
        factor: offsets.len() as i64,
        step,
        start: offsets[0],
        seed,
    })
}

/// Enumerate every distinct `LoopUnrollInfo` pattern in `body` addressed
/// through `induction_reg` whose recovered `Factor` equals `expected_factor`
/// — spec §4.3.2's "repeat for every addressing pattern, keep the ones whose
/// Factor agrees with the loop's Factor" multi-pattern support, needed when
/// a single unrolled body interleaves more than one array access through the
/// same induction register (e.g. a read from one array and a write to
/// another, both indexed by the same pointer).
pub fn enumerate_loop_unroll_infos(
    body: &[Inst],
    induction_reg: RegId,
    exclude_opcodes: &[Opcode],
    expected_factor: i64,
) -> Vec<LoopUnrollInfo> {
    let mut infos = Vec::new();
    let mut seen: Vec<MemoryOperand> = Vec::new();
    while let Some(info) =
        get_loop_unroll_info_excluding(body, induction_reg, exclude_opcodes, &seen)
    {
        seen.push(info.seed.clone());
        if info.factor == expected_factor {
            infos.push(info);
        }
    }
    infos
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mc::x86::{MemoryOperandRaw, RAX, RBX, RCX};

    fn loaded_body() -> Vec<Inst> {
        vec![
            Inst::mov_load(RBX, MemoryOperandRaw::based(RAX, 0)),
            Inst::mov_load(RBX, MemoryOperandRaw::based(RAX, 8)),
            Inst::mov_load(RBX, MemoryOperandRaw::based(RAX, 16)),
            Inst::add_ri(RAX, RAX, 24),
            Inst::cmp(RAX, crate::mc::Operand::Imm(240)),
            Inst::jcc("body"),
        ]
    }

    #[test]
    fn finds_induction_register_addressing_memory() {
        let body = loaded_body();
        let candidate = find_induction_register(&body, RAX).unwrap();
        assert_eq!(candidate.reg, RAX);
        assert_eq!(candidate.step, 24);
    }

    #[test]
    fn unroll_factor_from_arithmetic_progression() {
        let body = loaded_body();
        let factor = get_loop_unroll_factor(&body, RAX, &[]).unwrap();
        assert_eq!(factor, 3);
    }

    #[test]
    fn unroll_info_reports_step_and_start() {
        let body = loaded_body();
        let info = get_loop_unroll_info(&body, RAX, &[]).unwrap();
        assert_eq!(info.factor, 3);
        assert_eq!(info.step, 8);
        assert_eq!(info.start, 0);
    }

    #[test]
    fn non_progression_offsets_reject() {
        let body = vec![
            Inst::mov_load(RBX, MemoryOperandRaw::based(RAX, 0)),
            Inst::mov_load(RBX, MemoryOperandRaw::based(RAX, 8)),
            Inst::mov_load(RBX, MemoryOperandRaw::based(RAX, 20)),
            Inst::add_ri(RAX, RAX, 24),
        ];
        assert!(get_loop_unroll_factor(&body, RAX, &[]).is_none());
    }

    #[test]
    fn iteration_analysis_recovers_bound() {
        let body = loaded_body();
        let info = iteration_analysis(&body, RAX).unwrap();
        assert!(info.is_bound_valid());
        assert_eq!(info.iteration_end(), Some(10));
    }

    // A store to an unrelated array, addressed through the same register
    // but at an opcode that doesn't match the load seed's, must not widen
    // the progression — it's a different pattern, not more terms of this
    // one.
    #[test]
    fn differing_opcode_does_not_join_the_seed_pattern() {
        let body = vec![
            Inst::mov_load(RBX, MemoryOperandRaw::based(RAX, 0)),
            Inst::mov_store(MemoryOperandRaw::based(RAX, 4), RBX),
            Inst::mov_load(RBX, MemoryOperandRaw::based(RAX, 8)),
            Inst::add_ri(RAX, RAX, 16),
            Inst::jcc("body"),
        ];
        let info = get_loop_unroll_info(&body, RAX, &[]).unwrap();
        assert_eq!(info.factor, 2);
        assert_eq!(info.step, 8);
    }

    // Two interleaved patterns through the same register: a load at one
    // position/opcode and a store at another. `get_loop_unroll_info` only
    // reports the first (the load); `enumerate_loop_unroll_infos` recovers
    // both once each pattern's own factor is known to match.
    #[test]
    fn enumerate_recovers_both_interleaved_patterns() {
        let body = vec![
            Inst::mov_load(RBX, MemoryOperandRaw::based(RAX, 0)),
            Inst::mov_store(MemoryOperandRaw::based(RAX, 100), RCX),
            Inst::mov_load(RBX, MemoryOperandRaw::based(RAX, 8)),
            Inst::mov_store(MemoryOperandRaw::based(RAX, 108), RCX),
            Inst::add_ri(RAX, RAX, 16),
            Inst::jcc("body"),
        ];
        let infos = enumerate_loop_unroll_infos(&body, RAX, &[], 2);
        assert_eq!(infos.len(), 2);
        assert!(infos.iter().any(|i| i.seed.opcode == Opcode::MovLoad));
        assert!(infos.iter().any(|i| i.seed.opcode == Opcode::MovStore));
    }

    // A register used as a plain base in one instruction and as a scaled
    // index in another is not addressing the same pattern twice, even if
    // the opcode matches — `isIteratorRegister` must not conflate the two
    // addressing-mode positions.
    #[test]
    fn differing_position_does_not_satisfy_iterator_register() {
        let body = vec![
            Inst::mov_load(RBX, MemoryOperandRaw::based(RAX, 0)),
            Inst::mov_load(RBX, MemoryOperandRaw::scaled_index(RCX, RAX, 4, 0)),
            Inst::add_ri(RAX, RAX, 8),
            Inst::jcc("body"),
        ];
        assert!(find_induction_register(&body, RAX).is_none());
    }
}
