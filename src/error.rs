//! Rejection taxonomy for the loop-fold and loop-unroll passes.

use thiserror::Error;

use crate::mc::RegId;

/// Why a loop was rejected by one of the pass stages.
///
/// The core never panics on malformed input; every analysis step returns
/// `bool`/`Option` as described by the algorithm, and the public entry
/// points (`fold_loop`, `unroll_loop`) wrap the first failing check into one
/// of these variants purely for logging and testing. The accept/reject
/// decision itself is unchanged by this wrapping.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RejectionReason {
    /// The loop body is not a single basic block.
    #[error("loop is not a single-block loop")]
    NotSingleBlock,
    /// The block has fewer than two instructions.
    #[error("loop body has fewer than two instructions")]
    BodyTooSmall,
    /// The terminator is not a conditional branch back to the block's own
    /// label.
    #[error("loop body does not end in a self-branch")]
    NoSelfBranch,
    /// No `ADD reg, imm` candidate led to a valid memory-access pattern.
    #[error("no induction register candidate passed isIteratorRegister")]
    NoInductionRegister,
    /// The collected displacements did not form an arithmetic progression of
    /// at least two elements with non-zero step.
    #[error("displacement set is not an arithmetic progression")]
    NotArithmeticProgression,
    /// `getLoopUnrollFactor` succeeded but returned `Factor < 2`.
    #[error("unroll factor is less than 2")]
    FactorTooSmall,
    /// No `ADD`/`SUB` update instruction could be located at the expected
    /// position relative to the compare/branch tail.
    #[error("no update instruction found for register {0:?}")]
    NoUpdateInstruction(RegId),
    /// A memory operand indexed by the induction register had an offset that
    /// was not a multiple of the group step.
    #[error("memory offset is not a multiple of the unroll step")]
    OffsetNotMultipleOfStep,
    /// The control cluster's update immediate did not match `Step * Factor`
    /// (the per-element memory step times the recovered unroll factor).
    #[error("update step does not match Step * Factor")]
    UpdateStepMismatch,
    /// The update immediate was not divisible by `Factor / groupScale`, and
    /// `Factor` was not divisible by the update immediate either — the
    /// `groupScale` rescale path of the scale-aware update-step check (spec
    /// §4.3.4, see [`crate::rewriter`]'s `resolve_group_scale`) could not
    /// reconcile the two at any coarsening ratio.
    #[error("update immediate {imm} not divisible by factor/scale {divisor}")]
    UpdateImmNotDivisible {
        /// The update immediate under inspection.
        imm: i64,
        /// `Factor / groupScale` at the time of the check.
        divisor: i64,
    },
    /// Non-zero groups were not contiguously numbered, or had unequal sizes.
    #[error("groups are not contiguous or not equally sized")]
    GroupSizeMismatch,
    /// Group 0 contained an instruction other than compare/branch/ADD-SUB
    /// immediate, and the border was not relaxed to 0.
    #[error("group 0 contains a non-control instruction")]
    GroupZeroContentsInvalid,
    /// A status-`k` instruction depended on an instruction outside group `k`,
    /// or a group was not a single weakly-connected component. Only checked
    /// when [`crate::config::PassConfig::remove_sub_ddg`] is set.
    #[error("dependency closure violated")]
    DependencyClosureViolated,
    /// Groups did not occupy contiguous index ranges, or corresponding
    /// instructions across groups had differing opcodes. Only checked when
    /// [`crate::config::PassConfig::remove_suffix_tree`] is set.
    #[error("groups are not contiguous in body order")]
    ContinuityViolated,
    /// The pairwise-swap heuristic fired: the last instructions of groups 1
    /// and 2 were a vector-add op with swapped operand registers.
    #[error("pairwise-swap heuristic rejected the fold")]
    SwapHeuristicTriggered,
}

impl RejectionReason {
    /// Coarse bucket this reason falls into, matching the four taxonomy
    /// buckets in the specification's error-handling design.
    pub const fn bucket(&self) -> RejectionBucket {
        match self {
            Self::NotSingleBlock | Self::BodyTooSmall | Self::NoSelfBranch => {
                RejectionBucket::Structural
            }
            Self::NoInductionRegister
            | Self::NotArithmeticProgression
            | Self::FactorTooSmall => RejectionBucket::Induction,
            Self::NoUpdateInstruction(_)
            | Self::OffsetNotMultipleOfStep
            | Self::UpdateStepMismatch
            | Self::UpdateImmNotDivisible { .. } => RejectionBucket::Grouping,
            Self::GroupSizeMismatch
            | Self::GroupZeroContentsInvalid
            | Self::DependencyClosureViolated
            | Self::ContinuityViolated
            | Self::SwapHeuristicTriggered => RejectionBucket::Gate,
        }
    }
}

/// The four failure buckets from spec §7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionBucket {
    /// Loop shape itself is ineligible.
    Structural,
    /// Induction-variable/iteration-bound recovery failed.
    Induction,
    /// Per-instruction grouping failed a hard check.
    Grouping,
    /// One of the optional correctness gates rejected the fold.
    Gate,
}

impl core::fmt::Display for RejectionBucket {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            Self::Structural => "structural",
            Self::Induction => "induction",
            Self::Grouping => "grouping",
            Self::Gate => "gate",
        };
        f.write_str(s)
    }
}
