//! Pass configuration.
//!
//! Mirrors the command-line switches the host framework exposes for this
//! pass; parsing argv is the host's job; this crate only deserializes the
//! resulting flag values (from argv-derived JSON, a config file, or
//! whatever the embedding binary already parsed them into).

use std::path::PathBuf;

#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassConfig {
    /// `--loop-fold`: run the fold pass at all.
    pub loop_fold: bool,
    /// `--print-loop-instructions`: log each loop's recovered body.
    pub print_loop_instructions: bool,
    /// `--specify-serialize-loop-file-name`: write the fold pass's JSON
    /// dump to this path instead of logging it.
    pub serialize_loop_file_name: Option<PathBuf>,
    /// `--loop-unroll`: run the ancillary unroll pass.
    pub loop_unroll: bool,
    /// `--loop-unroll-profile`: weight the unroll pass's factor choice by
    /// profiled execution counts.
    pub loop_unroll_profile: bool,
    /// `--print-profiler-loop`: log the profiler's hot/mid/cold
    /// classification per loop.
    pub print_profiler_loop: bool,
    /// `--specify-serialize-profiler-loop-file-name`: write the profiler's
    /// JSON dump to this path instead of logging it.
    pub serialize_profiler_loop_file_name: Option<PathBuf>,
    /// `--remove-sub-ddg`: enable the dependency-closure gate.
    pub remove_sub_ddg: bool,
    /// `--remove-suffix-tree`: enable the continuity gate.
    pub remove_suffix_tree: bool,
}

impl Default for PassConfig {
    fn default() -> Self {
        Self {
            loop_fold: true,
            print_loop_instructions: false,
            serialize_loop_file_name: None,
            loop_unroll: false,
            loop_unroll_profile: false,
            print_profiler_loop: false,
            serialize_profiler_loop_file_name: None,
            remove_sub_ddg: false,
            remove_suffix_tree: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_runs_fold_only() {
        let config = PassConfig::default();
        assert!(config.loop_fold);
        assert!(!config.loop_unroll);
        assert!(!config.remove_sub_ddg);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn deserializes_from_json() {
        let json = r#"{
            "loop_fold": true,
            "print_loop_instructions": true,
            "serialize_loop_file_name": null,
            "loop_unroll": true,
            "loop_unroll_profile": false,
            "print_profiler_loop": false,
            "serialize_profiler_loop_file_name": null,
            "remove_sub_ddg": true,
            "remove_suffix_tree": false
        }"#;
        let config: PassConfig = serde_json::from_str(json).unwrap();
        assert!(config.print_loop_instructions);
        assert!(config.remove_sub_ddg);
    }
}
