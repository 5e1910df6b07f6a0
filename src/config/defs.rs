use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use lazy_static::lazy_static;
use log::{info, LevelFilter};
use thiserror::Error;
use tokio::sync::Semaphore;

use crate::cli::Arguments;
use crate::config::gate::EnablementPolicy;
use crate::config::references::ReferenceSet;

// External software
pub const STAR_TAG: &str = "STAR";
pub const ARRIBA_TAG: &str = "arriba";
pub const STAR_FUSION_TAG: &str = "STAR-Fusion";
pub const SAMTOOLS_TAG: &str = "samtools";
pub const SQUID_TAG: &str = "squid";
pub const SQUID_ANNOTATE_TAG: &str = "AnnotateSQUIDOutput.py";
pub const ERICSCRIPT_TAG: &str = "ericscript.pl";
pub const FUSIONCATCHER_TAG: &str = "fusioncatcher";
pub const KALLISTO_TAG: &str = "kallisto";
pub const PIZZLY_TAG: &str = "pizzly";
pub const PIZZLY_FLATTEN_TAG: &str = "pizzly_flatten_json.py";
pub const FUSION_REPORT_TAG: &str = "fusion_report";
pub const DRAW_FUSIONS_TAG: &str = "draw_fusions.R";
pub const FUSION_INSPECTOR_TAG: &str = "FusionInspector";

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SamtoolsSubcommand {
    View,
    Sort,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum KallistoSubcommand {
    Quant,
}

// Static Filenames
pub const FUSION_LIST_FILE: &str = "fusion_list.tsv";
pub const FUSION_SUMMARY_FILE: &str = "fusion_genes_mqc.json";
pub const STAR_FUSION_PREDICTIONS: &str = "star-fusion.fusion_predictions.tsv";
pub const ERICSCRIPT_RESULTS: &str = "fusions.results.filtered.tsv";
pub const FUSIONCATCHER_RESULTS: &str = "final-list_candidate-fusion-genes.txt";
pub const KALLISTO_FUSION_FILE: &str = "fusion.txt";

// Output directories not owned by a fusion caller
pub const FUSION_REPORT_DIR: &str = "fusion_report";
pub const ARRIBA_VIS_DIR: &str = "arriba_visualization";
pub const FUSION_INSPECTOR_DIR: &str = "fusion_inspector";

// Static Parameters
pub const STDERR_TAIL_LINES: usize = 20;
pub const SAMPLE_CHANNEL_BUFFER: usize = 100;


/// The six fusion callers, in the canonical order used for slots and report arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Tool {
    Arriba,
    StarFusion,
    Squid,
    EricScript,
    FusionCatcher,
    Pizzly,
}

pub const TOOL_COUNT: usize = 6;

#[derive(Debug)]
pub struct ToolSpec {
    /// Directory name and file-name tag.
    pub tag: &'static str,
    /// fusion-report option naming this tool's input.
    pub report_flag: &'static str,
    pub paired_only: bool,
    pub result_ext: &'static str,
}

lazy_static! {
    pub static ref TOOL_SPECS: HashMap<Tool, ToolSpec> = {
        let mut m = HashMap::new();
        m.insert(Tool::Arriba, ToolSpec { tag: "arriba", report_flag: "--arriba", paired_only: false, result_ext: "tsv" });
        m.insert(Tool::StarFusion, ToolSpec { tag: "starfusion", report_flag: "--starfusion", paired_only: false, result_ext: "tsv" });
        m.insert(Tool::Squid, ToolSpec { tag: "squid", report_flag: "--squid", paired_only: false, result_ext: "txt" });
        m.insert(Tool::EricScript, ToolSpec { tag: "ericscript", report_flag: "--ericscript", paired_only: true, result_ext: "tsv" });
        m.insert(Tool::FusionCatcher, ToolSpec { tag: "fusioncatcher", report_flag: "--fusioncatcher", paired_only: false, result_ext: "txt" });
        m.insert(Tool::Pizzly, ToolSpec { tag: "pizzly", report_flag: "--pizzly", paired_only: true, result_ext: "txt" });
        m
    };
}

impl Tool {
    pub const ALL: [Tool; TOOL_COUNT] = [
        Tool::Arriba,
        Tool::StarFusion,
        Tool::Squid,
        Tool::EricScript,
        Tool::FusionCatcher,
        Tool::Pizzly,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn spec(self) -> &'static ToolSpec {
        &TOOL_SPECS[&self]
    }

    pub fn tag(self) -> &'static str {
        self.spec().tag
    }

    pub fn paired_only(self) -> bool {
        self.spec().paired_only
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}


#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EndType {
    #[default]
    Paired,
    Single,
}

impl EndType {
    pub fn from_single_end(single_end: bool) -> Self {
        if single_end { EndType::Single } else { EndType::Paired }
    }
}

impl fmt::Display for EndType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndType::Paired => f.write_str("paired-end"),
            EndType::Single => f.write_str("single-end"),
        }
    }
}


#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Missing reference for {tool}: {what} ({})", display_reference(.path))]
    MissingReference {
        tool: String,
        what: &'static str,
        path: Option<PathBuf>,
    },

    #[error("Invalid samplesheet {path:?}: {reason}")]
    InvalidSamplesheet { path: PathBuf, reason: String },

    #[error("Tool {tool} failed: {error}")]
    ToolExecution { tool: String, error: String },

    #[error("Join integrity violation: {0}")]
    JoinIntegrity(String),

    #[error("I/O error: {0}")]
    IOError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

fn display_reference(path: &Option<PathBuf>) -> String {
    match path {
        Some(p) => p.display().to_string(),
        None => "not provided".to_string(),
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(e: std::io::Error) -> Self {
        PipelineError::IOError(e.to_string())
    }
}


/// Immutable run-level configuration, built once in main and shared as `Arc<RunConfig>`.
pub struct RunConfig {
    pub cwd: PathBuf,
    pub out_dir: PathBuf,
    pub args: Arguments,
    pub end_type: EndType,
    pub policy: EnablementPolicy,
    pub references: ReferenceSet,
    /// Threads handed to each external tool.
    pub threads: usize,
    /// Memory ceiling handed to each external tool, in bytes.
    pub memory_bytes: u64,
    /// Bounds how many tool jobs run at once.
    pub job_semaphore: Arc<Semaphore>,
    pub log_level: LevelFilter,
}

impl RunConfig {
    /// Validates the enablement policy and references before anything executes.
    /// No partial configuration is accepted.
    pub fn build(
        args: Arguments,
        cwd: PathBuf,
        out_dir: PathBuf,
        threads: usize,
        memory_bytes: u64,
        log_level: LevelFilter,
    ) -> Result<Self, PipelineError> {
        if args.max_jobs == 0 {
            return Err(PipelineError::InvalidConfig("--max_jobs must be at least 1".to_string()));
        }

        let end_type = EndType::from_single_end(args.single_end);
        let policy = EnablementPolicy::from_args(&args);
        policy.validate()?;
        policy.validate_visualization(args.arriba_vis, args.fusion_inspector)?;

        let references = ReferenceSet::resolve(&args, &policy, &cwd)?;

        info!(
            "Enabled tools ({}): {}",
            end_type,
            policy
                .enabled_tools()
                .iter()
                .map(|t| t.tag())
                .collect::<Vec<_>>()
                .join(", ")
        );
        if policy.debug() {
            info!("Debug mode: fusion-report and downstream visualization of the report are skipped");
        }

        let job_semaphore = Arc::new(Semaphore::new(args.max_jobs));

        Ok(RunConfig {
            cwd,
            out_dir,
            args,
            end_type,
            policy,
            references,
            threads: threads.max(1),
            memory_bytes,
            job_semaphore,
            log_level,
        })
    }

    /// `<out>/<tool>/<sample>/`
    pub fn stage_dir(&self, tool: Tool, sample_id: &str) -> PathBuf {
        self.out_dir.join(tool.tag()).join(sample_id)
    }

    /// `<out>/<stage>/<sample>/` for the stages downstream of the join.
    pub fn downstream_dir(&self, stage: &str, sample_id: &str) -> PathBuf {
        self.out_dir.join(stage).join(sample_id)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_order_matches_slots() {
        for (i, tool) in Tool::ALL.iter().enumerate() {
            assert_eq!(tool.index(), i);
        }
        assert!(Tool::EricScript.paired_only());
        assert!(Tool::Pizzly.paired_only());
        assert!(!Tool::Squid.paired_only());
        assert_eq!(Tool::StarFusion.to_string(), "starfusion");
    }

    #[test]
    fn test_missing_reference_message() {
        let e = PipelineError::MissingReference {
            tool: "arriba".to_string(),
            what: "STAR index",
            path: None,
        };
        assert_eq!(e.to_string(), "Missing reference for arriba: STAR index (not provided)");
    }
}
