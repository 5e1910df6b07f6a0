use clap::Parser;
use crate::config::defs::Tool;

#[derive(Parser, Debug, Clone, Default)]
#[command(name = "rnafusion", version, about = "RNA fusion detection across independent fusion callers")]
pub struct Arguments {

    #[arg(short = 'v', long = "verbose", action)]
    pub verbose: bool,

    #[arg(short = 's', long = "samplesheet", help = "CSV with columns sample,fastq_1,fastq_2. Relative read paths resolve against the samplesheet directory.")]
    pub samplesheet: Option<String>,

    #[arg(short = 'i', long = "file1")]
    pub file1: Option<String>,

    #[arg(short = 'I', long = "file2")]
    pub file2: Option<String>,

    #[arg(long, help = "Sample identifier when running a single sample from -i/-I. Defaults to the R1 file prefix.")]
    pub sample: Option<String>,

    #[arg(short = 'o', long = "out", help = "Output directory for all generated files. If not specified, a directory named 'rnafusion_YYYYMMDD' will be created in the current working directory.")]
    pub out_dir: Option<String>,

    #[arg(long = "single_end", default_value_t = false)]
    pub single_end: bool,

    #[arg(long, default_value_t = false, help = "Run a single flagged tool in isolation, bypassing the paired-end restriction. Skips fusion-report.")]
    pub debug: bool,

    #[arg(long = "dry_run", default_value_t = false, help = "Log every command instead of executing it")]
    pub dry_run: bool,

    // Fusion callers
    #[arg(long, default_value_t = false)]
    pub arriba: bool,

    #[arg(long = "star_fusion", default_value_t = false)]
    pub star_fusion: bool,

    #[arg(long, default_value_t = false)]
    pub squid: bool,

    #[arg(long, default_value_t = false)]
    pub ericscript: bool,

    #[arg(long, default_value_t = false)]
    pub fusioncatcher: bool,

    #[arg(long, default_value_t = false)]
    pub pizzly: bool,

    // Visualization
    #[arg(long = "arriba_vis", default_value_t = false)]
    pub arriba_vis: bool,

    #[arg(long = "fusion_inspector", default_value_t = false)]
    pub fusion_inspector: bool,

    // References
    #[arg(long, help = "Genome FASTA (arriba)")]
    pub fasta: Option<String>,

    #[arg(long, help = "Gene annotation GTF (arriba, squid, pizzly, arriba visualization)")]
    pub gtf: Option<String>,

    #[arg(long, help = "Transcript FASTA (pizzly)")]
    pub transcript: Option<String>,

    #[arg(long = "star_index", help = "STAR genome index directory (arriba, squid)")]
    pub star_index: Option<String>,

    #[arg(long = "arriba_ref", help = "Arriba blacklist file")]
    pub arriba_ref: Option<String>,

    #[arg(long = "star_fusion_ref", help = "CTAT genome lib directory (STAR-Fusion, FusionInspector)")]
    pub star_fusion_ref: Option<String>,

    #[arg(long = "ericscript_ref", help = "EricScript database directory")]
    pub ericscript_ref: Option<String>,

    #[arg(long = "fusioncatcher_ref", help = "FusionCatcher data directory")]
    pub fusioncatcher_ref: Option<String>,

    #[arg(long = "pizzly_index", help = "Kallisto index built on the transcript FASTA (pizzly)")]
    pub pizzly_index: Option<String>,

    #[arg(long = "fusion_report_db", help = "fusion-report database directory")]
    pub fusion_report_db: Option<String>,

    // Resources
    #[arg(long, help = "Threads per tool job. Defaults to the detected physical cores.")]
    pub threads: Option<usize>,

    #[arg(long = "max_memory_gb", help = "Memory ceiling per tool job in GiB. Defaults to available RAM divided across jobs.")]
    pub max_memory_gb: Option<u64>,

    #[arg(long = "max_jobs", default_value_t = 4, help = "Maximum number of tool jobs running at once")]
    pub max_jobs: usize,

    // Tool parameters
    #[arg(long = "tool_cutoff", help = "fusion-report: minimum number of tools that must agree on a fusion")]
    pub tool_cutoff: Option<usize>,

    #[arg(long = "pizzly_k", default_value_t = 31)]
    pub pizzly_k: usize,

    #[arg(long = "pizzly_insert_size", default_value_t = 400)]
    pub pizzly_insert_size: usize,
}

impl Arguments {
    /// Whether the tool was requested on the command line.
    /// This is only the raw flag; the enablement gate decides whether it runs.
    pub fn tool_flag(&self, tool: Tool) -> bool {
        match tool {
            Tool::Arriba => self.arriba,
            Tool::StarFusion => self.star_fusion,
            Tool::Squid => self.squid,
            Tool::EricScript => self.ericscript,
            Tool::FusionCatcher => self.fusioncatcher,
            Tool::Pizzly => self.pizzly,
        }
    }
}
