/// Functions and structs for building tool command lines and running them

use std::future::Future;
use std::path::PathBuf;
use std::process::Stdio;

use anyhow::{anyhow, Result};
use log::{debug, info, warn};
use tokio::process::Command;

use crate::config::defs::{PipelineError, STDERR_TAIL_LINES};
use crate::utils::streams::{read_child_output_to_vec, ChildStream};


/// One external command, fully resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Stage that owns the command: a tool tag or a downstream stage name.
    pub stage: String,
    pub sample_id: String,
    pub program: String,
    pub args: Vec<String>,
    pub work_dir: PathBuf,
    /// Redirect stdout here instead of discarding it.
    pub stdout_to: Option<PathBuf>,
    /// Files the command is declared to write. Runners that stand in for the
    /// real tool read this; the owning stage decides presence from its own
    /// result path, so a missing file here is never checked as a failure.
    pub produces: Vec<PathBuf>,
}

impl Invocation {
    pub fn new(stage: &str, sample_id: &str, program: &str, args: Vec<String>, work_dir: &std::path::Path) -> Self {
        Invocation {
            stage: stage.to_string(),
            sample_id: sample_id.to_string(),
            program: program.to_string(),
            args,
            work_dir: work_dir.to_path_buf(),
            stdout_to: None,
            produces: Vec::new(),
        }
    }

    pub fn produces(mut self, path: PathBuf) -> Self {
        self.produces.push(path);
        self
    }

    pub fn stdout_to(mut self, path: PathBuf) -> Self {
        self.stdout_to = Some(path);
        self
    }

    pub fn command_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        if let Some(out) = &self.stdout_to {
            line.push_str(&format!(" > {}", out.display()));
        }
        line
    }
}


#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    pub success: bool,
    pub code: Option<i32>,
    pub stderr_tail: Vec<String>,
}

impl CommandOutcome {
    pub fn ok() -> Self {
        CommandOutcome { success: true, code: Some(0), stderr_tail: Vec::new() }
    }

    pub fn failed(code: i32, stderr: &str) -> Self {
        CommandOutcome {
            success: false,
            code: Some(code),
            stderr_tail: stderr.lines().map(str::to_string).collect(),
        }
    }
}


/// Executes invocations. The pipeline is generic over this so process
/// spawning can be swapped out.
pub trait CommandRunner: Send + Sync + 'static {
    fn run(&self, invocation: Invocation) -> impl Future<Output = Result<CommandOutcome>> + Send;
}


/// Spawns real processes with tokio.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
    async fn run(&self, invocation: Invocation) -> Result<CommandOutcome> {
        debug!("[{}:{}] {}", invocation.stage, invocation.sample_id, invocation.command_line());

        let stdout = match &invocation.stdout_to {
            Some(path) => Stdio::from(std::fs::File::create(path)?),
            None => Stdio::null(),
        };

        let mut child = Command::new(&invocation.program)
            .args(&invocation.args)
            .current_dir(&invocation.work_dir)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| anyhow!("Failed to spawn {}: {}. Is it installed?", invocation.program, e))?;

        // Reap the child even when its stderr cannot be read
        let stderr_lines = read_child_output_to_vec(&mut child, ChildStream::Stderr).await;
        let status = child.wait().await?;
        let stderr_lines = stderr_lines.unwrap_or_else(|e| {
            warn!("[{}:{}] stderr unreadable: {}", invocation.stage, invocation.sample_id, e);
            Vec::new()
        });

        let skip = stderr_lines.len().saturating_sub(STDERR_TAIL_LINES);
        Ok(CommandOutcome {
            success: status.success(),
            code: status.code(),
            stderr_tail: stderr_lines.into_iter().skip(skip).collect(),
        })
    }
}


/// Logs each command and reports success without running anything.
/// Nothing is written, so every stage resolves to an absent result.
#[derive(Debug, Default, Clone, Copy)]
pub struct DryRunRunner;

impl CommandRunner for DryRunRunner {
    async fn run(&self, invocation: Invocation) -> Result<CommandOutcome> {
        info!("[dry run] [{}:{}] {}", invocation.stage, invocation.sample_id, invocation.command_line());
        for path in &invocation.produces {
            debug!("[dry run] [{}:{}] would write {}", invocation.stage, invocation.sample_id, path.display());
        }
        Ok(CommandOutcome::ok())
    }
}


/// Runs one invocation and maps spawn failures and non-zero exits to a tool crash.
pub async fn run_checked<R: CommandRunner>(runner: &R, invocation: Invocation) -> Result<(), PipelineError> {
    let program = invocation.program.clone();
    let context = format!("{} ({})", invocation.stage, invocation.sample_id);

    let outcome = runner
        .run(invocation)
        .await
        .map_err(|e| PipelineError::ToolExecution {
            tool: program.clone(),
            error: format!("{}: {}", context, e),
        })?;

    if !outcome.success {
        let code = outcome
            .code
            .map(|c| c.to_string())
            .unwrap_or_else(|| "signal".to_string());
        return Err(PipelineError::ToolExecution {
            tool: program,
            error: format!("{} exited with {}\n{}", context, code, outcome.stderr_tail.join("\n")),
        });
    }
    Ok(())
}


fn path_arg(path: &std::path::Path) -> String {
    path.to_string_lossy().to_string()
}


pub mod star {
    use std::path::Path;
    use crate::utils::command::path_arg;
    use crate::utils::sample::Reads;

    /// Chimeric detection settings differ per downstream caller.
    #[derive(Debug, Clone, Copy, PartialEq)]
    pub enum StarProfile {
        Arriba,
        Squid,
    }

    pub fn arg_generator(
        star_index: &Path,
        reads: &Reads,
        out_prefix: &Path,
        threads: usize,
        memory_bytes: u64,
        gzipped: bool,
        profile: StarProfile,
    ) -> Vec<String> {
        let mut args_vec: Vec<String> = Vec::new();
        args_vec.push("--genomeDir".to_string());
        args_vec.push(path_arg(star_index));
        args_vec.push("--readFilesIn".to_string());
        for file in reads.files() {
            args_vec.push(path_arg(file));
        }
        if gzipped {
            args_vec.push("--readFilesCommand".to_string());
            args_vec.push("zcat".to_string());
        }
        args_vec.push("--runThreadN".to_string());
        args_vec.push(threads.to_string());
        args_vec.push("--outFileNamePrefix".to_string());
        args_vec.push(format!("{}/", out_prefix.display()));

        match profile {
            StarProfile::Arriba => {
                for arg in [
                    "--outSAMtype", "BAM", "Unsorted",
                    "--outSAMunmapped", "Within",
                    "--outBAMcompression", "0",
                    "--outFilterMultimapNmax", "1",
                    "--outFilterMismatchNmax", "3",
                    "--chimSegmentMin", "10",
                    "--chimOutType", "WithinBAM", "SoftClip",
                    "--chimJunctionOverhangMin", "10",
                    "--chimScoreMin", "1",
                    "--chimScoreDropMax", "30",
                    "--chimScoreJunctionNonGTAG", "0",
                    "--chimScoreSeparation", "1",
                    "--alignSJstitchMismatchNmax", "5", "-1", "5", "5",
                    "--chimSegmentReadGapMax", "3",
                ] {
                    args_vec.push(arg.to_string());
                }
            }
            StarProfile::Squid => {
                for arg in [
                    "--twopassMode", "Basic",
                    "--chimOutType", "SeparateSAMold",
                    "--chimSegmentMin", "20",
                    "--chimJunctionOverhangMin", "12",
                    "--alignSJDBoverhangMin", "10",
                    "--outReadsUnmapped", "Fastx",
                    "--outSAMstrandField", "intronMotif",
                    "--outSAMtype", "BAM", "SortedByCoordinate",
                ] {
                    args_vec.push(arg.to_string());
                }
                args_vec.push("--limitBAMsortRAM".to_string());
                args_vec.push(memory_bytes.to_string());
            }
        }
        args_vec
    }
}

pub mod arriba {
    use std::path::Path;
    use crate::utils::command::path_arg;

    pub fn arg_generator(bam: &Path, fasta: &Path, gtf: &Path, blacklist: &Path, out: &Path, discarded: &Path) -> Vec<String> {
        vec![
            "-x".to_string(), path_arg(bam),
            "-a".to_string(), path_arg(fasta),
            "-g".to_string(), path_arg(gtf),
            "-b".to_string(), path_arg(blacklist),
            "-o".to_string(), path_arg(out),
            "-O".to_string(), path_arg(discarded),
        ]
    }
}

pub mod star_fusion {
    use std::path::Path;
    use crate::utils::command::path_arg;
    use crate::utils::sample::Reads;

    pub fn arg_generator(genome_lib: &Path, reads: &Reads, out_dir: &Path, threads: usize) -> Vec<String> {
        let mut args_vec: Vec<String> = Vec::new();
        args_vec.push("--genome_lib_dir".to_string());
        args_vec.push(path_arg(genome_lib));
        args_vec.push("--left_fq".to_string());
        args_vec.push(path_arg(reads.r1()));
        if let Some(r2) = reads.r2() {
            args_vec.push("--right_fq".to_string());
            args_vec.push(path_arg(r2));
        }
        args_vec.push("--CPU".to_string());
        args_vec.push(threads.to_string());
        args_vec.push("--examine_coding_effect".to_string());
        args_vec.push("--output_dir".to_string());
        args_vec.push(path_arg(out_dir));
        args_vec
    }
}

pub mod samtools {
    use std::path::Path;
    use crate::config::defs::SamtoolsSubcommand;
    use crate::utils::command::path_arg;

    pub fn arg_generator(subcommand: SamtoolsSubcommand, input: &Path, output: &Path, threads: usize) -> Vec<String> {
        let mut args_vec: Vec<String> = Vec::new();
        match subcommand {
            SamtoolsSubcommand::View => {
                args_vec.push("view".to_string());
                args_vec.push("-Sb".to_string());
            }
            SamtoolsSubcommand::Sort => {
                args_vec.push("sort".to_string());
            }
        }
        args_vec.push("-@".to_string());
        args_vec.push(threads.to_string());
        args_vec.push("-o".to_string());
        args_vec.push(path_arg(output));
        args_vec.push(path_arg(input));
        args_vec
    }
}

pub mod squid {
    use std::path::Path;
    use crate::utils::command::path_arg;

    pub fn arg_generator(sorted_bam: &Path, chimeric_bam: &Path, out_prefix: &Path) -> Vec<String> {
        vec![
            "-b".to_string(), path_arg(sorted_bam),
            "-c".to_string(), path_arg(chimeric_bam),
            "-o".to_string(), path_arg(out_prefix),
        ]
    }

    pub fn annotate_arg_generator(gtf: &Path, sv: &Path, annotated: &Path) -> Vec<String> {
        vec![path_arg(gtf), path_arg(sv), path_arg(annotated)]
    }
}

pub mod ericscript {
    use std::path::Path;
    use crate::utils::command::path_arg;
    use crate::utils::sample::Reads;

    pub fn arg_generator(db: &Path, reads: &Reads, out_dir: &Path, threads: usize) -> Vec<String> {
        let mut args_vec: Vec<String> = vec![
            "-db".to_string(), path_arg(db),
            "-name".to_string(), "fusions".to_string(),
            "-p".to_string(), threads.to_string(),
            "-o".to_string(), path_arg(out_dir),
        ];
        for file in reads.files() {
            args_vec.push(path_arg(file));
        }
        args_vec
    }
}

pub mod fusioncatcher {
    use std::path::Path;
    use crate::utils::command::path_arg;
    use crate::utils::sample::Reads;

    pub fn arg_generator(data_dir: &Path, reads: &Reads, out_dir: &Path, threads: usize) -> Vec<String> {
        let inputs = reads
            .files()
            .iter()
            .map(|f| path_arg(f))
            .collect::<Vec<_>>()
            .join(",");
        let mut args_vec: Vec<String> = vec![
            "-d".to_string(), path_arg(data_dir),
            "-i".to_string(), inputs,
            "--threads".to_string(), threads.to_string(),
            "-o".to_string(), path_arg(out_dir),
            "--skip-blat".to_string(),
        ];
        if reads.r2().is_none() {
            args_vec.push("--single-end".to_string());
        }
        args_vec
    }
}

pub mod kallisto {
    use std::path::Path;
    use crate::config::defs::KallistoSubcommand;
    use crate::utils::command::path_arg;
    use crate::utils::sample::Reads;

    pub fn arg_generator(subcommand: KallistoSubcommand, index: &Path, reads: &Reads, out_dir: &Path, threads: usize) -> Vec<String> {
        let mut args_vec: Vec<String> = Vec::new();
        match subcommand {
            KallistoSubcommand::Quant => args_vec.push("quant".to_string()),
        }
        args_vec.push("-t".to_string());
        args_vec.push(threads.to_string());
        args_vec.push("-i".to_string());
        args_vec.push(path_arg(index));
        args_vec.push("--fusion".to_string());
        args_vec.push("-o".to_string());
        args_vec.push(path_arg(out_dir));
        for file in reads.files() {
            args_vec.push(path_arg(file));
        }
        args_vec
    }
}

pub mod pizzly {
    use std::path::Path;
    use crate::cli::Arguments;
    use crate::utils::command::path_arg;

    pub fn arg_generator(args: &Arguments, gtf: &Path, transcripts: &Path, cache: &Path, out_prefix: &Path, fusion_txt: &Path) -> Vec<String> {
        vec![
            "-k".to_string(), args.pizzly_k.to_string(),
            "--gtf".to_string(), path_arg(gtf),
            "--cache".to_string(), path_arg(cache),
            "--align-score".to_string(), "2".to_string(),
            "--insert-size".to_string(), args.pizzly_insert_size.to_string(),
            "--fasta".to_string(), path_arg(transcripts),
            "--output".to_string(), path_arg(out_prefix),
            path_arg(fusion_txt),
        ]
    }

    pub fn flatten_arg_generator(json: &Path, flat: &Path) -> Vec<String> {
        vec![path_arg(json), path_arg(flat)]
    }
}

pub mod fusion_report {
    use std::path::{Path, PathBuf};
    use crate::config::defs::Tool;
    use crate::utils::command::path_arg;

    /// `run <sample> <out> <db> --<tool> <file>... --allow-multiple-gene-symbols`
    pub fn arg_generator(sample_id: &str, out_dir: &Path, db: &Path, tools: &[(Tool, PathBuf)], tool_cutoff: Option<usize>) -> Vec<String> {
        let mut args_vec: Vec<String> = vec![
            "run".to_string(),
            sample_id.to_string(),
            path_arg(out_dir),
            path_arg(db),
        ];
        for (tool, path) in tools {
            args_vec.push(tool.spec().report_flag.to_string());
            args_vec.push(path_arg(path));
        }
        args_vec.push("--allow-multiple-gene-symbols".to_string());
        if let Some(cutoff) = tool_cutoff {
            args_vec.push("--tool-cutoff".to_string());
            args_vec.push(cutoff.to_string());
        }
        args_vec
    }
}

pub mod draw_fusions {
    use std::path::Path;
    use crate::utils::command::path_arg;

    pub fn arg_generator(fusions: &Path, gtf: &Path, pdf: &Path) -> Vec<String> {
        vec![
            format!("--fusions={}", path_arg(fusions)),
            format!("--annotation={}", path_arg(gtf)),
            format!("--output={}", path_arg(pdf)),
        ]
    }
}

pub mod fusion_inspector {
    use std::path::Path;
    use crate::utils::command::path_arg;
    use crate::utils::sample::Reads;

    pub fn arg_generator(fusion_list: &Path, genome_lib: &Path, reads: &Reads, out_dir: &Path, sample_id: &str, threads: usize) -> Vec<String> {
        let mut args_vec: Vec<String> = vec![
            "--fusions".to_string(), path_arg(fusion_list),
            "--genome_lib".to_string(), path_arg(genome_lib),
            "--left_fq".to_string(), path_arg(reads.r1()),
        ];
        if let Some(r2) = reads.r2() {
            args_vec.push("--right_fq".to_string());
            args_vec.push(path_arg(r2));
        }
        args_vec.push("--CPU".to_string());
        args_vec.push(threads.to_string());
        args_vec.push("-O".to_string());
        args_vec.push(path_arg(out_dir));
        args_vec.push("--out_prefix".to_string());
        args_vec.push(sample_id.to_string());
        args_vec.push("--vis".to_string());
        args_vec
    }
}
