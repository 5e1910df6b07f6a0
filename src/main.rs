use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use env_logger::Builder;
use log::{debug, error, info, LevelFilter};

use rnafusion_pipelines::cli::{parse, Arguments};
use rnafusion_pipelines::config::defs::{PipelineError, RunConfig};
use rnafusion_pipelines::pipelines::rnafusion::{self, RunSummary};
use rnafusion_pipelines::pipelines::summary::SynthesisOutcome;
use rnafusion_pipelines::utils::command::{DryRunRunner, ProcessRunner};
use rnafusion_pipelines::utils::file::resolve_path;
use rnafusion_pipelines::utils::system::{compute_job_memory, compute_job_threads, detect_cores_and_load, detect_ram};


#[tokio::main]
async fn main() -> Result<()> {
    let run_start = Instant::now();

    let args = parse();

    let log_level = if args.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    Builder::new()
        .filter_level(log_level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{}] {}: {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .init();

    println!("\n-------------\n rnafusion\n-------------\n");

    let dir = std::env::current_dir()?;
    info!("The current directory is {:?}", dir);

    let (max_cores, cpu_load) = detect_cores_and_load(args.threads).await?;
    let job_threads = compute_job_threads(max_cores, cpu_load, args.max_jobs, args.threads);
    debug!(
        "Detected {} cores; CPU load {}%; {} threads per job across {} jobs",
        max_cores, cpu_load, job_threads, args.max_jobs
    );

    let (total_ram, available_ram) = detect_ram()?;
    debug!("Available RAM: {} bytes (~{} GiB)", available_ram, available_ram / 1_073_741_824);
    debug!("Total RAM: {} bytes (~{} GiB)", total_ram, total_ram / 1_073_741_824);
    let job_memory = compute_job_memory(available_ram, args.max_jobs, args.max_memory_gb);

    let out_dir = setup_output_dir(&args, &dir)?;
    info!("Writing results to {:?}", out_dir);
    let dry_run = args.dry_run;

    let result = match RunConfig::build(args, dir, out_dir, job_threads, job_memory, log_level) {
        Ok(config) => {
            let config = Arc::new(config);
            if dry_run {
                rnafusion::run(config, Arc::new(DryRunRunner)).await
            } else {
                rnafusion::run(config, Arc::new(ProcessRunner)).await
            }
        }
        Err(e) => Err(e),
    };

    match result {
        Ok(summary) => report(&summary),
        Err(e) => {
            error!("Pipeline failed: {} at {} milliseconds.", e, run_start.elapsed().as_millis());
            std::process::exit(1);
        }
    }

    println!("Run complete: {} milliseconds.", run_start.elapsed().as_millis());
    Ok(())
}


fn report(summary: &RunSummary) {
    for sample in &summary.samples {
        let found: Vec<&str> = sample
            .tools
            .iter()
            .filter(|(_, out)| out.is_present())
            .map(|(tool, _)| tool.tag())
            .collect();
        match &sample.synthesis {
            SynthesisOutcome::Synthesized(out) => info!(
                "{}: results from [{}], fusion list {}",
                sample.sample_id,
                found.join(", "),
                out.fusion_list.display()
            ),
            SynthesisOutcome::Skipped(reason) => info!(
                "{}: results from [{}], fusion-report skipped ({:?})",
                sample.sample_id,
                found.join(", "),
                reason
            ),
        }
    }
}


/// Sets up output directory
/// If `out_dir` is specified from args, uses it;
/// otherwise, creates a directory named `rnafusion_YYYYMMDD`.
/// Ensures the directory exists.
///
/// # Arguments
/// * `args` - The parsed command-line arguments.
/// * `cwd` - The current working directory.
/// # Returns
/// path to the output directory.
fn setup_output_dir(args: &Arguments, cwd: &Path) -> Result<PathBuf, PipelineError> {
    let out_dir = match &args.out_dir {
        Some(out) => resolve_path(Path::new(out), cwd),
        None => {
            let timestamp = chrono::Local::now().format("%Y%m%d").to_string();
            cwd.join(format!("rnafusion_{}", timestamp))
        }
    };
    fs::create_dir_all(&out_dir)
        .map_err(|e| PipelineError::IOError(format!("{}: {}", out_dir.display(), e)))?;
    Ok(out_dir)
}
