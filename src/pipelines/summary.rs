// src/pipelines/summary.rs: per-sample fusion-report over the joined row

use std::path::{Path, PathBuf};

use log::info;

use crate::config::defs::{
    PipelineError, RunConfig, Tool, FUSION_LIST_FILE, FUSION_REPORT_DIR, FUSION_REPORT_TAG,
    FUSION_SUMMARY_FILE,
};
use crate::utils::command::{fusion_report, run_checked, CommandRunner, Invocation};
use crate::utils::file::{file_path_manipulator, is_nonempty_file, rename_into};
use crate::utils::join::JoinedRow;


#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    DebugMode,
    NoToolsEnabled,
    /// Every enabled tool came back absent or empty.
    NoEvidence,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryOutputs {
    pub fusion_list: PathBuf,
    pub summary: PathBuf,
    /// Tools whose results went into the report, canonical order.
    pub tools: Vec<Tool>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SynthesisOutcome {
    Skipped(SkipReason),
    Synthesized(SummaryOutputs),
}

impl SynthesisOutcome {
    pub fn fusion_list(&self) -> Option<&Path> {
        match self {
            SynthesisOutcome::Synthesized(out) => Some(&out.fusion_list),
            SynthesisOutcome::Skipped(_) => None,
        }
    }
}


/// Present, non-empty slots in canonical tool order.
pub fn build_tool_args(row: &JoinedRow) -> Vec<(Tool, PathBuf)> {
    row.slots()
        .filter_map(|(tool, out)| out.path().map(|p| (tool, p)))
        .filter(|(_, path)| is_nonempty_file(path))
        .map(|(tool, path)| (tool, path.to_path_buf()))
        .collect()
}


/// Runs fusion-report for one joined row and gives its outputs sample-scoped names.
///
/// # Arguments
///
/// * `config` - RunConfig struct from main.
/// * `runner` - Executes fusion_report.
/// * `row` - Completed row from the aggregator.
///
/// # Returns
/// `Skipped` when the run or the row has nothing to report, otherwise the renamed outputs.
pub async fn synthesize<R: CommandRunner>(
    config: &RunConfig,
    runner: &R,
    row: &JoinedRow,
) -> Result<SynthesisOutcome, PipelineError> {
    let sample_id = row.sample_id();

    if config.policy.debug() {
        info!("Debug mode, skipping fusion-report for {}", sample_id);
        return Ok(SynthesisOutcome::Skipped(SkipReason::DebugMode));
    }
    if !config.policy.any_enabled() {
        info!("No fusion callers enabled, skipping fusion-report for {}", sample_id);
        return Ok(SynthesisOutcome::Skipped(SkipReason::NoToolsEnabled));
    }

    let tools = build_tool_args(row);
    if tools.is_empty() {
        info!("No fusions found for {}, skipping fusion-report", sample_id);
        return Ok(SynthesisOutcome::Skipped(SkipReason::NoEvidence));
    }

    let db = config.references.fusion_report_db.as_deref().ok_or_else(|| {
        PipelineError::MissingReference {
            tool: FUSION_REPORT_TAG.to_string(),
            what: "database (--fusion_report_db)",
            path: None,
        }
    })?;

    let out_dir = config.downstream_dir(FUSION_REPORT_DIR, sample_id);
    std::fs::create_dir_all(&out_dir)
        .map_err(|e| PipelineError::IOError(format!("{}: {}", out_dir.display(), e)))?;

    let raw_list = out_dir.join(FUSION_LIST_FILE);
    let raw_summary = out_dir.join(FUSION_SUMMARY_FILE);
    let args = fusion_report::arg_generator(sample_id, &out_dir, db, &tools, config.args.tool_cutoff);
    let invocation = Invocation::new(FUSION_REPORT_DIR, sample_id, FUSION_REPORT_TAG, args, &out_dir)
        .produces(raw_list.clone())
        .produces(raw_summary.clone());

    info!(
        "Starting fusion-report on {} with {}",
        sample_id,
        tools.iter().map(|(t, _)| t.tag()).collect::<Vec<_>>().join(", ")
    );
    run_checked(runner, invocation).await?;

    let fusion_list = scope_output(&raw_list, &out_dir, sample_id, FUSION_LIST_FILE)?;
    let summary = scope_output(&raw_summary, &out_dir, sample_id, FUSION_SUMMARY_FILE)?;
    info!("fusion-report finished on {}: {}", sample_id, fusion_list.display());

    Ok(SynthesisOutcome::Synthesized(SummaryOutputs {
        fusion_list,
        summary,
        tools: tools.into_iter().map(|(t, _)| t).collect(),
    }))
}


fn scope_output(raw: &Path, out_dir: &Path, sample_id: &str, name: &str) -> Result<PathBuf, PipelineError> {
    let scoped = file_path_manipulator(Path::new(sample_id), Some(out_dir), None, Some(name), "_");
    if !raw.is_file() {
        return Err(PipelineError::ToolExecution {
            tool: FUSION_REPORT_TAG.to_string(),
            error: format!("{} exited cleanly but wrote no {}", sample_id, raw.display()),
        });
    }
    rename_into(raw, &scoped)
        .map_err(|e| PipelineError::IOError(format!("{} -> {}: {}", raw.display(), scoped.display(), e)))?;
    Ok(scoped)
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::join::{AbsenceReason, ToolOutput};
    use crate::utils::test_support::{paired_sample, read, test_config, Script, ScriptedRunner};
    use std::fs;

    const ABSENT: ToolOutput = ToolOutput::Absent(AbsenceReason::NoResult);
    const DISABLED: ToolOutput = ToolOutput::Absent(AbsenceReason::Disabled);

    #[tokio::test]
    async fn test_only_arriba_reaches_report() -> anyhow::Result<()> {
        let env = test_config(&["--arriba", "--star_fusion", "--fusioncatcher"])?;
        let sample = paired_sample(&env, "S1")?;
        let arriba = env.dir.path().join("S1_arriba.tsv");
        fs::write(&arriba, "gene1--gene2\n")?;

        let row = JoinedRow::new(
            sample,
            [ToolOutput::Present(arriba.clone()), ABSENT, DISABLED, DISABLED, ABSENT, DISABLED],
        );
        assert_eq!(build_tool_args(&row), vec![(Tool::Arriba, arriba.clone())]);

        let runner = ScriptedRunner::new();
        let outcome = synthesize(&env.config, &runner, &row).await?;
        let dir = env.config.downstream_dir(FUSION_REPORT_DIR, "S1");
        assert_eq!(
            outcome,
            SynthesisOutcome::Synthesized(SummaryOutputs {
                fusion_list: dir.join("S1_fusion_list.tsv"),
                summary: dir.join("S1_fusion_genes_mqc.json"),
                tools: vec![Tool::Arriba],
            })
        );
        assert!(!read(&dir.join("S1_fusion_list.tsv")).is_empty());

        let seen = runner.invocations();
        assert_eq!(seen.len(), 1);
        let args = &seen[0].args;
        assert!(args.windows(2).any(|w| w == ["--arriba", arriba.to_string_lossy().as_ref()]));
        assert!(!args.iter().any(|a| a == "--starfusion" || a == "--fusioncatcher"));
        Ok(())
    }

    #[tokio::test]
    async fn test_all_absent_skips_report() -> anyhow::Result<()> {
        let env = test_config(&["--arriba", "--star_fusion"])?;
        let sample = paired_sample(&env, "S2")?;
        let row = JoinedRow::new(sample, [ABSENT, ABSENT, DISABLED, DISABLED, DISABLED, DISABLED]);
        assert!(build_tool_args(&row).is_empty());

        let runner = ScriptedRunner::new();
        let outcome = synthesize(&env.config, &runner, &row).await?;
        assert_eq!(outcome, SynthesisOutcome::Skipped(SkipReason::NoEvidence));
        assert!(runner.invocations().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_empty_result_is_left_out() -> anyhow::Result<()> {
        let env = test_config(&["--arriba", "--squid"])?;
        let sample = paired_sample(&env, "S3")?;
        let arriba = env.dir.path().join("S3_arriba.tsv");
        let squid = env.dir.path().join("S3_squid.txt");
        fs::write(&arriba, "")?;
        fs::write(&squid, "gene3--gene4\n")?;
        let row = JoinedRow::new(
            sample,
            [ToolOutput::Present(arriba), DISABLED, ToolOutput::Present(squid.clone()), DISABLED, DISABLED, DISABLED],
        );
        assert_eq!(build_tool_args(&row), vec![(Tool::Squid, squid)]);
        Ok(())
    }

    #[tokio::test]
    async fn test_rerun_keeps_names() -> anyhow::Result<()> {
        let env = test_config(&["--fusioncatcher"])?;
        let sample = paired_sample(&env, "S4")?;
        let fc = env.dir.path().join("S4_fusioncatcher.txt");
        fs::write(&fc, "gene5--gene6\n")?;
        let row = JoinedRow::new(sample, [DISABLED, DISABLED, DISABLED, DISABLED, ToolOutput::Present(fc), DISABLED]);

        let runner = ScriptedRunner::new();
        let first = synthesize(&env.config, &runner, &row).await?;
        let second = synthesize(&env.config, &runner, &row).await?;
        assert_eq!(first, second);

        let dir = env.config.downstream_dir(FUSION_REPORT_DIR, "S4");
        let mut names: Vec<String> = fs::read_dir(&dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        assert_eq!(names, vec!["S4_fusion_genes_mqc.json", "S4_fusion_list.tsv"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_debug_skips_report() -> anyhow::Result<()> {
        let env = test_config(&["--squid", "--debug", "--single_end"])?;
        let sample = paired_sample(&env, "S5")?;
        let squid = env.dir.path().join("S5_squid.txt");
        fs::write(&squid, "gene7--gene8\n")?;
        let row = JoinedRow::new(sample, [DISABLED, DISABLED, ToolOutput::Present(squid), DISABLED, DISABLED, DISABLED]);

        let runner = ScriptedRunner::new();
        let outcome = synthesize(&env.config, &runner, &row).await?;
        assert_eq!(outcome, SynthesisOutcome::Skipped(SkipReason::DebugMode));
        assert!(runner.invocations().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_report_output_is_a_crash() -> anyhow::Result<()> {
        let env = test_config(&["--arriba"])?;
        let sample = paired_sample(&env, "S6")?;
        let arriba = env.dir.path().join("S6_arriba.tsv");
        fs::write(&arriba, "gene1--gene2\n")?;
        let row = JoinedRow::new(sample, [ToolOutput::Present(arriba), DISABLED, DISABLED, DISABLED, DISABLED, DISABLED]);

        let runner = ScriptedRunner::new().with(FUSION_REPORT_DIR, "S6", Script::NoOutput);
        let outcome = synthesize(&env.config, &runner, &row).await;
        assert!(matches!(outcome, Err(PipelineError::ToolExecution { .. })));
        Ok(())
    }
}
