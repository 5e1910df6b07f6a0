// src/pipelines/rnafusion.rs: fusion detection over every sample of a run

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::anyhow;
use futures::future::try_join;
use log::{debug, error, info};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::config::defs::{PipelineError, RunConfig, Tool, FUSION_INSPECTOR_DIR, SAMPLE_CHANNEL_BUFFER};
use crate::pipelines::stages::run_stage;
use crate::pipelines::summary::{synthesize, SynthesisOutcome};
use crate::pipelines::visualization::{arriba_visualization, fusion_inspector};
use crate::utils::command::CommandRunner;
use crate::utils::join::{FanIn, JoinedRow, StageReport, ToolOutput};
use crate::utils::sample::{discover_samples, Sample};
use crate::utils::streams::t_junction;


#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleSummary {
    pub sample_id: String,
    /// All six slots, canonical order.
    pub tools: Vec<(Tool, ToolOutput)>,
    pub synthesis: SynthesisOutcome,
    pub arriba_plot: Option<PathBuf>,
    pub inspector: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Rows released by the aggregator.
    pub rows: usize,
    /// One entry per sample, sorted by id.
    pub samples: Vec<SampleSummary>,
}


enum Finished {
    Feeder,
    Junction(u64),
    Dispatcher(Tool, usize),
    FanIn(usize),
    Consumer(Vec<SampleSummary>),
}


/// Run function for the fusion detection pipeline
///
/// # Arguments
///
/// * `config` - RunConfig struct from main.
/// * `runner` - Executes every external command.
///
/// # Returns
/// Result<RunSummary, PipelineError>
pub async fn run<R: CommandRunner>(config: Arc<RunConfig>, runner: Arc<R>) -> Result<RunSummary, PipelineError> {
    let samples = discover_samples(&config.args, &config.cwd, config.end_type)?;
    run_samples(config, runner, samples).await
}


/// Runs the enabled tools over `samples`, joins their results per sample and
/// hands each joined row to fusion-report and the visualization stages.
///
/// A failed stage aborts the run with its own error, ahead of the join error
/// or closed-channel errors its missing report causes.
pub async fn run_samples<R: CommandRunner>(
    config: Arc<RunConfig>,
    runner: Arc<R>,
    samples: Vec<Arc<Sample>>,
) -> Result<RunSummary, PipelineError> {
    let fan_in = FanIn::new(&samples, &config.policy)?;
    let enabled = config.policy.enabled_tools();
    info!(
        "Running {} sample(s) through {} tool(s), at most {} job(s) at once",
        samples.len(),
        enabled.len(),
        config.args.max_jobs
    );

    let mut tasks: JoinSet<Result<Finished, PipelineError>> = JoinSet::new();
    let (failures_tx, mut failures_rx) = mpsc::unbounded_channel::<PipelineError>();

    // Sample channel, one copy per enabled tool
    let (sample_tx, sample_rx) = mpsc::channel::<Arc<Sample>>(SAMPLE_CHANNEL_BUFFER);
    let (tool_streams, junction) = t_junction(sample_rx, enabled.len(), SAMPLE_CHANNEL_BUFFER);

    tasks.spawn(async move {
        for sample in samples {
            let id = sample.id.clone();
            sample_tx
                .send(sample)
                .await
                .map_err(|_| PipelineError::Other(anyhow!("sample channel closed before '{}'", id)))?;
        }
        Ok(Finished::Feeder)
    });
    tasks.spawn(async move {
        let count = junction
            .await
            .map_err(|e| PipelineError::Other(anyhow!("sample broadcast task failed: {}", e)))?
            .map_err(PipelineError::Other)?;
        Ok(Finished::Junction(count))
    });

    let mut receivers = HashMap::with_capacity(enabled.len());
    for (tool, samples_rx) in enabled.iter().copied().zip(tool_streams) {
        let (report_tx, report_rx) = mpsc::channel::<StageReport>(SAMPLE_CHANNEL_BUFFER);
        receivers.insert(tool, report_rx);
        let config = Arc::clone(&config);
        let runner = Arc::clone(&runner);
        let failures = failures_tx.clone();
        tasks.spawn(async move {
            let n = dispatch_tool(config, runner, tool, samples_rx, report_tx, failures).await?;
            Ok(Finished::Dispatcher(tool, n))
        });
    }

    let (row_tx, row_rx) = mpsc::channel::<JoinedRow>(SAMPLE_CHANNEL_BUFFER);
    tasks.spawn(async move { fan_in.run(receivers, row_tx).await.map(Finished::FanIn) });
    {
        let config = Arc::clone(&config);
        let runner = Arc::clone(&runner);
        let failures = failures_tx;
        tasks.spawn(async move { consume_rows(config, runner, row_rx, failures).await.map(Finished::Consumer) });
    }

    let mut rows = 0;
    let mut summaries = Vec::new();
    let mut fallback: Option<PipelineError> = None;
    while let Some(joined) = tasks.join_next().await {
        let result = joined
            .map_err(|e| PipelineError::Other(anyhow!("pipeline task panicked: {}", e)))
            .and_then(|r| r);
        match result {
            Ok(Finished::FanIn(n)) => rows = n,
            Ok(Finished::Consumer(s)) => summaries = s,
            Ok(Finished::Dispatcher(tool, n)) => debug!("{} finished {} job(s)", tool, n),
            Ok(Finished::Junction(n)) => debug!("Broadcast {} sample(s)", n),
            Ok(Finished::Feeder) => {}
            Err(e) => {
                if let Ok(cause) = failures_rx.try_recv() {
                    tasks.abort_all();
                    return Err(cause);
                }
                match e {
                    PipelineError::ToolExecution { .. } | PipelineError::JoinIntegrity(_) => {
                        tasks.abort_all();
                        return Err(e);
                    }
                    // Knock-on failure; the task that caused it reports shortly
                    other => {
                        debug!("Pipeline task stopped: {}", other);
                        fallback.get_or_insert(other);
                    }
                }
            }
        }
    }
    if let Ok(cause) = failures_rx.try_recv() {
        return Err(cause);
    }
    if let Some(e) = fallback {
        return Err(e);
    }

    if summaries.len() != rows {
        return Err(PipelineError::JoinIntegrity(format!(
            "{} row(s) joined but {} summarized",
            rows,
            summaries.len()
        )));
    }
    summaries.sort_by(|a, b| a.sample_id.cmp(&b.sample_id));
    info!("Joined and summarized {} sample(s)", rows);
    Ok(RunSummary { rows, samples: summaries })
}


/// Runs one tool over every sample it receives, one job per sample under the run's job quota.
async fn dispatch_tool<R: CommandRunner>(
    config: Arc<RunConfig>,
    runner: Arc<R>,
    tool: Tool,
    mut samples: mpsc::Receiver<Arc<Sample>>,
    reports: mpsc::Sender<StageReport>,
    failures: mpsc::UnboundedSender<PipelineError>,
) -> Result<usize, PipelineError> {
    let mut jobs: JoinSet<Result<(), PipelineError>> = JoinSet::new();
    let mut open = true;
    let mut done = 0usize;

    while open || !jobs.is_empty() {
        tokio::select! {
            next = samples.recv(), if open => match next {
                Some(sample) => {
                    jobs.spawn(stage_job(
                        Arc::clone(&config),
                        Arc::clone(&runner),
                        tool,
                        sample,
                        reports.clone(),
                        failures.clone(),
                    ));
                }
                None => open = false,
            },
            Some(joined) = jobs.join_next(), if !jobs.is_empty() => {
                let result = joined
                    .map_err(|e| PipelineError::Other(anyhow!("{} job panicked: {}", tool, e)))
                    .and_then(|r| r);
                match result {
                    Ok(()) => done += 1,
                    Err(e) => return Err(e),
                }
            }
        }
    }
    Ok(done)
}


async fn stage_job<R: CommandRunner>(
    config: Arc<RunConfig>,
    runner: Arc<R>,
    tool: Tool,
    sample: Arc<Sample>,
    reports: mpsc::Sender<StageReport>,
    failures: mpsc::UnboundedSender<PipelineError>,
) -> Result<(), PipelineError> {
    let permit = Arc::clone(&config.job_semaphore)
        .acquire_owned()
        .await
        .map_err(|e| PipelineError::Other(anyhow!("job quota closed: {}", e)))?;
    let output = run_stage(&config, runner.as_ref(), tool, &sample).await;
    drop(permit);

    // Recorded while `reports` is still open, so it lands before the join error that follows
    let output = output.map_err(|e| record_failure(&failures, tool.tag(), &sample.id, e))?;
    let report = StageReport {
        tool,
        sample_id: sample.id.clone(),
        output,
    };
    reports.send(report).await.map_err(|_| {
        PipelineError::Other(anyhow!("aggregator stopped before {} reported '{}'", tool, sample.id))
    })
}


/// Runs the downstream stages for each joined row as it arrives.
async fn consume_rows<R: CommandRunner>(
    config: Arc<RunConfig>,
    runner: Arc<R>,
    mut rows: mpsc::Receiver<JoinedRow>,
    failures: mpsc::UnboundedSender<PipelineError>,
) -> Result<Vec<SampleSummary>, PipelineError> {
    let mut jobs: JoinSet<Result<SampleSummary, PipelineError>> = JoinSet::new();
    let mut summaries = Vec::new();
    let mut open = true;

    while open || !jobs.is_empty() {
        tokio::select! {
            next = rows.recv(), if open => match next {
                Some(row) => {
                    jobs.spawn(downstream_job(Arc::clone(&config), Arc::clone(&runner), row, failures.clone()));
                }
                None => open = false,
            },
            Some(joined) = jobs.join_next(), if !jobs.is_empty() => {
                let summary = joined
                    .map_err(|e| PipelineError::Other(anyhow!("downstream job panicked: {}", e)))??;
                summaries.push(summary);
            }
        }
    }
    Ok(summaries)
}


async fn downstream_job<R: CommandRunner>(
    config: Arc<RunConfig>,
    runner: Arc<R>,
    row: JoinedRow,
    failures: mpsc::UnboundedSender<PipelineError>,
) -> Result<SampleSummary, PipelineError> {
    let _permit = Arc::clone(&config.job_semaphore)
        .acquire_owned()
        .await
        .map_err(|e| PipelineError::Other(anyhow!("job quota closed: {}", e)))?;

    // The Arriba plot only needs the row, not the report
    let (synthesis, arriba_plot) = try_join(
        synthesize(&config, runner.as_ref(), &row),
        arriba_visualization(&config, runner.as_ref(), &row),
    )
    .await
    .map_err(|e| record_failure(&failures, "downstream", row.sample_id(), e))?;
    let inspector = fusion_inspector(&config, runner.as_ref(), &row, &synthesis)
        .await
        .map_err(|e| record_failure(&failures, FUSION_INSPECTOR_DIR, row.sample_id(), e))?;

    Ok(SampleSummary {
        sample_id: row.sample_id().to_string(),
        tools: row.slots().map(|(tool, out)| (tool, out.clone())).collect(),
        synthesis,
        arriba_plot,
        inspector,
    })
}


/// Logs a stage's own error and queues it for the caller, leaving a marker
/// error to unwind the task that ran the stage.
fn record_failure(
    failures: &mpsc::UnboundedSender<PipelineError>,
    stage: &str,
    sample_id: &str,
    e: PipelineError,
) -> PipelineError {
    error!("{}", e);
    let _ = failures.send(e);
    PipelineError::Other(anyhow!("{} stopped on '{}'", stage, sample_id))
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipelines::summary::SkipReason;
    use crate::utils::join::AbsenceReason;
    use crate::utils::test_support::{paired_sample, test_config, Script, ScriptedRunner};

    #[tokio::test]
    async fn test_one_row_per_sample() -> anyhow::Result<()> {
        let env = test_config(&["--arriba", "--star_fusion", "--max_jobs", "2"])?;
        let samples = vec![
            paired_sample(&env, "S1")?,
            paired_sample(&env, "S2")?,
            paired_sample(&env, "S3")?,
        ];
        let runner = Arc::new(ScriptedRunner::new().with(Tool::StarFusion.tag(), "S2", Script::NoOutput));
        let config = Arc::new(env.config);

        let summary = run_samples(Arc::clone(&config), runner, samples).await?;
        assert_eq!(summary.rows, 3);
        let ids: Vec<&str> = summary.samples.iter().map(|s| s.sample_id.as_str()).collect();
        assert_eq!(ids, vec!["S1", "S2", "S3"]);

        let s2 = &summary.samples[1];
        assert_eq!(s2.tools[Tool::StarFusion.index()].1, ToolOutput::Absent(AbsenceReason::NoResult));
        assert_eq!(s2.tools[Tool::Pizzly.index()].1, ToolOutput::Absent(AbsenceReason::Disabled));
        assert!(matches!(s2.synthesis, SynthesisOutcome::Synthesized(_)));
        Ok(())
    }

    #[tokio::test]
    async fn test_crash_outranks_join_error() -> anyhow::Result<()> {
        let env = test_config(&["--arriba", "--fusioncatcher"])?;
        let samples = vec![paired_sample(&env, "S1")?, paired_sample(&env, "S2")?];
        let runner = Arc::new(ScriptedRunner::new().with(Tool::FusionCatcher.tag(), "S2", Script::Crash));

        let result = run_samples(Arc::new(env.config), runner, samples).await;
        match result {
            Err(PipelineError::ToolExecution { tool, error }) => {
                assert_eq!(tool, "fusioncatcher");
                assert!(error.contains("S2"));
            }
            other => panic!("expected the fusioncatcher crash, got {:?}", other.map(|s| s.rows)),
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_stage_io_error_outranks_join_error() -> anyhow::Result<()> {
        let env = test_config(&["--arriba", "--star_fusion"])?;
        let samples = vec![paired_sample(&env, "S1")?, paired_sample(&env, "S2")?];
        // A plain file where the arriba stage directories belong
        std::fs::write(env.config.out_dir.join(Tool::Arriba.tag()), "")?;

        let result = run_samples(Arc::new(env.config), Arc::new(ScriptedRunner::new()), samples).await;
        match result {
            Err(PipelineError::IOError(msg)) => assert!(msg.contains("arriba")),
            other => panic!("expected the arriba IO error, got {:?}", other.map(|s| s.rows)),
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_debug_single_tool_skips_report() -> anyhow::Result<()> {
        let env = test_config(&["--arriba", "--debug"])?;
        let samples = vec![paired_sample(&env, "S1")?];
        let runner = Arc::new(ScriptedRunner::new());

        let summary = run_samples(Arc::new(env.config), Arc::clone(&runner), samples).await?;
        assert_eq!(summary.samples[0].synthesis, SynthesisOutcome::Skipped(SkipReason::DebugMode));
        assert!(runner.invocations().iter().all(|i| i.stage == Tool::Arriba.tag()));
        Ok(())
    }
}
