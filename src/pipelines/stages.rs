// src/pipelines/stages.rs: one fusion caller applied to one sample

use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::config::defs::{
    KallistoSubcommand, PipelineError, RunConfig, SamtoolsSubcommand, Tool, ARRIBA_TAG,
    ERICSCRIPT_RESULTS, ERICSCRIPT_TAG, FUSIONCATCHER_RESULTS, FUSIONCATCHER_TAG,
    KALLISTO_FUSION_FILE, KALLISTO_TAG, PIZZLY_FLATTEN_TAG, PIZZLY_TAG, SAMTOOLS_TAG,
    SQUID_ANNOTATE_TAG, SQUID_TAG, STAR_FUSION_PREDICTIONS, STAR_FUSION_TAG, STAR_TAG,
};
use crate::config::references::ReferenceBundle;
use crate::utils::command::{
    arriba, ericscript, fusioncatcher, kallisto, pizzly, run_checked, samtools, squid, star,
    star_fusion, CommandRunner, Invocation,
};
use crate::utils::file::{any_gzipped, file_path_manipulator, rename_into};
use crate::utils::join::{AbsenceReason, ToolOutput};
use crate::utils::sample::Sample;


/// Commands for one (tool, sample), run in order, and where the result lands.
#[derive(Debug, Clone)]
pub struct StagePlan {
    pub invocations: Vec<Invocation>,
    pub result: PathBuf,
}


/// `<stage_dir>/<sample>_<tool>.<ext>`
pub fn sample_scoped_result(stage_dir: &Path, tool: Tool, sample_id: &str) -> PathBuf {
    let spec = tool.spec();
    file_path_manipulator(
        Path::new(sample_id),
        Some(stage_dir),
        None,
        Some(&format!("{}.{}", spec.tag, spec.result_ext)),
        "_",
    )
}


/// Runs one fusion caller on one sample.
///
/// # Arguments
///
/// * `config` - RunConfig struct from main.
/// * `runner` - Executes the external commands.
/// * `tool` - Which caller.
/// * `sample` - Sample to process.
///
/// # Returns
/// `Present` with the sample-scoped result, `Absent` when the tool finished without one,
/// or `ToolExecution` when a command failed.
pub async fn run_stage<R: CommandRunner>(
    config: &RunConfig,
    runner: &R,
    tool: Tool,
    sample: &Sample,
) -> Result<ToolOutput, PipelineError> {
    if !config.policy.runs(tool) {
        return Ok(ToolOutput::Absent(AbsenceReason::Disabled));
    }

    let stage_dir = config.stage_dir(tool, &sample.id);
    std::fs::create_dir_all(&stage_dir)
        .map_err(|e| PipelineError::IOError(format!("{}: {}", stage_dir.display(), e)))?;

    let plan = stage_plan(config, tool, sample, &stage_dir)?;
    info!("Starting {} on {}", tool, sample);
    for invocation in plan.invocations {
        run_checked(runner, invocation).await?;
    }

    if !plan.result.is_file() {
        info!("{} finished on {} without a result file", tool, sample.id);
        return Ok(ToolOutput::Absent(AbsenceReason::NoResult));
    }

    let scoped = sample_scoped_result(&stage_dir, tool, &sample.id);
    rename_into(&plan.result, &scoped)
        .map_err(|e| PipelineError::IOError(format!("{} -> {}: {}", plan.result.display(), scoped.display(), e)))?;
    info!("{} finished on {}: {}", tool, sample.id, scoped.display());
    Ok(ToolOutput::Present(scoped))
}


/// Builds the command sequence for a tool from its reference bundle.
pub fn stage_plan(config: &RunConfig, tool: Tool, sample: &Sample, stage_dir: &Path) -> Result<StagePlan, PipelineError> {
    let bundle = config.references.bundle(tool)?;
    let reads = &sample.reads;
    let id = sample.id.as_str();
    let tag = tool.tag();
    let threads = config.threads;
    let gzipped = any_gzipped(&reads.files());

    let plan = match (tool, bundle) {
        (Tool::Arriba, ReferenceBundle::Arriba { star_index, fasta, gtf, blacklist }) => {
            let bam = stage_dir.join("Aligned.out.bam");
            let result = stage_dir.join(format!("{}_{}.tsv", id, tag));
            let discarded = stage_dir.join(format!("{}_{}.discarded.tsv", id, tag));
            StagePlan {
                invocations: vec![
                    Invocation::new(tag, id, STAR_TAG, star::arg_generator(star_index, reads, stage_dir, threads, config.memory_bytes, gzipped, star::StarProfile::Arriba), stage_dir)
                        .produces(bam.clone()),
                    Invocation::new(tag, id, ARRIBA_TAG, arriba::arg_generator(&bam, fasta, gtf, blacklist, &result, &discarded), stage_dir)
                        .produces(result.clone())
                        .produces(discarded),
                ],
                result,
            }
        }
        (Tool::StarFusion, ReferenceBundle::StarFusion { genome_lib }) => {
            let result = stage_dir.join(STAR_FUSION_PREDICTIONS);
            StagePlan {
                invocations: vec![
                    Invocation::new(tag, id, STAR_FUSION_TAG, star_fusion::arg_generator(genome_lib, reads, stage_dir, threads), stage_dir)
                        .produces(result.clone()),
                ],
                result,
            }
        }
        (Tool::Squid, ReferenceBundle::Squid { star_index, gtf }) => {
            let sorted = stage_dir.join("Aligned.sortedByCoord.out.bam");
            let chimeric_sam = stage_dir.join("Chimeric.out.sam");
            let chimeric_bam = stage_dir.join("Chimeric.out.bam");
            let chimeric_sorted = stage_dir.join("Chimeric.out.sorted.bam");
            let prefix = stage_dir.join(format!("{}_fusions", id));
            let sv = stage_dir.join(format!("{}_fusions_sv.txt", id));
            let result = stage_dir.join(format!("{}_fusions_annotated.txt", id));
            StagePlan {
                invocations: vec![
                    Invocation::new(tag, id, STAR_TAG, star::arg_generator(star_index, reads, stage_dir, threads, config.memory_bytes, gzipped, star::StarProfile::Squid), stage_dir)
                        .produces(sorted.clone())
                        .produces(chimeric_sam.clone()),
                    Invocation::new(tag, id, SAMTOOLS_TAG, samtools::arg_generator(SamtoolsSubcommand::View, &chimeric_sam, &chimeric_bam, threads), stage_dir)
                        .produces(chimeric_bam.clone()),
                    Invocation::new(tag, id, SAMTOOLS_TAG, samtools::arg_generator(SamtoolsSubcommand::Sort, &chimeric_bam, &chimeric_sorted, threads), stage_dir)
                        .produces(chimeric_sorted.clone()),
                    Invocation::new(tag, id, SQUID_TAG, squid::arg_generator(&sorted, &chimeric_sorted, &prefix), stage_dir)
                        .produces(sv.clone()),
                    Invocation::new(tag, id, SQUID_ANNOTATE_TAG, squid::annotate_arg_generator(gtf, &sv, &result), stage_dir)
                        .produces(result.clone()),
                ],
                result,
            }
        }
        (Tool::EricScript, ReferenceBundle::EricScript { db }) => {
            // ericscript.pl refuses an existing output directory
            let out = stage_dir.join("ericscript_out");
            let result = out.join(ERICSCRIPT_RESULTS);
            StagePlan {
                invocations: vec![
                    Invocation::new(tag, id, ERICSCRIPT_TAG, ericscript::arg_generator(db, reads, &out, threads), stage_dir)
                        .produces(result.clone()),
                ],
                result,
            }
        }
        (Tool::FusionCatcher, ReferenceBundle::FusionCatcher { data_dir }) => {
            let result = stage_dir.join(FUSIONCATCHER_RESULTS);
            StagePlan {
                invocations: vec![
                    Invocation::new(tag, id, FUSIONCATCHER_TAG, fusioncatcher::arg_generator(data_dir, reads, stage_dir, threads), stage_dir)
                        .produces(result.clone()),
                ],
                result,
            }
        }
        (Tool::Pizzly, ReferenceBundle::Pizzly { kallisto_index, gtf, transcripts }) => {
            let fusion_txt = stage_dir.join(KALLISTO_FUSION_FILE);
            let cache = stage_dir.join("index.cache.txt");
            let prefix = stage_dir.join("pizzly_fusions");
            let json = stage_dir.join("pizzly_fusions.json");
            let result = stage_dir.join("pizzly_fusions.txt");
            StagePlan {
                invocations: vec![
                    Invocation::new(tag, id, KALLISTO_TAG, kallisto::arg_generator(KallistoSubcommand::Quant, kallisto_index, reads, stage_dir, threads), stage_dir)
                        .produces(fusion_txt.clone()),
                    Invocation::new(tag, id, PIZZLY_TAG, pizzly::arg_generator(&config.args, gtf, transcripts, &cache, &prefix, &fusion_txt), stage_dir)
                        .produces(json.clone()),
                    Invocation::new(tag, id, PIZZLY_FLATTEN_TAG, pizzly::flatten_arg_generator(&json, &result), stage_dir)
                        .produces(result.clone()),
                ],
                result,
            }
        }
        (tool, bundle) => {
            warn!("Reference bundle {:?} does not belong to {}", bundle, tool);
            return Err(PipelineError::InvalidConfig(format!(
                "reference bundle mismatch for {}",
                tool
            )));
        }
    };

    Ok(plan)
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::test_support::{paired_sample, test_config, ScriptedRunner, Script};

    #[test]
    fn test_sample_scoped_result_name() {
        assert_eq!(
            sample_scoped_result(Path::new("/o/arriba/S1"), Tool::Arriba, "S1"),
            PathBuf::from("/o/arriba/S1/S1_arriba.tsv")
        );
        assert_eq!(
            sample_scoped_result(Path::new("/o/squid/S1"), Tool::Squid, "S1"),
            PathBuf::from("/o/squid/S1/S1_squid.txt")
        );
    }

    #[test]
    fn test_plans_stay_inside_stage_dir() -> anyhow::Result<()> {
        let env = test_config(&["--arriba", "--star_fusion", "--squid", "--ericscript", "--fusioncatcher", "--pizzly"])?;
        let sample = paired_sample(&env, "S1")?;
        for tool in Tool::ALL {
            let dir = env.config.stage_dir(tool, "S1");
            let plan = stage_plan(&env.config, tool, &sample, &dir)?;
            assert!(plan.result.starts_with(&dir), "{tool}: {:?}", plan.result);
            assert!(!plan.invocations.is_empty());
            for inv in &plan.invocations {
                assert_eq!(inv.stage, tool.tag());
                assert_eq!(inv.sample_id, "S1");
                assert!(inv.produces.iter().all(|p| p.starts_with(&dir)));
            }
            assert_eq!(plan.invocations.last().map(|i| i.produces.contains(&plan.result)), Some(true));
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_present_absent_and_crash() -> anyhow::Result<()> {
        let env = test_config(&["--arriba", "--star_fusion", "--fusioncatcher"])?;
        let sample = paired_sample(&env, "S1")?;
        let runner = ScriptedRunner::new()
            .with(Tool::StarFusion.tag(), "S1", Script::NoOutput)
            .with(Tool::FusionCatcher.tag(), "S1", Script::Crash);

        let arriba = run_stage(&env.config, &runner, Tool::Arriba, &sample).await?;
        let expected = env.config.stage_dir(Tool::Arriba, "S1").join("S1_arriba.tsv");
        assert_eq!(arriba, ToolOutput::Present(expected.clone()));
        assert!(expected.is_file());

        let star_fusion = run_stage(&env.config, &runner, Tool::StarFusion, &sample).await?;
        assert_eq!(star_fusion, ToolOutput::Absent(AbsenceReason::NoResult));

        let crashed = run_stage(&env.config, &runner, Tool::FusionCatcher, &sample).await;
        assert!(matches!(crashed, Err(PipelineError::ToolExecution { .. })));

        let disabled = run_stage(&env.config, &runner, Tool::Pizzly, &sample).await?;
        assert_eq!(disabled, ToolOutput::Absent(AbsenceReason::Disabled));
        Ok(())
    }

    #[tokio::test]
    async fn test_star_fusion_result_is_renamed() -> anyhow::Result<()> {
        let env = test_config(&["--star_fusion"])?;
        let sample = paired_sample(&env, "S7")?;
        let runner = ScriptedRunner::new();
        let out = run_stage(&env.config, &runner, Tool::StarFusion, &sample).await?;
        let dir = env.config.stage_dir(Tool::StarFusion, "S7");
        assert_eq!(out, ToolOutput::Present(dir.join("S7_starfusion.tsv")));
        assert!(!dir.join(STAR_FUSION_PREDICTIONS).exists());
        Ok(())
    }
}
