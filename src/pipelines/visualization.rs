// src/pipelines/visualization.rs: optional plots downstream of the join

use std::path::PathBuf;

use log::info;

use crate::config::defs::{
    PipelineError, RunConfig, Tool, ARRIBA_VIS_DIR, DRAW_FUSIONS_TAG, FUSION_INSPECTOR_DIR,
    FUSION_INSPECTOR_TAG,
};
use crate::pipelines::summary::SynthesisOutcome;
use crate::utils::command::{draw_fusions, fusion_inspector as inspector, run_checked, CommandRunner, Invocation};
use crate::utils::file::is_nonempty_file;
use crate::utils::join::JoinedRow;


/// Draws the Arriba fusions of one sample with draw_fusions.R.
///
/// # Returns
/// The PDF, or None when `--arriba_vis` is off or Arriba found nothing.
pub async fn arriba_visualization<R: CommandRunner>(
    config: &RunConfig,
    runner: &R,
    row: &JoinedRow,
) -> Result<Option<PathBuf>, PipelineError> {
    if !config.args.arriba_vis {
        return Ok(None);
    }
    let sample_id = row.sample_id();
    let fusions = match row.slot(Tool::Arriba).path() {
        Some(p) if is_nonempty_file(p) => p.to_path_buf(),
        _ => {
            info!("No Arriba fusions for {}, skipping visualization", sample_id);
            return Ok(None);
        }
    };
    let Some(gtf) = config.references.arriba_gtf() else {
        info!("No Arriba annotation for {}, skipping visualization", sample_id);
        return Ok(None);
    };

    let out_dir = config.downstream_dir(ARRIBA_VIS_DIR, sample_id);
    std::fs::create_dir_all(&out_dir)
        .map_err(|e| PipelineError::IOError(format!("{}: {}", out_dir.display(), e)))?;
    let pdf = out_dir.join(format!("{}_arriba.pdf", sample_id));

    let invocation = Invocation::new(
        ARRIBA_VIS_DIR,
        sample_id,
        DRAW_FUSIONS_TAG,
        draw_fusions::arg_generator(&fusions, gtf, &pdf),
        &out_dir,
    )
    .produces(pdf.clone());
    run_checked(runner, invocation).await?;

    if !pdf.is_file() {
        return Err(PipelineError::ToolExecution {
            tool: DRAW_FUSIONS_TAG.to_string(),
            error: format!("{} exited cleanly but wrote no {}", sample_id, pdf.display()),
        });
    }
    info!("Arriba visualization finished on {}: {}", sample_id, pdf.display());
    Ok(Some(pdf))
}


/// Validates the synthesized fusion list against the reads with FusionInspector.
pub async fn fusion_inspector<R: CommandRunner>(
    config: &RunConfig,
    runner: &R,
    row: &JoinedRow,
    synthesis: &SynthesisOutcome,
) -> Result<Option<PathBuf>, PipelineError> {
    if !config.args.fusion_inspector {
        return Ok(None);
    }
    let sample_id = row.sample_id();
    let fusion_list = match synthesis.fusion_list() {
        Some(p) if is_nonempty_file(p) => p.to_path_buf(),
        _ => {
            info!("No fusion list for {}, skipping FusionInspector", sample_id);
            return Ok(None);
        }
    };
    let genome_lib = config.references.fusion_inspector_lib.as_deref().ok_or_else(|| {
        PipelineError::MissingReference {
            tool: FUSION_INSPECTOR_TAG.to_string(),
            what: "CTAT genome lib (--star_fusion_ref)",
            path: None,
        }
    })?;

    let out_dir = config.downstream_dir(FUSION_INSPECTOR_DIR, sample_id);
    std::fs::create_dir_all(&out_dir)
        .map_err(|e| PipelineError::IOError(format!("{}: {}", out_dir.display(), e)))?;

    let args = inspector::arg_generator(&fusion_list, genome_lib, &row.sample.reads, &out_dir, sample_id, config.threads);
    let invocation = Invocation::new(FUSION_INSPECTOR_DIR, sample_id, FUSION_INSPECTOR_TAG, args, &out_dir)
        .produces(out_dir.join(format!("{}.FusionInspector.fusions.tsv", sample_id)));
    run_checked(runner, invocation).await?;

    info!("FusionInspector finished on {}: {}", sample_id, out_dir.display());
    Ok(Some(out_dir))
}
