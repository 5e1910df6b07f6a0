// src/utils/join.rs: keyed fan-in of per-tool results back into one row per sample

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use log::{debug, info};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{Stream, StreamExt, StreamMap};

use crate::config::defs::{PipelineError, Tool, TOOL_COUNT};
use crate::config::gate::EnablementPolicy;
use crate::utils::sample::Sample;


#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbsenceReason {
    /// The tool is not enabled for this run.
    Disabled,
    /// The tool ran to completion and wrote no result.
    NoResult,
}

/// What one tool contributed for one sample. Crashes never get here; they are errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolOutput {
    Present(PathBuf),
    Absent(AbsenceReason),
}

impl ToolOutput {
    pub fn path(&self) -> Option<&Path> {
        match self {
            ToolOutput::Present(p) => Some(p),
            ToolOutput::Absent(_) => None,
        }
    }

    pub fn is_present(&self) -> bool {
        matches!(self, ToolOutput::Present(_))
    }
}


#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageReport {
    pub tool: Tool,
    pub sample_id: String,
    pub output: ToolOutput,
}


/// All six tool slots for one sample, released once every enabled tool has reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinedRow {
    pub sample: Arc<Sample>,
    slots: [ToolOutput; TOOL_COUNT],
}

impl JoinedRow {
    pub fn new(sample: Arc<Sample>, slots: [ToolOutput; TOOL_COUNT]) -> Self {
        JoinedRow { sample, slots }
    }

    pub fn sample_id(&self) -> &str {
        &self.sample.id
    }

    pub fn slot(&self, tool: Tool) -> &ToolOutput {
        &self.slots[tool.index()]
    }

    /// Slots in canonical tool order.
    pub fn slots(&self) -> impl Iterator<Item = (Tool, &ToolOutput)> {
        Tool::ALL.into_iter().zip(self.slots.iter())
    }

    pub fn present_tools(&self) -> Vec<Tool> {
        self.slots()
            .filter(|(_, out)| out.is_present())
            .map(|(tool, _)| tool)
            .collect()
    }
}


#[derive(Debug, Default)]
struct PartialRow {
    slots: [Option<ToolOutput>; TOOL_COUNT],
}

// `None` marks the end of a contributor's channel.
type ContributorStream = Pin<Box<dyn Stream<Item = Option<StageReport>> + Send>>;

fn contributor(rx: mpsc::Receiver<StageReport>) -> ContributorStream {
    Box::pin(
        ReceiverStream::new(rx)
            .map(Some)
            .chain(tokio_stream::once(None)),
    )
}


/// Join barrier keyed by sample id.
///
/// Partial state exists only for samples with at least one report and not yet released.
pub struct FanIn {
    samples: HashMap<String, Arc<Sample>>,
    order: Vec<String>,
    policy: EnablementPolicy,
    pending: HashMap<String, PartialRow>,
    emitted: HashSet<String>,
}

impl FanIn {
    /// # Arguments
    ///
    /// * `samples` - Every sample of the run. Ids must be unique.
    /// * `policy` - Decides which slots must be filled and which are absent from the start.
    pub fn new(samples: &[Arc<Sample>], policy: &EnablementPolicy) -> Result<Self, PipelineError> {
        let mut map = HashMap::with_capacity(samples.len());
        let mut order = Vec::with_capacity(samples.len());
        for sample in samples {
            if map.insert(sample.id.clone(), Arc::clone(sample)).is_some() {
                return Err(PipelineError::JoinIntegrity(format!(
                    "sample '{}' appears more than once in the sample channel",
                    sample.id
                )));
            }
            order.push(sample.id.clone());
        }
        Ok(FanIn {
            samples: map,
            order,
            policy: policy.clone(),
            pending: HashMap::new(),
            emitted: HashSet::new(),
        })
    }

    /// Samples currently holding partial state.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Consumes one receiver per enabled tool and sends each completed row on `rows`.
    /// Arrival order across tools and samples does not matter.
    ///
    /// # Returns
    /// Number of rows released, always the number of samples on success.
    pub async fn run(
        mut self,
        receivers: HashMap<Tool, mpsc::Receiver<StageReport>>,
        rows: mpsc::Sender<JoinedRow>,
    ) -> Result<usize, PipelineError> {
        for tool in receivers.keys() {
            if !self.policy.runs(*tool) {
                return Err(PipelineError::JoinIntegrity(format!(
                    "got a result channel for disabled tool {}",
                    tool
                )));
            }
        }
        let enabled = self.policy.enabled_tools();
        for tool in &enabled {
            if !receivers.contains_key(tool) {
                return Err(PipelineError::JoinIntegrity(format!(
                    "no result channel for enabled tool {}",
                    tool
                )));
            }
        }

        if enabled.is_empty() {
            // Nothing will ever report; every row is complete already.
            let ids = self.order.clone();
            for id in ids {
                let row = self.release(&id, PartialRow::default())?;
                send_row(&rows, row).await?;
            }
            return self.finish();
        }

        let mut streams = StreamMap::new();
        for (tool, rx) in receivers {
            streams.insert(tool, contributor(rx));
        }

        while let Some((tool, item)) = streams.next().await {
            match item {
                Some(report) => {
                    if let Some(row) = self.accept(tool, report)? {
                        send_row(&rows, row).await?;
                    }
                }
                None => self.contributor_closed(tool)?,
            }
        }

        self.finish()
    }

    /// Records one report. Returns the row when it completes it.
    fn accept(&mut self, channel: Tool, report: StageReport) -> Result<Option<JoinedRow>, PipelineError> {
        if report.tool != channel {
            return Err(PipelineError::JoinIntegrity(format!(
                "{} report for sample '{}' arrived on the {} channel",
                report.tool, report.sample_id, channel
            )));
        }
        if !self.samples.contains_key(&report.sample_id) {
            return Err(PipelineError::JoinIntegrity(format!(
                "{} reported unknown sample '{}'",
                channel, report.sample_id
            )));
        }
        if self.emitted.contains(&report.sample_id) {
            return Err(PipelineError::JoinIntegrity(format!(
                "{} reported sample '{}' after its row was released",
                channel, report.sample_id
            )));
        }

        let partial = self.pending.entry(report.sample_id.clone()).or_default();
        let slot = &mut partial.slots[channel.index()];
        if slot.is_some() {
            return Err(PipelineError::JoinIntegrity(format!(
                "{} reported sample '{}' twice",
                channel, report.sample_id
            )));
        }
        debug!("{} -> {}: {:?}", channel, report.sample_id, report.output);
        *slot = Some(report.output);

        let complete = self
            .policy
            .enabled_tools()
            .iter()
            .all(|t| partial.slots[t.index()].is_some());
        if !complete {
            return Ok(None);
        }

        let partial = self.pending.remove(&report.sample_id).unwrap_or_default();
        self.release(&report.sample_id, partial).map(Some)
    }

    /// A closed channel must already have reported for every sample.
    fn contributor_closed(&self, tool: Tool) -> Result<(), PipelineError> {
        let mut missing: Vec<&str> = self
            .order
            .iter()
            .filter(|id| !self.emitted.contains(*id))
            .filter(|id| {
                self.pending
                    .get(*id)
                    .map(|p| p.slots[tool.index()].is_none())
                    .unwrap_or(true)
            })
            .map(String::as_str)
            .collect();

        if missing.is_empty() {
            debug!("{} channel closed after reporting every sample", tool);
            return Ok(());
        }
        missing.sort_unstable();
        Err(PipelineError::JoinIntegrity(format!(
            "{} finished without reporting sample(s): {}",
            tool,
            missing.join(", ")
        )))
    }

    fn release(&mut self, sample_id: &str, partial: PartialRow) -> Result<JoinedRow, PipelineError> {
        let sample = self.samples.get(sample_id).cloned().ok_or_else(|| {
            PipelineError::JoinIntegrity(format!("unknown sample '{}'", sample_id))
        })?;
        if !self.emitted.insert(sample_id.to_string()) {
            return Err(PipelineError::JoinIntegrity(format!(
                "row for sample '{}' released twice",
                sample_id
            )));
        }

        let mut slots = partial.slots;
        let slots: [ToolOutput; TOOL_COUNT] = std::array::from_fn(|i| {
            let tool = Tool::ALL[i];
            match slots[i].take() {
                Some(output) if self.policy.runs(tool) => output,
                _ => ToolOutput::Absent(AbsenceReason::Disabled),
            }
        });

        let row = JoinedRow { sample, slots };
        info!(
            "Joined {}: {} of {} enabled tools produced results",
            sample_id,
            row.present_tools().len(),
            self.policy.enabled_tools().len()
        );
        Ok(row)
    }

    fn finish(self) -> Result<usize, PipelineError> {
        if self.emitted.len() != self.samples.len() || !self.pending.is_empty() {
            let mut missing: Vec<&str> = self
                .order
                .iter()
                .filter(|id| !self.emitted.contains(*id))
                .map(String::as_str)
                .collect();
            missing.sort_unstable();
            return Err(PipelineError::JoinIntegrity(format!(
                "no row released for sample(s): {}",
                missing.join(", ")
            )));
        }
        Ok(self.emitted.len())
    }
}


async fn send_row(rows: &mpsc::Sender<JoinedRow>, row: JoinedRow) -> Result<(), PipelineError> {
    let id = row.sample.id.clone();
    rows.send(row).await.map_err(|_| {
        PipelineError::Other(anyhow::anyhow!("row consumer stopped before sample '{}'", id))
    })
}
