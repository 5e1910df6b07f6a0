// Fixtures shared by the unit tests: a throwaway run directory and a scripted runner.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use clap::Parser;
use log::LevelFilter;
use tempfile::TempDir;

use crate::cli::Arguments;
use crate::config::defs::RunConfig;
use crate::utils::command::{CommandOutcome, CommandRunner, Invocation};
use crate::utils::sample::{Reads, Sample};


pub struct TestEnv {
    pub dir: TempDir,
    pub config: RunConfig,
}

/// Builds a RunConfig whose references all exist, with the given extra flags.
pub fn test_config(flags: &[&str]) -> Result<TestEnv> {
    let dir = TempDir::new()?;
    let refs = dir.path().join("refs");
    fs::create_dir_all(&refs)?;
    for name in ["star_index", "ctat_lib", "ericscript_db", "fusioncatcher_data", "fusion_report_db"] {
        fs::create_dir_all(refs.join(name))?;
    }
    for name in ["genome.fa", "genes.gtf", "transcripts.fa", "blacklist.tsv.gz", "kallisto.idx"] {
        fs::write(refs.join(name), "ref\n")?;
    }

    let r = |name: &str| refs.join(name).to_string_lossy().to_string();
    let mut argv: Vec<String> = vec!["rnafusion-pipelines".to_string()];
    for (flag, value) in [
        ("--fasta", r("genome.fa")),
        ("--gtf", r("genes.gtf")),
        ("--transcript", r("transcripts.fa")),
        ("--star_index", r("star_index")),
        ("--arriba_ref", r("blacklist.tsv.gz")),
        ("--star_fusion_ref", r("ctat_lib")),
        ("--ericscript_ref", r("ericscript_db")),
        ("--fusioncatcher_ref", r("fusioncatcher_data")),
        ("--pizzly_index", r("kallisto.idx")),
        ("--fusion_report_db", r("fusion_report_db")),
    ] {
        argv.push(flag.to_string());
        argv.push(value);
    }
    argv.extend(flags.iter().map(|f| f.to_string()));

    let args = Arguments::try_parse_from(argv)?;
    let out_dir = dir.path().join("out");
    fs::create_dir_all(&out_dir)?;
    let config = RunConfig::build(args, dir.path().to_path_buf(), out_dir, 2, 1 << 30, LevelFilter::Off)?;
    Ok(TestEnv { dir, config })
}

pub fn paired_sample(env: &TestEnv, id: &str) -> Result<Arc<Sample>> {
    let r1 = env.dir.path().join(format!("{}_R1.fastq.gz", id));
    let r2 = env.dir.path().join(format!("{}_R2.fastq.gz", id));
    fs::write(&r1, "@r\nA\n+\nI\n")?;
    fs::write(&r2, "@r\nA\n+\nI\n")?;
    Ok(Arc::new(Sample::new(id, Reads::Paired(r1, r2))))
}


#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Script {
    /// Exit 0 and write every declared output with some content.
    Content,
    /// Exit 0 and write every declared output empty.
    Empty,
    /// Exit 0 and write nothing.
    NoOutput,
    /// Exit 1.
    Crash,
}

/// Plays back a per-(stage, sample) script instead of spawning processes.
#[derive(Default)]
pub struct ScriptedRunner {
    scripts: HashMap<(String, String), Script>,
    pub seen: Mutex<Vec<Invocation>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, stage: &str, sample_id: &str, script: Script) -> Self {
        self.scripts.insert((stage.to_string(), sample_id.to_string()), script);
        self
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.seen.lock().map(|v| v.clone()).unwrap_or_default()
    }
}

fn write_outputs(paths: &[PathBuf], body: &str) -> Result<()> {
    for path in paths {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, body)?;
    }
    Ok(())
}

impl CommandRunner for ScriptedRunner {
    async fn run(&self, invocation: Invocation) -> Result<CommandOutcome> {
        let key = (invocation.stage.clone(), invocation.sample_id.clone());
        let script = self.scripts.get(&key).copied().unwrap_or(Script::Content);
        self.seen
            .lock()
            .map_err(|_| anyhow!("poisoned"))?
            .push(invocation.clone());

        match script {
            Script::Crash => return Ok(CommandOutcome::failed(1, "simulated crash")),
            Script::NoOutput => {}
            Script::Empty => write_outputs(&invocation.produces, "")?,
            Script::Content => {
                let body = format!("{}\t{}\n", invocation.stage, invocation.sample_id);
                write_outputs(&invocation.produces, &body)?;
            }
        }
        Ok(CommandOutcome::ok())
    }
}

pub fn read(path: &Path) -> String {
    fs::read_to_string(path).unwrap_or_default()
}
