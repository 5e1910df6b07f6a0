// src/utils/sample.rs: sample discovery from a samplesheet or from -i/-I

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use lazy_static::lazy_static;
use log::{info, warn};
use regex::Regex;
use serde::Deserialize;

use crate::cli::Arguments;
use crate::config::defs::{EndType, PipelineError};
use crate::utils::file::resolve_path;

lazy_static! {
    static ref R1_R2_TAGS: HashMap<&'static str, &'static str> = {
        let mut m = HashMap::new();
        m.insert("R1", "R2");
        m.insert("r1", "r2");
        m.insert("1", "2");
        m.insert("READ1", "READ2");
        m.insert("read1", "read2");
        m
    };

    static ref SAMPLE_ID_RE: Regex = Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.\-]*$").expect("valid sample id regex");
}

const FASTQ_EXTS: &[&str] = &["fastq", "fq", "gz"];


#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reads {
    Single(PathBuf),
    Paired(PathBuf, PathBuf),
}

impl Reads {
    pub fn end_type(&self) -> EndType {
        match self {
            Reads::Single(_) => EndType::Single,
            Reads::Paired(_, _) => EndType::Paired,
        }
    }

    pub fn r1(&self) -> &Path {
        match self {
            Reads::Single(r1) | Reads::Paired(r1, _) => r1,
        }
    }

    pub fn r2(&self) -> Option<&Path> {
        match self {
            Reads::Single(_) => None,
            Reads::Paired(_, r2) => Some(r2),
        }
    }

    pub fn files(&self) -> Vec<&Path> {
        match self {
            Reads::Single(r1) => vec![r1.as_path()],
            Reads::Paired(r1, r2) => vec![r1.as_path(), r2.as_path()],
        }
    }
}


/// One sequencing specimen. Created once at startup and never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub id: String,
    pub reads: Reads,
}

impl Sample {
    pub fn new(id: impl Into<String>, reads: Reads) -> Self {
        Sample { id: id.into(), reads }
    }
}

impl fmt::Display for Sample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.id, self.reads.end_type())
    }
}


#[derive(Debug, Deserialize)]
struct SamplesheetRow {
    sample: String,
    fastq_1: String,
    #[serde(default)]
    fastq_2: Option<String>,
}


/// Finds the samples for this run. A samplesheet wins over -i/-I.
///
/// # Arguments
///
/// * `args` - Parsed command line.
/// * `cwd` - Base for relative paths given on the command line.
/// * `end_type` - Run-wide end type every sample must match.
///
/// # Returns
/// Samples in input order, ids unique.
pub fn discover_samples(args: &Arguments, cwd: &Path, end_type: EndType) -> Result<Vec<Arc<Sample>>, PipelineError> {
    let samples = match (&args.samplesheet, &args.file1) {
        (Some(sheet), _) => {
            if args.file1.is_some() {
                warn!("Both --samplesheet and -i given; using the samplesheet");
            }
            read_samplesheet(&resolve_path(Path::new(sheet), cwd), end_type)?
        }
        (None, Some(file1)) => {
            let r1 = resolve_path(Path::new(file1), cwd);
            let r2 = args.file2.as_ref().map(|f| resolve_path(Path::new(f), cwd));
            let id = match &args.sample {
                Some(id) => id.clone(),
                None => sample_base(&r1),
            };
            let sample = build_sample(id, r1, r2, end_type)
                .map_err(PipelineError::InvalidConfig)?;
            vec![sample]
        }
        (None, None) => {
            return Err(PipelineError::InvalidConfig(
                "No input. Provide --samplesheet or -i/--file1".to_string(),
            ));
        }
    };

    info!("Discovered {} {} sample(s)", samples.len(), end_type);
    Ok(samples.into_iter().map(Arc::new).collect())
}


/// Parses a `sample,fastq_1,fastq_2` CSV. Read paths resolve against the sheet's directory.
pub fn read_samplesheet(path: &Path, end_type: EndType) -> Result<Vec<Sample>, PipelineError> {
    let invalid = |reason: String| PipelineError::InvalidSamplesheet {
        path: path.to_path_buf(),
        reason,
    };

    let base = path.parent().map(Path::to_path_buf).unwrap_or_default();
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| invalid(e.to_string()))?;

    let mut samples = Vec::new();
    let mut seen = HashSet::new();
    for (line, row) in reader.deserialize::<SamplesheetRow>().enumerate() {
        let row = row.map_err(|e| invalid(format!("row {}: {}", line + 1, e)))?;
        if !seen.insert(row.sample.clone()) {
            return Err(invalid(format!("duplicate sample '{}'", row.sample)));
        }
        let r1 = resolve_path(Path::new(&row.fastq_1), &base);
        let r2 = row
            .fastq_2
            .filter(|f| !f.is_empty())
            .map(|f| resolve_path(Path::new(&f), &base));
        let sample = build_sample(row.sample, r1, r2, end_type)
            .map_err(|e| invalid(format!("row {}: {}", line + 1, e)))?;
        samples.push(sample);
    }

    if samples.is_empty() {
        return Err(invalid("no samples".to_string()));
    }
    Ok(samples)
}


fn build_sample(id: String, r1: PathBuf, r2: Option<PathBuf>, end_type: EndType) -> Result<Sample, String> {
    if !SAMPLE_ID_RE.is_match(&id) {
        return Err(format!(
            "invalid sample id '{}': use letters, digits, '_', '.' or '-'",
            id
        ));
    }

    let reads = match (r2, end_type) {
        (None, EndType::Single) => Reads::Single(r1),
        (Some(r2), EndType::Paired) => Reads::Paired(r1, r2),
        (None, EndType::Paired) => {
            return Err(format!("sample '{}' has one read file but the run is paired-end", id));
        }
        (Some(_), EndType::Single) => {
            return Err(format!("sample '{}' has two read files but the run is --single_end", id));
        }
    };

    for file in reads.files() {
        if !file.exists() {
            return Err(format!("read file {} for sample '{}' does not exist", file.display(), id));
        }
    }

    Ok(Sample { id, reads })
}


/// Sample name from an R1 file: the part before the R1 tag, else the bare stem.
/// `tumor_S1_R1_001.fastq.gz` gives `tumor_S1`.
pub fn sample_base(path: &Path) -> String {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "sample".to_string());

    let mut stem = file_name.as_str();
    while let Some((head, ext)) = stem.rsplit_once('.') {
        if FASTQ_EXTS.contains(&ext) {
            stem = head;
        } else {
            break;
        }
    }

    for delimiter in ['_', '.', '-'] {
        let parts: Vec<&str> = stem.split(delimiter).collect();
        for (index, part) in parts.iter().enumerate() {
            if index > 0 && R1_R2_TAGS.contains_key(part) {
                return parts[..index].join(&delimiter.to_string());
            }
        }
    }

    stem.to_string()
}
