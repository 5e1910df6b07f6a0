use std::collections::HashMap;
use std::path::{Path, PathBuf};

use log::debug;

use crate::cli::Arguments;
use crate::config::defs::{PipelineError, Tool};
use crate::config::gate::EnablementPolicy;
use crate::utils::file::resolve_path;


/// Reference files one fusion caller needs. The formats are opaque here;
/// only presence is checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReferenceBundle {
    Arriba {
        star_index: PathBuf,
        fasta: PathBuf,
        gtf: PathBuf,
        blacklist: PathBuf,
    },
    StarFusion {
        genome_lib: PathBuf,
    },
    Squid {
        star_index: PathBuf,
        gtf: PathBuf,
    },
    EricScript {
        db: PathBuf,
    },
    FusionCatcher {
        data_dir: PathBuf,
    },
    Pizzly {
        kallisto_index: PathBuf,
        gtf: PathBuf,
        transcripts: PathBuf,
    },
}


/// Bundles for the enabled tools only, plus the references used downstream of the join.
#[derive(Debug, Clone, Default)]
pub struct ReferenceSet {
    bundles: HashMap<Tool, ReferenceBundle>,
    pub fusion_report_db: Option<PathBuf>,
    pub fusion_inspector_lib: Option<PathBuf>,
}

impl ReferenceSet {
    /// Resolves and checks every reference an enabled tool or downstream stage needs.
    /// Disabled tools are never looked at, so their paths may be absent.
    ///
    /// # Arguments
    ///
    /// * `args` - Parsed command line.
    /// * `policy` - Enablement computed for this run.
    /// * `cwd` - Base for relative paths.
    ///
    /// # Returns
    /// ReferenceSet, or the first missing reference.
    pub fn resolve(args: &Arguments, policy: &EnablementPolicy, cwd: &Path) -> Result<Self, PipelineError> {
        let mut bundles = HashMap::new();

        for tool in policy.enabled_tools() {
            let label = tool.tag();
            let bundle = match tool {
                Tool::Arriba => ReferenceBundle::Arriba {
                    star_index: require(label, "STAR index (--star_index)", &args.star_index, cwd)?,
                    fasta: require(label, "genome FASTA (--fasta)", &args.fasta, cwd)?,
                    gtf: require(label, "GTF (--gtf)", &args.gtf, cwd)?,
                    blacklist: require(label, "blacklist (--arriba_ref)", &args.arriba_ref, cwd)?,
                },
                Tool::StarFusion => ReferenceBundle::StarFusion {
                    genome_lib: require(label, "CTAT genome lib (--star_fusion_ref)", &args.star_fusion_ref, cwd)?,
                },
                Tool::Squid => ReferenceBundle::Squid {
                    star_index: require(label, "STAR index (--star_index)", &args.star_index, cwd)?,
                    gtf: require(label, "GTF (--gtf)", &args.gtf, cwd)?,
                },
                Tool::EricScript => ReferenceBundle::EricScript {
                    db: require(label, "database (--ericscript_ref)", &args.ericscript_ref, cwd)?,
                },
                Tool::FusionCatcher => ReferenceBundle::FusionCatcher {
                    data_dir: require(label, "data directory (--fusioncatcher_ref)", &args.fusioncatcher_ref, cwd)?,
                },
                Tool::Pizzly => ReferenceBundle::Pizzly {
                    kallisto_index: require(label, "kallisto index (--pizzly_index)", &args.pizzly_index, cwd)?,
                    gtf: require(label, "GTF (--gtf)", &args.gtf, cwd)?,
                    transcripts: require(label, "transcript FASTA (--transcript)", &args.transcript, cwd)?,
                },
            };
            debug!("{} references: {:?}", label, bundle);
            bundles.insert(tool, bundle);
        }

        let fusion_report_db = if policy.synthesis_allowed() {
            Some(require("fusion-report", "database (--fusion_report_db)", &args.fusion_report_db, cwd)?)
        } else {
            None
        };

        let fusion_inspector_lib = if args.fusion_inspector {
            Some(require("FusionInspector", "CTAT genome lib (--star_fusion_ref)", &args.star_fusion_ref, cwd)?)
        } else {
            None
        };

        Ok(ReferenceSet {
            bundles,
            fusion_report_db,
            fusion_inspector_lib,
        })
    }

    pub fn bundle(&self, tool: Tool) -> Result<&ReferenceBundle, PipelineError> {
        self.bundles.get(&tool).ok_or_else(|| PipelineError::MissingReference {
            tool: tool.tag().to_string(),
            what: "reference bundle",
            path: None,
        })
    }

    /// Annotation used by the Arriba plots.
    pub fn arriba_gtf(&self) -> Option<&Path> {
        match self.bundles.get(&Tool::Arriba) {
            Some(ReferenceBundle::Arriba { gtf, .. }) => Some(gtf.as_path()),
            _ => None,
        }
    }
}


fn require(tool: &str, what: &'static str, value: &Option<String>, cwd: &Path) -> Result<PathBuf, PipelineError> {
    let Some(raw) = value else {
        return Err(PipelineError::MissingReference {
            tool: tool.to_string(),
            what,
            path: None,
        });
    };
    let path = resolve_path(Path::new(raw), cwd);
    if !path.exists() {
        return Err(PipelineError::MissingReference {
            tool: tool.to_string(),
            what,
            path: Some(path),
        });
    }
    Ok(path)
}
