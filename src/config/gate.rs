// src/config/gate.rs: decides which fusion callers run for this execution

use crate::cli::Arguments;
use crate::config::defs::{EndType, PipelineError, Tool, TOOL_COUNT};


/// Per-tool "runs this execution" map, computed once before any stage starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnablementPolicy {
    flagged: [bool; TOOL_COUNT],
    runs: [bool; TOOL_COUNT],
    end_type: EndType,
    debug: bool,
}

impl EnablementPolicy {
    /// `runs = flag AND (end_type_compatible OR debug)`
    ///
    /// # Arguments
    ///
    /// * `flag` - Whether each tool was requested.
    /// * `end_type` - Single or paired end, fixed for the run.
    /// * `debug` - Single-tool test mode; lifts the paired-end restriction.
    pub fn from_flags<F>(flag: F, end_type: EndType, debug: bool) -> Self
    where
        F: Fn(Tool) -> bool,
    {
        let mut flagged = [false; TOOL_COUNT];
        let mut runs = [false; TOOL_COUNT];
        for tool in Tool::ALL {
            let requested = flag(tool);
            let compatible = !tool.paired_only() || end_type == EndType::Paired;
            flagged[tool.index()] = requested;
            runs[tool.index()] = requested && (compatible || debug);
        }
        EnablementPolicy { flagged, runs, end_type, debug }
    }

    pub fn from_args(args: &Arguments) -> Self {
        Self::from_flags(
            |tool| args.tool_flag(tool),
            EndType::from_single_end(args.single_end),
            args.debug,
        )
    }

    pub fn runs(&self, tool: Tool) -> bool {
        self.runs[tool.index()]
    }

    pub fn enabled_tools(&self) -> Vec<Tool> {
        Tool::ALL.into_iter().filter(|t| self.runs(*t)).collect()
    }

    pub fn any_enabled(&self) -> bool {
        self.runs.iter().any(|r| *r)
    }

    pub fn debug(&self) -> bool {
        self.debug
    }

    pub fn end_type(&self) -> EndType {
        self.end_type
    }

    /// fusion-report only runs for integrated, non-debug runs.
    pub fn synthesis_allowed(&self) -> bool {
        self.any_enabled() && !self.debug
    }

    /// Rejects configurations that would otherwise run a silently reduced pipeline.
    pub fn validate(&self) -> Result<(), PipelineError> {
        let requested: Vec<Tool> = Tool::ALL
            .into_iter()
            .filter(|t| self.flagged[t.index()])
            .collect();

        if requested.is_empty() {
            return Err(PipelineError::InvalidConfig(
                "No fusion caller enabled. Enable at least one of --arriba, --star_fusion, --squid, --ericscript, --fusioncatcher, --pizzly".to_string(),
            ));
        }

        if self.debug && requested.len() > 1 {
            return Err(PipelineError::InvalidConfig(format!(
                "--debug runs a single tool in isolation, but {} were enabled: {}",
                requested.len(),
                requested.iter().map(|t| t.tag()).collect::<Vec<_>>().join(", ")
            )));
        }

        let incompatible: Vec<Tool> = requested
            .iter()
            .copied()
            .filter(|t| !self.runs(*t))
            .collect();
        if !incompatible.is_empty() {
            return Err(PipelineError::InvalidConfig(format!(
                "{} require paired-end reads but the run is {}. Remove the flag(s) or use --debug to test a single tool",
                incompatible.iter().map(|t| t.tag()).collect::<Vec<_>>().join(", "),
                self.end_type
            )));
        }

        Ok(())
    }

    pub fn validate_visualization(&self, arriba_vis: bool, fusion_inspector: bool) -> Result<(), PipelineError> {
        if arriba_vis && !self.runs(Tool::Arriba) {
            return Err(PipelineError::InvalidConfig(
                "--arriba_vis requires --arriba".to_string(),
            ));
        }
        if fusion_inspector && !self.synthesis_allowed() {
            return Err(PipelineError::InvalidConfig(
                "--fusion_inspector consumes the fusion-report list, which is not produced in --debug mode".to_string(),
            ));
        }
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn only(tools: &'static [Tool]) -> impl Fn(Tool) -> bool {
        move |t| tools.contains(&t)
    }

    #[test]
    fn test_paired_end_runs_all_flagged() {
        let policy = EnablementPolicy::from_flags(|_| true, EndType::Paired, false);
        assert_eq!(policy.enabled_tools(), Tool::ALL.to_vec());
        assert!(policy.synthesis_allowed());
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn test_single_end_blocks_paired_only_tools() {
        let policy = EnablementPolicy::from_flags(
            only(&[Tool::Arriba, Tool::Pizzly]),
            EndType::Single,
            false,
        );
        assert!(policy.runs(Tool::Arriba));
        assert!(!policy.runs(Tool::Pizzly));
        assert!(!policy.runs(Tool::EricScript));
        assert!(matches!(policy.validate(), Err(PipelineError::InvalidConfig(_))));
    }

    #[test]
    fn test_debug_override_on_single_end() {
        let policy = EnablementPolicy::from_flags(only(&[Tool::Pizzly]), EndType::Single, true);
        assert!(policy.runs(Tool::Pizzly));
        assert!(policy.validate().is_ok());
        assert!(!policy.synthesis_allowed());
    }

    #[test]
    fn test_debug_squid_single_end_skips_synthesis() {
        let policy = EnablementPolicy::from_flags(only(&[Tool::Squid]), EndType::Single, true);
        assert_eq!(policy.enabled_tools(), vec![Tool::Squid]);
        assert!(policy.validate().is_ok());
        assert!(!policy.synthesis_allowed());
    }

    #[test]
    fn test_debug_rejects_multiple_tools() {
        let policy = EnablementPolicy::from_flags(
            only(&[Tool::Squid, Tool::Arriba]),
            EndType::Paired,
            true,
        );
        assert!(matches!(policy.validate(), Err(PipelineError::InvalidConfig(_))));
    }

    #[test]
    fn test_nothing_enabled() {
        let policy = EnablementPolicy::from_flags(|_| false, EndType::Paired, false);
        assert!(!policy.any_enabled());
        assert!(!policy.synthesis_allowed());
        assert!(policy.validate().is_err());
    }

    #[test]
    fn test_visualization_preconditions() {
        let policy = EnablementPolicy::from_flags(only(&[Tool::StarFusion]), EndType::Paired, false);
        assert!(policy.validate_visualization(true, false).is_err());
        assert!(policy.validate_visualization(false, true).is_ok());

        let debug = EnablementPolicy::from_flags(only(&[Tool::Arriba]), EndType::Paired, true);
        assert!(debug.validate_visualization(true, false).is_ok());
        assert!(debug.validate_visualization(false, true).is_err());
    }
}
