use crate::config::ScanConfig;
use crate::detectors::{PatternId, Severity};
use crate::error::ScanError;
use clap::{Arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct Args {
    pub targets: Vec<PathBuf>,
    pub format: Option<OutputFormat>,
    pub output: Option<PathBuf>,
    pub severity: Option<Severity>,
    pub detectors: Vec<PatternId>,
    pub exclude_detectors: Vec<PatternId>,
    pub exclude: Vec<String>,
    pub no_recursive: bool,
    pub config: Option<PathBuf>,
    pub parallel: Option<usize>,
    pub verbose: bool,
    pub quiet: bool,
    pub no_color: bool,
    pub list_detectors: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
    Markdown,
}

impl FromStr for OutputFormat {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            "markdown" | "md" => Ok(OutputFormat::Markdown),
            other => Err(ScanError::config_error(format!("Unknown output format '{}'", other))),
        }
    }
}

pub fn build_command() -> Command {
    Command::new("reentrancy-scan")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Static analyzer that detects re-entrancy vulnerability patterns in Solidity contracts")
        .arg(
            Arg::new("targets")
                .help("Solidity files or directories to scan")
                .value_name("PATH")
                .num_args(1..)
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new("format")
                .help("Report format")
                .long("format")
                .short('f')
                .value_name("FORMAT")
                .value_parser(["text", "json", "markdown"]),
        )
        .arg(
            Arg::new("output")
                .help("Write the report to a file instead of stdout")
                .long("output")
                .short('o')
                .value_name("FILE"),
        )
        .arg(
            Arg::new("severity")
                .help("Only report findings of this severity or higher")
                .long("severity")
                .short('s')
                .value_name("SEVERITY")
                .value_parser(["info", "low", "medium", "high", "critical"]),
        )
        .arg(
            Arg::new("detectors")
                .help("Run only these patterns (leave empty for all)")
                .long("detectors")
                .short('D')
                .value_name("PATTERN")
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new("exclude-detectors")
                .help("Patterns to skip")
                .long("exclude-detectors")
                .short('E')
                .value_name("PATTERN")
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new("exclude")
                .help("Skip paths with a component matching this name (replaces the default list)")
                .long("exclude")
                .short('e')
                .value_name("NAME")
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new("no-recursive")
                .help("Only scan the top level of target directories")
                .long("no-recursive")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("config")
                .help("Configuration file path")
                .long("config")
                .short('c')
                .value_name("FILE"),
        )
        .arg(
            Arg::new("parallel")
                .help("Number of parallel analysis threads (default: auto)")
                .long("parallel")
                .short('j')
                .value_name("THREADS")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new("verbose")
                .help("Show code snippets and debug logging")
                .long("verbose")
                .short('v')
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("quiet")
                .help("Only print findings, without header or summary")
                .long("quiet")
                .short('q')
                .action(ArgAction::SetTrue)
                .conflicts_with("verbose"),
        )
        .arg(
            Arg::new("no-color")
                .help("Disable colored output")
                .long("no-color")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("list-detectors")
                .help("List all available patterns and exit")
                .long("list-detectors")
                .action(ArgAction::SetTrue),
        )
}

fn parse_patterns(matches: &ArgMatches, id: &str) -> Result<Vec<PatternId>, ScanError> {
    matches
        .get_many::<String>(id)
        .map(|values| values.map(|v| v.parse::<PatternId>()).collect())
        .unwrap_or_else(|| Ok(Vec::new()))
}

impl Args {
    pub fn from_matches(matches: &ArgMatches) -> Result<Self, ScanError> {
        let targets = matches
            .get_many::<String>("targets")
            .map(|values| values.map(PathBuf::from).collect())
            .unwrap_or_default();

        let format = matches
            .get_one::<String>("format")
            .map(|s| s.parse::<OutputFormat>())
            .transpose()?;

        let severity = matches
            .get_one::<String>("severity")
            .map(|s| s.parse::<Severity>())
            .transpose()?;

        let exclude = matches
            .get_many::<String>("exclude")
            .map(|values| values.cloned().collect())
            .unwrap_or_default();

        Ok(Args {
            targets,
            format,
            output: matches.get_one::<String>("output").map(PathBuf::from),
            severity,
            detectors: parse_patterns(matches, "detectors")?,
            exclude_detectors: parse_patterns(matches, "exclude-detectors")?,
            exclude,
            no_recursive: matches.get_flag("no-recursive"),
            config: matches.get_one::<String>("config").map(PathBuf::from),
            parallel: matches.get_one::<usize>("parallel").copied(),
            verbose: matches.get_flag("verbose"),
            quiet: matches.get_flag("quiet"),
            no_color: matches.get_flag("no-color"),
            list_detectors: matches.get_flag("list-detectors"),
        })
    }

    pub fn has_input(&self) -> bool {
        !self.targets.is_empty()
    }

    /// Loads the config file when one was given and layers the command-line options over it.
    pub fn resolve_config(&self) -> Result<ScanConfig, ScanError> {
        let mut config = match &self.config {
            Some(path) => ScanConfig::load_from_file(path)?,
            None => ScanConfig::default(),
        };
        self.apply_to(&mut config);
        Ok(config)
    }

    pub fn apply_to(&self, config: &mut ScanConfig) {
        if !self.detectors.is_empty() {
            config.detectors.enabled = self.detectors.clone();
        }
        config
            .detectors
            .disabled
            .extend(self.exclude_detectors.iter().copied());
        if let Some(severity) = self.severity {
            config.analysis.min_severity = severity;
        }
        if !self.exclude.is_empty() {
            config.analysis.exclude = self.exclude.clone();
        }
        if self.no_recursive {
            config.analysis.recursive = false;
        }
        if let Some(threads) = self.parallel {
            config.analysis.parallel_threads = threads;
        }
        if let Some(output) = &self.output {
            config.output.file = Some(output.display().to_string());
        }
    }

    /// Command-line format wins over the config file.
    pub fn output_format(&self, config: &ScanConfig) -> Result<OutputFormat, ScanError> {
        match self.format {
            Some(format) => Ok(format),
            None => config.output.format.parse(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Args, ScanError> {
        let matches = build_command()
            .try_get_matches_from(std::iter::once("reentrancy-scan").chain(args.iter().copied()))
            .unwrap();
        Args::from_matches(&matches)
    }

    #[test]
    fn test_defaults() {
        let args = parse(&["contracts"]).unwrap();
        assert_eq!(args.targets, vec![PathBuf::from("contracts")]);
        assert_eq!(args.format, None);
        assert!(args.detectors.is_empty());
        assert!(!args.no_recursive);

        let config = args.resolve_config().unwrap();
        assert_eq!(config, ScanConfig::default());
        assert_eq!(args.output_format(&config).unwrap(), OutputFormat::Text);
    }

    #[test]
    fn test_options_override_config() {
        let args = parse(&[
            "a.sol",
            "b.sol",
            "-f",
            "json",
            "-s",
            "high",
            "-D",
            "delegatecall-usage",
            "-D",
            "state_change_after_call",
            "-E",
            "external_call_in_loop",
            "-e",
            "lib",
            "--no-recursive",
            "-j",
            "4",
        ])
        .unwrap();
        assert_eq!(args.targets.len(), 2);

        let config = args.resolve_config().unwrap();
        assert_eq!(args.output_format(&config).unwrap(), OutputFormat::Json);
        assert_eq!(config.analysis.min_severity, Severity::High);
        assert_eq!(
            config.detectors.enabled,
            vec![PatternId::DelegatecallUsage, PatternId::StateChangeAfterCall]
        );
        assert_eq!(config.detectors.disabled, vec![PatternId::ExternalCallInLoop]);
        assert_eq!(config.analysis.exclude, vec!["lib".to_string()]);
        assert!(!config.analysis.recursive);
        assert_eq!(config.analysis.parallel_threads, 4);
    }

    #[test]
    fn test_unknown_pattern_is_rejected() {
        let err = parse(&["a.sol", "-D", "flash_loans"]).unwrap_err();
        assert!(matches!(err, ScanError::Config(_)));
    }

    #[test]
    fn test_quiet_conflicts_with_verbose() {
        let result = build_command().try_get_matches_from(["reentrancy-scan", "-q", "-v", "a.sol"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_output_format_from_str() {
        assert_eq!("Markdown".parse::<OutputFormat>().unwrap(), OutputFormat::Markdown);
        assert!("sarif".parse::<OutputFormat>().is_err());
    }
}
