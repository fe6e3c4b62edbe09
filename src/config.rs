use crate::detectors::{PatternId, Severity};
use crate::error::ScanError;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_MAX_FILE_SIZE: u64 = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub detectors: DetectorConfig,
    pub output: OutputConfig,
    pub analysis: AnalysisConfig,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Patterns to run; empty means every pattern.
    pub enabled: Vec<PatternId>,
    pub disabled: Vec<PatternId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub format: String,
    pub file: Option<String>,
    pub include_snippets: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub min_severity: Severity,
    /// Bytes; larger files are rejected before analysis.
    pub max_file_size: u64,
    /// 0 lets rayon pick.
    pub parallel_threads: usize,
    pub exclude: Vec<String>,
    pub recursive: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: "text".to_string(),
            file: None,
            include_snippets: true,
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            min_severity: Severity::Low,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            parallel_threads: 0,
            exclude: ["node_modules", "test", "mock", "Mock"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            recursive: true,
        }
    }
}

impl ScanConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ScanError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ScanError::config_error(format!("Failed to read {}: {}", path.display(), e)))?;
        toml::from_str(&content)
            .map_err(|e| ScanError::config_error(format!("Invalid config {}: {}", path.display(), e)))
    }

    pub fn is_pattern_enabled(&self, pattern: PatternId) -> bool {
        let included = self.detectors.enabled.is_empty() || self.detectors.enabled.contains(&pattern);
        included && !self.detectors.disabled.contains(&pattern)
    }

    pub fn enabled_patterns(&self) -> Vec<PatternId> {
        PatternId::all()
            .into_iter()
            .filter(|p| self.is_pattern_enabled(*p))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = ScanConfig::default();
        assert_eq!(config.analysis.min_severity, Severity::Low);
        assert_eq!(config.analysis.max_file_size, 1_048_576);
        assert!(config.analysis.recursive);
        assert_eq!(config.enabled_patterns().len(), 5);
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[detectors]
disabled = ["delegatecall_usage"]

[analysis]
min_severity = "high"
max_file_size = 2048
"#
        )
        .unwrap();

        let config = ScanConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.analysis.min_severity, Severity::High);
        assert_eq!(config.analysis.max_file_size, 2048);
        assert_eq!(config.analysis.exclude.len(), 4);
        assert!(!config.is_pattern_enabled(PatternId::DelegatecallUsage));
        assert!(config.is_pattern_enabled(PatternId::StateChangeAfterCall));
        assert_eq!(config.output.format, "text");
    }

    #[test]
    fn test_enabled_list_restricts_patterns() {
        let mut config = ScanConfig::default();
        config.detectors.enabled = vec![PatternId::ExternalCallInLoop, PatternId::DelegatecallUsage];
        config.detectors.disabled = vec![PatternId::DelegatecallUsage];
        assert_eq!(config.enabled_patterns(), vec![PatternId::ExternalCallInLoop]);
    }

    #[test]
    fn test_invalid_file_is_config_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[detectors]\nenabled = [\"no_such_pattern\"]").unwrap();
        let err = ScanConfig::load_from_file(file.path()).unwrap_err();
        assert!(matches!(err, ScanError::Config(_)));

        let missing = ScanConfig::load_from_file("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(missing, ScanError::Config(_)));
    }
}
