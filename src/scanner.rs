use crate::config::ScanConfig;
use crate::detectors::{Detector, DetectorRegistry, Finding, Severity};
use crate::error::{FileError, ScanError};
use crate::parser::{Contract, SolidityParser};
use crate::utils::extract_code_snippet;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::File;
use std::io::Read;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, error, warn};
use walkdir::WalkDir;

pub const SOURCE_EXTENSION: &str = "sol";
const SNIPPET_CONTEXT_LINES: usize = 2;

/// Result of analyzing one file: findings, or the reason no model could be built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileReport {
    pub path: String,
    pub contracts: Vec<String>,
    pub findings: Vec<Finding>,
    pub error: Option<FileError>,
    pub duration_ms: u128,
}

impl FileReport {
    fn failed(path: &str, error: FileError, started: Instant) -> Self {
        Self {
            path: path.to_string(),
            contracts: Vec::new(),
            findings: Vec::new(),
            error: Some(error),
            duration_ms: started.elapsed().as_millis(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanReport {
    /// Sorted by path.
    pub files: Vec<FileReport>,
    pub duration_ms: u128,
}

impl ScanReport {
    pub fn all_findings(&self) -> Vec<&Finding> {
        let mut findings: Vec<&Finding> = self.files.iter().flat_map(|f| f.findings.iter()).collect();
        findings.sort_by(|a, b| b.severity.cmp(&a.severity));
        findings
    }

    pub fn errors(&self) -> Vec<&FileError> {
        self.files.iter().filter_map(|f| f.error.as_ref()).collect()
    }

    pub fn total_findings(&self) -> usize {
        self.files.iter().map(|f| f.findings.len()).sum()
    }

    pub fn count_by_severity(&self, severity: Severity) -> usize {
        self.files
            .iter()
            .flat_map(|f| f.findings.iter())
            .filter(|f| f.severity == severity)
            .count()
    }

    pub fn has_findings(&self) -> bool {
        self.total_findings() > 0
    }

    pub fn has_errors(&self) -> bool {
        self.files.iter().any(|f| f.error.is_some())
    }
}

/// Detection engine. Holds no per-file state, so one instance can serve many threads.
pub struct Scanner {
    config: ScanConfig,
    detector_registry: DetectorRegistry,
}

impl Scanner {
    pub fn new(config: ScanConfig) -> Self {
        Self {
            config,
            detector_registry: DetectorRegistry::new(),
        }
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    pub fn registry(&self) -> &DetectorRegistry {
        &self.detector_registry
    }

    fn selected_detectors(&self) -> Vec<&dyn Detector> {
        self.detector_registry.get_selected_detectors(
            &self.config.detectors.enabled,
            &self.config.detectors.disabled,
        )
    }

    /// Builds the source model for `text` and runs every enabled detector over it.
    pub fn analyze(&self, path: &str, text: &str) -> FileReport {
        let started = Instant::now();

        let contracts = match SolidityParser::parse(text) {
            Ok(contracts) => contracts,
            Err(e) => {
                let file_error = e.into_file_error(path);
                warn!(path, error = %file_error.message, "source model could not be built");
                return FileReport::failed(path, file_error, started);
            }
        };

        let detectors = self.selected_detectors();
        let mut findings = Vec::new();
        for contract in &contracts {
            for detector in &detectors {
                let before = findings.len();
                for function in &contract.functions {
                    findings.extend(run_isolated(*detector, contract, Some(function.name.as_str()), || {
                        detector.check_function(contract, function)
                    }));
                }
                findings.extend(run_isolated(*detector, contract, None, || detector.check_contract(contract)));
                debug!(
                    path,
                    contract = %contract.name,
                    detector = detector.name(),
                    findings = findings.len() - before,
                    "detector finished"
                );
            }
        }

        let line_count = text.lines().count();
        let findings = self.finalize(path, text, line_count, findings);
        debug!(path, contracts = contracts.len(), findings = findings.len(), "file analyzed");

        FileReport {
            path: path.to_string(),
            contracts: contracts.iter().map(|c| c.name.clone()).collect(),
            findings,
            error: None,
            duration_ms: started.elapsed().as_millis(),
        }
    }

    /// Sorts, deduplicates, applies the severity threshold and attaches snippets.
    fn finalize(&self, path: &str, text: &str, line_count: usize, mut findings: Vec<Finding>) -> Vec<Finding> {
        findings.retain(|f| {
            let valid = f.cited_lines().all(|line| line >= 1 && line <= line_count);
            if !valid {
                debug!(path, pattern = %f.pattern, line = f.line, "dropping finding with out-of-range line");
            }
            valid
        });

        findings.sort_by(|a, b| {
            b.severity
                .cmp(&a.severity)
                .then(a.line.cmp(&b.line))
                .then_with(|| a.contract.cmp(&b.contract))
                .then_with(|| a.function.cmp(&b.function))
                .then(a.pattern.cmp(&b.pattern))
                .then_with(|| a.supporting_lines.cmp(&b.supporting_lines))
                .then_with(|| a.variable.cmp(&b.variable))
        });

        let mut seen = HashSet::new();
        findings.retain(|f| seen.insert(f.fingerprint.clone()));

        let threshold = self.config.analysis.min_severity;
        findings.retain(|f| f.severity >= threshold);

        let include_snippets = self.config.output.include_snippets;
        findings
            .into_iter()
            .map(|f| {
                let snippet = if include_snippets {
                    extract_code_snippet(text, f.line, SNIPPET_CONTEXT_LINES)
                } else {
                    String::new()
                };
                f.with_location(path, snippet)
            })
            .collect()
    }

    /// Reads `path` once with a size bound and analyzes it.
    pub fn analyze_path(&self, path: &Path) -> FileReport {
        let started = Instant::now();
        let shown = path.display().to_string();
        match read_source(path, self.config.analysis.max_file_size) {
            Ok(text) => self.analyze(&shown, &text),
            Err(e) => {
                let file_error = e.into_file_error(&shown);
                warn!(path = %shown, error = %file_error.message, "file skipped");
                FileReport::failed(&shown, file_error, started)
            }
        }
    }

    /// Analyzes every file independently, in parallel, and merges the reports.
    pub fn scan(&self, paths: &[PathBuf]) -> ScanReport {
        let started = Instant::now();
        let run = || -> Vec<FileReport> { paths.par_iter().map(|p| self.analyze_path(p)).collect() };

        let threads = self.config.analysis.parallel_threads;
        let mut files = if threads > 0 {
            match rayon::ThreadPoolBuilder::new().num_threads(threads).build() {
                Ok(pool) => pool.install(run),
                Err(e) => {
                    warn!(threads, error = %e, "could not build thread pool, using the global pool");
                    run()
                }
            }
        } else {
            run()
        };
        files.sort_by(|a, b| a.path.cmp(&b.path));

        debug!(files = files.len(), "scan finished");
        ScanReport {
            files,
            duration_ms: started.elapsed().as_millis(),
        }
    }

    /// Collects sources under `targets` using the configured traversal options, then scans them.
    pub fn scan_targets(&self, targets: &[PathBuf]) -> Result<ScanReport, ScanError> {
        let analysis = &self.config.analysis;
        let files = collect_sources(targets, analysis.recursive, &analysis.exclude)?;
        debug!(files = files.len(), "collected source files");
        Ok(self.scan(&files))
    }
}

impl Default for Scanner {
    fn default() -> Self {
        Self::new(ScanConfig::default())
    }
}

fn run_isolated<F>(detector: &dyn Detector, contract: &Contract, function: Option<&str>, check: F) -> Vec<Finding>
where
    F: FnOnce() -> Vec<Finding>,
{
    match catch_unwind(AssertUnwindSafe(check)) {
        Ok(findings) => findings,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!(
                detector = detector.name(),
                contract = %contract.name,
                function = function.unwrap_or("<contract>"),
                %message,
                "detector panicked, contributing no findings"
            );
            Vec::new()
        }
    }
}

fn is_source_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext == SOURCE_EXTENSION)
        .unwrap_or(false)
}

/// Reads a source file, failing fast on anything oversized, unreadable or not UTF-8.
pub fn read_source(path: &Path, max_size: u64) -> Result<String, ScanError> {
    let display = path.display().to_string();
    if !is_source_file(path) {
        return Err(ScanError::file_access(
            display,
            format!("unsupported file type, only .{} sources are analyzed", SOURCE_EXTENSION),
        ));
    }

    let metadata = std::fs::metadata(path).map_err(|e| ScanError::file_access(&display, e.to_string()))?;
    if !metadata.is_file() {
        return Err(ScanError::file_access(display, "not a regular file"));
    }
    if metadata.len() > max_size {
        return Err(ScanError::file_access(
            display,
            format!("file is {} bytes, larger than the {} byte limit", metadata.len(), max_size),
        ));
    }

    let file = File::open(path).map_err(|e| ScanError::file_access(&display, e.to_string()))?;
    let mut bytes = Vec::with_capacity(metadata.len() as usize);
    file.take(max_size + 1)
        .read_to_end(&mut bytes)
        .map_err(|e| ScanError::file_access(&display, e.to_string()))?;
    if bytes.len() as u64 > max_size {
        return Err(ScanError::file_access(
            display,
            format!("file grew beyond the {} byte limit while reading", max_size),
        ));
    }

    String::from_utf8(bytes).map_err(|e| {
        ScanError::file_access(
            display,
            format!("not valid UTF-8 (invalid byte at offset {})", e.utf8_error().valid_up_to()),
        )
    })
}

fn is_excluded(relative: &Path, exclude: &[String]) -> bool {
    relative.components().any(|component| {
        let name = component.as_os_str().to_string_lossy();
        exclude
            .iter()
            .any(|pattern| !pattern.is_empty() && (name == pattern.as_str() || name.starts_with(pattern.as_str())))
    })
}

/// Expands files and directories into a sorted, deduplicated list of sources.
///
/// Explicit file targets are kept as given; directories contribute `.sol` files
/// whose path below the directory has no component matching an exclude pattern.
pub fn collect_sources(targets: &[PathBuf], recursive: bool, exclude: &[String]) -> Result<Vec<PathBuf>, ScanError> {
    let mut files = Vec::new();

    for target in targets {
        if target.is_file() {
            files.push(target.clone());
        } else if target.is_dir() {
            let max_depth = if recursive { usize::MAX } else { 1 };
            for entry in WalkDir::new(target)
                .follow_links(false)
                .max_depth(max_depth)
                .into_iter()
                .filter_map(|e| e.ok())
            {
                let path = entry.path();
                if !entry.file_type().is_file() || !is_source_file(path) {
                    continue;
                }
                let relative = path.strip_prefix(target).unwrap_or(path);
                if is_excluded(relative, exclude) {
                    debug!(path = %path.display(), "excluded");
                    continue;
                }
                files.push(path.to_path_buf());
            }
        } else {
            return Err(ScanError::file_access(target.display().to_string(), "path does not exist"));
        }
    }

    files.sort();
    files.dedup();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detectors::{Confidence, PatternId};
    use crate::error::FileErrorKind;
    use crate::parser::Function;

    const BANK: &str = r#"
contract Bank {
    mapping(address => uint256) balances;

    function deposit() external payable {
        balances[msg.sender] += msg.value;
    }

    function withdraw(uint256 amount) external {
        (bool ok, ) = msg.sender.call{value: amount}("");
        require(ok);
        balances[msg.sender] -= amount;
    }
}
"#;

    #[test]
    fn test_analyze_orders_by_severity_then_line() {
        let report = Scanner::default().analyze("Bank.sol", BANK);
        assert!(report.error.is_none());
        assert_eq!(report.contracts, vec!["Bank".to_string()]);
        let severities: Vec<Severity> = report.findings.iter().map(|f| f.severity).collect();
        let mut sorted = severities.clone();
        sorted.sort_by(|a, b| b.cmp(a));
        assert_eq!(severities, sorted);
        assert_eq!(report.findings[0].pattern, PatternId::StateChangeAfterCall);
        assert!(report.findings.iter().all(|f| f.file_path == "Bank.sol"));
        assert!(report.findings[0].code_snippet.contains(">>>"));
    }

    #[test]
    fn test_threshold_is_applied_after_detection() {
        let mut config = ScanConfig::default();
        config.analysis.min_severity = Severity::High;
        let report = Scanner::new(config).analyze("Bank.sol", BANK);
        assert_eq!(report.findings.len(), 1);
        assert_eq!(report.findings[0].severity, Severity::Critical);
    }

    #[test]
    fn test_disabled_patterns_do_not_run() {
        let mut config = ScanConfig::default();
        config.detectors.disabled = vec![PatternId::StateChangeAfterCall, PatternId::CrossFunctionReentrancy];
        let report = Scanner::new(config).analyze("Bank.sol", BANK);
        assert_eq!(report.findings.len(), 1);
        assert_eq!(report.findings[0].pattern, PatternId::MissingReentrancyGuard);
    }

    #[test]
    fn test_parse_error_becomes_file_error() {
        let report = Scanner::default().analyze("Broken.sol", "contract Broken {\n function f() public {\n");
        let error = report.error.expect("expected a file-level error");
        assert_eq!(error.kind, FileErrorKind::Parse);
        assert_eq!(error.line, Some(2));
        assert!(report.findings.is_empty());
    }

    struct PanickingDetector;

    impl Detector for PanickingDetector {
        fn pattern(&self) -> PatternId {
            PatternId::DelegatecallUsage
        }
        fn description(&self) -> &'static str {
            "panics"
        }
        fn default_severity(&self) -> Severity {
            Severity::High
        }
        fn check_function(&self, _contract: &Contract, _function: &Function) -> Vec<Finding> {
            panic!("boom")
        }
    }

    #[test]
    fn test_panicking_detector_contributes_nothing() {
        let contract = SolidityParser::parse(BANK).unwrap().remove(0);
        let function = &contract.functions[0];
        let detector = PanickingDetector;
        let findings = run_isolated(&detector, &contract, Some(function.name.as_str()), || {
            detector.check_function(&contract, function)
        });
        assert!(findings.is_empty());
    }

    #[test]
    fn test_dedup_keeps_distinct_variables() {
        let source = r#"
contract Two {
    uint256 a;
    uint256 b;
    function f() external {
        msg.sender.call("");
        a = 1; b = 2;
    }
}
"#;
        let report = Scanner::default().analyze("Two.sol", source);
        let critical: Vec<&Finding> = report
            .findings
            .iter()
            .filter(|f| f.pattern == PatternId::StateChangeAfterCall)
            .collect();
        assert_eq!(critical.len(), 2);
        assert!(critical.iter().all(|f| f.confidence == Confidence::High));
    }

    #[test]
    fn test_exclusion_matches_path_components() {
        let exclude = vec!["test".to_string(), "Mock".to_string()];
        assert!(is_excluded(Path::new("test/Token.sol"), &exclude));
        assert!(is_excluded(Path::new("src/MockToken.sol"), &exclude));
        assert!(!is_excluded(Path::new("src/Attestation.sol"), &exclude));
    }
}
