use crate::error::ScanError;
use crate::parser::{Contract, Function};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub mod cross_function;
pub mod delegatecall;
pub mod external_call_in_loop;
pub mod missing_guard;
pub mod state_change_after_call;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "Critical",
            Severity::High => "High",
            Severity::Medium => "Medium",
            Severity::Low => "Low",
            Severity::Info => "Info",
        }
    }

    pub fn all() -> [Severity; 5] {
        [
            Severity::Critical,
            Severity::High,
            Severity::Medium,
            Severity::Low,
            Severity::Info,
        ]
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "info" => Ok(Severity::Info),
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            other => Err(ScanError::config_error(format!("Unknown severity level: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::High => "high",
            Confidence::Medium => "medium",
            Confidence::Low => "low",
        }
    }

    /// One step less certain; `Low` stays `Low`.
    pub fn downgrade(self) -> Self {
        match self {
            Confidence::High => Confidence::Medium,
            _ => Confidence::Low,
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifier of one of the five re-entrancy patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PatternId {
    StateChangeAfterCall,
    ExternalCallInLoop,
    DelegatecallUsage,
    MissingReentrancyGuard,
    CrossFunctionReentrancy,
}

impl PatternId {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatternId::StateChangeAfterCall => "state_change_after_call",
            PatternId::ExternalCallInLoop => "external_call_in_loop",
            PatternId::DelegatecallUsage => "delegatecall_usage",
            PatternId::MissingReentrancyGuard => "missing_reentrancy_guard",
            PatternId::CrossFunctionReentrancy => "cross_function_reentrancy",
        }
    }

    pub fn all() -> [PatternId; 5] {
        [
            PatternId::StateChangeAfterCall,
            PatternId::ExternalCallInLoop,
            PatternId::DelegatecallUsage,
            PatternId::MissingReentrancyGuard,
            PatternId::CrossFunctionReentrancy,
        ]
    }
}

impl fmt::Display for PatternId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PatternId {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().replace('-', "_").to_ascii_lowercase();
        PatternId::all()
            .into_iter()
            .find(|p| p.as_str() == wanted)
            .ok_or_else(|| ScanError::config_error(format!("Unknown detector: {}", s)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub title: String,
    pub url: String,
}

impl Reference {
    pub fn new(title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
        }
    }
}

pub fn swc_107() -> Reference {
    Reference::new("SWC-107: Reentrancy", "https://swcregistry.io/docs/SWC-107")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub pattern: PatternId,
    pub severity: Severity,
    pub confidence: Confidence,
    pub title: String,
    pub file_path: String,
    pub contract: String,
    pub function: String,
    pub line: usize,
    pub supporting_lines: Vec<usize>,
    pub variable: Option<String>,
    pub related_function: Option<String>,
    pub description: String,
    pub remediation: String,
    pub code_snippet: String,
    pub references: Vec<Reference>,
    pub cwe_ids: Vec<u32>,
    pub fingerprint: String,
}

impl Finding {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pattern: PatternId,
        severity: Severity,
        confidence: Confidence,
        title: impl Into<String>,
        description: impl Into<String>,
        contract: &Contract,
        function: &Function,
        line: usize,
        remediation: impl Into<String>,
    ) -> Self {
        let mut finding = Self {
            pattern,
            severity,
            confidence,
            title: title.into(),
            file_path: String::new(),
            contract: contract.name.clone(),
            function: function.name.clone(),
            line,
            supporting_lines: Vec::new(),
            variable: None,
            related_function: None,
            description: description.into(),
            remediation: remediation.into(),
            code_snippet: String::new(),
            references: Vec::new(),
            cwe_ids: Vec::new(),
            fingerprint: String::new(),
        };
        finding.fingerprint = finding.generate_fingerprint();
        finding
    }

    pub fn with_supporting_lines(mut self, lines: Vec<usize>) -> Self {
        self.supporting_lines = lines;
        self.fingerprint = self.generate_fingerprint();
        self
    }

    pub fn with_variable(mut self, variable: impl Into<String>) -> Self {
        self.variable = Some(variable.into());
        self.fingerprint = self.generate_fingerprint();
        self
    }

    pub fn with_related_function(mut self, function: impl Into<String>) -> Self {
        self.related_function = Some(function.into());
        self
    }

    pub fn with_cwe(mut self, cwe_ids: Vec<u32>) -> Self {
        self.cwe_ids = cwe_ids;
        self
    }

    pub fn with_references(mut self, references: Vec<Reference>) -> Self {
        self.references = references;
        self
    }

    /// Attaches the file path and snippet; done by the engine once detectors return.
    pub fn with_location(mut self, file_path: impl Into<String>, code_snippet: impl Into<String>) -> Self {
        self.file_path = file_path.into();
        self.code_snippet = code_snippet.into();
        self
    }

    /// Every line this finding cites, primary first.
    pub fn cited_lines(&self) -> impl Iterator<Item = usize> + '_ {
        std::iter::once(self.line).chain(self.supporting_lines.iter().copied())
    }

    fn generate_fingerprint(&self) -> String {
        use sha2::{Digest, Sha256};
        let supporting = self
            .supporting_lines
            .iter()
            .map(|l| l.to_string())
            .collect::<Vec<_>>()
            .join(",");
        let input = format!(
            "{}:{}:{}:{}:{}:{}",
            self.pattern.as_str(),
            self.contract,
            self.function,
            self.line,
            supporting,
            self.variable.as_deref().unwrap_or("")
        );
        let mut hasher = Sha256::new();
        hasher.update(input.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// A single re-entrancy analysis over the source model.
///
/// Per-function detectors override `check_function`; whole-contract detectors
/// override `check_contract`. Detectors only read the model.
pub trait Detector: Send + Sync {
    fn pattern(&self) -> PatternId;
    fn description(&self) -> &'static str;
    fn default_severity(&self) -> Severity;

    fn name(&self) -> &'static str {
        self.pattern().as_str()
    }

    fn check_function(&self, _contract: &Contract, _function: &Function) -> Vec<Finding> {
        Vec::new()
    }

    fn check_contract(&self, _contract: &Contract) -> Vec<Finding> {
        Vec::new()
    }
}

pub struct DetectorRegistry {
    detectors: Vec<Box<dyn Detector>>,
}

#[derive(Debug, Clone)]
pub struct DetectorInfo {
    pub name: &'static str,
    pub description: &'static str,
    pub default_severity: Severity,
}

impl DetectorRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            detectors: Vec::new(),
        };

        registry.register(Box::new(state_change_after_call::StateChangeAfterCallDetector::new()));
        registry.register(Box::new(external_call_in_loop::ExternalCallInLoopDetector::new()));
        registry.register(Box::new(delegatecall::DelegatecallDetector::new()));
        registry.register(Box::new(missing_guard::MissingGuardDetector::new()));
        registry.register(Box::new(cross_function::CrossFunctionDetector::new()));

        registry
    }

    fn register(&mut self, detector: Box<dyn Detector>) {
        self.detectors.retain(|d| d.pattern() != detector.pattern());
        self.detectors.push(detector);
    }

    pub fn get_detector(&self, pattern: PatternId) -> Option<&dyn Detector> {
        self.detectors
            .iter()
            .find(|d| d.pattern() == pattern)
            .map(|d| d.as_ref())
    }

    pub fn get_all_detectors(&self) -> Vec<&dyn Detector> {
        self.detectors.iter().map(|d| d.as_ref()).collect()
    }

    /// Detectors in registration order; an empty include list means all.
    pub fn get_selected_detectors(&self, include_list: &[PatternId], exclude_list: &[PatternId]) -> Vec<&dyn Detector> {
        self.detectors
            .iter()
            .filter(|d| {
                let included = include_list.is_empty() || include_list.contains(&d.pattern());
                let not_excluded = !exclude_list.contains(&d.pattern());
                included && not_excluded
            })
            .map(|d| d.as_ref())
            .collect()
    }

    pub fn list_available_detectors(&self) -> Vec<&'static str> {
        self.detectors.iter().map(|d| d.name()).collect()
    }

    pub fn detector_count(&self) -> usize {
        self.detectors.len()
    }

    pub fn get_detector_info(&self, pattern: PatternId) -> Option<DetectorInfo> {
        self.get_detector(pattern).map(|detector| DetectorInfo {
            name: detector.name(),
            description: detector.description(),
            default_severity: detector.default_severity(),
        })
    }
}

impl Default for DetectorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::parser::{Contract, SolidityParser};

    pub fn contract(source: &str) -> Contract {
        let mut contracts = SolidityParser::parse(source).expect("test source should parse");
        contracts.remove(0)
    }
}
