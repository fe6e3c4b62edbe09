use crate::detectors::{swc_107, Confidence, Detector, Finding, PatternId, Severity};
use crate::parser::{Contract, Function};

/// Flags externally invocable functions that make external calls without a mutex modifier.
pub struct MissingGuardDetector;

impl MissingGuardDetector {
    pub fn new() -> Self {
        Self
    }
}

impl Default for MissingGuardDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl Detector for MissingGuardDetector {
    fn pattern(&self) -> PatternId {
        PatternId::MissingReentrancyGuard
    }

    fn description(&self) -> &'static str {
        "Externally callable function performs external calls without a reentrancy guard"
    }

    fn default_severity(&self) -> Severity {
        Severity::Medium
    }

    fn check_function(&self, contract: &Contract, function: &Function) -> Vec<Finding> {
        if !function.is_externally_invocable() || function.has_mutex_guard() {
            return Vec::new();
        }
        let Some(call) = function.first_call() else {
            return Vec::new();
        };

        let confidence = if function.read_only {
            Confidence::Low
        } else if function.has_unresolved_modifiers() {
            Confidence::Medium
        } else {
            Confidence::High
        };
        let unresolved: Vec<&str> = function
            .modifiers
            .iter()
            .filter(|m| !m.resolved)
            .map(|m| m.name.as_str())
            .collect();
        let unresolved_note = if unresolved.is_empty() {
            String::new()
        } else {
            format!(
                " Modifier(s) {} could not be resolved in this file and are assumed not to be guards.",
                unresolved.join(", ")
            )
        };

        vec![Finding::new(
            self.pattern(),
            self.default_severity(),
            confidence,
            format!("Missing reentrancy guard on {}", function.name),
            format!(
                "`{}` can be invoked externally and performs {} external call(s), the first to {} at line {}, \
                 but no applied modifier looks like a mutex.{}",
                function.name,
                function.calls.len(),
                call.target,
                call.line,
                unresolved_note
            ),
            contract,
            function,
            function.start_line,
            "Add a reentrancy guard (for example OpenZeppelin's `ReentrancyGuard` and its `nonReentrant` \
             modifier) to functions that call out to other contracts.",
        )
        .with_supporting_lines(vec![call.line])
        .with_cwe(vec![841])
        .with_references(vec![swc_107()])]
    }
}
