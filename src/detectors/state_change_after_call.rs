use crate::detectors::{swc_107, Confidence, Detector, Finding, PatternId, Severity};
use crate::parser::{AccessKind, CallSite, CallTarget, Contract, Function};

/// Flags contract state written after the function's first external call.
pub struct StateChangeAfterCallDetector;

impl StateChangeAfterCallDetector {
    pub fn new() -> Self {
        Self
    }

    fn confidence(&self, function: &Function, call: &CallSite) -> Confidence {
        if function.has_mutex_guard() {
            return Confidence::Low;
        }
        let base = if call.forwards_value || call.target == CallTarget::MsgSender {
            Confidence::High
        } else {
            Confidence::Medium
        };
        if function.has_unresolved_modifiers() {
            base.downgrade()
        } else {
            base
        }
    }
}

impl Default for StateChangeAfterCallDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl Detector for StateChangeAfterCallDetector {
    fn pattern(&self) -> PatternId {
        PatternId::StateChangeAfterCall
    }

    fn description(&self) -> &'static str {
        "State variable written after an external call; the callee can re-enter before the write lands"
    }

    fn default_severity(&self) -> Severity {
        Severity::Critical
    }

    fn check_function(&self, contract: &Contract, function: &Function) -> Vec<Finding> {
        let Some(call) = function.first_call() else {
            return Vec::new();
        };
        let confidence = self.confidence(function, call);

        let mut reported: Vec<&str> = Vec::new();
        let mut findings = Vec::new();
        for access in &function.state_accesses {
            if access.kind != AccessKind::Write || access.stmt <= call.stmt {
                continue;
            }
            if reported.contains(&access.variable.as_str()) {
                continue;
            }
            reported.push(&access.variable);

            let guard_note = if function.has_mutex_guard() {
                " The function carries a mutex-style modifier, which likely blocks re-entry, but the ordering still violates checks-effects-interactions."
            } else {
                ""
            };
            findings.push(
                Finding::new(
                    self.pattern(),
                    self.default_severity(),
                    confidence,
                    format!("State change after external call in {}", function.name),
                    format!(
                        "`{}` makes an external call to {} at line {} and writes state variable `{}` at line {}. \
                         The callee can re-enter `{}` (or another function) while `{}` still holds its old value.{}",
                        function.name,
                        call.target,
                        call.line,
                        access.variable,
                        access.line,
                        contract.name,
                        access.variable,
                        guard_note
                    ),
                    contract,
                    function,
                    call.line,
                    "Apply checks-effects-interactions: update state before making external calls, \
                     or protect the function with a reentrancy guard such as `nonReentrant`.",
                )
                .with_supporting_lines(vec![access.line])
                .with_variable(access.variable.clone())
                .with_cwe(vec![841])
                .with_references(vec![swc_107()]),
            );
        }
        findings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detectors::test_support::contract;

    fn run(source: &str) -> Vec<Finding> {
        let contract = contract(source);
        let detector = StateChangeAfterCallDetector::new();
        contract
            .functions
            .iter()
            .flat_map(|f| detector.check_function(&contract, f))
            .collect()
    }

    #[test]
    fn test_write_after_call_is_flagged() {
        let findings = run(
            r#"
contract Bank {
    mapping(address => uint256) balances;
    function withdraw(uint256 amount) external {
        (bool ok, ) = msg.sender.call{value: amount}("");
        require(ok);
        balances[msg.sender] -= amount;
    }
}
"#,
        );
        assert_eq!(findings.len(), 1);
        let finding = &findings[0];
        assert_eq!(finding.severity, Severity::Critical);
        assert_eq!(finding.line, 5);
        assert_eq!(finding.supporting_lines, vec![7]);
        assert_eq!(finding.variable.as_deref(), Some("balances"));
        assert_eq!(finding.confidence, Confidence::High);
    }

    #[test]
    fn test_tuple_destructuring_after_call_is_flagged() {
        let findings = run(
            r#"
contract Pair {
    uint256 a;
    uint256 b;
    function settle() external {
        msg.sender.call{value: 1}("");
        (a, b) = (1, 2);
    }
}
"#,
        );
        let mut variables: Vec<&str> = findings.iter().filter_map(|f| f.variable.as_deref()).collect();
        variables.sort();
        assert_eq!(variables, vec!["a", "b"]);
        assert!(findings.iter().all(|f| f.line == 6 && f.supporting_lines == vec![7]));
    }

    #[test]
    fn test_library_struct_call_is_not_external() {
        let findings = run(
            r#"
contract Minter {
    using Counters for Counters.Counter;
    Counters.Counter private _ids;
    uint256 total;
    function mint() external {
        _ids.increment();
        total = 1;
    }
}
"#,
        );
        assert!(findings.is_empty());
    }

    #[test]
    fn test_write_before_call_is_not_flagged() {
        let findings = run(
            r#"
contract Bank {
    mapping(address => uint256) balances;
    function withdraw(uint256 amount) external {
        balances[msg.sender] -= amount;
        (bool ok, ) = msg.sender.call{value: amount}("");
        require(ok);
    }
}
"#,
        );
        assert!(findings.is_empty());
    }

    #[test]
    fn test_one_finding_per_variable() {
        let findings = run(
            r#"
contract Multi {
    uint256 a;
    uint256 b;
    function f(address target) external {
        target.call("");
        target.call("");
        a = 1;
        a = 2;
        b = 3;
    }
}
"#,
        );
        assert_eq!(findings.len(), 2);
        assert!(findings.iter().all(|f| f.line == 6));
        assert_eq!(findings[0].supporting_lines, vec![8]);
        assert_eq!(findings[1].variable.as_deref(), Some("b"));
        assert_eq!(findings[0].confidence, Confidence::Medium);
    }

    #[test]
    fn test_guarded_function_is_low_confidence() {
        let findings = run(
            r#"
contract Guarded {
    uint256 total;
    function f() external nonReentrant {
        payable(msg.sender).transfer(1);
        total = 0;
    }
}
"#,
        );
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].confidence, Confidence::Low);
    }

    #[test]
    fn test_unresolved_modifier_downgrades_confidence() {
        let findings = run(
            r#"
contract Unknown {
    uint256 total;
    function f() external whenNotPaused {
        msg.sender.call("");
        total = 0;
    }
}
"#,
        );
        assert_eq!(findings[0].confidence, Confidence::Medium);
    }
}
