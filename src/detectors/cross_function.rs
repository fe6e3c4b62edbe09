use crate::detectors::{swc_107, Confidence, Detector, Finding, PatternId, Severity};
use crate::parser::{AccessKind, Contract, Function};

/// Flags pairs of externally invocable functions sharing a state variable
/// when at least one of them makes an external call.
pub struct CrossFunctionDetector;

impl CrossFunctionDetector {
    pub fn new() -> Self {
        Self
    }

    fn confidence(caller: &Function, other: &Function, variable: &str) -> Confidence {
        if caller.has_mutex_guard() && other.has_mutex_guard() {
            return Confidence::Low;
        }
        let writes_after_call = caller.first_call().is_some_and(|call| {
            caller
                .accesses(variable)
                .any(|a| a.kind == AccessKind::Write && a.stmt > call.stmt)
        });
        if writes_after_call {
            Confidence::High
        } else {
            Confidence::Medium
        }
    }
}

impl Default for CrossFunctionDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl Detector for CrossFunctionDetector {
    fn pattern(&self) -> PatternId {
        PatternId::CrossFunctionReentrancy
    }

    fn description(&self) -> &'static str {
        "State variable shared by externally callable functions where one of them calls out"
    }

    fn default_severity(&self) -> Severity {
        Severity::Medium
    }

    fn check_contract(&self, contract: &Contract) -> Vec<Finding> {
        let candidates: Vec<&Function> = contract
            .functions
            .iter()
            .filter(|f| f.is_externally_invocable())
            .collect();

        let mut findings = Vec::new();
        for variable in &contract.state_variables {
            let touching: Vec<(&Function, usize)> = candidates
                .iter()
                .filter_map(|f| f.first_access_line(&variable.name).map(|line| (*f, line)))
                .collect();

            for (i, &(a, a_line)) in touching.iter().enumerate() {
                for &(b, b_line) in &touching[i + 1..] {
                    let ((caller, caller_line), (other, other_line)) = if a.has_external_calls() {
                        ((a, a_line), (b, b_line))
                    } else if b.has_external_calls() {
                        ((b, b_line), (a, a_line))
                    } else {
                        continue;
                    };

                    let call_line = caller.first_call().map(|c| c.line).unwrap_or(caller_line);
                    findings.push(
                        Finding::new(
                            self.pattern(),
                            self.default_severity(),
                            Self::confidence(caller, other, &variable.name),
                            format!(
                                "Cross-function reentrancy via {} ({} / {})",
                                variable.name, caller.name, other.name
                            ),
                            format!(
                                "`{}` makes an external call (line {}) and accesses state variable `{}`, which `{}` \
                                 also accesses (line {}). A callee can re-enter `{}` while `{}` is mid-execution and \
                                 observe or modify `{}` before its effects are finalized. A guard on only one of the \
                                 two functions does not protect the pair.",
                                caller.name,
                                call_line,
                                variable.name,
                                other.name,
                                other_line,
                                other.name,
                                caller.name,
                                variable.name
                            ),
                            contract,
                            caller,
                            caller_line,
                            "Finalize state before external calls and apply a shared reentrancy guard to every \
                             externally callable function that touches the same state.",
                        )
                        .with_supporting_lines(vec![other_line])
                        .with_variable(variable.name.clone())
                        .with_related_function(other.name.clone())
                        .with_cwe(vec![841])
                        .with_references(vec![swc_107()]),
                    );
                }
            }
        }
        findings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detectors::test_support::contract;

    fn run(source: &str) -> Vec<Finding> {
        CrossFunctionDetector::new().check_contract(&contract(source))
    }

    #[test]
    fn test_shared_variable_pair_is_flagged_once() {
        let findings = run(
            r#"
contract Bank {
    mapping(address => uint256) balances;
    uint256 fees;
    function deposit() external payable {
        balances[msg.sender] += msg.value;
    }
    function withdraw(uint256 amount) external {
        msg.sender.call{value: amount}("");
        balances[msg.sender] -= amount;
    }
    function setFees(uint256 f) external {
        fees = f;
    }
}
"#,
        );
        assert_eq!(findings.len(), 1);
        let finding = &findings[0];
        assert_eq!(finding.function, "withdraw");
        assert_eq!(finding.related_function.as_deref(), Some("deposit"));
        assert_eq!(finding.variable.as_deref(), Some("balances"));
        assert_eq!(finding.line, 10);
        assert_eq!(finding.supporting_lines, vec![6]);
        assert_eq!(finding.confidence, Confidence::High);
    }

    #[test]
    fn test_pairs_without_calls_are_ignored() {
        let findings = run(
            r#"
contract Counter {
    uint256 count;
    function inc() external { count += 1; }
    function get() external view returns (uint256) { return count; }
    function helper() internal { msg.sender.call(""); count = 0; }
}
"#,
        );
        assert!(findings.is_empty());
    }

    #[test]
    fn test_guarded_pair_is_low_confidence() {
        let findings = run(
            r#"
contract Guarded {
    uint256 total;
    function a() external nonReentrant {
        total = 1;
        msg.sender.call("");
    }
    function b() external nonReentrant {
        total = 2;
    }
}
"#,
        );
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].confidence, Confidence::Low);
    }
}
