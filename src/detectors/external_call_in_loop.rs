use crate::detectors::{Confidence, Detector, Finding, PatternId, Reference, Severity};
use crate::parser::{CallKind, CallSite, Contract, Function, StmtId};

/// Flags loops whose body performs an external call, once per loop.
pub struct ExternalCallInLoopDetector;

impl ExternalCallInLoopDetector {
    pub fn new() -> Self {
        Self
    }

    fn confidence(calls: &[&CallSite]) -> Confidence {
        let certain = calls
            .iter()
            .any(|c| c.forwards_value || !matches!(c.kind, CallKind::Interface));
        if certain {
            Confidence::High
        } else {
            Confidence::Medium
        }
    }
}

impl Default for ExternalCallInLoopDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl Detector for ExternalCallInLoopDetector {
    fn pattern(&self) -> PatternId {
        PatternId::ExternalCallInLoop
    }

    fn description(&self) -> &'static str {
        "External call issued inside a loop body"
    }

    fn default_severity(&self) -> Severity {
        Severity::High
    }

    fn check_function(&self, contract: &Contract, function: &Function) -> Vec<Finding> {
        // Calls grouped by nearest enclosing loop header, headers in source order.
        let mut loops: Vec<(StmtId, Vec<&CallSite>)> = Vec::new();
        for call in &function.calls {
            let Some(header) = call.enclosing_loop else {
                continue;
            };
            match loops.iter_mut().find(|(h, _)| *h == header) {
                Some((_, calls)) => calls.push(call),
                None => loops.push((header, vec![call])),
            }
        }
        loops.sort_by_key(|(header, _)| *header);

        loops
            .into_iter()
            .filter_map(|(header, calls)| {
                let first = calls.iter().min_by_key(|c| (c.line, c.stmt))?;
                let header_line = function.statement(header).map(|s| s.line).unwrap_or(first.line);
                let body_end = function
                    .loop_range(header)
                    .map(|range| range.end_line)
                    .unwrap_or(first.line);

                Some(
                    Finding::new(
                        self.pattern(),
                        self.default_severity(),
                        Self::confidence(&calls),
                        format!("External call inside loop in {}", function.name),
                        format!(
                            "The loop starting at line {} (ending at line {}) performs {} external call(s), first to {} at line {}. \
                             Each iteration hands control to foreign code, multiplying re-entry points, \
                             and a single failing or gas-hungry callee can block the whole loop.",
                            header_line,
                            body_end,
                            calls.len(),
                            first.target,
                            first.line
                        ),
                        contract,
                        function,
                        first.line,
                        "Prefer pull-over-push: record amounts owed and let recipients withdraw individually, \
                         or bound the iteration count and guard the function against re-entry.",
                    )
                    .with_supporting_lines(vec![header_line])
                    .with_cwe(vec![703])
                    .with_references(vec![Reference::new(
                        "SWC-113: DoS with Failed Call",
                        "https://swcregistry.io/docs/SWC-113",
                    )]),
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detectors::test_support::contract;

    fn run(source: &str) -> Vec<Finding> {
        let contract = contract(source);
        let detector = ExternalCallInLoopDetector::new();
        contract
            .functions
            .iter()
            .flat_map(|f| detector.check_function(&contract, f))
            .collect()
    }

    #[test]
    fn test_one_finding_per_loop() {
        let findings = run(
            r#"
contract Payout {
    function pay(address[] calldata to) external {
        for (uint i = 0; i < to.length; i++) {
            payable(to[i]).transfer(1);
            payable(to[i]).send(1);
        }
    }
}
"#,
        );
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::High);
        assert_eq!(findings[0].line, 5);
        assert_eq!(findings[0].supporting_lines, vec![4]);
        assert_eq!(findings[0].confidence, Confidence::High);
    }

    #[test]
    fn test_braceless_body_on_next_line_cites_its_own_line() {
        let findings = run(
            r#"
contract Payout {
    function pay(address[] memory to) external {
        for (uint i = 0; i < to.length; i++)
            payable(to[i]).transfer(1);
    }
}
"#,
        );
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].line, 5);
        assert_eq!(findings[0].supporting_lines, vec![4]);
    }

    #[test]
    fn test_separate_loops_are_reported_separately() {
        let findings = run(
            r#"
contract Payout {
    IERC20 token;
    function pay(address[] calldata to) external {
        for (uint i = 0; i < to.length; i++) {
            token.approve(to[i], 1);
        }
        uint j = 0;
        while (j < to.length) {
            to[j].call("");
            j++;
        }
    }
}
"#,
        );
        assert_eq!(findings.len(), 2);
        assert_eq!(findings[0].supporting_lines, vec![5]);
        assert_eq!(findings[0].confidence, Confidence::Medium);
        assert_eq!(findings[1].supporting_lines, vec![9]);
    }

    #[test]
    fn test_call_outside_loop_is_ignored() {
        let findings = run(
            r#"
contract Single {
    function pay(address[] calldata to) external {
        uint total;
        for (uint i = 0; i < to.length; i++) {
            total += i;
        }
        msg.sender.call("");
    }
}
"#,
        );
        assert!(findings.is_empty());
    }
}
