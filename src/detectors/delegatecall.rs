use crate::detectors::{Confidence, Detector, Finding, PatternId, Reference, Severity};
use crate::parser::{CallKind, CallTarget, Contract, Function};

/// Flags every delegated-context execution (`delegatecall`, `callcode`).
pub struct DelegatecallDetector;

impl DelegatecallDetector {
    pub fn new() -> Self {
        Self
    }

    fn confidence(function: &Function, target: &CallTarget) -> Confidence {
        match target {
            CallTarget::Named(name) => {
                let root = name.split(&['.', '['][..]).next().unwrap_or(name);
                if function.parameters.iter().any(|p| p.name == root) {
                    Confidence::High
                } else {
                    Confidence::Medium
                }
            }
            CallTarget::MsgSender => Confidence::High,
            CallTarget::Unknown => Confidence::Low,
        }
    }
}

impl Default for DelegatecallDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl Detector for DelegatecallDetector {
    fn pattern(&self) -> PatternId {
        PatternId::DelegatecallUsage
    }

    fn description(&self) -> &'static str {
        "Delegated execution of foreign code in this contract's storage context"
    }

    fn default_severity(&self) -> Severity {
        Severity::High
    }

    fn check_function(&self, contract: &Contract, function: &Function) -> Vec<Finding> {
        function
            .calls
            .iter()
            .filter(|call| call.kind == CallKind::Delegate)
            .map(|call| {
                let confidence = Self::confidence(function, &call.target);
                let caller_supplied = confidence == Confidence::High;
                Finding::new(
                    self.pattern(),
                    self.default_severity(),
                    confidence,
                    format!("Delegatecall in {}", function.name),
                    format!(
                        "`{}` delegates execution to {} at line {}. The callee runs with `{}`'s storage, \
                         balance and msg.sender, so it can overwrite any state variable or re-enter freely.{}",
                        function.name,
                        call.target,
                        call.line,
                        contract.name,
                        if caller_supplied {
                            " The target is supplied by the caller."
                        } else {
                            ""
                        }
                    ),
                    contract,
                    function,
                    call.line,
                    "Only delegate to trusted, immutable implementation addresses; never to caller-supplied \
                     targets. Restrict who can trigger the delegatecall and keep storage layouts aligned.",
                )
                .with_cwe(vec![829])
                .with_references(vec![Reference::new(
                    "SWC-112: Delegatecall to Untrusted Callee",
                    "https://swcregistry.io/docs/SWC-112",
                )])
            })
            .collect()
    }
}
