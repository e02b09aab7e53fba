//! Property test provider.

use super::{TestCase, TestCaseResult, TestProviderKind};
use crate::{
    artifacts::DeployedContract,
    calls::CallMessage,
    chain::{ChainError, Evm, TestChain},
};
use alloy_json_abi::Function;
use alloy_primitives::Address;

/// Detects violations of property test methods.
///
/// A property test is a contract method whose name begins with one of the
/// configured prefixes and whose signature is `() -> (bool)`. After every
/// call it is invoked read-only (side effects discarded); returning `false`
/// or reverting signals a failure.
#[derive(Clone, Debug)]
pub struct PropertyTestProvider {
    test_prefixes: Vec<String>,
    /// Account used to send the read-only probe calls.
    sender: Address,
    gas: u64,
    targets: Vec<PropertyTarget>,
}

#[derive(Clone, Debug)]
struct PropertyTarget {
    case_id: String,
    address: Address,
    method: Function,
}

impl PropertyTestProvider {
    pub fn new(test_prefixes: Vec<String>, sender: Address, gas: u64) -> Self {
        Self { test_prefixes, sender, gas, targets: Vec::new() }
    }

    /// Whether a method is a property test: prefixed name, no inputs, a
    /// single `bool` output.
    pub fn is_property_method(&self, method: &Function) -> bool {
        self.test_prefixes.iter().any(|prefix| method.name.starts_with(prefix.as_str()))
            && method.inputs.is_empty()
            && method.outputs.len() == 1
            && method.outputs[0].ty == "bool"
    }

    pub(crate) fn register_contracts(&mut self, contracts: &[DeployedContract]) -> Vec<TestCase> {
        let mut cases = Vec::new();
        for contract in contracts {
            for method in contract.abi.functions() {
                if !self.is_property_method(method) {
                    continue;
                }
                let case_id = format!("property/{}.{}", contract.name, method.signature());
                debug!(case = %case_id, "registered property test");
                self.targets.push(PropertyTarget {
                    case_id: case_id.clone(),
                    address: contract.address,
                    method: method.clone(),
                });
                cases.push(TestCase::new(case_id, TestProviderKind::Property));
            }
        }
        cases
    }

    pub(super) fn check_after_call<E: Evm>(
        &self,
        chain: &mut TestChain<E>,
    ) -> Result<Vec<TestCaseResult>, ChainError> {
        let mut results = Vec::with_capacity(self.targets.len());
        for target in &self.targets {
            let message = CallMessage::from_abi_call(
                self.sender,
                target.address,
                self.gas,
                &target.method,
                Vec::new(),
            )
            .map_err(|err| ChainError::Engine(err.to_string()))?;
            let result = chain.call_readonly(&message)?;

            let (failed, message) = if result.reverted() {
                (true, format!("property test reverted: {}", target.method.name))
            } else if !decodes_to_true(&result.return_data) {
                (true, format!("property test returned false: {}", target.method.name))
            } else {
                (false, String::new())
            };
            results.push(TestCaseResult { case_id: target.case_id.clone(), failed, message });
        }
        Ok(results)
    }
}

/// Decodes a `bool` return word; anything but a well-formed non-zero word is
/// `false`.
fn decodes_to_true(return_data: &[u8]) -> bool {
    return_data.len() == 32 && return_data.iter().any(|b| *b != 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::scripted::{Behavior, ScriptedContract, ScriptedEvm, ScriptedMethod};
    use crate::chain::{Evm as _, TestChain};
    use alloy_json_abi::JsonAbi;
    use alloy_primitives::{address, U256};
    use cinder_config::ChainConfig;

    const SENDER: Address = address!("0000000000000000000000000000000000010000");

    fn provider() -> PropertyTestProvider {
        PropertyTestProvider::new(vec!["property_".into()], SENDER, 1_000_000)
    }

    fn abi_with(signatures: &[(&str, &str)]) -> JsonAbi {
        // (name, outputs) pairs of nullary functions.
        let entries: Vec<String> = signatures
            .iter()
            .map(|(name, output)| {
                let outputs = if output.is_empty() {
                    String::new()
                } else {
                    format!(r#"{{"name":"","type":"{output}"}}"#)
                };
                format!(
                    r#"{{"type":"function","name":"{name}","inputs":[],"outputs":[{outputs}],"stateMutability":"view"}}"#
                )
            })
            .collect();
        serde_json::from_str(&format!("[{}]", entries.join(","))).unwrap()
    }

    #[test]
    fn registers_only_prefixed_nullary_bool_methods() {
        let mut provider = provider();
        let abi = abi_with(&[
            ("property_good", "bool"),
            ("property_wrong_output", "uint256"),
            ("unprefixed", "bool"),
        ]);
        let contracts = vec![DeployedContract {
            name: "T".into(),
            address: Address::repeat_byte(1),
            abi,
        }];
        let cases = provider.register_contracts(&contracts);
        assert_eq!(cases.len(), 1);
        assert_eq!(cases[0].id, "property/T.property_good()");
        assert_eq!(cases[0].status, super::super::TestCaseStatus::NotStarted);
    }

    #[test]
    fn failing_property_detected_without_side_effects() {
        let mut evm = ScriptedEvm::new();
        let script = ScriptedContract {
            name: "T".into(),
            methods: vec![
                ScriptedMethod::new("property_ok()", Behavior::ReturnBool { value: true }),
                ScriptedMethod::new("property_bad()", Behavior::ReturnBool { value: false }),
            ],
        };
        let deploy = CallMessage::deployment(SENDER, 1_000_000, script.bytecode());
        let mut tracer = crate::coverage::CoverageTracer::new();
        let deployed = evm
            .execute(
                &crate::chain::BlockEnv {
                    number: 1,
                    timestamp: 1,
                    gas_limit: 30_000_000,
                    base_fee: U256::ZERO,
                },
                &deploy,
                &mut tracer,
            )
            .unwrap()
            .deployed_address
            .unwrap();

        let mut chain =
            TestChain::new(evm, &ChainConfig::default(), 30_000_000, 1_000_000, &[SENDER]);
        let mut provider = provider();
        let abi = abi_with(&[("property_ok", "bool"), ("property_bad", "bool")]);
        provider.register_contracts(&[DeployedContract {
            name: "T".into(),
            address: deployed,
            abi,
        }]);

        let head_before = *chain.head();
        let results = provider.check_after_call(&mut chain).unwrap();
        assert_eq!(chain.head(), &head_before, "probes must not advance the chain");

        let ok = results.iter().find(|r| r.case_id.contains("property_ok")).unwrap();
        assert!(!ok.failed);
        let bad = results.iter().find(|r| r.case_id.contains("property_bad")).unwrap();
        assert!(bad.failed);
        assert!(bad.message.contains("returned false"));
    }
}
