//! Assertion test provider.

use super::{TestCase, TestCaseResult, TestProviderKind};
use crate::{artifacts::DeployedContract, calls::CallSequenceElement};
use alloy_json_abi::StateMutability;
use alloy_primitives::Address;
use std::collections::BTreeMap;

/// The canonical `Panic(uint256)` selector Solidity reverts with on internal
/// errors.
const PANIC_SELECTOR: [u8; 4] = [0x4e, 0x48, 0x7b, 0x71];

/// The `Panic` code raised by a failed `assert`.
const PANIC_ASSERTION_CODE: u8 = 0x01;

/// Detects contract-internal assertion failures.
///
/// A call fails its assertion test when it executed the `INVALID` opcode or
/// reverted with the canonical assertion panic. Each registered method gets
/// its own test case; view methods are covered only when configured.
#[derive(Clone, Debug)]
pub struct AssertionTestProvider {
    test_view_methods: bool,
    /// Registered methods: `(target, selector) -> case id`.
    targets: BTreeMap<(Address, [u8; 4]), String>,
}

impl AssertionTestProvider {
    pub fn new(test_view_methods: bool) -> Self {
        Self { test_view_methods, targets: BTreeMap::new() }
    }

    pub(crate) fn register_contracts(&mut self, contracts: &[DeployedContract]) -> Vec<TestCase> {
        let mut cases = Vec::new();
        for contract in contracts {
            for method in contract.abi.functions() {
                let view_like = matches!(
                    method.state_mutability,
                    StateMutability::Pure | StateMutability::View
                );
                if view_like && !self.test_view_methods {
                    continue;
                }
                let case_id = format!("assertion/{}.{}", contract.name, method.signature());
                debug!(case = %case_id, "registered assertion test");
                self.targets.insert((contract.address, method.selector().0), case_id.clone());
                cases.push(TestCase::new(case_id, TestProviderKind::Assertion));
            }
        }
        cases
    }

    pub(super) fn check_after_call(&self, element: &CallSequenceElement) -> Vec<TestCaseResult> {
        let Some(result) = &element.execution_result else { return Vec::new() };
        let Some(target) = element.message.to else { return Vec::new() };
        let Some(selector) = element.message.data.get(..4) else { return Vec::new() };
        let selector: [u8; 4] = selector.try_into().expect("4-byte slice");
        let Some(case_id) = self.targets.get(&(target, selector)) else { return Vec::new() };

        let (failed, message) = if result.invalid_opcode {
            (true, "assertion failure: INVALID opcode executed".to_string())
        } else if result.reverted() && is_assertion_panic(&result.return_data) {
            (true, "assertion failure: panic(0x01)".to_string())
        } else {
            (false, String::new())
        };
        vec![TestCaseResult { case_id: case_id.clone(), failed, message }]
    }
}

/// Whether revert data is the canonical `Panic(0x01)` assertion encoding.
fn is_assertion_panic(return_data: &[u8]) -> bool {
    return_data.len() >= 36
        && return_data[..4] == PANIC_SELECTOR
        && return_data[4..35].iter().all(|b| *b == 0)
        && return_data[35] == PANIC_ASSERTION_CODE
}
