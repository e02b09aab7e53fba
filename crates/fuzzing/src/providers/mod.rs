//! Test case providers.
//!
//! Providers are the pluggable predicates deciding whether a call sequence
//! violated a test: property methods that must return `true`, and
//! opcode-level assertion failures. The set is a small closed enum with a
//! uniform capability; dispatch happens once per call, never per opcode.

use crate::{
    artifacts::DeployedContract,
    calls::{CallSequence, CallSequenceElement},
    chain::{ChainError, Evm, TestChain},
};

mod assertion;
pub use assertion::AssertionTestProvider;

mod property;
pub use property::PropertyTestProvider;

/// The lifecycle status of a test case. Identity is stable for the lifetime
/// of a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TestCaseStatus {
    NotStarted,
    Running,
    Passed,
    Failed,
}

/// Which provider kind owns a test case.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TestProviderKind {
    Property,
    Assertion,
}

/// One registered test with its current verdict.
#[derive(Clone, Debug)]
pub struct TestCase {
    /// Stable identifier, e.g. `property/Counter.property_x_not_42()`.
    pub id: String,
    pub provider: TestProviderKind,
    pub status: TestCaseStatus,
    /// Human-readable detail, populated on failure.
    pub message: String,
    /// The (shrunk) sequence reproducing a failure.
    pub call_sequence: Option<CallSequence>,
}

impl TestCase {
    fn new(id: String, provider: TestProviderKind) -> Self {
        Self {
            id,
            provider,
            status: TestCaseStatus::NotStarted,
            message: String::new(),
            call_sequence: None,
        }
    }
}

/// One provider verdict for one test case after one call.
#[derive(Clone, Debug)]
pub struct TestCaseResult {
    pub case_id: String,
    pub failed: bool,
    pub message: String,
}

/// The closed set of test case providers.
#[derive(Clone, Debug)]
pub enum TestProvider {
    Property(PropertyTestProvider),
    Assertion(AssertionTestProvider),
}

impl TestProvider {
    /// Registers the deployed contracts' methods with the provider and
    /// returns the test cases it will report on.
    pub fn register_contracts(&mut self, contracts: &[DeployedContract]) -> Vec<TestCase> {
        match self {
            Self::Property(provider) => provider.register_contracts(contracts),
            Self::Assertion(provider) => provider.register_contracts(contracts),
        }
    }

    /// Checks every registered test after a call executed. Property checks
    /// probe the chain read-only; assertion checks inspect the recorded
    /// execution result.
    pub fn check_after_call<E: Evm>(
        &self,
        chain: &mut TestChain<E>,
        element: &CallSequenceElement,
    ) -> Result<Vec<TestCaseResult>, ChainError> {
        match self {
            Self::Property(provider) => provider.check_after_call(chain),
            Self::Assertion(provider) => Ok(provider.check_after_call(element)),
        }
    }
}
