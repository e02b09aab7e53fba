//! Call sequence execution.

use crate::{
    calls::CallSequence,
    chain::{ChainError, Evm, TestChain},
    coverage::CallCoverage,
    fuzzer::StopSignal,
    providers::TestProvider,
};

/// One failed test observed while executing a sequence.
#[derive(Clone, Debug)]
pub struct SequenceFailure {
    pub case_id: String,
    /// Index of the call after which the failure was observed.
    pub call_index: usize,
    pub message: String,
}

/// The outcome of executing one call sequence.
#[derive(Clone, Debug)]
pub struct ExecutedSequence {
    /// The sequence with per-element execution results populated.
    pub sequence: CallSequence,
    /// Coverage merged over all calls, split by frame outcome.
    pub coverage: CallCoverage,
    /// Every failed test observed, in call order.
    pub failures: Vec<SequenceFailure>,
    /// Number of calls actually executed (shorter than the sequence when a
    /// stop was requested mid-sequence).
    pub calls_executed: u64,
}

impl ExecutedSequence {
    /// Whether a specific test case failed during this execution.
    pub fn fails_case(&self, case_id: &str) -> bool {
        self.failures.iter().any(|f| f.case_id == case_id)
    }

    /// The shortest prefix of the sequence that reproduces the given case's
    /// failure, including the failing call.
    pub fn failing_prefix(&self, case_id: &str) -> Option<CallSequence> {
        let failure = self.failures.iter().find(|f| f.case_id == case_id)?;
        Some(CallSequence(self.sequence[..=failure.call_index].to_vec()))
    }
}

/// Executes a call sequence against the chain.
///
/// The whole sequence runs under one snapshot boundary; state is cumulative
/// between elements, so ordering matters. After every element the execution
/// result is captured, coverage is merged, and every provider is consulted.
/// Failures mark the sequence but do not stop it: the remaining elements
/// still execute, and the minimal failing prefix is recovered by the
/// shrinker afterwards. The chain is reverted to the snapshot before
/// returning.
pub fn execute_call_sequence<E: Evm>(
    chain: &mut TestChain<E>,
    providers: &[TestProvider],
    sequence: CallSequence,
    stop: Option<&StopSignal>,
) -> Result<ExecutedSequence, ChainError> {
    let snapshot = chain.snapshot();
    let result = execute_inner(chain, providers, sequence, stop);
    chain.revert_to(snapshot)?;
    result
}

fn execute_inner<E: Evm>(
    chain: &mut TestChain<E>,
    providers: &[TestProvider],
    mut sequence: CallSequence,
    stop: Option<&StopSignal>,
) -> Result<ExecutedSequence, ChainError> {
    let mut coverage = CallCoverage::default();
    let mut failures = Vec::new();
    let mut calls_executed = 0u64;

    for index in 0..sequence.len() {
        if stop.is_some_and(StopSignal::stopped) {
            break;
        }

        // Nonces are refreshed from chain state so corpus-loaded sequences
        // replay against the current chain; from identical start states this
        // is deterministic.
        let from = sequence[index].message.from;
        sequence[index].message.nonce = chain.nonce(&from);

        let executed = chain.send_call(&sequence[index].message, &sequence[index].delta)?;
        coverage.merge(&executed.coverage);
        sequence[index].execution_result = Some(executed.result);
        calls_executed += 1;

        for provider in providers {
            for check in provider.check_after_call(chain, &sequence[index])? {
                if check.failed {
                    trace!(case = %check.case_id, call = index, "test failed");
                    failures.push(SequenceFailure {
                        case_id: check.case_id,
                        call_index: index,
                        message: check.message,
                    });
                }
            }
        }
    }

    // Drop any calls skipped by a mid-sequence stop, so the reported
    // sequence corresponds exactly to the recorded coverage and results.
    sequence.truncate(calls_executed as usize);

    Ok(ExecutedSequence { sequence, coverage, failures, calls_executed })
}
