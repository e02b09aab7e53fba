//! Failing sequence minimization.

use crate::{
    calls::CallSequence,
    chain::{Evm, TestChain},
    executor::execute_call_sequence,
    providers::TestProvider,
    values::{abi, ShrinkingValueGenerator, ValueSet},
};
use alloy_dyn_abi::DynSolType;
use parking_lot::RwLock;
use rand::{rngs::StdRng, SeedableRng};
use std::{
    sync::Arc,
    time::{Duration, Instant},
};

/// Shrink attempts per argument per pass.
const ARGUMENT_ATTEMPTS: usize = 4;

/// Bounds on one shrinking run.
#[derive(Clone, Copy, Debug)]
pub struct ShrinkLimits {
    /// Maximum number of candidate replays.
    pub max_replays: u64,
    /// Wall-clock budget.
    pub budget: Duration,
    /// Seed for the shrinking generator, for deterministic runs.
    pub seed: u64,
}

/// Minimizes a failing call sequence while preserving the failure.
///
/// Greedy and deterministic given a seed: first try removing one call at a
/// time (earliest first), then shrink the arguments of the remaining calls
/// through the contractive generator, and repeat until a full pass makes no
/// progress. Every candidate is replayed against a fresh chain clone and
/// must fail the same test case. When the replay or wall-clock budget is
/// exhausted, the best candidate found so far is returned.
pub struct Shrinker<'a, E: Evm> {
    base_chain: &'a TestChain<E>,
    providers: &'a [TestProvider],
    limits: ShrinkLimits,
    generator: ShrinkingValueGenerator,
    replays: u64,
    deadline: Instant,
}

impl<'a, E: Evm> Shrinker<'a, E> {
    pub fn new(
        base_chain: &'a TestChain<E>,
        providers: &'a [TestProvider],
        value_set: Arc<RwLock<ValueSet>>,
        limits: ShrinkLimits,
    ) -> Self {
        let generator =
            ShrinkingValueGenerator::new(StdRng::seed_from_u64(limits.seed), value_set);
        Self {
            base_chain,
            providers,
            limits,
            generator,
            replays: 0,
            deadline: Instant::now() + limits.budget,
        }
    }

    /// Shrinks `sequence` while it keeps failing `case_id`.
    pub fn shrink(
        &mut self,
        mut sequence: CallSequence,
        case_id: &str,
    ) -> eyre::Result<CallSequence> {
        debug!(case = %case_id, calls = sequence.len(), "shrinking failing sequence");
        sequence.clear_results();

        loop {
            let mut progress = false;

            // Pass 1: element removal, earliest first.
            let mut index = 0;
            while index < sequence.len() {
                if self.exhausted() {
                    return Ok(sequence);
                }
                let mut candidate = sequence.clone();
                candidate.remove(index);
                if self.fails(&candidate, case_id)? {
                    sequence = candidate;
                    progress = true;
                    // The next element shifted into this index.
                } else {
                    index += 1;
                }
            }

            // Pass 2: argument shrinking on the remaining calls.
            for index in 0..sequence.len() {
                let argument_count = sequence[index]
                    .message
                    .data_abi
                    .as_ref()
                    .map_or(0, |data| data.args.len());
                for argument in 0..argument_count {
                    for _ in 0..ARGUMENT_ATTEMPTS {
                        if self.exhausted() {
                            return Ok(sequence);
                        }
                        let Some(candidate) =
                            self.shrink_argument(&sequence, index, argument)?
                        else {
                            continue;
                        };
                        if self.fails(&candidate, case_id)? {
                            sequence = candidate;
                            progress = true;
                        }
                    }
                }
            }

            if !progress {
                break;
            }
        }

        debug!(case = %case_id, calls = sequence.len(), replays = self.replays, "shrinking reached a fixed point");
        Ok(sequence)
    }

    /// Builds a candidate with one argument contracted, or `None` if the
    /// mutation was an identity.
    fn shrink_argument(
        &mut self,
        sequence: &CallSequence,
        index: usize,
        argument: usize,
    ) -> eyre::Result<Option<CallSequence>> {
        let mut candidate = sequence.clone();
        let Some(data) = candidate[index].message.data_abi.as_mut() else { return Ok(None) };
        let Some(method) = &data.method else { return Ok(None) };

        let ty: DynSolType = method.inputs[argument]
            .selector_type()
            .parse()
            .map_err(|_| eyre::eyre!("unparseable ABI type for {}", method.signature()))?;
        let old = data.args[argument].clone();
        let new = abi::shrink_abi_value(&mut self.generator, &ty, old.clone())?;
        if new == old {
            return Ok(None);
        }
        data.args[argument] = new;
        candidate[index].message.re_encode()?;
        Ok(Some(candidate))
    }

    /// Replays a candidate on a fresh chain clone and reports whether the
    /// target case still fails.
    fn fails(&mut self, candidate: &CallSequence, case_id: &str) -> eyre::Result<bool> {
        self.replays += 1;
        let mut chain = self.base_chain.clone_for_worker();
        let executed =
            execute_call_sequence(&mut chain, self.providers, candidate.clone(), None)?;
        Ok(executed.fails_case(case_id))
    }

    fn exhausted(&self) -> bool {
        self.replays >= self.limits.max_replays || Instant::now() >= self.deadline
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        calls::{BlockDelta, CallMessage, CallSequence, CallSequenceElement},
        chain::scripted::{Behavior, ScriptedContract, ScriptedEvm, ScriptedMethod},
        chain::{Evm as _, TestChain},
        providers::{AssertionTestProvider, PropertyTestProvider, TestProvider},
    };
    use alloy_dyn_abi::DynSolValue;
    use alloy_json_abi::{Function, JsonAbi};
    use alloy_primitives::{address, Address, U256};
    use cinder_config::ChainConfig;

    const SENDER: Address = address!("0000000000000000000000000000000000010000");

    fn limits() -> ShrinkLimits {
        ShrinkLimits { max_replays: 2_000, budget: Duration::from_secs(60), seed: 7 }
    }

    fn abi() -> JsonAbi {
        serde_json::from_str(
            r#"[
                {"type":"function","name":"setX","inputs":[{"name":"x","type":"uint256"}],"outputs":[],"stateMutability":"nonpayable"},
                {"type":"function","name":"trigger","inputs":[{"name":"x","type":"uint256"}],"outputs":[],"stateMutability":"nonpayable"},
                {"type":"function","name":"property_x_not_42","inputs":[],"outputs":[{"name":"","type":"bool"}],"stateMutability":"view"}
            ]"#,
        )
        .unwrap()
    }

    fn setup() -> (TestChain<ScriptedEvm>, Address, Vec<TestProvider>) {
        let mut evm = ScriptedEvm::new();
        let script = ScriptedContract {
            name: "Counter".into(),
            methods: vec![
                ScriptedMethod::new("setX(uint256)", Behavior::StoreArg { slot: U256::ZERO }),
                ScriptedMethod::new(
                    "trigger(uint256)",
                    Behavior::AssertArgBelow { bound: U256::from(10) },
                ),
                ScriptedMethod::new(
                    "property_x_not_42()",
                    Behavior::ReturnNotEq { slot: U256::ZERO, value: U256::from(42) },
                ),
            ],
        };
        let deploy = CallMessage::deployment(SENDER, 1_000_000, script.bytecode());
        let mut tracer = crate::coverage::CoverageTracer::new();
        let block = crate::chain::BlockEnv {
            number: 1,
            timestamp: 1,
            gas_limit: 30_000_000,
            base_fee: U256::ZERO,
        };
        let contract =
            evm.execute(&block, &deploy, &mut tracer).unwrap().deployed_address.unwrap();
        let chain =
            TestChain::new(evm, &ChainConfig::default(), 30_000_000, 1_000_000, &[SENDER]);

        let contracts = vec![crate::artifacts::DeployedContract {
            name: "Counter".into(),
            address: contract,
            abi: abi(),
        }];
        let mut property =
            PropertyTestProvider::new(vec!["property_".into()], SENDER, 1_000_000);
        property.register_contracts(&contracts);
        let mut assertion = AssertionTestProvider::new(false);
        assertion.register_contracts(&contracts);

        (chain, contract, vec![
            TestProvider::Property(property),
            TestProvider::Assertion(assertion),
        ])
    }

    fn call(contract: Address, signature: &str, value: u64) -> CallSequenceElement {
        let method = Function::parse(signature).unwrap();
        let message = CallMessage::from_abi_call(
            SENDER,
            contract,
            1_000_000,
            &method,
            vec![DynSolValue::Uint(U256::from(value), 256)],
        )
        .unwrap();
        CallSequenceElement::new(message, BlockDelta::minimal())
    }

    fn value_set() -> Arc<RwLock<ValueSet>> {
        Arc::new(RwLock::new(ValueSet::new()))
    }

    #[test]
    fn property_failure_shrinks_to_the_witness_call() {
        let (chain, contract, providers) = setup();
        let case_id = "property/Counter.property_x_not_42()";
        let sequence = CallSequence(vec![
            call(contract, "setX(uint256)", 7),
            call(contract, "setX(uint256)", 42),
            call(contract, "setX(uint256)", 42),
            call(contract, "trigger(uint256)", 1),
        ]);

        let mut shrinker = Shrinker::new(&chain, &providers, value_set(), limits());
        let shrunk = shrinker.shrink(sequence.clone(), case_id).unwrap();

        assert!(shrunk.len() <= sequence.len());
        assert_eq!(shrunk.len(), 1, "minimal witness is a single setX(42)");
        let args = &shrunk[0].message.data_abi.as_ref().unwrap().args;
        assert_eq!(args[0], DynSolValue::Uint(U256::from(42), 256));

        // The shrunk sequence still fails the same case.
        let mut replay = chain.clone_for_worker();
        let executed =
            execute_call_sequence(&mut replay, &providers, shrunk, None).unwrap();
        assert!(executed.fails_case(case_id));
    }

    #[test]
    fn assertion_failure_keeps_argument_at_or_above_bound() {
        let (chain, contract, providers) = setup();
        let case_id = "assertion/Counter.trigger(uint256)";
        let sequence = CallSequence(vec![
            call(contract, "setX(uint256)", 5),
            call(contract, "trigger(uint256)", 500_000),
        ]);

        let mut shrinker = Shrinker::new(&chain, &providers, value_set(), limits());
        let shrunk = shrinker.shrink(sequence, case_id).unwrap();

        assert_eq!(shrunk.len(), 1);
        let args = &shrunk[0].message.data_abi.as_ref().unwrap().args;
        let DynSolValue::Uint(value, _) = &args[0] else { panic!("expected uint argument") };
        assert!(*value >= U256::from(10), "shrunk below the assertion bound: {value}");
        assert!(*value < U256::from(500_000), "argument was not shrunk: {value}");
    }

    #[test]
    fn shrinking_is_deterministic_per_seed() {
        let (chain, contract, providers) = setup();
        let case_id = "assertion/Counter.trigger(uint256)";
        let sequence = CallSequence(vec![call(contract, "trigger(uint256)", 123_456)]);

        let shrink = |seed: u64| {
            let limits = ShrinkLimits { seed, ..limits() };
            let mut shrinker = Shrinker::new(&chain, &providers, value_set(), limits);
            shrinker.shrink(sequence.clone(), case_id).unwrap()
        };
        assert_eq!(shrink(3), shrink(3));
    }

    #[test]
    fn budget_exhaustion_returns_best_so_far() {
        let (chain, contract, providers) = setup();
        let case_id = "property/Counter.property_x_not_42()";
        let sequence = CallSequence(vec![
            call(contract, "setX(uint256)", 42),
            call(contract, "setX(uint256)", 42),
        ]);

        let limits = ShrinkLimits { max_replays: 1, budget: Duration::from_secs(60), seed: 1 };
        let mut shrinker = Shrinker::new(&chain, &providers, value_set(), limits);
        let shrunk = shrinker.shrink(sequence.clone(), case_id).unwrap();
        assert!(shrunk.len() <= sequence.len());
    }
}
