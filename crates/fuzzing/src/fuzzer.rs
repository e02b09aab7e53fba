//! The fuzzing coordinator.
//!
//! Owns campaign lifecycle and shared state: deploys the base chain, loads
//! and replays the corpus, registers test cases, spawns workers, merges
//! their reports, applies stop conditions, and launches shrinking for
//! failing sequences.

use crate::{
    artifacts::{CompilationArtifacts, DeployedContract},
    calls::{BlockDelta, CallMessage, CallSequence},
    chain::{ChainError, Evm, TestChain},
    corpus::{Corpus, CorpusEntry, CorpusState},
    coverage::CoverageMaps,
    executor::{execute_call_sequence, SequenceFailure},
    providers::{
        AssertionTestProvider, PropertyTestProvider, TestCase, TestCaseStatus, TestProvider,
    },
    random::{WeightedChoice, WeightedChooser},
    shrink::{ShrinkLimits, Shrinker},
    values::{GeneratorConfig, MutatingValueGenerator, ValueSet},
    worker::{FuzzerWorker, WorkerEvent},
};
use alloy_dyn_abi::JsonAbiExt;
use alloy_json_abi::{Function, JsonAbi};
use alloy_primitives::{Address, U256};
use cinder_config::{utils as config_utils, ProjectConfig};
use eyre::{bail, eyre, WrapErr};
use parking_lot::{Mutex, RwLock};
use rand::{rngs::StdRng, SeedableRng};
use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc, Arc,
    },
    time::{Duration, Instant},
};

/// A shared cancellation token. Workers observe it at each loop iteration
/// and before each call; the coordinator raises it on stop conditions.
#[derive(Clone, Debug, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Lifecycle state of the fuzzer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FuzzerState {
    Idle,
    Initialized,
    Running,
    Completed,
    Stopped,
    Errored,
}

/// Why the campaign left the `Running` state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum StopReason {
    TestLimit,
    Timeout,
    FailedTest,
    Cancelled,
}

/// Aggregate campaign counters.
#[derive(Clone, Debug, Default)]
pub struct FuzzerMetrics {
    /// Total calls executed across all workers.
    pub calls_tested: u64,
    /// Call sequences executed.
    pub sequences_tested: u64,
    /// Sequences admitted to the corpus.
    pub sequences_admitted: u64,
    /// Corpus mutation-shard size at campaign end.
    pub corpus_entries: usize,
    /// Test cases that transitioned to `Failed`.
    pub failed_tests: usize,
}

/// Final outcome of a campaign.
#[derive(Clone, Debug)]
pub struct FuzzingResults {
    /// Terminal state: `Completed`, `Stopped` or `Errored`.
    pub state: FuzzerState,
    pub test_cases: Vec<TestCase>,
    pub metrics: FuzzerMetrics,
}

impl FuzzingResults {
    /// Whether any test case failed.
    pub fn any_failed(&self) -> bool {
        self.test_cases.iter().any(|case| case.status == TestCaseStatus::Failed)
    }

    /// The process exit code for this outcome.
    pub fn exit_code(&self) -> i32 {
        if self.state == FuzzerState::Errored {
            2
        } else if self.any_failed() {
            1
        } else {
            0
        }
    }
}

/// The fuzzing coordinator.
pub struct Fuzzer<E: Evm> {
    config: ProjectConfig,
    artifacts: CompilationArtifacts,
    state: FuzzerState,
    master_seed: u64,
    deployer: Address,
    senders: Vec<Address>,
    base_chain: Option<TestChain<E>>,
    deployed: Vec<DeployedContract>,
    abis_by_address: BTreeMap<Address, JsonAbi>,
    /// Callable `(contract, method)` pairs workers fuzz over.
    methods: Arc<Vec<(Address, Function)>>,
    providers: Vec<TestProvider>,
    test_cases: BTreeMap<String, TestCase>,
    corpus: Arc<Mutex<CorpusState>>,
    value_set: Arc<RwLock<ValueSet>>,
    stop: StopSignal,
    metrics: FuzzerMetrics,
}

impl<E: Evm> Fuzzer<E> {
    /// Creates a fuzzer over validated configuration and loaded artifacts.
    pub fn new(config: ProjectConfig, artifacts: CompilationArtifacts) -> eyre::Result<Self> {
        config.validate()?;
        let deployer = config_utils::parse_address(&config.fuzzing.deployer_address)
            .map_err(|e| eyre!("deployer address: {e}"))?;
        let senders = config_utils::parse_addresses(&config.fuzzing.sender_addresses)
            .map_err(|e| eyre!("sender addresses: {e}"))?;

        let master_seed = config.fuzzing.seed.unwrap_or_else(rand::random);
        info!(seed = master_seed, "fuzzer created");

        Ok(Self {
            config,
            artifacts,
            state: FuzzerState::Idle,
            master_seed,
            deployer,
            senders,
            base_chain: None,
            deployed: Vec::new(),
            abis_by_address: BTreeMap::new(),
            methods: Arc::new(Vec::new()),
            providers: Vec::new(),
            test_cases: BTreeMap::new(),
            corpus: Arc::new(Mutex::new(CorpusState::new(Corpus::default(), CoverageMaps::new()))),
            value_set: Arc::new(RwLock::new(ValueSet::new())),
            stop: StopSignal::new(),
            metrics: FuzzerMetrics::default(),
        })
    }

    pub fn state(&self) -> FuzzerState {
        self.state
    }

    /// A handle that cancels the campaign when raised.
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// The registered test cases, keyed by stable id.
    pub fn test_cases(&self) -> impl Iterator<Item = &TestCase> {
        self.test_cases.values()
    }

    /// Prepares the campaign: deploys the base chain, captures the
    /// deployment coverage baseline, loads and replays the corpus, and
    /// registers test cases. Failures here are fatal.
    pub fn initialize(&mut self, evm: E) -> eyre::Result<()> {
        if self.state != FuzzerState::Idle {
            bail!("fuzzer already initialized (state: {:?})", self.state);
        }
        let fuzzing = self.config.fuzzing.clone();

        let mut accounts = self.senders.clone();
        if !accounts.contains(&self.deployer) {
            accounts.push(self.deployer);
        }
        let mut chain = TestChain::new(
            evm,
            &fuzzing.chain_config,
            fuzzing.block_gas_limit,
            fuzzing.transaction_gas_limit,
            &accounts,
        );

        // Deploy in the configured order; an empty order deploys every
        // artifact in load order.
        let order: Vec<String> = if fuzzing.deployment_order.is_empty() {
            self.artifacts.contracts.iter().map(|c| c.name.clone()).collect()
        } else {
            fuzzing.deployment_order.clone()
        };

        let mut deployment_coverage = CoverageMaps::new();
        let mut deployed_addresses = BTreeMap::new();
        for name in &order {
            let artifact = self
                .artifacts
                .get(name)
                .ok_or_else(|| eyre!("deployment order references unknown contract {name}"))?;

            let mut data = artifact.bytecode.to_vec();
            if let Some(arg_values) = fuzzing.constructor_args.get(name) {
                let constructor = artifact
                    .abi
                    .constructor
                    .as_ref()
                    .ok_or_else(|| eyre!("constructor arguments supplied for {name}, which has no constructor"))?;
                let args = crate::values::abi::decode_json_arguments_map(
                    &constructor.inputs,
                    arg_values,
                    Some(&deployed_addresses),
                )
                .wrap_err_with(|| format!("constructor arguments for {name}"))?;
                data.extend(constructor.abi_encode_input(&args)?);
            }

            let mut message =
                CallMessage::deployment(self.deployer, fuzzing.transaction_gas_limit, data.into());
            message.nonce = chain.nonce(&self.deployer);
            let executed = chain.send_call(&message, &BlockDelta::minimal())?;
            if !executed.result.succeeded() {
                return Err(ChainError::DeploymentFailed {
                    name: name.clone(),
                    reason: format!("{:?}", executed.result.status),
                }
                .into());
            }
            let address = executed.result.deployed_address.ok_or_else(|| {
                ChainError::DeploymentFailed {
                    name: name.clone(),
                    reason: "engine reported no deployed address".into(),
                }
            })?;
            deployment_coverage.merge(&executed.coverage.executed);

            info!(contract = %name, %address, "deployed contract");
            deployed_addresses.insert(name.clone(), address);
            self.abis_by_address.insert(address, artifact.abi.clone());
            self.deployed.push(DeployedContract {
                name: name.clone(),
                address,
                abi: artifact.abi.clone(),
            });
        }

        // Seed the value pool from artifacts and every known address.
        {
            let mut values = self.value_set.write();
            self.artifacts.seed_value_set(&mut values);
            values.add_address(self.deployer);
            for sender in &self.senders {
                values.add_address(*sender);
            }
            for contract in &self.deployed {
                values.add_address(contract.address);
            }
        }

        // Register test case providers.
        let mut providers = Vec::new();
        if fuzzing.testing.property_testing.enabled {
            providers.push(TestProvider::Property(PropertyTestProvider::new(
                fuzzing.testing.property_testing.test_prefixes.clone(),
                self.deployer,
                fuzzing.transaction_gas_limit,
            )));
        }
        if fuzzing.testing.assertion_testing.enabled {
            providers.push(TestProvider::Assertion(AssertionTestProvider::new(
                fuzzing.testing.assertion_testing.test_view_methods,
            )));
        }
        for provider in &mut providers {
            for case in provider.register_contracts(&self.deployed) {
                self.test_cases.insert(case.id.clone(), case);
            }
        }
        self.providers = providers;

        // Collect the callable method universe, excluding property test
        // methods (they are observation points, not inputs).
        let property_prefixes: &[String] = if fuzzing.testing.property_testing.enabled {
            &fuzzing.testing.property_testing.test_prefixes
        } else {
            &[]
        };
        let mut methods = Vec::new();
        for contract in &self.deployed {
            for method in contract.abi.functions() {
                if is_property_method(property_prefixes, method) {
                    continue;
                }
                methods.push((contract.address, method.clone()));
            }
        }
        if methods.is_empty() {
            bail!("no callable contract methods to fuzz");
        }
        self.methods = Arc::new(methods);

        // Build the corpus; load and replay any persisted sequences to
        // reconstitute the coverage baseline.
        let mut corpus = Corpus::new(fuzzing.corpus_directory.clone())?;
        let mut baseline = deployment_coverage;
        if let Some(directory) = &fuzzing.corpus_directory {
            for mutation_shard in [true, false] {
                for mut sequence in Corpus::load_shard(directory, mutation_shard)? {
                    if let Err(err) = sequence.resolve(&self.abis_by_address) {
                        warn!(%err, "dropping corpus entry that no longer matches the ABI");
                        continue;
                    }
                    let mut replay_chain = chain.clone_for_worker();
                    let executed = match execute_call_sequence(
                        &mut replay_chain,
                        &self.providers,
                        sequence,
                        None,
                    ) {
                        Ok(executed) => executed,
                        Err(err) => {
                            warn!(%err, "dropping corpus entry that fails to replay");
                            continue;
                        }
                    };
                    let coverage = executed.coverage.executed.clone();
                    let new_bits = coverage.new_bits_against(&baseline) as u64;
                    baseline.merge(&coverage);
                    let mut sequence = executed.sequence;
                    sequence.clear_results();
                    let entry =
                        CorpusEntry { sequence, coverage, weight: new_bits.max(1) };
                    if mutation_shard {
                        corpus.add_mutation_entry(entry)?;
                    } else {
                        corpus.add_call_entry(entry)?;
                    }
                }
            }
            info!(
                mutation = corpus.mutation_len(),
                call = corpus.call_len(),
                "corpus loaded and replayed"
            );
        }
        self.corpus = Arc::new(Mutex::new(CorpusState::new(corpus, baseline)));

        self.base_chain = Some(chain);
        self.state = FuzzerState::Initialized;
        Ok(())
    }
}

impl<E: Evm + Send + 'static> Fuzzer<E> {
    /// Runs the campaign to a terminal state.
    pub fn run(&mut self) -> eyre::Result<FuzzingResults> {
        if self.state != FuzzerState::Initialized {
            bail!("fuzzer must be initialized before running (state: {:?})", self.state);
        }
        let base_chain = self.base_chain.clone().ok_or_else(|| eyre!("missing base chain"))?;
        self.state = FuzzerState::Running;
        let started = Instant::now();
        let fuzzing = Arc::new(self.config.fuzzing.clone());
        info!(workers = fuzzing.workers, "fuzzing campaign started");

        for case in self.test_cases.values_mut() {
            case.status = TestCaseStatus::Running;
        }

        let deadline = (fuzzing.timeout > 0)
            .then(|| started + Duration::from_secs(fuzzing.timeout as u64));

        let (events_tx, events_rx) = mpsc::channel();
        let mut handles = Vec::with_capacity(fuzzing.workers);
        for id in 0..fuzzing.workers {
            let worker_seed = self.master_seed.wrapping_add(id as u64);
            let chooser = WeightedChooser::with_rng(StdRng::seed_from_u64(
                worker_seed ^ 0x5eed_c400_0000_0001,
            ));
            chooser.add_choices(
                (0..self.methods.len()).map(|index| WeightedChoice::new(index, U256::ONE)),
            );
            let worker = FuzzerWorker {
                id,
                base_chain: base_chain.clone_for_worker(),
                config: fuzzing.clone(),
                senders: self.senders.clone(),
                methods: self.methods.clone(),
                chooser,
                generator: MutatingValueGenerator::new(
                    StdRng::seed_from_u64(worker_seed ^ 0x9e37_79b9_7f4a_7c15),
                    GeneratorConfig::default(),
                    self.value_set.clone(),
                ),
                rng: StdRng::seed_from_u64(worker_seed),
                corpus: self.corpus.clone(),
                value_set: self.value_set.clone(),
                providers: self.providers.clone(),
                events: events_tx.clone(),
                stop: self.stop.clone(),
            };
            let handle = std::thread::Builder::new()
                .name(format!("cinder-worker-{id}"))
                .spawn(move || worker.run())
                .wrap_err("failed to spawn fuzzing worker")?;
            handles.push(handle);
        }
        drop(events_tx);

        let mut reason: Option<StopReason> = None;
        let mut worker_error: Option<String> = None;
        let mut pending_workers = fuzzing.workers;
        while pending_workers > 0 {
            // Stop conditions are evaluated ahead of every dispatch.
            if reason.is_none() {
                if fuzzing.test_limit > 0 && self.metrics.calls_tested >= fuzzing.test_limit {
                    info!(calls = self.metrics.calls_tested, "test limit reached");
                    reason = Some(StopReason::TestLimit);
                    self.stop.stop();
                } else if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                    info!("campaign timeout elapsed");
                    reason = Some(StopReason::Timeout);
                    self.stop.stop();
                } else if self.stop.stopped() {
                    info!("cancellation requested");
                    reason = Some(StopReason::Cancelled);
                }
            }

            match events_rx.recv_timeout(Duration::from_millis(50)) {
                Ok(WorkerEvent::SequenceTested { calls, admitted }) => {
                    self.metrics.calls_tested += calls;
                    self.metrics.sequences_tested += 1;
                    if admitted {
                        self.metrics.sequences_admitted += 1;
                    }
                }
                Ok(WorkerEvent::TestFailed { sequence, failures }) => {
                    self.handle_failures(&base_chain, sequence, failures, &mut reason);
                }
                Ok(WorkerEvent::Finished { worker_id, error }) => {
                    pending_workers -= 1;
                    if let Some(error) = error {
                        error!(worker = worker_id, %error, "worker failed");
                        worker_error = Some(error);
                        self.stop.stop();
                    }
                }
                Err(mpsc::RecvTimeoutError::Timeout) => {}
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }
        for handle in handles {
            if handle.join().is_err() {
                worker_error = Some("worker thread panicked".into());
            }
        }

        // Finalize test case statuses: anything still running passed.
        for case in self.test_cases.values_mut() {
            if matches!(case.status, TestCaseStatus::Running | TestCaseStatus::NotStarted) {
                case.status = TestCaseStatus::Passed;
            }
        }

        self.metrics.corpus_entries = self.corpus.lock().corpus.mutation_len();
        self.state = if worker_error.is_some() {
            FuzzerState::Errored
        } else {
            match reason {
                Some(StopReason::FailedTest | StopReason::Cancelled) => FuzzerState::Stopped,
                Some(StopReason::TestLimit | StopReason::Timeout) | None => FuzzerState::Completed,
            }
        };
        info!(
            state = ?self.state,
            calls = self.metrics.calls_tested,
            corpus = self.metrics.corpus_entries,
            failed = self.metrics.failed_tests,
            elapsed = ?started.elapsed(),
            "fuzzing campaign finished"
        );

        Ok(FuzzingResults {
            state: self.state,
            test_cases: self.test_cases.values().cloned().collect(),
            metrics: self.metrics.clone(),
        })
    }

    /// Records newly failed test cases: raises the stop signal when
    /// configured, shrinks the failing witness, and archives it.
    fn handle_failures(
        &mut self,
        base_chain: &TestChain<E>,
        sequence: CallSequence,
        failures: Vec<SequenceFailure>,
        reason: &mut Option<StopReason>,
    ) {
        for failure in failures {
            let new_failure = self
                .test_cases
                .get(&failure.case_id)
                .is_some_and(|case| case.status != TestCaseStatus::Failed);
            if !new_failure {
                continue;
            }
            self.metrics.failed_tests += 1;
            warn!(case = %failure.case_id, call = failure.call_index, "test case failed");

            if self.config.fuzzing.testing.stop_on_failed_test && reason.is_none() {
                *reason = Some(StopReason::FailedTest);
                self.stop.stop();
            }

            // Shrink the failing prefix to a minimal reproducer.
            let prefix = CallSequence(sequence[..=failure.call_index].to_vec());
            let limits = ShrinkLimits {
                max_replays: self.config.fuzzing.shrink_limit,
                budget: Duration::from_secs(self.config.fuzzing.shrink_timeout),
                seed: self.master_seed.wrapping_add(self.metrics.failed_tests as u64),
            };
            let mut shrinker =
                Shrinker::new(base_chain, &self.providers, self.value_set.clone(), limits);
            let shrunk = match shrinker.shrink(prefix.clone(), &failure.case_id) {
                Ok(shrunk) => shrunk,
                Err(err) => {
                    warn!(%err, "shrinking failed; keeping the original witness");
                    prefix
                }
            };
            info!(case = %failure.case_id, calls = shrunk.len(), "minimized failing sequence");

            {
                let mut corpus = self.corpus.lock();
                let mut archived = shrunk.clone();
                archived.clear_results();
                if let Err(err) = corpus.corpus.add_call_entry(CorpusEntry {
                    sequence: archived,
                    coverage: CoverageMaps::new(),
                    weight: 0,
                }) {
                    warn!(%err, "failed to archive failing sequence");
                }
            }

            if let Some(case) = self.test_cases.get_mut(&failure.case_id) {
                case.status = TestCaseStatus::Failed;
                case.message = failure.message;
                case.call_sequence = Some(shrunk);
            }
        }
    }
}

/// Whether a method is claimed by property testing: prefixed name and a
/// `() -> (bool)` signature.
fn is_property_method(prefixes: &[String], method: &Function) -> bool {
    prefixes.iter().any(|prefix| method.name.starts_with(prefix.as_str()))
        && method.inputs.is_empty()
        && method.outputs.len() == 1
        && method.outputs[0].ty == "bool"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        artifacts::{ArtifactLiterals, CompilationArtifacts, ContractArtifact},
        chain::scripted::{Behavior, ScriptedContract, ScriptedEvm, ScriptedMethod},
        providers::TestCaseStatus,
    };
    use alloy_dyn_abi::DynSolValue;
    use cinder_config::ProjectConfig;

    fn artifact(
        name: &str,
        script: ScriptedContract,
        abi_json: &str,
        literals: ArtifactLiterals,
    ) -> ContractArtifact {
        ContractArtifact {
            name: name.into(),
            abi: serde_json::from_str(abi_json).unwrap(),
            bytecode: script.bytecode(),
            literals,
        }
    }

    fn base_config(order: &[&str]) -> ProjectConfig {
        let mut config = ProjectConfig::default();
        config.fuzzing.workers = 2;
        config.fuzzing.worker_reset_limit = 10;
        config.fuzzing.call_sequence_length = 3;
        config.fuzzing.deployment_order = order.iter().map(|s| s.to_string()).collect();
        config.fuzzing.seed = Some(0x5eed);
        config.fuzzing.shrink_limit = 2_000;
        config.fuzzing.shrink_timeout = 30;
        config.fuzzing.block_number_delay_max = 10;
        config.fuzzing.block_timestamp_delay_max = 100;
        config
    }

    fn counter_artifacts() -> CompilationArtifacts {
        let script = ScriptedContract {
            name: "Counter".into(),
            methods: vec![
                ScriptedMethod::new("setX(uint256)", Behavior::StoreArg { slot: U256::ZERO }),
                ScriptedMethod::new(
                    "echo_bad()",
                    Behavior::ReturnNotEq { slot: U256::ZERO, value: U256::from(42) },
                ),
            ],
        };
        let abi = r#"[
            {"type":"function","name":"setX","inputs":[{"name":"x","type":"uint256"}],"outputs":[],"stateMutability":"nonpayable"},
            {"type":"function","name":"echo_bad","inputs":[],"outputs":[{"name":"","type":"bool"}],"stateMutability":"view"}
        ]"#;
        let literals =
            ArtifactLiterals { integers: vec![U256::from(42)], ..Default::default() };
        CompilationArtifacts::new(vec![artifact("Counter", script, abi, literals)])
    }

    #[test]
    fn pt1_passing_property_completes_with_exit_zero() {
        let script = ScriptedContract {
            name: "Echo".into(),
            methods: vec![
                ScriptedMethod::new("echo_true()", Behavior::ReturnBool { value: true }),
                ScriptedMethod::new("poke()", Behavior::Noop),
            ],
        };
        let abi = r#"[
            {"type":"function","name":"echo_true","inputs":[],"outputs":[{"name":"","type":"bool"}],"stateMutability":"pure"},
            {"type":"function","name":"poke","inputs":[],"outputs":[],"stateMutability":"nonpayable"}
        ]"#;
        let artifacts = CompilationArtifacts::new(vec![artifact(
            "Echo",
            script,
            abi,
            ArtifactLiterals::default(),
        )]);

        let mut config = base_config(&["Echo"]);
        config.fuzzing.test_limit = 25;
        config.fuzzing.testing.property_testing.test_prefixes = vec!["echo_".into()];

        let mut fuzzer = Fuzzer::new(config, artifacts).unwrap();
        fuzzer.initialize(ScriptedEvm::new()).unwrap();
        let results = fuzzer.run().unwrap();

        assert_eq!(results.state, FuzzerState::Completed);
        assert!(results.metrics.calls_tested >= 25);
        let case = results.test_cases.iter().find(|c| c.id.contains("echo_true")).unwrap();
        assert_eq!(case.status, TestCaseStatus::Passed);
        assert_eq!(results.exit_code(), 0);
    }

    #[test]
    fn pt2_failing_property_shrinks_to_the_magic_argument() {
        let mut config = base_config(&["Counter"]);
        config.fuzzing.test_limit = 500_000;
        config.fuzzing.testing.property_testing.test_prefixes = vec!["echo_".into()];
        config.fuzzing.testing.stop_on_failed_test = true;
        config.fuzzing.seed = Some(7);

        let mut fuzzer = Fuzzer::new(config, counter_artifacts()).unwrap();
        fuzzer.initialize(ScriptedEvm::new()).unwrap();
        let results = fuzzer.run().unwrap();

        assert_eq!(results.state, FuzzerState::Stopped);
        assert_eq!(results.exit_code(), 1);
        let case = results.test_cases.iter().find(|c| c.id.contains("echo_bad")).unwrap();
        assert_eq!(case.status, TestCaseStatus::Failed);

        let shrunk = case.call_sequence.as_ref().unwrap();
        assert_eq!(shrunk.len(), 1, "minimal reproducer is a single call");
        let data = shrunk[0].message.data_abi.as_ref().unwrap();
        assert_eq!(data.method_signature, "setX(uint256)");
        assert_eq!(data.args[0], DynSolValue::Uint(U256::from(42), 256));
    }

    #[test]
    fn at1_assertion_failure_shrinks_to_one_call_at_or_above_bound() {
        let script = ScriptedContract {
            name: "Asserter".into(),
            methods: vec![ScriptedMethod::new(
                "trigger(uint256)",
                Behavior::AssertArgBelow { bound: U256::from(10) },
            )],
        };
        let abi = r#"[
            {"type":"function","name":"trigger","inputs":[{"name":"x","type":"uint256"}],"outputs":[],"stateMutability":"nonpayable"}
        ]"#;
        let artifacts = CompilationArtifacts::new(vec![artifact(
            "Asserter",
            script,
            abi,
            ArtifactLiterals::default(),
        )]);

        let mut config = base_config(&["Asserter"]);
        config.fuzzing.test_limit = 100_000;
        config.fuzzing.testing.property_testing.enabled = false;
        config.fuzzing.testing.assertion_testing.enabled = true;
        config.fuzzing.testing.stop_on_failed_test = true;

        let mut fuzzer = Fuzzer::new(config, artifacts).unwrap();
        fuzzer.initialize(ScriptedEvm::new()).unwrap();
        let results = fuzzer.run().unwrap();

        assert_eq!(results.state, FuzzerState::Stopped);
        let case = results.test_cases.iter().find(|c| c.id.contains("trigger")).unwrap();
        assert_eq!(case.status, TestCaseStatus::Failed);

        let shrunk = case.call_sequence.as_ref().unwrap();
        assert_eq!(shrunk.len(), 1);
        let data = shrunk[0].message.data_abi.as_ref().unwrap();
        let DynSolValue::Uint(value, _) = &data.args[0] else { panic!("expected uint") };
        assert!(*value >= U256::from(10), "witness below the assertion bound: {value}");
    }

    #[test]
    fn corp1_reloaded_corpus_reconstitutes_the_baseline() {
        let dir = tempfile::tempdir().unwrap();
        let make_config = || {
            let mut config = base_config(&["Counter"]);
            config.fuzzing.test_limit = 1_500;
            config.fuzzing.corpus_directory = Some(dir.path().to_path_buf());
            config.fuzzing.testing.property_testing.enabled = false;
            config.fuzzing.testing.assertion_testing.enabled = false;
            config
        };

        let mut first = Fuzzer::new(make_config(), counter_artifacts()).unwrap();
        first.initialize(ScriptedEvm::new()).unwrap();
        let results = first.run().unwrap();
        assert_eq!(results.state, FuzzerState::Completed);
        assert!(results.metrics.corpus_entries > 0, "campaign admitted nothing");

        let first_state = first.corpus.lock();

        let mut second = Fuzzer::new(make_config(), counter_artifacts()).unwrap();
        second.initialize(ScriptedEvm::new()).unwrap();
        let second_state = second.corpus.lock();

        assert_eq!(second_state.corpus.mutation_len(), first_state.corpus.mutation_len());
        // Replaying every persisted entry reproduces the baseline exactly.
        assert_eq!(second_state.baseline, first_state.baseline);
        assert_eq!(second_state.baseline.fingerprint(), first_state.baseline.fingerprint());
        for entry in second_state.corpus.mutation_entries() {
            assert!(!entry.coverage.novel_against(&second_state.baseline));
        }
    }

    #[test]
    fn magic1_constructor_argument_resolves_to_deployed_address() {
        let bar_script = ScriptedContract {
            name: "Bar".into(),
            methods: vec![ScriptedMethod::new("ping()", Behavior::Noop)],
        };
        let foo_script = ScriptedContract {
            name: "Foo".into(),
            methods: vec![ScriptedMethod::new("ping()", Behavior::Noop)],
        };
        let bar_abi = r#"[
            {"type":"function","name":"ping","inputs":[],"outputs":[],"stateMutability":"nonpayable"}
        ]"#;
        let foo_abi = r#"[
            {"type":"constructor","inputs":[{"name":"bar","type":"address"}],"stateMutability":"nonpayable"},
            {"type":"function","name":"ping","inputs":[],"outputs":[],"stateMutability":"nonpayable"}
        ]"#;
        let artifacts = CompilationArtifacts::new(vec![
            artifact("Bar", bar_script, bar_abi, ArtifactLiterals::default()),
            artifact("Foo", foo_script, foo_abi, ArtifactLiterals::default()),
        ]);

        let mut config = base_config(&["Bar", "Foo"]);
        config.fuzzing.constructor_args.insert(
            "Foo".into(),
            [("bar".to_string(), serde_json::json!("DeployedContract:Bar"))].into(),
        );

        let mut fuzzer = Fuzzer::new(config, artifacts).unwrap();
        fuzzer.initialize(ScriptedEvm::new()).unwrap();

        let bar = fuzzer.deployed.iter().find(|c| c.name == "Bar").unwrap().address;
        let foo = fuzzer.deployed.iter().find(|c| c.name == "Foo").unwrap().address;
        let chain = fuzzer.base_chain.as_ref().unwrap();
        let stored = chain.evm().storage_at(&foo, &U256::ZERO);
        assert_eq!(Address::from_slice(&stored.to_be_bytes::<32>()[12..]), bar);
    }

    #[test]
    fn unresolvable_constructor_magic_is_fatal_at_init() {
        let script = ScriptedContract {
            name: "Foo".into(),
            methods: vec![ScriptedMethod::new("ping()", Behavior::Noop)],
        };
        let abi = r#"[
            {"type":"constructor","inputs":[{"name":"bar","type":"address"}],"stateMutability":"nonpayable"},
            {"type":"function","name":"ping","inputs":[],"outputs":[],"stateMutability":"nonpayable"}
        ]"#;
        let artifacts = CompilationArtifacts::new(vec![artifact(
            "Foo",
            script,
            abi,
            ArtifactLiterals::default(),
        )]);

        let mut config = base_config(&["Foo"]);
        config.fuzzing.constructor_args.insert(
            "Foo".into(),
            [("bar".to_string(), serde_json::json!("DeployedContract:Missing"))].into(),
        );

        let mut fuzzer = Fuzzer::new(config, artifacts).unwrap();
        assert!(fuzzer.initialize(ScriptedEvm::new()).is_err());
        assert_eq!(fuzzer.state(), FuzzerState::Idle);
    }

    #[test]
    fn lifecycle_enforces_state_transitions() {
        let mut fuzzer =
            Fuzzer::new(base_config(&["Counter"]), counter_artifacts()).unwrap();
        assert_eq!(fuzzer.state(), FuzzerState::Idle);

        // Running before initialization is rejected.
        assert!(fuzzer.run().is_err());

        fuzzer.initialize(ScriptedEvm::new()).unwrap();
        assert_eq!(fuzzer.state(), FuzzerState::Initialized);

        // Double initialization is rejected.
        assert!(fuzzer.initialize(ScriptedEvm::new()).is_err());
    }

    #[test]
    fn invalid_config_rejected_at_construction() {
        let mut config = base_config(&["Counter"]);
        config.fuzzing.workers = 0;
        assert!(Fuzzer::<ScriptedEvm>::new(config, counter_artifacts()).is_err());
    }
}
