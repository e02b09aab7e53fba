//! The fuzzer worker loop.

use crate::{
    calls::{BlockDelta, CallMessage, CallSequence, CallSequenceElement},
    chain::{ChainError, Evm, TestChain},
    corpus::{CorpusError, CorpusState},
    executor::{execute_call_sequence, SequenceFailure},
    fuzzer::StopSignal,
    providers::TestProvider,
    random::{ChooserError, WeightedChooser},
    values::{abi, EncodingError, MutatingValueGenerator, ValueSet},
};
use alloy_json_abi::Function;
use alloy_primitives::Address;
use cinder_config::FuzzingConfig;
use parking_lot::{Mutex, RwLock};
use rand::{rngs::StdRng, Rng};
use std::sync::{mpsc, Arc};

/// Probability that a worker mutates a corpus sequence instead of generating
/// a fresh one, once the corpus is non-empty.
const CORPUS_MUTATION_PROBABILITY: f64 = 0.5;

/// Probability that a corpus-derived element has its arguments mutated.
const ELEMENT_MUTATION_PROBABILITY: f64 = 0.3;

/// Probability that one argument of a mutated element is changed.
const ARGUMENT_MUTATION_PROBABILITY: f64 = 0.5;

/// Probability that a corpus-derived element's block delta is re-rolled.
const DELTA_MUTATION_PROBABILITY: f64 = 0.1;

/// Reports a worker delivers to the coordinator.
#[derive(Debug)]
pub(crate) enum WorkerEvent {
    /// A sequence finished executing.
    SequenceTested { calls: u64, admitted: bool },
    /// A sequence failed at least one test.
    TestFailed { sequence: CallSequence, failures: Vec<SequenceFailure> },
    /// The worker exited, with the error that killed it if any.
    Finished { worker_id: usize, error: Option<String> },
}

#[derive(Debug, thiserror::Error)]
enum WorkerError {
    #[error(transparent)]
    Encoding(#[from] EncodingError),
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error(transparent)]
    Corpus(#[from] CorpusError),
    #[error(transparent)]
    Chooser(#[from] ChooserError),
}

/// One fuzzing actor: owns a chain clone, generates and executes call
/// sequences, and reports outcomes to the coordinator. Workers hold only a
/// send handle to the coordinator and shared read-mostly state; there are no
/// back-references.
pub(crate) struct FuzzerWorker<E: Evm> {
    pub id: usize,
    pub base_chain: TestChain<E>,
    pub config: Arc<FuzzingConfig>,
    pub senders: Vec<Address>,
    /// Callable `(contract, method)` pairs, read-only after initialization.
    pub methods: Arc<Vec<(Address, Function)>>,
    /// Per-worker weighted chooser over `methods` indices.
    pub chooser: WeightedChooser<usize>,
    pub generator: MutatingValueGenerator,
    pub rng: StdRng,
    pub corpus: Arc<Mutex<CorpusState>>,
    pub value_set: Arc<RwLock<ValueSet>>,
    pub providers: Vec<TestProvider>,
    pub events: mpsc::Sender<WorkerEvent>,
    pub stop: StopSignal,
}

impl<E: Evm> FuzzerWorker<E> {
    pub(crate) fn run(mut self) {
        debug!(worker = self.id, "worker started");
        let mut chain = self.base_chain.clone_for_worker();
        let mut iterations = 0usize;
        let mut fatal = None;

        while !self.stop.stopped() {
            if iterations > 0 && iterations % self.config.worker_reset_limit == 0 {
                // Recreate the clone to release memory accumulated by the
                // engine across sequences.
                trace!(worker = self.id, iterations, "recreating worker chain");
                chain = self.base_chain.clone_for_worker();
            }
            iterations += 1;

            match self.fuzz_iteration(&mut chain) {
                Ok(()) => {}
                Err(WorkerError::Encoding(err)) => {
                    // The offending sequence is discarded; not a fuzzer
                    // failure.
                    warn!(worker = self.id, %err, "discarding sequence after encoding error");
                }
                Err(err) => {
                    fatal = Some(err.to_string());
                    break;
                }
            }
        }

        debug!(worker = self.id, iterations, "worker exiting");
        let _ = self.events.send(WorkerEvent::Finished { worker_id: self.id, error: fatal });
    }

    fn fuzz_iteration(&mut self, chain: &mut TestChain<E>) -> Result<(), WorkerError> {
        let sequence = self.next_sequence()?;
        let executed =
            execute_call_sequence(chain, &self.providers, sequence, Some(&self.stop))?;

        let mut admitted = false;
        if self.config.coverage_enabled && !executed.coverage.executed.is_empty() {
            let mut corpus = self.corpus.lock();
            admitted = corpus.try_admit(&executed.sequence, &executed.coverage.executed)?;
        }
        if admitted {
            // Re-inject the inputs that uncovered new coverage.
            self.value_set.write().add_call_sequence(&executed.sequence);
        }

        if !executed.failures.is_empty() {
            let _ = self.events.send(WorkerEvent::TestFailed {
                sequence: executed.sequence.clone(),
                failures: executed.failures.clone(),
            });
        }
        let _ = self
            .events
            .send(WorkerEvent::SequenceTested { calls: executed.calls_executed, admitted });
        Ok(())
    }

    /// Picks the seed strategy: mutate a weighted-drawn corpus sequence, or
    /// build a fresh one.
    fn next_sequence(&mut self) -> Result<CallSequence, WorkerError> {
        if self.rng.random_bool(CORPUS_MUTATION_PROBABILITY) {
            let seed = {
                let corpus = self.corpus.lock();
                corpus.corpus.choose_mutation_sequence(&mut self.rng).cloned()
            };
            if let Some(mut sequence) = seed {
                sequence.clear_results();
                self.mutate_sequence(&mut sequence)?;
                return Ok(sequence);
            }
        }
        self.generate_sequence()
    }

    fn generate_sequence(&mut self) -> Result<CallSequence, WorkerError> {
        let length = self.rng.random_range(1..=self.config.call_sequence_length);
        let mut elements = Vec::with_capacity(length);
        for _ in 0..length {
            elements.push(self.generate_call()?);
        }
        Ok(CallSequence(elements))
    }

    fn generate_call(&mut self) -> Result<CallSequenceElement, WorkerError> {
        let sender = self.senders[self.rng.random_range(0..self.senders.len())];
        let method_index = self.chooser.choose()?;
        let (address, method) = self.methods[method_index].clone();

        let mut args = Vec::with_capacity(method.inputs.len());
        for input in &method.inputs {
            let ty = input
                .selector_type()
                .parse()
                .map_err(|_| EncodingError::UnknownType(input.ty.clone()))?;
            args.push(abi::generate_abi_value(&mut self.generator, &ty)?);
        }

        let message = CallMessage::from_abi_call(
            sender,
            address,
            self.config.transaction_gas_limit,
            &method,
            args,
        )?;
        let delta = BlockDelta::random(
            &mut self.rng,
            self.config.block_number_delay_max,
            self.config.block_timestamp_delay_max,
        );
        Ok(CallSequenceElement::new(message, delta))
    }

    /// Mutates a corpus-derived sequence in place: per-element argument
    /// mutation with recursive per-field probability, and occasional block
    /// delta re-rolls.
    fn mutate_sequence(&mut self, sequence: &mut CallSequence) -> Result<(), WorkerError> {
        for element in sequence.iter_mut() {
            if self.rng.random_bool(DELTA_MUTATION_PROBABILITY) {
                element.delta = BlockDelta::random(
                    &mut self.rng,
                    self.config.block_number_delay_max,
                    self.config.block_timestamp_delay_max,
                );
            }
            if !self.rng.random_bool(ELEMENT_MUTATION_PROBABILITY) {
                continue;
            }
            let Some(data) = element.message.data_abi.as_mut() else { continue };
            let Some(method) = data.method.clone() else { continue };
            for (argument, input) in method.inputs.iter().enumerate() {
                if !self.rng.random_bool(ARGUMENT_MUTATION_PROBABILITY) {
                    continue;
                }
                let ty = input
                    .selector_type()
                    .parse()
                    .map_err(|_| EncodingError::UnknownType(input.ty.clone()))?;
                let old = data.args[argument].clone();
                data.args[argument] = abi::mutate_abi_value(&mut self.generator, &ty, old)?;
            }
            element.message.re_encode()?;
        }
        Ok(())
    }
}
