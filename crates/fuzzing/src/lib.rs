//! # cinder-fuzzing
//!
//! A coverage-guided fuzzing engine for Ethereum-style smart contracts.
//!
//! The fuzzer repeatedly synthesizes call sequences against contracts
//! deployed on an in-process execution engine, observes bytecode coverage
//! and user-defined test predicates (property methods and assertion
//! failures), preserves coverage-increasing sequences in a corpus, and
//! shrinks failing sequences to minimal reproducers.
//!
//! The execution engine is consumed through [`chain::Evm`];
//! [`chain::scripted::ScriptedEvm`] is the deterministic in-tree reference
//! implementation.

#[macro_use]
extern crate tracing;

pub mod artifacts;
pub mod calls;
pub mod chain;
pub mod corpus;
pub mod coverage;
pub mod executor;
pub mod fuzzer;
pub mod providers;
pub mod random;
pub mod shrink;
pub mod values;

mod worker;

pub use artifacts::{CompilationArtifacts, ContractArtifact, DeployedContract};
pub use calls::{BlockDelta, CallMessage, CallSequence, CallSequenceElement};
pub use chain::{Evm, TestChain, Tracer};
pub use corpus::{Corpus, CorpusEntry};
pub use coverage::{CallCoverage, CodeCoverage, CoverageMaps};
pub use fuzzer::{Fuzzer, FuzzerMetrics, FuzzerState, FuzzingResults, StopSignal};
pub use providers::{TestCase, TestCaseStatus, TestProvider};
pub use random::{WeightedChoice, WeightedChooser};
pub use values::{ValueGenerator, ValueSet};
