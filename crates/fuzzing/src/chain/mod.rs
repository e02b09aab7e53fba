//! The test chain and the execution-engine interface it wraps.
//!
//! The EVM itself is an external collaborator: the fuzzer consumes it through
//! the [`Evm`] trait, which exposes exactly what the core needs — account
//! state, transactional execution with an instruction-level trace hook, and
//! snapshot/revert. [`TestChain`] layers block composition and strict-LIFO
//! snapshot bookkeeping on top.

use crate::{
    calls::{BlockDelta, CallMessage},
    coverage::{CallCoverage, CoverageTracer},
};
use alloy_primitives::{Address, Bytes, U256};
use cinder_config::ChainConfig;

pub mod scripted;

/// Identifier of a point-in-time state capture, revertible in LIFO order.
pub type SnapshotId = u64;

/// Errors raised by the test chain or the underlying execution engine.
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    /// A revert targeted a snapshot other than the most recent one. This is
    /// an internal invariant violation and is fatal.
    #[error("snapshot revert out of LIFO order: expected {expected}, got {actual}")]
    SnapshotMismatch { expected: SnapshotId, actual: SnapshotId },
    /// A revert was requested with no snapshot outstanding.
    #[error("no snapshot to revert to")]
    NoSnapshot,
    /// Initial contract deployment failed; fatal during initialization.
    #[error("deployment of contract {name} failed: {reason}")]
    DeploymentFailed { name: String, reason: String },
    /// The execution engine failed in a way that is not an execution result.
    #[error("execution engine failure: {0}")]
    Engine(String),
}

/// The block environment a call executes in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockEnv {
    pub number: u64,
    pub timestamp: u64,
    pub gas_limit: u64,
    pub base_fee: U256,
}

/// Outcome classification of one executed message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecutionStatus {
    /// The call completed and its state changes were committed.
    Succeeded,
    /// The call reverted; its state changes were rolled back.
    Reverted,
    /// The call halted abnormally (e.g. `INVALID`); state rolled back.
    Halted,
}

/// The result of executing one [`CallMessage`]. Reverts are first-class
/// results, not errors.
#[derive(Clone, Debug, PartialEq)]
pub struct CallResult {
    pub status: ExecutionStatus,
    pub gas_used: u64,
    pub return_data: Bytes,
    /// The created contract address for deployment messages.
    pub deployed_address: Option<Address>,
    /// Whether an `INVALID` opcode executed anywhere in the call.
    pub invalid_opcode: bool,
}

impl CallResult {
    pub fn succeeded(&self) -> bool {
        self.status == ExecutionStatus::Succeeded
    }

    pub fn reverted(&self) -> bool {
        !self.succeeded()
    }
}

/// An executed call together with the coverage its trace produced.
#[derive(Clone, Debug)]
pub struct ExecutedCall {
    pub result: CallResult,
    pub coverage: CallCoverage,
}

/// Instruction-level trace hook driven by the execution engine.
pub trait Tracer {
    /// A new call frame began executing at `code_address`.
    fn enter_frame(&mut self, code_address: Address);
    /// One instruction executed at `pc`.
    fn step(&mut self, pc: u32, opcode: u8);
    /// The innermost open frame finished; `reverted` covers reverts and
    /// abnormal halts.
    fn exit_frame(&mut self, reverted: bool);
}

/// An embeddable execution engine.
///
/// Implementations must be deterministic: executing the same message against
/// the same state yields the same result and drives the tracer identically.
/// Cloning must produce a deep copy sharing no mutable state.
pub trait Evm: Clone {
    /// Creates (or funds) an externally-owned account.
    fn create_account(&mut self, address: Address, balance: U256);

    /// Returns the current nonce of an account.
    fn nonce(&self, address: &Address) -> u64;

    /// Executes a message in the given block environment, driving `tracer`
    /// for every executed instruction.
    fn execute(
        &mut self,
        block: &BlockEnv,
        msg: &CallMessage,
        tracer: &mut dyn Tracer,
    ) -> Result<CallResult, ChainError>;

    /// Captures the current state, returning an identifier to revert to.
    fn snapshot(&mut self) -> SnapshotId;

    /// Restores the state captured by the most recent snapshot. Reverting to
    /// anything but the most recent snapshot is an error.
    fn revert_to(&mut self, snapshot: SnapshotId) -> Result<(), ChainError>;
}

/// A chain of blocks wrapping an execution engine.
///
/// Each sent call composes one block containing a single transaction, with
/// block number and timestamp advanced by the call's [`BlockDelta`].
#[derive(Clone, Debug)]
pub struct TestChain<E> {
    evm: E,
    head: BlockEnv,
    snapshots: Vec<(SnapshotId, BlockEnv)>,
    transaction_gas_limit: u64,
}

impl<E: Evm> TestChain<E> {
    /// Creates a chain over the given engine, funding the provided accounts
    /// at genesis.
    pub fn new(
        mut evm: E,
        config: &ChainConfig,
        block_gas_limit: u64,
        transaction_gas_limit: u64,
        accounts: &[Address],
    ) -> Self {
        for account in accounts {
            evm.create_account(*account, config.initial_balance);
        }
        let head = BlockEnv {
            number: config.initial_block_number,
            timestamp: config.initial_timestamp,
            gas_limit: block_gas_limit,
            base_fee: config.initial_base_fee,
        };
        Self { evm, head, snapshots: Vec::new(), transaction_gas_limit }
    }

    /// The most recently composed block environment.
    pub fn head(&self) -> &BlockEnv {
        &self.head
    }

    /// The wrapped execution engine.
    pub fn evm(&self) -> &E {
        &self.evm
    }

    /// The current nonce of an account.
    pub fn nonce(&self, address: &Address) -> u64 {
        self.evm.nonce(address)
    }

    /// Captures chain state (engine state plus head block).
    pub fn snapshot(&mut self) -> SnapshotId {
        let id = self.evm.snapshot();
        self.snapshots.push((id, self.head));
        id
    }

    /// Reverts to a previously captured snapshot. Snapshots are strictly
    /// LIFO; reverting out of order is an internal error.
    pub fn revert_to(&mut self, snapshot: SnapshotId) -> Result<(), ChainError> {
        let Some((expected, head)) = self.snapshots.last().copied() else {
            return Err(ChainError::NoSnapshot);
        };
        if expected != snapshot {
            return Err(ChainError::SnapshotMismatch { expected, actual: snapshot });
        }
        self.evm.revert_to(snapshot)?;
        self.snapshots.pop();
        self.head = head;
        Ok(())
    }

    /// Executes a message in a fresh single-transaction block advanced from
    /// the head by `delta`, committing state changes and collecting
    /// coverage.
    pub fn send_call(
        &mut self,
        msg: &CallMessage,
        delta: &BlockDelta,
    ) -> Result<ExecutedCall, ChainError> {
        let block = BlockEnv {
            number: self.head.number + delta.number_delay,
            timestamp: self.head.timestamp + delta.timestamp_delay,
            ..self.head
        };
        let mut msg = msg.clone();
        msg.gas = msg.gas.min(self.transaction_gas_limit);

        let mut tracer = CoverageTracer::new();
        let mut result = self.evm.execute(&block, &msg, &mut tracer)?;
        result.invalid_opcode |= tracer.hit_invalid();
        self.head = block;
        Ok(ExecutedCall { result, coverage: tracer.finish() })
    }

    /// Executes a message against the current head and discards all side
    /// effects, for read-only probes such as property test calls.
    pub fn call_readonly(&mut self, msg: &CallMessage) -> Result<CallResult, ChainError> {
        let snapshot = self.snapshot();
        let mut msg = msg.clone();
        msg.gas = msg.gas.min(self.transaction_gas_limit);
        let mut tracer = CoverageTracer::new();
        let result = self.evm.execute(&self.head, &msg, &mut tracer);
        self.revert_to(snapshot)?;
        let mut result = result?;
        result.invalid_opcode |= tracer.hit_invalid();
        Ok(result)
    }

    /// Deep-clones the chain for a worker; the clone shares no mutable
    /// state with the original.
    pub fn clone_for_worker(&self) -> Self {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::{scripted::ScriptedEvm, *};
    use alloy_primitives::address;

    fn chain() -> TestChain<ScriptedEvm> {
        TestChain::new(
            ScriptedEvm::default(),
            &ChainConfig::default(),
            125_000_000,
            12_500_000,
            &[address!("0000000000000000000000000000000000010000")],
        )
    }

    #[test]
    fn block_deltas_accumulate() {
        let mut chain = chain();
        let start = *chain.head();
        let msg = CallMessage::deployment(
            address!("0000000000000000000000000000000000010000"),
            1_000_000,
            Bytes::new(),
        );
        // An empty creation still advances the chain by one block.
        let delta = BlockDelta { number_delay: 5, timestamp_delay: 60 };
        chain.send_call(&msg, &delta).unwrap();
        assert_eq!(chain.head().number, start.number + 5);
        assert_eq!(chain.head().timestamp, start.timestamp + 60);
    }

    #[test]
    fn snapshots_are_strict_lifo() {
        let mut chain = chain();
        let outer = chain.snapshot();
        let inner = chain.snapshot();

        // Reverting the outer snapshot first violates LIFO ordering.
        let err = chain.revert_to(outer).unwrap_err();
        assert!(matches!(err, ChainError::SnapshotMismatch { .. }));

        chain.revert_to(inner).unwrap();
        chain.revert_to(outer).unwrap();
        assert!(matches!(chain.revert_to(outer), Err(ChainError::NoSnapshot)));
    }

    #[test]
    fn revert_restores_head_block() {
        let mut chain = chain();
        let start = *chain.head();
        let snapshot = chain.snapshot();

        let msg = CallMessage::deployment(
            address!("0000000000000000000000000000000000010000"),
            1_000_000,
            Bytes::new(),
        );
        chain.send_call(&msg, &BlockDelta { number_delay: 9, timestamp_delay: 9 }).unwrap();
        assert_ne!(chain.head(), &start);

        chain.revert_to(snapshot).unwrap();
        assert_eq!(chain.head(), &start);
    }
}
