//! A deterministic scripted execution engine.
//!
//! The in-tree reference implementation of [`Evm`]. A contract's "bytecode"
//! is a JSON [`ScriptedContract`] describing methods keyed by ABI signature
//! with small scripted behaviors over per-contract storage. Execution drives
//! the tracer with synthetic program counters, so coverage-guided corpus
//! growth, assertion detection and shrinking are all exercised end to end
//! without a full EVM. Production engines bind by implementing [`Evm`].

use super::{BlockEnv, CallResult, ChainError, Evm, ExecutionStatus, SnapshotId, Tracer};
use crate::calls::CallMessage;
use crate::coverage::OP_INVALID;
use alloy_primitives::{keccak256, Address, Bytes, U256};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A scripted stand-in for compiled contract bytecode.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScriptedContract {
    pub name: String,
    pub methods: Vec<ScriptedMethod>,
}

impl ScriptedContract {
    /// Serializes the script into its deployable "bytecode" form.
    pub fn bytecode(&self) -> Bytes {
        serde_json::to_vec(self).expect("scripted contract serializes").into()
    }

    /// Parses creation data into the script and the trailing constructor
    /// argument bytes.
    fn parse_creation(data: &[u8]) -> Option<(Self, usize)> {
        let mut stream = serde_json::Deserializer::from_slice(data).into_iter::<Self>();
        let contract = stream.next()?.ok()?;
        Some((contract, stream.byte_offset()))
    }
}

/// One scripted method, identified by its canonical ABI signature.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScriptedMethod {
    /// Canonical signature, e.g. `setX(uint256)`; the selector is its
    /// keccak256 prefix, as for real contracts.
    pub signature: String,
    pub behavior: Behavior,
}

impl ScriptedMethod {
    pub fn new(signature: impl Into<String>, behavior: Behavior) -> Self {
        Self { signature: signature.into(), behavior }
    }

    fn selector(&self) -> [u8; 4] {
        keccak256(self.signature.as_bytes())[..4].try_into().expect("4-byte prefix")
    }
}

/// The scripted behaviors a method can carry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Behavior {
    /// Returns a constant ABI-encoded boolean.
    ReturnBool { value: bool },
    /// Stores the first argument word at `slot`. Coverage branches on the
    /// stored value's low byte, giving distinct inputs distinct coverage.
    StoreArg { slot: U256 },
    /// Returns the ABI-encoded boolean `storage[slot] != value`.
    ReturnNotEq { slot: U256, value: U256 },
    /// Asserts that the first argument word is below `bound`; executes the
    /// `INVALID` opcode otherwise, like a failed Solidity `assert`.
    AssertArgBelow { bound: U256 },
    /// Reverts unconditionally with the given return data.
    Revert { data: Bytes },
    /// Succeeds without side effects.
    Noop,
}

#[derive(Clone, Debug, Default)]
struct Account {
    balance: U256,
    nonce: u64,
}

#[derive(Clone, Debug, Default)]
struct EvmState {
    accounts: BTreeMap<Address, Account>,
    contracts: BTreeMap<Address, ScriptedContract>,
    storage: BTreeMap<Address, BTreeMap<U256, U256>>,
}

/// The scripted execution engine. Cloning deep-copies all state.
#[derive(Clone, Debug, Default)]
pub struct ScriptedEvm {
    state: EvmState,
    snapshots: Vec<EvmState>,
}

impl ScriptedEvm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads a contract's storage slot, for assertions in tests.
    pub fn storage_at(&self, address: &Address, slot: &U256) -> U256 {
        self.state
            .storage
            .get(address)
            .and_then(|slots| slots.get(slot))
            .copied()
            .unwrap_or(U256::ZERO)
    }

    /// Whether a contract is deployed at the address.
    pub fn has_contract(&self, address: &Address) -> bool {
        self.state.contracts.contains_key(address)
    }

    fn execute_create(&mut self, msg: &CallMessage, tracer: &mut dyn Tracer) -> CallResult {
        let Some((contract, offset)) = ScriptedContract::parse_creation(&msg.data) else {
            // Undeployable creation data is an execution failure, not an
            // engine error.
            return CallResult {
                status: ExecutionStatus::Reverted,
                gas_used: base_gas(msg),
                return_data: Bytes::new(),
                deployed_address: None,
                invalid_opcode: false,
            };
        };

        let nonce = self.state.accounts.get(&msg.from).map_or(0, |a| a.nonce);
        let address = msg.from.create(nonce);

        // Constructor frame: store each trailing argument word into
        // consecutive storage slots, the scripted analogue of constructor
        // state initialization.
        tracer.enter_frame(address);
        for pc in 0..4 {
            tracer.step(pc, 0x60);
        }
        let slots = self.state.storage.entry(address).or_default();
        for (index, word) in msg.data[offset..].chunks(32).enumerate() {
            let mut padded = [0u8; 32];
            padded[..word.len()].copy_from_slice(word);
            slots.insert(U256::from(index), U256::from_be_bytes(padded));
        }
        tracer.exit_frame(false);

        self.state.contracts.insert(address, contract);
        CallResult {
            status: ExecutionStatus::Succeeded,
            gas_used: base_gas(msg),
            return_data: Bytes::new(),
            deployed_address: Some(address),
            invalid_opcode: false,
        }
    }

    fn execute_call(
        &mut self,
        to: Address,
        msg: &CallMessage,
        tracer: &mut dyn Tracer,
    ) -> CallResult {
        let Some(contract) = self.state.contracts.get(&to).cloned() else {
            // Plain value transfer to an account without code.
            let balance = self.state.accounts.entry(to).or_default();
            balance.balance = balance.balance.saturating_add(msg.value);
            return success(base_gas(msg), Bytes::new());
        };

        let selector: Option<[u8; 4]> = msg.data.get(..4).map(|s| s.try_into().expect("4 bytes"));
        let method = contract
            .methods
            .iter()
            .enumerate()
            .find(|(_, m)| Some(m.selector()) == selector);
        let Some((index, method)) = method else {
            // Unknown selector and no fallback.
            return CallResult {
                status: ExecutionStatus::Reverted,
                gas_used: base_gas(msg),
                return_data: Bytes::new(),
                deployed_address: None,
                invalid_opcode: false,
            };
        };

        // Synthetic program counters: each method owns a PC window, with
        // the dispatch prefix shared per method.
        let base = 16 + index as u32 * 32;
        tracer.enter_frame(to);
        tracer.step(base, 0x60);
        tracer.step(base + 1, 0x60);

        let arg_word = first_argument_word(&msg.data);
        let result = match &method.behavior {
            Behavior::ReturnBool { value } => {
                tracer.step(base + 2, 0x60);
                tracer.exit_frame(false);
                success(base_gas(msg), encode_bool(*value))
            }
            Behavior::StoreArg { slot } => {
                tracer.step(base + 2, 0x60);
                let class = arg_word.byte(0) % 8;
                tracer.step(base + 8 + class as u32, 0x55);
                self.state.storage.entry(to).or_default().insert(*slot, arg_word);
                tracer.exit_frame(false);
                success(base_gas(msg), Bytes::new())
            }
            Behavior::ReturnNotEq { slot, value } => {
                tracer.step(base + 2, 0x54);
                let stored = self.storage_at(&to, slot);
                let not_equal = stored != *value;
                tracer.step(base + if not_equal { 3 } else { 4 }, 0x60);
                tracer.exit_frame(false);
                success(base_gas(msg), encode_bool(not_equal))
            }
            Behavior::AssertArgBelow { bound } => {
                tracer.step(base + 2, 0x10);
                if arg_word < *bound {
                    tracer.step(base + 3, 0x60);
                    tracer.exit_frame(false);
                    success(base_gas(msg), Bytes::new())
                } else {
                    tracer.step(base + 4, 0x60);
                    tracer.step(base + 5, OP_INVALID);
                    tracer.exit_frame(true);
                    CallResult {
                        status: ExecutionStatus::Halted,
                        gas_used: msg.gas,
                        return_data: Bytes::new(),
                        deployed_address: None,
                        invalid_opcode: true,
                    }
                }
            }
            Behavior::Revert { data } => {
                tracer.step(base + 2, 0xFD);
                tracer.exit_frame(true);
                CallResult {
                    status: ExecutionStatus::Reverted,
                    gas_used: base_gas(msg),
                    return_data: data.clone(),
                    deployed_address: None,
                    invalid_opcode: false,
                }
            }
            Behavior::Noop => {
                tracer.step(base + 2, 0x00);
                tracer.exit_frame(false);
                success(base_gas(msg), Bytes::new())
            }
        };
        result
    }
}

impl Evm for ScriptedEvm {
    fn create_account(&mut self, address: Address, balance: U256) {
        let account = self.state.accounts.entry(address).or_default();
        account.balance = balance;
    }

    fn nonce(&self, address: &Address) -> u64 {
        self.state.accounts.get(address).map_or(0, |a| a.nonce)
    }

    fn execute(
        &mut self,
        _block: &BlockEnv,
        msg: &CallMessage,
        tracer: &mut dyn Tracer,
    ) -> Result<CallResult, ChainError> {
        let result = match msg.to {
            None => self.execute_create(msg, tracer),
            Some(to) => self.execute_call(to, msg, tracer),
        };
        // The sender's nonce advances regardless of the call outcome.
        self.state.accounts.entry(msg.from).or_default().nonce += 1;
        Ok(result)
    }

    fn snapshot(&mut self) -> SnapshotId {
        self.snapshots.push(self.state.clone());
        (self.snapshots.len() - 1) as SnapshotId
    }

    fn revert_to(&mut self, snapshot: SnapshotId) -> Result<(), ChainError> {
        let expected = match self.snapshots.len() {
            0 => return Err(ChainError::NoSnapshot),
            n => (n - 1) as SnapshotId,
        };
        if snapshot != expected {
            return Err(ChainError::SnapshotMismatch { expected, actual: snapshot });
        }
        self.state = self.snapshots.pop().expect("checked non-empty");
        Ok(())
    }
}

fn first_argument_word(data: &[u8]) -> U256 {
    let mut padded = [0u8; 32];
    let word = data.get(4..).unwrap_or_default();
    let len = word.len().min(32);
    padded[..len].copy_from_slice(&word[..len]);
    U256::from_be_bytes(padded)
}

fn encode_bool(value: bool) -> Bytes {
    let mut word = [0u8; 32];
    word[31] = value as u8;
    Bytes::copy_from_slice(&word)
}

fn base_gas(msg: &CallMessage) -> u64 {
    21_000 + msg.data.len() as u64 * 16
}

fn success(gas_used: u64, return_data: Bytes) -> CallResult {
    CallResult {
        status: ExecutionStatus::Succeeded,
        gas_used,
        return_data,
        deployed_address: None,
        invalid_opcode: false,
    }
}
