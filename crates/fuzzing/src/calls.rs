//! Call messages and call sequences.
//!
//! A [`CallSequence`] is the unit of fuzzing: an ordered list of transactions
//! applied cumulatively to the chain. Sequences serialize to JSON for corpus
//! persistence; the typed ABI view of a call's data is stored alongside the
//! raw bytes and re-resolved against contract ABIs on load.

use crate::{
    chain::CallResult,
    values::abi::{self, EncodingError},
};
use alloy_json_abi::{Function, JsonAbi};
use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use rand::{rngs::StdRng, Rng};
use serde::{
    ser::{Error as _, SerializeStruct},
    Deserialize, Deserializer, Serialize, Serializer,
};
use std::{
    collections::BTreeMap,
    ops::{Deref, DerefMut},
};

/// Block number and timestamp distances applied relative to the previous
/// block when a call executes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockDelta {
    /// Distance in block numbers from the previous block.
    #[serde(rename = "blockNumberDelay")]
    pub number_delay: u64,
    /// Distance in seconds from the previous block's timestamp.
    #[serde(rename = "blockTimestampDelay")]
    pub timestamp_delay: u64,
}

impl BlockDelta {
    /// Draws a delta uniformly from `[1, max]` for both components.
    pub fn random(rng: &mut StdRng, max_number_delay: u64, max_timestamp_delay: u64) -> Self {
        Self {
            number_delay: rng.random_range(1..=max_number_delay.max(1)),
            timestamp_delay: rng.random_range(1..=max_timestamp_delay.max(1)),
        }
    }

    /// The smallest legal delta, used for deployment transactions.
    pub fn minimal() -> Self {
        Self { number_delay: 1, timestamp_delay: 1 }
    }
}

/// The typed ABI view of a call's data.
///
/// When present it authoritatively describes [`CallMessage::data`]:
/// re-encoding the resolved method with these arguments reproduces the raw
/// bytes exactly. Loaded-from-JSON values hold their arguments in encoded
/// form until [`resolve`](Self::resolve) pairs them with a contract ABI.
#[derive(Clone, Debug, PartialEq)]
pub struct CallMessageAbiValues {
    /// The resolved method. Not serialized; re-resolved on load.
    pub method: Option<Function>,
    /// The canonical method signature, e.g. `setX(uint256)`.
    pub method_signature: String,
    /// The typed argument values. Empty until resolved when loaded from
    /// JSON.
    pub args: Vec<alloy_dyn_abi::DynSolValue>,
    /// Encoded argument values awaiting resolution against an ABI.
    raw_args: Option<Vec<serde_json::Value>>,
}

impl CallMessageAbiValues {
    /// Creates a resolved value set for the given method.
    pub fn new(
        method: Function,
        args: Vec<alloy_dyn_abi::DynSolValue>,
    ) -> Result<Self, EncodingError> {
        if method.inputs.len() != args.len() {
            return Err(EncodingError::InvalidValue {
                ty: "arguments".into(),
                msg: format!(
                    "argument count mismatch, expected {} but got {}",
                    method.inputs.len(),
                    args.len()
                ),
            });
        }
        let method_signature = method.signature();
        Ok(Self { method: Some(method), method_signature, args, raw_args: None })
    }

    /// Resolves the method signature and any pending encoded arguments
    /// against the given contract ABI.
    pub fn resolve(&mut self, contract_abi: &JsonAbi) -> Result<(), EncodingError> {
        let method = contract_abi
            .functions()
            .find(|f| f.signature() == self.method_signature)
            .cloned()
            .ok_or_else(|| EncodingError::UnknownMethod(self.method_signature.clone()))?;
        if let Some(raw_args) = self.raw_args.take() {
            self.args = abi::decode_json_arguments(&method.inputs, &raw_args, None)?;
        } else if self.args.len() != method.inputs.len() {
            return Err(EncodingError::UnknownMethod(self.method_signature.clone()));
        }
        self.method = Some(method);
        Ok(())
    }

    /// ABI-encodes the method selector and arguments into calldata.
    pub fn encode_calldata(&self) -> Result<Bytes, EncodingError> {
        let method = self
            .method
            .as_ref()
            .ok_or_else(|| EncodingError::UnknownMethod(self.method_signature.clone()))?;
        use alloy_dyn_abi::JsonAbiExt;
        Ok(method.abi_encode_input(&self.args)?.into())
    }
}

impl Serialize for CallMessageAbiValues {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let Some(method) = &self.method else {
            return Err(S::Error::custom("cannot serialize unresolved ABI call data"));
        };
        let args =
            abi::encode_json_arguments(&method.inputs, &self.args).map_err(S::Error::custom)?;
        let mut state = serializer.serialize_struct("CallMessageAbiValues", 2)?;
        state.serialize_field("methodSignature", &self.method_signature)?;
        state.serialize_field("args", &args)?;
        state.end()
    }
}

impl<'de> Deserialize<'de> for CallMessageAbiValues {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Raw {
            method_signature: String,
            args: Vec<serde_json::Value>,
        }
        let raw = Raw::deserialize(deserializer)?;
        Ok(Self {
            method: None,
            method_signature: raw.method_signature,
            args: Vec::new(),
            raw_args: Some(raw.args),
        })
    }
}

/// A transaction applied to the test chain.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallMessage {
    pub from: Address,
    /// The target account; `None` deploys the data as a new contract.
    pub to: Option<Address>,
    pub nonce: u64,
    pub value: U256,
    pub gas: u64,
    pub gas_price: U256,
    pub gas_fee_cap: U256,
    pub gas_tip_cap: U256,
    pub data: Bytes,
    /// The typed view of `data`, when the call targets a known method.
    #[serde(rename = "dataAbiValues", default, skip_serializing_if = "Option::is_none")]
    pub data_abi: Option<CallMessageAbiValues>,
}

impl CallMessage {
    /// Builds a method call message, encoding the calldata from the typed
    /// arguments.
    pub fn from_abi_call(
        from: Address,
        to: Address,
        gas: u64,
        method: &Function,
        args: Vec<alloy_dyn_abi::DynSolValue>,
    ) -> Result<Self, EncodingError> {
        let data_abi = CallMessageAbiValues::new(method.clone(), args)?;
        let data = data_abi.encode_calldata()?;
        Ok(Self {
            from,
            to: Some(to),
            nonce: 0,
            value: U256::ZERO,
            gas,
            gas_price: U256::ZERO,
            gas_fee_cap: U256::ZERO,
            gas_tip_cap: U256::ZERO,
            data,
            data_abi: Some(data_abi),
        })
    }

    /// Builds a contract creation message.
    pub fn deployment(from: Address, gas: u64, data: Bytes) -> Self {
        Self {
            from,
            to: None,
            nonce: 0,
            value: U256::ZERO,
            gas,
            gas_price: U256::ZERO,
            gas_fee_cap: U256::ZERO,
            gas_tip_cap: U256::ZERO,
            data,
            data_abi: None,
        }
    }

    /// Re-encodes `data` from the typed ABI view after argument mutation,
    /// upholding the invariant that `data_abi` describes `data`.
    pub fn re_encode(&mut self) -> Result<(), EncodingError> {
        if let Some(data_abi) = &self.data_abi {
            self.data = data_abi.encode_calldata()?;
        }
        Ok(())
    }
}

/// One step of a call sequence: the block composition delta and the message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CallSequenceElement {
    #[serde(flatten)]
    pub delta: BlockDelta,
    #[serde(rename = "call")]
    pub message: CallMessage,
    /// Populated during execution; never persisted.
    #[serde(skip)]
    pub execution_result: Option<CallResult>,
}

impl CallSequenceElement {
    pub fn new(message: CallMessage, delta: BlockDelta) -> Self {
        Self { delta, message, execution_result: None }
    }
}

/// An ordered, finite list of calls applied cumulatively to the chain.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallSequence(pub Vec<CallSequenceElement>);

impl Deref for CallSequence {
    type Target = Vec<CallSequenceElement>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for CallSequence {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl CallSequence {
    /// Resolves every element's ABI view against the deployed contract ABIs,
    /// keyed by target address.
    pub fn resolve(&mut self, abis: &BTreeMap<Address, JsonAbi>) -> Result<(), EncodingError> {
        for element in self.0.iter_mut() {
            let Some(data_abi) = &mut element.message.data_abi else { continue };
            let target = element.message.to.ok_or_else(|| {
                EncodingError::UnknownMethod(data_abi.method_signature.clone())
            })?;
            let contract_abi = abis
                .get(&target)
                .ok_or_else(|| EncodingError::UnknownContract(target.to_string()))?;
            data_abi.resolve(contract_abi)?;
        }
        Ok(())
    }

    /// Clears any recorded execution results.
    pub fn clear_results(&mut self) {
        for element in self.0.iter_mut() {
            element.execution_result = None;
        }
    }

    /// A stable content hash of the serialized sequence, used as the corpus
    /// file name.
    pub fn hash(&self) -> Result<B256, serde_json::Error> {
        Ok(keccak256(serde_json::to_vec(self)?))
    }
}
