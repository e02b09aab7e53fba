//! Compilation artifact loading.
//!
//! Compilation itself is out of scope: a compiler frontend writes one JSON
//! artifact per contract (ABI, creation bytecode, and optionally the literal
//! values it saw in the source) and the fuzzer consumes them from the
//! configured artifacts directory.

use crate::values::ValueSet;
use alloy_json_abi::JsonAbi;
use alloy_primitives::{Address, Bytes, U256};
use serde::{Deserialize, Serialize};
use std::{
    io,
    path::{Path, PathBuf},
};

/// Errors raised while loading compilation artifacts. Fatal during
/// initialization.
#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("failed to read artifacts directory {path:?}: {source}")]
    ReadDir { source: io::Error, path: PathBuf },
    #[error("failed to read artifact {path:?}: {source}")]
    Read { source: io::Error, path: PathBuf },
    #[error("failed to parse artifact {path:?}: {source}")]
    Parse { source: serde_json::Error, path: PathBuf },
    #[error("deployment order references unknown contract {0}")]
    UnknownContract(String),
}

/// Literal values harvested from a contract's source during compilation.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ArtifactLiterals {
    pub integers: Vec<U256>,
    pub strings: Vec<String>,
    pub bytes: Vec<Bytes>,
    pub addresses: Vec<Address>,
}

/// One compiled contract.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractArtifact {
    pub name: String,
    pub abi: JsonAbi,
    /// Creation bytecode; constructor arguments are appended at deployment.
    pub bytecode: Bytes,
    /// Source literal pool, when the frontend provides one.
    #[serde(default)]
    pub literals: ArtifactLiterals,
}

/// A contract deployed on the base chain during initialization.
#[derive(Clone, Debug)]
pub struct DeployedContract {
    pub name: String,
    pub address: Address,
    pub abi: JsonAbi,
}

/// The artifact set a campaign fuzzes against.
#[derive(Clone, Debug, Default)]
pub struct CompilationArtifacts {
    pub contracts: Vec<ContractArtifact>,
}

impl CompilationArtifacts {
    /// Creates an artifact set from already-loaded contracts.
    pub fn new(contracts: Vec<ContractArtifact>) -> Self {
        Self { contracts }
    }

    /// Loads every `*.json` artifact in the directory, in file name order so
    /// the resulting set is deterministic.
    pub fn load_directory(path: impl AsRef<Path>) -> Result<Self, ArtifactError> {
        let path = path.as_ref();
        let entries = std::fs::read_dir(path)
            .map_err(|source| ArtifactError::ReadDir { source, path: path.to_path_buf() })?;

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .collect();
        files.sort();

        let mut contracts = Vec::with_capacity(files.len());
        for file in files {
            let contents = std::fs::read_to_string(&file)
                .map_err(|source| ArtifactError::Read { source, path: file.clone() })?;
            let artifact: ContractArtifact = serde_json::from_str(&contents)
                .map_err(|source| ArtifactError::Parse { source, path: file.clone() })?;
            debug!(contract = %artifact.name, path = %file.display(), "loaded artifact");
            contracts.push(artifact);
        }
        Ok(Self { contracts })
    }

    /// Looks up an artifact by contract name.
    pub fn get(&self, name: &str) -> Option<&ContractArtifact> {
        self.contracts.iter().find(|c| c.name == name)
    }

    /// Seeds a value set from every artifact: the declared literal pools,
    /// constants pushed by the creation bytecode, and method selectors.
    pub fn seed_value_set(&self, values: &mut ValueSet) {
        for artifact in &self.contracts {
            for integer in &artifact.literals.integers {
                values.add_integer(*integer);
            }
            for string in &artifact.literals.strings {
                values.add_string(string.clone());
            }
            for bytes in &artifact.literals.bytes {
                values.add_bytes(bytes.to_vec());
            }
            for address in &artifact.literals.addresses {
                values.add_address(*address);
            }
            for constant in collect_push_constants(&artifact.bytecode) {
                values.add_integer(constant);
            }
            for function in artifact.abi.functions() {
                values.add_bytes(function.selector().to_vec());
            }
        }
    }
}

/// The maximum number of bytecode bytes scanned for push constants, limiting
/// the cost of arbitrarily large deployments.
const PUSH_ANALYSIS_LIMIT: usize = 24 * 1024;

const OP_PUSH1: u8 = 0x60;
const OP_PUSH32: u8 = 0x7F;

/// Collects the immediate operands of PUSH instructions from bytecode,
/// together with the values one above and one below each.
pub fn collect_push_constants(code: &[u8]) -> Vec<U256> {
    let mut constants = Vec::new();
    let mut i = 0;
    while i < code.len().min(PUSH_ANALYSIS_LIMIT) {
        let op = code[i];
        if (OP_PUSH1..=OP_PUSH32).contains(&op) {
            let push_size = (op - OP_PUSH1 + 1) as usize;
            let start = i + 1;
            let end = start + push_size;
            if end > code.len() {
                // Truncated push at the end of malformed bytecode.
                break;
            }
            let value = U256::from_be_slice(&code[start..end]);
            constants.push(value);
            if value != U256::ZERO {
                constants.push(value - U256::ONE);
            }
            if value != U256::MAX {
                constants.push(value + U256::ONE);
            }
            i += push_size;
        }
        i += 1;
    }
    constants
}
