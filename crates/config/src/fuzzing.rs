//! Configuration for fuzzing campaigns.

use crate::{utils, ConfigError};
use alloy_primitives::U256;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, path::PathBuf};

/// Describes the parameters of a fuzzing campaign.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FuzzingConfig {
    /// The number of worker threads to use in fuzzing campaigns.
    pub workers: usize,
    /// How many call sequences a worker tests before its chain clone is
    /// recreated to release accumulated memory.
    pub worker_reset_limit: usize,
    /// A time in seconds for which the campaign should run. Zero or negative
    /// values disable the timeout.
    pub timeout: i64,
    /// A threshold for the number of calls to test before exiting. Zero
    /// disables the limit.
    pub test_limit: u64,
    /// The maximum length a generated call sequence can be.
    pub call_sequence_length: usize,
    /// The folder holding the corpus. If unset, the corpus is kept in memory
    /// only and never flushed to disk.
    #[serde(default)]
    pub corpus_directory: Option<PathBuf>,
    /// Whether to use coverage-guided fuzzing.
    pub coverage_enabled: bool,
    /// The order in which contracts are deployed during chain setup.
    pub deployment_order: Vec<String>,
    /// Constructor arguments per contract, keyed by argument name.
    ///
    /// A string value of the form `DeployedContract:<Name>` resolves to the
    /// address of the already-deployed contract `<Name>`.
    #[serde(default)]
    pub constructor_args: BTreeMap<String, BTreeMap<String, serde_json::Value>>,
    /// The account used to deploy contracts.
    pub deployer_address: String,
    /// Accounts used to send fuzzed transactions.
    pub sender_addresses: Vec<String>,
    /// The maximum block number distance between two generated blocks.
    #[serde(rename = "blockNumberDelayMax")]
    pub block_number_delay_max: u64,
    /// The maximum timestamp distance between two generated blocks.
    #[serde(rename = "blockTimestampDelayMax")]
    pub block_timestamp_delay_max: u64,
    /// The maximum amount of gas a block's transactions can use.
    pub block_gas_limit: u64,
    /// The gas limit attached to fuzzer-generated transactions.
    pub transaction_gas_limit: u64,
    /// Optional seed for the campaign RNG; derived from entropy when unset.
    #[serde(default)]
    pub seed: Option<u64>,
    /// The maximum number of candidate replays the shrinker may perform per
    /// failing sequence.
    pub shrink_limit: u64,
    /// Wall-clock budget for shrinking one failing sequence, in seconds.
    pub shrink_timeout: u64,
    /// Configuration of the testing strategies.
    pub testing: TestingConfig,
    /// Configuration of the underlying test chain.
    pub chain_config: ChainConfig,
}

impl Default for FuzzingConfig {
    fn default() -> Self {
        Self {
            workers: 10,
            worker_reset_limit: 50,
            timeout: 0,
            test_limit: 0,
            call_sequence_length: 100,
            corpus_directory: None,
            coverage_enabled: true,
            deployment_order: Vec::new(),
            constructor_args: BTreeMap::new(),
            deployer_address: "0x30000".into(),
            sender_addresses: vec!["0x10000".into(), "0x20000".into(), "0x30000".into()],
            block_number_delay_max: 60_480,
            block_timestamp_delay_max: 604_800,
            block_gas_limit: 125_000_000,
            transaction_gas_limit: 12_500_000,
            seed: None,
            shrink_limit: 5_000,
            shrink_timeout: 300,
            testing: TestingConfig::default(),
            chain_config: ChainConfig::default(),
        }
    }
}

impl FuzzingConfig {
    /// Validates that the campaign parameters meet the fuzzer's requirements.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::validation("the worker count must be a positive number"));
        }
        if self.call_sequence_length == 0 {
            return Err(ConfigError::validation(
                "the call sequence length must be a positive number",
            ));
        }
        if self.worker_reset_limit == 0 {
            return Err(ConfigError::validation(
                "the worker reset limit must be a positive number",
            ));
        }
        if self.block_gas_limit == 0 || self.transaction_gas_limit == 0 {
            return Err(ConfigError::validation(
                "the block and transaction gas limits must be non-zero",
            ));
        }
        if self.block_gas_limit < self.transaction_gas_limit {
            return Err(ConfigError::validation(
                "the block gas limit must not be less than the transaction gas limit",
            ));
        }
        if self.block_number_delay_max == 0 || self.block_timestamp_delay_max == 0 {
            return Err(ConfigError::validation(
                "the block number and timestamp delay maximums must be non-zero",
            ));
        }
        utils::parse_address(&self.deployer_address)
            .map_err(|e| ConfigError::validation(format!("deployer address: {e}")))?;
        if self.sender_addresses.is_empty() {
            return Err(ConfigError::validation("at least one sender address is required"));
        }
        utils::parse_addresses(&self.sender_addresses)
            .map_err(|e| ConfigError::validation(format!("sender addresses: {e}")))?;
        if self.testing.property_testing.enabled
            && self.testing.property_testing.test_prefixes.is_empty()
        {
            return Err(ConfigError::validation(
                "test name prefixes must be supplied when property testing is enabled",
            ));
        }
        Ok(())
    }
}

/// Configuration of the testing strategies applied during fuzzing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestingConfig {
    /// Whether the fuzzer should stop after the first failed test.
    pub stop_on_failed_test: bool,
    /// Whether the fuzzer should stop when deployed bytecode cannot be
    /// matched back to a known contract.
    pub stop_on_failed_contract_matching: bool,
    /// Whether all contracts should be tested, including dynamically
    /// deployed ones, rather than only those in the deployment order.
    pub test_all_contracts: bool,
    /// Whether an execution trace is attached to every element of a
    /// finalized shrunken call sequence.
    pub trace_all: bool,
    /// Configuration of assertion testing.
    pub assertion_testing: AssertionTestingConfig,
    /// Configuration of property testing.
    pub property_testing: PropertyTestingConfig,
}

impl Default for TestingConfig {
    fn default() -> Self {
        Self {
            stop_on_failed_test: true,
            stop_on_failed_contract_matching: true,
            test_all_contracts: false,
            trace_all: false,
            assertion_testing: AssertionTestingConfig::default(),
            property_testing: PropertyTestingConfig::default(),
        }
    }
}

/// Configuration of assertion testing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssertionTestingConfig {
    /// Whether assertion testing is enabled.
    pub enabled: bool,
    /// Whether constant/pure/view methods should be tested.
    pub test_view_methods: bool,
}

impl Default for AssertionTestingConfig {
    fn default() -> Self {
        Self { enabled: false, test_view_methods: false }
    }
}

/// Configuration of property testing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyTestingConfig {
    /// Whether property testing is enabled.
    pub enabled: bool,
    /// Method name prefixes marking a contract method as a property test.
    pub test_prefixes: Vec<String>,
}

impl Default for PropertyTestingConfig {
    fn default() -> Self {
        Self { enabled: true, test_prefixes: vec!["property_".into()] }
    }
}

/// Configuration of the test chain a campaign runs against.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainConfig {
    /// Block number of the genesis block.
    pub initial_block_number: u64,
    /// Timestamp of the genesis block.
    pub initial_timestamp: u64,
    /// Base fee carried by generated blocks.
    pub initial_base_fee: U256,
    /// Balance funded to the deployer and sender accounts at genesis.
    pub initial_balance: U256,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            initial_block_number: 1,
            initial_timestamp: 1,
            initial_base_fee: U256::ZERO,
            initial_balance: U256::from(1u128) << 100,
        }
    }
}
