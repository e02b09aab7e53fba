//! # cinder-config
//!
//! Project configuration for cinder fuzzing campaigns.
//!
//! The configuration is a single JSON document split into a `fuzzing` section
//! (campaign parameters) and a `compilation` section (where to find the
//! compiled contract artifacts). Field names are part of the stable on-disk
//! interface and must not change.

#[macro_use]
extern crate tracing;

use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

mod error;
pub use error::ConfigError;

mod fuzzing;
pub use fuzzing::{
    AssertionTestingConfig, ChainConfig, FuzzingConfig, PropertyTestingConfig, TestingConfig,
};

pub mod utils;

/// Top level project configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectConfig {
    /// Parameters of the fuzzing campaign.
    pub fuzzing: FuzzingConfig,
    /// Where compiled contract artifacts are read from.
    pub compilation: CompilationConfig,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self { fuzzing: FuzzingConfig::default(), compilation: CompilationConfig::default() }
    }
}

impl ProjectConfig {
    /// Reads a JSON-serialized [`ProjectConfig`] from the provided file path.
    pub fn read(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        debug!(path = %path.display(), "reading project configuration");
        let contents =
            fs::read_to_string(path).map_err(|source| ConfigError::read(source, path))?;
        serde_json::from_str(&contents).map_err(|source| ConfigError::parse(source, path))
    }

    /// Writes the configuration to the provided path as pretty-printed JSON.
    pub fn write(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let contents = serde_json::to_string_pretty(self)
            .map_err(|source| ConfigError::parse(source, path))?;
        fs::write(path, contents).map_err(|source| ConfigError::write(source, path))
    }

    /// Validates that the configuration meets the fuzzer's requirements.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.fuzzing.validate()
    }
}

/// Configuration of the (external) compilation step.
///
/// Compilation itself is not performed by cinder; the fuzzer consumes the
/// artifact JSON files a compiler frontend places in `artifacts_directory`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompilationConfig {
    /// Directory containing one artifact JSON file per contract.
    pub artifacts_directory: std::path::PathBuf,
}

impl Default for CompilationConfig {
    fn default() -> Self {
        Self { artifacts_directory: "artifacts".into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        ProjectConfig::default().validate().unwrap();
    }

    #[test]
    fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cinder.json");

        let config = ProjectConfig::default();
        config.write(&path).unwrap();
        let loaded = ProjectConfig::read(&path).unwrap();
        assert_eq!(config, loaded);
    }

    #[test]
    fn stable_field_names() {
        let json = serde_json::to_value(ProjectConfig::default()).unwrap();
        let fuzzing = &json["fuzzing"];
        for field in [
            "workers",
            "workerResetLimit",
            "timeout",
            "testLimit",
            "callSequenceLength",
            "corpusDirectory",
            "coverageEnabled",
            "deploymentOrder",
            "constructorArgs",
            "deployerAddress",
            "senderAddresses",
            "blockNumberDelayMax",
            "blockTimestampDelayMax",
            "blockGasLimit",
            "transactionGasLimit",
            "testing",
            "chainConfig",
        ] {
            assert!(!fuzzing[field].is_null() || fuzzing.get(field).is_some(), "missing {field}");
        }
        assert!(json["fuzzing"]["testing"]["propertyTesting"]["testPrefixes"].is_array());
        assert!(json["compilation"]["artifactsDirectory"].is_string());
    }
}
