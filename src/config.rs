//! Suite manifest and run configuration.
//!
//! ```toml
//! execution = "concurrent"
//! timeout_secs = 30
//!
//! [[suite]]
//! name = "CryptoNight"
//! variant = "cryptonight"
//! fixture = "cryptonight.txt"
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::hasher::Variant;
use crate::runner::{check_unique_names, DuplicateSuite, ExecutionPolicy};
use crate::suite::{
    DispatchMode, MalformedPolicy, SuiteDefinition, SuiteOptions, DEFAULT_MAX_IN_FLIGHT,
    DEFAULT_TIMEOUT,
};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read manifest {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot parse manifest {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error(transparent)]
    DuplicateSuite(#[from] DuplicateSuite),

    #[error("suite '{suite}': seed is not hex: {source}")]
    InvalidSeed {
        suite: String,
        #[source]
        source: hex::FromHexError,
    },

    #[error("{0}")]
    Invalid(String),
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT.as_secs()
}

fn default_max_in_flight() -> usize {
    DEFAULT_MAX_IN_FLIGHT
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    #[serde(default)]
    pub execution: ExecutionPolicy,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    #[serde(default)]
    pub malformed: MalformedPolicy,
    #[serde(rename = "suite", default)]
    pub suites: Vec<SuiteEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SuiteEntry {
    pub name: String,
    pub variant: Variant,
    /// Relative paths resolve against the manifest's directory.
    pub fixture: PathBuf,
    #[serde(default)]
    pub mode: DispatchMode,
    pub seed: Option<String>,
    pub tuning: Option<u32>,
}

impl SuiteEntry {
    fn into_definition(self, base: &Path) -> Result<SuiteDefinition, ConfigError> {
        let fixture = if self.fixture.is_absolute() {
            self.fixture
        } else {
            base.join(&self.fixture)
        };

        let seed = match self.seed.as_deref() {
            Some(text) => Some(parse_seed(text).map_err(|source| ConfigError::InvalidSeed {
                suite: self.name.clone(),
                source,
            })?),
            None => None,
        };

        build_definition(self.name, fixture, self.variant, self.mode, seed, self.tuning)
    }
}

/// Hex seed, with or without a `0x` prefix.
pub fn parse_seed(text: &str) -> Result<Vec<u8>, hex::FromHexError> {
    let text = text.trim();
    hex::decode(text.strip_prefix("0x").unwrap_or(text))
}

/// Validated definition for one suite.
pub fn build_definition(
    name: String,
    fixture: PathBuf,
    variant: Variant,
    mode: DispatchMode,
    seed: Option<Vec<u8>>,
    tuning: Option<u32>,
) -> Result<SuiteDefinition, ConfigError> {
    if name.trim().is_empty() {
        return Err(ConfigError::Invalid("suite name must not be empty".to_string()));
    }
    if variant.requires_seed() && seed.as_ref().map_or(true, Vec::is_empty) {
        return Err(ConfigError::Invalid(format!(
            "suite '{}': variant {} requires a seed",
            name, variant
        )));
    }

    let mut definition = SuiteDefinition::new(name, fixture, variant).with_mode(mode);
    if let Some(seed) = seed {
        definition = definition.with_seed(seed);
    }
    if let Some(tuning) = tuning {
        definition = definition.with_tuning(tuning);
    }
    Ok(definition)
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Validate and turn into a runnable configuration. Relative fixture
    /// paths are joined onto `base`.
    pub fn resolve(self, base: &Path) -> Result<RunConfig, ConfigError> {
        if self.suites.is_empty() {
            return Err(ConfigError::Invalid("manifest defines no suites".to_string()));
        }

        let suites = self
            .suites
            .into_iter()
            .map(|entry| entry.into_definition(base))
            .collect::<Result<Vec<_>, _>>()?;

        let config = RunConfig {
            suites,
            options: SuiteOptions {
                timeout: Duration::from_secs(self.timeout_secs),
                max_in_flight: self.max_in_flight,
                malformed: self.malformed,
            },
            execution: self.execution,
        };
        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    pub suites: Vec<SuiteDefinition>,
    pub options: SuiteOptions,
    pub execution: ExecutionPolicy,
}

impl RunConfig {
    /// A single ad hoc suite with default options.
    pub fn single(definition: SuiteDefinition) -> Self {
        Self {
            suites: vec![definition],
            options: SuiteOptions::default(),
            execution: ExecutionPolicy::default(),
        }
    }

    /// Load a manifest file, resolving fixtures next to it.
    pub fn from_manifest(path: &Path) -> Result<Self, ConfigError> {
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        Manifest::load(path)?.resolve(base)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.options.timeout.is_zero() {
            return Err(ConfigError::Invalid("timeout must be positive".to_string()));
        }
        if self.options.max_in_flight == 0 {
            return Err(ConfigError::Invalid("max_in_flight must be at least 1".to_string()));
        }
        check_unique_names(&self.suites)?;
        Ok(())
    }
}
