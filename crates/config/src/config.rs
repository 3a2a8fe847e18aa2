use std::{fs, io, path::Path};

use serde::{Deserialize, Serialize};
use tessera_consensus_logic::block_assembly::AuthoringConfig;
use tessera_mempool::PoolConfig;
use tessera_primitives::params::{ConsensusParams, OrphanPolicy, Params, RunParams, SealRule};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(#[from] io::Error),

    #[error("parse: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub consensus: ConsensusParams,

    #[serde(default)]
    pub run: RunParams,

    #[serde(default)]
    pub authoring: AuthoringConfig,

    #[serde(default)]
    pub pool: PoolConfig,
}

impl Config {
    /// Parses a config from TOML and checks it's usable.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config = toml::from_str::<Config>(s)?;
        config.check_well_formed()?;
        Ok(config)
    }

    /// Splits out the parameters the chain core runs with.
    pub fn params(&self) -> Params {
        Params {
            consensus: self.consensus.clone(),
            run: self.run.clone(),
        }
    }

    /// Checks the values that parse fine but would make the chain unusable.
    pub fn check_well_formed(&self) -> Result<(), ConfigError> {
        match &self.consensus.seal_rule {
            SealRule::WorkThreshold { min_difficulty } if *min_difficulty == 0 => {
                return Err(invalid("min_difficulty must be nonzero"));
            }
            SealRule::Authority { authorities, .. } if authorities.is_empty() => {
                return Err(invalid("authority rule needs at least one authority"));
            }
            _ => {}
        }

        if self.consensus.max_block_extrinsics == 0 {
            return Err(invalid("max_block_extrinsics must be nonzero"));
        }

        if self.run.finality_depth == 0 {
            return Err(invalid("finality_depth must be nonzero"));
        }

        if let OrphanPolicy::Hold { capacity: 0 } = self.run.orphan_policy {
            return Err(invalid("orphan capacity must be nonzero, use \"drop\" instead"));
        }

        if self.authoring.max_attempts == 0 {
            return Err(invalid("authoring max_attempts must be nonzero"));
        }

        if self.pool.max_extrinsic_size as u64 > self.consensus.max_extrinsic_size as u64 {
            return Err(invalid("pool max_extrinsic_size above consensus limit"));
        }

        Ok(())
    }
}

fn invalid(s: &str) -> ConfigError {
    ConfigError::Invalid(s.to_owned())
}

/// Reads and checks a config file.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let config_str = fs::read_to_string(path)?;
    Config::from_toml_str(&config_str)
}
