use crate::pcn::{FeePolicy, HashAlgorithm};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::{fs::File, io::BufReader, path::Path};
use tracing::debug;

/// The default close fee, 10% of every settled balance.
pub const DEFAULT_CLOSE_FEE_RATE_MILLIONTHS: u64 = 100_000;
/// Blocks a node gets to react to its downstream outcome before its own contract expires.
pub const DEFAULT_BLOCKS_PER_HOP: u64 = 1;
/// Blocks from route construction until the contract of the last hop expires.
pub const DEFAULT_FINAL_EXPIRY_DELTA: u64 = 10;
pub const DEFAULT_DISPUTE_WINDOW: u64 = 6;
pub const DEFAULT_BASE_FEE: u64 = 1;
pub const DEFAULT_INITIAL_LEDGER_BALANCE: u64 = 1_000;

/// Parameters of one simulation run. Every field is optional in YAML.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub close_fee_rate_millionths: u64,
    pub blocks_per_hop: u64,
    pub final_expiry_delta: u64,
    pub dispute_window: u64,
    pub default_base_fee: u64,
    pub default_fee_proportional_millionths: u64,
    /// Zero disables griefing penalties.
    pub penalty_rate_millionths: u64,
    pub hash_algorithm: HashAlgorithm,
    pub initial_ledger_balance: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            close_fee_rate_millionths: DEFAULT_CLOSE_FEE_RATE_MILLIONTHS,
            blocks_per_hop: DEFAULT_BLOCKS_PER_HOP,
            final_expiry_delta: DEFAULT_FINAL_EXPIRY_DELTA,
            dispute_window: DEFAULT_DISPUTE_WINDOW,
            default_base_fee: DEFAULT_BASE_FEE,
            default_fee_proportional_millionths: 0,
            penalty_rate_millionths: 0,
            hash_algorithm: HashAlgorithm::default(),
            initial_ledger_balance: DEFAULT_INITIAL_LEDGER_BALANCE,
        }
    }
}

impl SimulationConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let config: Self = serde_yaml::from_reader(BufReader::new(file))?;
        debug!("Loaded simulation config from {:?}: {:?}", path, config);
        Ok(config)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn default_fee_policy(&self) -> FeePolicy {
        FeePolicy::new(
            u128::from(self.default_base_fee),
            u128::from(self.default_fee_proportional_millionths),
        )
    }

    pub fn close_fee_rate(&self) -> u128 {
        u128::from(self.close_fee_rate_millionths)
    }

    pub fn penalty_rate(&self) -> u128 {
        u128::from(self.penalty_rate_millionths)
    }

    pub fn initial_balance(&self) -> u128 {
        u128::from(self.initial_ledger_balance)
    }
}
