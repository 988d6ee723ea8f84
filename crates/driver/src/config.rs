//! The `config` module contains the [Config] of the challenger agent.

use ethers::types::Address;
use op_toolkit_solvers::trace::cannon::CannonConfig;
use std::{path::PathBuf, str::FromStr, time::Duration};
use thiserror::Error;

/// The default snapshot frequency of the cannon VM, in steps.
pub const DEFAULT_CANNON_SNAPSHOT_FREQ: u64 = 1_000_000_000;
/// The default info log frequency of the cannon VM, in steps.
pub const DEFAULT_CANNON_INFO_FREQ: u64 = 10_000_000;

/// The source of the agent's view of the execution trace.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum TraceType {
    #[default]
    Alphabet,
    Cannon,
}

impl FromStr for TraceType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "alphabet" => Ok(TraceType::Alphabet),
            "cannon" => Ok(TraceType::Cannon),
            other => Err(ConfigError::UnknownTraceType(other.to_string())),
        }
    }
}

/// Invalid [Config] values.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unknown trace type: {0}")]
    UnknownTraceType(String),
    #[error("missing l1 eth rpc url")]
    MissingL1EthRpc,
    #[error("missing game factory address")]
    MissingGameFactoryAddress,
    #[error("missing datadir")]
    MissingDatadir,
    #[error("max concurrency must not be 0")]
    MaxConcurrencyZero,
    #[error("missing private key")]
    MissingPrivateKey,
    #[error("missing alphabet trace")]
    MissingAlphabetTrace,
    #[error("missing cannon bin")]
    MissingCannonBin,
    #[error("missing cannon server")]
    MissingCannonServer,
    #[error("missing cannon absolute pre-state")]
    MissingCannonAbsolutePreState,
    #[error("missing cannon L2")]
    MissingCannonL2,
    #[error("missing cannon rollup config")]
    MissingCannonRollupConfig,
    #[error("missing cannon L2 genesis")]
    MissingCannonL2Genesis,
    #[error("only specify one of network or rollup config path")]
    CannonNetworkAndRollupConfig,
    #[error("only specify one of network or l2 genesis path")]
    CannonNetworkAndL2Genesis,
    #[error("cannon snapshot frequency must not be 0")]
    MissingCannonSnapshotFreq,
    #[error("cannon info frequency must not be 0")]
    MissingCannonInfoFreq,
}

/// The [Config] struct contains the configuration of the challenger agent.
#[derive(Debug, Clone)]
pub struct Config {
    /// The RPC endpoint of the L1 node used to read games and send transactions.
    pub l1_eth_rpc: String,
    /// The address of the dispute game factory contract.
    pub game_factory_address: Address,
    /// Only these games are played when non-empty.
    pub game_allowlist: Vec<Address>,
    /// Games created longer ago than this are ignored.
    pub game_window: Duration,
    pub agree_with_proposed_output: bool,
    pub trace_type: TraceType,
    pub alphabet_trace: Option<String>,
    pub cannon: CannonConfig,
    /// The directory game data is written to.
    pub datadir: PathBuf,
    pub max_concurrency: usize,
    pub poll_interval: Duration,
    /// Hex encoded private key of the account that submits moves.
    pub private_key: String,
    pub tx_confirmations: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            l1_eth_rpc: String::new(),
            game_factory_address: Address::zero(),
            game_allowlist: Vec::new(),
            game_window: Duration::from_secs(7 * 24 * 60 * 60),
            agree_with_proposed_output: false,
            trace_type: TraceType::Alphabet,
            alphabet_trace: None,
            cannon: CannonConfig {
                snapshot_freq: DEFAULT_CANNON_SNAPSHOT_FREQ,
                info_freq: DEFAULT_CANNON_INFO_FREQ,
                ..Default::default()
            },
            datadir: PathBuf::new(),
            max_concurrency: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            poll_interval: Duration::from_secs(12),
            private_key: String::new(),
            tx_confirmations: 1,
        }
    }
}

impl Config {
    /// Validates the configuration.
    pub fn check(&self) -> Result<(), ConfigError> {
        if self.l1_eth_rpc.is_empty() {
            return Err(ConfigError::MissingL1EthRpc);
        }
        if self.game_factory_address.is_zero() {
            return Err(ConfigError::MissingGameFactoryAddress);
        }
        if self.datadir.as_os_str().is_empty() {
            return Err(ConfigError::MissingDatadir);
        }
        if self.max_concurrency == 0 {
            return Err(ConfigError::MaxConcurrencyZero);
        }
        if self.private_key.is_empty() {
            return Err(ConfigError::MissingPrivateKey);
        }
        match self.trace_type {
            TraceType::Alphabet => {
                if self.alphabet_trace.as_deref().unwrap_or_default().is_empty() {
                    return Err(ConfigError::MissingAlphabetTrace);
                }
            }
            TraceType::Cannon => self.check_cannon()?,
        }
        Ok(())
    }

    fn check_cannon(&self) -> Result<(), ConfigError> {
        let cannon = &self.cannon;
        if cannon.bin.as_os_str().is_empty() {
            return Err(ConfigError::MissingCannonBin);
        }
        if cannon.server.as_os_str().is_empty() {
            return Err(ConfigError::MissingCannonServer);
        }
        match cannon.network {
            None => {
                if cannon.rollup_config.is_none() {
                    return Err(ConfigError::MissingCannonRollupConfig);
                }
                if cannon.l2_genesis.is_none() {
                    return Err(ConfigError::MissingCannonL2Genesis);
                }
            }
            Some(_) => {
                if cannon.rollup_config.is_some() {
                    return Err(ConfigError::CannonNetworkAndRollupConfig);
                }
                if cannon.l2_genesis.is_some() {
                    return Err(ConfigError::CannonNetworkAndL2Genesis);
                }
            }
        }
        if cannon.prestate.as_os_str().is_empty() {
            return Err(ConfigError::MissingCannonAbsolutePreState);
        }
        if cannon.l2_rpc.is_empty() {
            return Err(ConfigError::MissingCannonL2);
        }
        if cannon.snapshot_freq == 0 {
            return Err(ConfigError::MissingCannonSnapshotFreq);
        }
        if cannon.info_freq == 0 {
            return Err(ConfigError::MissingCannonInfoFreq);
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn valid_alphabet() -> Config {
        Config {
            l1_eth_rpc: "http://localhost:8545".to_string(),
            game_factory_address: Address::repeat_byte(0xfa),
            alphabet_trace: Some("abcdefgh".to_string()),
            datadir: "/tmp/challenger".into(),
            private_key: "0x01".to_string(),
            ..Default::default()
        }
    }

    fn valid_cannon() -> Config {
        let mut config = valid_alphabet();
        config.trace_type = TraceType::Cannon;
        config.alphabet_trace = None;
        config.cannon.bin = "./bin/cannon".into();
        config.cannon.server = "./bin/op-program".into();
        config.cannon.prestate = "./pre.json".into();
        config.cannon.l2_rpc = "http://localhost:9545".to_string();
        config.cannon.network = Some("goerli".to_string());
        config
    }

    #[test]
    fn valid_configs() {
        assert_eq!(valid_alphabet().check(), Ok(()));
        assert_eq!(valid_cannon().check(), Ok(()));
    }

    #[test]
    fn common_fields_are_required() {
        let mut config = valid_alphabet();
        config.l1_eth_rpc.clear();
        assert_eq!(config.check(), Err(ConfigError::MissingL1EthRpc));

        let mut config = valid_alphabet();
        config.game_factory_address = Address::zero();
        assert_eq!(config.check(), Err(ConfigError::MissingGameFactoryAddress));

        let mut config = valid_alphabet();
        config.datadir = PathBuf::new();
        assert_eq!(config.check(), Err(ConfigError::MissingDatadir));

        let mut config = valid_alphabet();
        config.max_concurrency = 0;
        assert_eq!(config.check(), Err(ConfigError::MaxConcurrencyZero));

        let mut config = valid_alphabet();
        config.alphabet_trace = Some(String::new());
        assert_eq!(config.check(), Err(ConfigError::MissingAlphabetTrace));
    }

    #[test]
    fn cannon_fields_are_required() {
        let mut config = valid_cannon();
        config.cannon.bin = PathBuf::new();
        assert_eq!(config.check(), Err(ConfigError::MissingCannonBin));

        let mut config = valid_cannon();
        config.cannon.server = PathBuf::new();
        assert_eq!(config.check(), Err(ConfigError::MissingCannonServer));

        let mut config = valid_cannon();
        config.cannon.prestate = PathBuf::new();
        assert_eq!(config.check(), Err(ConfigError::MissingCannonAbsolutePreState));

        let mut config = valid_cannon();
        config.cannon.l2_rpc.clear();
        assert_eq!(config.check(), Err(ConfigError::MissingCannonL2));

        let mut config = valid_cannon();
        config.cannon.snapshot_freq = 0;
        assert_eq!(config.check(), Err(ConfigError::MissingCannonSnapshotFreq));

        let mut config = valid_cannon();
        config.cannon.info_freq = 0;
        assert_eq!(config.check(), Err(ConfigError::MissingCannonInfoFreq));
    }

    #[test]
    fn cannon_network_or_custom_chain() {
        let mut config = valid_cannon();
        config.cannon.rollup_config = Some("rollup.json".into());
        assert_eq!(config.check(), Err(ConfigError::CannonNetworkAndRollupConfig));

        let mut config = valid_cannon();
        config.cannon.l2_genesis = Some("genesis.json".into());
        assert_eq!(config.check(), Err(ConfigError::CannonNetworkAndL2Genesis));

        let mut config = valid_cannon();
        config.cannon.network = None;
        assert_eq!(config.check(), Err(ConfigError::MissingCannonRollupConfig));
        config.cannon.rollup_config = Some("rollup.json".into());
        assert_eq!(config.check(), Err(ConfigError::MissingCannonL2Genesis));
        config.cannon.l2_genesis = Some("genesis.json".into());
        assert_eq!(config.check(), Ok(()));
    }

    #[test]
    fn parses_trace_type() {
        assert_eq!("alphabet".parse::<TraceType>(), Ok(TraceType::Alphabet));
        assert_eq!("cannon".parse::<TraceType>(), Ok(TraceType::Cannon));
        assert_eq!(
            "asterisc".parse::<TraceType>(),
            Err(ConfigError::UnknownTraceType("asterisc".to_string()))
        );
    }
}
