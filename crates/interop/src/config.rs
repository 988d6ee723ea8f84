use ethers::types::U256;
use std::{collections::HashMap, str::FromStr};
use thiserror::Error;

/// Errors returned while parsing the peer chain list.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PeersError {
    #[error("peer entry `{0}` is not of the form `chain_id=url`")]
    Malformed(String),
    #[error("peer entry `{0}` has an invalid chain id")]
    InvalidChainId(String),
    #[error("chain {0} is listed more than once")]
    Duplicate(U256),
}

/// The RPC endpoints of the peer chains in the dependency set, keyed by chain id.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PeerRpcs(pub HashMap<U256, String>);

impl FromStr for PeerRpcs {
    type Err = PeersError;

    /// Parses a comma separated list of `chain_id=url` entries.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut peers = HashMap::new();
        for entry in s.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (chain_id, url) = entry
                .split_once('=')
                .map(|(id, url)| (id.trim(), url.trim()))
                .filter(|(id, url)| !id.is_empty() && !url.is_empty())
                .ok_or_else(|| PeersError::Malformed(entry.to_string()))?;
            let chain_id = U256::from_dec_str(chain_id)
                .map_err(|_| PeersError::InvalidChainId(entry.to_string()))?;
            if peers.insert(chain_id, url.to_string()).is_some() {
                return Err(PeersError::Duplicate(chain_id));
            }
        }
        Ok(Self(peers))
    }
}
