//! Trace providers supply the agent's view of the execution trace that the game bisects over.

use async_trait::async_trait;
use ethers::types::{Bytes, H256, U256};
use thiserror::Error;

mod alphabet;
pub use alphabet::AlphabetTraceProvider;

pub mod cannon;

/// Errors returned by a [TraceProvider].
#[derive(Debug, Error)]
pub enum TraceError {
    #[error("trace index {index} is beyond the maximum trace length {max_len}")]
    IndexTooLarge { index: u64, max_len: u128 },
    #[error("alphabet trace must not be empty")]
    EmptyTrace,
    #[error("proof at trace index {0} is missing a post hash")]
    ProofMissingPostHash(u64),
    #[error("proof at trace index {0} is missing state data")]
    ProofMissingStateData(u64),
    #[error("proof at trace index {0} is missing proof data")]
    ProofMissingProofData(u64),
    #[error("no proof available for trace index {0}")]
    ProofUnavailable(u64),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("proof generation failed: {0}")]
    Generator(#[source] anyhow::Error),
}

/// Preimage data that the onchain oracle must hold before a step can be executed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PreimageOracleData {
    /// Local keys carry a `0x01` type byte and are loaded from the game's local inputs.
    pub is_local: bool,
    pub key: Bytes,
    pub value: Bytes,
    pub offset: u32,
}

impl PreimageOracleData {
    pub fn new(key: Bytes, value: Bytes, offset: u32) -> Self {
        Self {
            is_local: key.first() == Some(&1),
            key,
            value,
            offset,
        }
    }

    /// The local data identifier: the key without its type byte.
    pub fn ident(&self) -> U256 {
        match self.key.get(1..) {
            Some(ident) if ident.len() <= 32 => U256::from_big_endian(ident),
            _ => U256::zero(),
        }
    }

    /// The preimage without its 8 byte length prefix.
    pub fn preimage_without_size(&self) -> Bytes {
        Bytes::from(self.value.get(8..).unwrap_or_default().to_vec())
    }
}

/// The pre-state, proof and oracle data needed to execute the step into a trace index.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StepProof {
    pub pre_state: Bytes,
    pub proof: Bytes,
    pub oracle_data: Option<PreimageOracleData>,
}

/// The [TraceProvider] trait defines the interface of a source of claims on the execution trace.
///
/// Implementations must satisfy `get(i) == keccak256(get_step_data(i).pre_state)`.
#[async_trait]
pub trait TraceProvider: Send + Sync {
    /// Returns the claim hash committed to at trace index `i`.
    async fn get(&self, i: u64) -> Result<H256, TraceError>;

    /// Returns the state committed to at trace index `i`, along with the proof needed to execute
    /// a single step starting from it.
    async fn get_step_data(&self, i: u64) -> Result<StepProof, TraceError>;

    /// Returns the state that precedes trace index `0`.
    async fn absolute_pre_state(&self) -> Result<Bytes, TraceError>;
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn local_keys() {
        let mut key = vec![1u8; 1];
        key.extend_from_slice(&[0u8; 30]);
        key.push(4);
        let data = PreimageOracleData::new(key.into(), Bytes::from(vec![0xaa]), 8);
        assert!(data.is_local);
        assert_eq!(data.ident(), U256::from(4));
        assert!(data.preimage_without_size().is_empty());

        let mut value = 3u64.to_be_bytes().to_vec();
        value.extend_from_slice(&[7, 8, 9]);
        let sized = PreimageOracleData::new(Bytes::from(vec![2u8; 32]), value.into(), 0);
        assert_eq!(sized.preimage_without_size(), Bytes::from(vec![7, 8, 9]));

        let global = PreimageOracleData::new(Bytes::from(vec![2u8; 32]), Bytes::default(), 0);
        assert!(!global.is_local);
    }
}
