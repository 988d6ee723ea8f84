//! The alphabet module contains a [TraceProvider] over a short string, used to play the
//! alphabet fault dispute game.

use super::{StepProof, TraceError, TraceProvider};
use async_trait::async_trait;
use ethers::{
    abi::{self, Token},
    types::{Bytes, H256, U256},
    utils::keccak256,
};

/// The absolute pre-state of the alphabet game, the character before `'a'`.
const ABSOLUTE_PRESTATE: u8 = 0x60;

/// An [AlphabetTraceProvider] treats each character of a string as one state of the execution
/// trace. Indices past the end of the string repeat the last character.
#[derive(Debug, Clone)]
pub struct AlphabetTraceProvider {
    state: Vec<u8>,
    depth: u32,
}

impl AlphabetTraceProvider {
    pub fn new(state: impl AsRef<str>, depth: u32) -> Result<Self, TraceError> {
        let state = state.as_ref().as_bytes().to_vec();
        if state.is_empty() {
            return Err(TraceError::EmptyTrace);
        }
        Ok(Self { state, depth })
    }

    fn max_len(&self) -> u128 {
        1u128 << self.depth
    }

    /// Builds the pre-image of the claim at trace index `i`: `u256(i) ‖ u256(state[i])`.
    fn preimage(&self, i: u64) -> Result<Bytes, TraceError> {
        if i as u128 >= self.max_len() {
            return Err(TraceError::IndexTooLarge {
                index: i,
                max_len: self.max_len(),
            });
        }
        let i = (i as usize).min(self.state.len() - 1);
        Ok(abi::encode(&[
            Token::Uint(U256::from(i)),
            Token::Uint(U256::from(self.state[i])),
        ])
        .into())
    }
}

#[async_trait]
impl TraceProvider for AlphabetTraceProvider {
    async fn get(&self, i: u64) -> Result<H256, TraceError> {
        Ok(H256::from(keccak256(self.preimage(i)?)))
    }

    async fn get_step_data(&self, i: u64) -> Result<StepProof, TraceError> {
        Ok(StepProof {
            pre_state: self.preimage(i)?,
            ..Default::default()
        })
    }

    async fn absolute_pre_state(&self) -> Result<Bytes, TraceError> {
        let mut state = [0u8; 32];
        state[31] = ABSOLUTE_PRESTATE;
        Ok(state.to_vec().into())
    }
}
