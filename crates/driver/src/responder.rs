//! The `responder` module packs the agent's responses into transactions against the game and
//! preimage oracle contracts.

use crate::{
    bindings::{AddLocalDataCall, AttackCall, DefendCall, ResolveCall, StepCall},
    GameStatus, TxCandidate,
};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use ethers::{
    abi::{self, AbiEncode, ParamType, Token},
    providers::Middleware,
    types::{
        transaction::eip2718::TypedTransaction, Address, Bytes, Eip1559TransactionRequest,
        TransactionReceipt, U256, U64,
    },
    utils::id,
};
use op_toolkit_solvers::{
    fault::{Claim, StepCallData},
    trace::PreimageOracleData,
};
use std::sync::Arc;

/// The signature of the preimage oracle method that loads a part of a keccak256 preimage.
pub const LOAD_KECCAK256_PREIMAGE_PART: &str = "loadKeccak256PreimagePart(uint256,bytes)";

/// The [TxManager] trait defines the interface used to call and submit transactions.
#[async_trait]
pub trait TxManager: Send + Sync {
    /// Signs and submits the candidate, waiting for its receipt.
    async fn send(&self, candidate: TxCandidate) -> Result<Option<TransactionReceipt>>;

    /// Executes the candidate as a call against the latest state.
    async fn call(&self, candidate: TxCandidate) -> Result<Bytes>;
}

/// A [TxManager] backed by an ethers [Middleware] that is able to sign, such as a
/// `SignerMiddleware`.
pub struct EthersTxManager<M> {
    client: Arc<M>,
    confirmations: usize,
}

impl<M: Middleware> EthersTxManager<M> {
    pub fn new(client: Arc<M>, confirmations: usize) -> Self {
        Self {
            client,
            confirmations,
        }
    }

    fn request(candidate: TxCandidate) -> TypedTransaction {
        let mut request = Eip1559TransactionRequest::new()
            .to(candidate.to)
            .data(candidate.tx_data);
        if let Some(gas) = candidate.gas_limit {
            request = request.gas(gas);
        }
        request.into()
    }
}

#[async_trait]
impl<M: Middleware + 'static> TxManager for EthersTxManager<M> {
    async fn send(&self, candidate: TxCandidate) -> Result<Option<TransactionReceipt>> {
        let pending = self
            .client
            .send_transaction(Self::request(candidate), None)
            .await
            .map_err(|e| anyhow!("Failed to send transaction: {}", e))?;
        tracing::debug!(target: "responder", "Transaction sent. Tx hash: {:?}", pending.tx_hash());
        Ok(pending.confirmations(self.confirmations).await?)
    }

    async fn call(&self, candidate: TxCandidate) -> Result<Bytes> {
        self.client
            .call(&Self::request(candidate), None)
            .await
            .map_err(|e| anyhow!("Call failed: {}", e))
    }
}

/// The [Responder] trait defines the actions the agent takes against a single game.
#[async_trait]
pub trait Responder: Send + Sync {
    /// Simulates a `resolve` call, returning the status the game would resolve to.
    async fn call_resolve(&self) -> Result<GameStatus>;

    async fn resolve(&self) -> Result<()>;

    /// Posts the given claim as an attack or defense against its parent.
    async fn respond(&self, claim: &Claim) -> Result<()>;

    async fn step(&self, step: &StepCallData) -> Result<()>;

    /// Loads the preimage data a step depends on into the oracle.
    async fn update_oracle(&self, data: &PreimageOracleData) -> Result<()>;
}

/// The [FaultResponder] submits responses to a fault dispute game through a [TxManager].
pub struct FaultResponder<T> {
    tx_mgr: Arc<T>,
    game: Address,
    oracle: Address,
}

impl<T: TxManager> FaultResponder<T> {
    /// Creates a new [FaultResponder].
    ///
    /// ### Takes
    /// - `tx_mgr`: The [TxManager] used to submit transactions.
    /// - `game`: The address of the game contract.
    /// - `oracle`: The address of the preimage oracle backing the game's VM.
    pub fn new(tx_mgr: Arc<T>, game: Address, oracle: Address) -> Self {
        Self {
            tx_mgr,
            game,
            oracle,
        }
    }

    async fn send(&self, to: Address, tx_data: Vec<u8>) -> Result<()> {
        let receipt = self
            .tx_mgr
            .send(TxCandidate {
                to,
                tx_data: tx_data.into(),
                gas_limit: None,
            })
            .await?;
        match receipt {
            Some(receipt) if receipt.status == Some(U64::one()) => {
                tracing::info!(target: "responder", "Transaction succeeded. Tx hash: {:?}", receipt.transaction_hash);
            }
            Some(receipt) => {
                tracing::warn!(target: "responder", "Transaction reverted. Tx hash: {:?}", receipt.transaction_hash);
            }
            None => {
                tracing::warn!(target: "responder", "Transaction dropped before it was confirmed");
            }
        }
        Ok(())
    }
}

/// Builds the calldata of a `loadKeccak256PreimagePart` call.
pub fn load_preimage_part_calldata(data: &PreimageOracleData) -> Vec<u8> {
    let mut calldata = id(LOAD_KECCAK256_PREIMAGE_PART).to_vec();
    calldata.extend(abi::encode(&[
        Token::Uint(U256::from(data.offset)),
        Token::Bytes(data.preimage_without_size().to_vec()),
    ]));
    calldata
}

#[async_trait]
impl<T: TxManager> Responder for FaultResponder<T> {
    async fn call_resolve(&self) -> Result<GameStatus> {
        let output = self
            .tx_mgr
            .call(TxCandidate {
                to: self.game,
                tx_data: ResolveCall.encode().into(),
                gas_limit: None,
            })
            .await?;
        match abi::decode(&[ParamType::Uint(8)], &output)?.as_slice() {
            [Token::Uint(status)] => {
                let status =
                    u8::try_from(*status).map_err(|_| anyhow!("Invalid game status: {}", status))?;
                GameStatus::try_from(status)
            }
            _ => Err(anyhow!("Unexpected resolve output: {}", output)),
        }
    }

    async fn resolve(&self) -> Result<()> {
        self.send(self.game, ResolveCall.encode()).await
    }

    async fn respond(&self, claim: &Claim) -> Result<()> {
        let parent_index = U256::from(claim.parent_contract_index);
        let value = claim.value().to_fixed_bytes();
        let tx_data = if claim.defends_parent() {
            DefendCall {
                parent_index,
                claim: value,
            }
            .encode()
        } else {
            AttackCall {
                parent_index,
                claim: value,
            }
            .encode()
        };
        self.send(self.game, tx_data).await
    }

    async fn step(&self, step: &StepCallData) -> Result<()> {
        let call = StepCall {
            claim_index: U256::from(step.claim_index),
            is_attack: step.is_attack,
            state_data: step.state_data.clone(),
            proof: step.proof.clone(),
        };
        self.send(self.game, call.encode()).await
    }

    async fn update_oracle(&self, data: &PreimageOracleData) -> Result<()> {
        if data.is_local {
            let call = AddLocalDataCall {
                ident: data.ident(),
                part_offset: U256::from(data.offset),
            };
            self.send(self.game, call.encode()).await
        } else {
            self.send(self.oracle, load_preimage_part_calldata(data)).await
        }
    }
}
