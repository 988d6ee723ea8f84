//! The cannon module contains the [TraceProvider](super::TraceProvider) backed by the cannon MIPS
//! VM, and the [CannonExecutor] that runs the VM to produce proof artifacts.

use anyhow::Result;
use async_trait::async_trait;
use ethers::types::{H256, U256};
use std::path::{Path, PathBuf};

mod executor;
pub use executor::{find_starting_snapshot, CannonExecutor};

mod provider;
pub use provider::{CannonTraceProvider, ProofArtifact, FINAL_STATE, PROOFS_DIR};

mod state;
pub use state::{VmState, STATE_WITNESS_SIZE};

/// The [ProofGenerator] trait defines the interface of anything that can write the proof artifact
/// for a trace index into `<dir>/proofs/<i>.json`.
#[async_trait]
pub trait ProofGenerator: Send + Sync {
    /// Generates the proof at trace index `i` into the given game directory. When the program
    /// exits before reaching `i`, no proof is written and the final state is left in
    /// `<dir>/final.json` instead.
    async fn generate_proof(&self, dir: &Path, i: u64) -> Result<()>;
}

/// The inputs of the fault proof program that are specific to a single game.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LocalGameInputs {
    pub l1_head: H256,
    pub l2_head: H256,
    pub l2_output_root: H256,
    pub l2_claim: H256,
    pub l2_block_number: U256,
}

/// Settings for running the cannon VM.
#[derive(Debug, Default, Clone)]
pub struct CannonConfig {
    /// Path to the cannon executable.
    pub bin: PathBuf,
    /// Path to the fault proof program server executable.
    pub server: PathBuf,
    /// Path to the absolute prestate VM state file.
    pub prestate: PathBuf,
    pub l1_rpc: String,
    pub l2_rpc: String,
    /// Named network of the L2 chain, if it is a known one.
    pub network: Option<String>,
    pub rollup_config: Option<PathBuf>,
    pub l2_genesis: Option<PathBuf>,
    /// Frequency, in steps, of VM snapshots.
    pub snapshot_freq: u64,
    /// Frequency, in steps, of VM progress logs.
    pub info_freq: u64,
}
