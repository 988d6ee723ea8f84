//! A [TraceProvider] reading the proof artifacts produced by cannon.

use super::{ProofGenerator, VmState};
use crate::trace::{PreimageOracleData, StepProof, TraceError, TraceProvider};
use async_trait::async_trait;
use ethers::types::{Bytes, H256};
use serde::{Deserialize, Serialize};
use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::sync::Mutex;

/// The directory, relative to the game directory, that proofs are written to.
pub const PROOFS_DIR: &str = "proofs";
/// The file, relative to the game directory, that the VM writes its final state to.
pub const FINAL_STATE: &str = "final.json";
/// The file, relative to the game directory, that the last executable step is persisted to.
const LAST_STEP_STATE: &str = "state.json";

/// A single step proof as written by `cannon run --proof-fmt`.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ProofArtifact {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre: Option<H256>,
    #[serde(default)]
    pub post: H256,
    #[serde(default)]
    pub state_data: Bytes,
    #[serde(default)]
    pub proof_data: Option<Bytes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oracle_key: Option<Bytes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oracle_value: Option<Bytes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oracle_offset: Option<u32>,
}

impl ProofArtifact {
    fn oracle_data(&self) -> Option<PreimageOracleData> {
        match &self.oracle_key {
            Some(key) if !key.is_empty() => Some(PreimageOracleData::new(
                key.clone(),
                self.oracle_value.clone().unwrap_or_default(),
                self.oracle_offset.unwrap_or_default(),
            )),
            _ => None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct LastStep {
    step: u64,
}

/// The trace extension past program exit, shared by every index after `last_step`.
#[derive(Debug, Default)]
struct ProofCache {
    last_step: Option<u64>,
    last_proof: Option<ProofArtifact>,
    loaded_from_disk: bool,
}

/// The [CannonTraceProvider] serves claims and step proofs from `<dir>/proofs/<i>.json`,
/// invoking its [ProofGenerator] for any proof that is not on disk yet.
pub struct CannonTraceProvider {
    dir: PathBuf,
    prestate: PathBuf,
    generator: Arc<dyn ProofGenerator>,
    game_depth: u32,
    /// Held while loading or generating, so only one VM runs per game at a time.
    cache: Mutex<ProofCache>,
}

impl CannonTraceProvider {
    pub fn new(
        dir: impl Into<PathBuf>,
        prestate: impl Into<PathBuf>,
        generator: Arc<dyn ProofGenerator>,
        game_depth: u32,
    ) -> Self {
        Self {
            dir: dir.into(),
            prestate: prestate.into(),
            generator,
            game_depth,
            cache: Mutex::new(ProofCache::default()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn proof_path(&self, i: u64) -> PathBuf {
        self.dir.join(PROOFS_DIR).join(format!("{i}.json"))
    }

    async fn load_proof(&self, i: u64) -> Result<ProofArtifact, TraceError> {
        if i as u128 >= 1u128 << self.game_depth {
            return Err(TraceError::IndexTooLarge {
                index: i,
                max_len: 1u128 << self.game_depth,
            });
        }

        let mut cache = self.cache.lock().await;
        if !cache.loaded_from_disk {
            cache.loaded_from_disk = true;
            match read_json::<LastStep>(&self.dir.join(LAST_STEP_STATE)).await {
                Ok(Some(last)) => cache.last_step = Some(last.step),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(target: "cannon-trace", "Failed to read last step from disk cache: {}", e)
                }
            }
        }

        if let Some(last_step) = cache.last_step {
            if i > last_step {
                if let Some(proof) = &cache.last_proof {
                    return Ok(proof.clone());
                }
                if let Some(proof) = read_json::<ProofArtifact>(&self.proof_path(last_step)).await?
                {
                    cache.last_proof = Some(proof.clone());
                    return Ok(proof);
                }
            }
        }

        if let Some(proof) = read_json(&self.proof_path(i)).await? {
            return Ok(proof);
        }

        tracing::debug!(target: "cannon-trace", "Generating proof at trace index {}", i);
        self.generator
            .generate_proof(&self.dir, i)
            .await
            .map_err(TraceError::Generator)?;
        if let Some(proof) = read_json(&self.proof_path(i)).await? {
            return Ok(proof);
        }

        // The expected proof was not generated, check if the program exited before reaching it.
        let state = VmState::read(self.dir.join(FINAL_STATE)).await?;
        if !state.exited || state.step > i {
            tracing::error!(target: "cannon-trace", "Proof at {} not generated but the VM stopped at step {}", i, state.step);
            return Err(TraceError::ProofUnavailable(i));
        }

        tracing::warn!(target: "cannon-trace", "Requested proof {} is after the program exited at step {}", i, state.step);
        // The final instruction has already been applied to the exited state, so the last
        // executable step is one before it. Every later index repeats the exited state.
        let last_step = state.step.saturating_sub(1);
        let witness = state.encode_witness();
        let proof = ProofArtifact {
            post: state.hash(),
            state_data: witness,
            proof_data: Some(Bytes::default()),
            ..Default::default()
        };
        if let Err(e) = self.write_last_step(last_step, &proof).await {
            tracing::warn!(target: "cannon-trace", "Failed to write last step {} to disk cache: {}", last_step, e);
        }
        cache.last_step = Some(last_step);
        cache.last_proof = Some(proof.clone());
        Ok(proof)
    }

    async fn write_last_step(&self, step: u64, proof: &ProofArtifact) -> Result<(), TraceError> {
        tokio::fs::create_dir_all(self.dir.join(PROOFS_DIR)).await?;
        tokio::fs::write(self.proof_path(step), serde_json::to_vec(proof)?).await?;
        tokio::fs::write(
            self.dir.join(LAST_STEP_STATE),
            serde_json::to_vec(&LastStep { step })?,
        )
        .await?;
        Ok(())
    }
}

/// Reads a JSON file, returning [None] if it does not exist.
async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>, TraceError> {
    match tokio::fs::read(path).await {
        Ok(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl TraceProvider for CannonTraceProvider {
    async fn get(&self, i: u64) -> Result<H256, TraceError> {
        let proof = self.load_proof(i).await?;
        if proof.post.is_zero() {
            return Err(TraceError::ProofMissingPostHash(i));
        }
        if proof.state_data.is_empty() {
            return Err(TraceError::ProofMissingStateData(i));
        }
        Ok(proof.post)
    }

    async fn get_step_data(&self, i: u64) -> Result<StepProof, TraceError> {
        let proof = self.load_proof(i).await?;
        if proof.state_data.is_empty() {
            return Err(TraceError::ProofMissingStateData(i));
        }
        let oracle_data = proof.oracle_data();
        let proof_data = proof
            .proof_data
            .ok_or(TraceError::ProofMissingProofData(i))?;
        Ok(StepProof {
            pre_state: proof.state_data,
            proof: proof_data,
            oracle_data,
        })
    }

    async fn absolute_pre_state(&self) -> Result<Bytes, TraceError> {
        Ok(VmState::read(&self.prestate).await?.encode_witness())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use anyhow::Result;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// A [ProofGenerator] that writes canned artifacts and counts its invocations.
    #[derive(Default)]
    struct StubGenerator {
        proofs: Vec<(u64, ProofArtifact)>,
        final_state: Option<VmState>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ProofGenerator for StubGenerator {
        async fn generate_proof(&self, dir: &Path, i: u64) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::fs::create_dir_all(dir.join(PROOFS_DIR)).await?;
            if let Some((_, proof)) = self.proofs.iter().find(|(step, _)| *step == i) {
                tokio::fs::write(
                    dir.join(PROOFS_DIR).join(format!("{i}.json")),
                    serde_json::to_vec(proof)?,
                )
                .await?;
            }
            if let Some(state) = &self.final_state {
                tokio::fs::write(dir.join(FINAL_STATE), serde_json::to_vec(state)?).await?;
            }
            Ok(())
        }
    }

    fn artifact(seed: u8) -> ProofArtifact {
        ProofArtifact {
            step: Some(seed as u64),
            pre: Some(H256::repeat_byte(seed)),
            post: H256::repeat_byte(seed + 1),
            state_data: Bytes::from(vec![seed; 226]),
            proof_data: Some(Bytes::from(vec![0xff; 64])),
            ..Default::default()
        }
    }

    fn provider(dir: &Path, generator: Arc<StubGenerator>) -> CannonTraceProvider {
        CannonTraceProvider::new(dir, dir.join("prestate.json"), generator, 8)
    }

    #[tokio::test]
    async fn loads_existing_proof() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(PROOFS_DIR)).unwrap();
        std::fs::write(
            dir.path().join(PROOFS_DIR).join("3.json"),
            serde_json::to_vec(&artifact(3)).unwrap(),
        )
        .unwrap();
        let generator = Arc::new(StubGenerator::default());
        let provider = provider(dir.path(), generator.clone());

        assert_eq!(provider.get(3).await.unwrap(), H256::repeat_byte(4));
        let step = provider.get_step_data(3).await.unwrap();
        assert_eq!(step.pre_state, Bytes::from(vec![3u8; 226]));
        assert_eq!(step.proof, Bytes::from(vec![0xff; 64]));
        assert!(step.oracle_data.is_none());
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn generates_missing_proof() {
        let dir = tempfile::tempdir().unwrap();
        let generator = Arc::new(StubGenerator {
            proofs: vec![(5, artifact(5))],
            ..Default::default()
        });
        let provider = provider(dir.path(), generator.clone());
        assert_eq!(provider.get(5).await.unwrap(), H256::repeat_byte(6));
        assert_eq!(provider.get(5).await.unwrap(), H256::repeat_byte(6));
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn reads_oracle_data() {
        let dir = tempfile::tempdir().unwrap();
        let mut proof = artifact(1);
        proof.oracle_key = Some(Bytes::from(vec![2u8; 32]));
        proof.oracle_value = Some(Bytes::from(vec![0xab; 40]));
        proof.oracle_offset = Some(8);
        let generator = Arc::new(StubGenerator {
            proofs: vec![(1, proof)],
            ..Default::default()
        });
        let provider = provider(dir.path(), generator);
        let oracle = provider.get_step_data(1).await.unwrap().oracle_data.unwrap();
        assert!(!oracle.is_local);
        assert_eq!(oracle.value, Bytes::from(vec![0xab; 40]));
        assert_eq!(oracle.offset, 8);
    }

    #[tokio::test]
    async fn artifact_schema_errors() {
        let dir = tempfile::tempdir().unwrap();
        let mut no_post = artifact(1);
        no_post.post = H256::zero();
        let mut no_state = artifact(2);
        no_state.state_data = Bytes::default();
        let mut no_proof = artifact(3);
        no_proof.proof_data = None;
        let generator = Arc::new(StubGenerator {
            proofs: vec![(1, no_post), (2, no_state), (3, no_proof)],
            ..Default::default()
        });
        let provider = provider(dir.path(), generator);

        assert!(matches!(
            provider.get(1).await,
            Err(TraceError::ProofMissingPostHash(1))
        ));
        assert!(matches!(
            provider.get(2).await,
            Err(TraceError::ProofMissingStateData(2))
        ));
        assert!(matches!(
            provider.get_step_data(2).await,
            Err(TraceError::ProofMissingStateData(2))
        ));
        assert!(matches!(
            provider.get_step_data(3).await,
            Err(TraceError::ProofMissingProofData(3))
        ));
        assert!(matches!(
            provider.get(256).await,
            Err(TraceError::IndexTooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn extends_trace_after_exit() {
        let dir = tempfile::tempdir().unwrap();
        let final_state = VmState {
            exited: true,
            step: 10,
            pc: 44,
            ..Default::default()
        };
        let generator = Arc::new(StubGenerator {
            final_state: Some(final_state.clone()),
            ..Default::default()
        });
        let provider = provider(dir.path(), generator.clone());

        let expected = final_state.hash();
        assert_eq!(provider.get(12).await.unwrap(), expected);
        let step = provider.get_step_data(200).await.unwrap();
        assert_eq!(step.pre_state, final_state.encode_witness());
        assert!(step.proof.is_empty());
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);

        // A fresh provider over the same directory picks up the persisted last step.
        let reloaded = CannonTraceProvider::new(
            dir.path(),
            dir.path().join("prestate.json"),
            Arc::new(StubGenerator::default()),
            8,
        );
        assert_eq!(reloaded.get(100).await.unwrap(), expected);
    }

    #[tokio::test]
    async fn fails_when_vm_stopped_early() {
        let dir = tempfile::tempdir().unwrap();
        let generator = Arc::new(StubGenerator {
            final_state: Some(VmState {
                exited: false,
                step: 3,
                ..Default::default()
            }),
            ..Default::default()
        });
        let provider = provider(dir.path(), generator);
        assert!(matches!(
            provider.get(7).await,
            Err(TraceError::ProofUnavailable(7))
        ));
    }

    #[tokio::test]
    async fn absolute_pre_state_is_the_prestate_witness() {
        let dir = tempfile::tempdir().unwrap();
        let prestate = VmState {
            pc: 4,
            next_pc: 8,
            ..Default::default()
        };
        std::fs::write(
            dir.path().join("prestate.json"),
            serde_json::to_vec(&prestate).unwrap(),
        )
        .unwrap();
        let provider = provider(dir.path(), Arc::new(StubGenerator::default()));
        assert_eq!(
            provider.absolute_pre_state().await.unwrap(),
            prestate.encode_witness()
        );
    }
}
