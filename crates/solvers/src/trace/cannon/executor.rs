//! The [CannonExecutor] runs the cannon VM over the fault proof program to write proofs.

use super::{CannonConfig, LocalGameInputs, ProofGenerator, FINAL_STATE, PROOFS_DIR};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::{
    path::{Path, PathBuf},
    process::Stdio,
};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    process::Command,
    task::JoinHandle,
};

/// The directory, relative to the game directory, that the preimage server caches data in.
const PREIMAGES_DIR: &str = "preimages";

/// The [CannonExecutor] is the [ProofGenerator] of a single game.
#[derive(Debug, Clone)]
pub struct CannonExecutor {
    config: CannonConfig,
    inputs: LocalGameInputs,
}

impl CannonExecutor {
    pub fn new(config: CannonConfig, inputs: LocalGameInputs) -> Self {
        Self { config, inputs }
    }

    /// Builds the arguments of `cannon run` that execute from `snapshot` up to and including the
    /// step at trace index `i`, writing the proof for `i`.
    pub fn build_args(&self, dir: &Path, snapshot: &Path, i: u64) -> Vec<String> {
        let path = |p: PathBuf| p.to_string_lossy().into_owned();
        let mut args = vec![
            "run".to_string(),
            "--input".to_string(),
            path(snapshot.to_path_buf()),
            "--output".to_string(),
            path(dir.join(FINAL_STATE)),
            "--meta".to_string(),
            String::new(),
            "--info-at".to_string(),
            format!("%{}", self.config.info_freq),
            "--proof-at".to_string(),
            format!("={i}"),
            "--stop-at".to_string(),
            format!("={}", i + 1),
            "--proof-fmt".to_string(),
            path(dir.join(PROOFS_DIR).join("%d.json")),
            "--snapshot-at".to_string(),
            format!("%{}", self.config.snapshot_freq),
            "--snapshot-fmt".to_string(),
            path(dir.join("%d.json")),
            "--".to_string(),
            path(self.config.server.clone()),
            "--server".to_string(),
            "--l1".to_string(),
            self.config.l1_rpc.clone(),
            "--l2".to_string(),
            self.config.l2_rpc.clone(),
            "--datadir".to_string(),
            path(dir.join(PREIMAGES_DIR)),
            "--l1.head".to_string(),
            format!("{:?}", self.inputs.l1_head),
            "--l2.head".to_string(),
            format!("{:?}", self.inputs.l2_head),
            "--l2.outputroot".to_string(),
            format!("{:?}", self.inputs.l2_output_root),
            "--l2.claim".to_string(),
            format!("{:?}", self.inputs.l2_claim),
            "--l2.blocknumber".to_string(),
            self.inputs.l2_block_number.to_string(),
        ];
        if let Some(network) = &self.config.network {
            args.extend(["--network".to_string(), network.clone()]);
        }
        if let Some(rollup_config) = &self.config.rollup_config {
            args.extend(["--rollup.config".to_string(), path(rollup_config.clone())]);
        }
        if let Some(l2_genesis) = &self.config.l2_genesis {
            args.extend(["--l2.genesis".to_string(), path(l2_genesis.clone())]);
        }
        args
    }
}

#[async_trait]
impl ProofGenerator for CannonExecutor {
    async fn generate_proof(&self, dir: &Path, i: u64) -> Result<()> {
        let snapshot = find_starting_snapshot(dir, &self.config.prestate, i).await?;
        tokio::fs::create_dir_all(dir.join(PROOFS_DIR)).await?;
        tokio::fs::create_dir_all(dir.join(PREIMAGES_DIR)).await?;

        let args = self.build_args(dir, &snapshot, i);
        tracing::info!(target: "cannon", "Generating trace for index {} from {}", i, snapshot.display());
        let mut child = Command::new(&self.config.bin)
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn {}", self.config.bin.display()))?;

        let stdout = child.stdout.take().map(|out| tokio::spawn(forward_output(out, false)));
        let stderr = child.stderr.take().map(|err| tokio::spawn(forward_output(err, true)));
        let status = child.wait().await?;
        join_forwarders([stdout, stderr].into_iter().flatten()).await;

        if !status.success() {
            return Err(anyhow!("cannon exited with {status} generating trace index {i}"));
        }
        Ok(())
    }
}

/// Forwards each line of the VM's output to the tracing subscriber.
async fn forward_output(output: impl AsyncRead + Unpin, is_stderr: bool) {
    let mut lines = BufReader::new(output).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if is_stderr {
            tracing::debug!(target: "cannon", "{}", line);
        } else {
            tracing::info!(target: "cannon", "{}", line);
        }
    }
}

/// Waits for the output forwarders, returning how many of them failed.
async fn join_forwarders(handles: impl IntoIterator<Item = JoinHandle<()>>) -> usize {
    let mut failed = 0;
    for handle in handles {
        if let Err(e) = handle.await {
            tracing::error!(target: "cannon", "Output forwarder failed: {}", e);
            failed += 1;
        }
    }
    failed
}

/// Finds the snapshot with the highest step that is not past `i` in `dir`, where snapshots are
/// named `<step>.json`. Falls back to the absolute prestate if there is none.
pub async fn find_starting_snapshot(dir: &Path, prestate: &Path, i: u64) -> Result<PathBuf> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(prestate.to_path_buf()),
        Err(e) => return Err(e.into()),
    };

    let mut best: Option<u64> = None;
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let name = entry.file_name();
        let Some(step) = name
            .to_str()
            .and_then(|name| name.strip_suffix(".json"))
            .and_then(|stem| stem.parse::<u64>().ok())
        else {
            continue;
        };
        if step <= i && best.map_or(true, |best| step > best) {
            best = Some(step);
        }
    }

    Ok(best
        .map(|step| dir.join(format!("{step}.json")))
        .unwrap_or_else(|| prestate.to_path_buf()))
}
