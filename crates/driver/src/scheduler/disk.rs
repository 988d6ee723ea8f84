use anyhow::Result;
use ethers::types::Address;
use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    str::FromStr,
};

/// The [DiskManager] owns the per-game data directories under the agent's datadir.
#[derive(Debug, Clone)]
pub struct DiskManager {
    datadir: PathBuf,
}

impl DiskManager {
    pub fn new(datadir: impl Into<PathBuf>) -> Self {
        Self {
            datadir: datadir.into(),
        }
    }

    pub fn datadir(&self) -> &Path {
        &self.datadir
    }

    /// Returns `<datadir>/<0x game address>`.
    pub fn dir_for_game(&self, game: Address) -> PathBuf {
        self.datadir.join(format!("{game:?}"))
    }

    /// Deletes the directory of every game not listed in `keep`. Entries that are not game
    /// directories are left alone.
    pub async fn remove_all_except(&self, keep: &[Address]) -> Result<()> {
        let mut entries = match tokio::fs::read_dir(&self.datadir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            let Some(game) = name.to_str().and_then(|name| Address::from_str(name).ok()) else {
                continue;
            };
            if keep.contains(&game) {
                continue;
            }
            tracing::debug!(target: "scheduler", "Removing data of game {:?}", game);
            tokio::fs::remove_dir_all(entry.path()).await?;
        }
        Ok(())
    }
}
