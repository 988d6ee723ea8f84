//! Helpers shared by the `op-challenger`, `op-superchain` and `check-derivation` binaries.

use anyhow::{anyhow, Result};
use ethers::types::{transaction::eip2930::AccessList, Address, H256};
use op_toolkit_interop::BlockRef;
use std::{collections::HashMap, str::FromStr, time::Duration};
use tracing::Level;

/// Initializes the tracing subscriber
///
/// # Arguments
/// * `verbosity_level` - The verbosity level (0-4)
///
/// # Returns
/// * `Result<()>` - Ok if successful, Err otherwise.
pub fn init_tracing_subscriber(verbosity_level: u8) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(match verbosity_level {
            0 => Level::ERROR,
            1 => Level::WARN,
            2 => Level::INFO,
            3 => Level::DEBUG,
            _ => Level::TRACE,
        })
        .finish();
    tracing::subscriber::set_global_default(subscriber).map_err(|e| anyhow!(e))
}

pub fn parse_address(s: &str) -> Result<Address, String> {
    Address::from_str(s).map_err(|_| format!("Invalid Address value: {s}"))
}

/// Parses a duration such as `500ms`, `12s`, `5m`, `1h` or `7d`. A bare number is in seconds.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let split = s
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(s.len());
    let (value, unit) = s.split_at(split);
    let value = value
        .parse::<u64>()
        .map_err(|_| format!("Invalid Duration value: {s}"))?;
    let seconds = |factor: u64| {
        value
            .checked_mul(factor)
            .map(Duration::from_secs)
            .ok_or_else(|| format!("Duration out of range: {s}"))
    };
    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "" | "s" => seconds(1),
        "m" => seconds(60),
        "h" => seconds(60 * 60),
        "d" => seconds(24 * 60 * 60),
        _ => Err(format!("Invalid Duration unit: {s}")),
    }
}

/// A block whose hash changed between two observations of its height.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reorg {
    pub number: u64,
    pub previous: H256,
    pub current: H256,
}

/// The [ReorgDetector] remembers the hash of every height it has seen at the tip of a chain.
#[derive(Debug, Default)]
pub struct ReorgDetector {
    blocks: HashMap<u64, H256>,
    last_head: u64,
}

impl ReorgDetector {
    /// Records a new head and its parent.
    ///
    /// ### Returns
    /// - `(Vec<Reorg>, bool)`: The heights whose hash changed, and whether the head advanced.
    pub fn observe(&mut self, head: &BlockRef) -> (Vec<Reorg>, bool) {
        let parent = head.number.saturating_sub(1);
        let mut reorgs = Vec::new();
        for (number, current) in [(parent, head.parent_hash), (head.number, head.hash)] {
            if let Some(&previous) = self.blocks.get(&number) {
                if previous != current {
                    reorgs.push(Reorg {
                        number,
                        previous,
                        current,
                    });
                }
            }
            self.blocks.insert(number, current);
        }

        let advanced = head.number > self.last_head;
        self.last_head = head.number;
        (reorgs, advanced)
    }
}

/// Returns the intrinsic gas of a call carrying `data` and `access_list`.
pub fn intrinsic_gas(data: &[u8], access_list: &AccessList) -> u64 {
    const TX_GAS: u64 = 21_000;
    const TX_DATA_ZERO_GAS: u64 = 4;
    const TX_DATA_NON_ZERO_GAS: u64 = 16;
    const ACCESS_LIST_ADDRESS_GAS: u64 = 2_400;
    const ACCESS_LIST_STORAGE_KEY_GAS: u64 = 1_900;

    let data_gas = data
        .iter()
        .map(|&b| {
            if b == 0 {
                TX_DATA_ZERO_GAS
            } else {
                TX_DATA_NON_ZERO_GAS
            }
        })
        .sum::<u64>();
    let access_list_gas = access_list
        .0
        .iter()
        .map(|item| {
            ACCESS_LIST_ADDRESS_GAS + ACCESS_LIST_STORAGE_KEY_GAS * item.storage_keys.len() as u64
        })
        .sum::<u64>();
    TX_GAS + data_gas + access_list_gas
}

/// Returns an address of the form `0x000000000000000000000000[random 32 bits][suffix]`.
pub fn vanity_address(random: u32, suffix: u32) -> Address {
    Address::from_low_u64_be((u64::from(random) << 32) | u64::from(suffix))
}
