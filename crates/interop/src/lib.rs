//! Superchain interop: classifies executing messages against their initiating logs, tracks the
//! cross-chain dependencies between blocks, and verifies block receipts.

mod types;
pub use types::{BlockInfo, BlockKey, BlockRef, ExecutingMessage, MessageIdentifier, SafetyLabel};

pub mod inbox;

pub mod receipts;
pub use receipts::{Receipt, ReceiptError};

mod finality;
pub use finality::{poll_block_changes, FinalityTracker, FinalizedSource};

mod safety;
pub use safety::{log_payload, LogsProvider, MessageError, MessageSafetyOracle, MessageVerifier};

mod graph;
pub use graph::{BlockSource, DependencyError, DependencyGraph};

mod provider;
pub use provider::{with_retry, EthersChain, MAX_RETRIES, RETRY_INTERVAL, RPC_TIMEOUT};

mod config;
pub use config::{PeerRpcs, PeersError};
