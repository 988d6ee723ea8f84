//! The `receipts` module checks that the receipts of a block are internally consistent and
//! commit to the block's receipts root.

use crate::BlockInfo;
use alloy_trie::root::ordered_trie_root_with_encoder;
use ethers::{
    types::{Bloom, Log, TransactionReceipt, H256, U256, U64},
    utils::rlp::RlpStream,
};
use thiserror::Error;

/// The transaction type of L1-to-L2 deposits.
pub const DEPOSIT_TX_TYPE: u8 = 0x7e;

/// The root of a trie with no leaves.
pub const EMPTY_TRIE_ROOT: H256 = H256(alloy_trie::EMPTY_ROOT_HASH.0);

/// A transaction receipt, as committed to by the receipts root and as located in its block.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub tx_type: u8,
    /// `1` for success, `0` for failure.
    pub status: u64,
    pub cumulative_gas_used: u64,
    pub gas_used: u64,
    pub logs_bloom: Bloom,
    pub logs: Vec<Log>,
    pub tx_hash: H256,
    pub tx_index: u64,
    pub block_hash: H256,
    pub block_number: Option<u64>,
    /// Deposit receipts only.
    pub deposit_nonce: Option<u64>,
    /// Set on deposit receipts from Canyon onwards.
    pub deposit_receipt_version: Option<u64>,
}

impl From<TransactionReceipt> for Receipt {
    fn from(receipt: TransactionReceipt) -> Self {
        let extra = |key: &str| {
            receipt
                .other
                .get_deserialized::<U64>(key)
                .and_then(Result::ok)
                .map(|v| v.as_u64())
        };
        Self {
            tx_type: receipt.transaction_type.map_or(0, |t| t.low_u64() as u8),
            status: receipt.status.map_or(0, |s| s.as_u64()),
            cumulative_gas_used: receipt.cumulative_gas_used.low_u64(),
            gas_used: receipt.gas_used.unwrap_or_default().low_u64(),
            logs_bloom: receipt.logs_bloom,
            tx_hash: receipt.transaction_hash,
            tx_index: receipt.transaction_index.as_u64(),
            block_hash: receipt.block_hash.unwrap_or_default(),
            block_number: receipt.block_number.map(|n| n.as_u64()),
            deposit_nonce: extra("depositNonce"),
            deposit_receipt_version: extra("depositReceiptVersion"),
            logs: receipt.logs,
        }
    }
}

/// Errors returned by [validate_receipts].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReceiptError {
    #[error("got {receipts} receipts for {txs} transactions")]
    CountMismatch { receipts: usize, txs: usize },
    #[error("no transactions, but got non-empty receipts root {0:?}")]
    NoTxButNotEmptyTrieRoot(H256),
    #[error("receipt of tx {0} is missing")]
    NilReceipt(usize),
    #[error("receipt {index} has unexpected tx index {got}")]
    TxIndexMismatch { index: usize, got: u64 },
    #[error("receipt {0} is missing its block number")]
    MissingBlockNumber(usize),
    #[error("receipt {index} has block number {got}, expected {expected}")]
    BlockNumberMismatch { index: usize, got: u64, expected: u64 },
    #[error("receipt {index} has block hash {got:?}, expected {expected:?}")]
    BlockHashMismatch { index: usize, got: H256, expected: H256 },
    #[error("receipt {index} used {got} gas, but cumulative gas grew by {expected}")]
    GasUsedMismatch { index: usize, got: u64, expected: u64 },
    #[error("log {log} of receipt {index} has unexpected log index")]
    LogIndexMismatch { index: usize, log: usize },
    #[error("log {log} of receipt {index} has unexpected tx index")]
    LogTxIndexMismatch { index: usize, log: usize },
    #[error("log {log} of receipt {index} has unexpected block hash")]
    LogBlockHashMismatch { index: usize, log: usize },
    #[error("log {log} of receipt {index} has unexpected block number")]
    LogBlockNumberMismatch { index: usize, log: usize },
    #[error("log {log} of receipt {index} has unexpected tx hash")]
    LogTxHashMismatch { index: usize, log: usize },
    #[error("log {log} of receipt {index} was removed by a reorg")]
    LogRemoved { index: usize, log: usize },
    #[error("receipts root mismatch, computed {computed:?}, expected {expected:?}")]
    RootMismatch { computed: H256, expected: H256 },
}

/// Returns the EIP-2718 encoding of a receipt, as hashed into the receipts trie.
///
/// Deposit receipts carry their nonce and receipt version only when the receipt version is set,
/// which is the case from Canyon onwards. Unknown receipt types encode to nothing.
pub fn encode_receipt(receipt: &Receipt) -> Vec<u8> {
    let canyon_deposit =
        receipt.tx_type == DEPOSIT_TX_TYPE && receipt.deposit_receipt_version.is_some();

    let mut stream = RlpStream::new_list(if canyon_deposit { 6 } else { 4 });
    stream.append(&receipt.status);
    stream.append(&receipt.cumulative_gas_used);
    stream.append(&receipt.logs_bloom.as_bytes());
    stream.append_list(&receipt.logs);
    if canyon_deposit {
        stream.append(&receipt.deposit_nonce.unwrap_or_default());
        stream.append(&receipt.deposit_receipt_version.unwrap_or_default());
    }
    let payload = stream.out();

    match receipt.tx_type {
        0 => payload.to_vec(),
        1 | 2 | 3 | DEPOSIT_TX_TYPE => {
            let mut encoded = Vec::with_capacity(payload.len() + 1);
            encoded.push(receipt.tx_type);
            encoded.extend_from_slice(&payload);
            encoded
        }
        _ => Vec::new(),
    }
}

/// Computes the root of the Merkle-Patricia trie keyed by the RLP-encoded receipt index.
pub fn receipts_root(receipts: &[Receipt]) -> H256 {
    let root = ordered_trie_root_with_encoder(receipts, |receipt, buf: &mut Vec<u8>| {
        buf.extend_from_slice(&encode_receipt(receipt))
    });
    H256(root.0)
}

/// Validates the receipts of `block` against its transactions and receipts root.
///
/// ### Takes
/// - `block`: The block the receipts were fetched for.
/// - `receipt_root`: The receipts root committed to in the block header.
/// - `tx_hashes`: The hashes of the block's transactions, in order.
/// - `receipts`: One receipt per transaction, `None` where the source returned nothing.
///
/// ### Returns
/// - `Ok(())`: The receipts are consistent and commit to `receipt_root`.
/// - `Err(ReceiptError)`: The first inconsistency found.
pub fn validate_receipts(
    block: &BlockInfo,
    receipt_root: H256,
    tx_hashes: &[H256],
    receipts: &[Option<Receipt>],
) -> Result<(), ReceiptError> {
    if receipts.len() != tx_hashes.len() {
        return Err(ReceiptError::CountMismatch {
            receipts: receipts.len(),
            txs: tx_hashes.len(),
        });
    }
    if tx_hashes.is_empty() {
        if receipt_root != EMPTY_TRIE_ROOT {
            return Err(ReceiptError::NoTxButNotEmptyTrieRoot(receipt_root));
        }
        return Ok(());
    }

    let mut log_index = 0u64;
    let mut cumulative_gas_used = 0u64;
    let mut checked = Vec::with_capacity(receipts.len());
    for (index, (receipt, tx_hash)) in receipts.iter().zip(tx_hashes).enumerate() {
        let receipt = receipt.as_ref().ok_or(ReceiptError::NilReceipt(index))?;
        if receipt.tx_index != index as u64 {
            return Err(ReceiptError::TxIndexMismatch {
                index,
                got: receipt.tx_index,
            });
        }
        let number = receipt
            .block_number
            .ok_or(ReceiptError::MissingBlockNumber(index))?;
        if number != block.number {
            return Err(ReceiptError::BlockNumberMismatch {
                index,
                got: number,
                expected: block.number,
            });
        }
        if receipt.block_hash != block.hash {
            return Err(ReceiptError::BlockHashMismatch {
                index,
                got: receipt.block_hash,
                expected: block.hash,
            });
        }
        let gas_delta = receipt.cumulative_gas_used.checked_sub(cumulative_gas_used);
        if gas_delta != Some(receipt.gas_used) {
            return Err(ReceiptError::GasUsedMismatch {
                index,
                got: receipt.gas_used,
                expected: gas_delta.unwrap_or_default(),
            });
        }
        cumulative_gas_used = receipt.cumulative_gas_used;

        for (log, entry) in receipt.logs.iter().enumerate() {
            if entry.log_index != Some(U256::from(log_index)) {
                return Err(ReceiptError::LogIndexMismatch { index, log });
            }
            if entry.transaction_index != Some(U64::from(index)) {
                return Err(ReceiptError::LogTxIndexMismatch { index, log });
            }
            if entry.block_hash != Some(block.hash) {
                return Err(ReceiptError::LogBlockHashMismatch { index, log });
            }
            if entry.block_number != Some(U64::from(block.number)) {
                return Err(ReceiptError::LogBlockNumberMismatch { index, log });
            }
            if entry.transaction_hash != Some(*tx_hash) {
                return Err(ReceiptError::LogTxHashMismatch { index, log });
            }
            if entry.removed == Some(true) {
                return Err(ReceiptError::LogRemoved { index, log });
            }
            log_index += 1;
        }
        checked.push(receipt.clone());
    }

    let computed = receipts_root(&checked);
    if computed != receipt_root {
        return Err(ReceiptError::RootMismatch {
            computed,
            expected: receipt_root,
        });
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use ethers::{
        types::{Address, Bytes},
        utils::keccak256,
    };

    const BLOCK: BlockInfo = BlockInfo {
        hash: H256::repeat_byte(0xbb),
        number: 100,
        timestamp: 1_000,
    };

    fn tx_hash(index: usize) -> H256 {
        H256::from_low_u64_be(0x1000 + index as u64)
    }

    fn log(index: u64, tx_index: usize) -> Log {
        Log {
            address: Address::repeat_byte(0xaa),
            topics: vec![H256::repeat_byte(0x01), H256::repeat_byte(0x02)],
            data: Bytes::from(vec![0xde, 0xad]),
            block_hash: Some(BLOCK.hash),
            block_number: Some(U64::from(BLOCK.number)),
            transaction_hash: Some(tx_hash(tx_index)),
            transaction_index: Some(U64::from(tx_index)),
            log_index: Some(U256::from(index)),
            removed: Some(false),
            ..Default::default()
        }
    }

    /// Three receipts: two logs, none, then one log.
    fn receipts() -> Vec<Receipt> {
        let logs = [vec![log(0, 0), log(1, 0)], vec![], vec![log(2, 2)]];
        let mut cumulative = 0;
        logs.into_iter()
            .enumerate()
            .map(|(index, logs)| {
                let gas_used = 21_000 + 1_000 * index as u64;
                cumulative += gas_used;
                Receipt {
                    tx_type: 2,
                    status: 1,
                    cumulative_gas_used: cumulative,
                    gas_used,
                    logs,
                    tx_hash: tx_hash(index),
                    tx_index: index as u64,
                    block_hash: BLOCK.hash,
                    block_number: Some(BLOCK.number),
                    ..Default::default()
                }
            })
            .collect()
    }

    fn validate(receipts: &[Receipt]) -> Result<(), ReceiptError> {
        let root = receipts_root(&self::receipts());
        let hashes = (0..receipts.len()).map(tx_hash).collect::<Vec<_>>();
        let receipts = receipts.iter().cloned().map(Some).collect::<Vec<_>>();
        validate_receipts(&BLOCK, root, &hashes, &receipts)
    }

    /// The root of a trie holding `value` as its only leaf, at key `rlp(0)`.
    fn single_leaf_root(value: &[u8]) -> H256 {
        let mut leaf = RlpStream::new_list(2);
        leaf.append(&[0x20u8, 0x80].as_slice());
        leaf.append(&value);
        H256(keccak256(leaf.out()))
    }

    #[test]
    fn accepts_consistent_receipts() {
        assert_eq!(validate(&receipts()), Ok(()));
    }

    #[test]
    fn accepts_empty_blocks() {
        assert_eq!(validate_receipts(&BLOCK, EMPTY_TRIE_ROOT, &[], &[]), Ok(()));
        assert_eq!(
            validate_receipts(&BLOCK, H256::repeat_byte(1), &[], &[]),
            Err(ReceiptError::NoTxButNotEmptyTrieRoot(H256::repeat_byte(1)))
        );
    }

    #[test]
    fn rejects_count_mismatch_and_missing_receipts() {
        let root = receipts_root(&receipts());
        assert_eq!(
            validate_receipts(&BLOCK, root, &[tx_hash(0)], &[]),
            Err(ReceiptError::CountMismatch {
                receipts: 0,
                txs: 1
            })
        );
        assert_eq!(
            validate_receipts(&BLOCK, root, &[tx_hash(0)], &[None]),
            Err(ReceiptError::NilReceipt(0))
        );
    }

    #[test]
    fn single_receipt_passes_iff_root_matches() {
        let receipt = receipts().remove(0);
        let root = single_leaf_root(&encode_receipt(&receipt));
        assert_eq!(receipts_root(&[receipt.clone()]), root);
        assert_eq!(
            validate_receipts(&BLOCK, root, &[tx_hash(0)], &[Some(receipt.clone())]),
            Ok(())
        );
        assert!(matches!(
            validate_receipts(&BLOCK, H256::zero(), &[tx_hash(0)], &[Some(receipt)]),
            Err(ReceiptError::RootMismatch { .. })
        ));
    }

    #[test]
    fn reports_each_mutated_field() {
        type Mutation = fn(&mut Vec<Receipt>);
        let cases: [(Mutation, ReceiptError); 11] = [
            (
                |r| r[1].tx_index = 5,
                ReceiptError::TxIndexMismatch { index: 1, got: 5 },
            ),
            (
                |r| r[2].block_number = None,
                ReceiptError::MissingBlockNumber(2),
            ),
            (
                |r| r[0].block_number = Some(99),
                ReceiptError::BlockNumberMismatch {
                    index: 0,
                    got: 99,
                    expected: 100,
                },
            ),
            (
                |r| r[1].block_hash = H256::zero(),
                ReceiptError::BlockHashMismatch {
                    index: 1,
                    got: H256::zero(),
                    expected: BLOCK.hash,
                },
            ),
            (
                |r| r[1].gas_used += 1,
                ReceiptError::GasUsedMismatch {
                    index: 1,
                    got: 22_001,
                    expected: 22_000,
                },
            ),
            (
                |r| r[2].logs[0].log_index = Some(U256::from(1)),
                ReceiptError::LogIndexMismatch { index: 2, log: 0 },
            ),
            (
                |r| r[0].logs[1].transaction_index = Some(U64::from(1)),
                ReceiptError::LogTxIndexMismatch { index: 0, log: 1 },
            ),
            (
                |r| r[0].logs[0].block_hash = Some(H256::zero()),
                ReceiptError::LogBlockHashMismatch { index: 0, log: 0 },
            ),
            (
                |r| r[2].logs[0].block_number = None,
                ReceiptError::LogBlockNumberMismatch { index: 2, log: 0 },
            ),
            (
                |r| r[0].logs[1].transaction_hash = Some(tx_hash(1)),
                ReceiptError::LogTxHashMismatch { index: 0, log: 1 },
            ),
            (
                |r| r[2].logs[0].removed = Some(true),
                ReceiptError::LogRemoved { index: 2, log: 0 },
            ),
        ];

        for (mutate, expected) in cases {
            let mut receipts = receipts();
            mutate(&mut receipts);
            assert_eq!(validate(&receipts), Err(expected));
        }
    }

    #[test]
    fn rejects_changed_receipt_contents() {
        let mut receipts = receipts();
        receipts[1].status = 0;
        assert!(matches!(
            validate(&receipts),
            Err(ReceiptError::RootMismatch { .. })
        ));
    }

    #[test]
    fn encodes_receipt_types() {
        let mut receipt = receipts().remove(1);
        receipt.tx_type = 0;
        let legacy = encode_receipt(&receipt);
        // A list longer than 55 bytes, led by a success status.
        assert_eq!(legacy[0], 0xf9);
        assert_eq!(legacy[3], 0x01);

        for tx_type in [1, 2, 3] {
            receipt.tx_type = tx_type;
            let typed = encode_receipt(&receipt);
            assert_eq!(typed[0], tx_type);
            assert_eq!(&typed[1..], legacy.as_slice());
        }

        receipt.tx_type = 0x42;
        assert!(encode_receipt(&receipt).is_empty());
    }

    #[test]
    fn deposit_receipts_root_depends_on_canyon() {
        let mut receipt = receipts().remove(0);
        receipt.tx_type = DEPOSIT_TX_TYPE;
        receipt.deposit_nonce = Some(7);
        receipt.deposit_receipt_version = Some(1);

        let canyon = encode_receipt(&receipt);
        let canyon_root = receipts_root(&[receipt.clone()]);
        assert_eq!(canyon_root, single_leaf_root(&canyon));

        let mut fields = RlpStream::new_list(6);
        fields.append(&1u64);
        fields.append(&receipt.cumulative_gas_used);
        fields.append(&receipt.logs_bloom.as_bytes());
        fields.append_list(&receipt.logs);
        fields.append(&7u64);
        fields.append(&1u64);
        assert_eq!(canyon[0], DEPOSIT_TX_TYPE);
        assert_eq!(&canyon[1..], &fields.out()[..]);

        receipt.deposit_receipt_version = None;
        let pre_canyon = encode_receipt(&receipt);
        assert_eq!(pre_canyon.len() + 2, canyon.len());
        assert_ne!(receipts_root(&[receipt]), canyon_root);
    }

    #[test]
    fn reads_deposit_fields_from_rpc_receipts() {
        let receipt: TransactionReceipt = serde_json::from_value(serde_json::json!({
            "transactionHash": format!("{:?}", tx_hash(0)),
            "transactionIndex": "0x0",
            "blockHash": format!("{:?}", BLOCK.hash),
            "blockNumber": "0x64",
            "from": format!("{:?}", Address::repeat_byte(1)),
            "to": null,
            "cumulativeGasUsed": "0x5208",
            "gasUsed": "0x5208",
            "contractAddress": null,
            "logs": [],
            "logsBloom": format!("0x{}", "00".repeat(256)),
            "status": "0x1",
            "type": "0x7e",
            "effectiveGasPrice": "0x0",
            "depositNonce": "0x7",
            "depositReceiptVersion": "0x1"
        }))
        .unwrap();

        let receipt = Receipt::from(receipt);
        assert_eq!(receipt.tx_type, DEPOSIT_TX_TYPE);
        assert_eq!(receipt.status, 1);
        assert_eq!(receipt.gas_used, 21_000);
        assert_eq!(receipt.block_number, Some(100));
        assert_eq!(receipt.deposit_nonce, Some(7));
        assert_eq!(receipt.deposit_receipt_version, Some(1));
    }
}
