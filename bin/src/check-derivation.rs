use anyhow::{anyhow, bail, Result};
use clap::{ArgAction, Parser, Subcommand};
use ethers::{
    core::rand::{rngs::StdRng, Rng, SeedableRng},
    providers::{Http, Middleware, Provider},
    signers::{LocalWallet, Signer},
    types::{
        transaction::{
            eip2718::TypedTransaction,
            eip2930::{AccessList, AccessListItem},
        },
        BlockNumber, Bytes, Eip1559TransactionRequest, Eip2930TransactionRequest,
        TransactionRequest, H256, U256,
    },
};
use op_toolkit::{
    init_tracing_subscriber, intrinsic_gas, parse_duration, vanity_address, ReorgDetector,
};
use op_toolkit_interop::{with_retry, BlockInfo, EthersChain};
use std::{collections::HashMap, sync::Arc, time::Duration};

/// The devnet's pre-funded account.
const DEVNET_PRIVATE_KEY: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
/// The L2 block time assumed while waiting for receipts.
const L2_BLOCK_TIME: Duration = Duration::from_secs(2);
/// The number of times a missing receipt is polled for.
const MAX_RECEIPT_RETRIES: u64 = 30;
/// The transaction types exercised, in the order they are sent.
const TX_KINDS: [TxKind; 4] = [
    TxKind::LegacyUnprotected,
    TxKind::Legacy,
    TxKind::AccessList,
    TxKind::DynamicFee,
];

/// Arguments for the `check-derivation` binary.
#[derive(Parser, Debug)]
#[command(author, version, about = "Optimism derivation checker")]
struct Args {
    /// Verbosity level (0-4)
    #[arg(long, short, help = "Verbosity level (0-4)", action = ArgAction::Count, env = "VERBOSITY")]
    v: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Detects unsafe block reorgs.
    #[command(name = "detect-l2-reorg")]
    DetectL2Reorg {
        /// The L2 RPC URL.
        #[arg(long, env = "L2_RPC_URL", default_value = "http://127.0.0.1:9545")]
        l2_rpc_url: String,
        /// The interval at which the unsafe head is polled.
        #[arg(long, value_parser = parse_duration, default_value = "500ms")]
        polling_interval: Duration,
    },
    /// Checks that sent transactions are consolidated into safe blocks.
    #[command(name = "check-consolidation")]
    CheckConsolidation {
        /// The L2 RPC URL.
        #[arg(long, env = "L2_RPC_URL", default_value = "http://127.0.0.1:9545")]
        l2_rpc_url: String,
        /// The interval at which the safe head is polled.
        #[arg(long, value_parser = parse_duration, default_value = "1s")]
        polling_interval: Duration,
        /// Private key for signing L2 transactions. Defaults to the devnet pre-funded account.
        #[arg(long, default_value = DEVNET_PRIVATE_KEY, hide_default_value = true)]
        private_key: String,
        /// Number of transactions to send. At least 4, to send every transaction type.
        #[arg(long, default_value_t = 4)]
        tx_count: usize,
        /// The L2 chain id.
        #[arg(long, default_value_t = 901)]
        l2_chain_id: u64,
    },
}

#[derive(Debug, Clone, Copy)]
enum TxKind {
    /// A legacy transaction without replay protection.
    LegacyUnprotected,
    Legacy,
    AccessList,
    DynamicFee,
}

#[tokio::main]
async fn main() -> Result<()> {
    let Args { v, command } = Args::parse();
    init_tracing_subscriber(v)?;

    match command {
        Command::DetectL2Reorg {
            l2_rpc_url,
            polling_interval,
        } => detect_l2_reorg(&l2_rpc_url, polling_interval).await,
        Command::CheckConsolidation {
            l2_rpc_url,
            polling_interval,
            private_key,
            tx_count,
            l2_chain_id,
        } => {
            check_consolidation(
                &l2_rpc_url,
                polling_interval,
                &private_key,
                tx_count,
                l2_chain_id,
            )
            .await
        }
    }
}

/// Polls the unsafe head and reports every height whose hash changes.
async fn detect_l2_reorg(url: &str, polling_interval: Duration) -> Result<()> {
    let chain = EthersChain::new(Arc::new(Provider::<Http>::try_from(url)?));
    let mut detector = ReorgDetector::default();
    loop {
        let head = chain.block_ref(BlockNumber::Latest).await?;
        let (reorgs, advanced) = detector.observe(&head);
        for reorg in reorgs {
            tracing::error!(target: "check-derivation", "Unsafe head reorg at block {}: {:?} -> {:?}", reorg.number, reorg.previous, reorg.current);
        }
        if advanced {
            tracing::info!(target: "check-derivation", "Fetched unsafe block {} ({:?})", head.number, head.hash);
        }
        tokio::time::sleep(polling_interval).await;
    }
}

/// Sends `tx_count` transactions of every type, then waits for the blocks including them to
/// become safe, checking that they were not reorged.
async fn check_consolidation(
    url: &str,
    polling_interval: Duration,
    private_key: &str,
    tx_count: usize,
    l2_chain_id: u64,
) -> Result<()> {
    if tx_count < TX_KINDS.len() {
        bail!(
            "tx count {} is too low, at least {} txs are needed to send every tx type",
            tx_count,
            TX_KINDS.len()
        );
    }
    let provider = Arc::new(Provider::<Http>::try_from(url)?);
    let chain = EthersChain::new(Arc::clone(&provider));
    let wallet = private_key
        .trim_start_matches("0x")
        .parse::<LocalWallet>()?
        .with_chain_id(l2_chain_id);
    let mut rng = StdRng::seed_from_u64(1337);

    let mut included = HashMap::new();
    for i in 0..tx_count {
        let kind = TX_KINDS[i % TX_KINDS.len()];
        let raw = random_signed_transaction(&provider, &wallet, &mut rng, kind).await?;
        let pending = provider.send_raw_transaction(raw).await?;
        let tx_hash = pending.tx_hash();
        tracing::info!(target: "check-derivation", "Sent {:?} transaction {:?}", kind, tx_hash);
        let block = confirm_transaction(&provider, tx_hash).await?;
        included.insert(tx_hash, block);
    }

    let mut last_safe = 0;
    let mut checked = 0;
    let mut failed = false;
    loop {
        let safe = chain.block_ref(BlockNumber::Safe).await?;
        tracing::info!(target: "check-derivation", "Fetched safe head {} ({:?}), {} txs remaining", safe.number, safe.hash, tx_count - checked);

        for (tx_hash, block) in &included {
            if last_safe >= block.number || safe.number < block.number {
                continue;
            }
            let safe_hash = if safe.number == block.number {
                safe.hash
            } else {
                chain.block_ref(block.number).await?.hash
            };
            if safe_hash == block.hash {
                tracing::info!(target: "check-derivation", "Transaction {:?} included at safe block {}", tx_hash, block.number);
            } else {
                tracing::error!(target: "check-derivation", "Block {} including transaction {:?} was reorged: {:?} -> {:?}", block.number, tx_hash, block.hash, safe_hash);
                failed = true;
            }
            checked += 1;
        }

        if checked == tx_count {
            if failed {
                tracing::error!(target: "check-derivation", "Failed");
                bail!("Transactions were reorged out of their blocks");
            }
            tracing::info!(target: "check-derivation", "Succeeded");
            return Ok(());
        }
        last_safe = safe.number;
        tokio::time::sleep(polling_interval).await;
    }
}

/// Builds and signs a transaction of `kind` sending 1 wei and random data to a random address.
async fn random_signed_transaction(
    provider: &Provider<Http>,
    wallet: &LocalWallet,
    rng: &mut StdRng,
    kind: TxKind,
) -> Result<Bytes> {
    let to = vanity_address(rng.gen(), 0xdeadbeef);
    let data = Bytes::from(rng.gen::<[u8; 10]>().to_vec());
    let nonce = provider
        .get_transaction_count(wallet.address(), Some(BlockNumber::Pending.into()))
        .await?;
    let gas_price = provider.get_gas_price().await?;
    let chain_id = wallet.chain_id();

    let legacy = TransactionRequest::new()
        .from(wallet.address())
        .to(to)
        .value(1)
        .data(data.clone())
        .nonce(nonce)
        .gas_price(gas_price)
        .gas(intrinsic_gas(&data, &AccessList::default()));

    let tx: TypedTransaction = match kind {
        TxKind::LegacyUnprotected => {
            let signature = wallet.sign_hash(legacy.sighash())?;
            return Ok(legacy.rlp_signed(&signature));
        }
        TxKind::Legacy => legacy.chain_id(chain_id).into(),
        TxKind::AccessList => {
            let access_list = AccessList(vec![AccessListItem {
                address: to,
                storage_keys: vec![H256::from_low_u64_be(0x1234)],
            }]);
            let gas = intrinsic_gas(&data, &access_list);
            Eip2930TransactionRequest::new(legacy.chain_id(chain_id).gas(gas), access_list).into()
        }
        TxKind::DynamicFee => {
            let tip: U256 = provider
                .request("eth_maxPriorityFeePerGas", ())
                .await
                .map_err(|e| anyhow!("failed to get gas tip cap: {}", e))?;
            Eip1559TransactionRequest::new()
                .from(wallet.address())
                .to(to)
                .value(1)
                .data(data.clone())
                .nonce(nonce)
                .gas(intrinsic_gas(&data, &AccessList::default()))
                .max_fee_per_gas(gas_price)
                .max_priority_fee_per_gas(tip)
                .chain_id(chain_id)
                .into()
        }
    };
    let signature = wallet.sign_transaction_sync(&tx)?;
    Ok(tx.rlp_signed(&signature))
}

/// Waits for the receipt of `tx_hash`, returning the block that includes it.
async fn confirm_transaction(provider: &Provider<Http>, tx_hash: H256) -> Result<BlockInfo> {
    for _ in 0..=MAX_RECEIPT_RETRIES {
        let receipt =
            with_retry(move || async move { Ok(provider.get_transaction_receipt(tx_hash).await?) })
                .await?;
        match receipt {
            Some(receipt) => {
                let block = BlockInfo {
                    hash: receipt
                        .block_hash
                        .ok_or_else(|| anyhow!("Receipt is missing its block hash"))?,
                    number: receipt
                        .block_number
                        .ok_or_else(|| anyhow!("Receipt is missing its block number"))?
                        .as_u64(),
                    timestamp: 0,
                };
                tracing::info!(target: "check-derivation", "Transaction {:?} included in block {} with status {:?}", tx_hash, block.number, receipt.status);
                return Ok(block);
            }
            None => {
                tracing::info!(target: "check-derivation", "Waiting for receipt of transaction {:?}", tx_hash);
                tokio::time::sleep(L2_BLOCK_TIME).await;
            }
        }
    }
    bail!("Transaction {:?} was not confirmed", tx_hash)
}
