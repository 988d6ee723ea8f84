use anyhow::Result;
use clap::{ArgAction, Parser};
use ethers::types::Address;
use op_toolkit::{init_tracing_subscriber, parse_address, parse_duration};
use op_toolkit_driver::{
    Config, Driver, GameMonitor, TraceType, DEFAULT_CANNON_INFO_FREQ, DEFAULT_CANNON_SNAPSHOT_FREQ,
};
use op_toolkit_solvers::trace::cannon::CannonConfig;
use std::{path::PathBuf, time::Duration};

/// Arguments for the `op-challenger` binary.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Verbosity level (0-4)
    #[arg(long, short, help = "Verbosity level (0-4)", action = ArgAction::Count, env = "VERBOSITY")]
    v: u8,

    /// The RPC endpoint of the L1 node used to read games and send transactions.
    #[arg(long, env = "OP_CHALLENGER_L1_ETH_RPC")]
    l1_eth_rpc: String,

    /// The address of the dispute game factory contract.
    #[arg(long, env = "OP_CHALLENGER_GAME_FACTORY_ADDRESS", value_parser = parse_address)]
    game_factory_address: Address,

    /// Only play these games. All games are played when empty.
    #[arg(long, env = "OP_CHALLENGER_GAME_ALLOWLIST", value_parser = parse_address, value_delimiter = ',')]
    game_allowlist: Vec<Address>,

    /// Whether the agent agrees with the proposed output, and so defends root claims.
    #[arg(long, env = "OP_CHALLENGER_AGREE_WITH_PROPOSED_OUTPUT")]
    agree_with_proposed_output: bool,

    /// The trace type, `alphabet` or `cannon`.
    #[arg(long, env = "OP_CHALLENGER_TRACE_TYPE", default_value = "alphabet")]
    trace_type: TraceType,

    /// The alphabet trace, for the alphabet trace type.
    #[arg(long, env = "OP_CHALLENGER_ALPHABET")]
    alphabet: Option<String>,

    /// The directory game data is written to.
    #[arg(long, env = "OP_CHALLENGER_DATADIR")]
    datadir: PathBuf,

    /// The number of games played concurrently.
    #[arg(long, env = "OP_CHALLENGER_MAX_CONCURRENCY")]
    max_concurrency: Option<usize>,

    /// The interval at which the L1 head is polled.
    #[arg(long, env = "OP_CHALLENGER_HTTP_POLL_INTERVAL", value_parser = parse_duration, default_value = "12s")]
    poll_interval: Duration,

    /// Games created longer ago than this are ignored.
    #[arg(long, env = "OP_CHALLENGER_GAME_WINDOW", value_parser = parse_duration, default_value = "7d")]
    game_window: Duration,

    /// Hex encoded private key of the account that submits moves.
    #[arg(long, env = "OP_CHALLENGER_PRIVATE_KEY", hide_env_values = true)]
    private_key: String,

    /// The number of confirmations to wait for after sending a transaction.
    #[arg(long, env = "OP_CHALLENGER_NUM_CONFIRMATIONS", default_value_t = 1)]
    num_confirmations: usize,

    /// Path to the cannon executable.
    #[arg(long, env = "OP_CHALLENGER_CANNON_BIN")]
    cannon_bin: Option<PathBuf>,

    /// Path to the fault proof program server executable.
    #[arg(long, env = "OP_CHALLENGER_CANNON_SERVER")]
    cannon_server: Option<PathBuf>,

    /// Path to the absolute prestate VM state.
    #[arg(long, env = "OP_CHALLENGER_CANNON_PRESTATE")]
    cannon_prestate: Option<PathBuf>,

    /// The RPC endpoint of the L2 node.
    #[arg(long, env = "OP_CHALLENGER_CANNON_L2")]
    cannon_l2: Option<String>,

    /// The named network of the L2 chain.
    #[arg(long, env = "OP_CHALLENGER_CANNON_NETWORK")]
    cannon_network: Option<String>,

    /// Path to the rollup config of a custom L2 chain.
    #[arg(long, env = "OP_CHALLENGER_CANNON_ROLLUP_CONFIG")]
    cannon_rollup_config: Option<PathBuf>,

    /// Path to the genesis of a custom L2 chain.
    #[arg(long, env = "OP_CHALLENGER_CANNON_L2_GENESIS")]
    cannon_l2_genesis: Option<PathBuf>,

    /// Frequency, in VM steps, of cannon snapshots.
    #[arg(long, env = "OP_CHALLENGER_CANNON_SNAPSHOT_FREQ", default_value_t = DEFAULT_CANNON_SNAPSHOT_FREQ)]
    cannon_snapshot_freq: u64,

    /// Frequency, in VM steps, of cannon progress logs.
    #[arg(long, env = "OP_CHALLENGER_CANNON_INFO_FREQ", default_value_t = DEFAULT_CANNON_INFO_FREQ)]
    cannon_info_freq: u64,
}

impl From<Args> for Config {
    fn from(args: Args) -> Self {
        let defaults = Config::default();
        Config {
            l1_eth_rpc: args.l1_eth_rpc.clone(),
            game_factory_address: args.game_factory_address,
            game_allowlist: args.game_allowlist,
            game_window: args.game_window,
            agree_with_proposed_output: args.agree_with_proposed_output,
            trace_type: args.trace_type,
            alphabet_trace: args.alphabet,
            cannon: CannonConfig {
                bin: args.cannon_bin.unwrap_or_default(),
                server: args.cannon_server.unwrap_or_default(),
                prestate: args.cannon_prestate.unwrap_or_default(),
                l1_rpc: args.l1_eth_rpc,
                l2_rpc: args.cannon_l2.unwrap_or_default(),
                network: args.cannon_network,
                rollup_config: args.cannon_rollup_config,
                l2_genesis: args.cannon_l2_genesis,
                snapshot_freq: args.cannon_snapshot_freq,
                info_freq: args.cannon_info_freq,
            },
            datadir: args.datadir,
            max_concurrency: args.max_concurrency.unwrap_or(defaults.max_concurrency),
            poll_interval: args.poll_interval,
            private_key: args.private_key,
            tx_confirmations: args.num_confirmations,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse the command arguments
    let args = Args::parse();

    // Initialize the tracing subscriber
    init_tracing_subscriber(args.v)?;

    // Create and validate the agent config.
    let config = Config::from(args);
    config.check()?;
    tracing::info!(target: "op-challenger-cli", "Config created successfully.");

    // Create the game monitor and connect to the L1 node.
    tracing::debug!(target: "op-challenger-cli", "Creating game monitor and connecting to {}...", config.l1_eth_rpc);
    let monitor = GameMonitor::try_new(config).await?;
    tracing::info!(target: "op-challenger-cli", "Game monitor created successfully.");

    // Start the monitor loop.
    monitor.start().await?;

    Ok(())
}
