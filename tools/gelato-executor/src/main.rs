use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use alloy_primitives::{Address, U256};
use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use ethers::{
    middleware::SignerMiddleware,
    providers::{Http, Middleware, Provider},
    signers::{LocalWallet, Signer},
    utils::parse_units,
};
use gelato_abi_encoder::encode_with_selector_json;
use gelato_exec_engine::{
    CoreGasPriceOracle, EligibilityEngine, EngineConfig, ExecutionDriver, Executor, PollOutcome,
    TrackedReceipt, TxOptions, Verdict,
};
use gelato_task_types::{GasPriceOracle, TaskReceipt};
use regex::Regex;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod records;
mod rpc;

use records::{append_record, read_records, ExecutionRecord, RecordOutcome};
use rpc::{from_eu256, RpcChainReader, RpcExecBackend, RpcTaskRegistry};

/// Gelato executor: evaluate `canExec` for task receipts, send `exec`, keep an execution log.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// JSON-RPC endpoint of the chain the registry lives on.
    #[arg(long, env = "RPC_URL", global = true)]
    rpc_url: Option<String>,

    /// Address of the GelatoCore registry. Overrides `gelato_core` from `--config`.
    #[arg(long, env = "GELATO_CORE", global = true)]
    gelato_core: Option<Address>,

    /// JSON file with engine settings (shares, gas overheads, read timeout, ...).
    #[arg(long, env = "GELATO_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the gelato gas price as resolved through the registry's oracle.
    GasPrice,

    /// Evaluate `canExec` for a receipt without sending anything.
    CanExec {
        /// Task receipt as JSON.
        #[arg(long)]
        receipt: PathBuf,

        /// Gas price to evaluate at (eg `40gwei`). Defaults to the oracle price.
        #[arg(long)]
        gas_price: Option<String>,

        /// Gas limit to evaluate at. Defaults to the head task's limit.
        #[arg(long)]
        gas_limit: Option<u64>,

        /// Executor the check is made for.
        #[arg(long, env = "EXECUTOR")]
        executor: Option<Address>,

        /// Also ask the registry's own `canExec` view and compare.
        #[arg(long)]
        registry: bool,
    },

    /// Execute the head task of a receipt once.
    Exec {
        #[arg(long)]
        receipt: PathBuf,

        #[arg(long)]
        gas_price: Option<String>,

        #[command(flatten)]
        key: KeyArgs,

        #[command(flatten)]
        log: LogArgs,
    },

    /// Poll receipts and execute them whenever they become eligible.
    Watch {
        /// Task receipts as JSON, one file each.
        #[arg(long = "receipt", required = true)]
        receipts: Vec<PathBuf>,

        #[arg(long, default_value_t = 15)]
        interval_secs: u64,

        #[command(flatten)]
        key: KeyArgs,

        #[command(flatten)]
        log: LogArgs,
    },

    /// Print the execution log.
    Records {
        #[command(flatten)]
        log: LogArgs,
    },

    /// Encode call data for a function of a JSON ABI (abi-encode-withselector).
    Encode {
        /// ABI JSON, either a bare array or a build artifact with an `abi` field.
        #[arg(long)]
        abi: PathBuf,

        #[arg(long)]
        function: String,

        /// Arguments as a JSON array, eg `["0x…", "40000000000"]`.
        #[arg(long, default_value = "[]")]
        args: String,
    },
}

#[derive(Args, Debug)]
struct KeyArgs {
    /// Path to a file containing the executor private key.
    #[arg(long, env = "PRIV_KEY_PATH", conflicts_with = "private_key")]
    private_key_path: Option<PathBuf>,

    /// Executor private key (hex string, 0x...).
    #[arg(long, env = "PKEY", conflicts_with = "private_key_path")]
    private_key: Option<String>,
}

#[derive(Args, Debug)]
struct LogArgs {
    /// Path of the JSON execution log.
    #[arg(long, default_value = "executions.devnet.json")]
    records_path: PathBuf,

    /// Network name stored in the execution log (eg, devnet, mainnet).
    #[arg(long, default_value = "devnet")]
    network: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    match &cli.command {
        Command::Encode { abi, function, args } => {
            let abi_json = fs::read_to_string(abi)
                .with_context(|| format!("failed reading {}", abi.display()))?;
            let data = encode_with_selector_json(&abi_json, function, args)
                .with_context(|| format!("failed encoding `{function}`"))?;
            println!("0x{}", hex::encode(&data));
        }
        Command::GasPrice => {
            let config = load_config(&cli)?;
            let reader = Arc::new(RpcChainReader::new(connect(&cli)?, None));
            let oracle =
                CoreGasPriceOracle::new(reader, config.gelato_core, config.read_timeout());
            let price = oracle
                .current_gas_price()
                .await
                .context("failed reading gas price")?;
            println!("{price}");
        }
        Command::CanExec { receipt, gas_price, gas_limit, executor, registry } => {
            let config = load_config(&cli)?;
            let receipt = load_receipt(receipt)?;
            let reader = Arc::new(RpcChainReader::new(connect(&cli)?, *executor));
            let gas_price = resolve_gas_price(gas_price.as_deref(), &reader, &config).await?;
            let gas_limit = gas_limit
                .map(U256::from)
                .unwrap_or_else(|| head_gas_limit(&receipt, &config));

            let engine = EligibilityEngine::new(config.clone());
            let verdict = engine
                .can_exec(reader.as_ref(), &receipt, gas_limit, gas_price)
                .await
                .context("canExec could not be evaluated")?;
            println!("{verdict}");

            if *registry {
                let answer = reader
                    .registry_can_exec(config.gelato_core, &receipt, gas_limit, gas_price)
                    .await
                    .context("registry canExec failed")?;
                let onchain: Verdict = answer.parse()?;
                if onchain != verdict {
                    warn!(
                        local = %verdict,
                        registry = %answer,
                        "canExec disagrees with the registry"
                    );
                }
                println!("registry: {answer}");
            }
        }
        Command::Exec { receipt, gas_price, key, log } => {
            let config = load_config(&cli)?;
            let receipt = load_receipt(receipt)?;
            let provider = connect(&cli)?;
            let client = signer_client(&provider, key).await?;
            let backend = RpcExecBackend::new(client, config.gelato_core);
            let executor = backend.executor();
            let reader = Arc::new(RpcChainReader::new(provider, Some(executor)));
            let gas_price = resolve_gas_price(gas_price.as_deref(), &reader, &config).await?;
            let gas_limit = head_gas_limit(&receipt, &config);

            let engine = EligibilityEngine::new(config.clone());
            let verdict = engine
                .can_exec(reader.as_ref(), &receipt, gas_limit, gas_price)
                .await
                .context("canExec could not be evaluated")?;
            if let Verdict::NotOk(err) = verdict {
                bail!("task receipt {} is not executable: {err}", receipt.id);
            }

            let driver = ExecutionDriver::new(backend);
            let mut tracked = TrackedReceipt::new(receipt);
            let opts = TxOptions {
                executor,
                gas_limit: gas_limit.saturating_add(U256::from(config.exec_gas_buffer)),
                gas_price,
            };
            let outcome = match driver.exec(&mut tracked, &opts).await {
                Ok(result) => {
                    println!(
                        "Executed task receipt {}: payout {} wei, {} tasks left",
                        tracked.id(),
                        result.success.executor_payout,
                        result.remaining_tasks
                    );
                    RecordOutcome::Executed {
                        success: result.success,
                        state: result.state,
                        remaining_tasks: result.remaining_tasks,
                    }
                }
                Err(err) => {
                    eprintln!("exec failed: {err}");
                    RecordOutcome::Failed {
                        error: err.to_string(),
                    }
                }
            };
            let record = ExecutionRecord::now(tracked.id(), outcome);
            append_record(&log.records_path, &log.network, &record)?;
        }
        Command::Watch { receipts, interval_secs, key, log } => {
            let config = load_config(&cli)?;
            let provider = connect(&cli)?;
            let client = signer_client(&provider, key).await?;
            let backend = RpcExecBackend::new(client.clone(), config.gelato_core);
            let executor_address = backend.executor();
            let reader = Arc::new(RpcChainReader::new(provider, Some(executor_address)));
            let read_timeout = config.read_timeout();
            let oracle = CoreGasPriceOracle::new(reader.clone(), config.gelato_core, read_timeout);
            let registry =
                RpcTaskRegistry::new(client, reader.clone(), config.gelato_core, read_timeout);

            let mut tracked = Vec::with_capacity(receipts.len());
            for path in receipts {
                let receipt = load_receipt(path)?;
                registry.remember(receipt.clone()).await;
                tracked.push(TrackedReceipt::new(receipt));
            }
            let mut executor = Executor::new(
                EligibilityEngine::new(config),
                reader,
                oracle,
                backend,
                registry,
                executor_address,
            );
            for receipt in tracked {
                executor.track(receipt);
            }
            info!(
                executor = %executor_address,
                tracked = executor.tracked().len(),
                "watching task receipts"
            );

            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("interrupted");
                    let _ = shutdown_tx.send(true);
                }
            });
            let interval = Duration::from_secs((*interval_secs).max(1));
            executor
                .run(interval, shutdown_rx, |id, outcome| {
                    let Some(outcome) = record_outcome(outcome) else {
                        return;
                    };
                    let record = ExecutionRecord::now(id, outcome);
                    if let Err(err) = append_record(&log.records_path, &log.network, &record) {
                        warn!(receipt_id = %id, "failed appending execution record: {err:#}");
                    }
                })
                .await;
        }
        Command::Records { log } => {
            for record in read_records(&log.records_path)? {
                let summary = match &record.outcome {
                    RecordOutcome::Executed { success, state, remaining_tasks } => format!(
                        "executed: payout {} wei, {:?}, {} tasks left",
                        success.executor_payout, state, remaining_tasks
                    ),
                    RecordOutcome::Failed { error } => format!("failed: {error}"),
                };
                println!("{} receipt {} {}", record.recorded_at, record.receipt_id, summary);
            }
        }
    }
    Ok(())
}

/// Outcomes worth a line in the execution log.
fn record_outcome(outcome: &PollOutcome) -> Option<RecordOutcome> {
    match outcome {
        PollOutcome::Executed(result) => Some(RecordOutcome::Executed {
            success: result.success.clone(),
            state: result.state,
            remaining_tasks: result.remaining_tasks,
        }),
        PollOutcome::Failed(err) => Some(RecordOutcome::Failed {
            error: err.to_string(),
        }),
        _ => None,
    }
}

fn load_config(cli: &Cli) -> Result<EngineConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("failed reading {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("failed parsing JSON in {}", path.display()))?
        }
        None => EngineConfig::default(),
    };
    if let Some(core) = cli.gelato_core {
        config.gelato_core = core;
    }
    if config.gelato_core.is_zero() {
        bail!("missing registry address: provide --gelato-core (or set GELATO_CORE)");
    }
    config.validate().context("invalid engine config")?;
    Ok(config)
}

fn connect(cli: &Cli) -> Result<Arc<Provider<Http>>> {
    let url = cli
        .rpc_url
        .as_deref()
        .ok_or_else(|| anyhow!("missing RPC endpoint: provide --rpc-url (or set RPC_URL)"))?;
    let provider =
        Provider::<Http>::try_from(url).with_context(|| format!("invalid RPC URL {url}"))?;
    Ok(Arc::new(provider))
}

async fn signer_client(
    provider: &Provider<Http>,
    key: &KeyArgs,
) -> Result<Arc<rpc::SignerClient>> {
    let raw = match (&key.private_key_path, &key.private_key) {
        (Some(path), _) => {
            fs::read_to_string(path).with_context(|| format!("failed reading {}", path.display()))?
        }
        (None, Some(pk)) => pk.clone(),
        (None, None) => {
            return Err(anyhow!(
                "missing executor key: provide --private-key-path or --private-key (or set PRIV_KEY_PATH/PKEY)"
            ))
        }
    };
    let chain_id = provider.get_chainid().await.context("failed reading chain id")?;
    let wallet: LocalWallet = raw
        .trim()
        .trim_start_matches("0x")
        .parse()
        .context("invalid executor private key")?;
    let wallet = wallet.with_chain_id(chain_id.low_u64());
    Ok(Arc::new(SignerMiddleware::new(provider.clone(), wallet)))
}

fn load_receipt(path: &Path) -> Result<TaskReceipt> {
    let raw =
        fs::read_to_string(path).with_context(|| format!("failed reading {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("failed parsing task receipt in {}", path.display()))
}

async fn resolve_gas_price(
    flag: Option<&str>,
    reader: &Arc<RpcChainReader>,
    config: &EngineConfig,
) -> Result<U256> {
    match flag {
        Some(raw) => parse_gas_price(raw),
        None => CoreGasPriceOracle::new(reader.clone(), config.gelato_core, config.read_timeout())
            .current_gas_price()
            .await
            .context("failed reading gas price from the oracle"),
    }
}

fn head_gas_limit(receipt: &TaskReceipt, config: &EngineConfig) -> U256 {
    match receipt.head().map(|task| task.self_provider_gas_limit) {
        Some(limit) if !limit.is_zero() => limit,
        _ => U256::from(config.gelato_max_gas),
    }
}

/// Parses `40gwei`, `0.5 gwei`, `1000000000` (wei) and the like.
fn parse_gas_price(raw: &str) -> Result<U256> {
    let re = Regex::new(r"^\s*([0-9]+(?:\.[0-9]+)?)\s*(wei|gwei|ether)?\s*$")?;
    let caps = re
        .captures(raw)
        .ok_or_else(|| anyhow!("invalid gas price `{raw}` (eg 40gwei)"))?;
    let amount = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
    let unit = caps.get(2).map(|m| m.as_str()).unwrap_or("wei");
    let parsed = parse_units(amount, unit).with_context(|| format!("invalid gas price `{raw}`"))?;
    Ok(from_eu256(parsed.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_gas_price_units() {
        assert_eq!(parse_gas_price("40gwei").unwrap(), U256::from(40_000_000_000u64));
        assert_eq!(parse_gas_price(" 0.5 gwei ").unwrap(), U256::from(500_000_000u64));
        assert_eq!(parse_gas_price("1000").unwrap(), U256::from(1_000u64));
        assert!(parse_gas_price("40 shannon").is_err());
        assert!(parse_gas_price("gwei").is_err());
    }

    #[test]
    fn test_cli_parses_watch() {
        let cli = Cli::try_parse_from([
            "gelato-executor",
            "--gelato-core",
            "0x0000000000000000000000000000000000001001",
            "watch",
            "--receipt",
            "a.json",
            "--receipt",
            "b.json",
            "--private-key",
            "0x01",
        ])
        .unwrap();
        match cli.command {
            Command::Watch { receipts, interval_secs, .. } => {
                assert_eq!(receipts.len(), 2);
                assert_eq!(interval_secs, 15);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_cli_parses_records() {
        let cli = Cli::try_parse_from([
            "gelato-executor",
            "records",
            "--records-path",
            "logs/executions.json",
        ])
        .unwrap();
        match cli.command {
            Command::Records { log } => {
                assert_eq!(log.records_path, PathBuf::from("logs/executions.json"));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_record_outcome_skips_ineligible_rounds() {
        use gelato_exec_engine::{EligibilityError, ExecutionError};

        let waiting = PollOutcome::NotEligible(EligibilityError::ProviderIlliquid);
        assert_eq!(record_outcome(&waiting), None);
        let failed = PollOutcome::Failed(ExecutionError::InvalidExecutor(Address::ZERO));
        assert!(matches!(
            record_outcome(&failed),
            Some(RecordOutcome::Failed { error }) if error.contains("executor")
        ));
    }
}
