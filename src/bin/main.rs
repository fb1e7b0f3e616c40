//! Stakefleet CLI
//!
//!   stakefleet params              → Advertised staking parameter versions
//!   stakefleet build               → Build + sign every wallet, write txs.txt
//!   stakefleet broadcast           → Wait for the activation tip, broadcast txs.txt, write txid.txt
//!   stakefleet stake               → Activation gate, then build → sign → broadcast per wallet
//!   stakefleet fund [--broadcast]  → Batch-fund every wallet from ADDRESS / PRIVATE_KEY
//!
//! Configuration: CLI flags, then environment, then `.env`, then defaults.
//!
//! Output format:
//!   stdout     JSON result (pretty on a terminal or with --pretty)
//!   stderr     {"error": "..."} and exit code 1

use anyhow::{anyhow, bail, Context};
use bitcoin::Amount;
use serde_json::{json, Value};
use stakefleet::fleet::{self, WalletOutcome};
use stakefleet::gate::wait_for_tip;
use stakefleet::logging::init_logging;
use stakefleet::params::max_activation_height;
use stakefleet::{
    artifacts, load_wallets, resolve_fee_rate, select_version, ActivationGate, BabylonApiClient,
    Destination, Fleet, FleetConfig, FundingTxBuilder, GlobalStakingParams, Job, MempoolClient, ParamsClient,
    Pipeline, SpendGuard, StakingTxBuilder, Wallet, WalletRecord,
};
use std::collections::HashMap;
use std::env;
use std::io::IsTerminal;
use std::sync::Arc;
use tracing::{info, warn};

fn main() {
    init_logging();

    let args: Vec<String> = env::args().collect();
    let opts = ParsedArgs::parse(&args[1..]);

    if opts.help {
        print_usage();
        return;
    }

    if opts.version {
        println!("stakefleet {}", env!("CARGO_PKG_VERSION"));
        return;
    }

    let command = match opts.command.clone() {
        Some(cmd) => cmd,
        None => {
            print_usage();
            return;
        }
    };

    let result = tokio::runtime::Runtime::new()
        .context("Failed to create runtime")
        .and_then(|rt| rt.block_on(run(&command, &opts)));

    let pretty = opts.pretty || std::io::stdout().is_terminal();
    let render = |value: &Value| {
        if pretty {
            serde_json::to_string_pretty(value).unwrap_or_default()
        } else {
            serde_json::to_string(value).unwrap_or_default()
        }
    };

    match result {
        Ok(output) => println!("{}", render(&output)),
        Err(e) => {
            eprintln!("{}", render(&json!({"error": format!("{:#}", e)})));
            std::process::exit(1);
        }
    }
}

async fn run(command: &str, opts: &ParsedArgs) -> anyhow::Result<Value> {
    let config = opts.config()?;
    match command {
        "params" => cmd_params(&config).await,
        "build" => cmd_build(&config).await,
        "broadcast" => cmd_broadcast(&config).await,
        "stake" => cmd_stake(&config).await,
        "fund" => cmd_fund(&config, opts.broadcast).await,
        cmd => Err(anyhow!("Unknown command: {}", cmd)),
    }
}

#[derive(Default)]
struct ParsedArgs {
    command: Option<String>,
    /// CLI values keyed by the environment variable they override.
    overrides: HashMap<&'static str, String>,
    broadcast: bool,
    pretty: bool,
    help: bool,
    version: bool,
}

/// Flags that take a value, and the configuration key each one sets.
const VALUE_FLAGS: &[(&str, &str)] = &[
    ("--network", "STAKEFLEET_NETWORK"),
    ("--mempool-url", "MEMPOOL_API_URL"),
    ("--params-url", "BABYLON_API_URL"),
    ("--activation-height", "BABYLON_ACTIVATION_HEIGHT"),
    ("--finality-provider", "FINALITY_PROVIDER"),
    ("--amount", "STAKING_AMOUNT"),
    ("--time", "STAKING_TIME"),
    ("--fee-rate", "FEE_RATE"),
    ("--wallets", "WALLETS_PATH"),
    ("--txs", "TXS_PATH"),
    ("--txids", "TXIDS_PATH"),
    ("--funding-amount", "FUNDING_AMOUNT"),
    ("--funding-fee-rate", "FUNDING_FEE_RATE"),
];

impl ParsedArgs {
    fn parse(args: &[String]) -> Self {
        // Load .env file if present; real environment wins.
        if let Ok(contents) = std::fs::read_to_string(".env") {
            for line in contents.lines() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                if let Some((key, value)) = line.split_once('=') {
                    let value = value.trim().trim_matches('"');
                    if !value.is_empty() && env::var(key.trim()).is_err() {
                        env::set_var(key.trim(), value);
                    }
                }
            }
        }

        let mut opts = ParsedArgs::default();
        let mut positional = Vec::new();
        let mut i = 0;

        while i < args.len() {
            let arg = args[i].as_str();
            match arg {
                "--help" | "-h" => opts.help = true,
                "--version" | "-V" => opts.version = true,
                "--pretty" => opts.pretty = true,
                "--broadcast" => opts.broadcast = true,
                "--strict" => {
                    opts.overrides.insert("STRICT_POLICY", "true".into());
                }
                "--lenient" => {
                    opts.overrides.insert("STRICT_POLICY", "false".into());
                }
                "--data-embed" => {
                    opts.overrides.insert("DATA_EMBED", "true".into());
                }
                _ => {
                    if let Some((_, key)) = VALUE_FLAGS.iter().find(|(flag, _)| *flag == arg) {
                        if i + 1 < args.len() {
                            opts.overrides.insert(*key, args[i + 1].clone());
                            i += 1;
                        }
                    } else if !arg.starts_with('-') {
                        positional.push(arg.to_string());
                    }
                }
            }
            i += 1;
        }

        if !positional.is_empty() {
            opts.command = Some(positional.remove(0));
        }
        opts
    }

    fn config(&self) -> anyhow::Result<FleetConfig> {
        FleetConfig::from_lookup(|key| self.overrides.get(key).cloned().or_else(|| env::var(key).ok()))
            .map_err(|e| anyhow!(e))
    }
}

fn print_usage() {
    println!(
        r#"stakefleet - staking transaction fleet

USAGE:
    stakefleet <command> [options]

COMMANDS:
    params                  Print advertised staking parameter versions
    build                   Build and sign every wallet's staking transaction (writes txs)
    broadcast               Wait for the activation tip, broadcast txs (writes txids)
    stake                   Activation gate, then build, sign and broadcast per wallet
    fund                    Batch-fund every wallet from ADDRESS / PRIVATE_KEY

OPTIONS:
    --network <net>             bitcoin|testnet|signet|regtest (env: STAKEFLEET_NETWORK)
    --mempool-url <url>         Esplora API base (env: MEMPOOL_API_URL)
    --params-url <url>          Staking API base (env: BABYLON_API_URL)
    --activation-height <h>     Target activation height (env: BABYLON_ACTIVATION_HEIGHT)
    --finality-provider <hex>   x-only finality provider key (env: FINALITY_PROVIDER)
    --amount <sats>             Staking amount (default: max - 50000)
    --time <blocks>             Staking time (default: advertised minimum)
    --fee-rate <rate>           sat/vB or tier[*multiplier], e.g. 20, fastest, hour*2
    --wallets <path>            Wallet file (default: wallets.json)
    --txs <path>                Signed transaction output (default: txs.txt)
    --txids <path>              Broadcast txid output (default: txid.txt)
    --funding-amount <sats>     Per-wallet funding amount (default: 4999700)
    --funding-fee-rate <rate>   Funding fee rate (default: 1.5)
    --strict | --lenient        Reject or only warn on out-of-policy amounts
    --data-embed                Add the OP_RETURN data-embed output
    --broadcast                 fund: broadcast after signing
    --pretty                    Pretty-print JSON
    --version, -V               Print version

EXAMPLES:
    stakefleet params --params-url https://staking-api.example
    stakefleet stake --activation-height 197535 --finality-provider <hex>
    stakefleet fund --broadcast
"#
    );
}

fn chain_client(config: &FleetConfig) -> Arc<MempoolClient> {
    Arc::new(MempoolClient::new(&config.mempool_url, config.network))
}

fn params_client(config: &FleetConfig) -> anyhow::Result<Arc<BabylonApiClient>> {
    let url = config.params_url.as_deref().context("BABYLON_API_URL not set")?;
    Ok(Arc::new(BabylonApiClient::new(url)))
}

fn params_json(params: &GlobalStakingParams) -> Value {
    json!({
        "version": params.version,
        "activation_height": params.activation_height,
        "staking_cap": params.staking_cap.to_sat(),
        "tag": hex::encode(&params.tag),
        "covenant_pks": params.covenant_keys.iter().map(|k| k.to_string()).collect::<Vec<_>>(),
        "covenant_quorum": params.covenant_quorum,
        "unbonding_time": params.unbonding_time,
        "unbonding_fee": params.unbonding_fee.to_sat(),
        "min_staking_amount": params.min_amount.to_sat(),
        "max_staking_amount": params.max_amount.to_sat(),
        "min_staking_time": params.min_time,
        "max_staking_time": params.max_time,
        "confirmation_depth": params.confirmation_depth,
    })
}

fn outcomes_json(outcomes: &[WalletOutcome]) -> Value {
    let wallets: Vec<Value> = outcomes
        .iter()
        .map(|o| match &o.result {
            Ok(report) => json!({
                "index": o.index,
                "state": report.state,
                "build_attempts": report.build_attempts,
                "broadcast_attempts": report.broadcast_attempts,
                "txid": report.txid,
            }),
            Err(e) => json!({"index": o.index, "error": e.to_string()}),
        })
        .collect();
    let summary = fleet::summarize(outcomes);
    json!({"succeeded": summary.succeeded, "failed": summary.failed, "wallets": wallets})
}

async fn cmd_params(config: &FleetConfig) -> anyhow::Result<Value> {
    let versions = params_client(config)?.global_params().await.context("Failed to fetch global params")?;
    Ok(json!({
        "max_activation_height": max_activation_height(&versions),
        "versions": versions.iter().map(params_json).collect::<Vec<_>>(),
    }))
}

async fn staking_fleet(
    config: &FleetConfig,
    chain: Arc<MempoolClient>,
    params: GlobalStakingParams,
) -> anyhow::Result<(Fleet, Vec<Wallet>)> {
    let wallets = load_wallets(&config.wallets_path, config.network).context("Failed to load wallets")?;
    let fee_rate = resolve_fee_rate(chain.as_ref(), config.fee_rate).await.context("Failed to resolve fee rate")?;
    let builder = StakingTxBuilder::from_config(chain.clone(), Arc::new(params), config, fee_rate)?;
    info!(
        wallets = wallets.len(),
        amount = builder.amount().to_sat(),
        staking_time = builder.staking_time(),
        fee_rate,
        "Staking fleet configured"
    );
    Ok((Fleet::new(Pipeline::new(chain, Arc::new(builder), &config.retry)), wallets))
}

async fn cmd_build(config: &FleetConfig) -> anyhow::Result<Value> {
    let target = config.require_activation_height().map_err(|e| anyhow!(e))?;
    let versions = params_client(config)?.global_params().await.context("Failed to fetch global params")?;
    let params = select_version(&versions, target)?.clone();

    let chain = chain_client(config);
    let (fleet, wallets) = staking_fleet(config, chain, params).await?;
    let outcomes = fleet.run(wallets.into_iter().map(Job::SignOnly).collect()).await;

    artifacts::write_lines(&config.txs_path, &fleet::signed_hexes(&outcomes))?;
    Ok(outcomes_json(&outcomes))
}

async fn cmd_broadcast(config: &FleetConfig) -> anyhow::Result<Value> {
    let target = config.require_activation_height().map_err(|e| anyhow!(e))?;
    let hexes = artifacts::read_lines(&config.txs_path)?;
    if hexes.is_empty() {
        bail!("No transactions in {}", config.txs_path.display());
    }

    let chain = chain_client(config);
    let tip = wait_for_tip(chain.as_ref(), target, config.retry.gate_poll_interval).await;
    info!(tip, transactions = hexes.len(), "Broadcasting");

    // Broadcast-only jobs never build, so the template source is never consulted.
    let unused = FundingTxBuilder::new(chain.clone(), config.network, Vec::new(), 0.0);
    let fleet = Fleet::new(Pipeline::new(chain, Arc::new(unused), &config.retry));
    let jobs = hexes.into_iter().enumerate().map(|(index, hex)| Job::BroadcastOnly { index, hex }).collect();
    let outcomes = fleet.run(jobs).await;

    artifacts::write_lines(&config.txids_path, &fleet::txids(&outcomes))?;
    Ok(outcomes_json(&outcomes))
}

async fn cmd_stake(config: &FleetConfig) -> anyhow::Result<Value> {
    let target = config.require_activation_height().map_err(|e| anyhow!(e))?;
    let chain = chain_client(config);
    let gate = ActivationGate::new(params_client(config)?, chain.clone(), config.retry.gate_poll_interval);
    let params = gate.wait(target).await;

    let (fleet, wallets) = staking_fleet(config, chain, params).await?;
    let outcomes = fleet.run(wallets.into_iter().map(Job::Full).collect()).await;

    artifacts::write_lines(&config.txs_path, &fleet::signed_hexes(&outcomes))?;
    artifacts::write_lines(&config.txids_path, &fleet::txids(&outcomes))?;
    Ok(outcomes_json(&outcomes))
}

async fn cmd_fund(config: &FleetConfig, broadcast: bool) -> anyhow::Result<Value> {
    let funding = &config.funding;
    let record = WalletRecord {
        taproot_address_master: funding.source_address.clone().context("ADDRESS not set")?,
        wif_master: funding.source_wif.clone().context("PRIVATE_KEY not set")?,
    };
    let source = Wallet::from_record(0, &record, config.network).context("Invalid funding source")?;
    if !source.is_taproot() {
        bail!("Funding source {} is not a taproot address", source.address);
    }

    let wallets = load_wallets(&config.wallets_path, config.network).context("Failed to load wallets")?;
    let destinations: Vec<Destination> = wallets
        .iter()
        .map(|w| Destination::new(w.address.to_string(), Amount::from_sat(funding.amount_sat)))
        .collect();

    let chain = chain_client(config);
    let fee_rate = resolve_fee_rate(chain.as_ref(), funding.fee_rate).await.context("Failed to resolve fee rate")?;
    let builder = FundingTxBuilder::new(chain.clone(), config.network, destinations, fee_rate);
    let pipeline = Pipeline::new(chain, Arc::new(builder), &config.retry).with_spend_guard(Arc::new(SpendGuard::new()));

    let job = if broadcast { Job::Full(source) } else { Job::SignOnly(source) };
    let outcome = Fleet::new(pipeline).run(vec![job]).await;
    if !broadcast {
        warn!("Funding transaction signed but not broadcast (pass --broadcast)");
    }

    let report = outcome
        .into_iter()
        .next()
        .context("Funding pipeline produced no outcome")?
        .result?;
    Ok(json!({
        "destinations": wallets.len(),
        "amount_sat": funding.amount_sat,
        "fee_rate": fee_rate,
        "txid": report.txid,
        "hex": report.signed,
        "broadcast": broadcast,
    }))
}
