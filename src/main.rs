//! StableSwap Snapshot - one-shot pool state reader
//!
//! Run with: cargo run -- [--config snapshot.toml] [--registry registry.toml] [--json]
//!
//! Reads amplification, fees, paused flag, reserves and LP supply of every
//! registered pool through batched Multicall3 calls, then prices each pool.

use alloy_primitives::{utils::format_units, U256};
use clap::Parser;
use color_eyre::eyre::{eyre, Result};
use console::style;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod error;
mod pipeline;
mod pricing;
mod registry;

use config::Config;
use pipeline::{ChunkedBatchExecutor, PoolSnapshot, RpcTransport, SnapshotPipeline, SnapshotReport};
use pricing::{quote, quote_report, PriceQuote};
use registry::{PoolEntry, Registry};

#[derive(Parser, Debug)]
#[command(name = "stableswap-snapshot")]
#[command(about = "Batched Multicall3 snapshot of tracked StableSwap pools")]
struct Args {
    /// Load configuration from a TOML file instead of the environment
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print the report and price quotes as JSON on stdout
    #[arg(long)]
    json: bool,

    /// Pool registry file, overriding REGISTRY_PATH
    #[arg(short, long)]
    registry: Option<PathBuf>,

    /// Hypothetical input, in whole units of token0, for output estimates
    #[arg(long, default_value_t = 1000)]
    amount_in: u64,
}

/// `--json` document: the snapshot report plus one quote per snapshot
#[derive(Serialize)]
struct JsonOutput<'a> {
    registry_version: &'a str,
    #[serde(flatten)]
    report: &'a SnapshotReport,
    quotes: Vec<PriceQuote>,
}

fn print_banner(registry_version: &str) {
    println!();
    println!(
        "{}",
        style("═══════════════════════════════════════════════════════════════").cyan()
    );
    println!(
        "{}",
        style(" 📸 STABLESWAP SNAPSHOT - Multicall3 pool state reader").cyan().bold()
    );
    println!(
        "{}",
        style(format!("    registry {} | schema v{}", registry_version, pipeline::SCHEMA_VERSION)).cyan()
    );
    println!(
        "{}",
        style("═══════════════════════════════════════════════════════════════").cyan()
    );
    println!();
}

fn units(value: U256, decimals: u8) -> String {
    format_units(value, decimals).unwrap_or_else(|_| value.to_string())
}

fn print_pool(pool: &PoolEntry, snapshot: &PoolSnapshot, amount_in: u64) {
    let [token0, token1] = &pool.tokens;

    println!("{} {}", style("✓").green(), style(&pool.name).cyan().bold());
    println!("   Address:      {:?}", snapshot.address);
    println!("   A:            {}", snapshot.amplification);
    println!(
        "   Fees:         trade {:.4}% | admin {:.2}% of trade",
        snapshot.fees.trade_percent(),
        snapshot.fees.admin_percent()
    );
    println!(
        "   Paused:       {}",
        if snapshot.paused { style("yes").red().to_string() } else { "no".to_string() }
    );
    println!(
        "   Reserves:     {} {} | {} {}",
        units(snapshot.reserves[0], token0.decimals),
        token0.symbol,
        units(snapshot.reserves[1], token1.decimals),
        token1.symbol
    );
    println!("   LP Supply:    {}", units(snapshot.lp_supply, 18));

    let priced = quote(pool, snapshot, amount_in);
    match (priced.spot_price, priced.estimated_output, &priced.error) {
        (Some(spot), Some(out), None) => {
            println!("   Spot:         1 {} = {:.6} {}", token0.symbol, spot, token1.symbol);
            println!(
                "   Swap:         {} {} → {} {}",
                amount_in,
                token0.symbol,
                units(out, token1.decimals),
                token1.symbol
            );
        }
        (_, _, error) => println!(
            "   {} {}",
            style("○").yellow(),
            style(error.as_deref().unwrap_or("no quote")).yellow()
        ),
    }
    println!();
}

fn print_report(report: &SnapshotReport, pools: &[PoolEntry], amount_in: u64) {
    for (pool, entry) in pools.iter().zip(&report.pools) {
        match &entry.outcome {
            Ok(snapshot) => print_pool(pool, snapshot, amount_in),
            Err(e) => {
                println!("{} {}", style("✗").red(), style(&pool.name).cyan().bold());
                println!("   {}", style(e).red());
                println!();
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let args = Args::parse();

    // Logs go to stderr so --json output stays parseable
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("stableswap_snapshot=info".parse()?),
        )
        .init();

    // Load configuration
    let config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };

    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {}", e);
        error!("Please check your .env file or --config");
        return Err(e);
    }

    let network = config.network()?;
    let registry_path = args.registry.clone().unwrap_or_else(|| PathBuf::from(&config.registry_path));
    let registry = Registry::from_file(&registry_path)?;
    registry.ensure_network(network)?;
    let pools = registry.pools;

    if !args.json {
        print_banner(&registry.version);
        config.print_summary();
        println!();
    }
    info!("Registry {}: {} pools on {}", registry.version, pools.len(), network);

    let transport = RpcTransport::connect(&config.rpc_url)?;
    let executor = ChunkedBatchExecutor::new(
        transport,
        network,
        &config.aggregator_table()?,
        config.batch_options(),
    )?;
    let pipeline = SnapshotPipeline::new(executor, config.failure_policy).pin_block(config.pin_block);

    let start = Instant::now();
    let report = pipeline.run(&pools).await?;
    let elapsed = start.elapsed();

    if args.json {
        let output = JsonOutput {
            registry_version: &registry.version,
            report: &report,
            quotes: quote_report(&report, &pools, args.amount_in),
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!(
            "{}",
            style(format!(
                "═══ SNAPSHOT{} ═══",
                report.block.map(|b| format!(" @ block {b}")).unwrap_or_default()
            ))
            .blue()
            .bold()
        );
        println!();
        print_report(&report, &pools, args.amount_in);

        println!("Summary:");
        println!("  • Pools: {} ok / {} total", report.snapshots().count(), report.pools.len());
        println!("  • Chunks: {} ({} failed)", report.chunks, report.failed_chunks.len());
        println!("  • Fetched at: {}", report.fetched_at.to_rfc3339());
        println!("  • Elapsed: {:?}", elapsed);
        println!();
    }

    if !report.is_complete() {
        let failed: Vec<&str> = report.failures().map(|(pool, _)| pool).collect();
        return Err(eyre!("{} of {} pools failed: {:?}", failed.len(), report.pools.len(), failed));
    }

    Ok(())
}
