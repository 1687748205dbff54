#![forbid(unsafe_code)]
//! Runs a simulated meshchain network, feeds it transfers and prints the outcome.

use clap::Parser;
use colored::*;
use meshchain::blockchain::Block;
use meshchain::config::{load_config, load_config_from};
use meshchain::transaction::Amount;
use meshchain::Network;
use std::collections::BTreeMap;
use std::thread;
use std::time::{Duration, Instant};
use tracing::Level;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to a TOML configuration file (defaults to ./meshchain.toml if present)
    #[arg(long)]
    config: Option<String>,
    /// Number of nodes
    #[arg(long)]
    nodes: Option<usize>,
    /// Proof-of-work difficulty
    #[arg(long)]
    difficulty: Option<u32>,
    /// Ids of nodes that forge blocks
    #[arg(long, num_args = 1..)]
    malicious: Vec<usize>,
    /// Transfer to submit, as FROM:TO:AMOUNT (repeatable)
    #[arg(long = "transfer", value_parser = parse_transfer)]
    transfers: Vec<(String, String, f64)>,
    /// Mine partial blocks instead of waiting for a full one
    #[arg(long)]
    always_on: bool,
    /// Upper bound on how long to let the network run
    #[arg(long, default_value_t = 5)]
    seconds: u64,
    /// Print chains and balances as JSON
    #[arg(long)]
    json: bool,
    /// Debug-level logging
    #[arg(short, long)]
    verbose: bool,
}

fn parse_transfer(s: &str) -> Result<(String, String, f64), String> {
    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() != 3 {
        return Err(format!("expected FROM:TO:AMOUNT, got {s:?}"));
    }
    let amount = parts[2]
        .parse::<f64>()
        .map_err(|e| format!("bad amount {:?}: {}", parts[2], e))?;
    Ok((parts[0].to_string(), parts[1].to_string(), amount))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::INFO })
        .with_thread_names(true)
        .init();

    let mut config = match &cli.config {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    if let Some(nodes) = cli.nodes {
        config.network.nodes = nodes;
    }
    if let Some(difficulty) = cli.difficulty {
        config.consensus.difficulty = difficulty;
    }
    if !cli.malicious.is_empty() {
        config.network.malicious = cli.malicious.clone();
    }
    if cli.always_on {
        config.miner.always_on = true;
    }

    let mut network = Network::start_with_config(&config)?;

    if !cli.json {
        println!("{}", "meshchain simulation".bright_cyan().bold());
        println!("{}", "--------------------".bright_cyan());
        println!(
            "{} nodes, difficulty {}, malicious: {:?}",
            config.network.nodes, config.consensus.difficulty, config.network.malicious
        );
        println!();
    }

    let mut expected_blocks = 0usize;
    for (from, to, amount) in &cli.transfers {
        let amount = Amount::checked_from_num(*amount).ok_or("transfer amount out of range")?;
        match network.transfer(from, to, amount) {
            Ok(_) => {
                expected_blocks += 1;
                if !cli.json {
                    println!("{} {} -> {} ({})", "accepted".green(), from, to, amount);
                }
            }
            Err(e) => {
                if !cli.json {
                    println!("{} {} -> {}: {}", "rejected".red(), from, to, e);
                }
            }
        }
    }
    let block_capacity = config.mempool.block_capacity.max(1);
    let target_height = if config.miner.always_on {
        1 + expected_blocks.div_ceil(block_capacity)
    } else {
        1 + expected_blocks / block_capacity
    };

    // Run until every node has caught up with the submitted work, or time runs out.
    let deadline = Instant::now() + Duration::from_secs(cli.seconds);
    while Instant::now() < deadline {
        let synced = network
            .nodes()
            .iter()
            .all(|n| n.height() as usize >= target_height);
        if synced && network.pending_transactions() < block_capacity {
            break;
        }
        thread::sleep(Duration::from_millis(50));
    }
    // Let in-flight deliveries land.
    thread::sleep(Duration::from_millis(config.propagation.max_delay_ms + 10));
    network.stop_network();

    let chains: Vec<Vec<Block>> = (0..network.nodes().len())
        .map(|i| network.snapshot_chain(i))
        .collect::<Result<_, _>>()?;
    let balances = network.snapshot_balances();

    if cli.json {
        print_json(&network, &chains, &balances)?;
    } else {
        print_report(&network, &chains, &balances);
    }
    Ok(())
}

fn print_json(
    network: &Network,
    chains: &[Vec<Block>],
    balances: &BTreeMap<String, Amount>,
) -> Result<(), Box<dyn std::error::Error>> {
    let balances: BTreeMap<&String, String> = balances.iter().map(|(k, v)| (k, v.to_string())).collect();
    let report = serde_json::json!({
        "nodes": network.reports(),
        "chains": chains,
        "balances": balances,
        "propagation": network.propagation_stats(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn print_report(network: &Network, chains: &[Vec<Block>], balances: &BTreeMap<String, Amount>) {
    for (report, chain) in network.reports().iter().zip(chains) {
        let label = if report.malicious {
            format!("{} (malicious)", report.id).red().bold()
        } else {
            report.id.to_string().bright_white().bold()
        };
        println!(
            "{}  height {}  mined {}  races lost {}  forged {}  accepted {}  rejected {}",
            label,
            report.height,
            report.blocks_mined,
            report.races_lost,
            report.forged_sent,
            report.blocks_accepted,
            report.blocks_rejected
        );
        for block in chain {
            let miner = block.miner.as_deref().unwrap_or("genesis");
            println!(
                "  #{:<3} {}  prev {}  proof {:<8} txs {}  by {}",
                block.index,
                block.digest.short().bright_yellow(),
                block.previous_digest.short(),
                block.proof,
                block.transactions.len(),
                miner
            );
        }
    }

    println!();
    println!("{}", "Balances".bright_green().underline());
    for (account, balance) in balances {
        println!("  {:<12} {}", account, balance);
    }

    let stats = network.propagation_stats();
    println!();
    println!(
        "{} sent {}, dropped {}, accepted {}, rejected {}",
        "Propagation:".bright_cyan(),
        stats.sent,
        stats.dropped,
        stats.accepted,
        stats.rejected
    );
}
