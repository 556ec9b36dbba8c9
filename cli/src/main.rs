//! chainconn CLI: probe endpoints, inspect network health and run calls with failover.
//!
//! Usage:
//! ```bash
//! # List the networks of the built-in table (or of a config file)
//! chainconn networks [--config networks.yaml]
//!
//! # Probe a single endpoint
//! chainconn probe --url https://api.mainnet-beta.solana.com --chain solana
//!
//! # Connect and print health of every endpoint
//! chainconn status --network ethereum
//!
//! # Run a JSON-RPC call through the rate limiter with failover
//! chainconn call --network ethereum --method eth_getBalance --params '["0x...", "latest"]'
//!
//! # Stream failover events
//! chainconn watch --network polygon --secs 300
//! ```

mod logging;

use std::env;
use std::process;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use serde_json::Value;

use chainconn_core::{
    AdapterRegistry, ChainFamily, ConnectionConfig, ConnectionManager, EndpointConfig, EndpointId,
    NetworkConfig,
    NetworkConnectionStatus, Priority, ProviderHandle, TransportFactory,
};
use chainconn_http::HttpTransportFactory;

use crate::logging::{init_tracing, LogConfig};

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    init_tracing(&log_config(&args[2..]));

    let result = match args[1].as_str() {
        "networks" => cmd_networks(&args[2..]),
        "probe" => cmd_probe(&args[2..]).await,
        "status" => cmd_status(&args[2..]).await,
        "call" => cmd_call(&args[2..]).await,
        "balance" => cmd_balance(&args[2..]).await,
        "watch" => cmd_watch(&args[2..]).await,
        "version" | "--version" | "-V" => {
            println!("chainconn {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            print_usage();
            process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn print_usage() {
    println!("chainconn {}", env!("CARGO_PKG_VERSION"));
    println!("Multi-chain RPC endpoint health, rate limiting and failover\n");
    println!("USAGE:");
    println!("    chainconn <COMMAND> [FLAGS]\n");
    println!("COMMANDS:");
    println!("    networks   List configured networks and their endpoints");
    println!("    probe      Probe one endpoint (liveness, head, latency)");
    println!("    status     Connect and print per-endpoint health");
    println!("    call       Run a JSON-RPC call with failover");
    println!("    balance    Native balance of an address");
    println!("    watch      Stream connection events for a network");
    println!("    version    Print version");
    println!("    help       Print this help\n");
    println!("FLAGS:");
    println!("    --config <FILE>      Network table (.json/.yaml); built-in table if omitted");
    println!("    --network <NAME>     Network to use");
    println!("    --url <URL>          Endpoint URL (probe)");
    println!("    --chain <FAMILY>     evm | solana | flow (probe, default evm)");
    println!("    --method <METHOD>    JSON-RPC method (call)");
    println!("    --params <JSON>      JSON array of params (call, default [])");
    println!("    --address <ADDR>     Account address (balance)");
    println!("    --priority <P>       high | medium | low (default medium)");
    println!("    --secs <N>           How long to watch (default 60)");
    println!("    --json               Print machine-readable JSON");
    println!("    --log-level <LEVEL>  trace | debug | info | warn | error (default warn)");
    println!("    --log-json           Emit logs as JSON");
}

fn log_config(args: &[String]) -> LogConfig {
    let mut config = LogConfig::default();
    if let Some(level) = parse_flag(args, "--log-level") {
        config.level = level;
    }
    config.json = has_flag(args, "--log-json");
    config
}

fn load_config(args: &[String]) -> Result<ConnectionConfig> {
    match parse_flag(args, "--config") {
        Some(path) => {
            tracing::debug!(%path, "loading network table");
            ConnectionConfig::from_path(&path).with_context(|| format!("loading {path}"))
        }
        None => Ok(chainconn_providers::default_config()),
    }
}

fn manager(config: ConnectionConfig) -> ConnectionManager {
    ConnectionManager::new(config, Arc::new(HttpTransportFactory::default()))
}

fn required(args: &[String], flag: &str) -> Result<String> {
    parse_flag(args, flag).ok_or_else(|| anyhow!("{flag} is required"))
}

fn priority(args: &[String]) -> Result<Priority> {
    match parse_flag(args, "--priority") {
        Some(p) => p.parse().map_err(|e: String| anyhow!(e)),
        None => Ok(Priority::Medium),
    }
}

fn cmd_networks(args: &[String]) -> Result<()> {
    let config = load_config(args)?;
    if has_flag(args, "--json") {
        println!("{}", serde_json::to_string_pretty(&config.networks)?);
        return Ok(());
    }
    for network in config.networks.values() {
        println!(
            "{} ({}, {}{})",
            network.name,
            network.display_name,
            network.chain,
            network
                .chain_id
                .as_deref()
                .map(|id| format!(", chain id {id}"))
                .unwrap_or_default()
        );
        for ep in &network.endpoints {
            let auth = match &ep.credential {
                Some(c) => format!("  auth: {c}"),
                None => String::new(),
            };
            println!(
                "    [{}] {}  {} req/min{}",
                ep.priority, ep.url, ep.max_requests_per_minute, auth
            );
        }
        println!();
    }
    Ok(())
}

async fn cmd_probe(args: &[String]) -> Result<()> {
    let url = required(args, "--url")?;
    let chain: ChainFamily = match parse_flag(args, "--chain") {
        Some(c) => c.parse().map_err(|e: String| anyhow!(e))?,
        None => ChainFamily::Evm,
    };

    let network = NetworkConfig::new("probe", chain).with_endpoint(EndpointConfig::new(&url));
    let endpoint = &network.endpoints[0];
    let transport = HttpTransportFactory::default().create(&network, endpoint)?;
    let adapter = AdapterRegistry::with_defaults().resolve(&network)?;
    let provider = ProviderHandle::new(
        EndpointId::new("probe", &url),
        endpoint.clone(),
        chain,
        transport,
        adapter,
    );

    println!("Probing {url} ({chain})...");
    let start = Instant::now();
    provider.ping().await.context("liveness check failed")?;
    let ping = start.elapsed();
    let start = Instant::now();
    let height = provider.block_height().await.context("head query failed")?;
    let head = start.elapsed();

    println!("  Status:       OK");
    println!("  Head:         {height}");
    println!("  Ping:         {}ms", ping.as_millis());
    println!("  Head latency: {}ms", head.as_millis());
    Ok(())
}

async fn cmd_status(args: &[String]) -> Result<()> {
    let mgr = manager(load_config(args)?);
    let statuses: Vec<NetworkConnectionStatus> = match parse_flag(args, "--network") {
        Some(network) => {
            if let Err(e) = mgr.connect(&network).await {
                eprintln!("warning: {e}");
            }
            vec![mgr.status(&network)?]
        }
        None => {
            let report = mgr.initialize().await;
            for (network, e) in &report.failed {
                eprintln!("warning: {network}: {e}");
            }
            mgr.all_statuses().into_values().collect()
        }
    };

    if has_flag(args, "--json") {
        println!("{}", serde_json::to_string_pretty(&statuses)?);
    } else {
        for status in &statuses {
            print_status(status);
        }
    }
    mgr.shutdown().await;
    Ok(())
}

fn print_status(status: &NetworkConnectionStatus) {
    println!(
        "{} ({}): {}",
        status.network,
        status.display_name,
        match &status.active_endpoint {
            Some(url) => format!("active: {url}"),
            None if status.endpoints.is_empty() => "not connected".to_string(),
            None => "no healthy provider".to_string(),
        }
    );
    for ep in &status.endpoints {
        let latency = ep
            .health
            .response_time_ms
            .map(|ms| format!("{ms}ms"))
            .unwrap_or_else(|| "-".into());
        println!(
            "  {} [{}] {:<10} latency {:>7}  errors {:>4.0}%  queue {:>3}  tokens {:>5.1}  {}",
            if ep.in_use { "*" } else { " " },
            ep.priority,
            ep.health.status.to_string(),
            latency,
            ep.health.error_rate * 100.0,
            ep.queue_len,
            ep.available_tokens,
            ep.url,
        );
        if let Some(err) = &ep.health.last_error {
            println!("        last error: {err}");
        }
    }
    println!();
}

async fn cmd_call(args: &[String]) -> Result<()> {
    let network = required(args, "--network")?;
    let method = required(args, "--method")?;
    let params: Vec<Value> = match parse_flag(args, "--params") {
        Some(raw) => serde_json::from_str(&raw).context("--params must be a JSON array")?,
        None => vec![],
    };
    let priority = priority(args)?;

    let mgr = manager(load_config(args)?);
    mgr.connect(&network).await?;
    let result = mgr.request(&network, priority, method, params).await;
    mgr.shutdown().await;

    println!("{}", serde_json::to_string_pretty(&result?)?);
    Ok(())
}

async fn cmd_balance(args: &[String]) -> Result<()> {
    let network = required(args, "--network")?;
    let address = required(args, "--address")?;
    let priority = priority(args)?;

    let mgr = manager(load_config(args)?);
    mgr.connect(&network).await?;
    let result = mgr
        .execute(&network, priority, move |provider| async move {
            provider.balance(&address).await
        })
        .await;
    mgr.shutdown().await;

    println!("{}", result?);
    Ok(())
}

async fn cmd_watch(args: &[String]) -> Result<()> {
    let network = required(args, "--network")?;
    let secs: u64 = match parse_flag(args, "--secs") {
        Some(s) => s.parse().context("--secs must be a number")?,
        None => 60,
    };

    let mgr = manager(load_config(args)?);
    let mut events = mgr.subscribe();
    match mgr.connect(&network).await {
        Ok(provider) => println!("connected to {} via {}", network, provider.url()),
        Err(e) if e.is_no_provider() => println!("{network}: no healthy provider yet, waiting for recovery"),
        Err(e) => bail!(e),
    }

    let deadline = tokio::time::sleep(Duration::from_secs(secs));
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(event) => println!(
                    "{} {:<22} {}{}{}",
                    event.timestamp.format("%H:%M:%S"),
                    event.kind,
                    event.endpoint_url.as_deref().unwrap_or("-"),
                    event
                        .previous_url
                        .as_deref()
                        .map(|p| format!(" (from {p})"))
                        .unwrap_or_default(),
                    event.error.as_deref().map(|e| format!(": {e}")).unwrap_or_default(),
                ),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    eprintln!("warning: skipped {n} events");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    mgr.shutdown().await;
    Ok(())
}

fn parse_flag(args: &[String], flag: &str) -> Option<String> {
    let pos = args.iter().position(|a| a == flag)?;
    args.get(pos + 1).cloned()
}

fn has_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|a| a == flag)
}
