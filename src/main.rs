//! Tor exit node lookup CLI.

use anyhow::Result;
use clap::{CommandFactory, Parser};
use std::path::PathBuf;
use tor_exit_nodes::{Config, ExitNodeRegistry};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "tortool")]
#[command(about = "Check IP addresses against the list of known Tor exit nodes")]
#[command(version)]
struct Args {
    /// IP address to check (prints 'true' if it is an exit node, 'false' otherwise)
    #[arg(long, value_name = "ADDR")]
    ip: Option<String>,

    /// Print every known exit node address
    #[arg(long)]
    exit_nodes: bool,

    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Exit list URL, overrides configured sources (repeatable)
    #[arg(long = "source", value_name = "URL")]
    sources: Vec<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'L', long, default_value = "warn")]
    log_level: String,

    /// Print example configuration and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        println!("{}", Config::example());
        return Ok(());
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let mut config = match &args.config {
        Some(path) => {
            debug!(config = %path.display(), "Loading configuration");
            Config::load(path)?
        }
        None => Config::default(),
    };

    if !args.sources.is_empty() {
        config.sources = args.sources.clone();
        config.validate()?;
    }

    let registry = ExitNodeRegistry::new(config)?;

    if let Some(ip) = &args.ip {
        match registry.is_exit_node(ip).await {
            Ok(exit) => println!("{}", exit),
            Err(e) => println!("error: {}", e),
        }
        return Ok(());
    }

    if args.exit_nodes {
        let mut nodes = registry.exit_nodes().await;
        nodes.sort();
        for address in nodes {
            println!("{}", address);
        }
        return Ok(());
    }

    Args::command().print_help()?;
    println!();

    Ok(())
}
