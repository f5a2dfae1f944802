use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use redis::Value;
use serde::Deserialize;
use shardkv::client::RedisConnector;
use shardkv::cluster::{ReshardOptions, Resharder, DEFAULT_RESHARD_LIMIT};
use shardkv::{Arg, NodeAddress, Router, Topology};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{filter::LevelFilter, EnvFilter};

/// Logging section of the configuration file
#[derive(Deserialize)]
struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "warn".to_string()
}

/// Root configuration: topology keys at the top level plus `[logging]`
#[derive(Deserialize)]
struct Config {
    #[serde(flatten)]
    topology: Topology,
    #[serde(default)]
    logging: LoggingConfig,
}

/// Run commands against a sharded master/replica cluster
#[derive(Parser)]
#[command(name = "shardkv", version, about)]
struct Cli {
    /// Topology configuration file (TOML)
    #[arg(short, long, value_name = "FILE")]
    config: PathBuf,

    /// Log level, overrides the configuration file
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one operation through the router and print the reply
    Call(OpArgs),

    /// Print the routing decision for an operation without connecting
    Route(OpArgs),

    /// Copy keys from standalone servers onto the shard masters
    Reshard {
        /// Source server to migrate from (host:port), repeatable
        #[arg(short, long = "source", value_name = "ADDR", required = true)]
        sources: Vec<NodeAddress>,

        /// Database to migrate, repeatable; defaults to the topology's database
        #[arg(short, long = "database", value_name = "DB")]
        databases: Vec<i64>,

        /// Keys scanned per source database in this run
        #[arg(long, default_value_t = DEFAULT_RESHARD_LIMIT)]
        limit: usize,

        /// Flush the target databases before the first run
        #[arg(long)]
        flush_targets: bool,
    },
}

#[derive(Args)]
struct OpArgs {
    /// Hash the first argument under this key tag instead of its own value
    #[arg(long, value_name = "TAG")]
    tag: Option<String>,

    /// Operation name, e.g. get, set, hgetall, ping
    op: String,

    /// Operation arguments
    args: Vec<String>,
}

fn load_config(path: &Path) -> anyhow::Result<Config> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file '{}'", path.display()))?;
    config.topology.validate()?;
    Ok(config)
}

fn init_logging(level: &str) {
    let level_filter = level.parse::<LevelFilter>().unwrap_or_else(|_| {
        eprintln!("Warning: Invalid log level '{}', using 'warn'", level);
        LevelFilter::WARN
    });
    let filter = EnvFilter::builder()
        .with_default_directive(level_filter.into())
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();
}

fn build_args(tag: Option<String>, raw: Vec<String>) -> Vec<Arg> {
    let mut args: Vec<Arg> = raw.into_iter().map(Arg::from).collect();
    if let (Some(tag), Some(first)) = (tag, args.first_mut()) {
        let real = std::mem::replace(first, Arg::Int(0));
        *first = Arg::tagged(tag, real);
    }
    args
}

/// Render a reply the way redis-cli does
fn render(value: &Value, indent: usize, out: &mut String) {
    match value {
        Value::Nil => out.push_str("(nil)"),
        Value::Int(i) => out.push_str(&format!("(integer) {}", i)),
        Value::Data(data) => out.push_str(&format!("{:?}", String::from_utf8_lossy(data))),
        Value::Status(status) => out.push_str(status),
        Value::Okay => out.push_str("OK"),
        Value::Bulk(items) if items.is_empty() => out.push_str("(empty array)"),
        Value::Bulk(items) => {
            let width = items.len().to_string().len();
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push('\n');
                    out.push_str(&" ".repeat(indent));
                }
                let prefix = format!("{:>width$}) ", i + 1, width = width);
                out.push_str(&prefix);
                render(item, indent + prefix.len(), out);
            }
        }
    }
}

async fn call(topology: Topology, op: OpArgs) -> anyhow::Result<()> {
    let router = Router::open(topology).await?;
    info!(
        "Connected {} nodes, {} shards",
        router.aliases().count(),
        router.topology().shard_count()
    );

    let args = build_args(op.tag, op.args);
    let reply = router.invoke(&op.op, args).await?;
    let mut out = String::new();
    render(&reply, 0, &mut out);
    println!("{}", out);
    Ok(())
}

fn print_route(topology: &Topology, op: OpArgs) -> anyhow::Result<()> {
    let args = build_args(op.tag, op.args);
    let decision = shardkv::cluster::route(topology, &op.op, args)?;
    println!("class: {}", decision.class);
    match decision.shard {
        Some(shard) => println!("shard: {}", shard),
        None => println!("shard: -"),
    }
    println!("node: {}", decision.alias);
    if let Some(addr) = topology.address(&decision.alias) {
        println!("address: {}", addr);
    }
    let forwarded: Vec<String> = decision.args.iter().map(Arg::to_string).collect();
    println!("args: {}", forwarded.join(" "));
    Ok(())
}

async fn reshard(
    topology: Topology,
    sources: Vec<NodeAddress>,
    options: ReshardOptions,
) -> anyhow::Result<()> {
    let resharder = Resharder::new(topology, sources, options)?;
    let report = resharder.run(&RedisConnector::new()).await?;

    println!("moved: {}", report.moved);
    println!("skipped: {}", report.skipped);
    for (alias, moved) in &report.moved_to {
        println!("moved_to_{}: {}", alias, moved);
    }
    if report.is_complete() {
        println!("status: complete");
    } else {
        println!("status: {} source databases pending, run again", report.pending);
    }
    Ok(())
}

fn reshard_options(
    topology: &Topology,
    databases: Vec<i64>,
    limit: usize,
    flush_targets: bool,
) -> ReshardOptions {
    let databases = if databases.is_empty() {
        vec![topology.database]
    } else {
        databases
    };
    ReshardOptions::new()
        .with_databases(databases)
        .with_limit(limit)
        .with_flush_targets(flush_targets)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    let level = cli.log_level.as_deref().unwrap_or(&config.logging.level);
    init_logging(level);

    match cli.command {
        Commands::Call(op) => call(config.topology, op).await,
        Commands::Route(op) => print_route(&config.topology, op),
        Commands::Reshard {
            sources,
            databases,
            limit,
            flush_targets,
        } => {
            let options = reshard_options(&config.topology, databases, limit, flush_targets);
            reshard(config.topology, sources, options).await
        }
    }
}
