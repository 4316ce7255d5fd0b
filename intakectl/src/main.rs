//! # intakectl
//!
//! Drives a discovery policy from the command line: loads the layered
//! configuration, builds the configured policy and prints every file it
//! discovers until the policy ends or the process is interrupted.

use std::path::PathBuf;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Args as ClapArgs, Parser, Subcommand};
use futures::StreamExt;
use intake_config::{ConfigLoader, ConfigLoaderOptions, parse_assignment};
use intake_core::{DiscoveredFile, Policy, PolicyRegistry, SourceConfig};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "intakectl")]
#[command(about = "Discover files on local or remote filesystems with configurable policies")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    config: ConfigArgs,
}

#[derive(ClapArgs, Debug, Clone)]
struct ConfigArgs {
    /// Configuration file (TOML or JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Env file merged into the environment before loading (default: .env)
    #[arg(long, global = true)]
    env_file: Option<PathBuf>,

    /// Override a single option, e.g. --set policy.class=sleepy
    #[arg(long = "set", value_name = "KEY=VALUE", global = true, value_parser = parse_override)]
    overrides: Vec<(String, String)>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Validate the configuration and build the policy without running it
    Check,
    /// List the registered policy types
    Policies,
    /// Run the policy and print discovered files
    Run(RunArgs),
}

#[derive(ClapArgs, Debug, Clone)]
struct RunArgs {
    /// Emit one JSON object per discovered file
    #[arg(long, default_value_t = false)]
    json: bool,

    /// Interrupt the policy after this many files
    #[arg(long)]
    max_files: Option<u64>,
}

fn parse_override(raw: &str) -> Result<(String, String), String> {
    parse_assignment(raw).map_err(|err| err.to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "intakectl=info,intake_core=info,intake_config=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let registry = PolicyRegistry::default();
    match cli.command {
        Command::Policies => {
            for name in registry.names() {
                println!("{name}");
            }
            Ok(())
        }
        Command::Check => {
            let config = load_config(&cli.config)?;
            let policy = registry
                .build(&config)
                .context("failed to build policy")?;
            println!("policy: {}", policy.kind());
            for root in policy.roots() {
                println!("root: {}", root.uri());
            }
            policy.close().await;
            Ok(())
        }
        Command::Run(args) => {
            let config = load_config(&cli.config)?;
            let policy = registry
                .build(&config)
                .context("failed to build policy")?;
            run_policy(policy.as_ref(), &config, &args).await?;
            policy.close().await;
            Ok(())
        }
    }
}

fn load_config(args: &ConfigArgs) -> anyhow::Result<SourceConfig> {
    let load = ConfigLoader::with_options(ConfigLoaderOptions {
        config_path: args.config.clone(),
        env_file: args.env_file.clone(),
        search_dir: None,
        overrides: args.overrides.clone(),
    })
    .load()
    .context("failed to load configuration")?;

    for source in &load.sources {
        info!(%source, "configuration layer applied");
    }
    load.source_config().context("invalid configuration")
}

async fn run_policy(
    policy: &dyn Policy,
    config: &SourceConfig,
    args: &RunArgs,
) -> anyhow::Result<()> {
    info!(
        policy = %policy.kind(),
        topic = config.topic(),
        roots = policy.roots().len(),
        "starting discovery"
    );

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let mut discovered = 0u64;

    'executions: while !policy.has_ended() {
        let execution = tokio::select! {
            _ = &mut shutdown => {
                info!("interrupt received");
                policy.interrupt();
                break 'executions;
            }
            execution = policy.execute() => execution,
        };
        let mut stream = match execution {
            Ok(stream) => stream,
            Err(err) if err.is_illegal_state() => break,
            Err(err) => return Err(err).context("policy execution failed"),
        };

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("interrupt received");
                    policy.interrupt();
                    break 'executions;
                }
                next = stream.next() => {
                    let Some(file) = next else { break };
                    emit(&file, args.json)?;
                    discovered += 1;
                    if args.max_files.is_some_and(|max| discovered >= max) {
                        policy.interrupt();
                        break 'executions;
                    }
                }
            }
        }
    }

    if discovered == 0 {
        warn!("no files discovered");
    }
    info!(
        discovered,
        executions = policy.executions(),
        state = %policy.state(),
        "discovery finished"
    );
    Ok(())
}

fn emit(file: &DiscoveredFile, json: bool) -> anyhow::Result<()> {
    if json {
        let modified = file.modified().map(|time| DateTime::<Utc>::from(time).to_rfc3339());
        let line = serde_json::json!({
            "root": file.root().as_str(),
            "path": file.path().display().to_string(),
            "len": file.len(),
            "modified": modified,
        });
        println!("{}", serde_json::to_string(&line)?);
    } else {
        println!("{}\t{}\t{}", file.root(), file.path().display(), file.len());
    }
    Ok(())
}
