mod config;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use replset_election::{
    FreshnessChecker, FreshnessResponder, LocalMemberState, ReplicationExecutor, TcpTransport,
};
use tracing::info;

use crate::config::{NodeConfig, ResolvedConfig};

#[derive(Parser)]
#[command(name = "replset-node", about = "replica set member freshness checks")]
struct Args {
    /// path to TOML configuration file
    #[arg(short = 'c', long, env = "REPLSET_CONFIG")]
    config: Option<PathBuf>,

    /// print default configuration as TOML and exit
    #[arg(long)]
    config_template: bool,

    /// replica set name
    #[arg(long, env = "REPLSET_SET_NAME")]
    set_name: Option<String>,

    /// this member's address as listed in the member table
    #[arg(long, env = "REPLSET_SELF_HOST")]
    self_host: Option<String>,

    /// address the freshness listener binds to
    #[arg(long, env = "REPLSET_BIND")]
    bind: Option<String>,

    /// last applied optime as "secs:inc"
    #[arg(long, env = "REPLSET_LAST_APPLIED")]
    last_applied: Option<String>,

    /// per-peer command timeout in milliseconds
    #[arg(long, env = "REPLSET_COMMAND_TIMEOUT_MS")]
    command_timeout_ms: Option<u64>,

    /// finish a check as soon as one peer disqualifies this member
    #[arg(long, env = "REPLSET_STOP_ON_DISQUALIFY")]
    stop_on_disqualify: bool,

    /// member id of the current primary
    #[arg(long, env = "REPLSET_PRIMARY")]
    primary: Option<u32>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// answer freshness requests from other members until interrupted
    Serve,
    /// ask every other voting member whether it is fresher than us
    Check,
}

/// Exit code of `check` when a peer is at our optime.
const EXIT_TIED: i32 = 2;
/// Exit code of `check` when some peer disqualified us.
const EXIT_NOT_FRESHEST: i32 = 3;

/// Applies CLI overrides to a `NodeConfig`. Only `Some` values from the
/// CLI args take effect, which keeps the resolution order:
/// defaults, then TOML file, then env vars, then CLI flags.
fn apply_args(cfg: &mut NodeConfig, args: &Args) {
    if let Some(ref name) = args.set_name {
        cfg.set_name = name.clone();
    }
    if let Some(ref host) = args.self_host {
        cfg.self_host = host.clone();
    }
    if let Some(ref bind) = args.bind {
        cfg.bind = bind.clone();
    }
    if let Some(ref optime) = args.last_applied {
        cfg.last_applied = optime.clone();
    }
    if let Some(ms) = args.command_timeout_ms {
        cfg.command_timeout_ms = ms;
    }
    if args.stop_on_disqualify {
        cfg.stop_on_disqualify = true;
    }
    if let Some(id) = args.primary {
        cfg.primary = Some(id);
    }
}

/// Prints `msg` to stderr and exits with code 1.
fn exit_err(msg: impl std::fmt::Display) -> ! {
    eprintln!("{msg}");
    std::process::exit(1);
}

async fn serve(cfg: ResolvedConfig) {
    let mut state = LocalMemberState::new(cfg.replica_set, cfg.self_index, cfg.last_applied)
        .unwrap_or_else(|e| exit_err(format!("error: {e}")));
    state.primary = cfg.primary;
    let responder = Arc::new(FreshnessResponder::new(state));

    let (addr, listener) = replset_election::spawn_listener(cfg.bind, responder)
        .await
        .unwrap_or_else(|e| exit_err(format!("failed to bind {}: {e}", cfg.bind)));
    info!("serving freshness requests on {addr}");

    if let Err(e) = tokio::signal::ctrl_c().await {
        exit_err(format!("failed to listen for shutdown signal: {e}"));
    }
    info!("shutting down");
    listener.abort();
}

async fn check(cfg: ResolvedConfig) -> i32 {
    let executor = ReplicationExecutor::new(Arc::new(TcpTransport::new()), cfg.executor)
        .unwrap_or_else(|e| exit_err(format!("error: {e}")));
    let targets = cfg
        .replica_set
        .freshness_targets(cfg.self_index)
        .unwrap_or_else(|e| exit_err(format!("error: {e}")));

    let mut checker = FreshnessChecker::new().with_policy(cfg.policy);
    let results = checker
        .check(
            &executor,
            cfg.last_applied,
            &cfg.replica_set,
            cfg.self_index,
            &targets,
        )
        .await
        .unwrap_or_else(|e| exit_err(format!("freshness check failed: {e}")));
    executor.shutdown();

    println!("freshest={} tied={}", results.freshest, results.tied);
    if !results.freshest {
        EXIT_NOT_FRESHEST
    } else if results.tied {
        EXIT_TIED
    } else {
        0
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "replset=info".into()),
        )
        .init();

    let args = Args::parse();

    // --config-template: dump defaults and exit
    if args.config_template {
        match NodeConfig::default().to_toml() {
            Ok(toml) => {
                println!("{toml}");
                std::process::exit(0);
            }
            Err(e) => exit_err(format!("failed to generate config template: {e}")),
        }
    }

    // build NodeConfig: defaults, TOML file, then CLI/env overrides
    let mut cfg = match &args.config {
        Some(path) => NodeConfig::from_file(path).unwrap_or_else(|e| exit_err(e)),
        None => NodeConfig::default(),
    };
    apply_args(&mut cfg, &args);
    let resolved = cfg.resolve().unwrap_or_else(|e| exit_err(e));

    match args.command {
        Some(Command::Serve) => serve(resolved).await,
        Some(Command::Check) => {
            let code = check(resolved).await;
            std::process::exit(code);
        }
        None => exit_err("error: a subcommand is required (serve or check)"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_overrides_file_values() {
        let args = Args::parse_from([
            "replset-node",
            "--set-name",
            "override",
            "--last-applied",
            "9:1",
            "--primary",
            "1",
            "--stop-on-disqualify",
            "check",
        ]);
        let mut cfg = NodeConfig {
            command_timeout_ms: 500,
            ..NodeConfig::default()
        };
        apply_args(&mut cfg, &args);

        assert_eq!(cfg.set_name, "override");
        assert_eq!(cfg.last_applied, "9:1");
        assert_eq!(cfg.primary, Some(1));
        assert!(cfg.stop_on_disqualify);
        // untouched by the CLI
        assert_eq!(cfg.command_timeout_ms, 500);
        assert!(matches!(args.command, Some(Command::Check)));
    }

    #[test]
    fn args_definition_is_consistent() {
        use clap::CommandFactory;
        Args::command().debug_assert();
    }
}
