//! raftainerd — the Raftainer host daemon.
//!
//! Every host runs one daemon. There is no leader: each daemon races the
//! others for pod slot locks in Consul and runs what it wins.
//!
//! # Usage
//!
//! ```text
//! raftainerd --host-name node-a --region IAD --internal-ip 192.168.1.10
//! raftainerd upload pods/web.json pods/worker.json
//! ```
//!
//! Every flag can also be set through its environment variable.

mod daemon;
mod upload;

use std::net::IpAddr;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(
    name = "raftainerd",
    about = "Raftainer host daemon",
    subcommand_negates_reqs = true
)]
struct Cli {
    #[command(flatten)]
    consul: ConsulArgs,

    /// Log output format.
    #[arg(long, env = "RAFTAINER_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(flatten)]
    run: RunArgs,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate pod definitions and publish them as desired state.
    Upload {
        /// Pod definition JSON files.
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

#[derive(Args, Debug, Clone)]
struct ConsulArgs {
    #[arg(long, env = "RAFTAINER_CONSUL_HOST", default_value = "consul.service.consul", global = true)]
    consul_host: String,

    #[arg(long, env = "RAFTAINER_CONSUL_PORT", default_value = "8500", global = true)]
    consul_port: u16,
}

#[derive(Args, Debug, Clone)]
struct RunArgs {
    /// Host name; also the Consul node the host session is bound to.
    #[arg(long, env = "HOSTNAME", required = true)]
    host_name: Option<String>,

    #[arg(long, env = "RAFTAINER_REGION", required = true)]
    region: Option<String>,

    /// Address of the secure data plane; the internal IP is used if unset.
    #[arg(long, env = "RAFTAINER_SECURE_IP")]
    secure_ip: Option<IpAddr>,

    #[arg(long, env = "RAFTAINER_INTERNAL_IP", required = true)]
    internal_ip: Option<IpAddr>,

    #[arg(long, env = "RAFTAINER_VAULT_ADDR", default_value = "http://vault.service.consul:8200")]
    vault_addr: String,

    #[arg(long, env = "VAULT_ROLE_ID", default_value = "", hide_env_values = true)]
    vault_role_id: String,

    #[arg(long, env = "VAULT_SECRET_ID", default_value = "", hide_env_values = true)]
    vault_secret_id: String,

    /// Do not wait for a previous session of this host to expire.
    #[arg(long, env = "RAFTAINER_FAST_STARTUP")]
    fast_startup: bool,

    /// Seconds between timer-triggered sync passes.
    #[arg(long, env = "RAFTAINER_SYNC_INTERVAL", default_value = "10")]
    sync_interval: u64,

    /// Seconds a pod that failed to launch is skipped.
    #[arg(long, env = "RAFTAINER_FAILURE_TTL", default_value = "300")]
    failure_ttl: u64,

    #[arg(long, env = "RAFTAINER_LOCK_CONCURRENCY", default_value = "5")]
    lock_concurrency: usize,

    /// Consecutive failed passes before exiting; 0 never exits.
    #[arg(long, env = "RAFTAINER_MAX_FAILED_PASSES", default_value = "30")]
    max_failed_passes: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,raftainerd=debug,raftainer=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Some(Command::Upload { files }) => {
            upload::upload(&cli.consul, &files).await?;
            Ok(ExitCode::SUCCESS)
        }
        None => daemon::run(&cli.consul, cli.run).await,
    }
}
