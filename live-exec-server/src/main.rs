use clap::Parser;
use live_exec::RunnerConfig;
use live_exec_server::{create_app, run_server};
use std::{net::SocketAddr, path::PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to listen on
    #[arg(short, long, default_value = "0.0.0.0:3000")]
    addr: SocketAddr,

    /// TOML file with runner settings
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory under which per-run workspaces are created
    #[arg(long)]
    workspace_root: Option<PathBuf>,

    /// Upper bound on the summed size of submitted files, in bytes
    #[arg(long)]
    max_payload_bytes: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => RunnerConfig::from_toml_file(path)?,
        None => RunnerConfig::default(),
    };
    if let Some(root) = args.workspace_root {
        config = config.with_workspace_root(root);
    }
    if let Some(limit) = args.max_payload_bytes {
        config = config.with_max_payload_bytes(limit);
    }

    let app = create_app(config).await?;
    run_server(app, args.addr).await?;

    Ok(())
}
