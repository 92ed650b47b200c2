use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use workbench_core::rpc::LoopbackServer;
use workbench_core::service::ReviewService;
use workbench_core::Config;

#[derive(Parser, Debug)]
#[command(author, version, about = "Serve Workbench review requests on 127.0.0.1", long_about = None)]
struct Args {
    /// Path to configuration file (TOML); the environment is used when absent
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on, 0 picks a free one
    #[arg(long, env = "WORKBENCH_LISTEN_PORT", default_value_t = 0)]
    port: u16,
}

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "workbench=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = load_config(args.config.as_deref())?;

    let service = ReviewService::from_config(&config).with_context(|| {
        format!(
            "failed to open workspaces under {}",
            config.base_path.display()
        )
    })?;
    let workspaces = service.workspaces();
    if !config.base_marker().is_file() {
        workspaces.init_base().with_context(|| {
            format!(
                "failed to initialize {} from {}",
                config.base_path.display(),
                config.source_repo.display()
            )
        })?;
    }

    let server = LoopbackServer::bind(Arc::new(service), args.port)
        .with_context(|| format!("failed to bind port {}", args.port))?;
    tracing::info!(address = %server.local_addr(), "ready");
    server.wait();
    Ok(())
}

fn load_config(path: Option<&std::path::Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load(path)
            .with_context(|| format!("failed to load configuration from {}", path.display())),
        None => Config::from_env().context("failed to read configuration from the environment"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn arguments_are_well_formed() {
        Args::command().debug_assert();
    }

    #[test]
    fn flags_override_defaults() {
        let args = Args::try_parse_from([
            "workbench-server",
            "--config",
            "wb.toml",
            "--port",
            "7100",
        ])
        .expect("parse");
        assert_eq!(args.config, Some(PathBuf::from("wb.toml")));
        assert_eq!(args.port, 7100);
    }
}
