use std::path::PathBuf;
use std::time::Duration;

use anyhow::{ bail, Context };
use clap::Parser;
use signal_hook::consts::{ SIGINT, SIGTERM };
use tracing::{ error, info, warn };
use tracing_subscriber::EnvFilter;

use webserv::config;
use webserv::server::{ Server, ServerOptions };

#[derive(Debug, Parser)]
#[command(name = "webserv", version, about = "Event-driven HTTP/1.1 server with nginx-style configuration")]
struct Cli {
    /// Configuration file to load.
    config: PathBuf,

    /// Directory for the request and location logs.
    #[arg(long, default_value = "logs")]
    log_dir: PathBuf,

    /// Directory that relative roots and CGI paths resolve against.
    #[arg(long, default_value = ".")]
    base_dir: PathBuf,

    /// Seconds a connection may stay idle before it is closed.
    #[arg(long, default_value_t = 60)]
    idle_timeout: u64,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("webserv=info"))
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let tree = config::load_in(&cli.config, &cli.base_dir)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    for (block, e) in &tree.rejected {
        warn!(block = block + 1, error = %e, "server block ignored");
    }
    if tree.is_empty() {
        error!(config = %cli.config.display(), "no usable server block");
        bail!("no usable server block in {}", cli.config.display());
    }

    let options = ServerOptions {
        idle_timeout: Duration::from_secs(cli.idle_timeout),
        log_dir: Some(cli.log_dir),
        base_dir: cli.base_dir,
        ..ServerOptions::default()
    };
    let mut server = Server::new(tree, options).context("failed to create the event loop")?;

    for signal in [SIGINT, SIGTERM] {
        signal_hook::flag::register(signal, server.shutdown_handle())
            .context("failed to install signal handler")?;
    }

    if let Err(e) = server.bind() {
        error!(error = %e, "startup failed");
        return Err(e).context("failed to bind any listener");
    }
    server.run()?;
    info!("server stopped");
    Ok(())
}
