use std::path::PathBuf;

use clap::Parser;
use eyre::WrapErr;
use server::{AdmissionPolicy, DebuggerServer, ServerConfig, TabDescriptor};
use tracing_subscriber::EnvFilter;

/// Serve the browser actors over TCP.
///
/// Remote listening is always on: `remote_enabled` from the config file is
/// ignored, the other settings apply unless overridden by a flag.
#[derive(Debug, Parser)]
struct Args {
    /// Path to the config file
    #[clap(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on, overriding the config file
    #[clap(short, long)]
    port: Option<u16>,

    /// Accept connections from other hosts, not just loopback
    #[clap(long)]
    allow_remote: bool,

    /// Accept every connection without prompting
    #[clap(short, long)]
    yes: bool,

    /// Tab to list, as TITLE=URL
    #[clap(short, long)]
    tab: Vec<TabDescriptor>,
}

impl Args {
    fn apply(self, config: &mut ServerConfig) {
        config.remote_enabled = true;
        if self.allow_remote {
            config.force_local = false;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        config.tabs.extend(self.tab);
    }
}

fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    color_eyre::install()?;

    let args = Args::parse();
    tracing::debug!(?args, "parsed command line arguments");

    let mut config = ServerConfig::load(args.config.as_deref()).context("loading config")?;
    let policy = args.yes.then(AdmissionPolicy::allow_all);
    args.apply(&mut config);

    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building runtime")?
        .block_on(serve(config, policy))
}

async fn serve(config: ServerConfig, policy: Option<AdmissionPolicy>) -> eyre::Result<()> {
    let port = config.port;
    let mut server = DebuggerServer::new(config);
    server.init(policy);
    server.add_browser_actors().context("installing browser actors")?;
    server
        .open_listener(port)
        .await
        .with_context(|| format!("listening on port {port}"))?;
    if let Some(addr) = server.listener_addr() {
        eprintln!("listening on {addr}");
    }

    tokio::select! {
        _ = server.run() => tracing::info!("no connections left"),
        res = tokio::signal::ctrl_c() => {
            res.context("waiting for ctrl-c")?;
            tracing::info!("interrupted, shutting down");
        }
    }

    server.close_listener(true);
    let open = server.connection_count();
    if !server.destroy() {
        tracing::warn!(connections = open, "exiting with connections still open");
    }
    Ok(())
}
