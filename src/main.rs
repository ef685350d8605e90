//! rust-group-share - Main entry point
//!
//! Runs either the tracker or an interactive peer node.

use anyhow::{Context, Result};
use rust_group_share::cli::run_shell;
use rust_group_share::{CliArgs, Command, PeerConfig, PeerNode, TrackerConfig, TrackerInfo, TrackerServer};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Set up panic handler for unexpected errors
fn setup_panic_handler() {
    std::panic::set_hook(Box::new(|panic_info| {
        let backtrace = std::backtrace::Backtrace::capture();
        match panic_info.location() {
            Some(location) => error!(
                "PANIC occurred at {}:{}:{}",
                location.file(),
                location.line(),
                location.column()
            ),
            None => error!("PANIC occurred at unknown location"),
        }
        let payload = panic_info.payload();
        if let Some(s) = payload.downcast_ref::<&str>() {
            error!("Panic message: {}", s);
        } else if let Some(s) = payload.downcast_ref::<String>() {
            error!("Panic message: {}", s);
        } else {
            error!("Panic message: unknown");
        }
        error!("Backtrace:\n{:?}", backtrace);
    }));
}

#[tokio::main]
async fn main() -> Result<()> {
    // Set up panic handler
    setup_panic_handler();

    // Parse CLI arguments
    let args = CliArgs::parse_args();

    // Initialize logging
    init_logging(&args);
    debug!("CLI arguments: {:?}", args);

    match &args.command {
        Command::Tracker { tracker_info, idle_timeout } => {
            let info = TrackerInfo::load(tracker_info).context("Failed to load tracker info")?;
            let config = TrackerConfig::from_args(&info, *idle_timeout).context("Invalid tracker configuration")?;
            config.validate().context("Invalid tracker configuration")?;
            run_tracker(config).await
        }
        Command::Peer { listen, tracker_info, server_workers, retry_rounds, timeout } => {
            let info = TrackerInfo::load(tracker_info).context("Failed to load tracker info")?;
            let config = PeerConfig::from_args(listen, &info, *server_workers, *retry_rounds, *timeout)
                .context("Invalid peer configuration")?;
            config.validate().context("Invalid peer configuration")?;
            run_peer(config).await
        }
    }
}

/// Initialize logging based on verbosity settings
fn init_logging(args: &CliArgs) {
    let level = args.log_level();

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if args.is_verbose() {
        subscriber.pretty().init();
    } else {
        subscriber.compact().init();
    }

    debug!("Logging initialized with level: {:?}", level);
}

/// Run the tracker until `quit` on stdin or Ctrl-C
async fn run_tracker(config: TrackerConfig) -> Result<()> {
    let server = TrackerServer::bind(config.bind_addr, config.idle_timeout)
        .await
        .context("Failed to start tracker")?;
    info!("Tracker started on {} (type `quit` to stop)", server.local_addr()?);

    let shutdown = CancellationToken::new();
    let console = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            // End of input leaves the tracker running
            while let Ok(Some(line)) = lines.next_line().await {
                if line.trim() == "quit" {
                    shutdown.cancel();
                    break;
                }
            }
        })
    };

    let ctrl_c = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupted");
            }
            shutdown.cancel();
        })
    };

    server.run(shutdown).await?;
    console.abort();
    ctrl_c.abort();
    Ok(())
}

/// Start a peer node and hand it to the interactive shell
async fn run_peer(config: PeerConfig) -> Result<()> {
    info!("Starting peer on {} with tracker {}", config.listen_addr, config.tracker_addr);
    let node = PeerNode::start(config.node_config())
        .await
        .context("Failed to start peer")?;
    run_shell(node).await
}
