use anyhow::{Context, Result};
use bytes::Bytes;
use clap::{Parser, Subcommand};
use edgecomm::core::config::{LogFormat, LoggingConfig};
use edgecomm::core::{CommConfig, ServiceQuery, ServiceSpec, SpecSource};
use edgecomm::plugin::{EventKind, MessageContext, PeerHandle};
use edgecomm::{builtin_plugin_dir, builtin_interface_dir, Client, CommContext, Service};
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// edgecomm - discover services on the local network and talk to them
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (YAML or JSON)
    #[arg(short, long, env = "EDGECOMM_CONFIG")]
    config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run an echo service for a spec (JSON string or file)
    Serve {
        spec: String,
    },

    /// Print services matching a query (JSON string or file)
    Discover {
        query: String,

        /// Stop after this many seconds
        #[arg(short, long)]
        timeout: Option<u64>,
    },

    /// Send a message to the first service matching a query and print the
    /// reply
    Send {
        query: String,

        message: String,

        /// Seconds to wait for a service and for its reply
        #[arg(short, long, default_value_t = 10)]
        wait: u64,
    },
}

fn init_tracing(logging: &LoggingConfig, verbose: bool) {
    let default_level = if verbose { "debug" } else { logging.level.as_str() };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    match logging.format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }
}

fn load_config(path: Option<&std::path::Path>) -> Result<CommConfig> {
    let mut config = CommConfig::load(path).context("Failed to load configuration")?;
    config
        .merge_user_overrides()
        .context("Failed to read user configuration overrides")?;
    Ok(config.with_builtin_paths(builtin_plugin_dir(), builtin_interface_dir()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = load_config(args.config.as_deref())?;
    init_tracing(&config.logging, args.verbose);
    info!("edgecomm v{}", env!("CARGO_PKG_VERSION"));

    let context = CommContext::new(config).context("Failed to set up communication context")?;

    match args.command {
        Command::Serve { spec } => serve(&context, &spec).await,
        Command::Discover { query, timeout } => discover(&context, &query, timeout).await,
        Command::Send {
            query,
            message,
            wait,
        } => send(&context, &query, message, Duration::from_secs(wait)).await,
    }
}

async fn serve(context: &CommContext, spec: &str) -> Result<()> {
    let spec = ServiceSpec::parse(SpecSource::guess(spec)).context("Invalid service spec")?;
    let service = context.create_service(spec).await?;

    let replier: Weak<Service> = Arc::downgrade(&service);
    service.set_received_message_handler(move |peer: PeerHandle, msg: Bytes, ctx: MessageContext| {
        match ctx.event {
            EventKind::Message | EventKind::Publish => {}
            other => {
                info!(peer = %peer, event = %other, "Client event");
                return;
            }
        }
        let Some(service) = replier.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            if let Err(e) = service.send_to(&peer, msg, MessageContext::message()).await {
                warn!(peer = %peer, error = %e, "Failed to echo message");
            }
        });
    });

    info!(
        name = ?service.spec().name(),
        local_addr = ?service.local_addr(),
        "Echo service running, press Ctrl-C to stop"
    );
    signal::ctrl_c().await.context("Failed to listen for shutdown signal")?;
    info!("Received shutdown signal, stopping service...");

    service.done().await;
    Ok(())
}

async fn discover(context: &CommContext, query: &str, timeout: Option<u64>) -> Result<()> {
    let query = ServiceQuery::parse(SpecSource::guess(query)).context("Invalid service query")?;
    let directory = context.create_directory();
    let mut found = directory.discover(query)?;

    let deadline = async {
        match timeout {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            spec = found.recv() => {
                let Some(spec) = spec else { break };
                println!("{}", serde_json::to_string(&spec)?);
            }
            _ = &mut deadline => break,
            _ = signal::ctrl_c() => break,
        }
    }

    directory.stop_discovering();
    Ok(())
}

async fn send(context: &CommContext, query: &str, message: String, wait: Duration) -> Result<()> {
    let query = ServiceQuery::parse(SpecSource::guess(query)).context("Invalid service query")?;

    let (client_tx, mut clients) = mpsc::unbounded_channel();
    let discovery = context
        .create_client(
            query,
            move |client: Client| {
                let _ = client_tx.send(client);
            },
            None,
        )
        .await?;

    let client = loop {
        let client = tokio::time::timeout(wait, clients.recv())
            .await
            .context("No matching service found")?
            .context("Discovery ended before a service was found")?;
        if client.is_ready() {
            break client;
        }
        warn!(name = ?client.spec().name(), "Skipping service without a usable backend");
    };
    discovery.stop();

    let (reply_tx, mut replies) = mpsc::unbounded_channel();
    client.set_received_message_handler(move |_peer, msg, ctx| {
        if ctx.event == EventKind::Message {
            let _ = reply_tx.send(msg);
        }
    })?;

    client.send(message, MessageContext::message()).await?;

    match tokio::time::timeout(wait, replies.recv()).await {
        Ok(Some(reply)) => println!("{}", String::from_utf8_lossy(&reply)),
        Ok(None) => error!("Connection closed before a reply arrived"),
        Err(_) => warn!(wait = ?wait, "No reply received"),
    }

    client.done().await;
    Ok(())
}
