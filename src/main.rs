//! dnswhisper - covert pairwise messaging tunneled through DNS query names
//!
//! Runs two concurrent activities: a capture task reassembling inbound
//! fragments and an interactive loop turning stdin lines into outbound
//! query bursts. Ctrl-C flips the shutdown flag and waits for the capture
//! task to wind down before exiting.

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncBufReadExt;
use tokio::sync::{mpsc, watch};

use dnswhisper::{
    envelope, ChannelConfig, DeliveryOutcome, Keyring, Outbound, ReassemblyEngine, Session,
    SessionCipher, UdpPacketSource, UdpResolver,
};

#[derive(Parser)]
#[command(name = "dnswhisper")]
#[command(version, long_version = concat!(
    env!("CARGO_PKG_VERSION"),
    " (", env!("GIT_HASH"), ", built ", env!("BUILD_DATE"), ")"
))]
#[command(about = "Covert pairwise messaging tunneled through DNS query names", long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// DNS resolver to dispatch queries to (e.g. 8.8.8.8:53)
    #[arg(short, long)]
    resolver: Option<SocketAddr>,

    /// Numeric id to use (1-99, random when omitted)
    #[arg(short, long)]
    id: Option<u32>,

    /// Domain suffix appended to every query (e.g. chat.example.com)
    #[arg(short, long)]
    domain_suffix: Option<String>,

    /// Maximum characters per query label (max 63)
    #[arg(short, long)]
    char_limit: Option<usize>,

    /// Address the capture socket binds on
    #[arg(long)]
    capture_bind: Option<SocketAddr>,

    /// Path to the base64 key material blob
    #[arg(short, long)]
    key_file: Option<PathBuf>,

    /// Symmetric passphrase to use for this session
    #[arg(short, long, env = "DNSWHISPER_PASSPHRASE", hide_env_values = true)]
    passphrase: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logger
    if cli.verbose {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Debug)
            .init();
    } else {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Info)
            .init();
    }

    let config = merged_config(&cli)?;
    config.validate().map_err(|e| anyhow::anyhow!(e))?;

    // Secret setup is the only fatal path: without it there is no channel
    let material = std::fs::read_to_string(&config.key_file)
        .with_context(|| format!("Failed to read key material from {:?}", config.key_file))?;
    let secret =
        Keyring::import(&material, &config.passphrase).context("Failed to import key material")?;
    info!("imported key {:?}", secret.fingerprint());

    let cipher =
        Arc::new(SessionCipher::derive(&secret).context("Failed to derive session key")?);

    let session = Session::new(config.local_id, config.domain_suffix.clone(), config.char_limit);
    info!(
        "session up: id {} on suffix {} (char limit {})",
        session.local_id(),
        session.domain_suffix(),
        session.char_limit()
    );

    let source = UdpPacketSource::bind(config.capture_bind)
        .await
        .context("Failed to bind capture socket")?;
    let resolver = Arc::new(
        UdpResolver::connect(config.resolver)
            .await
            .context("Failed to reach resolver")?,
    );

    let (delivery_tx, mut delivery_rx) = mpsc::unbounded_channel();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let engine = ReassemblyEngine::new(
        source,
        Arc::clone(&cipher),
        session.local_id(),
        config.capture_bind.port(),
        delivery_tx,
        shutdown_rx,
    );
    let engine_task = tokio::spawn(engine.run());

    let mut outbound = Outbound::new(session, cipher, resolver);

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    println!("Enter a message (Ctrl-C to exit):");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,

            message = delivery_rx.recv() => {
                match message {
                    Some(message) => println!("{}", message.display_line()),
                    None => break,
                }
            }

            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        let text = line.trim();
                        if text.is_empty() {
                            continue;
                        }
                        send_line(&mut outbound, text).await;
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!("stdin error: {}", e);
                        break;
                    }
                }
            }
        }
    }

    println!();
    info!("Exiting....");
    let _ = shutdown_tx.send(true);
    if tokio::time::timeout(Duration::from_secs(5), engine_task)
        .await
        .is_err()
    {
        warn!("capture task did not stop in time");
    }

    Ok(())
}

/// Dispatch one line and echo it locally. Transport failures are reported
/// but never retried; the channel has no acknowledgments.
async fn send_line(outbound: &mut Outbound, text: &str) {
    match outbound.send_message(text).await {
        Ok(DeliveryOutcome::Sent { fragments }) => {
            log::debug!("dispatched {} fragments", fragments);
        }
        Ok(DeliveryOutcome::TransportFailed { dispatched, failed }) => {
            warn!(
                "{} of {} fragments failed to dispatch; the message may arrive incomplete",
                failed,
                dispatched + failed
            );
        }
        Err(e) => {
            warn!("send failed: {}", e);
            return;
        }
    }
    println!("{} [You]: {}", envelope::format_clock(envelope::unix_now()), text);
}

/// Start from the config file (or defaults) and let command-line flags
/// override individual fields.
fn merged_config(cli: &Cli) -> Result<ChannelConfig> {
    let mut config = if let Some(path) = &cli.config {
        ChannelConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {:?}", path))?
    } else {
        ChannelConfig::default()
    };

    if let Some(resolver) = cli.resolver {
        config.resolver = resolver;
    }
    if let Some(id) = cli.id {
        config.local_id = Some(id);
    }
    if let Some(domain_suffix) = &cli.domain_suffix {
        config.domain_suffix = domain_suffix.clone();
    }
    if let Some(char_limit) = cli.char_limit {
        config.char_limit = char_limit;
    }
    if let Some(capture_bind) = cli.capture_bind {
        config.capture_bind = capture_bind;
    }
    if let Some(key_file) = &cli.key_file {
        config.key_file = key_file.clone();
    }
    if let Some(passphrase) = &cli.passphrase {
        config.passphrase = passphrase.clone();
    }

    Ok(config)
}
