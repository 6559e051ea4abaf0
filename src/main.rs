use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use onioncat_socks::address::CachingHosts;
use onioncat_socks::config::Config;
use onioncat_socks::peer::PeerTable;
use onioncat_socks::reactor::Connector;
use onioncat_socks::{control_channel, probe};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let config = Config::parse();
    let terminate = Arc::new(std::sync::atomic::AtomicBool::new(false));

    if config.connector_enabled() {
        tracing::info!(
            mode = ?config.socks5,
            proxy = ?config.socks_dst,
            "Probing SOCKS proxy before starting the connector"
        );

        let probe_config = config.clone();
        let probe_terminate = terminate.clone();
        let mut probe_handle = tokio::spawn(async move { probe::run(&probe_config, &probe_terminate).await });

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received interrupt during startup probe, shutting down");
                terminate.store(true, Ordering::Relaxed);
                probe_handle.await.context("Startup probe task panicked")?.ok();
                return Ok(());
            }
            result = &mut probe_handle => {
                let probe_result = result.context("Startup probe task panicked")?;
                match probe_result {
                    Ok(()) => {}
                    Err(onioncat_socks::ConnectError::Terminated) => return Ok(()),
                    Err(error) => {
                        return Err(error).context("Startup probe against the configured SOCKS proxy failed");
                    }
                }
            }
        }
    } else {
        tracing::info!("No SOCKS destination configured, connector disabled");
    }

    let (control, control_rx) = control_channel();
    let peer_layer = Arc::new(PeerTable::new());

    let connector = Connector::new(
        config,
        control_rx,
        CachingHosts::new(),
        peer_layer,
        terminate.clone(),
    );

    let mut reactor_handle = tokio::spawn(connector.run());

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received interrupt, shutting down");
            terminate.store(true, Ordering::Relaxed);
            // Nudge the reactor's select loop so it notices the flag
            // promptly instead of waiting for the next tick.
            control.wakeup();
            reactor_handle.await.context("Connector reactor task panicked")?;
        }
        result = &mut reactor_handle => {
            result.context("Connector reactor task panicked")?;
        }
    }

    Ok(())
}
