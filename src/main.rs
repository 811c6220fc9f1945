//! dhammer: raw-socket DHCPv4 and TCP load generator.
//!
//! Usage:
//!   dhammer [GLOBAL OPTIONS] dhcpv4 [--mac-count N] [--arp] [--bind] ...
//!   dhammer [GLOBAL OPTIONS] tcpconn [--handshake 0|1|2] [--spoof-sources-file F] ...

use clap::Parser;
use tracing_subscriber::EnvFilter;

use dhammer::cli::Cli;
use dhammer::{api, gateway, Hammer, HammerError, Registry};

#[tokio::main]
async fn main() {
    // RUST_LOG=debug etc.; info by default
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), HammerError> {
    let gateway_mac = gateway::gateway_mac_from_arg(&cli.gateway_mac, &cli.interface)?;
    let config = cli.hammer_config(gateway_mac)?;
    let api_addr = cli.api_socket_addr()?;

    let mut hammer = Hammer::new(config, Registry::builtin()?);
    hammer.init()?;
    let handle = hammer.handle().ok_or(HammerError::NotInitialized)?;

    let (api_stop_tx, api_stop_rx) = tokio::sync::oneshot::channel::<()>();
    let api_task = api_addr.map(|addr| {
        tokio::spawn(api::serve(addr, handle.clone(), async move {
            let _ = api_stop_rx.await;
        }))
    });

    let interrupt = handle.clone();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, stopping");
            let _ = tokio::task::spawn_blocking(move || interrupt.stop()).await;
        }
    });

    let result = tokio::task::spawn_blocking(move || hammer.run())
        .await
        .map_err(|_| HammerError::ThreadPanic("hammer"))?;

    watcher.abort();
    let _ = api_stop_tx.send(());
    if let Some(task) = api_task {
        match task.await {
            Ok(Err(e)) => tracing::warn!(error = %e, "API server failed"),
            Err(e) => tracing::warn!(error = %e, "API task aborted"),
            Ok(Ok(())) => {}
        }
    }

    match serde_json::to_string_pretty(&handle.stats()) {
        Ok(json) => println!("{json}"),
        Err(e) => tracing::warn!(error = %e, "final stats not serializable"),
    }
    result
}
