//! Process lifecycle: build channels, start the Discord task, serve the webhook, shut down.

use crate::channels::discord::DiscordGateway;
use crate::channels::ChannelRegistry;
use crate::config::{self, Config};
use crate::ingress::{run_discord_ingress, IngressFilter};
use crate::relay::Relay;
use crate::server::routes::{router, RelayState};
use anyhow::{Context, Result};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Run the relay; binds to config.gateway.bind:config.gateway.port.
/// Fails fast when a required credential is missing. Blocks until shutdown (e.g. Ctrl+C).
pub async fn run_relay(config: Config) -> Result<()> {
    let credentials = config.credentials()?;
    let relay = Arc::new(Relay::from_config(&config, &credentials));
    let channel_registry = Arc::new(ChannelRegistry::new());
    channel_registry.register(relay.line()).await;
    channel_registry.register(relay.discord()).await;

    let gateway = Arc::new(DiscordGateway::new(
        credentials.discord_token.clone(),
        config::resolve_discord_gateway_url(&config),
    ));
    channel_registry.register(gateway.clone()).await;
    let (session, gateway_task) = gateway.clone().start();
    let ingress_task = tokio::spawn(run_discord_ingress(
        session,
        relay.clone(),
        IngressFilter::from_config(&config),
    ));

    let state = RelayState {
        relay,
        channel_registry: channel_registry.clone(),
        discord_gateway: Some(gateway),
    };

    let bind_addr = format!("{}:{}", config.gateway.bind.trim(), config.gateway.port);
    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!("listening for LINE webhooks on {}", bind_addr);

    serve(
        listener,
        state,
        shutdown_signal(channel_registry, vec![gateway_task, ingress_task]),
    )
    .await?;
    log::info!("relay stopped");
    Ok(())
}

/// Serve the routes on `listener` until `shutdown` completes.
pub async fn serve<F>(listener: TcpListener, state: RelayState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("relay server exited")
}

/// Future that completes when the process should shut down (SIGINT or SIGTERM).
/// Stops channel connectors, then awaits the Discord tasks.
async fn shutdown_signal(channel_registry: Arc<ChannelRegistry>, channel_tasks: Vec<JoinHandle<()>>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received, stopping channels");

    channel_registry.stop_all().await;
    for h in channel_tasks {
        let _ = h.await;
    }
    log::info!("channel tasks finished");
}
