use crate::{
    cli::processors::BuiltinProcessor,
    client::GrpcRpcClient,
    config::Settings,
    link::Link,
};
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

pub async fn handle_serve(settings: Settings) -> Result<()> {
    let processor: BuiltinProcessor = settings
        .link
        .processor
        .parse()
        .context("Invalid link.processor")?;
    let addr = settings.listen_addr().context("Invalid listen address")?;

    let link = Link::builder(
        settings.link.name.clone(),
        settings.link.version.clone(),
        settings.link.description.clone(),
        processor,
    )
    .with_client(Arc::new(GrpcRpcClient::new(settings.client.clone())))
    .with_locator(Arc::new(settings.locator()))
    .with_advertised_endpoint(settings.advertised_endpoint())
    .build()
    .context("Failed to register link")?;

    info!(
        service_name = %link.name(),
        service_version = %link.version(),
        processor = %processor,
        address = %addr,
        sidecar = %settings.sidecar_endpoint(),
        routes = settings.routes.len(),
        "Starting relay link"
    );

    Arc::new(link)
        .serve(addr, shutdown_signal())
        .await
        .context("Relay server error")?;

    Ok(())
}

pub fn handle_config(settings: &Settings) -> Result<()> {
    let rendered =
        serde_json::to_string_pretty(settings).context("Failed to render configuration")?;
    println!("{}", rendered);
    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to register ctrl-c handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to register SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
