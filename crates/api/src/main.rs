use std::sync::Arc;

use anyhow::Context;

use dormswap_infra::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dormswap_observability::init();

    let config = AppConfig::from_env().context("loading configuration")?;
    let services = Arc::new(dormswap_api::app::build_services(&config).await?);

    let sweep = config.sweep_interval.map(|every| {
        tracing::info!(interval_secs = every.as_secs(), "reconciliation sweep enabled");
        services.sweep.clone().spawn(every)
    });

    let app = dormswap_api::app::build_app(services, &config.jwt_secret);

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    if let Some(sweep) = sweep {
        sweep.shutdown().await;
    }
    tracing::info!("shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
