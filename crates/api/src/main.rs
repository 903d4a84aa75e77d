use anyhow::Context;

use eventhub_infra::ServiceConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    eventhub_observability::init();

    let config = ServiceConfig::from_env().context("invalid configuration")?;
    let services = eventhub_api::app::services::build_services(&config).await?;
    let pipeline = services.spawn_pipeline();

    let app = eventhub_api::app::build_app(services);
    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown requested");
        })
        .await?;

    pipeline.shutdown().await;
    Ok(())
}
