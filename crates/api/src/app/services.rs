//! Infrastructure wiring: picks Postgres or in-memory stores from config.

use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use eventhub_core::SystemClock;
use eventhub_infra::{EventService, EventServiceBuilder, ServiceConfig, db};

const MAX_DB_CONNECTIONS: u32 = 10;

pub async fn build_services(config: &ServiceConfig) -> anyhow::Result<Arc<EventService>> {
    let builder = match &config.database_url {
        Some(url) => {
            let pool = db::connect(url, MAX_DB_CONNECTIONS)
                .await
                .context("failed to connect to postgres")?;
            db::migrate(&pool).await.context("failed to apply schema")?;
            info!("using postgres stores");
            EventServiceBuilder::postgres(pool)
        }
        None => {
            info!("DATABASE_URL not set; using in-memory stores");
            EventServiceBuilder::in_memory(Arc::new(SystemClock))
        }
    };

    let builder = with_channel_transport(builder.with_config(config), config)?;
    let service = builder.build().await.context("failed to start event service")?;
    Ok(Arc::new(service))
}

#[cfg(feature = "redis")]
fn with_channel_transport(
    builder: EventServiceBuilder,
    config: &ServiceConfig,
) -> anyhow::Result<EventServiceBuilder> {
    use eventhub_infra::subscriptions::RedisDeliverer;

    match &config.redis_url {
        Some(url) => {
            let redis = RedisDeliverer::new(url).context("invalid REDIS_URL")?;
            info!("channel deliveries go to redis pub/sub");
            Ok(builder.with_channel_deliverer(Arc::new(redis)))
        }
        None => Ok(builder),
    }
}

#[cfg(not(feature = "redis"))]
fn with_channel_transport(
    builder: EventServiceBuilder,
    config: &ServiceConfig,
) -> anyhow::Result<EventServiceBuilder> {
    if config.redis_url.is_some() {
        tracing::warn!("REDIS_URL set but built without the `redis` feature; using in-process channels");
    }
    Ok(builder)
}
