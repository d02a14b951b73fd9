pub mod config;
pub mod invalidation;
pub mod publisher;


pub use config::RabbitMqConfig;
pub use invalidation::{CacheInvalidator, NoopInvalidator};
pub use publisher::{CacheInvalidationMessage, InvalidationKind, PublisherError, RabbitMqPublisher};

use std::sync::Arc;

use tracing::{info, warn};

/// Connects the RabbitMQ invalidator when `RABBITMQ_*` is configured, otherwise (or when the
/// broker is unreachable) falls back to [`NoopInvalidator`].
pub async fn invalidator_from_env() -> Arc<dyn CacheInvalidator> {
    let config = match RabbitMqConfig::from_env() {
        Ok(config) => config,
        Err(_) => {
            info!("RabbitMQ is not configured, cache invalidation is disabled");
            return Arc::new(NoopInvalidator);
        }
    };

    match RabbitMqPublisher::connect_from_config(&config).await {
        Ok(publisher) => Arc::new(publisher),
        Err(e) => {
            warn!("Could not connect to RabbitMQ, cache invalidation is disabled: {}", e);
            Arc::new(NoopInvalidator)
        }
    }
}
