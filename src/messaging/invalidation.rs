use async_trait::async_trait;
use tracing::{debug, warn};

use super::publisher::{InvalidationKind, PublisherError, RabbitMqPublisher};
use crate::model::structures::scope::Scope;

/// Every cached leaderboard page lives under this prefix.
pub const LEADERBOARD_PREFIX: &str = "leaderboard:";

pub fn leaderboard_scope_prefix(scope: Scope) -> String {
    format!("{}{}:", LEADERBOARD_PREFIX, scope)
}

pub fn leaderboard_page_key(scope: Scope, page: i64, page_size: i64) -> String {
    format!("{}{}:{}", leaderboard_scope_prefix(scope), page, page_size)
}

pub const PROFILE_PREFIX: &str = "profile:";

pub fn profile_key(user_id: i32) -> String {
    format!("{}{}", PROFILE_PREFIX, user_id)
}

pub fn achievements_key(user_id: i32) -> String {
    format!("achievements:{}", user_id)
}

/// Cache-invalidation API of the web tier.
#[async_trait]
pub trait CacheInvalidator: Send + Sync {
    async fn invalidate(&self, key: &str) -> Result<(), PublisherError>;

    async fn invalidate_prefix(&self, prefix: &str) -> Result<(), PublisherError>;
}

/// Used when no transport is configured.
pub struct NoopInvalidator;

#[async_trait]
impl CacheInvalidator for NoopInvalidator {
    async fn invalidate(&self, key: &str) -> Result<(), PublisherError> {
        debug!("No invalidation transport, skipping key '{}'", key);
        Ok(())
    }

    async fn invalidate_prefix(&self, prefix: &str) -> Result<(), PublisherError> {
        debug!("No invalidation transport, skipping prefix '{}'", prefix);
        Ok(())
    }
}

#[async_trait]
impl CacheInvalidator for RabbitMqPublisher {
    async fn invalidate(&self, key: &str) -> Result<(), PublisherError> {
        self.publish_invalidation(InvalidationKind::Key, key).await
    }

    async fn invalidate_prefix(&self, prefix: &str) -> Result<(), PublisherError> {
        self.publish_invalidation(InvalidationKind::Prefix, prefix).await
    }
}

/// Drops every leaderboard page. Failures are logged, never returned.
pub async fn invalidate_leaderboards(invalidator: &dyn CacheInvalidator) {
    if let Err(e) = invalidator.invalidate_prefix(LEADERBOARD_PREFIX).await {
        warn!("Failed to invalidate leaderboard cache: {}", e);
    }
}

/// Drops every leaderboard page plus the profile and achievement entries of `users`.
/// Failures are logged, never returned.
pub async fn invalidate_users(invalidator: &dyn CacheInvalidator, users: &[i32]) {
    invalidate_leaderboards(invalidator).await;

    for &user_id in users {
        for key in [profile_key(user_id), achievements_key(user_id)] {
            if let Err(e) = invalidator.invalidate(&key).await {
                warn!("Failed to invalidate cache key '{}': {}", key, e);
            }
        }
    }
}

/// Drops every leaderboard page and every profile, after a full recalculation.
pub async fn invalidate_everything(invalidator: &dyn CacheInvalidator) {
    invalidate_leaderboards(invalidator).await;

    if let Err(e) = invalidator.invalidate_prefix(PROFILE_PREFIX).await {
        warn!("Failed to invalidate profile cache: {}", e);
    }
}
