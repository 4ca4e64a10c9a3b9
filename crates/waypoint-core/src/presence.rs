//! Availability projection from connection churn.
//!
//! In `auto` mode the stored status mirrors whether the user holds any live
//! connection. A `manual` status is sticky: connects and disconnects leave
//! it untouched until the user switches back to auto.

use waypoint_db::{users, DbError, DbPool};
use waypoint_models::availability::{Availability, AvailabilityMode, AvailabilityStatus};

use crate::registry::ConnectionRegistry;

/// Called after a connection registers. Returns true when the stored status
/// changed, so the caller knows to fan out a presence frame.
pub async fn mark_connected(pool: &DbPool, user_id: i64) -> Result<bool, DbError> {
    let current = users::get_availability(pool, user_id).await?;
    if current.mode != AvailabilityMode::Auto || current.status == AvailabilityStatus::Online {
        return Ok(false);
    }
    users::set_availability_status(pool, user_id, AvailabilityStatus::Online).await?;
    Ok(true)
}

/// Called after a connection unregisters. Only flips to offline once the
/// user's last connection is gone.
pub async fn mark_disconnected(
    pool: &DbPool,
    registry: &ConnectionRegistry,
    user_id: i64,
) -> Result<bool, DbError> {
    if registry.is_user_online(user_id) {
        return Ok(false);
    }
    let current = users::get_availability(pool, user_id).await?;
    if current.mode != AvailabilityMode::Auto || current.status == AvailabilityStatus::Offline {
        return Ok(false);
    }
    users::set_availability_status(pool, user_id, AvailabilityStatus::Offline).await?;
    Ok(true)
}

/// Pin a status; connection churn no longer affects it.
pub async fn set_manual(
    pool: &DbPool,
    user_id: i64,
    status: AvailabilityStatus,
) -> Result<Availability, DbError> {
    let availability = Availability {
        status,
        mode: AvailabilityMode::Manual,
    };
    users::set_availability(pool, user_id, availability).await?;
    Ok(availability)
}

/// Return to auto mode; the status is re-derived from live connections.
pub async fn set_auto(
    pool: &DbPool,
    registry: &ConnectionRegistry,
    user_id: i64,
) -> Result<Availability, DbError> {
    let status = if registry.is_user_online(user_id) {
        AvailabilityStatus::Online
    } else {
        AvailabilityStatus::Offline
    };
    let availability = Availability {
        status,
        mode: AvailabilityMode::Auto,
    };
    users::set_availability(pool, user_id, availability).await?;
    Ok(availability)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{connection_channel, RegistryConfig};
    use std::sync::Arc;
    use waypoint_db::{create_pool, run_migrations, DatabaseEngine};
    use waypoint_models::channel::ChannelId;

    async fn pool() -> DbPool {
        let pool = create_pool("sqlite::memory:", 1).await.unwrap();
        run_migrations(&pool, DatabaseEngine::Sqlite).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn auto_mode_follows_connections() {
        let pool = pool().await;
        let registry = ConnectionRegistry::new(RegistryConfig::default());
        let user = users::create_user(&pool, "ana").await.unwrap();

        assert!(mark_connected(&pool, user.id).await.unwrap());
        assert!(!mark_connected(&pool, user.id).await.unwrap());
        assert_eq!(
            users::get_availability(&pool, user.id).await.unwrap().status,
            AvailabilityStatus::Online
        );

        assert!(mark_disconnected(&pool, &registry, user.id).await.unwrap());
        assert_eq!(
            users::get_availability(&pool, user.id).await.unwrap().status,
            AvailabilityStatus::Offline
        );

        registry.shutdown().await;
    }

    #[tokio::test]
    async fn disconnect_waits_for_the_last_connection() {
        let pool = pool().await;
        let registry = ConnectionRegistry::new(RegistryConfig::default());
        let user = users::create_user(&pool, "ana").await.unwrap();
        mark_connected(&pool, user.id).await.unwrap();

        let (conn, _rx) = connection_channel(8);
        registry.connect(ChannelId::Dm(1), user.id, conn);

        assert!(!mark_disconnected(&pool, &registry, user.id).await.unwrap());
        assert_eq!(
            users::get_availability(&pool, user.id).await.unwrap().status,
            AvailabilityStatus::Online
        );

        registry.shutdown().await;
    }

    #[tokio::test]
    async fn manual_status_is_sticky() {
        let pool = pool().await;
        let registry = ConnectionRegistry::new(RegistryConfig::default());
        let user = users::create_user(&pool, "ana").await.unwrap();

        set_manual(&pool, user.id, AvailabilityStatus::Offline)
            .await
            .unwrap();
        assert!(!mark_connected(&pool, user.id).await.unwrap());
        assert_eq!(
            users::get_availability(&pool, user.id).await.unwrap().status,
            AvailabilityStatus::Offline
        );

        let restored = set_auto(&pool, &registry, user.id).await.unwrap();
        assert_eq!(restored.status, AvailabilityStatus::Offline);
        assert_eq!(restored.mode, AvailabilityMode::Auto);

        registry.shutdown().await;
    }

    #[tokio::test]
    async fn set_auto_derives_online_from_live_connections() {
        let pool = pool().await;
        let registry = ConnectionRegistry::new(RegistryConfig::default());
        let user = users::create_user(&pool, "ana").await.unwrap();
        set_manual(&pool, user.id, AvailabilityStatus::Offline)
            .await
            .unwrap();

        let (conn, _rx) = connection_channel(8);
        registry.connect(ChannelId::Place(1), user.id, conn);

        let restored = set_auto(&pool, &registry, user.id).await.unwrap();
        assert_eq!(restored.status, AvailabilityStatus::Online);

        registry.shutdown().await;
    }
}
