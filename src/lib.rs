pub mod collaborators;
pub mod config;
pub mod database;
pub mod error;
pub mod holds;
#[cfg(any(test, feature = "test-utils"))]
pub mod mocks;
pub mod models;
pub mod redis_client;
pub mod repository;
pub mod services;
pub mod telemetry;

use anyhow::Context;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

pub use error::{ErrorKind, ReservationError, Result};
pub use services::ReservationOrchestrator;

use collaborators::{PaymentProcessor, PgEventDirectory, WaitlistService};
use holds::RedisHoldStore;
use repository::PgBookingRepository;
use services::OrchestratorSettings;

// Shared state для всего приложения
pub struct AppState {
    pub db: database::Database,
    pub redis: redis_client::RedisClient,
    pub config: config::Config,
    pub reservations: Arc<ReservationOrchestrator>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreHealth {
    pub postgres: bool,
    pub redis: bool,
}

impl AppState {
    /// Connects both stores, runs migrations and wires the orchestrator.
    /// The waitlist and payment collaborators are supplied by the embedding
    /// service.
    pub async fn new(
        config: config::Config,
        waitlist: Arc<dyn WaitlistService>,
        payments: Arc<dyn PaymentProcessor>,
    ) -> anyhow::Result<Arc<Self>> {
        let db = database::Database::new(&config.database)
            .await
            .context("failed to connect to database")?;
        info!("Database connected");

        db.run_migrations()
            .await
            .context("failed to run migrations")?;

        let redis = redis_client::RedisClient::new(&config.redis.url)
            .await
            .context("failed to connect to Redis")?;
        info!("Redis connected");

        let reservations = Arc::new(ReservationOrchestrator::new(
            Arc::new(RedisHoldStore::new(redis.clone(), config.redis.key_prefix.clone())),
            Arc::new(PgBookingRepository::new(db.pool.clone())),
            Arc::new(PgEventDirectory::new(db.pool.clone())),
            waitlist,
            payments,
            OrchestratorSettings::from(&config),
        ));

        Ok(Arc::new(Self {
            db,
            redis,
            config,
            reservations,
        }))
    }

    /// Pings each store separately; a down hold store disables holding
    /// entirely, so callers need to tell the two apart.
    pub async fn health(&self) -> StoreHealth {
        let (postgres, redis) = tokio::join!(self.db.ping(), self.redis.ping());
        if let Err(e) = &postgres {
            warn!(error = %e, "Postgres health check failed");
        }
        if let Err(e) = &redis {
            warn!(error = %e, "Redis health check failed");
        }
        StoreHealth {
            postgres: postgres.is_ok(),
            redis: redis.is_ok(),
        }
    }

    pub async fn close(&self) {
        self.reservations.shutdown().await;
        self.db.close().await;
        info!("Reservation core stopped");
    }
}
