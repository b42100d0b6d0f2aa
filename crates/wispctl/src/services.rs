// Service bootstrap: the one place the object graph is wired.
//
// One store, one pool, one notifier -- constructed here and injected
// into every scheduler and coordinator.

use std::sync::Arc;

use wispctl_api::TransportConfig;
use wispctl_config::AppConfig;
use wispctl_core::{
    BillingStore, ExpiryScheduler, HealthMonitor, MemoryStore, MigrationCoordinator,
    MonitoringScheduler, NotificationSink, RouterPool, TracingSink,
};

use crate::error::CliError;

pub struct Services {
    pub pool: Arc<RouterPool>,
    pub health: HealthMonitor,
    pub expiry: ExpiryScheduler,
    pub monitoring: MonitoringScheduler,
    pub coordinator: MigrationCoordinator,
}

impl Services {
    pub fn build(config: &AppConfig) -> Result<Self, CliError> {
        let store: Arc<dyn BillingStore> = Arc::new(MemoryStore::new());

        // The config profile is the administrative source for the
        // settings row; the pool reads it back through the store.
        store.put_router_settings(config.router.to_settings())
            .map_err(wispctl_core::CoreError::from)?;

        if let Some(seed_file) = &config.data.seed_file {
            let seed = wispctl_config::SeedData::from_file(seed_file)?;
            seed.apply(store.as_ref())?;
            tracing::info!(
                customers = seed.customers.len(),
                subscriptions = seed.subscriptions.len(),
                "seed data loaded"
            );
        }

        let pool = Arc::new(RouterPool::with_transport(
            Arc::clone(&store),
            TransportConfig {
                timeout: config.engine.command_timeout(),
                ..TransportConfig::default()
            },
            config.engine.command_timeout(),
        ));

        let notifier: Arc<dyn NotificationSink> = Arc::new(TracingSink);

        let health =
            HealthMonitor::with_throttle(Arc::clone(&pool), config.engine.health_throttle());
        let expiry = ExpiryScheduler::with_interval(
            Arc::clone(&store),
            Arc::clone(&pool),
            Arc::clone(&notifier),
            config.engine.expiry_interval(),
        );
        let monitoring = MonitoringScheduler::with_config(
            Arc::clone(&store),
            Arc::clone(&pool),
            config.engine.monitoring(),
        );
        let coordinator =
            MigrationCoordinator::new(Arc::clone(&store), Arc::clone(&pool), notifier);

        Ok(Self {
            pool,
            health,
            expiry,
            monitoring,
            coordinator,
        })
    }
}
