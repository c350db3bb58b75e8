//! Application state.

use std::sync::Arc;

use clipforge_events::EventBus;
use clipforge_scheduler::Scheduler;
use clipforge_store::Store;

use crate::config::ApiConfig;

/// Shared application state.
///
/// Construction order mirrors initialization: config, then the store, the
/// event bus, the scheduler, and finally the router that serves them.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub store: Store,
    pub events: Arc<EventBus>,
    pub scheduler: Scheduler,
}

impl AppState {
    pub fn new(
        config: ApiConfig,
        store: Store,
        events: Arc<EventBus>,
        scheduler: Scheduler,
    ) -> Self {
        Self {
            config,
            store,
            events,
            scheduler,
        }
    }
}
