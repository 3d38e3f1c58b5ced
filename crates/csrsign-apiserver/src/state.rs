use csrsign_core::ResourceEvent;
use csrsign_storage::ResourceStore;
use tokio::sync::broadcast;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Versioned resource store; also owns the event bus
    pub store: ResourceStore,
}

impl AppState {
    pub fn new(store: ResourceStore) -> Self {
        Self { store }
    }

    /// Subscribe to resource events
    pub fn subscribe(&self) -> broadcast::Receiver<ResourceEvent> {
        self.store.subscribe()
    }
}
