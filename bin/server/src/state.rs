//! Shared application state.

use easemail_integration::{ConnectionBroker, IntegrationRegistry, ToolDispatcher};
use std::sync::Arc;

/// State shared by every route handler.
pub struct AppState {
    pub broker: ConnectionBroker,
    pub registry: Arc<IntegrationRegistry>,
    pub dispatcher: ToolDispatcher,
}

impl AppState {
    /// Creates the state. The dispatcher resolves credentials through the
    /// broker's resolver.
    #[must_use]
    pub fn new(broker: ConnectionBroker, registry: Arc<IntegrationRegistry>) -> Self {
        let dispatcher = ToolDispatcher::new(Arc::clone(&registry), broker.resolver().clone());
        Self {
            broker,
            registry,
            dispatcher,
        }
    }
}
