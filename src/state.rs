//! Application state management
//!
//! Contains shared state accessible across all handlers.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::config::Settings;
use crate::db::TypeDbClient;
use crate::realtime::{ServerEvent, EVENT_BUS_CAPACITY};

/// Application state shared across all handlers
pub struct AppState {
    /// Validated settings, immutable for the life of the process
    pub settings: Arc<Settings>,

    /// TypeDB client; connects lazily on first use
    pub db: TypeDbClient,

    /// Broadcast bus feeding every connected WebSocket
    pub events: broadcast::Sender<ServerEvent>,
}

impl AppState {
    /// Create new application state from loaded settings
    pub fn new(settings: Arc<Settings>) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        Self {
            db: TypeDbClient::new(Arc::clone(&settings)),
            settings,
            events,
        }
    }
}

/// Type alias for shared state
pub type SharedState = Arc<AppState>;
