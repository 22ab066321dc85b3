use std::sync::Arc;

use batchforge_core::dispatcher::JobDispatcher;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable: the dispatcher holds its stores behind `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Job admission, submission and polling.
    pub dispatcher: JobDispatcher,
}
