use std::sync::Arc;

use am_domain::config::Config;
use am_engine::Engine;

use crate::auth::Sessions;

/// Shared application state passed to all API and WS handlers.
///
/// The engine carries the storage, quota, push-bus and scheduler seams;
/// handlers reach them through its accessors.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub engine: Arc<Engine>,
    pub sessions: Arc<Sessions>,
}
