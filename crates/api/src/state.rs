//! Shared application state for the Axum API server.

use std::sync::Arc;

use courier_common::config::AppConfig;
use courier_engine::MessageQueue;

/// Application state shared across all route handlers via Axum `State`.
#[derive(Clone)]
pub struct AppState {
    pub queue: Arc<MessageQueue>,
    pub config: AppConfig,
}

impl AppState {
    pub fn new(queue: Arc<MessageQueue>, config: AppConfig) -> Self {
        Self { queue, config }
    }
}
