use std::sync::Arc;

use crate::db::Store;
use crate::services::Pipeline;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Pipeline,
}

impl AppState {
    pub fn new(pipeline: Pipeline) -> Self {
        Self { pipeline }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.pipeline.store
    }
}
