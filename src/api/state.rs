//! API shared state

use std::sync::Arc;

use crate::query::StatusService;
use crate::storage::ProbeStore;

/// Shared state passed to all API handlers
#[derive(Clone)]
pub struct ApiState {
    pub status: Arc<StatusService>,
}

impl ApiState {
    pub fn new(status: Arc<StatusService>) -> Self {
        Self { status }
    }

    pub fn store(&self) -> &Arc<dyn ProbeStore> {
        self.status.store()
    }
}
