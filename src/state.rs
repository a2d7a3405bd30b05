use std::sync::Arc;

use crate::console::DispatchConsole;
use crate::observability::metrics::Metrics;

pub struct AppState {
    pub console: Arc<DispatchConsole>,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(console: Arc<DispatchConsole>, metrics: Metrics) -> Self {
        Self { console, metrics }
    }
}
