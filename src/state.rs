use std::sync::Arc;

use crate::config::Config;
use crate::processor::BatchProcessor;

pub type SharedState = Arc<AppState>;

pub struct AppState {
    pub config: Config,
    pub processor: Arc<BatchProcessor>,
}
