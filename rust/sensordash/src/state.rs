use crate::{config::AppConfig, record::Registry, store::Persistable};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub registry: Arc<Registry>,
    pub store: Arc<dyn Persistable>,
}

impl AppState {
    pub fn new(config: Arc<AppConfig>, registry: Arc<Registry>, store: Arc<dyn Persistable>) -> Self {
        Self {
            config,
            registry,
            store,
        }
    }
}
