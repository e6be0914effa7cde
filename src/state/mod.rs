use std::sync::Arc;

use crate::db::store::DocumentStore;
use crate::realtime::LiveQueryHub;
use crate::services::{comments::CommentService, voting::PollService};
use crate::utils::config::AppConfig;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub hub: LiveQueryHub,
    pub polls: PollService,
    pub comments: CommentService,
}

impl AppState {
    pub fn new(config: AppConfig, store: Arc<dyn DocumentStore>) -> Self {
        Self {
            hub: LiveQueryHub::new(store.clone(), config.reconnect_retry),
            polls: PollService::new(store.clone(), config.mutation_retry),
            comments: CommentService::new(store, config.mutation_retry),
            config: Arc::new(config),
        }
    }
}
