use std::sync::Arc;

use mongodb::{options::ClientOptions, Client};
use tracing::info;

use crate::db::{memory::MemoryStore, mongo::MongoStore, store::DocumentStore};
use crate::utils::config::{AppConfig, StoreBackend};
use crate::utils::error::{AppError, AppResult};

pub async fn init_store(config: &AppConfig) -> AppResult<Arc<dyn DocumentStore>> {
    match &config.store {
        StoreBackend::Memory => {
            info!("Using in-memory document store");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreBackend::Mongo { uri, db_name } => {
            let mut client_options = ClientOptions::parse(uri)
                .await
                .map_err(|e| AppError::DatabaseError(format!("Failed to parse MongoDB URI: {}", e)))?;

            client_options.app_name = Some("AcademyLive".to_string());

            let client = Client::with_options(client_options)
                .map_err(|e| AppError::DatabaseError(format!("Failed to initialize MongoDB client: {}", e)))?;

            info!(db = %db_name, "Database connection successful.");

            let db = client.database(db_name);
            Ok(Arc::new(MongoStore::new(client, db)))
        }
    }
}
