use std::sync::Arc;

use sqlx::{postgres::PgPoolOptions, PgPool};

use crate::config::Config;
use crate::health::HealthRegistry;
use crate::store::postgres::{PgCatalogStore, PgDocumentStore};
use crate::store::{CatalogStore, DocumentStore};

pub struct AppContext {
    pub pool: PgPool,
    pub catalog: Arc<dyn CatalogStore>,
    pub documents: Arc<dyn DocumentStore>,
    pub liveness: HealthRegistry,
}

impl AppContext {
    pub async fn new(config: &Config) -> Result<Self, sqlx::Error> {
        let options = PgPoolOptions::new().max_connections(config.max_pg_connections);
        let pool = options.connect(&config.database_url).await?;

        let catalog = Arc::new(PgCatalogStore::new(pool.clone(), config.store_timeout()));
        let documents = Arc::new(PgDocumentStore::new(pool.clone(), config.store_timeout()));

        Ok(Self {
            pool,
            catalog,
            documents,
            liveness: HealthRegistry::new("liveness"),
        })
    }
}
