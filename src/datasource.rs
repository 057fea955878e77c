//! Persistence behind the download pipeline.
//!
//! The pipeline only talks to the traits in [`repository`]. [`repository::PgStore`]
//! backs them with PostgreSQL, [`memory::MemoryStore`] keeps everything in
//! process memory.

use std::sync::Arc;

pub mod memory;
pub mod repository;

pub use memory::MemoryStore;
pub use repository::{CatalogRepository, DownloadItemRepository, PgStore, RuleRepository};

/// The repository handles the service is wired with.
#[derive(Clone)]
pub struct Repositories {
    pub items: Arc<dyn DownloadItemRepository>,
    pub catalog: Arc<dyn CatalogRepository>,
    pub rules: Arc<dyn RuleRepository>,
}

impl Repositories {
    /// Uses one store for every repository.
    pub fn from_store<S>(store: S) -> Self
    where
        S: DownloadItemRepository + CatalogRepository + RuleRepository + Clone + 'static,
    {
        Self {
            items: Arc::new(store.clone()),
            catalog: Arc::new(store.clone()),
            rules: Arc::new(store),
        }
    }
}
