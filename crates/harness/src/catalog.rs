use std::sync::Arc;

use storefront_core::{Category, Product, RecordId};
use storefront_engine::{SyncConfig, SyncController};
use storefront_storage::{Gateway, SqliteCatalog, StorageError};

/// Product and category controllers over one in-memory SQLite catalog, wired
/// the way the admin app wires them: adding a product refreshes categories,
/// whose product counts just changed.
pub struct TestCatalog {
    pub db: Arc<SqliteCatalog>,
    pub products: Arc<SyncController<Product>>,
    pub categories: Arc<SyncController<Category>>,
}

impl TestCatalog {
    pub fn new() -> Result<Self, StorageError> {
        Self::with_config(SyncConfig::default())
    }

    pub fn with_config(config: SyncConfig) -> Result<Self, StorageError> {
        let db = Arc::new(SqliteCatalog::open_in_memory()?);
        let product_gateway: Arc<dyn Gateway<Product>> = db.clone();
        let category_gateway: Arc<dyn Gateway<Category>> = db.clone();
        let products = Arc::new(SyncController::new(product_gateway, config.clone()));
        let categories = Arc::new(SyncController::new(category_gateway, config));
        products.link_dependent(categories.clone());
        Ok(Self {
            db,
            products,
            categories,
        })
    }

    /// Insert a category straight into the database.
    pub async fn seed_category(&self, name: &str) -> Result<RecordId, StorageError> {
        Gateway::<Category>::create(self.db.as_ref(), &Category::new(name)).await
    }

    /// Insert a product straight into the database.
    pub async fn seed_product(&self, product: &Product) -> Result<RecordId, StorageError> {
        Gateway::<Product>::create(self.db.as_ref(), product).await
    }
}
