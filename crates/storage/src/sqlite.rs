use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use rusqlite::types::Value;
use rusqlite::{Connection, Transaction, params, params_from_iter};
use tracing::debug;

use storefront_core::{
    Category, CategoryRef, CoreError, Entity, ListParams, Product, ProductImages, RecordId,
    SortOrder,
    image::{ImageRef, images_from_json, images_to_json},
};

use crate::error::StorageError;
use crate::traits::{Gateway, ImageUpdate};

const PRODUCT_SELECT: &str = "
SELECT p.id, p.title, p.product_slug, p.description, p.price_cents, p.discounted_price_cents,
       p.stock, p.avg_rating, p.reviews_count, p.images, c.id, c.name
FROM products p
LEFT JOIN (
    SELECT product_id, MIN(category_id) AS category_id
    FROM product_categories
    GROUP BY product_id
) pc ON pc.product_id = p.id
LEFT JOIN categories c ON c.id = pc.category_id";

const CATEGORY_SELECT: &str = "
SELECT c.id, c.name, c.slug, c.img, COUNT(pc.product_id)
FROM categories c
LEFT JOIN product_categories pc ON pc.category_id = c.id";

fn to_cents(value: f64) -> i64 {
    (value * 100.0).round() as i64
}

fn from_cents(cents: i64) -> f64 {
    cents as f64 / 100.0
}

/// Map constraint failures to a typed error; everything else stays a sqlite error.
fn map_write_error(e: rusqlite::Error) -> StorageError {
    match e {
        rusqlite::Error::SqliteFailure(err, msg)
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            StorageError::ConstraintViolation(msg.unwrap_or_else(|| err.to_string()))
        }
        other => StorageError::Sqlite(other),
    }
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn id_values(ids: &[RecordId]) -> Vec<Value> {
    ids.iter().map(|id| Value::Integer(id.get())).collect()
}

fn validate_product(product: &Product) -> Result<(), CoreError> {
    if product.title.trim().is_empty() {
        return Err(CoreError::Validation("product title must not be empty".into()));
    }
    for (label, value) in [
        ("price", product.price),
        ("discounted price", product.discounted_price),
    ] {
        if !value.is_finite() || value < 0.0 {
            return Err(CoreError::Validation(format!(
                "{label} must be a non-negative number, got {value}"
            )));
        }
    }
    Ok(())
}

fn validate_category(category: &Category) -> Result<(), CoreError> {
    if category.name.trim().is_empty() {
        return Err(CoreError::Validation("category name must not be empty".into()));
    }
    Ok(())
}

struct ProductRow {
    id: i64,
    title: String,
    slug: String,
    description: Option<String>,
    price_cents: i64,
    discounted_cents: i64,
    stock: i64,
    avg_rating: f64,
    reviews_count: i64,
    images: String,
    category_id: Option<i64>,
    category_name: Option<String>,
}

fn read_product_row(row: &rusqlite::Row) -> rusqlite::Result<ProductRow> {
    Ok(ProductRow {
        id: row.get(0)?,
        title: row.get(1)?,
        slug: row.get(2)?,
        description: row.get(3)?,
        price_cents: row.get(4)?,
        discounted_cents: row.get(5)?,
        stock: row.get(6)?,
        avg_rating: row.get(7)?,
        reviews_count: row.get(8)?,
        images: row.get(9)?,
        category_id: row.get(10)?,
        category_name: row.get(11)?,
    })
}

impl ProductRow {
    fn into_entity(self) -> Result<Entity<Product>, StorageError> {
        let category = match (self.category_id, self.category_name) {
            (Some(id), Some(name)) => Some(CategoryRef {
                id: RecordId::new(id)?,
                name,
            }),
            _ => None,
        };
        let product = Product {
            title: self.title,
            slug: self.slug,
            description: self.description.unwrap_or_default(),
            price: from_cents(self.price_cents),
            discounted_price: from_cents(self.discounted_cents),
            stock: self.stock,
            avg_rating: self.avg_rating,
            reviews_count: self.reviews_count,
            category,
            images: ProductImages::from_array(images_from_json(&self.images)?),
        };
        Ok(Entity::confirmed(RecordId::new(self.id)?, product))
    }
}

struct CategoryRow {
    id: i64,
    name: String,
    slug: String,
    img: String,
    product_count: i64,
}

fn read_category_row(row: &rusqlite::Row) -> rusqlite::Result<CategoryRow> {
    Ok(CategoryRow {
        id: row.get(0)?,
        name: row.get(1)?,
        slug: row.get(2)?,
        img: row.get(3)?,
        product_count: row.get(4)?,
    })
}

impl CategoryRow {
    fn into_entity(self) -> Result<Entity<Category>, StorageError> {
        let category = Category {
            name: self.name,
            slug: self.slug,
            image: images_from_json(&self.img)?.into_iter().next(),
            product_count: u32::try_from(self.product_count).unwrap_or(u32::MAX),
        };
        Ok(Entity::confirmed(RecordId::new(self.id)?, category))
    }
}

/// Rewrite one JSON image column for several rows in a single statement:
/// `UPDATE t SET col = CASE id WHEN ? THEN ? ... END WHERE id IN (...)`.
/// Later entries for the same id win.
fn update_image_column(
    tx: &Transaction,
    table: &str,
    column: &str,
    updates: &[ImageUpdate],
) -> Result<(), StorageError> {
    let mut latest: Vec<(RecordId, String)> = Vec::with_capacity(updates.len());
    for update in updates {
        let json = images_to_json(&update.images)?;
        match latest.iter_mut().find(|(id, _)| *id == update.id) {
            Some(entry) => entry.1 = json,
            None => latest.push((update.id, json)),
        }
    }
    if latest.is_empty() {
        return Ok(());
    }

    let mut sql = format!("UPDATE {table} SET {column} = CASE id");
    let mut values: Vec<Value> = Vec::with_capacity(latest.len() * 3);
    for (id, json) in &latest {
        sql.push_str(" WHEN ? THEN ?");
        values.push(Value::Integer(id.get()));
        values.push(Value::Text(json.clone()));
    }
    sql.push_str(&format!(
        " ELSE {column} END WHERE id IN ({})",
        placeholders(latest.len())
    ));
    values.extend(latest.iter().map(|(id, _)| Value::Integer(id.get())));

    let changed = tx
        .execute(&sql, params_from_iter(values))
        .map_err(map_write_error)?;
    if changed != latest.len() {
        return Err(StorageError::NotFound(format!(
            "{} of {} {table} rows missing",
            latest.len() - changed,
            latest.len()
        )));
    }
    Ok(())
}

/// SQLite-backed catalog. One instance serves as both the product and the
/// category gateway.
pub struct SqliteCatalog {
    conn: Mutex<Connection>,
}

impl SqliteCatalog {
    pub fn open(path: &str) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        crate::schema::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        crate::schema::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn product(&self, id: RecordId) -> Result<Option<Entity<Product>>, StorageError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!("{PRODUCT_SELECT} WHERE p.id = ?1"))?;
        let mut rows = stmt.query_map(params![id.get()], read_product_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?.into_entity()?)),
            None => Ok(None),
        }
    }

    pub fn category(&self, id: RecordId) -> Result<Option<Entity<Category>>, StorageError> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare(&format!("{CATEGORY_SELECT} WHERE c.id = ?1 GROUP BY c.id"))?;
        let mut rows = stmt.query_map(params![id.get()], read_category_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?.into_entity()?)),
            None => Ok(None),
        }
    }

    /// Category ids linked to a product through the join table.
    pub fn product_category_ids(&self, product_id: RecordId) -> Result<Vec<RecordId>, StorageError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT category_id FROM product_categories WHERE product_id = ?1 ORDER BY category_id",
        )?;
        let raw = stmt
            .query_map(params![product_id.get()], |row| row.get::<_, i64>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(raw
            .into_iter()
            .map(RecordId::new)
            .collect::<Result<Vec<_>, _>>()?)
    }

    pub fn join_row_count(&self) -> Result<u64, StorageError> {
        let conn = self.conn();
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM product_categories", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    // ========================================================================
    // Products
    // ========================================================================

    fn list_products(&self, params: &ListParams) -> Result<Vec<Entity<Product>>, StorageError> {
        params.validate()?;
        let mut sql = String::from(PRODUCT_SELECT);
        let mut values: Vec<Value> = Vec::new();
        if !params.category_ids.is_empty() {
            sql.push_str(&format!(
                " WHERE p.id IN (SELECT product_id FROM product_categories WHERE category_id IN ({}))",
                placeholders(params.category_ids.len())
            ));
            values.extend(params.category_ids.iter().map(|id| Value::Integer(id.get())));
        }
        sql.push_str(match params.sort {
            SortOrder::Newest => " ORDER BY p.id DESC",
            SortOrder::Oldest => " ORDER BY p.id ASC",
            SortOrder::PriceAsc => " ORDER BY p.discounted_price_cents ASC, p.id ASC",
            SortOrder::PriceDesc => " ORDER BY p.discounted_price_cents DESC, p.id ASC",
        });
        sql.push_str(" LIMIT ? OFFSET ?");
        values.push(Value::Integer(params.limit));
        values.push(Value::Integer(params.offset));

        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(values), read_product_row)?
            .collect::<Result<Vec<_>, _>>()?;
        let products = rows
            .into_iter()
            .map(ProductRow::into_entity)
            .collect::<Result<Vec<_>, _>>()?;
        debug!(count = products.len(), sort = params.sort.as_str(), "listed products");
        Ok(products)
    }

    fn insert_product(&self, product: &Product) -> Result<RecordId, StorageError> {
        validate_product(product)?;
        let images = images_to_json(&product.images.to_array())?;
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO products (product_slug, title, price_cents, discounted_price_cents, stock, avg_rating, reviews_count, description, images)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                product.effective_slug(),
                product.title,
                to_cents(product.price),
                to_cents(product.discounted_price),
                product.stock,
                product.avg_rating,
                product.reviews_count,
                product.description,
                images,
            ],
        )
        .map_err(map_write_error)?;
        let id = RecordId::new(tx.last_insert_rowid())?;
        // Parent row first so the join row's foreign key resolves.
        if let Some(category) = &product.category {
            tx.execute(
                "INSERT INTO product_categories (product_id, category_id) VALUES (?1, ?2)",
                params![id.get(), category.id.get()],
            )
            .map_err(map_write_error)?;
        }
        tx.commit()?;
        debug!(%id, title = %product.title, "inserted product");
        Ok(id)
    }

    fn update_product(&self, id: RecordId, product: &Product) -> Result<(), StorageError> {
        validate_product(product)?;
        let images = images_to_json(&product.images.to_array())?;
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let changed = tx
            .execute(
                "UPDATE products SET product_slug = ?1, title = ?2, price_cents = ?3, discounted_price_cents = ?4,
                 stock = ?5, avg_rating = ?6, reviews_count = ?7, description = ?8, images = ?9,
                 updated_at = unixepoch()
                 WHERE id = ?10",
                params![
                    product.effective_slug(),
                    product.title,
                    to_cents(product.price),
                    to_cents(product.discounted_price),
                    product.stock,
                    product.avg_rating,
                    product.reviews_count,
                    product.description,
                    images,
                    id.get(),
                ],
            )
            .map_err(map_write_error)?;
        if changed == 0 {
            return Err(StorageError::NotFound(format!("product {id}")));
        }
        tx.execute(
            "DELETE FROM product_categories WHERE product_id = ?1",
            params![id.get()],
        )?;
        if let Some(category) = &product.category {
            tx.execute(
                "INSERT INTO product_categories (product_id, category_id) VALUES (?1, ?2)",
                params![id.get(), category.id.get()],
            )
            .map_err(map_write_error)?;
        }
        tx.commit()?;
        debug!(%id, "updated product");
        Ok(())
    }

    fn delete_products(&self, ids: &[RecordId]) -> Result<(), StorageError> {
        if ids.is_empty() {
            return Ok(());
        }
        let list = placeholders(ids.len());
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        // Children before parents.
        tx.execute(
            &format!("DELETE FROM product_categories WHERE product_id IN ({list})"),
            params_from_iter(id_values(ids)),
        )?;
        let deleted = tx.execute(
            &format!("DELETE FROM products WHERE id IN ({list})"),
            params_from_iter(id_values(ids)),
        )?;
        tx.commit()?;
        debug!(requested = ids.len(), deleted, "deleted products");
        Ok(())
    }

    fn update_product_images(&self, updates: &[ImageUpdate]) -> Result<(), StorageError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        update_image_column(&tx, "products", "images", updates)?;
        tx.commit()?;
        debug!(count = updates.len(), "updated product images");
        Ok(())
    }

    // ========================================================================
    // Categories
    // ========================================================================

    fn list_categories(&self, params: &ListParams) -> Result<Vec<Entity<Category>>, StorageError> {
        params.validate()?;
        if !params.category_ids.is_empty() {
            return Err(CoreError::Validation("categories cannot be filtered by category".into()).into());
        }
        if params.sort.is_price() {
            return Err(CoreError::Validation(format!(
                "categories cannot be sorted by {}",
                params.sort.as_str()
            ))
            .into());
        }
        let order = match params.sort {
            SortOrder::Oldest => "ASC",
            _ => "DESC",
        };
        let sql = format!("{CATEGORY_SELECT} GROUP BY c.id ORDER BY c.id {order} LIMIT ?1 OFFSET ?2");
        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![params.limit, params.offset], read_category_row)?
            .collect::<Result<Vec<_>, _>>()?;
        let categories = rows
            .into_iter()
            .map(CategoryRow::into_entity)
            .collect::<Result<Vec<_>, _>>()?;
        debug!(count = categories.len(), "listed categories");
        Ok(categories)
    }

    fn insert_category(&self, category: &Category) -> Result<RecordId, StorageError> {
        validate_category(category)?;
        let img = images_to_json(&category.image.iter().cloned().collect::<Vec<ImageRef>>())?;
        let conn = self.conn();
        conn.execute(
            "INSERT INTO categories (name, slug, img) VALUES (?1, ?2, ?3)",
            params![category.name, category.effective_slug(), img],
        )
        .map_err(map_write_error)?;
        let id = RecordId::new(conn.last_insert_rowid())?;
        debug!(%id, name = %category.name, "inserted category");
        Ok(id)
    }

    fn update_category(&self, id: RecordId, category: &Category) -> Result<(), StorageError> {
        validate_category(category)?;
        let img = images_to_json(&category.image.iter().cloned().collect::<Vec<ImageRef>>())?;
        let conn = self.conn();
        let changed = conn
            .execute(
                "UPDATE categories SET name = ?1, slug = ?2, img = ?3 WHERE id = ?4",
                params![category.name, category.effective_slug(), img, id.get()],
            )
            .map_err(map_write_error)?;
        if changed == 0 {
            return Err(StorageError::NotFound(format!("category {id}")));
        }
        debug!(%id, "updated category");
        Ok(())
    }

    fn delete_categories(&self, ids: &[RecordId]) -> Result<(), StorageError> {
        if ids.is_empty() {
            return Ok(());
        }
        let list = placeholders(ids.len());
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute(
            &format!("DELETE FROM product_categories WHERE category_id IN ({list})"),
            params_from_iter(id_values(ids)),
        )?;
        let deleted = tx.execute(
            &format!("DELETE FROM categories WHERE id IN ({list})"),
            params_from_iter(id_values(ids)),
        )?;
        tx.commit()?;
        debug!(requested = ids.len(), deleted, "deleted categories");
        Ok(())
    }

    fn update_category_images(&self, updates: &[ImageUpdate]) -> Result<(), StorageError> {
        let trimmed: Vec<ImageUpdate> = updates
            .iter()
            .map(|u| ImageUpdate::new(u.id, u.images.iter().take(1).cloned().collect()))
            .collect();
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        update_image_column(&tx, "categories", "img", &trimmed)?;
        tx.commit()?;
        debug!(count = updates.len(), "updated category images");
        Ok(())
    }
}

#[async_trait]
impl Gateway<Product> for SqliteCatalog {
    async fn fetch_all(&self, params: &ListParams) -> Result<Vec<Entity<Product>>, StorageError> {
        self.list_products(params)
    }

    async fn create(&self, body: &Product) -> Result<RecordId, StorageError> {
        self.insert_product(body)
    }

    async fn update(&self, id: RecordId, body: &Product) -> Result<(), StorageError> {
        self.update_product(id, body)
    }

    async fn delete_many(&self, ids: &[RecordId]) -> Result<(), StorageError> {
        self.delete_products(ids)
    }

    async fn update_images(&self, updates: &[ImageUpdate]) -> Result<(), StorageError> {
        self.update_product_images(updates)
    }
}

#[async_trait]
impl Gateway<Category> for SqliteCatalog {
    async fn fetch_all(&self, params: &ListParams) -> Result<Vec<Entity<Category>>, StorageError> {
        self.list_categories(params)
    }

    async fn create(&self, body: &Category) -> Result<RecordId, StorageError> {
        self.insert_category(body)
    }

    async fn update(&self, id: RecordId, body: &Category) -> Result<(), StorageError> {
        self.update_category(id, body)
    }

    async fn delete_many(&self, ids: &[RecordId]) -> Result<(), StorageError> {
        self.delete_categories(ids)
    }

    async fn update_images(&self, updates: &[ImageUpdate]) -> Result<(), StorageError> {
        self.update_category_images(updates)
    }
}
