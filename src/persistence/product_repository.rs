//! Product listings.
//!
//! Every write after insert goes through [`ProductRepository::save`], which
//! only succeeds against the version the caller read.

use super::models::ProductRecord;
use super::{query_failed, DatabaseError};
use crate::domain::entities::{DealStatus, NewProduct, Product, ProductStatus};
use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use tracing::{debug, warn};

/// Listing filter. Unset fields do not restrict.
#[derive(Debug, Clone, Default)]
pub struct ProductQuery {
    pub seller_id: Option<i64>,
    pub exclude_seller_id: Option<i64>,
    pub only_open: bool,
    pub category: Option<String>,
    pub search: Option<String>,
}

pub struct ProductRepository<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> ProductRepository<'c> {
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        Self { conn }
    }

    pub async fn create(
        &mut self,
        product: &NewProduct,
        now: DateTime<Utc>,
    ) -> Result<Product, DatabaseError> {
        let quantity = product.quantity.to_string();
        let record = sqlx::query_as::<_, ProductRecord>(
            r#"
            INSERT INTO products (
                seller_id, title, description, category, amount, amount_unit,
                original_quantity, remaining_quantity, quantity_unit,
                loading_from, loading_to, loading_location, remark, is_active,
                deal_status, status, version, created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, 0, ?16, ?16)
            RETURNING *
            "#,
        )
        .bind(product.seller_id)
        .bind(product.title.trim())
        .bind(&product.description)
        .bind(product.category.trim())
        .bind(product.amount.to_string())
        .bind(product.amount_unit.as_str())
        .bind(&quantity)
        .bind(product.quantity_unit.as_str())
        .bind(product.loading_from)
        .bind(product.loading_to)
        .bind(product.resolved_loading_location())
        .bind(&product.remark)
        .bind(product.is_active)
        .bind(DealStatus::Available.as_str())
        .bind(ProductStatus::Available.as_str())
        .bind(now)
        .fetch_one(&mut *self.conn)
        .await
        .map_err(|e| query_failed("Failed to create product", e))?;

        debug!("Created product {} for seller {}", record.id, record.seller_id);
        Product::try_from(record)
    }

    pub async fn get(&mut self, id: i64) -> Result<Option<Product>, DatabaseError> {
        let record = sqlx::query_as::<_, ProductRecord>("SELECT * FROM products WHERE id = ?1")
            .bind(id)
            .fetch_optional(&mut *self.conn)
            .await
            .map_err(|e| query_failed("Failed to get product", e))?;

        record.map(Product::try_from).transpose()
    }

    /// Newest first.
    pub async fn list(&mut self, query: &ProductQuery) -> Result<Vec<Product>, DatabaseError> {
        let search = query
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| format!("%{}%", s.to_lowercase()));
        let category = query
            .category
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty());

        let records = sqlx::query_as::<_, ProductRecord>(
            r#"
            SELECT * FROM products
            WHERE (?1 IS NULL OR seller_id = ?1)
              AND (?2 IS NULL OR seller_id <> ?2)
              AND (?3 = 0 OR (is_active = 1 AND status = 'available'))
              AND (?4 IS NULL OR lower(category) = lower(?4))
              AND (?5 IS NULL OR lower(title) LIKE ?5 OR lower(COALESCE(description, '')) LIKE ?5)
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(query.seller_id)
        .bind(query.exclude_seller_id)
        .bind(query.only_open)
        .bind(category)
        .bind(search)
        .fetch_all(&mut *self.conn)
        .await
        .map_err(|e| query_failed("Failed to list products", e))?;

        records.into_iter().map(Product::try_from).collect()
    }

    /// Write back every mutable field if nobody else has since.
    ///
    /// On success `product.version` is bumped to the stored value.
    pub async fn save(&mut self, product: &mut Product) -> Result<(), DatabaseError> {
        let now = Utc::now();
        let rows_affected = sqlx::query(
            r#"
            UPDATE products
            SET title = ?1, description = ?2, category = ?3, amount = ?4, amount_unit = ?5,
                original_quantity = ?6, remaining_quantity = ?7, quantity_unit = ?8,
                loading_from = ?9, loading_to = ?10, loading_location = ?11, remark = ?12,
                is_active = ?13, deal_status = ?14, status = ?15,
                version = version + 1, updated_at = ?16
            WHERE id = ?17 AND version = ?18
            "#,
        )
        .bind(&product.title)
        .bind(&product.description)
        .bind(&product.category)
        .bind(product.amount.to_string())
        .bind(product.amount_unit.as_str())
        .bind(product.original_quantity.to_string())
        .bind(product.remaining_quantity.to_string())
        .bind(product.quantity_unit.as_str())
        .bind(product.loading_from)
        .bind(product.loading_to)
        .bind(&product.loading_location)
        .bind(&product.remark)
        .bind(product.is_active)
        .bind(product.deal_status.as_str())
        .bind(product.status.as_str())
        .bind(now)
        .bind(product.id)
        .bind(product.version)
        .execute(&mut *self.conn)
        .await
        .map_err(|e| query_failed("Failed to update product", e))?
        .rows_affected();

        if rows_affected == 0 {
            warn!(
                "Product {} changed since version {} was read",
                product.id, product.version
            );
            return Err(DatabaseError::StaleWrite(format!(
                "Product {} was modified concurrently",
                product.id
            )));
        }

        product.version += 1;
        product.updated_at = now;
        debug!("Saved product {} at version {}", product.id, product.version);
        Ok(())
    }

    pub async fn delete(&mut self, id: i64) -> Result<bool, DatabaseError> {
        let rows_affected = sqlx::query("DELETE FROM products WHERE id = ?1")
            .bind(id)
            .execute(&mut *self.conn)
            .await
            .map_err(|e| query_failed("Failed to delete product", e))?
            .rows_affected();

        if rows_affected > 0 {
            debug!("Deleted product {}", id);
        }
        Ok(rows_affected > 0)
    }

    pub async fn has_contracts(&mut self, id: i64) -> Result<bool, DatabaseError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM contracts WHERE product_id = ?1")
                .bind(id)
                .fetch_one(&mut *self.conn)
                .await
                .map_err(|e| query_failed("Failed to count product contracts", e))?;
        Ok(count > 0)
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::domain::entities::Role;
    use crate::domain::value_objects::Quantity;
    use crate::persistence::test_pool;

    #[tokio::test]
    async fn test_create_and_get_product() {
        let pool = test_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let seller = seed_user(&mut conn, "seller", Role::Seller).await;

        let product = seed_product(&mut conn, seller, "100").await;
        assert_eq!(product.remaining_quantity, product.original_quantity);
        assert_eq!(product.deal_status, DealStatus::Available);
        assert_eq!(product.loading_location, "2025-03-01 -> 2025-03-10");
        assert_eq!(product.version, 0);

        let fetched = ProductRepository::new(&mut conn).get(product.id).await.unwrap().unwrap();
        assert_eq!(fetched.title, "Chana");
        assert_eq!(fetched.amount.to_string(), "100.00");
    }

    #[tokio::test]
    async fn test_stale_save_is_refused() {
        let pool = test_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let seller = seed_user(&mut conn, "seller", Role::Seller).await;
        let product = seed_product(&mut conn, seller, "100").await;

        let mut repo = ProductRepository::new(&mut conn);
        let mut first = product.clone();
        let mut second = product.clone();

        first.apply_sale(&Quantity::parse("60").unwrap());
        repo.save(&mut first).await.unwrap();
        assert_eq!(first.version, 1);

        second.apply_sale(&Quantity::parse("60").unwrap());
        let err = repo.save(&mut second).await.unwrap_err();
        assert!(matches!(err, DatabaseError::StaleWrite(_)));

        let stored = repo.get(product.id).await.unwrap().unwrap();
        assert_eq!(stored.remaining_quantity.to_string(), "40.00");
        assert_eq!(stored.version, 1);
    }

    #[tokio::test]
    async fn test_list_filters() {
        let pool = test_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let a = seed_user(&mut conn, "a", Role::Seller).await;
        let b = seed_user(&mut conn, "b", Role::Seller).await;
        seed_product(&mut conn, a, "10").await;
        let mut hidden = seed_product(&mut conn, b, "10").await;

        let mut repo = ProductRepository::new(&mut conn);
        hidden.is_active = false;
        repo.save(&mut hidden).await.unwrap();

        let all = repo.list(&ProductQuery::default()).await.unwrap();
        assert_eq!(all.len(), 2);

        let open = repo
            .list(&ProductQuery {
                only_open: true,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].seller_id, a);

        let others = repo
            .list(&ProductQuery {
                exclude_seller_id: Some(a),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(others.len(), 1);

        let searched = repo
            .list(&ProductQuery {
                search: Some("MACHINE".into()),
                category: Some("pulses".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(searched.len(), 2);
    }

    #[tokio::test]
    async fn test_delete_product() {
        let pool = test_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let seller = seed_user(&mut conn, "seller", Role::Seller).await;
        let product = seed_product(&mut conn, seller, "10").await;

        let mut repo = ProductRepository::new(&mut conn);
        assert!(!repo.has_contracts(product.id).await.unwrap());
        assert!(repo.delete(product.id).await.unwrap());
        assert!(!repo.delete(product.id).await.unwrap());
        assert!(repo.get(product.id).await.unwrap().is_none());
    }
}
