//! Buyer offers and their negotiation log.

use super::models::InterestRecord;
use super::{query_failed, DatabaseError};
use crate::domain::entities::{Interest, InterestStatus, NewInterest};
use crate::domain::value_objects::Money;
use sqlx::SqliteConnection;
use tracing::{debug, warn};

/// Offer listing filter. Unset fields do not restrict.
#[derive(Debug, Clone, Default)]
pub struct InterestQuery {
    pub buyer_id: Option<i64>,
    pub seller_id: Option<i64>,
    pub product_id: Option<i64>,
    pub status: Option<InterestStatus>,
    pub active_only: bool,
}

/// Bidding activity on one listing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BidSummary {
    pub highest_bid: Option<Money>,
    pub interested_count: i64,
}

pub struct InterestRepository<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> InterestRepository<'c> {
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        Self { conn }
    }

    pub async fn create(&mut self, interest: &NewInterest) -> Result<Interest, DatabaseError> {
        let record = sqlx::query_as::<_, InterestRecord>(
            r#"
            INSERT INTO interests (
                transaction_id, product_id, buyer_id, seller_id,
                snapshot_amount, snapshot_quantity, buyer_offered_amount, buyer_required_quantity,
                loading_from, loading_to, delivery_date, buyer_remark,
                is_active, status, negotiation_history, created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, 1, ?13, '[]', ?14, ?14)
            RETURNING *
            "#,
        )
        .bind(&interest.transaction_id)
        .bind(interest.product_id)
        .bind(interest.buyer_id)
        .bind(interest.seller_id)
        .bind(interest.snapshot_amount.to_string())
        .bind(interest.snapshot_quantity.to_string())
        .bind(interest.buyer_offered_amount.to_string())
        .bind(interest.buyer_required_quantity.to_string())
        .bind(&interest.loading_from)
        .bind(&interest.loading_to)
        .bind(interest.delivery_date)
        .bind(&interest.buyer_remark)
        .bind(InterestStatus::Interested.as_str())
        .bind(interest.created_at)
        .fetch_one(&mut *self.conn)
        .await
        .map_err(|e| query_failed("Failed to create interest", e))?;

        debug!(
            "Created interest {} ({}) on product {}",
            record.id, record.transaction_id, record.product_id
        );
        Interest::try_from(record)
    }

    pub async fn get(&mut self, id: i64) -> Result<Option<Interest>, DatabaseError> {
        let record = sqlx::query_as::<_, InterestRecord>("SELECT * FROM interests WHERE id = ?1")
            .bind(id)
            .fetch_optional(&mut *self.conn)
            .await
            .map_err(|e| query_failed("Failed to get interest", e))?;

        record.map(Interest::try_from).transpose()
    }

    /// Newest first.
    pub async fn list(&mut self, query: &InterestQuery) -> Result<Vec<Interest>, DatabaseError> {
        let records = sqlx::query_as::<_, InterestRecord>(
            r#"
            SELECT * FROM interests
            WHERE (?1 IS NULL OR buyer_id = ?1)
              AND (?2 IS NULL OR seller_id = ?2)
              AND (?3 IS NULL OR product_id = ?3)
              AND (?4 IS NULL OR status = ?4)
              AND (?5 = 0 OR is_active = 1)
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(query.buyer_id)
        .bind(query.seller_id)
        .bind(query.product_id)
        .bind(query.status.map(|s| s.as_str()))
        .bind(query.active_only)
        .fetch_all(&mut *self.conn)
        .await
        .map_err(|e| query_failed("Failed to list interests", e))?;

        records.into_iter().map(Interest::try_from).collect()
    }

    /// Interests on a product that can still move forward, oldest first.
    pub async fn open_for_product(&mut self, product_id: i64) -> Result<Vec<Interest>, DatabaseError> {
        let records = sqlx::query_as::<_, InterestRecord>(
            r#"
            SELECT * FROM interests
            WHERE product_id = ?1 AND is_active = 1
              AND status IN ('interested', 'seller_confirmed')
            ORDER BY id
            "#,
        )
        .bind(product_id)
        .fetch_all(&mut *self.conn)
        .await
        .map_err(|e| query_failed("Failed to list open interests", e))?;

        records.into_iter().map(Interest::try_from).collect()
    }

    pub async fn has_open_seller_confirmed(&mut self, product_id: i64) -> Result<bool, DatabaseError> {
        let (count,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM interests
            WHERE product_id = ?1 AND is_active = 1 AND status = 'seller_confirmed'
            "#,
        )
        .bind(product_id)
        .fetch_one(&mut *self.conn)
        .await
        .map_err(|e| query_failed("Failed to check seller confirmations", e))?;
        Ok(count > 0)
    }

    /// Highest open offer and the number of open offers on a listing.
    pub async fn bid_summary(&mut self, product_id: i64) -> Result<BidSummary, DatabaseError> {
        let amounts: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT buyer_offered_amount FROM interests
            WHERE product_id = ?1 AND is_active = 1
              AND status IN ('interested', 'seller_confirmed')
            "#,
        )
        .bind(product_id)
        .fetch_all(&mut *self.conn)
        .await
        .map_err(|e| query_failed("Failed to summarise bids", e))?;

        let mut summary = BidSummary::default();
        for (raw,) in amounts {
            summary.interested_count += 1;
            match raw.parse::<Money>() {
                Ok(amount) => {
                    if summary.highest_bid.as_ref().map_or(true, |best| amount > *best) {
                        summary.highest_bid = Some(amount);
                    }
                }
                Err(e) => warn!("Skipping unreadable bid '{}' on product {}: {}", raw, product_id, e),
            }
        }
        Ok(summary)
    }

    /// Persist a status change made from `expected`.
    ///
    /// Fails with [`DatabaseError::StaleWrite`] when the stored status is no
    /// longer `expected`.
    pub async fn save_transition(
        &mut self,
        interest: &Interest,
        expected: InterestStatus,
    ) -> Result<(), DatabaseError> {
        let history = serde_json::to_string(&interest.negotiation_history).map_err(|e| {
            DatabaseError::QueryError(format!("Failed to encode negotiation history: {}", e))
        })?;

        let rows_affected = sqlx::query(
            r#"
            UPDATE interests
            SET status = ?1, is_active = ?2, seller_remark = ?3, superadmin_remark = ?4,
                deal_confirmed_at = ?5, negotiation_history = ?6, updated_at = ?7
            WHERE id = ?8 AND status = ?9
            "#,
        )
        .bind(interest.status.as_str())
        .bind(interest.is_active)
        .bind(&interest.seller_remark)
        .bind(&interest.superadmin_remark)
        .bind(interest.deal_confirmed_at)
        .bind(history)
        .bind(interest.updated_at)
        .bind(interest.id)
        .bind(expected.as_str())
        .execute(&mut *self.conn)
        .await
        .map_err(|e| query_failed("Failed to update interest", e))?
        .rows_affected();

        if rows_affected == 0 {
            warn!("Interest {} is no longer {}", interest.id, expected);
            return Err(DatabaseError::StaleWrite(format!(
                "Interest {} was modified concurrently",
                interest.id
            )));
        }

        debug!("Interest {} moved {} -> {}", interest.id, expected, interest.status);
        Ok(())
    }

    /// Update the admin remark without touching the status.
    pub async fn save_admin_remark(&mut self, interest: &Interest) -> Result<(), DatabaseError> {
        sqlx::query("UPDATE interests SET superadmin_remark = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(&interest.superadmin_remark)
            .bind(interest.updated_at)
            .bind(interest.id)
            .execute(&mut *self.conn)
            .await
            .map_err(|e| query_failed("Failed to update interest remark", e))?;
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::seed_interest;
    use super::*;
    use crate::domain::entities::Role;
    use crate::persistence::product_repository::test_support::{seed_product, seed_user};
    use crate::persistence::test_pool;
    use chrono::Utc;

    #[tokio::test]
    async fn test_create_and_reload_interest() {
        let pool = test_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let seller = seed_user(&mut conn, "seller", Role::Seller).await;
        let buyer = seed_user(&mut conn, "buyer", Role::Buyer).await;
        let product = seed_product(&mut conn, seller, "100").await;

        let interest = seed_interest(&mut conn, &product, buyer, "95", "30").await;
        assert_eq!(interest.status, InterestStatus::Interested);
        assert_eq!(interest.seller_id, seller);
        assert!(interest.negotiation_history.is_empty());

        let fetched = InterestRepository::new(&mut conn).get(interest.id).await.unwrap().unwrap();
        assert_eq!(fetched.buyer_required_quantity.to_string(), "30.00");
        assert_eq!(fetched.snapshot_quantity.to_string(), "100.00");
    }

    #[tokio::test]
    async fn test_transition_is_persisted_once() {
        let pool = test_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let seller = seed_user(&mut conn, "seller", Role::Seller).await;
        let buyer = seed_user(&mut conn, "buyer", Role::Buyer).await;
        let product = seed_product(&mut conn, seller, "100").await;
        let mut interest = seed_interest(&mut conn, &product, buyer, "95", "30").await;

        let mut repo = InterestRepository::new(&mut conn);
        let mut racer = interest.clone();

        interest.accept(Some("done".into()), Utc::now()).unwrap();
        repo.save_transition(&interest, InterestStatus::Interested).await.unwrap();

        racer.cancel(Utc::now()).unwrap();
        let err = repo.save_transition(&racer, InterestStatus::Interested).await.unwrap_err();
        assert!(matches!(err, DatabaseError::StaleWrite(_)));

        let stored = repo.get(interest.id).await.unwrap().unwrap();
        assert_eq!(stored.status, InterestStatus::SellerConfirmed);
        assert_eq!(stored.seller_remark.as_deref(), Some("done"));
        assert_eq!(stored.negotiation_history.len(), 1);
        assert!(repo.has_open_seller_confirmed(product.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_bid_summary_ignores_closed_offers() {
        let pool = test_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let seller = seed_user(&mut conn, "seller", Role::Seller).await;
        let buyer = seed_user(&mut conn, "buyer", Role::Buyer).await;
        let product = seed_product(&mut conn, seller, "100").await;

        seed_interest(&mut conn, &product, buyer, "95", "10").await;
        seed_interest(&mut conn, &product, buyer, "102.5", "10").await;
        let mut rejected = seed_interest(&mut conn, &product, buyer, "150", "10").await;

        let mut repo = InterestRepository::new(&mut conn);
        rejected.reject(None, Utc::now()).unwrap();
        repo.save_transition(&rejected, InterestStatus::Interested).await.unwrap();

        let summary = repo.bid_summary(product.id).await.unwrap();
        assert_eq!(summary.interested_count, 2);
        assert_eq!(summary.highest_bid.unwrap().to_string(), "102.50");

        assert_eq!(repo.open_for_product(product.id).await.unwrap().len(), 2);
        let rejected_only = repo
            .list(&InterestQuery {
                buyer_id: Some(buyer),
                status: Some(InterestStatus::Rejected),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(rejected_only.len(), 1);
    }
}
