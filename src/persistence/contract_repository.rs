//! Confirmed deals.

use super::models::ContractRecord;
use super::{query_failed, DatabaseError};
use crate::domain::entities::{Contract, ContractStatus, NewContract};
use chrono::Utc;
use sqlx::SqliteConnection;
use tracing::debug;

pub const DEFAULT_PAGE_SIZE: i64 = 15;

/// Contract listing filter.
///
/// `party_id` restricts to contracts where the user is buyer or seller.
#[derive(Debug, Clone, Default)]
pub struct ContractQuery {
    pub party_id: Option<i64>,
    pub status: Option<ContractStatus>,
    pub seller_id: Option<i64>,
    pub buyer_id: Option<i64>,
    pub search: Option<String>,
}

/// One page of contracts plus the unpaginated total.
#[derive(Debug, Clone)]
pub struct ContractPage {
    pub contracts: Vec<Contract>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
}

impl ContractPage {
    pub fn total_pages(&self) -> i64 {
        page_count(self.total, self.per_page)
    }
}

fn page_count(total: i64, per_page: i64) -> i64 {
    if total == 0 {
        1
    } else {
        (total + per_page - 1) / per_page
    }
}

pub struct ContractRepository<'c> {
    conn: &'c mut SqliteConnection,
}

const FILTER: &str = r#"
    FROM contracts c
    JOIN products p ON p.id = c.product_id
    WHERE (?1 IS NULL OR c.buyer_id = ?1 OR c.seller_id = ?1)
      AND (?2 IS NULL OR c.status = ?2)
      AND (?3 IS NULL OR c.seller_id = ?3)
      AND (?4 IS NULL OR c.buyer_id = ?4)
      AND (?5 IS NULL OR lower(c.contract_id) LIKE ?5 OR lower(p.title) LIKE ?5)
"#;

impl<'c> ContractRepository<'c> {
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        Self { conn }
    }

    pub async fn create(&mut self, contract: &NewContract) -> Result<Contract, DatabaseError> {
        let record = sqlx::query_as::<_, ContractRecord>(
            r#"
            INSERT INTO contracts (
                contract_id, interest_id, product_id, buyer_id, seller_id,
                deal_amount, deal_quantity, amount_unit, quantity_unit,
                loading_from, loading_to, buyer_remark, seller_remark, admin_remark,
                status, confirmed_at, created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?16, ?16)
            RETURNING *
            "#,
        )
        .bind(&contract.contract_id)
        .bind(contract.interest_id)
        .bind(contract.product_id)
        .bind(contract.buyer_id)
        .bind(contract.seller_id)
        .bind(contract.deal_amount.to_string())
        .bind(contract.deal_quantity.to_string())
        .bind(contract.amount_unit.as_str())
        .bind(contract.quantity_unit.as_str())
        .bind(&contract.loading_from)
        .bind(&contract.loading_to)
        .bind(&contract.buyer_remark)
        .bind(&contract.seller_remark)
        .bind(&contract.admin_remark)
        .bind(ContractStatus::Active.as_str())
        .bind(contract.confirmed_at)
        .fetch_one(&mut *self.conn)
        .await
        .map_err(|e| query_failed("Failed to create contract", e))?;

        debug!(
            "Created contract {} for interest {}",
            record.contract_id, record.interest_id
        );
        Contract::try_from(record)
    }

    pub async fn get(&mut self, id: i64) -> Result<Option<Contract>, DatabaseError> {
        let record = sqlx::query_as::<_, ContractRecord>("SELECT * FROM contracts WHERE id = ?1")
            .bind(id)
            .fetch_optional(&mut *self.conn)
            .await
            .map_err(|e| query_failed("Failed to get contract", e))?;

        record.map(Contract::try_from).transpose()
    }

    pub async fn find_by_interest(&mut self, interest_id: i64) -> Result<Option<Contract>, DatabaseError> {
        let record =
            sqlx::query_as::<_, ContractRecord>("SELECT * FROM contracts WHERE interest_id = ?1")
                .bind(interest_id)
                .fetch_optional(&mut *self.conn)
                .await
                .map_err(|e| query_failed("Failed to find contract by interest", e))?;

        record.map(Contract::try_from).transpose()
    }

    /// Newest confirmation first. `page` is 1-based and clamped to the
    /// last page.
    pub async fn page(
        &mut self,
        query: &ContractQuery,
        page: i64,
        per_page: i64,
    ) -> Result<ContractPage, DatabaseError> {
        let per_page = per_page.clamp(1, 100);
        let search = search_pattern(query);

        let (total,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) {}", FILTER))
            .bind(query.party_id)
            .bind(query.status.map(|s| s.as_str()))
            .bind(query.seller_id)
            .bind(query.buyer_id)
            .bind(search.as_deref())
            .fetch_one(&mut *self.conn)
            .await
            .map_err(|e| query_failed("Failed to count contracts", e))?;
        let page = page.clamp(1, page_count(total, per_page));

        let records = sqlx::query_as::<_, ContractRecord>(&format!(
            "SELECT c.* {} ORDER BY c.confirmed_at DESC, c.id DESC LIMIT ?6 OFFSET ?7",
            FILTER
        ))
        .bind(query.party_id)
        .bind(query.status.map(|s| s.as_str()))
        .bind(query.seller_id)
        .bind(query.buyer_id)
        .bind(search.as_deref())
        .bind(per_page)
        .bind((page - 1) * per_page)
        .fetch_all(&mut *self.conn)
        .await
        .map_err(|e| query_failed("Failed to list contracts", e))?;

        Ok(ContractPage {
            contracts: records
                .into_iter()
                .map(Contract::try_from)
                .collect::<Result<_, _>>()?,
            total,
            page,
            per_page,
        })
    }

    /// Every matching contract, for export.
    pub async fn all(&mut self, query: &ContractQuery) -> Result<Vec<Contract>, DatabaseError> {
        let search = search_pattern(query);
        let records = sqlx::query_as::<_, ContractRecord>(&format!(
            "SELECT c.* {} ORDER BY c.confirmed_at DESC, c.id DESC",
            FILTER
        ))
        .bind(query.party_id)
        .bind(query.status.map(|s| s.as_str()))
        .bind(query.seller_id)
        .bind(query.buyer_id)
        .bind(search.as_deref())
        .fetch_all(&mut *self.conn)
        .await
        .map_err(|e| query_failed("Failed to export contracts", e))?;

        records.into_iter().map(Contract::try_from).collect()
    }

    pub async fn save(&mut self, contract: &mut Contract) -> Result<(), DatabaseError> {
        let now = Utc::now();
        let rows_affected = sqlx::query(
            "UPDATE contracts SET status = ?1, admin_remark = ?2, updated_at = ?3 WHERE id = ?4",
        )
        .bind(contract.status.as_str())
        .bind(&contract.admin_remark)
        .bind(now)
        .bind(contract.id)
        .execute(&mut *self.conn)
        .await
        .map_err(|e| query_failed("Failed to update contract", e))?
        .rows_affected();

        if rows_affected == 0 {
            return Err(DatabaseError::QueryError(format!(
                "Contract not found: {}",
                contract.id
            )));
        }

        contract.updated_at = now;
        debug!("Updated contract {} ({})", contract.contract_id, contract.status);
        Ok(())
    }
}

fn search_pattern(query: &ContractQuery) -> Option<String> {
    query
        .search
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| format!("%{}%", s.to_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::Role;
    use crate::persistence::interest_repository::test_support::seed_interest;
    use crate::persistence::product_repository::test_support::{seed_product, seed_user};
    use crate::persistence::test_pool;

    #[tokio::test]
    async fn test_contract_per_interest_is_unique() {
        let pool = test_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let seller = seed_user(&mut conn, "seller", Role::Seller).await;
        let buyer = seed_user(&mut conn, "buyer", Role::Buyer).await;
        let product = seed_product(&mut conn, seller, "100").await;
        let interest = seed_interest(&mut conn, &product, buyer, "95", "30").await;

        let mut repo = ContractRepository::new(&mut conn);
        let draft = NewContract::from_confirmation("CNT-20250301-0001".into(), &interest, &product, Utc::now());
        let contract = repo.create(&draft).await.unwrap();
        assert_eq!(contract.status, ContractStatus::Active);
        assert_eq!(contract.deal_quantity.to_string(), "30.00");

        let mut again = draft.clone();
        again.contract_id = "CNT-20250301-0002".into();
        assert!(matches!(repo.create(&again).await.unwrap_err(), DatabaseError::Duplicate(_)));

        let found = repo.find_by_interest(interest.id).await.unwrap().unwrap();
        assert_eq!(found.id, contract.id);
    }

    #[tokio::test]
    async fn test_page_filters_and_counts() {
        let pool = test_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let seller = seed_user(&mut conn, "seller", Role::Seller).await;
        let buyer = seed_user(&mut conn, "buyer", Role::Buyer).await;
        let other = seed_user(&mut conn, "other", Role::Buyer).await;
        let product = seed_product(&mut conn, seller, "1000").await;

        for n in 0..17 {
            let party = if n < 16 { buyer } else { other };
            let interest = seed_interest(&mut conn, &product, party, "95", "1").await;
            let draft = NewContract::from_confirmation(
                format!("CNT-20250301-{:04}", n),
                &interest,
                &product,
                Utc::now(),
            );
            ContractRepository::new(&mut conn).create(&draft).await.unwrap();
        }

        let mut repo = ContractRepository::new(&mut conn);
        let first = repo.page(&ContractQuery::default(), 1, DEFAULT_PAGE_SIZE).await.unwrap();
        assert_eq!(first.total, 17);
        assert_eq!(first.contracts.len(), 15);
        assert_eq!(first.total_pages(), 2);

        let second = repo.page(&ContractQuery::default(), 2, DEFAULT_PAGE_SIZE).await.unwrap();
        assert_eq!(second.contracts.len(), 2);

        let mine = repo
            .page(
                &ContractQuery {
                    party_id: Some(other),
                    ..Default::default()
                },
                1,
                DEFAULT_PAGE_SIZE,
            )
            .await
            .unwrap();
        assert_eq!(mine.total, 1);

        let searched = repo
            .all(&ContractQuery {
                search: Some("cnt-20250301-0016".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(searched.len(), 1);
        assert_eq!(searched[0].buyer_id, other);

        let by_title = repo
            .all(&ContractQuery {
                search: Some("chana".into()),
                status: Some(ContractStatus::Active),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(by_title.len(), 17);
    }

    #[tokio::test]
    async fn test_page_past_the_end_is_clamped() {
        let pool = test_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let seller = seed_user(&mut conn, "seller", Role::Seller).await;
        let buyer = seed_user(&mut conn, "buyer", Role::Buyer).await;
        let product = seed_product(&mut conn, seller, "1000").await;
        let interest = seed_interest(&mut conn, &product, buyer, "95", "30").await;
        let draft = NewContract::from_confirmation("CNT-20250301-0001".into(), &interest, &product, Utc::now());
        ContractRepository::new(&mut conn).create(&draft).await.unwrap();

        let mut repo = ContractRepository::new(&mut conn);
        let last = repo.page(&ContractQuery::default(), i64::MAX, 15).await.unwrap();
        assert_eq!(last.page, 1);
        assert_eq!(last.contracts.len(), 1);

        let empty = repo
            .page(
                &ContractQuery {
                    party_id: Some(seller + 1000),
                    ..Default::default()
                },
                i64::MAX,
                i64::MAX,
            )
            .await
            .unwrap();
        assert_eq!(empty.page, 1);
        assert_eq!(empty.per_page, 100);
        assert!(empty.contracts.is_empty());
    }

    #[tokio::test]
    async fn test_save_contract_status() {
        let pool = test_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let seller = seed_user(&mut conn, "seller", Role::Seller).await;
        let buyer = seed_user(&mut conn, "buyer", Role::Buyer).await;
        let product = seed_product(&mut conn, seller, "100").await;
        let interest = seed_interest(&mut conn, &product, buyer, "95", "30").await;

        let mut repo = ContractRepository::new(&mut conn);
        let draft = NewContract::from_confirmation("CNT-1".into(), &interest, &product, Utc::now());
        let mut contract = repo.create(&draft).await.unwrap();
        contract.update(Some(ContractStatus::Completed), Some("paid".into())).unwrap();
        repo.save(&mut contract).await.unwrap();

        let stored = repo.get(contract.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ContractStatus::Completed);
        assert_eq!(stored.admin_remark.as_deref(), Some("paid"));
    }
}
