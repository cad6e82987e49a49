use crate::payout::{PayoutRecord, PayoutStore};
use crate::{Error, Result};
use sqlx::{Pool, Postgres, Row, Sqlite};
use std::str::FromStr;

/// Database connection pool enum supporting both SQLite and PostgreSQL
#[derive(Debug, Clone)]
pub enum DatabasePool {
    Sqlite(Pool<Sqlite>),
    Postgres(Pool<Postgres>),
}

/// Payout table statistics
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PayoutStats {
    pub total_payouts: u64,
    pub unprocessed_payouts: u64,
    pub unprocessed_amount: f64,
}

impl DatabasePool {
    /// Create a new database pool from URL
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        if database_url.starts_with("sqlite:") {
            let options = sqlx::sqlite::SqliteConnectOptions::from_str(database_url)?
                .create_if_missing(true);
            let pool = sqlx::sqlite::SqlitePoolOptions::new()
                .max_connections(max_connections)
                .connect_with(options)
                .await?;

            Ok(DatabasePool::Sqlite(pool))
        } else if database_url.starts_with("postgres:") || database_url.starts_with("postgresql:") {
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(max_connections)
                .connect(database_url)
                .await?;
            Ok(DatabasePool::Postgres(pool))
        } else {
            Err(Error::Config("Unsupported database URL scheme".to_string()))
        }
    }

    /// Run database migrations
    pub async fn migrate(&self) -> Result<()> {
        match self {
            DatabasePool::Sqlite(pool) => {
                sqlx::migrate!("./migrations/sqlite").run(pool).await?;
            }
            DatabasePool::Postgres(pool) => {
                sqlx::migrate!("./migrations/postgres").run(pool).await?;
            }
        }
        Ok(())
    }

    /// Check database connectivity
    pub async fn health_check(&self) -> Result<()> {
        match self {
            DatabasePool::Sqlite(pool) => {
                sqlx::query("SELECT 1").execute(pool).await?;
            }
            DatabasePool::Postgres(pool) => {
                sqlx::query("SELECT 1").execute(pool).await?;
            }
        }
        Ok(())
    }

    /// Summary of the payout queue
    pub async fn get_stats(&self) -> Result<PayoutStats> {
        const QUERY: &str = "SELECT COUNT(*) AS total, \
             COALESCE(SUM(CASE WHEN processed THEN 0 ELSE 1 END), 0) AS unprocessed, \
             COALESCE(SUM(CASE WHEN processed THEN 0.0 ELSE amount END), 0.0) AS unprocessed_amount \
             FROM payouts";

        let (total, unprocessed, unprocessed_amount) = match self {
            DatabasePool::Sqlite(pool) => {
                let row = sqlx::query(QUERY).fetch_one(pool).await?;
                (
                    row.try_get::<i64, _>("total")?,
                    row.try_get::<i64, _>("unprocessed")?,
                    row.try_get::<f64, _>("unprocessed_amount")?,
                )
            }
            DatabasePool::Postgres(pool) => {
                let row = sqlx::query(QUERY).fetch_one(pool).await?;
                (
                    row.try_get::<i64, _>("total")?,
                    row.try_get::<i64, _>("unprocessed")?,
                    row.try_get::<f64, _>("unprocessed_amount")?,
                )
            }
        };

        Ok(PayoutStats {
            total_payouts: total as u64,
            unprocessed_payouts: unprocessed as u64,
            unprocessed_amount,
        })
    }

    /// Most recent payout records, newest first
    pub async fn recent_payouts(&self, limit: u32) -> Result<Vec<PayoutRecord>> {
        let rows = match self {
            DatabasePool::Sqlite(pool) => {
                sqlx::query("SELECT address, amount, processed FROM payouts ORDER BY id DESC LIMIT ?")
                    .bind(limit as i64)
                    .fetch_all(pool)
                    .await?
                    .into_iter()
                    .map(|row| -> Result<PayoutRecord> {
                        Ok(PayoutRecord {
                            address: row.try_get("address")?,
                            amount: row.try_get("amount")?,
                            processed: row.try_get("processed")?,
                        })
                    })
                    .collect::<Result<Vec<_>>>()?
            }
            DatabasePool::Postgres(pool) => {
                sqlx::query("SELECT address, amount, processed FROM payouts ORDER BY id DESC LIMIT $1")
                    .bind(limit as i64)
                    .fetch_all(pool)
                    .await?
                    .into_iter()
                    .map(|row| -> Result<PayoutRecord> {
                        Ok(PayoutRecord {
                            address: row.try_get("address")?,
                            amount: row.try_get("amount")?,
                            processed: row.try_get("processed")?,
                        })
                    })
                    .collect::<Result<Vec<_>>>()?
            }
        };
        Ok(rows)
    }
}

#[async_trait::async_trait]
impl PayoutStore for DatabasePool {
    async fn insert_payout(&self, record: &PayoutRecord) -> Result<()> {
        match self {
            DatabasePool::Sqlite(pool) => {
                sqlx::query("INSERT INTO payouts (address, amount, processed) VALUES (?, ?, ?)")
                    .bind(&record.address)
                    .bind(record.amount)
                    .bind(record.processed)
                    .execute(pool)
                    .await?;
            }
            DatabasePool::Postgres(pool) => {
                sqlx::query("INSERT INTO payouts (address, amount, processed) VALUES ($1, $2, $3)")
                    .bind(&record.address)
                    .bind(record.amount)
                    .bind(record.processed)
                    .execute(pool)
                    .await?;
            }
        }
        Ok(())
    }
}

/// In-memory payout store for testing
#[cfg(any(test, feature = "test-utils"))]
#[derive(Default)]
pub struct MockPayoutStore {
    records: tokio::sync::RwLock<Vec<PayoutRecord>>,
    notify: tokio::sync::Notify,
    should_fail: bool,
}

#[cfg(any(test, feature = "test-utils"))]
impl MockPayoutStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_failure(mut self) -> Self {
        self.should_fail = true;
        self
    }

    pub async fn records(&self) -> Vec<PayoutRecord> {
        self.records.read().await.clone()
    }

    /// Wait until at least `count` records were inserted
    pub async fn wait_for(&self, count: usize) -> Vec<PayoutRecord> {
        loop {
            let notified = self.notify.notified();
            {
                let records = self.records.read().await;
                if records.len() >= count {
                    return records.clone();
                }
            }
            notified.await;
        }
    }
}

#[cfg(any(test, feature = "test-utils"))]
#[async_trait::async_trait]
impl PayoutStore for MockPayoutStore {
    async fn insert_payout(&self, record: &PayoutRecord) -> Result<()> {
        if self.should_fail {
            return Err(Error::Database(sqlx::Error::PoolClosed));
        }
        self.records.write().await.push(record.clone());
        self.notify.notify_waiters();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_pool() -> DatabasePool {
        let pool = DatabasePool::new("sqlite::memory:", 1).await.unwrap();
        pool.migrate().await.unwrap();
        pool
    }

    #[tokio::test]
    async fn test_insert_and_stats() {
        let pool = memory_pool().await;
        pool.health_check().await.unwrap();

        pool.insert_payout(&PayoutRecord::new("t1Minerxxxx", 0.5)).await.unwrap();
        pool.insert_payout(&PayoutRecord::new("t1Othermin", 0.25)).await.unwrap();

        let stats = pool.get_stats().await.unwrap();
        assert_eq!(stats.total_payouts, 2);
        assert_eq!(stats.unprocessed_payouts, 2);
        assert!((stats.unprocessed_amount - 0.75).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_records_are_stored_unprocessed() {
        let pool = memory_pool().await;
        pool.insert_payout(&PayoutRecord::new("t1Minerxxxx", 1.5)).await.unwrap();

        let recent = pool.recent_payouts(10).await.unwrap();
        assert_eq!(recent, vec![PayoutRecord { address: "t1Minerxxxx".to_string(), amount: 1.5, processed: false }]);
    }

    #[tokio::test]
    async fn test_empty_stats() {
        let pool = memory_pool().await;
        let stats = pool.get_stats().await.unwrap();
        assert_eq!(stats, PayoutStats { total_payouts: 0, unprocessed_payouts: 0, unprocessed_amount: 0.0 });
    }

    #[tokio::test]
    async fn test_unsupported_scheme() {
        let err = DatabasePool::new("mysql://localhost/db", 1).await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn test_mock_store_failure() {
        let store = MockPayoutStore::new().with_failure();
        assert!(store.insert_payout(&PayoutRecord::new("t1", 1.0)).await.is_err());
        assert!(store.records().await.is_empty());
    }
}
