use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};

use kurz_core::token::prefixed;
use kurz_core::{
    AddOutcome, BatchItem, BatchResult, DeleteRequest, InternalStats, Resolution, Result,
    ShortToken, Storage, StorageError, UserId, UserUrl,
};

/// Postgres implementation of the storage contract.
///
/// Soft delete is implemented with `deleted_at`: redirect reads report
/// deleted rows as [`Resolution::Deleted`], listings and stats only consider
/// rows where `deleted_at IS NULL`, and rows are never physically removed.
/// The `(user_id, original_url)` unique constraint carries duplicate
/// detection; the short token itself is unconstrained.
#[derive(Debug, Clone)]
pub struct PostgresStorage {
    pool: PgPool,
}

const CREATE_TABLE: &str = "\
CREATE TABLE IF NOT EXISTS shortener (
    user_id INTEGER,
    short_url CHAR(5),
    original_url VARCHAR(255),
    deleted_at TIMESTAMP,
    UNIQUE (user_id, original_url)
)";

impl PostgresStorage {
    /// Creates a backend from an existing connection pool without touching
    /// the schema.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Opens a connection pool and bootstraps the `shortener` table if it is
    /// missing. A database that cannot be reached or bootstrapped surfaces
    /// as an error; the factory in [`crate::connect`] degrades to the
    /// in-memory backend in that case.
    pub async fn connect(database_dsn: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .connect(database_dsn)
            .await
            .map_err(map_sqlx_error)?;

        let storage = Self::new(pool);
        storage.bootstrap().await?;
        Ok(storage)
    }

    async fn bootstrap(&self) -> Result<()> {
        let probe = sqlx::query("SELECT 1 FROM shortener LIMIT 1")
            .execute(&self.pool)
            .await;
        if probe.is_ok() {
            return Ok(());
        }

        sqlx::query(CREATE_TABLE)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    /// Returns a reference to the underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn map_sqlx_error(err: sqlx::Error) -> StorageError {
    let message = err.to_string();

    match err {
        sqlx::Error::PoolTimedOut => StorageError::Timeout(message),
        sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_) => StorageError::Unavailable(message),
        sqlx::Error::ColumnIndexOutOfBounds { .. }
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::TypeNotFound { .. }
        | sqlx::Error::Decode(_) => StorageError::InvalidData(message),
        _ => StorageError::Query(message),
    }
}

#[async_trait]
impl Storage for PostgresStorage {
    async fn add_url(
        &self,
        user: UserId,
        long_url: &str,
        token: ShortToken,
    ) -> Result<AddOutcome> {
        let long_url = long_url.trim();
        if long_url.is_empty() {
            return Err(StorageError::InvalidInput(
                "empty original url".to_string(),
            ));
        }

        let result = sqlx::query(
            r#"
            INSERT INTO shortener (user_id, short_url, original_url)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id, original_url) DO NOTHING
            "#,
        )
        .bind(user)
        .bind(token.as_str())
        .bind(long_url)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            let row = sqlx::query(
                r#"
                SELECT short_url
                FROM shortener
                WHERE user_id = $1 AND original_url = $2
                "#,
            )
            .bind(user)
            .bind(long_url)
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

            let existing: String = row.try_get("short_url").map_err(map_sqlx_error)?;
            return Ok(AddOutcome::Duplicate(ShortToken::new_unchecked(existing)));
        }

        Ok(AddOutcome::Created(token))
    }

    async fn get_url(&self, token: &str) -> Result<Resolution> {
        let row = sqlx::query(
            r#"
            SELECT original_url, deleted_at IS NOT NULL AS deleted
            FROM shortener
            WHERE short_url = $1
            LIMIT 1
            "#,
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let Some(row) = row else {
            return Err(StorageError::NotFound(token.to_string()));
        };

        let original_url: String = row.try_get("original_url").map_err(map_sqlx_error)?;
        let deleted: bool = row.try_get("deleted").map_err(map_sqlx_error)?;

        if deleted {
            Ok(Resolution::Deleted(original_url))
        } else {
            Ok(Resolution::Active(original_url))
        }
    }

    async fn user_urls(&self, user: UserId, prefix: &str) -> Result<Vec<UserUrl>> {
        let rows = sqlx::query(
            r#"
            SELECT short_url, original_url
            FROM shortener
            WHERE user_id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(user)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let mut result = Vec::with_capacity(rows.len());
        for row in rows {
            let short_url: String = row.try_get("short_url").map_err(map_sqlx_error)?;
            let original_url: String = row.try_get("original_url").map_err(map_sqlx_error)?;
            result.push(UserUrl {
                short_url: prefixed(prefix, &short_url),
                original_url,
            });
        }
        Ok(result)
    }

    async fn add_batch(
        &self,
        user: UserId,
        items: Vec<BatchItem>,
        prefix: &str,
    ) -> Result<Vec<BatchResult>> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        let mut result = Vec::with_capacity(items.len());
        for item in items {
            sqlx::query(
                r#"
                INSERT INTO shortener (user_id, short_url, original_url)
                VALUES ($1, $2, $3)
                "#,
            )
            .bind(user)
            .bind(item.token.as_str())
            .bind(item.original_url.trim())
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

            result.push(BatchResult {
                correlation_id: item.correlation_id,
                short_url: prefixed(prefix, item.token.as_str()),
            });
        }

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(result)
    }

    async fn delete_user_urls(&self, request: &DeleteRequest) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE shortener
            SET deleted_at = now()
            WHERE user_id = $1
              AND short_url = ANY($2)
              AND deleted_at IS NULL
            "#,
        )
        .bind(request.user)
        .bind(&request.tokens)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn stats(&self) -> Result<InternalStats> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS urls, COUNT(DISTINCT user_id) AS users
            FROM shortener
            WHERE deleted_at IS NULL
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(InternalStats {
            urls: row.try_get("urls").map_err(map_sqlx_error)?,
            users: row.try_get("users").map_err(map_sqlx_error)?,
        })
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}
