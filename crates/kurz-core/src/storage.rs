use crate::error::Result;
use crate::token::ShortToken;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Identifier assigned to a client on first contact, carried in its signed
/// token thereafter.
pub type UserId = i32;

/// Result of persisting a new mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddOutcome {
    /// The mapping was stored under the supplied token.
    Created(ShortToken),
    /// `(user, original_url)` already existed; carries the canonical token.
    Duplicate(ShortToken),
}

impl AddOutcome {
    pub fn token(&self) -> &ShortToken {
        match self {
            AddOutcome::Created(token) | AddOutcome::Duplicate(token) => token,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, AddOutcome::Duplicate(_))
    }
}

/// Result of resolving a short token that is known to the store.
///
/// Unknown tokens surface as [`StorageError::NotFound`] instead.
///
/// [`StorageError::NotFound`]: crate::error::StorageError::NotFound
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The record is live; redirect to the original URL.
    Active(String),
    /// The record was soft-deleted; the mapping existed but is gone.
    Deleted(String),
}

/// A `(short, original)` pair as exported on the user-listing surfaces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserUrl {
    pub short_url: String,
    pub original_url: String,
}

/// One row of a batch insert, token already assigned by the caller.
#[derive(Debug, Clone)]
pub struct BatchItem {
    pub correlation_id: String,
    pub original_url: String,
    pub token: ShortToken,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResult {
    pub correlation_id: String,
    pub short_url: String,
}

/// A deletion job: tokens to remove on behalf of one user.
///
/// Produced by the request façade, consumed exactly once by one delete
/// worker. Tokens owned by other users are silently ignored on application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteRequest {
    pub user: UserId,
    pub tokens: Vec<String>,
}

/// Live-record and distinct-user counts for the internal stats surface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InternalStats {
    pub urls: i64,
    pub users: i64,
}

/// Uniform contract implemented by the in-memory and Postgres backends.
#[async_trait]
pub trait Storage: Send + Sync + 'static {
    /// Persists a new mapping for `user`. On a `(user, original_url)`
    /// conflict the existing token is returned as [`AddOutcome::Duplicate`].
    /// A trimmed-empty `long_url` fails with `InvalidInput`.
    async fn add_url(&self, user: UserId, long_url: &str, token: ShortToken)
        -> Result<AddOutcome>;

    /// Resolves a short token to its original URL.
    async fn get_url(&self, token: &str) -> Result<Resolution>;

    /// Lists every live record owned by `user`, short values joined onto
    /// `prefix` when it is non-blank.
    async fn user_urls(&self, user: UserId, prefix: &str) -> Result<Vec<UserUrl>>;

    /// Inserts a batch of mappings. The Postgres backend applies the batch in
    /// a single transaction; the memory backend applies rows one by one.
    async fn add_batch(
        &self,
        user: UserId,
        items: Vec<BatchItem>,
        prefix: &str,
    ) -> Result<Vec<BatchResult>>;

    /// Applies a deletion job: every listed token that belongs to the
    /// requesting user is removed (memory) or soft-deleted (Postgres).
    async fn delete_user_urls(&self, request: &DeleteRequest) -> Result<()>;

    /// Counts live records and the distinct users owning them.
    async fn stats(&self) -> Result<InternalStats>;

    /// Liveness probe.
    async fn ping(&self) -> Result<()>;

    /// Releases underlying resources.
    async fn close(&self) -> Result<()>;
}
