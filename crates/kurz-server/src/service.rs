//! The request core: a stateless façade the HTTP and gRPC adapters call.
//!
//! Routes every operation to the storage layer with the user identifier the
//! token codec extracted, enqueues deletions on the worker pool instead of
//! applying them inline, and gates the internal-stats surface behind the
//! trusted subnet.

use std::net::IpAddr;
use std::sync::Arc;

use ipnet::IpNet;
use thiserror::Error;
use url::Url;

use kurz_core::{
    BatchItem, BatchResult, DeleteRequest, InternalStats, Resolution, ShortToken, Storage,
    StorageError, TokenCodec, UserId, UserUrl,
};
use kurz_storage::DeleteQueue;

/// Adapter-neutral error taxonomy. The HTTP and gRPC layers translate these
/// into status codes; duplicates are not errors and travel in
/// [`Shortened::duplicate`] instead.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("short url was deleted")]
    Gone,
    #[error("short url not found: {0}")]
    NotFound(String),
    #[error("forbidden")]
    Forbidden,
    #[error(transparent)]
    Storage(StorageError),
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::InvalidInput(msg) => ServiceError::InvalidInput(msg),
            StorageError::NotFound(token) => ServiceError::NotFound(token),
            other => ServiceError::Storage(other),
        }
    }
}

/// Result of a shorten call: the advertised short URL plus whether the
/// mapping already existed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shortened {
    pub short_url: String,
    pub duplicate: bool,
}

pub struct ShortenerService {
    storage: Arc<dyn Storage>,
    deletes: DeleteQueue,
    auth: TokenCodec,
    base_url: String,
    trusted_subnet: Option<IpNet>,
}

impl ShortenerService {
    pub fn new(
        storage: Arc<dyn Storage>,
        deletes: DeleteQueue,
        auth: TokenCodec,
        base_url: String,
        trusted_subnet: Option<IpNet>,
    ) -> Self {
        Self {
            storage,
            deletes,
            auth,
            base_url: base_url.trim_end_matches('/').to_string(),
            trusted_subnet,
        }
    }

    /// The signed user-identifier codec, shared with the adapters for cookie
    /// and metadata handling.
    pub fn auth(&self) -> &TokenCodec {
        &self.auth
    }

    /// Shortens one URL for `user`. A repeated URL yields the canonical
    /// short URL with the duplicate marker set.
    pub async fn shorten(&self, user: UserId, raw_url: &str) -> Result<Shortened, ServiceError> {
        let long_url = validate_url(raw_url)?;
        let outcome = self
            .storage
            .add_url(user, long_url, ShortToken::random())
            .await?;

        Ok(Shortened {
            short_url: format!("{}/{}", self.base_url, outcome.token()),
            duplicate: outcome.is_duplicate(),
        })
    }

    /// Shortens a batch of URLs, assigning a fresh token per row.
    pub async fn shorten_batch(
        &self,
        user: UserId,
        items: Vec<(String, String)>,
    ) -> Result<Vec<BatchResult>, ServiceError> {
        let items = items
            .into_iter()
            .map(|(correlation_id, original_url)| {
                validate_url(&original_url)?;
                Ok(BatchItem {
                    correlation_id,
                    original_url,
                    token: ShortToken::random(),
                })
            })
            .collect::<Result<Vec<_>, ServiceError>>()?;

        Ok(self.storage.add_batch(user, items, &self.base_url).await?)
    }

    /// Resolves a short token to its original URL for redirecting.
    pub async fn resolve(&self, token: &str) -> Result<String, ServiceError> {
        match self.storage.get_url(token).await? {
            Resolution::Active(long_url) => Ok(long_url),
            Resolution::Deleted(_) => Err(ServiceError::Gone),
        }
    }

    /// Lists every live mapping owned by `user`, prefixed with the base URL.
    pub async fn user_urls(&self, user: UserId) -> Result<Vec<UserUrl>, ServiceError> {
        Ok(self.storage.user_urls(user, &self.base_url).await?)
    }

    /// Queues the listed tokens for deletion and returns as soon as the job
    /// is enqueued; a saturated pool makes this wait, which is the intended
    /// ingress backpressure.
    pub async fn delete_urls(&self, user: UserId, tokens: Vec<String>) -> Result<(), ServiceError> {
        self.deletes.submit(DeleteRequest { user, tokens }).await?;
        Ok(())
    }

    /// Internal statistics, permitted only to callers whose reported address
    /// falls inside the trusted subnet.
    pub async fn internal_stats(
        &self,
        real_ip: Option<IpAddr>,
    ) -> Result<InternalStats, ServiceError> {
        let Some(subnet) = &self.trusted_subnet else {
            return Err(ServiceError::Forbidden);
        };
        let Some(ip) = real_ip else {
            return Err(ServiceError::Forbidden);
        };
        if !subnet.contains(&ip) {
            return Err(ServiceError::Forbidden);
        }

        Ok(self.storage.stats().await?)
    }

    /// Storage liveness probe.
    pub async fn ping(&self) -> Result<(), ServiceError> {
        Ok(self.storage.ping().await?)
    }
}

/// Checks that the input parses as an absolute URL and returns it trimmed.
fn validate_url(raw: &str) -> Result<&str, ServiceError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ServiceError::InvalidInput("empty url".to_string()));
    }
    Url::parse(trimmed)
        .map_err(|e| ServiceError::InvalidInput(format!("'{trimmed}' is not a url: {e}")))?;
    Ok(trimmed)
}
