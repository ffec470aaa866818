use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use kurz_core::token::prefixed;
use kurz_core::{
    AddOutcome, BatchItem, BatchResult, DeleteRequest, InternalStats, Resolution, Result,
    ShortToken, Storage, StorageError, UserId, UserUrl,
};

use crate::log::{self, LogRecord};

#[derive(Default)]
struct State {
    /// Primary map: short token to original URL.
    items: HashMap<String, String>,
    /// Per-user index into `items`. Order is insertion order until a delete
    /// swaps entries around.
    user_items: HashMap<UserId, Vec<String>>,
    /// Reverse index enforcing the `(user, original_url)` uniqueness the
    /// Postgres schema gets from its constraint.
    by_user_url: HashMap<(UserId, String), String>,
}

/// In-memory backend with an optional append log for crash recovery.
///
/// All three maps sit behind a single lock so the per-user index can never
/// drift from the primary record set. Guards are held only across plain map
/// operations and the synchronous log append, never across an await point.
pub struct MemoryStorage {
    state: RwLock<State>,
    log_path: Option<PathBuf>,
}

impl MemoryStorage {
    /// Creates a backend, replaying the append log at `file_storage_path` if
    /// it names a regular file. A blank path disables logging entirely.
    ///
    /// Replayed records carry no user attribution (the log stores only the
    /// pair), so they are resolvable but absent from every per-user listing
    /// and from duplicate detection.
    pub fn open(file_storage_path: &str) -> Result<Self> {
        let log_path = match file_storage_path.trim() {
            "" => None,
            path => Some(PathBuf::from(path)),
        };

        let mut state = State::default();
        if let Some(path) = &log_path {
            if std::fs::metadata(path).map(|m| m.is_file()).unwrap_or(false) {
                for record in log::replay(path)? {
                    state.items.insert(record.short_url, record.long_url);
                }
            }
        }

        Ok(Self {
            state: RwLock::new(state),
            log_path,
        })
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|_| StorageError::Unavailable("memory state lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|_| StorageError::Unavailable("memory state lock poisoned".to_string()))
    }

    fn log_append(&self, short_url: &str, long_url: &str) -> Result<()> {
        if let Some(path) = &self.log_path {
            log::append(
                path,
                &LogRecord {
                    short_url: short_url.to_string(),
                    long_url: long_url.to_string(),
                },
            )?;
        }
        Ok(())
    }
}

fn insert_record(state: &mut State, user: UserId, token: &ShortToken, long_url: &str) {
    state
        .items
        .insert(token.as_str().to_string(), long_url.to_string());
    state
        .user_items
        .entry(user)
        .or_default()
        .push(token.as_str().to_string());
    state
        .by_user_url
        .insert((user, long_url.to_string()), token.as_str().to_string());
}

#[async_trait]
impl Storage for MemoryStorage {
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

        let mut state = self.write()?;
        if let Some(existing) = state.by_user_url.get(&(user, long_url.to_string())) {
            return Ok(AddOutcome::Duplicate(ShortToken::new_unchecked(
                existing.clone(),
            )));
        }

        insert_record(&mut state, user, &token, long_url);
        self.log_append(token.as_str(), long_url)?;
        Ok(AddOutcome::Created(token))
    }

    async fn get_url(&self, token: &str) -> Result<Resolution> {
        let state = self.read()?;
        match state.items.get(token) {
            Some(long_url) => Ok(Resolution::Active(long_url.clone())),
            None => Err(StorageError::NotFound(token.to_string())),
        }
    }

    async fn user_urls(&self, user: UserId, prefix: &str) -> Result<Vec<UserUrl>> {
        let state = self.read()?;
        let Some(tokens) = state.user_items.get(&user) else {
            return Ok(Vec::new());
        };

        let result = tokens
            .iter()
            .filter_map(|token| {
                state.items.get(token).map(|long_url| UserUrl {
                    short_url: prefixed(prefix, token),
                    original_url: long_url.clone(),
                })
            })
            .collect();
        Ok(result)
    }

    async fn add_batch(
        &self,
        user: UserId,
        items: Vec<BatchItem>,
        prefix: &str,
    ) -> Result<Vec<BatchResult>> {
        // Not transactional: a failure mid-batch leaves earlier rows applied.
        let mut state = self.write()?;
        let mut result = Vec::with_capacity(items.len());
        for item in items {
            let long_url = item.original_url.trim();
            if state
                .by_user_url
                .contains_key(&(user, long_url.to_string()))
            {
                return Err(StorageError::Query(format!(
                    "duplicate original url in batch: {long_url}"
                )));
            }

            insert_record(&mut state, user, &item.token, long_url);
            self.log_append(item.token.as_str(), long_url)?;
            result.push(BatchResult {
                correlation_id: item.correlation_id,
                short_url: prefixed(prefix, item.token.as_str()),
            });
        }
        Ok(result)
    }

    async fn delete_user_urls(&self, request: &DeleteRequest) -> Result<()> {
        let mut state = self.write()?;
        let state = &mut *state;

        let Some(owned) = state.user_items.get_mut(&request.user) else {
            return Ok(());
        };

        for token in &request.tokens {
            // Ownership check first: tokens in someone else's index are left
            // untouched.
            let Some(position) = owned.iter().position(|t| t == token) else {
                continue;
            };
            owned.swap_remove(position);

            if let Some(long_url) = state.items.remove(token) {
                state.by_user_url.remove(&(request.user, long_url));
            }
        }
        Ok(())
    }

    async fn stats(&self) -> Result<InternalStats> {
        let state = self.read()?;
        Ok(InternalStats {
            urls: state.items.len() as i64,
            users: state
                .user_items
                .values()
                .filter(|tokens| !tokens.is_empty())
                .count() as i64,
        })
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unlogged() -> MemoryStorage {
        MemoryStorage::open("").unwrap()
    }

    fn token(value: &str) -> ShortToken {
        ShortToken::new_unchecked(value)
    }

    #[tokio::test]
    async fn add_then_get() {
        let storage = unlogged();

        let outcome = storage
            .add_url(1, "http://abc.test", token("abc12"))
            .await
            .unwrap();
        assert_eq!(outcome, AddOutcome::Created(token("abc12")));

        let resolution = storage.get_url("abc12").await.unwrap();
        assert_eq!(resolution, Resolution::Active("http://abc.test".into()));
    }

    #[tokio::test]
    async fn second_add_of_same_url_returns_existing_token() {
        let storage = unlogged();

        storage
            .add_url(1, "http://abc.test", token("abc12"))
            .await
            .unwrap();
        let outcome = storage
            .add_url(1, "http://abc.test", token("xyz89"))
            .await
            .unwrap();

        assert_eq!(outcome, AddOutcome::Duplicate(token("abc12")));
        assert!(storage.get_url("xyz89").await.is_err());
    }

    #[tokio::test]
    async fn same_url_for_two_users_yields_two_records() {
        let storage = unlogged();

        let a = storage
            .add_url(1, "http://same.url", token("aaaa1"))
            .await
            .unwrap();
        let b = storage
            .add_url(2, "http://same.url", token("bbbb2"))
            .await
            .unwrap();

        assert!(!a.is_duplicate());
        assert!(!b.is_duplicate());

        let for_a = storage.user_urls(1, "").await.unwrap();
        assert_eq!(for_a.len(), 1);
        assert_eq!(for_a[0].short_url, "aaaa1");
    }

    #[tokio::test]
    async fn blank_url_is_invalid_input() {
        let storage = unlogged();
        let err = storage.add_url(1, "   ", token("abc12")).await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn unknown_token_is_not_found() {
        let storage = unlogged();
        let err = storage.get_url("nope1").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[tokio::test]
    async fn user_urls_joins_prefix() {
        let storage = unlogged();
        storage
            .add_url(7, "http://abc.test", token("abc12"))
            .await
            .unwrap();

        let listed = storage.user_urls(7, "http://sh.rt").await.unwrap();
        assert_eq!(listed[0].short_url, "http://sh.rt/abc12");
        assert_eq!(listed[0].original_url, "http://abc.test");
    }

    #[tokio::test]
    async fn delete_removes_record_and_index_entry() {
        let storage = unlogged();
        storage
            .add_url(1, "http://abc.test", token("abc12"))
            .await
            .unwrap();
        storage
            .add_url(1, "http://def.test", token("def34"))
            .await
            .unwrap();

        storage
            .delete_user_urls(&DeleteRequest {
                user: 1,
                tokens: vec!["abc12".into()],
            })
            .await
            .unwrap();

        assert!(storage.get_url("abc12").await.is_err());
        assert_eq!(storage.get_url("def34").await.unwrap(),
            Resolution::Active("http://def.test".into()));

        let listed = storage.user_urls(1, "").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].short_url, "def34");
    }

    #[tokio::test]
    async fn delete_frees_the_url_for_reuse() {
        let storage = unlogged();
        storage
            .add_url(1, "http://abc.test", token("abc12"))
            .await
            .unwrap();
        storage
            .delete_user_urls(&DeleteRequest {
                user: 1,
                tokens: vec!["abc12".into()],
            })
            .await
            .unwrap();

        let outcome = storage
            .add_url(1, "http://abc.test", token("new99"))
            .await
            .unwrap();
        assert_eq!(outcome, AddOutcome::Created(token("new99")));
    }

    #[tokio::test]
    async fn delete_by_another_user_has_no_effect() {
        let storage = unlogged();
        storage
            .add_url(2, "http://abc.test", token("abc12"))
            .await
            .unwrap();

        storage
            .delete_user_urls(&DeleteRequest {
                user: 1,
                tokens: vec!["abc12".into()],
            })
            .await
            .unwrap();

        assert_eq!(
            storage.get_url("abc12").await.unwrap(),
            Resolution::Active("http://abc.test".into())
        );
        assert_eq!(storage.user_urls(2, "").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn stats_counts_live_records_and_users() {
        let storage = unlogged();
        storage
            .add_url(1, "http://one.test", token("aaaa1"))
            .await
            .unwrap();
        storage
            .add_url(1, "http://two.test", token("bbbb2"))
            .await
            .unwrap();
        storage
            .add_url(2, "http://three.test", token("cccc3"))
            .await
            .unwrap();

        assert_eq!(
            storage.stats().await.unwrap(),
            InternalStats { urls: 3, users: 2 }
        );

        storage
            .delete_user_urls(&DeleteRequest {
                user: 2,
                tokens: vec!["cccc3".into()],
            })
            .await
            .unwrap();

        assert_eq!(
            storage.stats().await.unwrap(),
            InternalStats { urls: 2, users: 1 }
        );
    }

    #[tokio::test]
    async fn batch_applies_every_row() {
        let storage = unlogged();
        let result = storage
            .add_batch(
                1,
                vec![
                    BatchItem {
                        correlation_id: "1".into(),
                        original_url: "http://u1".into(),
                        token: token("aaaa1"),
                    },
                    BatchItem {
                        correlation_id: "2".into(),
                        original_url: "http://u2".into(),
                        token: token("bbbb2"),
                    },
                ],
                "http://sh.rt",
            )
            .await
            .unwrap();

        assert_eq!(result.len(), 2);
        assert_eq!(result[0].correlation_id, "1");
        assert_eq!(result[0].short_url, "http://sh.rt/aaaa1");
        assert_eq!(
            storage.get_url("bbbb2").await.unwrap(),
            Resolution::Active("http://u2".into())
        );
    }

    #[tokio::test]
    async fn batch_conflict_leaves_earlier_rows_applied() {
        let storage = unlogged();
        storage
            .add_url(1, "http://u2", token("zzzz9"))
            .await
            .unwrap();

        let err = storage
            .add_batch(
                1,
                vec![
                    BatchItem {
                        correlation_id: "1".into(),
                        original_url: "http://u1".into(),
                        token: token("aaaa1"),
                    },
                    BatchItem {
                        correlation_id: "2".into(),
                        original_url: "http://u2".into(),
                        token: token("bbbb2"),
                    },
                ],
                "",
            )
            .await
            .unwrap_err();

        assert!(matches!(err, StorageError::Query(_)));
        // The first row stays; the memory backend makes no atomicity promise.
        assert!(storage.get_url("aaaa1").await.is_ok());
        assert!(storage.get_url("bbbb2").await.is_err());
    }

    #[tokio::test]
    async fn writes_reach_the_append_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("storage.jsonl");
        let storage = MemoryStorage::open(path.to_str().unwrap()).unwrap();

        storage
            .add_url(1, "http://abc.test", token("abc12"))
            .await
            .unwrap();

        let records = crate::log::replay(&path).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].short_url, "abc12");
        assert_eq!(records[0].long_url, "http://abc.test");
    }

    #[tokio::test]
    async fn recovery_resolves_every_logged_token() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("storage.jsonl");

        {
            let storage = MemoryStorage::open(path.to_str().unwrap()).unwrap();
            storage
                .add_url(1, "http://one.test", token("aaaa1"))
                .await
                .unwrap();
            storage
                .add_url(1, "http://two.test", token("bbbb2"))
                .await
                .unwrap();
        }

        let recovered = MemoryStorage::open(path.to_str().unwrap()).unwrap();
        assert_eq!(
            recovered.get_url("aaaa1").await.unwrap(),
            Resolution::Active("http://one.test".into())
        );
        assert_eq!(
            recovered.get_url("bbbb2").await.unwrap(),
            Resolution::Active("http://two.test".into())
        );
    }

    #[tokio::test]
    async fn recovery_takes_the_last_entry_for_a_token() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("storage.jsonl");
        for long in ["http://old.test", "http://new.test"] {
            crate::log::append(
                &path,
                &LogRecord {
                    short_url: "abc12".into(),
                    long_url: long.into(),
                },
            )
            .unwrap();
        }

        let recovered = MemoryStorage::open(path.to_str().unwrap()).unwrap();
        assert_eq!(
            recovered.get_url("abc12").await.unwrap(),
            Resolution::Active("http://new.test".into())
        );
    }

    #[tokio::test]
    async fn recovered_records_are_unattributed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("storage.jsonl");
        {
            let storage = MemoryStorage::open(path.to_str().unwrap()).unwrap();
            storage
                .add_url(5, "http://abc.test", token("abc12"))
                .await
                .unwrap();
        }

        let recovered = MemoryStorage::open(path.to_str().unwrap()).unwrap();
        assert!(recovered.user_urls(5, "").await.unwrap().is_empty());
        assert_eq!(
            recovered.stats().await.unwrap(),
            InternalStats { urls: 1, users: 0 }
        );
    }

    #[tokio::test]
    async fn missing_log_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("never-written.jsonl");
        let storage = MemoryStorage::open(path.to_str().unwrap()).unwrap();
        assert_eq!(
            storage.stats().await.unwrap(),
            InternalStats { urls: 0, users: 0 }
        );
    }
}
