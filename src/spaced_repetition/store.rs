//! Persistence boundary for memory states and per-user activity.
//!
//! Writes are conditional on the record version; there is no unconditional
//! overwrite. `expected_version == None` means the record must not exist yet.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::memory::{CardKey, MemoryState, Versioned};
use super::stats::ReviewStats;
use super::SpacedRepetitionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Stored { version: u64 },
    Conflict { current: Option<u64> },
}

impl PutOutcome {
    pub fn is_stored(&self) -> bool {
        matches!(self, PutOutcome::Stored { .. })
    }
}

#[async_trait]
pub trait ProgressStore: Send + Sync {
    async fn get(&self, key: &CardKey)
        -> Result<Option<Versioned<MemoryState>>, SpacedRepetitionError>;

    async fn put(
        &self,
        state: &MemoryState,
        expected_version: Option<u64>,
    ) -> Result<PutOutcome, SpacedRepetitionError>;

    async fn query_by_user(&self, user_id: &str) -> Result<Vec<MemoryState>, SpacedRepetitionError>;

    async fn get_activity(
        &self,
        user_id: &str,
    ) -> Result<Option<Versioned<ReviewStats>>, SpacedRepetitionError>;

    async fn put_activity(
        &self,
        user_id: &str,
        stats: &ReviewStats,
        expected_version: Option<u64>,
    ) -> Result<PutOutcome, SpacedRepetitionError>;
}

/// Runs a store call under a deadline; expiry is reported as an outage.
pub async fn with_timeout<T, F>(
    timeout: Duration,
    operation: &'static str,
    fut: F,
) -> Result<T, SpacedRepetitionError>
where
    F: Future<Output = Result<T, SpacedRepetitionError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(
                operation,
                timeout_ms = timeout.as_millis() as u64,
                "store call timed out"
            );
            Err(SpacedRepetitionError::StoreUnavailable(format!(
                "{} timed out after {}ms",
                operation,
                timeout.as_millis()
            )))
        }
    }
}

/// Version a write with `expected_version` would be stored under, or the
/// conflict to report.
fn next_version(current: Option<u64>, expected_version: Option<u64>) -> Result<u64, PutOutcome> {
    if current != expected_version {
        return Err(PutOutcome::Conflict { current });
    }
    Ok(current.map_or(1, |v| v + 1))
}

fn compare_and_set<K, V>(
    map: &mut HashMap<K, Versioned<V>>,
    key: K,
    value: V,
    expected_version: Option<u64>,
) -> PutOutcome
where
    K: std::hash::Hash + Eq,
{
    match next_version(map.get(&key).map(|v| v.version), expected_version) {
        Ok(version) => {
            map.insert(key, Versioned::new(version, value));
            PutOutcome::Stored { version }
        }
        Err(conflict) => conflict,
    }
}

#[derive(Debug, Default)]
struct StoreData {
    cards: HashMap<CardKey, Versioned<MemoryState>>,
    activity: HashMap<String, Versioned<ReviewStats>>,
}

impl StoreData {
    fn query_by_user(&self, user_id: &str) -> Vec<MemoryState> {
        let mut states: Vec<_> = self
            .cards
            .values()
            .filter(|v| v.value.user_id == user_id)
            .map(|v| v.value.clone())
            .collect();
        states.sort_by(|a, b| a.card_id.cmp(&b.card_id));
        states
    }
}

/// Process-local store with no durability.
#[derive(Debug, Default)]
pub struct MemoryProgressStore {
    data: RwLock<StoreData>,
}

impl MemoryProgressStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn card_count(&self) -> usize {
        self.data.read().await.cards.len()
    }
}

#[async_trait]
impl ProgressStore for MemoryProgressStore {
    async fn get(
        &self,
        key: &CardKey,
    ) -> Result<Option<Versioned<MemoryState>>, SpacedRepetitionError> {
        Ok(self.data.read().await.cards.get(key).cloned())
    }

    async fn put(
        &self,
        state: &MemoryState,
        expected_version: Option<u64>,
    ) -> Result<PutOutcome, SpacedRepetitionError> {
        let mut data = self.data.write().await;
        Ok(compare_and_set(
            &mut data.cards,
            state.key(),
            state.clone(),
            expected_version,
        ))
    }

    async fn query_by_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<MemoryState>, SpacedRepetitionError> {
        Ok(self.data.read().await.query_by_user(user_id))
    }

    async fn get_activity(
        &self,
        user_id: &str,
    ) -> Result<Option<Versioned<ReviewStats>>, SpacedRepetitionError> {
        Ok(self.data.read().await.activity.get(user_id).cloned())
    }

    async fn put_activity(
        &self,
        user_id: &str,
        stats: &ReviewStats,
        expected_version: Option<u64>,
    ) -> Result<PutOutcome, SpacedRepetitionError> {
        let mut data = self.data.write().await;
        Ok(compare_and_set(
            &mut data.activity,
            user_id.to_string(),
            stats.clone(),
            expected_version,
        ))
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ActivityRecord {
    user_id: String,
    #[serde(flatten)]
    stats: Versioned<ReviewStats>,
}

fn progress_records(
    cards: &HashMap<CardKey, Versioned<MemoryState>>,
) -> Vec<&Versioned<MemoryState>> {
    let mut records: Vec<_> = cards.values().collect();
    records.sort_by(|a, b| {
        (&a.value.user_id, &a.value.card_id).cmp(&(&b.value.user_id, &b.value.card_id))
    });
    records
}

fn activity_records(activity: &HashMap<String, Versioned<ReviewStats>>) -> Vec<ActivityRecord> {
    let mut records: Vec<_> = activity
        .iter()
        .map(|(user_id, stats)| ActivityRecord {
            user_id: user_id.clone(),
            stats: stats.clone(),
        })
        .collect();
    records.sort_by(|a, b| a.user_id.cmp(&b.user_id));
    records
}

/// JSON-file store: `progress.json` and `activity.json` under the data directory.
///
/// A put serializes the candidate contents to a uniquely named temp file
/// first. The rename onto the real file and the in-memory commit then happen
/// back to back without yielding, under the write lock. A put that fails, or
/// whose future is dropped before that point, leaves neither the file nor the
/// map changed.
pub struct FileProgressStore {
    dir: PathBuf,
    data: RwLock<StoreData>,
}

impl FileProgressStore {
    const PROGRESS_FILE: &'static str = "progress.json";
    const ACTIVITY_FILE: &'static str = "activity.json";

    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, SpacedRepetitionError> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;
        Self::remove_stale_temp_files(&dir).await?;

        let mut data = StoreData::default();

        let progress_path = dir.join(Self::PROGRESS_FILE);
        if tokio::fs::try_exists(&progress_path).await? {
            let content = tokio::fs::read_to_string(&progress_path).await?;
            let records: Vec<Versioned<MemoryState>> = serde_json::from_str(&content)?;
            for record in records {
                record.value.validate()?;
                data.cards.insert(record.value.key(), record);
            }
        }

        let activity_path = dir.join(Self::ACTIVITY_FILE);
        if tokio::fs::try_exists(&activity_path).await? {
            let content = tokio::fs::read_to_string(&activity_path).await?;
            let records: Vec<ActivityRecord> = serde_json::from_str(&content)?;
            for record in records {
                data.activity.insert(record.user_id, record.stats);
            }
        }

        tracing::info!(
            path = %dir.display(),
            cards = data.cards.len(),
            users = data.activity.len(),
            "opened progress store"
        );

        Ok(Self {
            dir,
            data: RwLock::new(data),
        })
    }

    /// Leftovers of puts that never reached their rename.
    async fn remove_stale_temp_files(dir: &Path) -> Result<(), SpacedRepetitionError> {
        let mut entries = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            if name.to_string_lossy().ends_with(".tmp") {
                tracing::debug!(path = %entry.path().display(), "removing stale temp file");
                tokio::fs::remove_file(entry.path()).await?;
            }
        }
        Ok(())
    }

    /// Writes `value` next to `name` and returns the temp path.
    async fn stage<T: Serialize>(
        &self,
        name: &str,
        value: &T,
    ) -> Result<PathBuf, SpacedRepetitionError> {
        let content = serde_json::to_string_pretty(value)?;
        let tmp = self.dir.join(format!("{}.{}.tmp", name, Uuid::new_v4()));
        if let Err(err) = tokio::fs::write(&tmp, content).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(err.into());
        }
        Ok(tmp)
    }

    /// Moves a staged file into place. Synchronous so that the caller can
    /// commit in memory without an await point in between.
    fn publish(&self, tmp: &Path, name: &str) -> Result<(), SpacedRepetitionError> {
        if let Err(err) = std::fs::rename(tmp, self.dir.join(name)) {
            let _ = std::fs::remove_file(tmp);
            return Err(err.into());
        }
        Ok(())
    }

    async fn persist<T: Serialize>(
        &self,
        name: &str,
        value: &T,
    ) -> Result<(), SpacedRepetitionError> {
        let tmp = self.stage(name, value).await?;
        self.publish(&tmp, name)
    }
}

fn unavailable(err: SpacedRepetitionError) -> SpacedRepetitionError {
    match err {
        SpacedRepetitionError::StoreUnavailable(_) => err,
        other => SpacedRepetitionError::StoreUnavailable(other.to_string()),
    }
}

#[async_trait]
impl ProgressStore for FileProgressStore {
    async fn get(
        &self,
        key: &CardKey,
    ) -> Result<Option<Versioned<MemoryState>>, SpacedRepetitionError> {
        Ok(self.data.read().await.cards.get(key).cloned())
    }

    async fn put(
        &self,
        state: &MemoryState,
        expected_version: Option<u64>,
    ) -> Result<PutOutcome, SpacedRepetitionError> {
        let mut data = self.data.write().await;
        let key = state.key();
        let current = data.cards.get(&key).map(|v| v.version);
        let version = match next_version(current, expected_version) {
            Ok(version) => version,
            Err(conflict) => return Ok(conflict),
        };

        let mut cards = data.cards.clone();
        cards.insert(key.clone(), Versioned::new(version, state.clone()));
        let persisted = {
            let records = progress_records(&cards);
            self.persist(Self::PROGRESS_FILE, &records).await
        };
        if let Err(err) = persisted {
            tracing::error!(%key, error = %err, "failed to persist progress");
            return Err(unavailable(err));
        }
        data.cards = cards;
        Ok(PutOutcome::Stored { version })
    }

    async fn query_by_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<MemoryState>, SpacedRepetitionError> {
        Ok(self.data.read().await.query_by_user(user_id))
    }

    async fn get_activity(
        &self,
        user_id: &str,
    ) -> Result<Option<Versioned<ReviewStats>>, SpacedRepetitionError> {
        Ok(self.data.read().await.activity.get(user_id).cloned())
    }

    async fn put_activity(
        &self,
        user_id: &str,
        stats: &ReviewStats,
        expected_version: Option<u64>,
    ) -> Result<PutOutcome, SpacedRepetitionError> {
        let mut data = self.data.write().await;
        let current = data.activity.get(user_id).map(|v| v.version);
        let version = match next_version(current, expected_version) {
            Ok(version) => version,
            Err(conflict) => return Ok(conflict),
        };

        let mut activity = data.activity.clone();
        activity.insert(user_id.to_string(), Versioned::new(version, stats.clone()));
        let records = activity_records(&activity);
        if let Err(err) = self.persist(Self::ACTIVITY_FILE, &records).await {
            tracing::error!(user_id, error = %err, "failed to persist activity");
            return Err(unavailable(err));
        }
        data.activity = activity;
        Ok(PutOutcome::Stored { version })
    }
}
