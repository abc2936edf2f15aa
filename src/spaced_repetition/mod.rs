//! Spaced repetition engine
//!
//! SM-2 scheduling over per-user-per-card memory states:
//! - Grading (SM-2 ease/interval update with optimistic-concurrency writes)
//! - Due-card selection
//! - Study queues (due cards first, then new cards in content order)
//! - Session sizing from recent accuracy
//! - Card buckets, streaks and review stats

pub mod algorithm;
pub mod catalog;
pub mod config;
pub mod due;
pub mod memory;
pub mod session;
pub mod stats;
pub mod store;

use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub use algorithm::{sm2, IntervalPreview, ReviewQuality, Sm2Params};
pub use catalog::{CardCatalog, CatalogCard, StaticCatalog};
pub use config::EngineConfig;
pub use due::DueSelector;
pub use memory::{CardKey, MemoryState, Versioned};
pub use session::{QueueItem, QueueItemKind, RecommendationEngine, SessionSizing, StudyQueue};
pub use stats::{CardCounts, ReviewStats, SessionOutcome, StatsResponse, StatsThresholds};
pub use store::{FileProgressStore, MemoryProgressStore, ProgressStore, PutOutcome};

use store::with_timeout;

#[derive(Error, Debug)]
pub enum SpacedRepetitionError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid review quality: {0}")]
    InvalidQuality(String),
    #[error("No progress record for {user_id}/{card_id}")]
    RecordNotFound { user_id: String, card_id: String },
    #[error("Concurrent modification of {key} (gave up after {attempts} attempts)")]
    ConcurrentModification { key: String, attempts: u32 },
    #[error("Progress store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("Invalid session size: {0}")]
    InvalidSessionSize(usize),
    #[error("Invalid session outcome: {correct} correct out of {total}")]
    InvalidSessionOutcome { correct: u32, total: u32 },
    #[error("Invalid memory state {key}: {reason}")]
    InvalidState { key: String, reason: String },
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl SpacedRepetitionError {
    /// Stable machine-readable error kind.
    pub fn code(&self) -> &'static str {
        match self {
            SpacedRepetitionError::Io(_) => "IO_ERROR",
            SpacedRepetitionError::Json(_) => "JSON_ERROR",
            SpacedRepetitionError::InvalidQuality(_) => "INVALID_QUALITY",
            SpacedRepetitionError::RecordNotFound { .. } => "RECORD_NOT_FOUND",
            SpacedRepetitionError::ConcurrentModification { .. } => "CONCURRENT_MODIFICATION",
            SpacedRepetitionError::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            SpacedRepetitionError::InvalidSessionSize(_) => "INVALID_SESSION_SIZE",
            SpacedRepetitionError::InvalidSessionOutcome { .. } => "INVALID_SESSION_OUTCOME",
            SpacedRepetitionError::InvalidState { .. } => "INVALID_STATE",
            SpacedRepetitionError::InvalidConfig(_) => "INVALID_CONFIG",
        }
    }

    /// Worth retrying later without changing the request.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SpacedRepetitionError::ConcurrentModification { .. }
                | SpacedRepetitionError::StoreUnavailable(_)
        )
    }
}

/// Application-facing entry point: orchestrates store reads and writes around
/// the pure scheduler.
///
/// Grading a card that has no record yet creates the initial state as of the
/// grading time and grades that; there is no separate "not found" path.
pub struct SpacedRepetitionService {
    store: Arc<dyn ProgressStore>,
    config: EngineConfig,
    due: DueSelector,
    engine: RecommendationEngine,
}

impl SpacedRepetitionService {
    pub fn new(
        store: Arc<dyn ProgressStore>,
        catalog: Arc<dyn CardCatalog>,
        config: EngineConfig,
    ) -> Result<Self, SpacedRepetitionError> {
        config.validate()?;
        let timeout = config.store_timeout();
        Ok(Self {
            due: DueSelector::new(store.clone(), timeout),
            engine: RecommendationEngine::new(
                store.clone(),
                catalog,
                config.session.clone(),
                timeout,
            ),
            store,
            config,
        })
    }

    /// File-backed service rooted at `<data_dir>/spaced_repetition`.
    pub async fn open(
        data_dir: &Path,
        catalog: Arc<dyn CardCatalog>,
    ) -> Result<Self, SpacedRepetitionError> {
        let sr_dir = data_dir.join("spaced_repetition");
        tokio::fs::create_dir_all(&sr_dir).await?;
        let config = EngineConfig::load(&sr_dir)?;
        let store = FileProgressStore::open(&sr_dir).await?;
        Self::new(Arc::new(store), catalog, config)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn timeout(&self) -> Duration {
        self.config.store_timeout()
    }

    async fn load(
        &self,
        key: &CardKey,
    ) -> Result<Option<Versioned<MemoryState>>, SpacedRepetitionError> {
        with_timeout(self.timeout(), "get", self.store.get(key)).await
    }

    async fn load_activity(
        &self,
        user_id: &str,
    ) -> Result<Option<Versioned<ReviewStats>>, SpacedRepetitionError> {
        let timeout = self.timeout();
        with_timeout(timeout, "get_activity", self.store.get_activity(user_id)).await
    }

    async fn save(
        &self,
        state: &MemoryState,
        expected_version: Option<u64>,
    ) -> Result<PutOutcome, SpacedRepetitionError> {
        with_timeout(self.timeout(), "put", self.store.put(state, expected_version)).await
    }

    /// First exposure of a card. Returns the existing state if there is one.
    pub async fn introduce_card(
        &self,
        user_id: &str,
        card_id: &str,
        now: DateTime<Utc>,
    ) -> Result<MemoryState, SpacedRepetitionError> {
        let key = CardKey::new(user_id, card_id);
        if let Some(existing) = self.load(&key).await? {
            return Ok(existing.value);
        }

        let state = MemoryState::new(user_id, card_id, now, self.config.sm2.initial_ease);
        match self.save(&state, None).await? {
            PutOutcome::Stored { .. } => {
                tracing::info!(%key, "introduced card");
                Ok(state)
            }
            // created concurrently; whichever write landed is the record
            PutOutcome::Conflict { .. } => match self.load(&key).await? {
                Some(existing) => Ok(existing.value),
                None => Err(SpacedRepetitionError::ConcurrentModification {
                    key: key.to_string(),
                    attempts: 1,
                }),
            },
        }
    }

    pub async fn grade_card(
        &self,
        user_id: &str,
        card_id: &str,
        quality: ReviewQuality,
        now: DateTime<Utc>,
    ) -> Result<MemoryState, SpacedRepetitionError> {
        self.grade_card_timed(user_id, card_id, quality, None, now).await
    }

    /// Read, apply SM-2, conditional write; re-read and retry on a version
    /// conflict, up to `max_write_attempts` attempts in total.
    pub async fn grade_card_timed(
        &self,
        user_id: &str,
        card_id: &str,
        quality: ReviewQuality,
        response_ms: Option<u64>,
        now: DateTime<Utc>,
    ) -> Result<MemoryState, SpacedRepetitionError> {
        let key = CardKey::new(user_id, card_id);
        let params = &self.config.sm2;
        let attempts = self.config.max_write_attempts;

        for attempt in 1..=attempts {
            let (current, expected) = match self.load(&key).await? {
                Some(record) => (record.value, Some(record.version)),
                None => {
                    tracing::debug!(%key, "no record yet, grading from the initial state");
                    (
                        MemoryState::new(user_id, card_id, now, params.initial_ease),
                        None,
                    )
                }
            };

            let mut next = sm2::update(&current, quality, now, params);
            next.last_response_ms = response_ms;

            match self.save(&next, expected).await? {
                PutOutcome::Stored { version } => {
                    tracing::info!(
                        %key,
                        %quality,
                        repetitions = next.repetitions,
                        interval_days = next.interval_days,
                        ease_factor = next.ease_factor,
                        version,
                        "graded card"
                    );
                    let recorded = self
                        .update_activity(user_id, |stats| {
                            stats.record_review(now, quality.is_correct(), response_ms)
                        })
                        .await;
                    if let Err(err) = recorded {
                        // the grade itself is durable; stats catch up on the next review
                        tracing::warn!(%key, error = %err, "failed to record review activity");
                    }
                    return Ok(next);
                }
                PutOutcome::Conflict { current } => {
                    tracing::debug!(%key, attempt, ?current, "version conflict while grading");
                }
            }
        }

        tracing::warn!(%key, attempts, "giving up on grading after repeated conflicts");
        Err(SpacedRepetitionError::ConcurrentModification {
            key: key.to_string(),
            attempts,
        })
    }

    /// Reinitializes an existing record to the creation defaults.
    pub async fn reset_card(
        &self,
        user_id: &str,
        card_id: &str,
        now: DateTime<Utc>,
    ) -> Result<MemoryState, SpacedRepetitionError> {
        let key = CardKey::new(user_id, card_id);
        let attempts = self.config.max_write_attempts;

        for _ in 0..attempts {
            let record = self
                .load(&key)
                .await?
                .ok_or_else(|| SpacedRepetitionError::RecordNotFound {
                    user_id: user_id.to_string(),
                    card_id: card_id.to_string(),
                })?;

            let mut state = record.value;
            state.reset(now, self.config.sm2.initial_ease);

            if self.save(&state, Some(record.version)).await?.is_stored() {
                tracing::info!(%key, "reset card");
                return Ok(state);
            }
        }

        Err(SpacedRepetitionError::ConcurrentModification {
            key: key.to_string(),
            attempts,
        })
    }

    /// Interval and ease each grade would produce right now.
    pub async fn preview(
        &self,
        user_id: &str,
        card_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<IntervalPreview>, SpacedRepetitionError> {
        let state = match self.load(&CardKey::new(user_id, card_id)).await? {
            Some(record) => record.value,
            None => MemoryState::new(user_id, card_id, now, self.config.sm2.initial_ease),
        };
        Ok(sm2::preview(&state, &self.config.sm2))
    }

    pub async fn find_due(
        &self,
        user_id: &str,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<MemoryState>, SpacedRepetitionError> {
        self.due.find_due(user_id, now, limit).await
    }

    /// `desired_size == None` uses the recommended size for the learner.
    pub async fn get_study_queue(
        &self,
        user_id: &str,
        desired_size: Option<usize>,
        now: DateTime<Utc>,
    ) -> Result<StudyQueue, SpacedRepetitionError> {
        let size = match desired_size {
            Some(size) => size,
            None => self.engine.optimal_session_size(user_id).await?,
        };
        self.engine.recommend(user_id, size, now).await
    }

    pub async fn optimal_session_size(
        &self,
        user_id: &str,
    ) -> Result<usize, SpacedRepetitionError> {
        self.engine.optimal_session_size(user_id).await
    }

    /// Records a finished session and returns the next recommended size.
    pub async fn complete_session(
        &self,
        user_id: &str,
        correct: u32,
        total: u32,
        now: DateTime<Utc>,
    ) -> Result<usize, SpacedRepetitionError> {
        let outcome = SessionOutcome::new(now, correct, total)?;
        let sizing = self.engine.sizing();
        let window = sizing.history_window;

        let stats = self
            .update_activity(user_id, |stats| {
                stats.record_session_complete(outcome.clone(), window)
            })
            .await?;

        let next = sizing.size_for(stats.recent_accuracy(window));
        tracing::info!(user_id, correct, total, next_session_size = next, "completed session");
        Ok(next)
    }

    pub async fn get_stats(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<StatsResponse, SpacedRepetitionError> {
        let states = with_timeout(
            self.timeout(),
            "query_by_user",
            self.store.query_by_user(user_id),
        )
        .await?;
        let activity = self
            .load_activity(user_id)
            .await?
            .map(|v| v.value)
            .unwrap_or_default();

        Ok(StatsResponse::build(
            user_id,
            &states,
            &activity,
            &self.config.stats,
            now,
        ))
    }

    async fn update_activity<F>(
        &self,
        user_id: &str,
        mut apply: F,
    ) -> Result<ReviewStats, SpacedRepetitionError>
    where
        F: FnMut(&mut ReviewStats) + Send,
    {
        let attempts = self.config.max_write_attempts;
        for _ in 0..attempts {
            let (mut stats, expected) = match self.load_activity(user_id).await? {
                Some(record) => (record.value, Some(record.version)),
                None => (ReviewStats::default(), None),
            };
            apply(&mut stats);

            let outcome = with_timeout(
                self.timeout(),
                "put_activity",
                self.store.put_activity(user_id, &stats, expected),
            )
            .await?;
            if outcome.is_stored() {
                return Ok(stats);
            }
        }

        Err(SpacedRepetitionError::ConcurrentModification {
            key: format!("{}/activity", user_id),
            attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::tempdir;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 9, 2, 18, 30, 0).unwrap()
    }

    fn catalog(ids: &[&str]) -> Arc<StaticCatalog> {
        Arc::new(StaticCatalog::new(
            ids.iter()
                .enumerate()
                .map(|(i, id)| CatalogCard::new(*id, 1, "verbs", i as u32))
                .collect(),
        ))
    }

    fn service_with(store: Arc<dyn ProgressStore>, ids: &[&str]) -> SpacedRepetitionService {
        SpacedRepetitionService::new(store, catalog(ids), EngineConfig::default()).unwrap()
    }

    fn service(ids: &[&str]) -> SpacedRepetitionService {
        service_with(Arc::new(MemoryProgressStore::new()), ids)
    }

    /// Reports a conflict for the first `conflicts` card writes.
    struct ConflictingStore {
        inner: MemoryProgressStore,
        conflicts: AtomicU32,
    }

    impl ConflictingStore {
        fn new(conflicts: u32) -> Self {
            Self {
                inner: MemoryProgressStore::new(),
                conflicts: AtomicU32::new(conflicts),
            }
        }
    }

    #[async_trait]
    impl ProgressStore for ConflictingStore {
        async fn get(
            &self,
            key: &CardKey,
        ) -> Result<Option<Versioned<MemoryState>>, SpacedRepetitionError> {
            self.inner.get(key).await
        }

        async fn put(
            &self,
            state: &MemoryState,
            expected_version: Option<u64>,
        ) -> Result<PutOutcome, SpacedRepetitionError> {
            let left = self.conflicts.load(Ordering::SeqCst);
            if left > 0 {
                self.conflicts.store(left - 1, Ordering::SeqCst);
                return Ok(PutOutcome::Conflict {
                    current: expected_version,
                });
            }
            self.inner.put(state, expected_version).await
        }

        async fn query_by_user(
            &self,
            user_id: &str,
        ) -> Result<Vec<MemoryState>, SpacedRepetitionError> {
            self.inner.query_by_user(user_id).await
        }

        async fn get_activity(
            &self,
            user_id: &str,
        ) -> Result<Option<Versioned<ReviewStats>>, SpacedRepetitionError> {
            self.inner.get_activity(user_id).await
        }

        async fn put_activity(
            &self,
            user_id: &str,
            stats: &ReviewStats,
            expected_version: Option<u64>,
        ) -> Result<PutOutcome, SpacedRepetitionError> {
            self.inner.put_activity(user_id, stats, expected_version).await
        }
    }

    struct DownStore;

    #[async_trait]
    impl ProgressStore for DownStore {
        async fn get(
            &self,
            _key: &CardKey,
        ) -> Result<Option<Versioned<MemoryState>>, SpacedRepetitionError> {
            Err(SpacedRepetitionError::StoreUnavailable("connection refused".into()))
        }

        async fn put(
            &self,
            _state: &MemoryState,
            _expected_version: Option<u64>,
        ) -> Result<PutOutcome, SpacedRepetitionError> {
            Err(SpacedRepetitionError::StoreUnavailable("connection refused".into()))
        }

        async fn query_by_user(
            &self,
            _user_id: &str,
        ) -> Result<Vec<MemoryState>, SpacedRepetitionError> {
            Err(SpacedRepetitionError::StoreUnavailable("connection refused".into()))
        }

        async fn get_activity(
            &self,
            _user_id: &str,
        ) -> Result<Option<Versioned<ReviewStats>>, SpacedRepetitionError> {
            Err(SpacedRepetitionError::StoreUnavailable("connection refused".into()))
        }

        async fn put_activity(
            &self,
            _user_id: &str,
            _stats: &ReviewStats,
            _expected_version: Option<u64>,
        ) -> Result<PutOutcome, SpacedRepetitionError> {
            Err(SpacedRepetitionError::StoreUnavailable("connection refused".into()))
        }
    }

    /// Card writes go through; every activity write fails.
    #[derive(Default)]
    struct ActivityDownStore {
        inner: MemoryProgressStore,
    }

    #[async_trait]
    impl ProgressStore for ActivityDownStore {
        async fn get(
            &self,
            key: &CardKey,
        ) -> Result<Option<Versioned<MemoryState>>, SpacedRepetitionError> {
            self.inner.get(key).await
        }

        async fn put(
            &self,
            state: &MemoryState,
            expected_version: Option<u64>,
        ) -> Result<PutOutcome, SpacedRepetitionError> {
            self.inner.put(state, expected_version).await
        }

        async fn query_by_user(
            &self,
            user_id: &str,
        ) -> Result<Vec<MemoryState>, SpacedRepetitionError> {
            self.inner.query_by_user(user_id).await
        }

        async fn get_activity(
            &self,
            user_id: &str,
        ) -> Result<Option<Versioned<ReviewStats>>, SpacedRepetitionError> {
            self.inner.get_activity(user_id).await
        }

        async fn put_activity(
            &self,
            _user_id: &str,
            _stats: &ReviewStats,
            _expected_version: Option<u64>,
        ) -> Result<PutOutcome, SpacedRepetitionError> {
            Err(SpacedRepetitionError::StoreUnavailable("disk full".into()))
        }
    }

    #[tokio::test]
    async fn test_grade_unknown_card_creates_it() {
        let service = service(&[]);
        let state = service
            .grade_card("u1", "c1", ReviewQuality::Correct, ts())
            .await
            .unwrap();

        assert_eq!(state.repetitions, 1);
        assert_eq!(state.interval_days, 1);
        assert_eq!(state.created_at, ts());
        assert_eq!(state.due_at(), ts() + ChronoDuration::days(1));
    }

    #[tokio::test]
    async fn test_grade_sequence_persists() {
        let service = service(&[]);
        service.introduce_card("u1", "c1", ts()).await.unwrap();

        let mut now = ts();
        for _ in 0..3 {
            let state = service
                .grade_card("u1", "c1", ReviewQuality::CorrectEasy, now)
                .await
                .unwrap();
            now = state.due_at();
        }

        let stored = service.store.get(&CardKey::new("u1", "c1")).await.unwrap().unwrap();
        assert_eq!(stored.version, 4);
        assert_eq!(stored.value.repetitions, 3);
        assert_eq!(stored.value.interval_days, 17); // 1, 6, round(6 * 2.8)
        assert_eq!(stored.value.total_reviews, 3);
    }

    #[tokio::test]
    async fn test_grade_retries_after_conflict() {
        let service = service_with(Arc::new(ConflictingStore::new(2)), &[]);
        let state = service
            .grade_card("u1", "c1", ReviewQuality::Correct, ts())
            .await
            .unwrap();
        assert_eq!(state.total_reviews, 1);
    }

    #[tokio::test]
    async fn test_grade_gives_up_after_max_attempts() {
        let service = service_with(Arc::new(ConflictingStore::new(3)), &[]);
        let err = service
            .grade_card("u1", "c1", ReviewQuality::Correct, ts())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            SpacedRepetitionError::ConcurrentModification { attempts: 3, .. }
        ));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_concurrent_grades_are_not_lost() {
        let service = service(&[]);
        service.introduce_card("u1", "c1", ts()).await.unwrap();

        let (a, b) = futures::future::join(
            service.grade_card("u1", "c1", ReviewQuality::Correct, ts()),
            service.grade_card("u1", "c1", ReviewQuality::Correct, ts()),
        )
        .await;
        a.unwrap();
        b.unwrap();

        let stored = service.store.get(&CardKey::new("u1", "c1")).await.unwrap().unwrap();
        assert_eq!(stored.value.total_reviews, 2);
        assert_eq!(stored.value.repetitions, 2);
    }

    #[tokio::test]
    async fn test_store_outage_is_an_error() {
        let service = service_with(Arc::new(DownStore), &["c1"]);

        let err = service.get_study_queue("u1", Some(5), ts()).await.unwrap_err();
        assert!(matches!(err, SpacedRepetitionError::StoreUnavailable(_)));

        let err = service
            .grade_card("u1", "c1", ReviewQuality::Correct, ts())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "STORE_UNAVAILABLE");
    }

    #[tokio::test]
    async fn test_grade_survives_failed_activity_write() {
        let store = Arc::new(ActivityDownStore::default());
        let service = service_with(store.clone(), &[]);

        let state = service
            .grade_card("u1", "c1", ReviewQuality::CorrectHard, ts())
            .await
            .unwrap();
        assert_eq!(state.repetitions, 1);

        let stored = store.get(&CardKey::new("u1", "c1")).await.unwrap().unwrap();
        assert_eq!(stored.version, 1);
        assert_eq!(stored.value, state);
        assert!(store.get_activity("u1").await.unwrap().is_none());

        // session bookkeeping reports the outage
        assert!(matches!(
            service.complete_session("u1", 1, 1, ts()).await,
            Err(SpacedRepetitionError::StoreUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_introduce_is_idempotent() {
        let service = service(&[]);
        let first = service.introduce_card("u1", "c1", ts()).await.unwrap();
        let later = ts() + ChronoDuration::days(3);
        let second = service.introduce_card("u1", "c1", later).await.unwrap();

        assert_eq!(first, second);
        assert!(first.is_new());
    }

    #[tokio::test]
    async fn test_reset_card() {
        let service = service(&[]);
        assert!(matches!(
            service.reset_card("u1", "c1", ts()).await,
            Err(SpacedRepetitionError::RecordNotFound { .. })
        ));

        service
            .grade_card("u1", "c1", ReviewQuality::CorrectEasy, ts())
            .await
            .unwrap();
        let later = ts() + ChronoDuration::days(2);
        let state = service.reset_card("u1", "c1", later).await.unwrap();

        assert_eq!(state, MemoryState::new("u1", "c1", later, 2.5));
    }

    #[tokio::test]
    async fn test_study_queue_mixes_due_and_new() {
        let service = service(&["c1", "c2", "c3", "c4", "c5", "c6"]);
        service
            .grade_card("u1", "c1", ReviewQuality::Correct, ts())
            .await
            .unwrap();

        let tomorrow = ts() + ChronoDuration::days(1);
        let queue = service
            .get_study_queue("u1", Some(5), tomorrow)
            .await
            .unwrap();

        assert_eq!(queue.card_ids(), vec!["c1", "c2", "c3", "c4", "c5"]);
        assert_eq!(queue.due_count(), 1);
    }

    #[tokio::test]
    async fn test_study_queue_default_size_follows_history() {
        let ids: Vec<String> = (0..40).map(|i| format!("c{:02}", i)).collect();
        let refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        let service = service(&refs);

        let queue = service.get_study_queue("u1", None, ts()).await.unwrap();
        assert_eq!(queue.items.len(), 15);

        let next = service.complete_session("u1", 0, 10, ts()).await.unwrap();
        assert_eq!(next, 5);
        let queue = service.get_study_queue("u1", None, ts()).await.unwrap();
        assert_eq!(queue.items.len(), 5);

        assert!(matches!(
            service.get_study_queue("u1", Some(0), ts()).await,
            Err(SpacedRepetitionError::InvalidSessionSize(0))
        ));
    }

    #[tokio::test]
    async fn test_complete_session_rejects_bad_outcome() {
        let service = service(&[]);
        assert!(matches!(
            service.complete_session("u1", 4, 3, ts()).await,
            Err(SpacedRepetitionError::InvalidSessionOutcome { .. })
        ));
    }

    #[tokio::test]
    async fn test_stats_after_reviews() {
        let service = service(&[]);
        service.introduce_card("u1", "fresh", ts()).await.unwrap();
        service
            .grade_card("u1", "c1", ReviewQuality::Correct, ts())
            .await
            .unwrap();
        service
            .grade_card_timed("u1", "c2", ReviewQuality::IncorrectHard, Some(800), ts())
            .await
            .unwrap();

        let stats = service.get_stats("u1", ts()).await.unwrap();
        assert_eq!(stats.counts.total, 3);
        assert_eq!(stats.counts.new, 1);
        assert_eq!(stats.counts.learning, 2);
        assert_eq!(stats.total_reviews, 2);
        assert_eq!(stats.correct_reviews, 1);
        assert_eq!(stats.today_reviews, 2);
        assert_eq!(stats.average_response_ms, Some(800));
        assert_eq!(stats.current_streak, 1);
        assert_eq!(stats.due, 0);
    }

    #[tokio::test]
    async fn test_preview_of_unknown_card() {
        let service = service(&[]);
        let preview = service.preview("u1", "c1", ts()).await.unwrap();
        assert_eq!(preview.len(), 6);
        assert!(preview.iter().all(|p| p.interval_days == 1));
    }

    #[tokio::test]
    async fn test_open_persists_between_instances() {
        let dir = tempdir().unwrap();

        {
            let service = SpacedRepetitionService::open(dir.path(), catalog(&[]))
                .await
                .unwrap();
            service
                .grade_card("u1", "c1", ReviewQuality::Correct, ts())
                .await
                .unwrap();
        }

        let service = SpacedRepetitionService::open(dir.path(), catalog(&[]))
            .await
            .unwrap();
        let due = service
            .find_due("u1", 10, ts() + ChronoDuration::days(1))
            .await
            .unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].card_id, "c1");
    }

    #[test]
    fn test_error_codes() {
        let err = SpacedRepetitionError::InvalidQuality("9".into());
        assert_eq!(err.code(), "INVALID_QUALITY");
        assert!(!err.is_transient());
        assert_eq!(err.to_string(), "Invalid review quality: 9");
    }
}
