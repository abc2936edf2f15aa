use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::catalog::CardCatalog;
use super::due::DueSelector;
use super::store::{with_timeout, ProgressStore};
use super::SpacedRepetitionError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QueueItemKind {
    Due,
    New,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueItem {
    pub card_id: String,
    pub kind: QueueItemKind,
    /// Set for due cards only.
    pub due_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudyQueue {
    pub id: String,
    pub user_id: String,
    pub generated_at: DateTime<Utc>,
    pub items: Vec<QueueItem>,
}

impl StudyQueue {
    pub fn new(user_id: &str, generated_at: DateTime<Utc>, items: Vec<QueueItem>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            generated_at,
            items,
        }
    }

    pub fn card_ids(&self) -> Vec<&str> {
        self.items.iter().map(|i| i.card_id.as_str()).collect()
    }

    pub fn due_count(&self) -> usize {
        self.items
            .iter()
            .filter(|i| i.kind == QueueItemKind::Due)
            .count()
    }

    pub fn new_count(&self) -> usize {
        self.items.len() - self.due_count()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Session size bounds. The recommended size grows linearly with the mean
/// accuracy of the last `history_window` sessions, from `min_session_size`
/// at 0% to `max_session_size` at 100%.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionSizing {
    pub min_session_size: usize,
    pub max_session_size: usize,
    /// Used until the learner has finished a session.
    pub default_session_size: usize,
    pub history_window: usize,
}

impl Default for SessionSizing {
    fn default() -> Self {
        Self {
            min_session_size: 5,
            max_session_size: 30,
            default_session_size: 15,
            history_window: 5,
        }
    }
}

impl SessionSizing {
    pub fn validate(&self) -> Result<(), SpacedRepetitionError> {
        if self.min_session_size == 0
            || self.max_session_size < self.min_session_size
            || !(self.min_session_size..=self.max_session_size).contains(&self.default_session_size)
            || self.history_window == 0
        {
            return Err(SpacedRepetitionError::InvalidConfig(
                "session sizing must satisfy 0 < min <= default <= max and history_window > 0"
                    .to_string(),
            ));
        }
        Ok(())
    }

    pub fn size_for(&self, accuracy: Option<f64>) -> usize {
        let Some(accuracy) = accuracy.filter(|a| a.is_finite()) else {
            return self.default_session_size;
        };
        let span = (self.max_session_size - self.min_session_size) as f64;
        let size = self.min_session_size + (accuracy.clamp(0.0, 1.0) * span).round() as usize;
        size.clamp(self.min_session_size, self.max_session_size)
    }
}

pub struct RecommendationEngine {
    store: Arc<dyn ProgressStore>,
    catalog: Arc<dyn CardCatalog>,
    sizing: SessionSizing,
    timeout: Duration,
}

impl RecommendationEngine {
    pub fn new(
        store: Arc<dyn ProgressStore>,
        catalog: Arc<dyn CardCatalog>,
        sizing: SessionSizing,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            catalog,
            sizing,
            timeout,
        }
    }

    pub fn sizing(&self) -> &SessionSizing {
        &self.sizing
    }

    /// Due cards first, then never-reviewed cards in catalog order. Cards that
    /// were introduced but are missing from the catalog follow, oldest first.
    pub async fn recommend(
        &self,
        user_id: &str,
        session_size: usize,
        now: DateTime<Utc>,
    ) -> Result<StudyQueue, SpacedRepetitionError> {
        if session_size == 0 {
            return Err(SpacedRepetitionError::InvalidSessionSize(session_size));
        }

        let states = with_timeout(
            self.timeout,
            "query_by_user",
            self.store.query_by_user(user_id),
        )
        .await?;

        let reviewed: HashSet<&str> = states
            .iter()
            .filter(|s| !s.is_new())
            .map(|s| s.card_id.as_str())
            .collect();
        let mut introduced: Vec<_> = states.iter().filter(|s| s.is_new()).collect();
        introduced.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.card_id.cmp(&b.card_id))
        });

        let mut items: Vec<QueueItem> = DueSelector::select(states.clone(), now, session_size)
            .into_iter()
            .map(|s| QueueItem {
                due_at: Some(s.due_at()),
                card_id: s.card_id,
                kind: QueueItemKind::Due,
            })
            .collect();
        let due = items.len();

        let mut queued: HashSet<String> = items.iter().map(|i| i.card_id.clone()).collect();
        let catalog_ids = self.catalog.ordered_cards().iter().map(|c| c.card_id.as_str());
        let introduced_ids = introduced.iter().map(|s| s.card_id.as_str());

        for card_id in catalog_ids.chain(introduced_ids) {
            if items.len() >= session_size {
                break;
            }
            if reviewed.contains(card_id) || !queued.insert(card_id.to_string()) {
                continue;
            }
            items.push(QueueItem {
                card_id: card_id.to_string(),
                kind: QueueItemKind::New,
                due_at: None,
            });
        }

        tracing::debug!(
            user_id,
            session_size,
            due,
            new = items.len() - due,
            "built study queue"
        );
        Ok(StudyQueue::new(user_id, now, items))
    }

    pub async fn optimal_session_size(
        &self,
        user_id: &str,
    ) -> Result<usize, SpacedRepetitionError> {
        let activity = with_timeout(
            self.timeout,
            "get_activity",
            self.store.get_activity(user_id),
        )
        .await?;
        let accuracy = activity.and_then(|a| a.value.recent_accuracy(self.sizing.history_window));
        Ok(self.sizing.size_for(accuracy))
    }
}
