//! Due-card selection.
//!
//! Only cards that have been reviewed at least once are considered here; cards
//! that were introduced but never graded are "new" and are handed out by the
//! recommendation engine instead.

use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;

use super::memory::MemoryState;
use super::store::{with_timeout, ProgressStore};
use super::SpacedRepetitionError;

pub struct DueSelector {
    store: Arc<dyn ProgressStore>,
    timeout: Duration,
}

impl DueSelector {
    pub fn new(store: Arc<dyn ProgressStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Most overdue first, then lowest ease factor, at most `limit` entries.
    ///
    /// Reads go straight to the store without coordination with writers, so a
    /// card graded a moment ago may still show up as due.
    pub async fn find_due(
        &self,
        user_id: &str,
        as_of: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<MemoryState>, SpacedRepetitionError> {
        let states = with_timeout(
            self.timeout,
            "query_by_user",
            self.store.query_by_user(user_id),
        )
        .await?;
        let due = Self::select(states, as_of, limit);
        tracing::debug!(user_id, due = due.len(), limit, "selected due cards");
        Ok(due)
    }

    pub async fn count_due(
        &self,
        user_id: &str,
        as_of: DateTime<Utc>,
    ) -> Result<usize, SpacedRepetitionError> {
        let states = with_timeout(
            self.timeout,
            "query_by_user",
            self.store.query_by_user(user_id),
        )
        .await?;
        Ok(states.iter().filter(|s| is_due_review(s, as_of)).count())
    }

    /// Ordering and truncation over an already-loaded set of records.
    pub fn select(
        states: Vec<MemoryState>,
        as_of: DateTime<Utc>,
        limit: usize,
    ) -> Vec<MemoryState> {
        let mut due: Vec<_> = states
            .into_iter()
            .filter(|s| is_due_review(s, as_of))
            .collect();

        due.sort_by(|a, b| {
            a.due_at()
                .cmp(&b.due_at())
                .then_with(|| {
                    a.ease_factor
                        .partial_cmp(&b.ease_factor)
                        .unwrap_or(Ordering::Equal)
                })
                .then_with(|| a.card_id.cmp(&b.card_id))
        });
        due.truncate(limit);
        due
    }
}

fn is_due_review(state: &MemoryState, as_of: DateTime<Utc>) -> bool {
    !state.is_new() && state.is_due(as_of)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spaced_repetition::store::MemoryProgressStore;
    use chrono::{Duration as ChronoDuration, TimeZone};

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap()
    }

    fn reviewed(card: &str, due_days_ago: i64, ease: f64) -> MemoryState {
        let mut s = MemoryState::new("u1", card, ts() - ChronoDuration::days(90), 2.5);
        s.repetitions = 2;
        s.interval_days = 6;
        s.ease_factor = ease;
        s.correct_count = 2;
        s.total_reviews = 2;
        s.last_reviewed_at = Some(ts() - ChronoDuration::days(6 + due_days_ago));
        s
    }

    #[test]
    fn test_select_orders_most_overdue_first() {
        let states = vec![
            reviewed("a", 1, 2.5),
            reviewed("b", 5, 2.5),
            reviewed("c", 3, 2.5),
        ];
        let due = DueSelector::select(states, ts(), 2);

        assert_eq!(due.len(), 2);
        assert_eq!(due[0].card_id, "b");
        assert_eq!(due[1].card_id, "c");
    }

    #[test]
    fn test_select_breaks_ties_by_lowest_ease() {
        let states = vec![
            reviewed("easy", 2, 2.8),
            reviewed("hard", 2, 1.4),
            reviewed("mid", 2, 2.0),
        ];
        let due = DueSelector::select(states, ts(), 10);
        let ids: Vec<_> = due.iter().map(|s| s.card_id.as_str()).collect();

        assert_eq!(ids, vec!["hard", "mid", "easy"]);
    }

    #[test]
    fn test_select_skips_future_and_new_cards() {
        let states = vec![
            reviewed("due", 0, 2.5),
            reviewed("future", -2, 2.5),
            MemoryState::new("u1", "fresh", ts() - ChronoDuration::days(1), 2.5),
        ];
        let due = DueSelector::select(states, ts(), 10);

        assert_eq!(due.len(), 1);
        assert_eq!(due[0].card_id, "due");
    }

    #[test]
    fn test_select_does_not_pad() {
        let due = DueSelector::select(vec![reviewed("a", 1, 2.5)], ts(), 5);
        assert_eq!(due.len(), 1);
    }

    #[tokio::test]
    async fn test_find_due_reads_only_the_user() {
        let store = Arc::new(MemoryProgressStore::new());
        for state in [reviewed("a", 1, 2.5), reviewed("b", 4, 2.5), reviewed("c", 2, 2.5)] {
            store.put(&state, None).await.unwrap();
        }
        let mut other = reviewed("x", 10, 2.5);
        other.user_id = "u2".to_string();
        store.put(&other, None).await.unwrap();

        let selector = DueSelector::new(store, Duration::from_secs(1));
        let due = selector.find_due("u1", ts(), 2).await.unwrap();
        let ids: Vec<_> = due.iter().map(|s| s.card_id.as_str()).collect();

        assert_eq!(ids, vec!["b", "c"]);
        assert_eq!(selector.count_due("u1", ts()).await.unwrap(), 3);
    }
}
