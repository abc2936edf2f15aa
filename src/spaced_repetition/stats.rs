use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

use super::memory::MemoryState;
use super::SpacedRepetitionError;

/// Per-user review activity: daily tallies, streaks and recent session results.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ReviewStats {
    pub total_reviews: u64,
    pub correct_reviews: u64,
    pub reviews_by_date: HashMap<String, DailyStats>,
    pub streak: StreakData,
    #[serde(default)]
    pub recent_sessions: VecDeque<SessionOutcome>,
    /// Time of the last recorded event; `None` until the first one.
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DailyStats {
    pub date: String,
    pub reviewed: u32,
    pub correct: u32,
    pub incorrect: u32,
    #[serde(default)]
    pub total_response_ms: u64,
    #[serde(default)]
    pub timed_reviews: u32,
    pub completed_sessions: u32,
}

impl DailyStats {
    pub fn new(date: String) -> Self {
        Self {
            date,
            reviewed: 0,
            correct: 0,
            incorrect: 0,
            total_response_ms: 0,
            timed_reviews: 0,
            completed_sessions: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct StreakData {
    pub current_streak: u32,
    pub longest_streak: u32,
    pub last_review_date: Option<String>,
    pub streak_start_date: Option<String>,
}

/// Result of one finished study session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionOutcome {
    pub completed_at: DateTime<Utc>,
    pub correct: u32,
    pub total: u32,
}

impl SessionOutcome {
    pub fn new(
        completed_at: DateTime<Utc>,
        correct: u32,
        total: u32,
    ) -> Result<Self, SpacedRepetitionError> {
        if total == 0 || correct > total {
            return Err(SpacedRepetitionError::InvalidSessionOutcome { correct, total });
        }
        Ok(Self {
            completed_at,
            correct,
            total,
        })
    }

    pub fn accuracy(&self) -> f64 {
        f64::from(self.correct) / f64::from(self.total)
    }
}

fn date_key(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d").to_string()
}

impl ReviewStats {
    fn daily_mut(&mut self, at: DateTime<Utc>) -> &mut DailyStats {
        let date_str = date_key(at);
        self.reviews_by_date
            .entry(date_str.clone())
            .or_insert_with(|| DailyStats::new(date_str))
    }

    pub fn record_review(&mut self, at: DateTime<Utc>, correct: bool, response_ms: Option<u64>) {
        self.total_reviews += 1;
        if correct {
            self.correct_reviews += 1;
        }
        self.updated_at = Some(at);

        let daily = self.daily_mut(at);
        daily.reviewed += 1;
        if correct {
            daily.correct += 1;
        } else {
            daily.incorrect += 1;
        }
        if let Some(ms) = response_ms {
            daily.total_response_ms += ms;
            daily.timed_reviews += 1;
        }

        self.update_streak(&date_key(at));
    }

    /// Keeps at most `keep` outcomes, newest last.
    pub fn record_session_complete(&mut self, outcome: SessionOutcome, keep: usize) {
        self.daily_mut(outcome.completed_at).completed_sessions += 1;
        self.updated_at = Some(outcome.completed_at);
        self.recent_sessions.push_back(outcome);
        while self.recent_sessions.len() > keep {
            self.recent_sessions.pop_front();
        }
    }

    /// Mean accuracy of the last `window` completed sessions.
    pub fn recent_accuracy(&self, window: usize) -> Option<f64> {
        let recent: Vec<f64> = self
            .recent_sessions
            .iter()
            .rev()
            .take(window)
            .map(SessionOutcome::accuracy)
            .collect();
        if recent.is_empty() {
            return None;
        }
        Some(recent.iter().sum::<f64>() / recent.len() as f64)
    }

    pub fn accuracy(&self) -> Option<f64> {
        (self.total_reviews > 0).then(|| self.correct_reviews as f64 / self.total_reviews as f64)
    }

    fn update_streak(&mut self, date_str: &str) {
        let today = date_str.to_string();

        match &self.streak.last_review_date {
            None => {
                self.streak.current_streak = 1;
                self.streak.streak_start_date = Some(today.clone());
            }
            Some(last_date) => {
                if last_date == &today {
                    return;
                }

                let last = NaiveDate::parse_from_str(last_date, "%Y-%m-%d").ok();
                let current = NaiveDate::parse_from_str(&today, "%Y-%m-%d").ok();

                if let (Some(last), Some(current)) = (last, current) {
                    let diff = current.signed_duration_since(last).num_days();

                    if diff == 1 {
                        self.streak.current_streak += 1;
                    } else if diff > 1 {
                        self.streak.current_streak = 1;
                        self.streak.streak_start_date = Some(today.clone());
                    } else {
                        // out-of-order event; the streak is anchored on the latest day
                        return;
                    }
                }
            }
        }

        self.streak.last_review_date = Some(today);

        if self.streak.current_streak > self.streak.longest_streak {
            self.streak.longest_streak = self.streak.current_streak;
        }
    }

    /// Streak as seen on `today`: zero once a whole day has been skipped.
    pub fn live_streak(&self, today: NaiveDate) -> u32 {
        let Some(last) = self
            .streak
            .last_review_date
            .as_deref()
            .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
        else {
            return 0;
        };
        if today.signed_duration_since(last).num_days() <= 1 {
            self.streak.current_streak
        } else {
            0
        }
    }

    pub fn get_weekly_stats(&self, today: NaiveDate) -> Vec<&DailyStats> {
        (0..7)
            .filter_map(|i| {
                let date = today - Duration::days(i);
                self.reviews_by_date
                    .get(&date.format("%Y-%m-%d").to_string())
            })
            .collect()
    }

    pub fn average_response_ms(&self) -> Option<u64> {
        let (total, count) = self
            .reviews_by_date
            .values()
            .fold((0u64, 0u64), |(t, c), d| {
                (t + d.total_response_ms, c + u64::from(d.timed_reviews))
            });
        (count > 0).then(|| total / count)
    }
}

/// Interval thresholds used to bucket cards for reporting.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StatsThresholds {
    /// Reviewed cards below this interval are still learning.
    pub learning_interval_days: u32,
    /// Cards at or above this interval count as mastered.
    pub mastered_interval_days: u32,
}

impl Default for StatsThresholds {
    fn default() -> Self {
        Self {
            learning_interval_days: 7,
            mastered_interval_days: 21,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CardBucket {
    New,
    Learning,
    Reviewing,
    Mastered,
}

impl StatsThresholds {
    pub fn validate(&self) -> Result<(), SpacedRepetitionError> {
        if self.learning_interval_days == 0
            || self.mastered_interval_days < self.learning_interval_days
        {
            return Err(SpacedRepetitionError::InvalidConfig(
                "stats thresholds must satisfy 0 < learning <= mastered".to_string(),
            ));
        }
        Ok(())
    }

    pub fn bucket(&self, state: &MemoryState) -> CardBucket {
        if state.is_new() {
            CardBucket::New
        } else if state.repetitions == 0 || state.interval_days < self.learning_interval_days {
            CardBucket::Learning
        } else if state.interval_days < self.mastered_interval_days {
            CardBucket::Reviewing
        } else {
            CardBucket::Mastered
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CardCounts {
    pub new: usize,
    pub learning: usize,
    pub reviewing: usize,
    pub mastered: usize,
    pub total: usize,
}

impl CardCounts {
    pub fn tally<'a>(
        states: impl IntoIterator<Item = &'a MemoryState>,
        thresholds: &StatsThresholds,
    ) -> Self {
        let mut counts = CardCounts::default();
        for state in states {
            match thresholds.bucket(state) {
                CardBucket::New => counts.new += 1,
                CardBucket::Learning => counts.learning += 1,
                CardBucket::Reviewing => counts.reviewing += 1,
                CardBucket::Mastered => counts.mastered += 1,
            }
            counts.total += 1;
        }
        counts
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsResponse {
    pub user_id: String,
    pub counts: CardCounts,
    pub due: usize,
    pub total_reviews: u64,
    pub correct_reviews: u64,
    pub accuracy: Option<f64>,
    pub current_streak: u32,
    pub longest_streak: u32,
    pub today_reviews: u32,
    pub week_reviews: u32,
    pub average_response_ms: Option<u64>,
}

impl StatsResponse {
    pub fn build(
        user_id: &str,
        states: &[MemoryState],
        activity: &ReviewStats,
        thresholds: &StatsThresholds,
        now: DateTime<Utc>,
    ) -> Self {
        let today = now.date_naive();
        let due = states
            .iter()
            .filter(|s| !s.is_new() && s.is_due(now))
            .count();
        let today_reviews = activity
            .reviews_by_date
            .get(&date_key(now))
            .map(|d| d.reviewed)
            .unwrap_or(0);
        let week_reviews = activity
            .get_weekly_stats(today)
            .iter()
            .map(|d| d.reviewed)
            .sum();

        Self {
            user_id: user_id.to_string(),
            counts: CardCounts::tally(states, thresholds),
            due,
            total_reviews: activity.total_reviews,
            correct_reviews: activity.correct_reviews,
            accuracy: activity.accuracy(),
            current_streak: activity.live_streak(today),
            longest_streak: activity.streak.longest_streak,
            today_reviews,
            week_reviews,
            average_response_ms: activity.average_response_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 4, d, 10, 0, 0).unwrap()
    }

    fn card(id: &str, repetitions: u32, interval_days: u32) -> MemoryState {
        let mut s = MemoryState::new("u1", id, day(1), 2.5);
        if interval_days > 0 {
            s.repetitions = repetitions;
            s.interval_days = interval_days;
            s.last_reviewed_at = Some(day(1));
            s.correct_count = 1;
            s.total_reviews = 1;
        }
        s
    }

    #[test]
    fn test_default_stats() {
        let stats = ReviewStats::default();
        assert_eq!(stats.total_reviews, 0);
        assert_eq!(stats.streak.current_streak, 0);
        assert!(stats.accuracy().is_none());
        assert!(stats.updated_at.is_none());
        assert_eq!(stats, ReviewStats::default());
    }

    #[test]
    fn test_record_review() {
        let mut stats = ReviewStats::default();
        stats.record_review(day(1), true, Some(1200));
        stats.record_review(day(1), false, None);

        assert_eq!(stats.total_reviews, 2);
        assert_eq!(stats.correct_reviews, 1);
        assert_eq!(stats.accuracy(), Some(0.5));
        assert_eq!(stats.average_response_ms(), Some(1200));

        let daily = stats.reviews_by_date.get("2024-04-01").unwrap();
        assert_eq!(daily.reviewed, 2);
        assert_eq!(daily.incorrect, 1);
        assert_eq!(stats.updated_at, Some(day(1)));
    }

    #[test]
    fn test_streak_same_day() {
        let mut stats = ReviewStats::default();
        stats.record_review(day(3), true, None);
        stats.record_review(day(3), true, None);
        stats.record_review(day(3), false, None);
        assert_eq!(stats.streak.current_streak, 1);
    }

    #[test]
    fn test_streak_consecutive_and_broken() {
        let mut stats = ReviewStats::default();
        stats.record_review(day(1), true, None);
        stats.record_review(day(2), true, None);
        stats.record_review(day(3), true, None);
        assert_eq!(stats.streak.current_streak, 3);

        stats.record_review(day(6), true, None);
        assert_eq!(stats.streak.current_streak, 1);
        assert_eq!(stats.streak.longest_streak, 3);
        assert_eq!(stats.streak.streak_start_date.as_deref(), Some("2024-04-06"));
    }

    #[test]
    fn test_live_streak_expires() {
        let mut stats = ReviewStats::default();
        stats.record_review(day(1), true, None);
        stats.record_review(day(2), true, None);

        assert_eq!(stats.live_streak(day(3).date_naive()), 2);
        assert_eq!(stats.live_streak(day(4).date_naive()), 0);
    }

    #[test]
    fn test_session_history_window() {
        let mut stats = ReviewStats::default();
        for correct in [2, 4, 6, 8] {
            let outcome = SessionOutcome::new(day(1), correct, 8).unwrap();
            stats.record_session_complete(outcome, 3);
        }

        assert_eq!(stats.recent_sessions.len(), 3);
        // last two: 0.75 and 1.0
        assert_eq!(stats.recent_accuracy(2), Some(0.875));
        let daily = stats.reviews_by_date.get("2024-04-01").unwrap();
        assert_eq!(daily.completed_sessions, 4);
    }

    #[test]
    fn test_session_outcome_validation() {
        assert!(SessionOutcome::new(day(1), 3, 0).is_err());
        assert!(SessionOutcome::new(day(1), 5, 4).is_err());
        assert!(SessionOutcome::new(day(1), 0, 4).is_ok());
    }

    #[test]
    fn test_buckets() {
        let thresholds = StatsThresholds::default();
        let mut lapsed = card("lapsed", 0, 1);
        lapsed.incorrect_count = 1;

        assert_eq!(thresholds.bucket(&card("n", 0, 0)), CardBucket::New);
        assert_eq!(thresholds.bucket(&lapsed), CardBucket::Learning);
        assert_eq!(thresholds.bucket(&card("l", 2, 6)), CardBucket::Learning);
        assert_eq!(thresholds.bucket(&card("r", 3, 7)), CardBucket::Reviewing);
        assert_eq!(thresholds.bucket(&card("r2", 3, 20)), CardBucket::Reviewing);
        assert_eq!(thresholds.bucket(&card("m", 5, 21)), CardBucket::Mastered);
    }

    #[test]
    fn test_stats_response() {
        let states = vec![
            card("a", 0, 0),
            card("b", 1, 1),
            card("c", 3, 15),
            card("d", 6, 40),
        ];
        let mut activity = ReviewStats::default();
        activity.record_review(day(2), true, None);
        activity.record_review(day(3), true, None);

        let response =
            StatsResponse::build("u1", &states, &activity, &StatsThresholds::default(), day(3));

        assert_eq!(
            response.counts,
            CardCounts {
                new: 1,
                learning: 1,
                reviewing: 1,
                mastered: 1,
                total: 4
            }
        );
        // only "b" (due on day 2) is due on day 3
        assert_eq!(response.due, 1);
        assert_eq!(response.today_reviews, 1);
        assert_eq!(response.week_reviews, 2);
        assert_eq!(response.current_streak, 2);
    }

    #[test]
    fn test_threshold_validation() {
        assert!(StatsThresholds::default().validate().is_ok());
        let bad = StatsThresholds {
            learning_interval_days: 30,
            mastered_interval_days: 21,
        };
        assert!(bad.validate().is_err());
    }
}
