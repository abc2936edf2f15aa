use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::algorithm::ReviewQuality;
use super::SpacedRepetitionError;

const EASE_FLOOR: f64 = 1.3;

/// Identity of a memory record: one per user and card.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CardKey {
    pub user_id: String,
    pub card_id: String,
}

impl CardKey {
    pub fn new(user_id: impl Into<String>, card_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            card_id: card_id.into(),
        }
    }
}

impl fmt::Display for CardKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.user_id, self.card_id)
    }
}

/// Per-user-per-card scheduling state.
///
/// The due date is never stored: it is derived from `last_reviewed_at` and
/// `interval_days`, or equals `created_at` for a card that was never reviewed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemoryState {
    pub user_id: String,
    pub card_id: String,
    /// Consecutive correct recalls since the last lapse.
    pub repetitions: u32,
    pub ease_factor: f64,
    pub interval_days: u32,
    /// First exposure, or the last reset.
    pub created_at: DateTime<Utc>,
    /// `None` until the first grading event.
    pub last_reviewed_at: Option<DateTime<Utc>>,
    pub correct_count: u64,
    pub incorrect_count: u64,
    pub total_reviews: u64,
    #[serde(default)]
    pub last_quality: Option<ReviewQuality>,
    #[serde(default)]
    pub last_response_ms: Option<u64>,
}

impl MemoryState {
    pub fn new(
        user_id: impl Into<String>,
        card_id: impl Into<String>,
        now: DateTime<Utc>,
        initial_ease: f64,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            card_id: card_id.into(),
            repetitions: 0,
            ease_factor: initial_ease,
            interval_days: 0,
            created_at: now,
            last_reviewed_at: None,
            correct_count: 0,
            incorrect_count: 0,
            total_reviews: 0,
            last_quality: None,
            last_response_ms: None,
        }
    }

    pub fn key(&self) -> CardKey {
        CardKey::new(self.user_id.clone(), self.card_id.clone())
    }

    pub fn is_new(&self) -> bool {
        self.last_reviewed_at.is_none()
    }

    pub fn due_at(&self) -> DateTime<Utc> {
        match self.last_reviewed_at {
            Some(reviewed) => reviewed + Duration::days(i64::from(self.interval_days)),
            None => self.created_at,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        now >= self.due_at()
    }

    /// How long the card has been due; negative when it is not due yet.
    pub fn overdue_by(&self, now: DateTime<Utc>) -> Duration {
        now.signed_duration_since(self.due_at())
    }

    /// Reinitializes to the creation defaults, keeping the identity.
    pub fn reset(&mut self, now: DateTime<Utc>, initial_ease: f64) {
        *self = MemoryState::new(
            std::mem::take(&mut self.user_id),
            std::mem::take(&mut self.card_id),
            now,
            initial_ease,
        );
    }

    pub fn validate(&self) -> Result<(), SpacedRepetitionError> {
        let fail = |reason: &str| {
            Err(SpacedRepetitionError::InvalidState {
                key: self.key().to_string(),
                reason: reason.to_string(),
            })
        };

        if self.user_id.is_empty() || self.card_id.is_empty() {
            return fail("empty user or card id");
        }
        if !self.ease_factor.is_finite() || self.ease_factor < EASE_FLOOR {
            return fail("ease factor below 1.3");
        }
        if self.repetitions >= 1 && self.interval_days == 0 {
            return fail("zero interval on a repeated card");
        }
        if self.interval_days == 0 && !self.is_new() {
            return fail("zero interval on a reviewed card");
        }
        if self.total_reviews != self.correct_count + self.incorrect_count {
            return fail("review counters out of balance");
        }
        Ok(())
    }
}

/// A stored value together with its optimistic-concurrency version.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Versioned<T> {
    pub version: u64,
    pub value: T,
}

impl<T> Versioned<T> {
    pub fn new(version: u64, value: T) -> Self {
        Self { version, value }
    }
}
