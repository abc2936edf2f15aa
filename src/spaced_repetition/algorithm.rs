use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::SpacedRepetitionError;

/// Lowest SM-2 grade that counts as a successful recall.
pub const PASSING_GRADE: u8 = 3;

/// Recall quality reported by the learner, on the SM-2 0-5 scale.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewQuality {
    /// Total blackout.
    IncorrectHard,
    /// Wrong, but the answer was recognized once shown.
    Incorrect,
    /// Wrong, but the answer felt easy once shown.
    IncorrectFamiliar,
    /// Correct with serious difficulty.
    CorrectHard,
    /// Correct after some hesitation.
    Correct,
    /// Perfect recall.
    CorrectEasy,
}

impl ReviewQuality {
    pub const ALL: [ReviewQuality; 6] = [
        ReviewQuality::IncorrectHard,
        ReviewQuality::Incorrect,
        ReviewQuality::IncorrectFamiliar,
        ReviewQuality::CorrectHard,
        ReviewQuality::Correct,
        ReviewQuality::CorrectEasy,
    ];

    pub fn scale(self) -> u8 {
        match self {
            ReviewQuality::IncorrectHard => 0,
            ReviewQuality::Incorrect => 1,
            ReviewQuality::IncorrectFamiliar => 2,
            ReviewQuality::CorrectHard => 3,
            ReviewQuality::Correct => 4,
            ReviewQuality::CorrectEasy => 5,
        }
    }

    pub fn is_lapse(self) -> bool {
        self.scale() < PASSING_GRADE
    }

    pub fn is_correct(self) -> bool {
        !self.is_lapse()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ReviewQuality::IncorrectHard => "INCORRECT_HARD",
            ReviewQuality::Incorrect => "INCORRECT",
            ReviewQuality::IncorrectFamiliar => "INCORRECT_FAMILIAR",
            ReviewQuality::CorrectHard => "CORRECT_HARD",
            ReviewQuality::Correct => "CORRECT",
            ReviewQuality::CorrectEasy => "CORRECT_EASY",
        }
    }
}

impl fmt::Display for ReviewQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<i64> for ReviewQuality {
    type Error = SpacedRepetitionError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        ReviewQuality::ALL
            .into_iter()
            .find(|q| i64::from(q.scale()) == value)
            .ok_or_else(|| SpacedRepetitionError::InvalidQuality(value.to_string()))
    }
}

impl FromStr for ReviewQuality {
    type Err = SpacedRepetitionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Ok(value) = trimmed.parse::<i64>() {
            return ReviewQuality::try_from(value);
        }
        ReviewQuality::ALL
            .into_iter()
            .find(|q| q.as_str().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| SpacedRepetitionError::InvalidQuality(s.to_string()))
    }
}

/// Tunable constants of the SM-2 update. Defaults are the published SM-2 values,
/// plus an ease ceiling to keep intervals from running away.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Sm2Params {
    pub initial_ease: f64,
    pub min_ease: f64,
    pub max_ease: f64,
    /// `c0` in `ef + (c0 - (5 - q) * (c1 + (5 - q) * c2))`
    pub ease_bonus: f64,
    /// `c1`
    pub ease_linear_penalty: f64,
    /// `c2`
    pub ease_quadratic_penalty: f64,
    pub first_interval_days: u32,
    pub second_interval_days: u32,
    pub lapse_interval_days: u32,
    pub max_interval_days: u32,
}

impl Default for Sm2Params {
    fn default() -> Self {
        Self {
            initial_ease: 2.5,
            min_ease: 1.3,
            max_ease: 3.0,
            ease_bonus: 0.1,
            ease_linear_penalty: 0.08,
            ease_quadratic_penalty: 0.02,
            first_interval_days: 1,
            second_interval_days: 6,
            lapse_interval_days: 1,
            max_interval_days: 36500,
        }
    }
}

impl Sm2Params {
    pub fn validate(&self) -> Result<(), SpacedRepetitionError> {
        let invalid = |msg: &str| Err(SpacedRepetitionError::InvalidConfig(msg.to_string()));

        if !self.min_ease.is_finite() || self.min_ease < 1.3 {
            return invalid("min_ease must be a finite value >= 1.3");
        }
        if !self.max_ease.is_finite() || self.max_ease < self.min_ease {
            return invalid("max_ease must be >= min_ease");
        }
        if !(self.min_ease..=self.max_ease).contains(&self.initial_ease) {
            return invalid("initial_ease must lie within [min_ease, max_ease]");
        }
        if ![
            self.ease_bonus,
            self.ease_linear_penalty,
            self.ease_quadratic_penalty,
        ]
        .iter()
        .all(|c| c.is_finite())
        {
            return invalid("ease coefficients must be finite");
        }
        if self.first_interval_days == 0
            || self.second_interval_days == 0
            || self.lapse_interval_days == 0
        {
            return invalid("learning and lapse intervals must be at least one day");
        }
        if self.max_interval_days < self.second_interval_days {
            return invalid("max_interval_days must be >= second_interval_days");
        }
        Ok(())
    }
}

/// Interval a card would receive for a given grade.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IntervalPreview {
    pub quality: ReviewQuality,
    pub interval_days: u32,
    pub ease_factor: f64,
}

pub mod sm2 {
    use chrono::{DateTime, Utc};

    use super::*;
    use crate::spaced_repetition::memory::MemoryState;

    pub fn next_ease(ease_factor: f64, quality: ReviewQuality, params: &Sm2Params) -> f64 {
        let distance = 5.0 - f64::from(quality.scale());
        let delta = params.ease_bonus
            - distance * (params.ease_linear_penalty + distance * params.ease_quadratic_penalty);
        (ease_factor + delta).clamp(params.min_ease, params.max_ease)
    }

    /// Returns `(repetitions, interval_days)` after a review graded `quality`,
    /// where `new_ease` is the already-updated ease factor.
    pub fn next_interval(
        repetitions: u32,
        interval_days: u32,
        new_ease: f64,
        quality: ReviewQuality,
        params: &Sm2Params,
    ) -> (u32, u32) {
        if quality.is_lapse() {
            return (0, params.lapse_interval_days);
        }

        let repetitions = repetitions.saturating_add(1);
        let interval = match repetitions {
            1 => params.first_interval_days,
            2 => params.second_interval_days,
            _ => {
                let scaled = (f64::from(interval_days) * new_ease).round();
                (scaled.min(f64::from(params.max_interval_days)) as u32).max(1)
            }
        };
        (repetitions, interval)
    }

    /// Applies one grading event. Pure: the caller persists the result.
    pub fn update(
        state: &MemoryState,
        quality: ReviewQuality,
        now: DateTime<Utc>,
        params: &Sm2Params,
    ) -> MemoryState {
        let ease_factor = next_ease(state.ease_factor, quality, params);
        let (repetitions, interval_days) = next_interval(
            state.repetitions,
            state.interval_days,
            ease_factor,
            quality,
            params,
        );

        let mut next = state.clone();
        next.repetitions = repetitions;
        next.ease_factor = ease_factor;
        next.interval_days = interval_days;
        next.last_reviewed_at = Some(now);
        next.last_quality = Some(quality);
        next.total_reviews += 1;
        if quality.is_lapse() {
            next.incorrect_count += 1;
        } else {
            next.correct_count += 1;
        }
        next
    }

    pub fn preview(state: &MemoryState, params: &Sm2Params) -> Vec<IntervalPreview> {
        ReviewQuality::ALL
            .into_iter()
            .map(|quality| {
                let ease_factor = next_ease(state.ease_factor, quality, params);
                let (_, interval_days) = next_interval(
                    state.repetitions,
                    state.interval_days,
                    ease_factor,
                    quality,
                    params,
                );
                IntervalPreview {
                    quality,
                    interval_days,
                    ease_factor,
                }
            })
            .collect()
    }
}
