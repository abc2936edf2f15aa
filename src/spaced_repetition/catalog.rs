//! Content ordering for cards a learner has not seen yet.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use super::SpacedRepetitionError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CatalogCard {
    pub card_id: String,
    #[serde(default)]
    pub level: u32,
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub position: u32,
}

impl CatalogCard {
    pub fn new(
        card_id: impl Into<String>,
        level: u32,
        topic: impl Into<String>,
        position: u32,
    ) -> Self {
        Self {
            card_id: card_id.into(),
            level,
            topic: topic.into(),
            position,
        }
    }
}

pub trait CardCatalog: Send + Sync {
    /// Every card, in the order new cards are introduced.
    fn ordered_cards(&self) -> &[CatalogCard];
}

/// Fixed catalog sorted by level, topic, position, then card id.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    cards: Vec<CatalogCard>,
}

impl StaticCatalog {
    pub fn new(mut cards: Vec<CatalogCard>) -> Self {
        cards.sort_by(|a, b| {
            (a.level, &a.topic, a.position, &a.card_id).cmp(&(
                b.level,
                &b.topic,
                b.position,
                &b.card_id,
            ))
        });
        let mut seen = HashSet::new();
        cards.retain(|c| seen.insert(c.card_id.clone()));
        Self { cards }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Loads a JSON array of cards.
    pub fn load(path: &Path) -> Result<Self, SpacedRepetitionError> {
        let data = std::fs::read_to_string(path)?;
        let cards: Vec<CatalogCard> = serde_json::from_str(&data)?;
        tracing::info!(path = %path.display(), cards = cards.len(), "loaded card catalog");
        Ok(Self::new(cards))
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }
}

impl CardCatalog for StaticCatalog {
    fn ordered_cards(&self) -> &[CatalogCard] {
        &self.cards
    }
}
