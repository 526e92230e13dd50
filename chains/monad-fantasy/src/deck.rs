//! Tournament deck selection.

use crate::config::TacticSection;
use serde_json::Value;
use std::collections::HashSet;

/// One hero offered by the tournament, kept verbatim so it can be sent back.
#[derive(Debug, Clone, PartialEq)]
pub struct HeroCard {
    pub stars: u32,
    pub raw: Value,
}

impl HeroCard {
    /// Reads `hero.stars`; entries without it are not selectable.
    pub fn from_value(raw: Value) -> Option<Self> {
        let stars = raw.get("hero")?.get("stars")?.as_u64()?;
        Some(Self {
            stars: u32::try_from(stars).ok()?,
            raw,
        })
    }
}

pub trait DeckPolicy: Send + Sync {
    /// Indices into `cards` forming the deck, or `None` when no valid deck exists.
    /// `account_index` is 1-based.
    fn select(&self, cards: &[HeroCard], account_index: usize, total_accounts: usize) -> Option<Vec<usize>>;
}

/// Spreads accounts over configured star patterns and fills each slot with a
/// card of exactly that rating, falling back to any card that still fits the
/// star budget.
#[derive(Debug, Clone)]
pub struct StarPatternPolicy {
    patterns: Vec<Vec<u32>>,
    star_budget: u32,
    deck_size: usize,
}

impl StarPatternPolicy {
    pub fn new(patterns: Vec<Vec<u32>>, star_budget: u32, deck_size: usize) -> Self {
        Self {
            patterns,
            star_budget,
            deck_size,
        }
    }

    pub fn from_config(tactic: &TacticSection) -> Self {
        Self::new(tactic.decks.clone(), tactic.star_budget, tactic.deck_size)
    }

    fn pattern_for(&self, account_index: usize, total_accounts: usize) -> Option<&[u32]> {
        if self.patterns.is_empty() {
            return None;
        }
        let per_pattern = total_accounts.max(1).div_ceil(self.patterns.len());
        let idx = (account_index.saturating_sub(1) / per_pattern).min(self.patterns.len() - 1);
        Some(&self.patterns[idx])
    }

    fn fill_greedy(&self, cards: &[HeroCard]) -> Option<Vec<usize>> {
        if cards.len() < self.deck_size {
            return None;
        }
        let mut order: Vec<usize> = (0..cards.len()).collect();
        order.sort_by(|a, b| cards[*b].stars.cmp(&cards[*a].stars));

        let mut picked: Vec<usize> = Vec::with_capacity(self.deck_size);
        let mut total = 0u32;
        while picked.len() < self.deck_size {
            let still_needed = self.deck_size - picked.len() - 1;
            // strongest card that still leaves room for the cheapest remaining slots
            let choice = order.iter().copied().find(|&idx| {
                if picked.contains(&idx) {
                    return false;
                }
                let mut rest: Vec<u32> = order
                    .iter()
                    .filter(|&&i| i != idx && !picked.contains(&i))
                    .map(|&i| cards[i].stars)
                    .collect();
                if rest.len() < still_needed {
                    return false;
                }
                rest.sort_unstable();
                let reserve: u32 = rest.iter().take(still_needed).sum();
                total + cards[idx].stars + reserve <= self.star_budget
            });
            let idx = choice?;
            total += cards[idx].stars;
            picked.push(idx);
        }
        Some(picked)
    }
}

impl DeckPolicy for StarPatternPolicy {
    fn select(&self, cards: &[HeroCard], account_index: usize, total_accounts: usize) -> Option<Vec<usize>> {
        let Some(pattern) = self.pattern_for(account_index, total_accounts) else {
            return self.fill_greedy(cards);
        };

        let mut used = HashSet::new();
        let mut picked = Vec::with_capacity(pattern.len());
        let mut total = 0u32;

        for &stars in pattern.iter().take(self.deck_size) {
            let exact = (0..cards.len()).find(|i| !used.contains(i) && cards[*i].stars == stars);
            let choice = exact.or_else(|| {
                let remaining = self.star_budget.saturating_sub(total);
                (0..cards.len()).find(|i| !used.contains(i) && cards[*i].stars <= remaining)
            });
            if let Some(idx) = choice {
                used.insert(idx);
                total += cards[idx].stars;
                picked.push(idx);
            }
        }

        let expected = pattern.len().min(self.deck_size);
        (picked.len() == expected && total <= self.star_budget).then_some(picked)
    }
}
