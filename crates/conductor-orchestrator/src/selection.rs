use crate::scorer::ScoreCard;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use tracing::debug;

/// Final candidate set for one decision cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    /// Up to K candidates, best first.
    pub ranked: Vec<ScoreCard>,
    /// Agents treated as equally good: just the top one unless a conflict was detected.
    pub co_candidates: Vec<String>,
    /// Whether the top two candidates were near-tied without a dominating side.
    pub conflict: bool,
}

impl Selection {
    /// The top-ranked candidate.
    pub fn top(&self) -> Option<&ScoreCard> {
        self.ranked.first()
    }

    /// Ranked agent ids, best first.
    pub fn agent_ids(&self) -> Vec<&str> {
        self.ranked.iter().map(|c| c.agent_id.as_str()).collect()
    }

    /// Whether more than one agent is in contention.
    pub fn has_co_candidates(&self) -> bool {
        self.co_candidates.len() > 1
    }
}

/// Orders score cards deterministically and detects near-ties.
#[derive(Debug, Clone, Copy)]
pub struct SelectionResolver {
    margin: f64,
    top_k: usize,
}

impl SelectionResolver {
    /// Resolver with a conflict margin and a candidate cap.
    pub fn new(margin: f64, top_k: usize) -> Self {
        Self {
            margin,
            top_k: top_k.max(1),
        }
    }

    /// Rank cards and pick the final candidates. Cards carrying a scoring
    /// failure are never selected.
    pub fn resolve(&self, cards: &BTreeMap<String, ScoreCard>) -> Selection {
        let mut ranked: Vec<ScoreCard> = cards
            .values()
            .filter(|c| c.failure.is_none())
            .cloned()
            .collect();
        ranked.sort_by(rank_order);
        ranked.truncate(self.top_k);

        let conflict = match (ranked.first(), ranked.get(1)) {
            (Some(a), Some(b)) => {
                (a.combined - b.combined).abs() < self.margin && !a.dominates(b) && !b.dominates(a)
            }
            _ => false,
        };

        let co_candidates = match ranked.first() {
            None => Vec::new(),
            Some(top) if conflict => ranked
                .iter()
                .enumerate()
                .filter(|(idx, c)| {
                    *idx == 0 || (top.combined - c.combined < self.margin && !top.dominates(c))
                })
                .map(|(_, c)| c.agent_id.clone())
                .collect(),
            Some(top) => vec![top.agent_id.clone()],
        };

        debug!(
            candidates = ranked.len(),
            conflict,
            co_candidates = ?co_candidates,
            "Selection resolved"
        );

        Selection {
            ranked,
            co_candidates,
            conflict,
        }
    }
}

/// Combined score descending, then performance descending, then agent id ascending.
fn rank_order(a: &ScoreCard, b: &ScoreCard) -> Ordering {
    b.combined
        .total_cmp(&a.combined)
        .then_with(|| b.performance.total_cmp(&a.performance))
        .then_with(|| a.agent_id.cmp(&b.agent_id))
}
