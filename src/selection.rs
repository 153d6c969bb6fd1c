use std::collections::HashSet;

use chrono::{DateTime, Utc};
use rand::SeedableRng;
use rand::distr::Distribution;
use rand::distr::weighted::WeightedIndex;
use rand::rngs::StdRng;
use tracing::debug;

use crate::config::SelectionOptions;
use crate::state::PersistentState;

/// Picks the next image to show.
///
/// Rules:
/// - Unseen-queue entries still present in the library win, oldest first.
/// - Otherwise a weighted draw over the library: never-seen images get
///   `unseen_weight`, seen images `seen_weight` (strictly smaller).
/// - Whatever is picked is marked seen, stamped, and appended to the history.
pub struct Selector {
    options: SelectionOptions,
    rng: StdRng,
}

impl Selector {
    pub fn new(options: SelectionOptions) -> Self {
        let rng = match options.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self { options, rng }
    }

    /// Updates `state` in place and returns the chosen image, or `None` when
    /// `available` is empty (in which case `state` is untouched).
    pub fn choose_next(
        &mut self,
        state: &mut PersistentState,
        available: &[String],
        now: DateTime<Utc>,
    ) -> Option<String> {
        if available.is_empty() {
            return None;
        }

        let present: HashSet<&str> = available.iter().map(String::as_str).collect();
        let queued = state.unseen_queue.len();
        state
            .unseen_queue
            .retain(|id| present.contains(id.as_str()));
        if state.unseen_queue.len() != queued {
            debug!(
                dropped = queued - state.unseen_queue.len(),
                "unseen entries no longer in library"
            );
        }

        let chosen = match state.unseen_queue.pop_front() {
            Some(id) => {
                debug!(image = %id, remaining = state.unseen_queue.len(), "unseen queue head");
                id
            }
            None => self.weighted_pick(state, available)?,
        };

        state.seen.insert(chosen.clone());
        state.last_shown_at.insert(chosen.clone(), now);
        state.history.push(chosen.clone());
        Some(chosen)
    }

    fn weighted_pick(&mut self, state: &PersistentState, available: &[String]) -> Option<String> {
        let weights: Vec<u32> = available
            .iter()
            .map(|id| self.weight_for(state, id))
            .collect();
        let dist = WeightedIndex::new(&weights).ok()?;
        let idx = dist.sample(&mut self.rng);
        debug!(
            image = %available[idx],
            weight = weights[idx],
            candidates = available.len(),
            "weighted pick"
        );
        available.get(idx).cloned()
    }

    fn weight_for(&self, state: &PersistentState, id: &str) -> u32 {
        if state.seen.contains(id) {
            self.options.seen_weight
        } else {
            self.options.unseen_weight
        }
    }
}
