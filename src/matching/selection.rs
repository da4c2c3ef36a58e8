//! Random candidate selection

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Mutex;

/// Trait for choosing one candidate out of an eligible set
pub trait CandidateSelector: Send + Sync {
    /// Pick an index in `[0, len)`, or `None` when `len` is zero
    fn select_index(&self, len: usize) -> Option<usize>;
}

/// Uniform selection: every candidate has probability `1 / len`
///
/// The index is drawn independently of enqueue time or store iteration order.
#[derive(Debug)]
pub struct UniformSelector {
    rng: Mutex<StdRng>,
}

impl UniformSelector {
    /// Selector seeded from OS entropy
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Deterministic selector for tests and simulations
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl Default for UniformSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl CandidateSelector for UniformSelector {
    fn select_index(&self, len: usize) -> Option<usize> {
        if len == 0 {
            return None;
        }

        let index = match self.rng.lock() {
            Ok(mut rng) => rng.gen_range(0..len),
            Err(poisoned) => poisoned.into_inner().gen_range(0..len),
        };

        Some(index)
    }
}

/// Pick one item from a materialized slice
pub fn select_from<'a, T>(selector: &dyn CandidateSelector, items: &'a [T]) -> Option<&'a T> {
    selector.select_index(items.len()).and_then(|i| items.get(i))
}
