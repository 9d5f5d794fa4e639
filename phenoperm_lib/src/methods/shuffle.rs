use crate::data::LabelAssignment;
use crate::{Error, Result};
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// Seed for trial `index` derived from the run seed, so every trial is
/// reproducible on its own regardless of scheduling.
pub fn trial_seed(seed: u64, index: usize) -> u64 {
    seed.wrapping_add(index as u64)
}

/// Uniform random permutation of the full label vector. Class sizes are
/// preserved; the identity permutation is not excluded.
pub fn shuffle_labels(labels: &LabelAssignment, seed: u64) -> Result<LabelAssignment> {
    if labels.classes().len() < 2 {
        return Err(Error::InvalidInput(format!(
            "cannot shuffle labels with fewer than 2 distinct classes ({:?})",
            labels.classes()
        )));
    }
    let mut rng = SmallRng::seed_from_u64(seed);
    let mut shuffled = labels.labels.clone();
    shuffled.shuffle(&mut rng);
    Ok(LabelAssignment { labels: shuffled })
}
