//! Seeded random number streams
//!
//! Every gene draws from its own `StdRng`, seeded from the run's base seed and the
//! gene index. Output for a fixed seed is therefore the same whatever the number of
//! worker threads or the order in which genes are scheduled.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Base seed for a run: the given one, or fresh entropy from the thread RNG
pub fn resolve_seed(seed: Option<u64>) -> u64 {
    match seed {
        Some(s) => s,
        None => rand::thread_rng().gen(),
    }
}

/// splitmix64 finalizer
fn mix64(mut z: u64) -> u64 {
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Seed of the stream for one gene
pub fn gene_seed(base: u64, gene: usize) -> u64 {
    mix64(base ^ mix64((gene as u64).wrapping_add(0x9E37_79B9_7F4A_7C15)))
}

/// Independent RNG for one gene
pub fn gene_rng(base: u64, gene: usize) -> StdRng {
    StdRng::seed_from_u64(gene_seed(base, gene))
}
