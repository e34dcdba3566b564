//! Replica selection.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Picks which replica serves the next replica connection.
///
/// `select` receives the number of replica candidates (servers after the
/// primary) and returns an offset into them. Offsets outside
/// `0..replica_count` wrap.
pub trait ReplicaSelector: Send {
    fn select(&mut self, replica_count: usize) -> usize;
}

impl<F> ReplicaSelector for F
where
    F: FnMut(usize) -> usize + Send,
{
    fn select(&mut self, replica_count: usize) -> usize {
        self(replica_count)
    }
}

/// Uniform choice over all replicas.
#[derive(Debug)]
pub struct RandomSelector {
    rng: StdRng,
}

impl RandomSelector {
    /// Seeded from the operating system.
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Reproducible sequence of choices.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Default for RandomSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplicaSelector for RandomSelector {
    fn select(&mut self, replica_count: usize) -> usize {
        if replica_count <= 1 {
            return 0;
        }
        self.rng.gen_range(0..replica_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_selector_is_uniform() {
        let mut selector = RandomSelector::seeded(7);
        let mut counts = [0usize; 3];
        for _ in 0..30_000 {
            counts[selector.select(3)] += 1;
        }
        for count in counts {
            assert!((9_000..11_000).contains(&count), "skewed counts: {counts:?}");
        }
    }

    #[test]
    fn test_seeded_selectors_repeat() {
        let mut a = RandomSelector::seeded(42);
        let mut b = RandomSelector::seeded(42);
        let left: Vec<_> = (0..20).map(|_| a.select(5)).collect();
        let right: Vec<_> = (0..20).map(|_| b.select(5)).collect();
        assert_eq!(left, right);
    }

    #[test]
    fn test_single_replica_and_closures() {
        assert_eq!(RandomSelector::new().select(1), 0);
        assert_eq!(RandomSelector::new().select(0), 0);

        let mut always_last = |n: usize| n - 1;
        assert_eq!(always_last.select(4), 3);
    }
}
