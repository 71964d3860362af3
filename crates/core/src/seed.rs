//! Seed generation and the fair round-robin that interleaves permuters.
//!
//! Mirrors `main.py`'s `cycle_seeds` and the permuter's own seed iterator
//! (forced / deterministic / randomized).

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// `(rng_keep_flag, rng_seed)`: the keep flag is nonzero when the permuter
/// should continue mutating its own previous output rather than starting
/// again from the base source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SeedTuple {
    /// Nonzero selects "keep mutating previous output".
    pub keep_flag: u64,
    /// The actual RNG seed.
    pub rng_seed: u64,
}

impl SeedTuple {
    /// Construct a plain (non-keep) seed.
    pub fn fresh(rng_seed: u64) -> Self {
        Self { keep_flag: 0, rng_seed }
    }

    /// True iff this seed instructs the permuter to keep mutating its
    /// previous output.
    pub fn is_keep(&self) -> bool {
        self.keep_flag != 0
    }

    /// Render as the `--seed` reproduction string (`"RNG"` or `"KEEP,RNG"`).
    pub fn to_reproducer_string(&self) -> String {
        if self.keep_flag != 0 {
            format!("{},{}", self.keep_flag, self.rng_seed)
        } else {
            self.rng_seed.to_string()
        }
    }

    /// Parse a `--seed` string (`"RNG"` or `"KEEP,RNG"`).
    pub fn parse(s: &str) -> Result<Self, String> {
        let parts: Vec<&str> = s.split(',').collect();
        let bad = || format!("invalid --seed value: {s:?}");
        match parts.as_slice() {
            [rng] => Ok(Self::fresh(rng.parse().map_err(|_| bad())?)),
            [keep, rng] => Ok(Self {
                keep_flag: keep.parse().map_err(|_| bad())?,
                rng_seed: rng.parse().map_err(|_| bad())?,
            }),
            _ => Err(bad()),
        }
    }
}

/// One permuter's own sequence of seeds: forced, deterministic enumeration,
/// or infinite randomized.
pub trait SeedIterator {
    /// Produce the next seed for this permuter, or `None` once exhausted.
    fn next_seed(&mut self) -> Option<SeedTuple>;
}

/// Yields a single forced seed tuple then ends. Used to reproduce a prior
/// failure via `--seed`.
pub struct ForcedSeedIterator {
    seed: Option<SeedTuple>,
}

impl ForcedSeedIterator {
    /// Build an iterator that yields exactly `seed` once.
    pub fn new(seed: SeedTuple) -> Self {
        Self { seed: Some(seed) }
    }
}

impl SeedIterator for ForcedSeedIterator {
    fn next_seed(&mut self) -> Option<SeedTuple> {
        self.seed.take()
    }
}

/// Iterates a finite, deterministically enumerated seed space exactly once.
pub struct DeterministicSeedIterator {
    remaining: std::ops::Range<u64>,
}

impl DeterministicSeedIterator {
    /// Enumerate `0..count` as plain (non-keep) seeds.
    pub fn new(count: u64) -> Self {
        Self { remaining: 0..count }
    }
}

impl SeedIterator for DeterministicSeedIterator {
    fn next_seed(&mut self) -> Option<SeedTuple> {
        self.remaining.next().map(SeedTuple::fresh)
    }
}

/// Infinite randomized seed stream. With probability `keep_prob` the emitted
/// seed instructs the permuter to continue mutating its previous output.
pub struct RandomizedSeedIterator {
    rng: StdRng,
    keep_prob: f64,
}

impl RandomizedSeedIterator {
    /// Build a randomized iterator seeded from OS entropy.
    pub fn new(keep_prob: f64) -> Self {
        Self {
            rng: StdRng::from_entropy(),
            keep_prob: keep_prob.clamp(0.0, 1.0),
        }
    }

    /// Build a randomized iterator with an explicit RNG seed, for
    /// reproducible tests.
    pub fn from_seed(seed: u64, keep_prob: f64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            keep_prob: keep_prob.clamp(0.0, 1.0),
        }
    }
}

impl SeedIterator for RandomizedSeedIterator {
    fn next_seed(&mut self) -> Option<SeedTuple> {
        let rng_seed: u64 = self.rng.gen();
        let keep = self.keep_prob > 0.0 && self.rng.gen_bool(self.keep_prob);
        let keep_flag = if keep {
            // Any nonzero marker works; reuse the RNG seed itself so the
            // reproducer string carries information instead of a bare `1`.
            rng_seed.max(1)
        } else {
            0
        };
        Some(SeedTuple { keep_flag, rng_seed })
    }
}

/// Interleave each permuter's own seed iterator in strict rotation: on each
/// step, advance to the next non-exhausted permuter in order and yield its
/// next seed. A permuter is dropped from the rotation once its iterator is
/// exhausted. If every iterator is infinite the sequence never ends.
///
/// Ordering guarantee: between two successive yields of permuter `i`, every
/// other still-live permuter yields exactly once.
pub struct FairRoundRobin {
    iterators: Vec<(usize, Box<dyn SeedIterator>)>,
    cursor: usize,
}

impl FairRoundRobin {
    /// Build a round robin over `(permuter_index, iterator)` pairs, in the
    /// order the permuters were given.
    pub fn new(iterators: Vec<(usize, Box<dyn SeedIterator>)>) -> Self {
        Self { iterators, cursor: 0 }
    }
}

impl Iterator for FairRoundRobin {
    type Item = (usize, SeedTuple);

    fn next(&mut self) -> Option<Self::Item> {
        while !self.iterators.is_empty() {
            self.cursor %= self.iterators.len();
            let (perm_ind, it) = &mut self.iterators[self.cursor];
            let perm_ind = *perm_ind;
            match it.next_seed() {
                Some(seed) => {
                    self.cursor += 1;
                    return Some((perm_ind, seed));
                }
                None => {
                    self.iterators.remove(self.cursor);
                    // Don't advance the cursor: the removal shifted the next
                    // element into this slot already.
                }
            }
        }
        None
    }
}

/// Convenience constructor matching `main.py`'s `cycle_seeds`: takes the
/// already-built per-permuter iterators (index order = permuter order).
pub fn cycle_seeds(iterators: Vec<(usize, Box<dyn SeedIterator>)>) -> FairRoundRobin {
    FairRoundRobin::new(iterators)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountUp {
        next: u64,
        max: u64,
    }
    impl SeedIterator for CountUp {
        fn next_seed(&mut self) -> Option<SeedTuple> {
            if self.next >= self.max {
                return None;
            }
            let s = SeedTuple::fresh(self.next);
            self.next += 1;
            Some(s)
        }
    }

    #[test]
    fn round_robin_interleaves_strictly() {
        let a: Box<dyn SeedIterator> = Box::new(CountUp { next: 0, max: 3 });
        let b: Box<dyn SeedIterator> = Box::new(CountUp { next: 100, max: 102 });
        let rr = cycle_seeds(vec![(0, a), (1, b)]);
        let out: Vec<(usize, u64)> = rr.map(|(i, s)| (i, s.rng_seed)).collect();
        assert_eq!(
            out,
            vec![(0, 0), (1, 100), (0, 1), (1, 101), (0, 2)]
        );
    }

    #[test]
    fn forced_seed_yields_once() {
        let mut it = ForcedSeedIterator::new(SeedTuple { keep_flag: 0, rng_seed: 42 });
        assert_eq!(it.next_seed(), Some(SeedTuple { keep_flag: 0, rng_seed: 42 }));
        assert_eq!(it.next_seed(), None);
    }

    #[test]
    fn reproducer_string_roundtrips() {
        let s = SeedTuple { keep_flag: 7, rng_seed: 42 };
        assert_eq!(s.to_reproducer_string(), "7,42");
        assert_eq!(SeedTuple::parse("7,42").unwrap(), s);

        let s2 = SeedTuple::fresh(42);
        assert_eq!(s2.to_reproducer_string(), "42");
        assert_eq!(SeedTuple::parse("42").unwrap(), s2);
    }
}
