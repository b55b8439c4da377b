use crate::item::DATA_RANGE;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Read-only data shared by every stage of a run.
///
/// Built by the coordinator before any stage starts and never mutated
/// afterwards.
#[derive(Debug, Clone)]
pub struct SharedResources {
    seed: u64,
    lookup: Box<[f64]>,
}

impl SharedResources {
    pub fn new(seed: u64) -> Self {
        let lookup = (0..DATA_RANGE)
            .map(|i| {
                let x = i as f64 * 0.001;
                (x.sin() * x.sin() + x.cos() * x.cos()).sqrt()
            })
            .collect();
        Self { seed, lookup }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Deterministic source of raw values, identical for identical seeds
    pub fn value_source(&self) -> ValueSource {
        ValueSource {
            rng: StdRng::seed_from_u64(self.seed),
        }
    }

    /// Precomputed factor for `raw_value`, indexed modulo [`DATA_RANGE`]
    pub fn lookup(&self, raw_value: i64) -> f64 {
        self.lookup[raw_value.rem_euclid(DATA_RANGE) as usize]
    }

    pub fn lookup_len(&self) -> usize {
        self.lookup.len()
    }
}

/// Seeded generator of raw values in `1..=DATA_RANGE`
#[derive(Debug, Clone)]
pub struct ValueSource {
    rng: StdRng,
}

impl ValueSource {
    pub fn next_value(&mut self) -> i64 {
        self.rng.random_range(1..=DATA_RANGE)
    }
}
