use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution as RandDistribution, Normal, Uniform};

use super::types::{Distribution, ValueDistribution, ValueType};

/// Every draw in the engine flows through one of these, seeded explicitly
/// so single runs are reproducible and parallel tasks get independent
/// streams.
pub type SimRng = ChaCha8Rng;

pub fn rng_for_seed(seed: u64) -> SimRng {
    ChaCha8Rng::seed_from_u64(seed)
}

/// Derive an independent per-task seed from a base seed and simulation id.
pub fn derive_seed(base_seed: u64, simulation_id: u64) -> u64 {
    splitmix64(base_seed ^ simulation_id.rotate_left(32))
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

impl Distribution {
    /// Draws are deliberately unclamped; a normal return draw may imply a
    /// loss past -100%.
    pub fn sample(&self, rng: &mut SimRng) -> f64 {
        match *self {
            Distribution::Fixed { value } => value,
            Distribution::Normal { mean, std_dev } => match Normal::new(mean, std_dev) {
                Ok(normal) => normal.sample(rng),
                // Validation rejects negative std dev before any run.
                Err(_) => mean,
            },
            Distribution::Uniform { min, max } => {
                if min >= max {
                    min
                } else {
                    Uniform::new_inclusive(min, max).sample(rng)
                }
            }
        }
    }
}

impl ValueDistribution {
    /// Apply a sampled annual change to an amount: percentage draws
    /// multiply (110 -> x1.10), amount draws add.
    pub fn apply_change(&self, amount: f64, rng: &mut SimRng) -> f64 {
        let drawn = self.distribution.sample(rng);
        match self.value_type {
            ValueType::Percentage => amount * drawn / 100.0,
            ValueType::Amount => amount + drawn,
        }
    }

    /// Sampled income thrown off by a holding of the given value.
    pub fn sample_income(&self, value: f64, rng: &mut SimRng) -> f64 {
        let drawn = self.distribution.sample(rng);
        match self.value_type {
            ValueType::Percentage => value * drawn / 100.0,
            ValueType::Amount => drawn,
        }
    }

    /// Sampled end-of-year value for a holding currently worth `value`.
    pub fn apply_return(&self, value: f64, rng: &mut SimRng) -> f64 {
        let drawn = self.distribution.sample(rng);
        match self.value_type {
            ValueType::Percentage => value * drawn / 100.0,
            ValueType::Amount => value + drawn,
        }
    }

    /// Sampled year-over-year inflation factor. Percentage draws use the
    /// 100 = x1.00 convention; amount draws are raw rates (0.025 -> 1.025).
    pub fn sample_inflation_factor(&self, rng: &mut SimRng) -> f64 {
        let drawn = self.distribution.sample(rng);
        match self.value_type {
            ValueType::Percentage => drawn / 100.0,
            ValueType::Amount => 1.0 + drawn,
        }
    }
}
