use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Source of uniform draws in `[0, 1)`.
pub trait UniformSource: Send {
    fn next_uniform(&mut self) -> f64;
}

/// ChaCha-backed source, seeded from OS entropy unless a seed is pinned.
pub struct EntropySource {
    rng: StdRng,
}

impl EntropySource {
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { rng }
    }
}

impl UniformSource for EntropySource {
    fn next_uniform(&mut self) -> f64 {
        self.rng.gen::<f64>()
    }
}

/// Maps a uniform draw to a crash multiplier: `house_edge / (1 - u)` clamped to `[1, cap]`.
///
/// `P(crash >= x) ≈ house_edge / x` below the cap. Truncating at `cap` moves the tail mass
/// onto the cap itself, which is part of the house edge rather than an accident.
pub fn crash_point(house_edge: f64, cap: f64, u: f64) -> f64 {
    let cap = if cap.is_finite() && cap >= 1.0 { cap } else { 1.0 };
    let denominator = 1.0 - u;
    if denominator <= 0.0 {
        return 1.0;
    }
    let multiplier = house_edge / denominator;
    if !multiplier.is_finite() || multiplier < 1.0 {
        return 1.0;
    }
    multiplier.min(cap)
}

pub struct CrashSampler {
    house_edge: f64,
    cap: f64,
    source: Box<dyn UniformSource>,
}

impl CrashSampler {
    pub fn new(house_edge: f64, cap: f64, source: Box<dyn UniformSource>) -> Self {
        Self {
            house_edge,
            cap,
            source,
        }
    }

    pub fn sample(&mut self) -> f64 {
        let u = self.source.next_uniform();
        crash_point(self.house_edge, self.cap, u)
    }
}
