use parking_lot::Mutex;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// Bounded sample capacity of a Reservoir.
pub const RESERVOIR_CAPACITY: usize = 1024;

/// Reservoir holds a bounded, uniformly-sampled subset of an unbounded
/// observation stream (Vitter's algorithm R). Percentiles computed from
/// the reservoir approximate percentiles of the full stream.
pub struct Reservoir {
    inner: Mutex<Inner>,
}

struct Inner {
    samples: Vec<u64>,
    // Observations seen so far, including those not retained.
    count: u64,
    rng: SmallRng,
}

impl Reservoir {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                samples: Vec::new(),
                count: 0,
                rng: SmallRng::from_entropy(),
            }),
        }
    }

    /// Record one observation.
    pub fn record(&self, sample: u64) {
        let mut inner = self.inner.lock();
        inner.count += 1;

        if inner.samples.len() < RESERVOIR_CAPACITY {
            inner.samples.push(sample);
            return;
        }
        // Replace a retained sample with probability capacity / count.
        let count = inner.count;
        let ind = inner.rng.gen_range(0..count) as usize;
        if ind < RESERVOIR_CAPACITY {
            inner.samples[ind] = sample;
        }
    }

    /// Total observations recorded, including those sampled out.
    pub fn count(&self) -> u64 {
        self.inner.lock().count
    }

    /// The given percentile (in [0, 1]) of the retained samples,
    /// or None if nothing has been recorded.
    pub fn percentile(&self, q: f64) -> Option<u64> {
        let inner = self.inner.lock();
        if inner.samples.is_empty() {
            return None;
        }
        let mut sorted = inner.samples.clone();
        drop(inner);

        sorted.sort_unstable();
        let ind = ((sorted.len() - 1) as f64 * q.clamp(0.0, 1.0)).round() as usize;
        Some(sorted[ind])
    }

    /// Compute the standard percentile set in one pass over the samples.
    pub fn percentiles(&self) -> Percentiles {
        let inner = self.inner.lock();
        let count = inner.count;
        let mut sorted = inner.samples.clone();
        drop(inner);

        if sorted.is_empty() {
            return Percentiles {
                samples: count,
                ..Percentiles::default()
            };
        }
        sorted.sort_unstable();

        let at = |q: f64| sorted[((sorted.len() - 1) as f64 * q).round() as usize];
        Percentiles {
            samples: count,
            p50: at(0.50),
            p95: at(0.95),
            p99: at(0.99),
            p999: at(0.999),
        }
    }

    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.samples.clear();
        inner.count = 0;
    }
}

impl Default for Reservoir {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Reservoir {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reservoir")
            .field("count", &self.count())
            .finish()
    }
}

/// Percentiles of one latency reservoir, in nanoseconds.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct Percentiles {
    /// Observations recorded, including those sampled out.
    pub samples: u64,
    pub p50: u64,
    pub p95: u64,
    pub p99: u64,
    pub p999: u64,
}
