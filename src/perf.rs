use std::fmt;
use std::time::{Duration, Instant};

use rand::Rng;
use tracing::{debug, info};

use crate::hasher::{guarded_digest, DigestRequest, ProviderError, ProviderRegistry, Variant};

/// Where each iteration's seed comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeedSource {
    None,
    Fixed(Vec<u8>),
    /// Iteration counter (counting down from N) written in decimal,
    /// zero-padded to `width` digits, read back as hex.
    Incrementing { width: usize },
    /// Fresh random bytes per iteration.
    Random { len: usize },
}

impl SeedSource {
    fn validate(&self, iterations: u64) -> Result<(), PerfError> {
        if let SeedSource::Incrementing { width } = *self {
            let digits = iterations.to_string().len();
            if width == 0 || width % 2 != 0 || digits > width {
                return Err(PerfError::SeedWidth { width, iterations });
            }
        }
        Ok(())
    }

    fn seed<R: Rng>(&self, counter: u64, rng: &mut R) -> Option<Vec<u8>> {
        match self {
            SeedSource::None => None,
            SeedSource::Fixed(seed) => Some(seed.clone()),
            SeedSource::Incrementing { width } => Some(counter_seed(counter, *width)),
            SeedSource::Random { len } => {
                let mut seed = vec![0u8; *len];
                rng.fill(&mut seed[..]);
                Some(seed)
            }
        }
    }
}

/// `counter` as zero-padded decimal digits, two digits per byte.
fn counter_seed(counter: u64, width: usize) -> Vec<u8> {
    let digits = format!("{:0>width$}", counter, width = width);
    digits
        .as_bytes()
        .chunks(2)
        .map(|pair| ((pair[0] - b'0') << 4) | (pair[1] - b'0'))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PerfConfig {
    pub variant: Variant,
    pub iterations: u64,
    pub input: Vec<u8>,
    pub seeds: SeedSource,
    /// Every iteration hashes once per tuning value (once if empty).
    pub tunings: Vec<u32>,
    /// One untimed call before the clock starts.
    pub warmup: bool,
}

impl PerfConfig {
    pub fn new(variant: Variant, iterations: u64) -> Self {
        Self {
            variant,
            iterations,
            input: b"test".to_vec(),
            seeds: SeedSource::None,
            tunings: Vec::new(),
            warmup: false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PerfError {
    #[error("iteration count must be at least 1")]
    NoIterations,

    #[error("seed width {width} must be even and hold {iterations} in decimal")]
    SeedWidth { width: usize, iterations: u64 },

    #[error("digest call {operation} failed: {source}")]
    Provider {
        operation: u64,
        #[source]
        source: ProviderError,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct PerfSample {
    pub variant: Variant,
    pub iterations: u64,
    /// Digest calls actually made in the timed loop.
    pub operations: u64,
    pub elapsed: Duration,
}

impl PerfSample {
    pub fn elapsed_millis(&self) -> f64 {
        self.elapsed.as_secs_f64() * 1000.0
    }

    /// Operations per second; `None` when no time was measured.
    pub fn throughput(&self) -> Option<f64> {
        if self.elapsed.is_zero() {
            return None;
        }
        Some(1000.0 * self.operations as f64 / self.elapsed_millis())
    }
}

impl fmt::Display for PerfSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.throughput() {
            Some(rate) => write!(f, "Perf: {:.2} H/s", rate),
            None => write!(f, "Perf: undefined H/s"),
        }
    }
}

/// Time `iterations` rounds of digest calls against the registered provider.
pub fn run_perf(registry: &ProviderRegistry, config: &PerfConfig) -> Result<PerfSample, PerfError> {
    if config.iterations == 0 {
        return Err(PerfError::NoIterations);
    }
    config.seeds.validate(config.iterations)?;

    let provider = registry
        .get(config.variant)
        .map_err(|source| PerfError::Provider { operation: 0, source })?;

    let tunings: Vec<Option<u32>> = if config.tunings.is_empty() {
        vec![None]
    } else {
        config.tunings.iter().copied().map(Some).collect()
    };
    let mut rng = rand::thread_rng();

    let request = |seed: Option<Vec<u8>>, tuning: Option<u32>| DigestRequest {
        variant: config.variant,
        input: config.input.clone(),
        seed,
        tuning,
    };

    if config.warmup {
        let warmup = request(config.seeds.seed(config.iterations, &mut rng), tunings[0]);
        guarded_digest(&*provider, &warmup)
            .map_err(|source| PerfError::Provider { operation: 0, source })?;
        debug!("warm-up call done");
    }

    info!(
        "timing {} iteration(s) x {} tuning value(s) of {} on {}",
        config.iterations,
        tunings.len(),
        config.variant,
        provider.name()
    );

    let mut operations = 0u64;
    let start = Instant::now();
    for counter in (1..=config.iterations).rev() {
        let seed = config.seeds.seed(counter, &mut rng);
        for tuning in &tunings {
            operations += 1;
            guarded_digest(&*provider, &request(seed.clone(), *tuning))
                .map_err(|source| PerfError::Provider { operation: operations, source })?;
        }

        if operations % 100_000 == 0 {
            debug!("{} digests...", operations);
        }
    }
    let elapsed = start.elapsed();

    Ok(PerfSample {
        variant: config.variant,
        iterations: config.iterations,
        operations,
        elapsed,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::hasher::testing::{registry_with, FaultyHasher};
    use crate::hasher::HashProvider;

    /// Records every request it sees.
    #[derive(Default)]
    struct RecordingHasher {
        seen: Mutex<Vec<DigestRequest>>,
    }

    impl HashProvider for RecordingHasher {
        fn name(&self) -> &str {
            "recording"
        }

        fn variants(&self) -> &[Variant] {
            &[Variant::RandomX]
        }

        fn digest(&self, request: &DigestRequest) -> Result<Vec<u8>, ProviderError> {
            self.seen.lock().unwrap().push(request.clone());
            Ok(vec![0u8; 32])
        }
    }

    #[test]
    fn test_operation_count_covers_every_tuning() {
        let recorder = Arc::new(RecordingHasher::default());
        let registry = registry_with(recorder.clone());

        let mut config = PerfConfig::new(Variant::RandomX, 5);
        config.seeds = SeedSource::Incrementing { width: 64 };
        config.tunings = vec![17, 18, 0];

        let sample = run_perf(&registry, &config).unwrap();
        assert_eq!(sample.iterations, 5);
        assert_eq!(sample.operations, 15);

        let seen = recorder.seen.lock().unwrap();
        assert_eq!(seen.len(), 15);
        let tunings: Vec<Option<u32>> = seen[..3].iter().map(|r| r.tuning).collect();
        assert_eq!(tunings, [Some(17), Some(18), Some(0)]);
    }

    #[test]
    fn test_warmup_is_not_counted() {
        let recorder = Arc::new(RecordingHasher::default());
        let registry = registry_with(recorder.clone());

        let mut config = PerfConfig::new(Variant::RandomX, 3);
        config.warmup = true;

        let sample = run_perf(&registry, &config).unwrap();
        assert_eq!(sample.operations, 3);
        assert_eq!(recorder.seen.lock().unwrap().len(), 4);
    }

    #[test]
    fn test_incrementing_seeds() {
        let seed = counter_seed(100, 64);
        assert_eq!(seed.len(), 32);
        assert!(seed[..30].iter().all(|&b| b == 0));
        assert_eq!(&seed[30..], &[0x01, 0x00]);

        let recorder = Arc::new(RecordingHasher::default());
        let registry = registry_with(recorder.clone());
        let mut config = PerfConfig::new(Variant::RandomX, 12);
        config.seeds = SeedSource::Incrementing { width: 64 };
        run_perf(&registry, &config).unwrap();

        let seen = recorder.seen.lock().unwrap();
        assert_eq!(seen[0].seed.as_deref().map(hex::encode).unwrap(), format!("{:0>64}", 12));
        let mut seeds: Vec<_> = seen.iter().map(|r| r.seed.clone()).collect();
        seeds.dedup();
        assert_eq!(seeds.len(), 12);
    }

    #[test]
    fn test_random_seeds_have_requested_length() {
        let recorder = Arc::new(RecordingHasher::default());
        let registry = registry_with(recorder.clone());
        let mut config = PerfConfig::new(Variant::RandomX, 4);
        config.seeds = SeedSource::Random { len: 32 };
        run_perf(&registry, &config).unwrap();

        let seen = recorder.seen.lock().unwrap();
        assert!(seen.iter().all(|r| r.seed.as_ref().map(Vec::len) == Some(32)));
    }

    #[test]
    fn test_throughput_positive_and_finite() {
        let registry = ProviderRegistry::with_defaults();
        let sample = run_perf(&registry, &PerfConfig::new(Variant::Blake2b, 200)).unwrap();

        let rate = sample.throughput().unwrap();
        assert!(rate > 0.0 && rate.is_finite());
        assert!(sample.to_string().starts_with("Perf: "));
        assert!(sample.to_string().ends_with(" H/s"));
    }

    #[test]
    fn test_zero_elapsed_has_no_throughput() {
        let sample = PerfSample {
            variant: Variant::Blake2b,
            iterations: 10,
            operations: 10,
            elapsed: Duration::ZERO,
        };
        assert_eq!(sample.throughput(), None);
        assert_eq!(sample.to_string(), "Perf: undefined H/s");

        let sample = PerfSample {
            elapsed: Duration::from_millis(500),
            ..sample
        };
        assert_eq!(sample.throughput(), Some(20.0));
    }

    #[test]
    fn test_rejects_bad_configs() {
        let registry = ProviderRegistry::with_defaults();

        let config = PerfConfig::new(Variant::Blake2b, 0);
        assert!(matches!(run_perf(&registry, &config), Err(PerfError::NoIterations)));

        let mut config = PerfConfig::new(Variant::Blake2b, 100);
        config.seeds = SeedSource::Incrementing { width: 63 };
        assert!(matches!(run_perf(&registry, &config), Err(PerfError::SeedWidth { .. })));
        config.seeds = SeedSource::Incrementing { width: 2 };
        assert!(matches!(run_perf(&registry, &config), Err(PerfError::SeedWidth { .. })));
    }

    #[test]
    fn test_provider_failure_aborts() {
        let registry = registry_with(Arc::new(FaultyHasher));
        let mut config = PerfConfig::new(Variant::Blake2b, 10);
        config.input = b"fail".to_vec();

        let err = run_perf(&registry, &config).unwrap_err();
        assert!(matches!(err, PerfError::Provider { operation: 1, .. }));

        let config = PerfConfig::new(Variant::Cryptonight, 10);
        assert!(matches!(
            run_perf(&registry, &config),
            Err(PerfError::Provider {
                source: ProviderError::Unsupported(Variant::Cryptonight),
                ..
            })
        ));
    }
}
