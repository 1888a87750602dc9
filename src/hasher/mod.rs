/*!
# Hash provider adapter

Every hashing backend sits behind [`HashProvider`]. The harness never calls an
algorithm directly: it builds a [`DigestRequest`] and hands it to whichever
provider the [`ProviderRegistry`] has registered for the request's [`Variant`].

The algorithms themselves live outside this crate. The only one compiled in
unconditionally is Blake2b-256, which backs the self-checks and tests.
*/

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::str::FromStr;
use std::sync::Arc;
use std::thread;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

mod blake2b;
#[cfg(feature = "native")]
mod native;
#[cfg(feature = "randomx")]
mod randomx;

pub use blake2b::Blake2bHasher;

/// Digest size shared by every supported variant.
pub const DIGEST_LEN: usize = 32;

/// A named algorithm configuration exposed by a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Variant {
    Cryptonight,
    CryptonightLight,
    /// Tuning 0 original, 1 XHV, 2 TUBE.
    CryptonightHeavy,
    CryptonightPico,
    #[serde(rename = "randomx")]
    RandomX,
    RandomWow,
    Blake2b,
}

impl Variant {
    pub const ALL: [Variant; 7] = [
        Variant::Cryptonight,
        Variant::CryptonightLight,
        Variant::CryptonightHeavy,
        Variant::CryptonightPico,
        Variant::RandomX,
        Variant::RandomWow,
        Variant::Blake2b,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Variant::Cryptonight => "cryptonight",
            Variant::CryptonightLight => "cryptonight_light",
            Variant::CryptonightHeavy => "cryptonight_heavy",
            Variant::CryptonightPico => "cryptonight_pico",
            Variant::RandomX => "randomx",
            Variant::RandomWow => "random_wow",
            Variant::Blake2b => "blake2b",
        }
    }

    pub fn digest_len(self) -> usize {
        DIGEST_LEN
    }

    /// RandomX-family variants hash against a key (seed hash).
    pub fn requires_seed(self) -> bool {
        matches!(self, Variant::RandomX | Variant::RandomWow)
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown variant '{0}' (expected one of: cryptonight, cryptonight_light, cryptonight_heavy, cryptonight_pico, randomx, random_wow, blake2b)")]
pub struct UnknownVariant(pub String);

impl FromStr for Variant {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Variant::ALL
            .into_iter()
            .find(|variant| variant.as_str() == s)
            .ok_or_else(|| UnknownVariant(s.to_string()))
    }
}

/// One digest computation: the input plus everything that parameterizes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestRequest {
    pub variant: Variant,
    pub input: Vec<u8>,
    pub seed: Option<Vec<u8>>,
    /// Height or mode selector; its meaning belongs to the provider.
    pub tuning: Option<u32>,
}

impl DigestRequest {
    pub fn new(variant: Variant, input: impl Into<Vec<u8>>) -> Self {
        Self {
            variant,
            input: input.into(),
            seed: None,
            tuning: None,
        }
    }

    pub fn with_seed(mut self, seed: impl Into<Vec<u8>>) -> Self {
        self.seed = Some(seed.into());
        self
    }

    pub fn with_tuning(mut self, tuning: u32) -> Self {
        self.tuning = Some(tuning);
        self
    }

    /// The seed, or `MissingSeed` for providers that cannot hash without one.
    #[cfg(any(feature = "native", feature = "randomx", test))]
    pub fn require_seed(&self) -> Result<&[u8], ProviderError> {
        match self.seed.as_deref() {
            Some(seed) if !seed.is_empty() => Ok(seed),
            _ => Err(ProviderError::MissingSeed(self.variant)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    #[error("no provider registered for variant {0}")]
    Unsupported(Variant),

    #[cfg(any(feature = "native", feature = "randomx", test))]
    #[error("variant {0} requires a seed")]
    MissingSeed(Variant),

    #[error("invalid seed for {variant}: {reason}")]
    InvalidSeed { variant: Variant, reason: String },

    #[error("variant {variant} does not support tuning {tuning}")]
    UnsupportedTuning { variant: Variant, tuning: u32 },

    #[error("{provider} backend failed: {message}")]
    Backend { provider: String, message: String },

    #[error("provider panicked: {0}")]
    Panicked(String),

    #[error("completion dropped before a digest was delivered")]
    Disconnected,
}

/// Receives the outcome of an asynchronous digest, exactly once.
pub type Completion = Box<dyn FnOnce(Result<Vec<u8>, ProviderError>) + Send + 'static>;

/// A hashing backend.
///
/// Implementations must be reentrant: the harness calls `digest` from many
/// threads at once and never serializes access on the provider's behalf.
pub trait HashProvider: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Variants this provider answers for.
    fn variants(&self) -> &[Variant];

    /// Blocking digest, deterministic in `(input, seed, tuning)`.
    fn digest(&self, request: &DigestRequest) -> Result<Vec<u8>, ProviderError>;

    /// Deferred digest. `done` is called once from a worker thread; callers
    /// must not assume it has run when this returns.
    fn digest_async(self: Arc<Self>, request: DigestRequest, done: Completion) {
        let thread_name = format!("{}-digest", self.name());
        let spawned = thread::Builder::new()
            .name(thread_name)
            .spawn(move || done(guarded_digest(&*self, &request)));

        // The completion went down with the closure; the caller's deadline
        // will score this dispatch.
        if let Err(err) = spawned {
            warn!("failed to spawn digest worker: {}", err);
        }
    }
}

/// Run `digest`, turning a provider panic into a `ProviderError`.
pub fn guarded_digest<P: HashProvider + ?Sized>(
    provider: &P,
    request: &DigestRequest,
) -> Result<Vec<u8>, ProviderError> {
    panic::catch_unwind(AssertUnwindSafe(|| provider.digest(request)))
        .unwrap_or_else(|payload| Err(ProviderError::Panicked(panic_message(&*payload))))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Variant → provider table. Cheap to clone; providers are shared.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<Variant, Arc<dyn HashProvider>>,
}

impl ProviderRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Built-in Blake2b plus whatever backends were compiled in.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(Blake2bHasher));

        #[cfg(feature = "native")]
        registry.register(Arc::new(native::NativeHasher));

        #[cfg(feature = "randomx")]
        registry.register(Arc::new(randomx::RandomXHasher::new()));

        registry
    }

    /// Register `provider` for every variant it claims. Later registrations
    /// replace earlier ones.
    pub fn register(&mut self, provider: Arc<dyn HashProvider>) {
        for &variant in provider.variants() {
            debug!("registering {} for {}", provider.name(), variant);
            if let Some(previous) = self.providers.insert(variant, Arc::clone(&provider)) {
                debug!("{} replaces {} for {}", provider.name(), previous.name(), variant);
            }
        }
    }

    pub fn get(&self, variant: Variant) -> Result<Arc<dyn HashProvider>, ProviderError> {
        self.providers
            .get(&variant)
            .cloned()
            .ok_or(ProviderError::Unsupported(variant))
    }

    pub fn contains(&self, variant: Variant) -> bool {
        self.providers.contains_key(&variant)
    }

    /// `(variant, provider name)` pairs in variant order.
    pub fn entries(&self) -> impl Iterator<Item = (Variant, &str)> + '_ {
        self.providers
            .iter()
            .map(|(variant, provider)| (*variant, provider.name()))
    }

    pub fn digest(&self, request: &DigestRequest) -> Result<Vec<u8>, ProviderError> {
        let provider = self.get(request.variant)?;
        guarded_digest(&*provider, request)
    }

    /// Async dispatch. An unregistered variant completes immediately with
    /// `Unsupported`.
    pub fn digest_async(&self, request: DigestRequest, done: Completion) {
        match self.get(request.variant) {
            Ok(provider) => provider.digest_async(request, done),
            Err(err) => done(Err(err)),
        }
    }
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.entries()).finish()
    }
}


#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::time::Duration;

    use super::testing::FaultyHasher;
    use super::*;

    #[test]
    fn test_variant_names_round_trip() {
        for variant in Variant::ALL {
            assert_eq!(variant.as_str().parse::<Variant>(), Ok(variant));
        }
        assert_eq!("cryptonight_heavy".parse::<Variant>(), Ok(Variant::CryptonightHeavy));
        assert_eq!("cryptonight_pico".parse::<Variant>(), Ok(Variant::CryptonightPico));
        assert_eq!(Variant::CryptonightHeavy.digest_len(), 32);
        assert!(!Variant::CryptonightPico.requires_seed());
        assert!("cryptonight_turtle".parse::<Variant>().is_err());
    }

    #[test]
    fn test_variant_serde_names() {
        #[derive(Deserialize)]
        struct Wrapper {
            variant: Variant,
        }

        let parsed: Wrapper = toml::from_str("variant = \"randomx\"").unwrap();
        assert_eq!(parsed.variant, Variant::RandomX);
        let parsed: Wrapper = toml::from_str("variant = \"random_wow\"").unwrap();
        assert_eq!(parsed.variant, Variant::RandomWow);
        let parsed: Wrapper = toml::from_str("variant = \"cryptonight_heavy\"").unwrap();
        assert_eq!(parsed.variant, Variant::CryptonightHeavy);
        let parsed: Wrapper = toml::from_str("variant = \"cryptonight_pico\"").unwrap();
        assert_eq!(parsed.variant, Variant::CryptonightPico);
    }

    #[test]
    fn test_require_seed() {
        let request = DigestRequest::new(Variant::RandomWow, "x");
        assert_eq!(
            request.require_seed(),
            Err(ProviderError::MissingSeed(Variant::RandomWow))
        );
        let request = request.with_seed(vec![0u8; 32]);
        assert_eq!(request.require_seed().unwrap().len(), 32);
    }

    #[test]
    fn test_registry_unsupported_variant() {
        let registry = ProviderRegistry::empty();
        let request = DigestRequest::new(Variant::Cryptonight, "This is a test");
        assert_eq!(
            registry.digest(&request),
            Err(ProviderError::Unsupported(Variant::Cryptonight))
        );

        let (tx, rx) = mpsc::channel();
        registry.digest_async(request, Box::new(move |result| tx.send(result).unwrap()));
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(1)).unwrap(),
            Err(ProviderError::Unsupported(Variant::Cryptonight))
        );
    }

    #[test]
    fn test_defaults_include_blake2b() {
        let registry = ProviderRegistry::with_defaults();
        assert!(registry.contains(Variant::Blake2b));
        assert!(registry
            .entries()
            .any(|(variant, name)| variant == Variant::Blake2b && name == "blake2b"));
    }

    #[test]
    fn test_sync_async_equivalence() {
        let registry = ProviderRegistry::with_defaults();
        let inputs: [&[u8]; 4] = [b"", b"This is a test", b"test", &[0u8; 76]];

        for input in inputs {
            for seed in [None, Some(vec![0u8; 32])] {
                let mut request = DigestRequest::new(Variant::Blake2b, input);
                if let Some(seed) = seed.clone() {
                    request = request.with_seed(seed);
                }
                let sync = registry.digest(&request).unwrap();

                let (tx, rx) = mpsc::channel();
                registry.digest_async(request, Box::new(move |result| tx.send(result).unwrap()));
                let deferred = rx.recv_timeout(Duration::from_secs(5)).unwrap().unwrap();

                assert_eq!(sync, deferred);
            }
        }
    }

    #[test]
    fn test_panics_become_provider_errors() {
        let registry = testing::registry_with(Arc::new(FaultyHasher));
        let result = registry.digest(&DigestRequest::new(Variant::Blake2b, "boom"));
        assert_eq!(
            result,
            Err(ProviderError::Panicked("scratchpad exploded".to_string()))
        );

        let (tx, rx) = mpsc::channel();
        registry.digest_async(
            DigestRequest::new(Variant::Blake2b, "boom"),
            Box::new(move |result| tx.send(result).unwrap()),
        );
        assert!(matches!(
            rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            Err(ProviderError::Panicked(_))
        ));
    }
}
