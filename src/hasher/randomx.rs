//! RandomX through the `randomx-rs` bindings (light mode, tuning 0 only).

use std::sync::Mutex;

use randomx_rs::{RandomXCache, RandomXFlag, RandomXVM};
use tracing::info;

use super::{DigestRequest, HashProvider, ProviderError, Variant};

/// Light-mode VM for the most recent key.
///
/// Rebuilding the cache costs far more than a hash, so the VM is kept until a
/// request arrives with a different seed. The mutex serializes hashing.
pub struct RandomXHasher {
    flags: RandomXFlag,
    vm: Mutex<Option<(Vec<u8>, RandomXVM)>>,
}

impl RandomXHasher {
    pub fn new() -> Self {
        Self {
            flags: RandomXFlag::get_recommended_flags(),
            vm: Mutex::new(None),
        }
    }

    fn backend_error(err: impl std::fmt::Display) -> ProviderError {
        ProviderError::Backend {
            provider: "randomx-rs".to_string(),
            message: err.to_string(),
        }
    }
}

impl Default for RandomXHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl HashProvider for RandomXHasher {
    fn name(&self) -> &str {
        "randomx-rs"
    }

    fn variants(&self) -> &[Variant] {
        &[Variant::RandomX]
    }

    fn digest(&self, request: &DigestRequest) -> Result<Vec<u8>, ProviderError> {
        match request.tuning {
            None | Some(0) => {}
            Some(tuning) => {
                return Err(ProviderError::UnsupportedTuning {
                    variant: request.variant,
                    tuning,
                })
            }
        }
        let seed = request.require_seed()?;

        let mut slot = self
            .vm
            .lock()
            .map_err(|_| Self::backend_error("vm lock poisoned"))?;

        let stale = !matches!(slot.as_ref(), Some((key, _)) if key.as_slice() == seed);
        if stale {
            info!("initializing RandomX cache for key {}", hex::encode(seed));
            let cache = RandomXCache::new(self.flags, seed).map_err(Self::backend_error)?;
            let vm = RandomXVM::new(self.flags, Some(cache), None).map_err(Self::backend_error)?;
            *slot = Some((seed.to_vec(), vm));
        }

        match slot.as_ref() {
            Some((_, vm)) => vm
                .calculate_hash(&request.input)
                .map_err(Self::backend_error),
            None => Err(Self::backend_error("vm missing after initialization")),
        }
    }
}
