use cryptoxide::hashing::blake2b::Blake2b;

use super::{DigestRequest, HashProvider, ProviderError, Variant};

/// Largest key Blake2b accepts.
const MAX_KEY_LEN: usize = 64;

/// Blake2b-256, keyed by the request seed when one is given.
///
/// Stateless, so trivially reentrant.
pub struct Blake2bHasher;

impl HashProvider for Blake2bHasher {
    fn name(&self) -> &str {
        "blake2b"
    }

    fn variants(&self) -> &[Variant] {
        &[Variant::Blake2b]
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

        let context = match request.seed.as_deref() {
            None | Some([]) => Blake2b::<256>::new(),
            Some(key) if key.len() <= MAX_KEY_LEN => Blake2b::<256>::new_keyed(key),
            Some(key) => {
                return Err(ProviderError::InvalidSeed {
                    variant: request.variant,
                    reason: format!("{} bytes exceeds the {} byte key limit", key.len(), MAX_KEY_LEN),
                })
            }
        };

        Ok(context.update(&request.input).finalize().to_vec())
    }
}
