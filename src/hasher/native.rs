//! Bindings to a prebuilt `libmultihashing`.
//!
//! The library carries the CryptoNight and RandomX implementations; this
//! module only marshals buffers across the C ABI. Each entry point owns its
//! scratch memory per call, which is what makes the provider reentrant.

use std::os::raw::c_int;

use super::{DigestRequest, HashProvider, ProviderError, Variant, DIGEST_LEN};

#[link(name = "multihashing")]
extern "C" {
    /// Returns 0 on success. `output` must hold 32 bytes.
    fn multihashing_cryptonight(
        input: *const u8,
        input_len: usize,
        output: *mut u8,
        variant: c_int,
    ) -> c_int;

    fn multihashing_cryptonight_light(
        input: *const u8,
        input_len: usize,
        output: *mut u8,
        variant: c_int,
    ) -> c_int;

    /// `variant` 0 is the original, 1 XHV, 2 TUBE.
    fn multihashing_cryptonight_heavy(
        input: *const u8,
        input_len: usize,
        output: *mut u8,
        variant: c_int,
    ) -> c_int;

    fn multihashing_cryptonight_pico(
        input: *const u8,
        input_len: usize,
        output: *mut u8,
        variant: c_int,
    ) -> c_int;

    /// `variant` selects the RandomX flavour (0 Monero, 17 Wownero, ...).
    fn multihashing_randomx(
        input: *const u8,
        input_len: usize,
        seed: *const u8,
        seed_len: usize,
        output: *mut u8,
        variant: c_int,
    ) -> c_int;

    fn multihashing_random_wow(
        input: *const u8,
        input_len: usize,
        seed: *const u8,
        seed_len: usize,
        output: *mut u8,
        variant: c_int,
    ) -> c_int;
}

pub struct NativeHasher;

impl NativeHasher {
    fn tuning(request: &DigestRequest) -> Result<c_int, ProviderError> {
        let tuning = request.tuning.unwrap_or(0);
        c_int::try_from(tuning).map_err(|_| ProviderError::UnsupportedTuning {
            variant: request.variant,
            tuning,
        })
    }
}

impl HashProvider for NativeHasher {
    fn name(&self) -> &str {
        "native"
    }

    fn variants(&self) -> &[Variant] {
        &[
            Variant::Cryptonight,
            Variant::CryptonightLight,
            Variant::CryptonightHeavy,
            Variant::CryptonightPico,
            Variant::RandomX,
            Variant::RandomWow,
        ]
    }

    fn digest(&self, request: &DigestRequest) -> Result<Vec<u8>, ProviderError> {
        let tuning = Self::tuning(request)?;
        let input = request.input.as_slice();
        let mut output = vec![0u8; DIGEST_LEN];

        // SAFETY: every pointer comes from a live slice whose length is passed
        // alongside it, and `output` is DIGEST_LEN bytes as the ABI requires.
        let status = unsafe {
            match request.variant {
                Variant::Cryptonight => multihashing_cryptonight(
                    input.as_ptr(),
                    input.len(),
                    output.as_mut_ptr(),
                    tuning,
                ),
                Variant::CryptonightLight => multihashing_cryptonight_light(
                    input.as_ptr(),
                    input.len(),
                    output.as_mut_ptr(),
                    tuning,
                ),
                Variant::CryptonightHeavy => multihashing_cryptonight_heavy(
                    input.as_ptr(),
                    input.len(),
                    output.as_mut_ptr(),
                    tuning,
                ),
                Variant::CryptonightPico => multihashing_cryptonight_pico(
                    input.as_ptr(),
                    input.len(),
                    output.as_mut_ptr(),
                    tuning,
                ),
                Variant::RandomX => {
                    let seed = request.require_seed()?;
                    multihashing_randomx(
                        input.as_ptr(),
                        input.len(),
                        seed.as_ptr(),
                        seed.len(),
                        output.as_mut_ptr(),
                        tuning,
                    )
                }
                Variant::RandomWow => {
                    let seed = request.require_seed()?;
                    multihashing_random_wow(
                        input.as_ptr(),
                        input.len(),
                        seed.as_ptr(),
                        seed.len(),
                        output.as_mut_ptr(),
                        tuning,
                    )
                }
                Variant::Blake2b => return Err(ProviderError::Unsupported(request.variant)),
            }
        };

        if status != 0 {
            return Err(ProviderError::Backend {
                provider: self.name().to_string(),
                message: format!("{} returned status {}", request.variant, status),
            });
        }

        Ok(output)
    }
}
