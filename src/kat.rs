//! Known-answer checks with literal digests.

use std::fmt;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;

use tracing::warn;

use crate::hasher::{DigestRequest, ProviderError, ProviderRegistry, Variant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KnownAnswer {
    pub label: &'static str,
    pub variant: Variant,
    pub input: &'static str,
    pub seed_hex: Option<&'static str>,
    pub tuning: Option<u32>,
    pub expected_hex: &'static str,
}

pub const KNOWN_ANSWERS: &[KnownAnswer] = &[
    KnownAnswer {
        label: "RandomWOW",
        variant: Variant::RandomWow,
        input: "This is a test",
        seed_hex: Some("0000000000000000000000000000000000000000000000000000000000000000"),
        tuning: None,
        expected_hex: "dcd9efef9df794171af262df328bd2c16a6d51ae9abdcb9357ce4ab3c0c9a8ba",
    },
    KnownAnswer {
        label: "CryptoNight",
        variant: Variant::Cryptonight,
        input: "This is a test",
        seed_hex: None,
        tuning: Some(0),
        expected_hex: "a084f01d1437a09c6985401b60d43554ae105802c5f5d8a9b3253649c0be6605",
    },
    KnownAnswer {
        label: "Blake2b-256 empty",
        variant: Variant::Blake2b,
        input: "",
        seed_hex: None,
        tuning: None,
        expected_hex: "0e5751c026e543b2e8ab2eb06099daa1d1e5df47778f7787faab45cdf12fe3a8",
    },
    KnownAnswer {
        label: "Blake2b-256 abc",
        variant: Variant::Blake2b,
        input: "abc",
        seed_hex: None,
        tuning: None,
        expected_hex: "bddd813c634239723171ef3fee98579b94964e3bb1cb3e427262c8c068d52319",
    },
];

/// How long the async half of a check may take.
const ASYNC_WAIT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Passed,
    Failed { actual: String },
    /// Sync and async digests differ.
    Diverged { sync: String, deferred: String },
    Errored(ProviderError),
    /// No provider for the variant in this build.
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnownAnswerOutcome {
    pub check: KnownAnswer,
    pub verdict: Verdict,
}

impl KnownAnswerOutcome {
    /// Skipped checks do not count against the run.
    pub fn acceptable(&self) -> bool {
        matches!(self.verdict, Verdict::Passed | Verdict::Skipped)
    }
}

impl fmt::Display for KnownAnswerOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = self.check.label;
        match &self.verdict {
            Verdict::Passed => write!(f, "{} test passed", label),
            Verdict::Failed { actual } => write!(f, "{} test failed: {}", label, actual),
            Verdict::Diverged { sync, deferred } => write!(
                f,
                "{} test failed: sync {} and async {} do not agree",
                label, sync, deferred
            ),
            Verdict::Errored(err) => write!(f, "{} test errored: {}", label, err),
            Verdict::Skipped => write!(f, "{} test skipped: no {} provider", label, self.check.variant),
        }
    }
}

fn request_for(check: &KnownAnswer) -> Result<DigestRequest, ProviderError> {
    let mut request = DigestRequest::new(check.variant, check.input);
    if let Some(seed_hex) = check.seed_hex {
        let seed = hex::decode(seed_hex).map_err(|err| ProviderError::InvalidSeed {
            variant: check.variant,
            reason: err.to_string(),
        })?;
        request = request.with_seed(seed);
    }
    if let Some(tuning) = check.tuning {
        request = request.with_tuning(tuning);
    }
    Ok(request)
}

/// Hash through the async path and wait for the completion.
fn deferred_digest(
    registry: &ProviderRegistry,
    request: DigestRequest,
) -> Result<Vec<u8>, ProviderError> {
    let (tx, rx) = mpsc::channel();
    registry.digest_async(
        request,
        Box::new(move |result| {
            let _ = tx.send(result);
        }),
    );
    rx.recv_timeout(ASYNC_WAIT).unwrap_or_else(|err| match err {
        RecvTimeoutError::Timeout => Err(ProviderError::Backend {
            provider: "async".to_string(),
            message: format!("no completion within {:?}", ASYNC_WAIT),
        }),
        RecvTimeoutError::Disconnected => Err(ProviderError::Disconnected),
    })
}

pub fn check(registry: &ProviderRegistry, known: &KnownAnswer) -> KnownAnswerOutcome {
    let verdict = if !registry.contains(known.variant) {
        Verdict::Skipped
    } else {
        match request_for(known) {
            Err(err) => Verdict::Errored(err),
            Ok(request) => {
                let outcomes = (
                    registry.digest(&request),
                    deferred_digest(registry, request),
                );
                match outcomes {
                    (Ok(sync), Ok(deferred)) if sync != deferred => Verdict::Diverged {
                        sync: hex::encode(sync),
                        deferred: hex::encode(deferred),
                    },
                    (Ok(sync), Ok(_)) => {
                        let actual = hex::encode(sync);
                        if actual == known.expected_hex {
                            Verdict::Passed
                        } else {
                            Verdict::Failed { actual }
                        }
                    }
                    (Err(err), _) | (_, Err(err)) => Verdict::Errored(err),
                }
            }
        }
    };

    if !matches!(verdict, Verdict::Passed | Verdict::Skipped) {
        warn!("{}: {:?}", known.label, verdict);
    }

    KnownAnswerOutcome {
        check: *known,
        verdict,
    }
}

pub fn run_known_answers(registry: &ProviderRegistry, checks: &[KnownAnswer]) -> Vec<KnownAnswerOutcome> {
    checks.iter().map(|known| check(registry, known)).collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::hasher::testing::{registry_with, SplitBrainHasher, TableHasher};

    #[test]
    fn test_builtin_answers_pass() {
        let registry = ProviderRegistry::with_defaults();
        let outcomes = run_known_answers(&registry, KNOWN_ANSWERS);

        for outcome in &outcomes {
            assert!(outcome.acceptable(), "{}", outcome);
        }
        let blake = outcomes
            .iter()
            .filter(|o| o.check.variant == Variant::Blake2b)
            .count();
        assert_eq!(blake, 2);
    }

    #[test]
    fn test_random_wow_answer_plumbing() {
        let wow = KNOWN_ANSWERS
            .iter()
            .find(|known| known.variant == Variant::RandomWow)
            .unwrap();
        assert_eq!(hex::decode(wow.seed_hex.unwrap()).unwrap(), vec![0u8; 32]);

        let registry = registry_with(Arc::new(TableHasher::new(
            Variant::RandomWow,
            &[("This is a test", wow.expected_hex)],
        )));
        let outcome = check(&registry, wow);
        assert_eq!(outcome.verdict, Verdict::Passed);
        assert_eq!(outcome.to_string(), "RandomWOW test passed");
    }

    #[test]
    fn test_wrong_digest_fails() {
        let wow = &KNOWN_ANSWERS[0];
        let registry = registry_with(Arc::new(TableHasher::new(Variant::RandomWow, &[])));

        let outcome = check(&registry, wow);
        assert_eq!(
            outcome.verdict,
            Verdict::Failed {
                actual: "00".repeat(32)
            }
        );
        assert!(!outcome.acceptable());
        assert!(outcome.to_string().starts_with("RandomWOW test failed: 0000"));
    }

    #[test]
    fn test_missing_provider_is_skipped() {
        let outcome = check(&ProviderRegistry::empty(), &KNOWN_ANSWERS[1]);
        assert_eq!(outcome.verdict, Verdict::Skipped);
        assert!(outcome.acceptable());
    }

    #[test]
    fn test_divergent_paths_detected() {
        let registry = registry_with(Arc::new(SplitBrainHasher));
        let outcome = check(&registry, &KNOWN_ANSWERS[2]);
        assert!(matches!(outcome.verdict, Verdict::Diverged { .. }));
    }
}
