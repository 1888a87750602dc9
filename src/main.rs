use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod cli;
mod config;
mod fixture;
mod hasher;
mod kat;
mod perf;
mod runner;
mod suite;
mod tally;

use cli::{Cli, Command, PerfArgs, VerifyArgs};
use config::RunConfig;
use hasher::ProviderRegistry;
use perf::{PerfConfig, PerfError, SeedSource};
use runner::ExecutionPolicy;

/// Process exit codes.
mod codes {
    pub const SUCCESS: u8 = 0;
    /// A suite or check failed, or a suite could not start.
    pub const FAILURES: u8 = 1;
    pub const CONFIG_ERROR: u8 = 2;
}

fn main() -> ExitCode {
    // Logs go to stderr; stdout carries the report only
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("hashcheck=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let registry = ProviderRegistry::with_defaults();

    let outcome = match cli.command {
        Command::Verify(args) => verify(&registry, args),
        Command::Perf(args) => perf(&registry, args),
        Command::Selftest => selftest(&registry),
        Command::Variants => variants(&registry),
    };

    match outcome {
        Ok(true) => ExitCode::from(codes::SUCCESS),
        Ok(false) => ExitCode::from(codes::FAILURES),
        Err(err) => {
            eprintln!("error: {:#}", err);
            ExitCode::from(exit_code(&err))
        }
    }
}

/// Provider failures while timing count as failures; everything else that
/// stops a command early is configuration.
fn exit_code(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<PerfError>() {
        Some(PerfError::Provider { .. }) => codes::FAILURES,
        _ => codes::CONFIG_ERROR,
    }
}

fn load_run_config(args: &VerifyArgs) -> Result<RunConfig> {
    let mut config = match (&args.manifest, &args.fixture, args.variant) {
        (Some(manifest), _, _) => RunConfig::from_manifest(manifest)
            .with_context(|| format!("loading manifest {}", manifest.display()))?,
        (None, Some(fixture), Some(variant)) => {
            let seed = args
                .seed
                .as_deref()
                .map(config::parse_seed)
                .transpose()
                .context("--seed is not hex")?;
            let name = args.name.clone().unwrap_or_else(|| variant.to_string());
            let definition =
                config::build_definition(name, fixture.clone(), variant, args.mode, seed, args.tuning)?;
            RunConfig::single(definition)
        }
        _ => bail!("verify needs --manifest, or --fixture with --variant"),
    };

    if args.sequential {
        config.execution = ExecutionPolicy::Sequential;
    }
    if let Some(secs) = args.timeout_secs {
        config.options.timeout = std::time::Duration::from_secs(secs);
    }
    if let Some(max_in_flight) = args.max_in_flight {
        config.options.max_in_flight = max_in_flight;
    }
    if let Some(malformed) = args.malformed {
        config.options.malformed = malformed;
    }
    config.validate()?;
    Ok(config)
}

fn verify(registry: &ProviderRegistry, args: VerifyArgs) -> Result<bool> {
    let config = load_run_config(&args)?;
    info!("Providers: {:?}", registry);

    let report = runner::run_suites(
        &config.suites,
        registry,
        &config.options,
        config.execution,
        |outcome| println!("{}", outcome),
    )?;

    if !report.success() {
        warn!("{} of {} suite(s) failed", report.failed_suites(), report.outcomes.len());
    }
    Ok(report.success())
}

fn perf(registry: &ProviderRegistry, args: PerfArgs) -> Result<bool> {
    let seeds = match (&args.seed, args.incrementing_seeds, args.random_seeds) {
        (Some(seed), _, _) => SeedSource::Fixed(config::parse_seed(seed).context("--seed is not hex")?),
        (None, Some(width), _) => SeedSource::Incrementing { width },
        (None, None, Some(len)) => SeedSource::Random { len },
        (None, None, None) => SeedSource::None,
    };
    if args.variant.requires_seed() && seeds == SeedSource::None {
        bail!(
            "{} needs --seed, --incrementing-seeds or --random-seeds",
            args.variant
        );
    }

    let mut config = PerfConfig::new(args.variant, args.iterations);
    config.input = args.input.into_bytes();
    config.seeds = seeds;
    config.tunings = args.tunings;
    config.warmup = args.warmup;

    let sample = perf::run_perf(registry, &config)?;
    info!(
        "{} digest(s) in {:.1} ms",
        sample.operations,
        sample.elapsed_millis()
    );
    println!("{}", sample);
    Ok(true)
}

fn selftest(registry: &ProviderRegistry) -> Result<bool> {
    let outcomes = kat::run_known_answers(registry, kat::KNOWN_ANSWERS);
    for outcome in &outcomes {
        println!("{}", outcome);
    }
    Ok(outcomes.iter().all(kat::KnownAnswerOutcome::acceptable))
}

fn variants(registry: &ProviderRegistry) -> Result<bool> {
    for (variant, provider) in registry.entries() {
        println!("{}\t{}", variant, provider);
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hasher::{ProviderError, Variant};

    #[test]
    fn test_exit_codes() {
        let provider = anyhow::Error::from(PerfError::Provider {
            operation: 3,
            source: ProviderError::Unsupported(Variant::RandomX),
        });
        assert_eq!(exit_code(&provider), codes::FAILURES);

        let config = anyhow::Error::from(PerfError::NoIterations);
        assert_eq!(exit_code(&config), codes::CONFIG_ERROR);

        let manifest = anyhow::anyhow!("manifest defines no suites");
        assert_eq!(exit_code(&manifest), codes::CONFIG_ERROR);
    }

    #[test]
    fn test_overrides_apply_to_adhoc_suite() {
        let cli = Cli::try_parse_from([
            "hashcheck",
            "verify",
            "--fixture",
            "vectors.txt",
            "--variant",
            "blake2b",
            "--sequential",
            "--timeout-secs",
            "3",
            "--malformed",
            "abort",
        ])
        .unwrap();
        let Command::Verify(args) = cli.command else {
            panic!("expected verify");
        };

        let config = load_run_config(&args).unwrap();
        assert_eq!(config.execution, ExecutionPolicy::Sequential);
        assert_eq!(config.options.timeout, std::time::Duration::from_secs(3));
        assert_eq!(config.options.malformed, suite::MalformedPolicy::Abort);
        assert_eq!(config.suites[0].name, "blake2b");
    }

    #[test]
    fn test_sample_manifest_passes() {
        let manifest = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("fixtures/suites.toml");
        let cli = Cli::try_parse_from([
            "hashcheck",
            "verify",
            "--manifest",
            manifest.to_str().unwrap(),
        ])
        .unwrap();
        let Command::Verify(args) = cli.command else {
            panic!("expected verify");
        };

        assert!(verify(&ProviderRegistry::with_defaults(), args).unwrap());
    }

    #[test]
    fn test_bad_overrides_rejected() {
        let cli = Cli::try_parse_from([
            "hashcheck",
            "verify",
            "--fixture",
            "wow.txt",
            "--variant",
            "random_wow",
        ])
        .unwrap();
        let Command::Verify(args) = cli.command else {
            panic!("expected verify");
        };
        assert!(load_run_config(&args).is_err());

        let cli = Cli::try_parse_from([
            "hashcheck",
            "verify",
            "--fixture",
            "b.txt",
            "--variant",
            "blake2b",
            "--max-in-flight",
            "0",
        ])
        .unwrap();
        let Command::Verify(args) = cli.command else {
            panic!("expected verify");
        };
        assert!(load_run_config(&args).is_err());
    }
}
