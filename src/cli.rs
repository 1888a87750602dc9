use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::hasher::Variant;
use crate::suite::{DispatchMode, MalformedPolicy};

#[derive(Parser, Debug)]
#[command(name = "hashcheck")]
#[command(about = "Hashcheck - fixture-driven verification for PoW hash providers", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Check providers against fixture files of "<digest-hex> <input-text>" lines
    Verify(VerifyArgs),

    /// Measure digest throughput for one variant
    Perf(PerfArgs),

    /// Run the built-in known-answer checks
    Selftest,

    /// List variants with a provider in this build
    Variants,
}

#[derive(Args, Debug)]
pub struct VerifyArgs {
    /// Suite manifest (TOML)
    #[arg(long, conflicts_with_all = ["fixture", "variant"], required_unless_present = "fixture")]
    pub manifest: Option<PathBuf>,

    /// Fixture file for a single suite
    #[arg(long, requires = "variant")]
    pub fixture: Option<PathBuf>,

    /// Variant the fixture was generated with
    #[arg(long, requires = "fixture")]
    pub variant: Option<Variant>,

    /// Suite name (defaults to the variant name)
    #[arg(long)]
    pub name: Option<String>,

    /// Provider entry point to exercise
    #[arg(long, value_enum, default_value_t = DispatchMode::Sync)]
    pub mode: DispatchMode,

    /// Seed for seeded variants (hex)
    #[arg(long)]
    pub seed: Option<String>,

    /// Variant tuning value
    #[arg(long)]
    pub tuning: Option<u32>,

    /// Run suites one after another
    #[arg(long)]
    pub sequential: bool,

    /// Per-line timeout for async calls
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// Async calls allowed in flight per suite
    #[arg(long)]
    pub max_in_flight: Option<usize>,

    /// What to do with lines that do not parse
    #[arg(long, value_enum)]
    pub malformed: Option<MalformedPolicy>,
}

#[derive(Args, Debug)]
pub struct PerfArgs {
    /// Variant to time
    #[arg(long)]
    pub variant: Variant,

    /// Timed iterations
    #[arg(long, default_value = "200")]
    pub iterations: u64,

    /// Input hashed on every call
    #[arg(long, default_value = "test")]
    pub input: String,

    /// Fixed seed (hex)
    #[arg(long, conflicts_with_all = ["incrementing_seeds", "random_seeds"])]
    pub seed: Option<String>,

    /// Seed each iteration with its counter, zero-padded to this many hex digits
    #[arg(long, value_name = "WIDTH", conflicts_with = "random_seeds")]
    pub incrementing_seeds: Option<usize>,

    /// Seed each iteration with this many random bytes
    #[arg(long, value_name = "LEN")]
    pub random_seeds: Option<usize>,

    /// Tuning value; repeat to hash every iteration once per value
    #[arg(long = "tuning")]
    pub tunings: Vec<u32>,

    /// Make one untimed call first
    #[arg(long)]
    pub warmup: bool,
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_verify_adhoc() {
        let cli = Cli::try_parse_from([
            "hashcheck",
            "verify",
            "--fixture",
            "cn.txt",
            "--variant",
            "cryptonight",
            "--mode",
            "both",
        ])
        .unwrap();
        let Command::Verify(args) = cli.command else {
            panic!("expected verify");
        };
        assert_eq!(args.variant, Some(Variant::Cryptonight));
        assert_eq!(args.mode, DispatchMode::Both);
        assert!(!args.sequential);
    }

    #[test]
    fn test_verify_needs_a_source() {
        assert!(Cli::try_parse_from(["hashcheck", "verify"]).is_err());
        assert!(Cli::try_parse_from(["hashcheck", "verify", "--fixture", "cn.txt"]).is_err());
        assert!(Cli::try_parse_from([
            "hashcheck",
            "verify",
            "--manifest",
            "suites.toml",
            "--fixture",
            "cn.txt",
            "--variant",
            "blake2b",
        ])
        .is_err());
    }

    #[test]
    fn test_perf_tunings_repeat() {
        let cli = Cli::try_parse_from([
            "hashcheck",
            "perf",
            "--variant",
            "randomx",
            "--iterations",
            "100",
            "--incrementing-seeds",
            "64",
            "--tuning",
            "17",
            "--tuning",
            "18",
            "--tuning",
            "0",
        ])
        .unwrap();
        let Command::Perf(args) = cli.command else {
            panic!("expected perf");
        };
        assert_eq!(args.tunings, [17, 18, 0]);
        assert_eq!(args.incrementing_seeds, Some(64));
        assert_eq!(args.input, "test");
    }

    #[test]
    fn test_verify_help_describes_raw_input() {
        let command = Cli::command();
        let verify = command.find_subcommand("verify").unwrap();
        let about = verify.get_about().unwrap().to_string();
        assert!(about.contains("<digest-hex> <input-text>"), "{}", about);
    }

    #[test]
    fn test_unknown_variant_rejected() {
        assert!(Cli::try_parse_from(["hashcheck", "perf", "--variant", "scrypt"]).is_err());
    }
}
