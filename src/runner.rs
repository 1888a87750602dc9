//! Runs a set of suites and collects one outcome per suite.

use std::collections::HashSet;
use std::fmt;
use std::thread;

use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::hasher::ProviderRegistry;
use crate::suite::{run_suite, SuiteDefinition, SuiteOptions, SuiteSetupError};
use crate::tally::SuiteResult;

/// Whether suites wait for each other. Either way each suite is announced
/// as it finishes, while the report keeps definition order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionPolicy {
    Sequential,
    /// One thread per suite.
    #[default]
    Concurrent,
}

#[derive(Debug)]
pub struct SuiteOutcome {
    pub name: String,
    pub result: Result<SuiteResult, SuiteSetupError>,
}

impl SuiteOutcome {
    pub fn success(&self) -> bool {
        matches!(&self.result, Ok(result) if result.success())
    }
}

impl fmt::Display for SuiteOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.result {
            Ok(result) => write!(f, "{}", result),
            Err(err) => write!(f, "setup failed on: {}: {}", self.name, err),
        }
    }
}

/// Outcomes in definition order.
#[derive(Debug, Default)]
pub struct RunReport {
    pub outcomes: Vec<SuiteOutcome>,
}

impl RunReport {
    pub fn success(&self) -> bool {
        self.outcomes.iter().all(SuiteOutcome::success)
    }

    pub fn failed_suites(&self) -> usize {
        self.outcomes.iter().filter(|outcome| !outcome.success()).count()
    }
}

#[derive(Debug, thiserror::Error)]
#[error("suite name '{0}' is used more than once")]
pub struct DuplicateSuite(pub String);

/// Names must be unique within a run.
pub fn check_unique_names(definitions: &[SuiteDefinition]) -> Result<(), DuplicateSuite> {
    let mut names = HashSet::new();
    for definition in definitions {
        if !names.insert(definition.name.as_str()) {
            return Err(DuplicateSuite(definition.name.clone()));
        }
    }
    Ok(())
}

/// Run every suite under `policy`. A suite that cannot start is reported in
/// its slot; it never stops the others. `on_complete` sees each outcome as
/// soon as its suite finishes, from the thread that ran it.
pub fn run_suites<F>(
    definitions: &[SuiteDefinition],
    registry: &ProviderRegistry,
    options: &SuiteOptions,
    policy: ExecutionPolicy,
    on_complete: F,
) -> Result<RunReport, DuplicateSuite>
where
    F: Fn(&SuiteOutcome) + Sync,
{
    check_unique_names(definitions)?;
    info!("running {} suite(s), {:?}", definitions.len(), policy);

    let run_one = |definition: &SuiteDefinition| {
        let result = run_suite(definition, registry, options);
        if let Err(err) = &result {
            error!("{}: {}", definition.name, err);
        }
        let outcome = SuiteOutcome {
            name: definition.name.clone(),
            result,
        };
        on_complete(&outcome);
        outcome
    };

    let outcomes = match policy {
        ExecutionPolicy::Sequential => definitions.iter().map(run_one).collect(),
        ExecutionPolicy::Concurrent => thread::scope(|scope| {
            let handles: Vec<_> = definitions
                .iter()
                .map(|definition| {
                    let run_one = &run_one;
                    let handle = thread::Builder::new()
                        .name(format!("suite-{}", definition.name))
                        .spawn_scoped(scope, move || run_one(definition));
                    (definition, handle)
                })
                .collect();

            handles
                .into_iter()
                .map(|(definition, handle)| match handle {
                    Ok(handle) => handle
                        .join()
                        .unwrap_or_else(|payload| std::panic::resume_unwind(payload)),
                    // Could not get a thread; run it here instead.
                    Err(_) => run_one(definition),
                })
                .collect()
        }),
    };

    Ok(RunReport { outcomes })
}
