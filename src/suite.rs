/*!
# Suite runner

Runs one fixture file against one provider variant.

A suite moves through `Idle → Streaming → Draining → Finalized`. While
streaming, every well-formed line is dispatched and later scored; in async
mode several lines can be dispatched before any is scored, and they are
scored in whatever order their completions arrive. The suite only finalizes
once the fixture stream is closed, nothing is in flight, and every line seen
has been scored.
*/

use std::collections::HashMap;
use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::fixture::{FixtureError, FixtureLine, FixtureReader};
use crate::hasher::{guarded_digest, DigestRequest, ProviderError, ProviderRegistry, Variant};
use crate::tally::{SuiteResult, Tally};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_IN_FLIGHT: usize = 8;

/// How each line reaches the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    /// Blocking calls, scored in fixture order.
    #[default]
    Sync,
    /// Deferred calls, scored as they complete.
    Async,
    /// Deferred calls, each also checked against the blocking path.
    Both,
}

impl DispatchMode {
    pub fn as_str(self) -> &'static str {
        match self {
            DispatchMode::Sync => "sync",
            DispatchMode::Async => "async",
            DispatchMode::Both => "both",
        }
    }
}

/// What to do with a line that does not parse.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum MalformedPolicy {
    /// Log it, count it as skipped, keep going.
    #[default]
    Skip,
    /// Stop the suite with a setup error.
    Abort,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuiteDefinition {
    pub name: String,
    pub fixture: PathBuf,
    pub variant: Variant,
    pub mode: DispatchMode,
    pub seed: Option<Vec<u8>>,
    pub tuning: Option<u32>,
    pub digest_len: usize,
}

impl SuiteDefinition {
    pub fn new(name: impl Into<String>, fixture: impl Into<PathBuf>, variant: Variant) -> Self {
        Self {
            name: name.into(),
            fixture: fixture.into(),
            variant,
            mode: DispatchMode::default(),
            seed: None,
            tuning: None,
            digest_len: variant.digest_len(),
        }
    }

    pub fn with_mode(mut self, mode: DispatchMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_seed(mut self, seed: Vec<u8>) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_tuning(mut self, tuning: u32) -> Self {
        self.tuning = Some(tuning);
        self
    }

    fn request(&self, input: Vec<u8>) -> DigestRequest {
        DigestRequest {
            variant: self.variant,
            input,
            seed: self.seed.clone(),
            tuning: self.tuning,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuiteOptions {
    /// Longest an async dispatch may stay outstanding.
    pub timeout: Duration,
    pub max_in_flight: usize,
    pub malformed: MalformedPolicy,
}

impl Default for SuiteOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            malformed: MalformedPolicy::default(),
        }
    }
}

/// Errors that stop a suite before it can produce a result.
#[derive(Debug, thiserror::Error)]
pub enum SuiteSetupError {
    #[error("cannot open fixture {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed fixture {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: FixtureError,
    },

    #[error("cannot read fixture {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: FixtureError,
    },

    #[error(transparent)]
    NoProvider(ProviderError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuiteState {
    Idle,
    Streaming,
    Draining,
    Finalized,
}

impl SuiteState {
    fn can_transition_to(self, next: SuiteState) -> bool {
        matches!(
            (self, next),
            (SuiteState::Idle, SuiteState::Streaming)
                | (SuiteState::Streaming, SuiteState::Draining)
                | (SuiteState::Draining, SuiteState::Finalized)
        )
    }
}

/// A dispatched line awaiting its completions.
struct Pending {
    expected_hex: String,
    deadline: Instant,
    deferred: Option<Result<Vec<u8>, ProviderError>>,
    /// Only filled in `Both` mode.
    blocking: Option<Result<Vec<u8>, ProviderError>>,
}

/// Provider entry point a completion came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryPoint {
    Deferred,
    Blocking,
}

struct Completed {
    line_no: usize,
    entry: EntryPoint,
    result: Result<Vec<u8>, ProviderError>,
}

pub struct SuiteRun<'a> {
    definition: &'a SuiteDefinition,
    registry: &'a ProviderRegistry,
    options: &'a SuiteOptions,
    state: SuiteState,
    tally: Tally,
    /// Well-formed lines taken from the fixture.
    seen: usize,
    in_flight: HashMap<usize, Pending>,
    tx: Sender<Completed>,
    rx: Receiver<Completed>,
}

impl<'a> SuiteRun<'a> {
    pub fn new(
        definition: &'a SuiteDefinition,
        registry: &'a ProviderRegistry,
        options: &'a SuiteOptions,
    ) -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            definition,
            registry,
            options,
            state: SuiteState::Idle,
            tally: Tally::new(),
            seen: 0,
            in_flight: HashMap::new(),
            tx,
            rx,
        }
    }

    pub fn state(&self) -> SuiteState {
        self.state
    }

    /// Stream the fixture and score every line. On success the run is
    /// ready to finalize.
    pub fn execute(&mut self) -> Result<(), SuiteSetupError> {
        let definition = self.definition;
        self.check_provider()?;

        let reader = FixtureReader::open(&definition.fixture, definition.digest_len).map_err(
            |source| SuiteSetupError::Open {
                path: definition.fixture.clone(),
                source,
            },
        )?;
        self.execute_with(reader)
    }

    /// `execute` over an already open fixture stream.
    pub fn execute_with<R: BufRead>(
        &mut self,
        mut reader: FixtureReader<R>,
    ) -> Result<(), SuiteSetupError> {
        let definition = self.definition;
        self.check_provider()?;

        self.transition(SuiteState::Streaming);
        debug!(
            "{}: streaming {} ({} mode)",
            definition.name,
            definition.fixture.display(),
            definition.mode.as_str()
        );

        for entry in reader.by_ref() {
            match entry {
                Ok(line) => self.dispatch(line),
                Err(err @ FixtureError::Malformed { .. }) => match self.options.malformed {
                    MalformedPolicy::Skip => {
                        warn!("{}: skipping {}", definition.name, err);
                        self.tally.skip();
                    }
                    MalformedPolicy::Abort => {
                        return Err(SuiteSetupError::Malformed {
                            path: definition.fixture.clone(),
                            source: err,
                        })
                    }
                },
                Err(err @ FixtureError::Io { .. }) => {
                    return Err(SuiteSetupError::Read {
                        path: definition.fixture.clone(),
                        source: err,
                    })
                }
            }
        }

        self.transition(SuiteState::Draining);
        debug!(
            "{}: read {} line(s), draining {} in flight",
            definition.name,
            reader.lines_read(),
            self.in_flight.len()
        );
        while !self.in_flight.is_empty() {
            self.await_completion();
        }

        Ok(())
    }

    fn check_provider(&self) -> Result<(), SuiteSetupError> {
        self.registry
            .get(self.definition.variant)
            .map(|_| ())
            .map_err(SuiteSetupError::NoProvider)
    }

    fn can_finalize(&self) -> bool {
        self.state() == SuiteState::Draining
            && self.in_flight.is_empty()
            && self.tally.scored() == self.seen
    }

    /// Close the suite and produce its one result.
    pub fn finalize(mut self) -> SuiteResult {
        debug_assert!(self.can_finalize(), "finalizing an unfinished suite");
        if !self.can_finalize() {
            warn!(
                "{}: finalized with {} of {} lines scored",
                self.definition.name,
                self.tally.scored(),
                self.seen
            );
        }
        self.transition(SuiteState::Finalized);

        let result = self.tally.finish(&self.definition.name);
        info!(
            "{}: {} passed, {} failed, {} skipped",
            result.name, result.passed, result.failed, result.skipped
        );
        result
    }

    fn transition(&mut self, next: SuiteState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal transition {:?} -> {:?}",
            self.state,
            next
        );
        self.state = next;
    }

    fn dispatch(&mut self, line: FixtureLine) {
        self.seen += 1;
        let FixtureLine {
            line_no,
            expected_hex,
            input,
        } = line;
        let request = self.definition.request(input);

        match self.definition.mode {
            DispatchMode::Sync => {
                let outcome = self.registry.digest(&request);
                self.score(line_no, &expected_hex, outcome);
            }
            DispatchMode::Async | DispatchMode::Both => {
                while self.in_flight.len() >= self.options.max_in_flight.max(1) {
                    self.await_completion();
                }

                let mut pending = Pending {
                    expected_hex,
                    deadline: Instant::now() + self.options.timeout,
                    deferred: None,
                    blocking: None,
                };
                if self.definition.mode == DispatchMode::Both {
                    if let Err(err) = self.spawn_blocking(line_no, request.clone()) {
                        pending.blocking = Some(Err(err));
                    }
                }
                self.in_flight.insert(line_no, pending);

                let tx = self.tx.clone();
                self.registry.digest_async(
                    request,
                    Box::new(move |result| {
                        // The suite may already have finalized; nothing to do then.
                        let _ = tx.send(Completed {
                            line_no,
                            entry: EntryPoint::Deferred,
                            result,
                        });
                    }),
                );
            }
        }
    }

    /// Run the blocking entry point on a worker so the line's deadline
    /// bounds it too.
    fn spawn_blocking(&self, line_no: usize, request: DigestRequest) -> Result<(), ProviderError> {
        let provider = self.registry.get(request.variant)?;
        let tx = self.tx.clone();
        thread::Builder::new()
            .name(format!("{}-blocking", provider.name()))
            .spawn(move || {
                let result = guarded_digest(&*provider, &request);
                let _ = tx.send(Completed {
                    line_no,
                    entry: EntryPoint::Blocking,
                    result,
                });
            })
            .map(|_| ())
            .map_err(|err| ProviderError::Backend {
                provider: "suite".to_string(),
                message: format!("cannot spawn blocking digest: {}", err),
            })
    }

    /// Block until one completion arrives or the earliest deadline passes.
    fn await_completion(&mut self) {
        let Some(deadline) = self.in_flight.values().map(|p| p.deadline).min() else {
            return;
        };
        let wait = deadline.saturating_duration_since(Instant::now());

        match self.rx.recv_timeout(wait) {
            Ok(Completed {
                line_no,
                entry,
                result,
            }) => self.accept(line_no, entry, result),
            Err(RecvTimeoutError::Timeout) => self.expire_overdue(),
            Err(RecvTimeoutError::Disconnected) => {
                for (line_no, _) in self.in_flight.drain() {
                    warn!("{}: line {}: {}", self.definition.name, line_no, ProviderError::Disconnected);
                    self.tally.record_failure();
                }
            }
        }
    }

    fn expire_overdue(&mut self) {
        let now = Instant::now();
        let overdue: Vec<usize> = self
            .in_flight
            .iter()
            .filter(|(_, pending)| pending.deadline <= now)
            .map(|(line_no, _)| *line_no)
            .collect();

        for line_no in overdue {
            self.in_flight.remove(&line_no);
            warn!(
                "{}: line {} timed out after {:?}",
                self.definition.name, line_no, self.options.timeout
            );
            self.tally.record_timeout();
        }
    }

    /// File a completion; score the line once every half it waits on is in.
    fn accept(&mut self, line_no: usize, entry: EntryPoint, result: Result<Vec<u8>, ProviderError>) {
        let needs_blocking = self.definition.mode == DispatchMode::Both;
        let Some(pending) = self.in_flight.get_mut(&line_no) else {
            debug!(
                "{}: ignoring late completion for line {}",
                self.definition.name, line_no
            );
            return;
        };

        match entry {
            EntryPoint::Deferred => pending.deferred = Some(result),
            EntryPoint::Blocking => pending.blocking = Some(result),
        }
        if pending.deferred.is_none() || (needs_blocking && pending.blocking.is_none()) {
            return;
        }

        if let Some(pending) = self.in_flight.remove(&line_no) {
            self.score_completion(line_no, pending);
        }
    }

    fn score_completion(&mut self, line_no: usize, pending: Pending) {
        let Pending {
            expected_hex,
            deferred,
            blocking,
            ..
        } = pending;
        let deferred = deferred.unwrap_or(Err(ProviderError::Disconnected));

        if let (Ok(digest), Some(blocking)) = (&deferred, &blocking) {
            if blocking.as_ref() != Ok(digest) {
                warn!(
                    "{}: line {}: sync and async digests do not agree",
                    self.definition.name, line_no
                );
                self.tally.record_disagreement();
                return;
            }
        }
        self.score(line_no, &expected_hex, deferred);
    }

    fn score(&mut self, line_no: usize, expected_hex: &str, outcome: Result<Vec<u8>, ProviderError>) {
        match outcome {
            Ok(digest) => {
                if !self.tally.record(expected_hex, &digest) {
                    debug!(
                        "{}: line {}: expected {}, got {}",
                        self.definition.name,
                        line_no,
                        expected_hex,
                        hex::encode(&digest)
                    );
                }
            }
            Err(err) => {
                warn!("{}: line {}: {}", self.definition.name, line_no, err);
                self.tally.record_failure();
            }
        }
    }
}

/// Run one suite start to finish.
pub fn run_suite(
    definition: &SuiteDefinition,
    registry: &ProviderRegistry,
    options: &SuiteOptions,
) -> Result<SuiteResult, SuiteSetupError> {
    let mut run = SuiteRun::new(definition, registry, options);
    run.execute()?;
    Ok(run.finalize())
}
