//! The iterate-until-done session loop.
//!
//! Strictly sequential: one provider session at a time, a fresh client per
//! iteration, and no shared mutable state across iterations except the
//! carried-forward error text and the run mode, both owned here. Every
//! per-iteration failure is converted to an outcome at the iteration
//! boundary; only configuration errors raised before the loop escape.

use std::thread::sleep;
use std::time::{Duration, Instant};

use anyhow::Result;
use tracing::{info, instrument, warn};

use crate::config::HarnessConfig;
use crate::core::mode::{ModeRequest, RunMode, determine_run_mode};
use crate::core::outcome::SessionOutcome;
use crate::io::paths::ProjectPaths;
use crate::io::progress::{FeatureListState, count_passing, is_work_complete, verify_feature_list};
use crate::io::prompt::{compose_prompt, copy_or_verify_spec, copy_spec_to_project, prompt_for_mode};
use crate::io::provider::ProviderFactory;
use crate::io::session_log::{SessionMeta, SessionWriteRequest, write_session};
use crate::session::{SessionObserver, SessionReport, SessionResult, run_session};

/// Why the loop stopped. Every variant maps to a distinct exit code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// The feature list is complete (or empty).
    Complete,
    /// An initializer session finished but produced no feature list.
    InitializerFailed,
    /// The feature list exists but cannot be used.
    CorruptedFeatureList { message: String },
    /// The backend's rate limit was hit; not recoverable within this run.
    RateLimited { message: String },
    /// The configured maximum iteration count was exceeded.
    IterationLimitReached { max: u32 },
}

/// Summary of a driver invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    /// Number of provider sessions actually executed.
    pub sessions_run: u32,
    pub stop: StopReason,
}

/// Loop pacing and limits.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Stop once this many iterations have run (unlimited when `None`).
    pub max_iterations: Option<u32>,
    /// Delay after a session outcome, so a human can interrupt or inspect.
    pub auto_continue_delay: Duration,
    /// General inter-session pacing delay.
    pub pacing_delay: Duration,
    /// Byte bound for per-session raw transcripts.
    pub transcript_limit_bytes: usize,
}

impl DriverConfig {
    pub fn from_harness(config: &HarnessConfig, max_iterations: Option<u32>) -> Self {
        Self {
            max_iterations,
            auto_continue_delay: Duration::from_secs(config.auto_continue_delay_secs),
            pacing_delay: Duration::from_secs(config.pacing_delay_secs),
            transcript_limit_bytes: config.transcript_limit_bytes,
        }
    }
}

#[cfg(any(test, feature = "test-support"))]
impl Default for DriverConfig {
    /// Zero delays for tests.
    fn default() -> Self {
        Self {
            max_iterations: None,
            auto_continue_delay: Duration::ZERO,
            pacing_delay: Duration::ZERO,
            transcript_limit_bytes: 100_000,
        }
    }
}

/// Determine the run mode and place the spec file for initializer runs.
///
/// Evaluated once, before the loop. Fails only on configuration problems
/// (no spec available for an initializer).
pub fn prepare_run(
    paths: &ProjectPaths,
    request: ModeRequest,
    spec_file: Option<&std::path::Path>,
) -> Result<RunMode> {
    std::fs::create_dir_all(&paths.root)?;
    let facts = paths.facts();
    let mode = determine_run_mode(request, facts);
    info!(mode = mode.as_str(), ?facts, "run mode determined");
    match mode {
        RunMode::GreenfieldInit => copy_spec_to_project(paths, spec_file)?,
        RunMode::EnhancementInit => copy_or_verify_spec(paths, spec_file)?,
        RunMode::Continue => {}
    }
    Ok(mode)
}

/// Run sessions until the feature list completes, a fatal setup condition is
/// hit, the backend is rate limited, or the iteration limit is reached.
#[instrument(skip_all, fields(initial_mode = initial_mode.as_str()))]
pub fn run_loop<F: ProviderFactory>(
    paths: &ProjectPaths,
    initial_mode: RunMode,
    config: &DriverConfig,
    factory: &F,
    observer: &mut dyn SessionObserver,
) -> Result<RunOutcome> {
    let mut mode = initial_mode;
    let mut carried_error: Option<String> = None;
    let mut sessions_run = 0u32;
    let mut iteration = 0u32;

    loop {
        iteration += 1;

        if let Some(max) = config.max_iterations
            && iteration > max
        {
            info!(max, "iteration limit reached");
            return Ok(RunOutcome {
                sessions_run,
                stop: StopReason::IterationLimitReached { max },
            });
        }

        // Already-complete (or empty) work needs no session at all. Only
        // checked outside initializer modes, which must run first to define
        // the work.
        if mode == RunMode::Continue && is_work_complete(&paths.feature_list_path) {
            info!("feature list complete");
            return Ok(RunOutcome {
                sessions_run,
                stop: StopReason::Complete,
            });
        }

        let session_mode = mode;
        let was_initializer = mode.is_initializer();
        observer.session_started(iteration, session_mode);

        let base_prompt = prompt_for_mode(session_mode);
        let prompt = compose_prompt(&base_prompt, carried_error.as_deref());
        // Initializer modes are one-shot regardless of this session's
        // outcome.
        if was_initializer {
            mode = RunMode::Continue;
        }

        let started = Instant::now();
        let result = match factory.create_client() {
            Ok(mut client) => run_session(
                client.as_mut(),
                &prompt,
                observer,
                config.transcript_limit_bytes,
            ),
            Err(err) => {
                warn!(err = %format!("{err:#}"), "failed to create provider client");
                SessionResult::failed(format!("{err:#}"))
            }
        };
        sessions_run += 1;

        let meta = SessionMeta {
            iteration,
            mode: session_mode,
            outcome: result.outcome.kind().to_string(),
            duration_ms: started.elapsed().as_millis() as u64,
        };
        if let Err(err) = write_session(&SessionWriteRequest {
            sessions_dir: &paths.sessions_dir,
            meta: &meta,
            prompt: &prompt,
            outcome: &result.outcome,
            transcript: &result.transcript,
            transcript_truncated: result.transcript_truncated,
        }) {
            warn!(err = %format!("{err:#}"), "failed to write session artifacts");
        }

        let (passing, total) = count_passing(&paths.feature_list_path);
        observer.session_finished(&SessionReport {
            iteration,
            mode: session_mode,
            outcome: result.outcome.clone(),
            passing,
            total,
        });

        match &result.outcome {
            SessionOutcome::Continue { .. } => {
                if was_initializer {
                    match verify_feature_list(&paths.feature_list_path) {
                        FeatureListState::Missing => {
                            warn!("initializer produced no feature list");
                            return Ok(RunOutcome {
                                sessions_run,
                                stop: StopReason::InitializerFailed,
                            });
                        }
                        FeatureListState::Corrupted { message } => {
                            warn!(message = %message, "initializer produced a corrupted feature list");
                            return Ok(RunOutcome {
                                sessions_run,
                                stop: StopReason::CorruptedFeatureList {
                                    message: message.clone(),
                                },
                            });
                        }
                        FeatureListState::Loaded(_) => {}
                    }
                }
                if is_work_complete(&paths.feature_list_path) {
                    info!("feature list complete");
                    return Ok(RunOutcome {
                        sessions_run,
                        stop: StopReason::Complete,
                    });
                }
                carried_error = None;
                sleep(config.auto_continue_delay);
            }
            SessionOutcome::RateLimited { message } => {
                info!("rate limited, stopping run");
                return Ok(RunOutcome {
                    sessions_run,
                    stop: StopReason::RateLimited {
                        message: message.clone(),
                    },
                });
            }
            SessionOutcome::RecoverableError { message }
            | SessionOutcome::LargeResponseError { message } => {
                info!(outcome = result.outcome.kind(), "continuing with error context");
                carried_error = Some(message.clone());
                sleep(config.auto_continue_delay);
            }
        }

        if config.max_iterations.is_none_or(|max| iteration < max) {
            sleep(config.pacing_delay);
        }
    }
}
