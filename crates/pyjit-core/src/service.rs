//! Per-invocation pipeline
//!
//! stage → build environment → validate → execute → report, with the
//! staged file released on every path. Each invocation gets its own
//! environment, console, interrupt and staged file; nothing is shared.

use crate::config::ServiceConfig;
use crate::fetch::{Fetch, HttpFetcher};
use crate::outcome::ExecutionOutcome;
use crate::stager::{FetchError, ResourceStager, StagedResource};
use pyjit_sandbox::{
    validate, CapabilityEnvironment, Console, ExecutionLimits, Executor, Interrupt, RuntimeError,
    WORKER_STACK_SIZE,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::Instrument;
use uuid::Uuid;

/// How long an interrupted worker gets to notice the flag before the
/// invocation gives up on it.
const INTERRUPT_GRACE: Duration = Duration::from_secs(1);

/// One request to run `code` against the data behind `data_url`
#[derive(Debug, Clone, Default)]
pub struct ExecutionRequest {
    pub code: String,
    pub data_url: Option<String>,
    /// Advisory only. Recorded on the invocation span, never enforced.
    pub file_format: Option<String>,
}

impl ExecutionRequest {
    pub fn new(code: impl Into<String>, data_url: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            data_url: Some(data_url.into()),
            file_format: None,
        }
    }
}

/// Runs invocations end to end
pub struct ExecutionService {
    stager: ResourceStager,
    limits: ExecutionLimits,
}

impl ExecutionService {
    /// Service that fetches over HTTP(S)
    pub fn new(config: ServiceConfig) -> Result<Self, FetchError> {
        let fetcher = HttpFetcher::new(config.staging.fetch_timeout)?;
        Ok(Self::with_fetcher(config, Arc::new(fetcher)))
    }

    pub fn with_fetcher(config: ServiceConfig, fetcher: Arc<dyn Fetch>) -> Self {
        Self {
            stager: ResourceStager::new(fetcher, config.staging),
            limits: config.limits,
        }
    }

    pub fn limits(&self) -> &ExecutionLimits {
        &self.limits
    }

    /// Run one invocation. Never panics and never returns without releasing
    /// the staged data.
    pub async fn execute(&self, request: ExecutionRequest) -> ExecutionOutcome {
        let span = tracing::info_span!(
            "invocation",
            invocation_id = %Uuid::new_v4(),
            file_format = request.file_format.as_deref().unwrap_or("-"),
        );

        async move {
            let outcome = self.run(request).await;
            match &outcome {
                ExecutionOutcome::Success => tracing::info!("invocation succeeded"),
                failure => tracing::warn!(
                    outcome = failure.kind(),
                    error = %error_text(failure),
                    "invocation failed"
                ),
            }
            outcome
        }
        .instrument(span)
        .await
    }

    async fn run(&self, request: ExecutionRequest) -> ExecutionOutcome {
        let mut staged = match self.stager.stage(request.data_url.as_deref()).await {
            Ok(staged) => staged,
            Err(e) => return e.into(),
        };
        let outcome = self.run_staged(request.code, &staged).await;
        staged.release();
        outcome
    }

    async fn run_staged(&self, code: String, staged: &StagedResource) -> ExecutionOutcome {
        let Some(handle) = staged.handle() else {
            return RuntimeError::Internal("staged data already released".to_string()).into();
        };
        let console = Console::default();
        let env = CapabilityEnvironment::with_console(handle, console.clone());

        let interrupt = Interrupt::new();
        let _cancel = InterruptOnDrop(interrupt.clone());
        let mut receiver = match spawn_worker(code, env, self.limits.clone(), interrupt.clone()) {
            Ok(receiver) => receiver,
            Err(e) => {
                tracing::error!(error = %e, "failed to start executor thread");
                return RuntimeError::Internal("failed to start executor".to_string()).into();
            }
        };

        let result = match tokio::time::timeout(self.limits.timeout, &mut receiver).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(timeout = ?self.limits.timeout, "execution timed out, interrupting");
                interrupt.trigger();
                // The interpreter polls the flag on every step.
                match tokio::time::timeout(INTERRUPT_GRACE, receiver).await {
                    Ok(result) => result,
                    Err(_) => {
                        tracing::error!("executor ignored the interrupt, abandoning it");
                        Ok(RuntimeError::Interrupted.into())
                    }
                }
            }
        };

        let output = console.contents();
        if !output.is_empty() {
            tracing::debug!(truncated = console.is_truncated(), output = %output, "script output");
        }

        // A dropped sender means the worker died outside the executor's panic guard.
        result.unwrap_or_else(|_| RuntimeError::Internal("interpreter fault".to_string()).into())
    }
}

/// Triggers the interrupt when the invocation future is dropped, so a
/// cancelled request stops its worker too.
struct InterruptOnDrop(Interrupt);

impl Drop for InterruptOnDrop {
    fn drop(&mut self) {
        self.0.trigger();
    }
}

/// Validate and run `code` on a dedicated thread with a large stack.
fn spawn_worker(
    code: String,
    env: CapabilityEnvironment,
    limits: ExecutionLimits,
    interrupt: Interrupt,
) -> std::io::Result<oneshot::Receiver<ExecutionOutcome>> {
    let (sender, receiver) = oneshot::channel();
    let span = tracing::Span::current();

    std::thread::Builder::new()
        .name("pyjit-exec".to_string())
        .stack_size(WORKER_STACK_SIZE)
        .spawn(move || {
            let _entered = span.enter();
            let outcome = match validate(&code) {
                Err(e) => ExecutionOutcome::ValidationRejected(e),
                Ok(unit) => match Executor::new(limits).with_interrupt(interrupt).run(&unit, env) {
                    Ok(()) => ExecutionOutcome::Success,
                    Err(e) => ExecutionOutcome::RuntimeFailed(e),
                },
            };
            let _ = sender.send(outcome);
        })?;
    Ok(receiver)
}

fn error_text(outcome: &ExecutionOutcome) -> String {
    match outcome {
        ExecutionOutcome::Success => String::new(),
        ExecutionOutcome::ValidationRejected(e) => e.to_string(),
        ExecutionOutcome::FetchFailed(e) => e.to_string(),
        ExecutionOutcome::RuntimeFailed(e) => e.to_string(),
    }
}
