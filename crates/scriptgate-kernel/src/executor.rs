//! Script executor: one isolated run per `execute_script` call.
//!
//! Each run gets a fresh `ExecutionContext` and a fresh Lua VM on a
//! dedicated thread. Backend calls made by the script re-enter the calling
//! tokio runtime through a captured `Handle`, so the interpreter stays
//! synchronous while the network I/O stays async.
//!
//! Cancellation is two-layered:
//!
//! 1. The VM interrupt polls the deadline and the cancelled flag, and every
//!    backend call is bounded by the time remaining.
//! 2. A watchdog awaits the run for the deadline plus a grace period. If the
//!    thread still has not reported, it marks the context cancelled and
//!    returns `TimedOut` without waiting further.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde_json::Value as JsonValue;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::oneshot;

use scriptgate_types::{
    CredentialMap, ExecutionErrorKind, ExecutionFailure, ExecutionReport, ExecutionStats,
    OutputManifestEntry,
};

use crate::dispatch::DispatchBridge;
use crate::output::{OutputConfig, OutputGuard};
use crate::sandbox::Sandbox;

/// Extra time the watchdog allows past the deadline before giving up on the
/// script thread.
pub const WATCHDOG_GRACE: Duration = Duration::from_millis(250);

const EXEC_THREAD_STACK: usize = 16 * 1024 * 1024;

/// Terminal states other than `Completed`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    #[error("script execution timed out after {0}ms")]
    TimedOut(u64),
    #[error("API call limit exceeded: at most {0} backend calls per script")]
    QuotaExceeded(u64),
    #[error("sandbox violation: '{0}' is not available in this sandbox")]
    SandboxViolation(String),
    #[error("script error: {0}")]
    Script(String),
}

impl ExecutionError {
    pub fn kind(&self) -> ExecutionErrorKind {
        match self {
            Self::TimedOut(_) => ExecutionErrorKind::TimedOut,
            Self::QuotaExceeded(_) => ExecutionErrorKind::QuotaExceeded,
            Self::SandboxViolation(_) => ExecutionErrorKind::SandboxViolation,
            Self::Script(_) => ExecutionErrorKind::ScriptError,
        }
    }

    pub fn to_failure(&self) -> ExecutionFailure {
        ExecutionFailure {
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}

/// Limits applied to every run.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub timeout: Duration,
    pub max_api_calls: u64,
    /// Lua heap cap in bytes.
    pub memory_limit: Option<usize>,
    /// `None` leaves `file` out of the script environment.
    pub output: Option<OutputConfig>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(30_000),
            max_api_calls: 100,
            memory_limit: Some(64 * 1024 * 1024),
            output: Some(OutputConfig::default()),
        }
    }
}

/// One script to run.
#[derive(Debug, Clone, Default)]
pub struct ExecutionRequest {
    pub script: String,
    /// Per-call timeout. Only ever lowers the configured timeout.
    pub timeout: Option<Duration>,
    /// Per-call credentials keyed by API name.
    pub credentials: CredentialMap,
}

impl ExecutionRequest {
    pub fn new(script: impl Into<String>) -> Self {
        Self {
            script: script.into(),
            ..Default::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_credentials(mut self, credentials: CredentialMap) -> Self {
        self.credentials = credentials;
        self
    }
}

/// Per-run state: call budget, deadline, logs, output manifest and the
/// caller's credential overrides. Shared between the script thread and the
/// watchdog; dropped when the run returns.
#[derive(Debug)]
pub struct ExecutionContext {
    started: Instant,
    deadline: Instant,
    timeout: Duration,
    max_api_calls: u64,
    api_calls: AtomicU64,
    cancelled: AtomicBool,
    abort: Mutex<Option<ExecutionError>>,
    logs: Mutex<Vec<String>>,
    output: Option<Mutex<OutputGuard>>,
    credentials: CredentialMap,
}

impl ExecutionContext {
    pub fn new(
        timeout: Duration,
        max_api_calls: u64,
        output: Option<OutputConfig>,
        credentials: CredentialMap,
    ) -> Self {
        let started = Instant::now();
        Self {
            started,
            deadline: started + timeout,
            timeout,
            max_api_calls,
            api_calls: AtomicU64::new(0),
            cancelled: AtomicBool::new(false),
            abort: Mutex::new(None),
            logs: Mutex::new(Vec::new()),
            output: output.map(|config| Mutex::new(OutputGuard::new(config))),
            credentials,
        }
    }

    pub fn credentials(&self) -> &CredentialMap {
        &self.credentials
    }

    pub fn has_output(&self) -> bool {
        self.output.is_some()
    }

    /// Time left before the deadline.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn timeout_error(&self) -> ExecutionError {
        ExecutionError::TimedOut(self.timeout.as_millis() as u64)
    }

    /// Record a fatal abort. The first abort wins; later ones are ignored.
    pub fn abort(&self, error: ExecutionError) -> ExecutionError {
        let mut slot = lock(&self.abort);
        slot.get_or_insert(error).clone()
    }

    /// The abort recorded so far, if any.
    pub fn aborted(&self) -> Option<ExecutionError> {
        lock(&self.abort).clone()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Fail if the run has already aborted, been cancelled, or passed its
    /// deadline. Polled by the VM interrupt and before every backend call.
    pub fn check_live(&self) -> Result<(), ExecutionError> {
        if let Some(error) = self.aborted() {
            return Err(error);
        }
        if self.cancelled.load(Ordering::SeqCst) || Instant::now() >= self.deadline {
            return Err(self.abort(self.timeout_error()));
        }
        Ok(())
    }

    /// Consume one unit of call budget, before the call is dispatched.
    pub fn reserve_call(&self) -> Result<(), ExecutionError> {
        self.check_live()?;
        let made = self.api_calls.load(Ordering::SeqCst);
        if made >= self.max_api_calls {
            return Err(self.abort(ExecutionError::QuotaExceeded(self.max_api_calls)));
        }
        self.api_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    pub fn api_calls(&self) -> u64 {
        self.api_calls.load(Ordering::SeqCst)
    }

    pub fn log(&self, line: String) {
        lock(&self.logs).push(line);
    }

    /// Write through the output guard. `None` when output is disabled.
    pub fn save(
        &self,
        name: &str,
        content: &[u8],
    ) -> Option<Result<std::path::PathBuf, crate::output::OutputError>> {
        self.output
            .as_ref()
            .map(|guard| lock(guard).save(name, content))
    }

    fn manifest(&self) -> Vec<OutputManifestEntry> {
        self.output
            .as_ref()
            .map(|guard| lock(guard).manifest().to_vec())
            .unwrap_or_default()
    }

    /// Snapshot the context into a response envelope.
    pub fn report(&self, outcome: Result<JsonValue, ExecutionError>) -> ExecutionReport {
        // An abort recorded on the context outranks whatever the script
        // returned after catching it.
        let outcome = match self.aborted() {
            Some(error) => Err(error),
            None => outcome,
        };
        let (result, failure) = match outcome {
            Ok(value) => (value, None),
            Err(error) => (JsonValue::Null, Some(error.to_failure())),
        };
        ExecutionReport {
            result,
            logs: lock(&self.logs).clone(),
            stats: ExecutionStats {
                api_calls: self.api_calls(),
                duration_ms: self.started.elapsed().as_millis() as u64,
            },
            files_written: self.manifest(),
            failure,
        }
    }
}

/// A poisoned lock only means a script thread panicked mid-write; keep the
/// data.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Runs scripts against a dispatch bridge.
#[derive(Debug, Clone)]
pub struct ScriptExecutor {
    bridge: Arc<DispatchBridge>,
    config: ExecutorConfig,
}

impl ScriptExecutor {
    pub fn new(bridge: Arc<DispatchBridge>, config: ExecutorConfig) -> Self {
        Self { bridge, config }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn bridge(&self) -> &Arc<DispatchBridge> {
        &self.bridge
    }

    /// Run one script. Never fails: every outcome is an envelope.
    ///
    /// Must be called from within a tokio runtime.
    #[tracing::instrument(level = "debug", skip_all, fields(script_len = request.script.len()))]
    pub async fn execute(&self, request: ExecutionRequest) -> ExecutionReport {
        let timeout = request
            .timeout
            .map_or(self.config.timeout, |t| t.min(self.config.timeout));
        let ctx = Arc::new(ExecutionContext::new(
            timeout,
            self.config.max_api_calls,
            self.config.output.clone(),
            request.credentials,
        ));

        let (tx, rx) = oneshot::channel();
        let runtime = Handle::current();
        let bridge = Arc::clone(&self.bridge);
        let memory_limit = self.config.memory_limit;
        let thread_ctx = Arc::clone(&ctx);
        let script = request.script;

        let spawned = std::thread::Builder::new()
            .name("scriptgate-exec".to_string())
            .stack_size(EXEC_THREAD_STACK)
            .spawn(move || {
                let outcome = run_script(&thread_ctx, bridge, runtime, memory_limit, &script);
                let _ = tx.send(thread_ctx.report(outcome));
            });
        if let Err(e) = spawned {
            tracing::error!(error = %e, "failed to spawn script thread");
            return ctx.report(Err(ExecutionError::Script(format!(
                "failed to start executor thread: {e}"
            ))));
        }

        let report = match tokio::time::timeout(timeout + WATCHDOG_GRACE, rx).await {
            Ok(Ok(report)) => report,
            Ok(Err(_)) => ctx.report(Err(ExecutionError::Script(
                "executor thread exited without a result".to_string(),
            ))),
            Err(_) => {
                tracing::warn!(timeout_ms = timeout.as_millis() as u64, "watchdog expired, abandoning script thread");
                ctx.cancel();
                let error = ctx.abort(ctx.timeout_error());
                ctx.report(Err(error))
            }
        };

        match report.error_kind() {
            None => tracing::debug!(api_calls = report.stats.api_calls, "script completed"),
            Some(kind) => tracing::debug!(%kind, api_calls = report.stats.api_calls, "script failed"),
        }
        report
    }
}

fn run_script(
    ctx: &Arc<ExecutionContext>,
    bridge: Arc<DispatchBridge>,
    runtime: Handle,
    memory_limit: Option<usize>,
    script: &str,
) -> Result<JsonValue, ExecutionError> {
    let sandbox = Sandbox::new(Arc::clone(ctx), bridge, runtime, memory_limit)
        .map_err(|e| ExecutionError::Script(format!("failed to build sandbox: {e}")))?;
    sandbox.run(script)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(max_calls: u64) -> ExecutionContext {
        ExecutionContext::new(Duration::from_secs(5), max_calls, None, CredentialMap::new())
    }

    #[test]
    fn test_quota_allows_exactly_n() {
        let ctx = ctx(2);
        assert!(ctx.reserve_call().is_ok());
        assert!(ctx.reserve_call().is_ok());
        assert_eq!(ctx.reserve_call(), Err(ExecutionError::QuotaExceeded(2)));
        assert_eq!(ctx.api_calls(), 2);
    }

    #[test]
    fn test_abort_is_sticky_and_first_wins() {
        let ctx = ctx(0);
        assert!(ctx.reserve_call().is_err());
        ctx.abort(ExecutionError::SandboxViolation("io".to_string()));
        assert_eq!(ctx.check_live(), Err(ExecutionError::QuotaExceeded(0)));

        let report = ctx.report(Ok(JsonValue::from("caught")));
        assert_eq!(report.error_kind(), Some(ExecutionErrorKind::QuotaExceeded));
        assert_eq!(report.result, JsonValue::Null);
    }

    #[test]
    fn test_cancel_reads_as_timeout() {
        let ctx = ctx(1);
        ctx.cancel();
        assert_eq!(ctx.check_live(), Err(ExecutionError::TimedOut(5000)));
    }

    #[test]
    fn test_error_wording() {
        assert_eq!(
            ExecutionError::TimedOut(100).to_string(),
            "script execution timed out after 100ms"
        );
        assert_eq!(
            ExecutionError::QuotaExceeded(3).to_string(),
            "API call limit exceeded: at most 3 backend calls per script"
        );
        assert_eq!(
            ExecutionError::SandboxViolation("os".to_string()).to_failure().kind,
            ExecutionErrorKind::SandboxViolation
        );
    }
}
