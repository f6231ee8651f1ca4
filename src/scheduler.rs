//! Cron-driven scheduling of workflow runs.
//!
//! [`create_scheduler`] wraps a zero-argument run callback in a cron
//! trigger with three guarantees:
//!
//! - **No-overlap**: a fire that arrives while the previous fire's callback
//!   is still running is skipped entirely, never queued. The guard is
//!   scoped to this one trigger.
//! - **Execution limit**: with `max_executions` set, the trigger
//!   self-disables after that many fires.
//! - **Jitter**: with `max_random_delay` set, each fire sleeps a random
//!   duration in `[0, max_random_delay]` before invoking the callback.
//!
//! Expressions use six-field cron syntax (second minute hour day month
//! weekday); the timezone is an IANA identifier, defaulting to the system
//! timezone.

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use rand::Rng;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::execution::ExecutionResult;
use crate::error::{WorkflowError, WorkflowResult};

/// Zero-argument callback performing one full workflow run.
pub type ScheduleCallback = Arc<dyn Fn() -> BoxFuture<'static, ExecutionResult> + Send + Sync>;

/// Invoked with the result of each fire.
pub type ScheduleResultHook = Arc<dyn Fn(ExecutionResult) + Send + Sync>;

/// Behavior options for a schedule.
#[derive(Clone, Default)]
pub struct SchedulerOptions {
    /// IANA timezone identifier for cron evaluation; system timezone when
    /// absent.
    pub timezone: Option<String>,
    /// Human-readable name for logging.
    pub name: Option<String>,
    /// Maximum number of fires before the trigger self-disables.
    pub max_executions: Option<u32>,
    /// Maximum random delay added before each fire.
    pub max_random_delay: Option<Duration>,
}

/// Parameters for [`create_scheduler`].
pub struct CreateSchedulerParams {
    pub expression: String,
    pub callback: ScheduleCallback,
    pub on_result: Option<ScheduleResultHook>,
    pub options: SchedulerOptions,
}

/// Parse and register a cron trigger. The expression must already be
/// non-empty (validated by `scheduled_run` so the error surfaces to the
/// original caller); parse failures are configuration errors.
pub fn create_scheduler(params: CreateSchedulerParams) -> WorkflowResult<ScheduleHandle> {
    if params.expression.trim().is_empty() {
        return Err(WorkflowError::Configuration(
            "Schedule expression is required".into(),
        ));
    }
    let schedule = Schedule::from_str(&params.expression).map_err(|e| {
        WorkflowError::Configuration(format!(
            "Invalid cron expression '{}': {e}",
            params.expression
        ))
    })?;
    let timezone = params
        .options
        .timezone
        .as_deref()
        .map(|name| {
            name.parse::<Tz>()
                .map_err(|_| WorkflowError::Configuration(format!("Unknown timezone: {name}")))
        })
        .transpose()?;

    Ok(ScheduleHandle {
        inner: Arc::new(ScheduleInner {
            expression: params.expression,
            schedule,
            timezone,
            name: params.options.name,
            callback: params.callback,
            on_result: params.on_result,
            max_executions: params.options.max_executions,
            max_random_delay: params.options.max_random_delay,
            execution_count: AtomicU32::new(0),
            busy: AtomicBool::new(false),
            started: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
            cancel: Mutex::new(CancellationToken::new()),
            task: Mutex::new(None),
        }),
    })
}

struct ScheduleInner {
    expression: String,
    schedule: Schedule,
    timezone: Option<Tz>,
    name: Option<String>,
    callback: ScheduleCallback,
    on_result: Option<ScheduleResultHook>,
    max_executions: Option<u32>,
    max_random_delay: Option<Duration>,
    execution_count: AtomicU32,
    busy: AtomicBool,
    started: AtomicBool,
    destroyed: AtomicBool,
    cancel: Mutex<CancellationToken>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ScheduleInner {
    fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.expression)
    }

    fn next_fire(&self) -> Option<DateTime<Utc>> {
        match self.timezone {
            Some(tz) => self
                .schedule
                .upcoming(tz)
                .next()
                .map(|dt| dt.with_timezone(&Utc)),
            None => self
                .schedule
                .upcoming(Local)
                .next()
                .map(|dt| dt.with_timezone(&Utc)),
        }
    }

    fn limit_reached(&self) -> bool {
        self.max_executions
            .is_some_and(|max| self.execution_count.load(Ordering::SeqCst) >= max)
    }

    /// One trigger fire. Returns false when skipped (overlap or limit).
    fn fire(self: &Arc<Self>) -> bool {
        if self.limit_reached() {
            return false;
        }
        if self.busy.swap(true, Ordering::SeqCst) {
            debug!(
                schedule = self.display_name(),
                "previous run still in progress; skipping fire"
            );
            return false;
        }
        self.execution_count.fetch_add(1, Ordering::SeqCst);

        let inner = Arc::clone(self);
        tokio::spawn(async move {
            if let Some(max_delay) = inner.max_random_delay {
                if !max_delay.is_zero() {
                    let jitter_ms = rand::thread_rng().gen_range(0..=max_delay.as_millis() as u64);
                    tokio::time::sleep(Duration::from_millis(jitter_ms)).await;
                }
            }
            let result = (inner.callback)().await;
            if let Some(on_result) = &inner.on_result {
                on_result(result);
            }
            inner.busy.store(false, Ordering::SeqCst);
        });
        true
    }
}

async fn run_loop(inner: Arc<ScheduleInner>, cancel: CancellationToken) {
    loop {
        if inner.limit_reached() {
            info!(
                schedule = inner.display_name(),
                "execution limit reached; stopping trigger"
            );
            inner.started.store(false, Ordering::SeqCst);
            break;
        }
        let Some(next) = inner.next_fire() else {
            warn!(
                schedule = inner.display_name(),
                "no upcoming fire time; stopping trigger"
            );
            inner.started.store(false, Ordering::SeqCst);
            break;
        };
        info!(schedule = inner.display_name(), next_run = %next, "next run");

        let delay = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
        inner.fire();
    }
}

/// Handle to a registered cron trigger.
///
/// `start`, `stop`, and `destroy` are idempotent; `destroy` also releases
/// the trigger task permanently.
#[derive(Clone)]
pub struct ScheduleHandle {
    inner: Arc<ScheduleInner>,
}

impl ScheduleHandle {
    /// Begin firing. No-op when already started or destroyed.
    pub fn start(&self) {
        if self.inner.destroyed.load(Ordering::SeqCst) {
            warn!(
                schedule = self.inner.display_name(),
                "start called on destroyed schedule"
            );
            return;
        }
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let token = CancellationToken::new();
        *self.inner.cancel.lock() = token.clone();
        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(run_loop(inner, token));
        *self.inner.task.lock() = Some(task);
    }

    /// Stop firing. The trigger can be started again.
    pub fn stop(&self) {
        if !self.inner.started.swap(false, Ordering::SeqCst) {
            return;
        }
        self.inner.cancel.lock().cancel();
        self.inner.task.lock().take();
    }

    /// Stop firing and release the trigger permanently.
    pub fn destroy(&self) {
        self.stop();
        self.inner.destroyed.store(true, Ordering::SeqCst);
    }

    /// Manually trigger one fire, honoring the no-overlap guard and the
    /// execution limit. Returns false when the fire was skipped.
    pub fn fire_now(&self) -> bool {
        self.inner.fire()
    }

    /// Number of fires so far.
    pub fn execution_count(&self) -> u32 {
        self.inner.execution_count.load(Ordering::SeqCst)
    }

    /// Whether a fire's callback is currently running.
    pub fn is_running(&self) -> bool {
        self.inner.busy.load(Ordering::SeqCst)
    }

    pub fn is_started(&self) -> bool {
        self.inner.started.load(Ordering::SeqCst)
    }

    pub fn expression(&self) -> &str {
        &self.inner.expression
    }

    pub fn timezone(&self) -> Option<&str> {
        self.inner.timezone.as_ref().map(|tz| tz.name())
    }

    pub fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    pub fn max_executions(&self) -> Option<u32> {
        self.inner.max_executions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::execution::ExecutionStatus;
    use crate::registry::WorkflowRegistry;
    use std::sync::atomic::AtomicUsize;

    fn dummy_result() -> ExecutionResult {
        ExecutionResult {
            execution_id: "exec-1".into(),
            workflow_id: "wf".into(),
            start_at: Utc::now(),
            end_at: Utc::now(),
            status: ExecutionStatus::Completed,
            result: Some(serde_json::json!(null)),
            suspension: None,
            error: None,
            registry: WorkflowRegistry::new(),
        }
    }

    fn counting_scheduler(
        expression: &str,
        options: SchedulerOptions,
        callback_duration: Duration,
    ) -> (ScheduleHandle, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);
        let callback: ScheduleCallback = Arc::new(move || {
            let calls = Arc::clone(&calls_clone);
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(callback_duration).await;
                dummy_result()
            })
        });
        let handle = create_scheduler(CreateSchedulerParams {
            expression: expression.into(),
            callback,
            on_result: None,
            options,
        })
        .unwrap();
        (handle, calls)
    }

    #[test]
    fn test_invalid_expression_rejected() {
        let callback: ScheduleCallback = Arc::new(|| Box::pin(async { dummy_result() }));
        let err = create_scheduler(CreateSchedulerParams {
            expression: "not a cron".into(),
            callback,
            on_result: None,
            options: SchedulerOptions::default(),
        })
        .err()
        .unwrap();
        assert!(matches!(err, WorkflowError::Configuration(_)));
    }

    #[test]
    fn test_empty_expression_rejected() {
        let callback: ScheduleCallback = Arc::new(|| Box::pin(async { dummy_result() }));
        let err = create_scheduler(CreateSchedulerParams {
            expression: "  ".into(),
            callback,
            on_result: None,
            options: SchedulerOptions::default(),
        })
        .err()
        .unwrap();
        assert_eq!(err.to_string(), "Schedule expression is required");
    }

    #[test]
    fn test_unknown_timezone_rejected() {
        let callback: ScheduleCallback = Arc::new(|| Box::pin(async { dummy_result() }));
        let err = create_scheduler(CreateSchedulerParams {
            expression: "0 30 14 * * *".into(),
            callback,
            on_result: None,
            options: SchedulerOptions {
                timezone: Some("Mars/Olympus".into()),
                ..Default::default()
            },
        })
        .err()
        .unwrap();
        assert!(err.to_string().contains("Unknown timezone"));
    }

    #[tokio::test]
    async fn test_fire_now_respects_no_overlap() {
        let (handle, calls) = counting_scheduler(
            "0 30 14 * * *",
            SchedulerOptions::default(),
            Duration::from_millis(200),
        );

        assert!(handle.fire_now());
        // Second fire while the first callback is still running is skipped.
        assert!(!handle.fire_now());
        assert_eq!(handle.execution_count(), 1);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(handle.fire_now());
    }

    #[tokio::test]
    async fn test_fire_now_respects_max_executions() {
        let (handle, calls) = counting_scheduler(
            "0 30 14 * * *",
            SchedulerOptions {
                max_executions: Some(2),
                ..Default::default()
            },
            Duration::ZERO,
        );

        assert!(handle.fire_now());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(handle.fire_now());
        tokio::time::sleep(Duration::from_millis(50)).await;
        // Limit reached: further fires are refused.
        assert!(!handle.fire_now());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(handle.execution_count(), 2);
    }

    #[tokio::test]
    async fn test_start_stop_destroy_idempotent() {
        let (handle, _calls) = counting_scheduler(
            "0 30 14 * * *",
            SchedulerOptions::default(),
            Duration::ZERO,
        );

        handle.start();
        handle.start();
        assert!(handle.is_started());

        handle.stop();
        handle.stop();
        assert!(!handle.is_started());

        handle.start();
        assert!(handle.is_started());

        handle.destroy();
        handle.destroy();
        assert!(!handle.is_started());
        // A destroyed schedule cannot be restarted.
        handle.start();
        assert!(!handle.is_started());
    }

    #[tokio::test]
    async fn test_on_result_receives_callback_result() {
        let received = Arc::new(AtomicUsize::new(0));
        let received_clone = Arc::clone(&received);
        let callback: ScheduleCallback = Arc::new(|| Box::pin(async { dummy_result() }));
        let on_result: ScheduleResultHook = Arc::new(move |result| {
            assert_eq!(result.status, ExecutionStatus::Completed);
            received_clone.fetch_add(1, Ordering::SeqCst);
        });

        let handle = create_scheduler(CreateSchedulerParams {
            expression: "0 30 14 * * *".into(),
            callback,
            on_result: Some(on_result),
            options: SchedulerOptions::default(),
        })
        .unwrap();

        assert!(handle.fire_now());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(received.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_scheduled_fires_stop_at_limit() {
        let (handle, calls) = counting_scheduler(
            "* * * * * *",
            SchedulerOptions {
                max_executions: Some(2),
                ..Default::default()
            },
            Duration::ZERO,
        );

        handle.start();
        tokio::time::sleep(Duration::from_millis(3500)).await;
        handle.destroy();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(handle.execution_count(), 2);
        // Trigger self-disabled once the limit was hit.
        assert!(!handle.is_started());
    }
}
