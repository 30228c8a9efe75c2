// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::convert::Infallible;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::watch;

use super::Launcher;
use crate::app::errors::{AppError, AppErrorKind, LaunchError, LaunchResult, codes};
use crate::app::ports::RemoteExecPort;
use crate::app::services::poller::{self, PollOutcome, PollResult};
use crate::app::types::{ExecutionContext, InvocationStatus};

const STAGE: &str = "dispatch";

/// Whether the remote side acknowledged the invocation in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchConfirmation {
    Confirmed(InvocationStatus),
    Unconfirmed { attempts: u32 },
}

impl Launcher {
    /// Transport timeout for the invocation. The job's own run timeout is
    /// left to the job and does not size the channel.
    pub(crate) fn execution_timeout(&self) -> Duration {
        self.policy.execution_timeout
    }

    /// Sends the built commands to the verified instance and waits briefly
    /// for the invocation to show up. The handle is recorded as soon as the
    /// send succeeds, acknowledged or not.
    #[tracing::instrument(name = "dispatch", skip_all, fields(instance_id = ctx.instance_id().unwrap_or_default()))]
    pub async fn dispatch(
        &self,
        mut ctx: ExecutionContext,
        cancel: &mut watch::Receiver<bool>,
    ) -> LaunchResult<(ExecutionContext, DispatchConfirmation)> {
        if ctx.verified_role().is_none() {
            return Err(LaunchError::Internal(
                "refusing to dispatch to an unverified instance".into(),
            ));
        }
        let Some(instance_id) = ctx.instance_id().map(str::to_string) else {
            return Err(LaunchError::Internal(
                "dispatch needs an allocated instance".into(),
            ));
        };
        let Some(commands) = ctx.commands().map(<[String]>::to_vec) else {
            return Err(LaunchError::Internal(
                "dispatch needs built commands".into(),
            ));
        };

        let timeout = self.execution_timeout();
        let handle = self
            .send_commands(&instance_id, &commands, timeout, cancel)
            .await?;
        ctx.record_dispatch_handle(handle.clone())?;
        tracing::info!(handle = %handle, commands = commands.len(), "commands sent");
        self.telemetry
            .event("commands.dispatched", self.telemetry_base(&ctx));

        let exec: &dyn RemoteExecPort = self.remote_exec.as_ref();
        let id = instance_id.as_str();
        let handle_ref = handle.as_str();
        let outcome: PollOutcome<_, Infallible> =
            poller::poll(&self.policy.ack_poll, cancel, move |attempt| async move {
                match exec.get_status(handle_ref, id).await {
                    Ok(status) => PollResult::Ready(status),
                    Err(err) => {
                        tracing::debug!(attempt, error = %err, "invocation not registered yet");
                        PollResult::NotReady
                    }
                }
            })
            .await;

        let confirmation = match outcome {
            PollOutcome::Ready(status) => {
                tracing::info!(status = status.as_str(), "invocation acknowledged");
                DispatchConfirmation::Confirmed(status)
            }
            PollOutcome::Fatal(never) => match never {},
            PollOutcome::Timeout { attempts } | PollOutcome::Cancelled { attempts } => {
                tracing::warn!(handle = %handle, attempts, "invocation not acknowledged");
                DispatchConfirmation::Unconfirmed { attempts }
            }
        };
        Ok((ctx, confirmation))
    }

    /// Follows a dispatched invocation until it reaches a terminal status.
    /// Status errors count as "not yet". Gives up with `TimedOut` a minute
    /// after the transport timeout would have fired.
    #[tracing::instrument(name = "wait", skip_all, fields(handle = ctx.dispatch_handle().unwrap_or_default()))]
    pub async fn wait_for_completion(
        &self,
        ctx: &ExecutionContext,
        poll_interval: Duration,
        cancel: &mut watch::Receiver<bool>,
    ) -> LaunchResult<InvocationStatus> {
        let (Some(instance_id), Some(handle)) = (ctx.instance_id(), ctx.dispatch_handle()) else {
            return Err(LaunchError::Internal(
                "nothing was dispatched for this context".into(),
            ));
        };
        let interval = poll_interval.max(Duration::from_millis(1));
        let budget = self.execution_timeout() + Duration::from_secs(60);
        let max_attempts =
            u32::try_from(budget.as_millis() / interval.as_millis()).unwrap_or(u32::MAX);
        let schedule = poller::Schedule::fixed(interval, max_attempts.saturating_add(1));

        let exec: &dyn RemoteExecPort = self.remote_exec.as_ref();
        let outcome: PollOutcome<_, Infallible> =
            poller::poll(&schedule, cancel, move |_| async move {
                match exec.get_status(handle, instance_id).await {
                    Ok(status) if status.is_terminal() => PollResult::Ready(status),
                    Ok(_) | Err(_) => PollResult::NotReady,
                }
            })
            .await;

        match outcome {
            PollOutcome::Ready(status) => {
                tracing::info!(status = status.as_str(), "invocation finished");
                self.telemetry.event(
                    "commands.finished",
                    crate::app::ports::TelemetryEvent {
                        detail: Some(status.as_str().to_string()),
                        ..self.telemetry_base(ctx)
                    },
                );
                Ok(status)
            }
            PollOutcome::Fatal(never) => match never {},
            PollOutcome::Timeout { .. } => Ok(InvocationStatus::TimedOut),
            PollOutcome::Cancelled { .. } => Err(LaunchError::Cancelled { stage: "wait" }),
        }
    }

    /// The remote agent may not be registered right after boot; transient
    /// refusals are retried, permanent ones end the launch.
    async fn send_commands(
        &self,
        instance_id: &str,
        commands: &[String],
        timeout: Duration,
        cancel: &mut watch::Receiver<bool>,
    ) -> LaunchResult<String> {
        let exec: &dyn RemoteExecPort = self.remote_exec.as_ref();
        let last: Mutex<Option<AppError>> = Mutex::new(None);
        let last_ref = &last;
        let outcome = poller::poll(&self.policy.send_retry, cancel, move |attempt| async move {
            match exec.send(instance_id, commands, timeout).await {
                Ok(handle) => PollResult::Ready(handle),
                Err(err) if err.is_permanent() => PollResult::Fatal(err),
                Err(err) => {
                    tracing::debug!(attempt, error = %err, "send refused; retrying");
                    if let Ok(mut guard) = last_ref.lock() {
                        *guard = Some(err);
                    }
                    PollResult::NotReady
                }
            }
        })
        .await;

        match outcome {
            PollOutcome::Ready(handle) => Ok(handle),
            PollOutcome::Fatal(err) => Err(LaunchError::DispatchRejected {
                instance_id: instance_id.to_string(),
                reason: err.to_string(),
            }),
            PollOutcome::Timeout { attempts } => {
                let last = last.lock().ok().and_then(|mut guard| guard.take());
                let err = last.unwrap_or_else(|| {
                    AppError::with_message(
                        AppErrorKind::Unavailable,
                        codes::REMOTE_ERROR,
                        format!("instance {instance_id} did not accept commands"),
                    )
                });
                Err(LaunchError::Provider(
                    err.with_context(format!("send gave up after {attempts} attempts")),
                ))
            }
            PollOutcome::Cancelled { .. } => Err(LaunchError::Cancelled { stage: STAGE }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::super::testing::*;
    use super::super::EXECUTION_TIMEOUT;
    use super::*;
    use crate::app::services::poller::never_cancelled;
    use crate::app::types::InstanceIdentity;
    use time::macros::datetime;

    fn ready_context(launcher: &Launcher, timeout_s: Option<u64>) -> ExecutionContext {
        let mut submission = commands_submission();
        if let Some(timeout_s) = timeout_s {
            submission.run_options.timeout_s = timeout_s;
        }
        let mut ctx = launcher.begin(submission, "us-east-1").expect("context");
        ctx.record_instance(InstanceIdentity {
            instance_id: "i-123".into(),
            volume_id: None,
        })
        .expect("identity");
        ctx.record_verified_role("datastream-role".into());
        let (ctx, _) = launcher.build_commands(ctx).expect("build");
        ctx
    }

    fn launcher_with(exec: Arc<RecordingRemoteExec>) -> Launcher {
        build_launcher(
            Arc::new(ScriptedCompute::new("i-123")),
            exec,
            Arc::new(MemoryObjectStore::default()),
            datetime!(2024-06-01 10:00 UTC),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn unverified_instance_is_never_sent_commands() {
        let exec = Arc::new(RecordingRemoteExec::acknowledging("cmd-1"));
        let launcher = launcher_with(exec.clone());
        let mut ctx = launcher
            .begin(commands_submission(), "us-east-1")
            .expect("context");
        ctx.record_instance(InstanceIdentity {
            instance_id: "i-123".into(),
            volume_id: None,
        })
        .expect("identity");

        let err = launcher
            .dispatch(ctx, &mut never_cancelled())
            .await
            .expect_err("must fail");

        assert!(matches!(err, LaunchError::Internal(_)));
        assert!(exec.sends().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn transient_send_failures_are_retried_until_accepted() {
        let exec = Arc::new(RecordingRemoteExec::acknowledging("cmd-5").with_send_failures(vec![
            AppError::new(AppErrorKind::Unavailable, codes::REMOTE_ERROR),
            AppError::new(AppErrorKind::Unavailable, codes::REMOTE_ERROR),
        ]));
        let launcher = launcher_with(exec.clone());
        let ctx = ready_context(&launcher, None);

        let (ctx, confirmation) = launcher
            .dispatch(ctx, &mut never_cancelled())
            .await
            .expect("dispatch");

        assert_eq!(exec.send_calls(), 3);
        assert_eq!(ctx.dispatch_handle(), Some("cmd-5"));
        assert_eq!(
            confirmation,
            DispatchConfirmation::Confirmed(InvocationStatus::Pending)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_refusal_is_dispatch_rejected() {
        let exec = Arc::new(RecordingRemoteExec::acknowledging("cmd-5").with_send_failures(vec![
            AppError::with_message(AppErrorKind::Rejected, codes::PROVIDER_REJECTED, "bad document"),
        ]));
        let launcher = launcher_with(exec.clone());
        let ctx = ready_context(&launcher, None);

        let err = launcher
            .dispatch(ctx, &mut never_cancelled())
            .await
            .expect_err("must fail");

        assert!(err.is_fatal());
        assert!(matches!(
            err,
            LaunchError::DispatchRejected { ref instance_id, ref reason }
                if instance_id == "i-123" && reason == "bad document"
        ));
        assert_eq!(exec.send_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_send_retries_are_retryable() {
        let failures = (0..30)
            .map(|_| AppError::new(AppErrorKind::Unavailable, codes::REMOTE_ERROR))
            .collect();
        let exec =
            Arc::new(RecordingRemoteExec::acknowledging("cmd-5").with_send_failures(failures));
        let launcher = launcher_with(exec.clone());
        let ctx = ready_context(&launcher, None);

        let err = launcher
            .dispatch(ctx, &mut never_cancelled())
            .await
            .expect_err("must fail");

        assert!(err.is_retryable());
        assert_eq!(exec.send_calls(), 30);
    }

    #[tokio::test(start_paused = true)]
    async fn transport_timeout_ignores_run_timeout() {
        let exec = Arc::new(RecordingRemoteExec::acknowledging("cmd-1"));
        let launcher = launcher_with(exec.clone());

        let ctx = ready_context(&launcher, Some(60));
        launcher
            .dispatch(ctx, &mut never_cancelled())
            .await
            .expect("dispatch");
        let ctx = ready_context(&launcher, Some(3 * 24 * 3600));
        launcher
            .dispatch(ctx, &mut never_cancelled())
            .await
            .expect("dispatch");

        let sends = exec.sends();
        assert_eq!(sends[0].2, EXECUTION_TIMEOUT);
        assert_eq!(sends[1].2, EXECUTION_TIMEOUT);
    }

    #[tokio::test(start_paused = true)]
    async fn waiting_follows_status_to_a_terminal_state() {
        let exec = Arc::new(RecordingRemoteExec::acknowledging("cmd-2").with_statuses(vec![
            Ok(InvocationStatus::Pending),
            Ok(InvocationStatus::InProgress),
            Err(AppError::new(AppErrorKind::Unavailable, codes::REMOTE_ERROR)),
            Ok(InvocationStatus::Failed),
        ]));
        let launcher = launcher_with(exec.clone());
        let ctx = ready_context(&launcher, None);
        let (ctx, confirmation) = launcher
            .dispatch(ctx, &mut never_cancelled())
            .await
            .expect("dispatch");
        assert_eq!(
            confirmation,
            DispatchConfirmation::Confirmed(InvocationStatus::Pending)
        );

        let status = launcher
            .wait_for_completion(&ctx, Duration::from_secs(5), &mut never_cancelled())
            .await
            .expect("wait");

        assert_eq!(status, InvocationStatus::Failed);
        assert_eq!(exec.status_calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn waiting_without_dispatch_is_an_error() {
        let launcher = launcher_with(Arc::new(RecordingRemoteExec::acknowledging("cmd-1")));
        let ctx = ready_context(&launcher, None);
        let err = launcher
            .wait_for_completion(&ctx, Duration::from_secs(1), &mut never_cancelled())
            .await
            .expect_err("must fail");
        assert!(matches!(err, LaunchError::Internal(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_while_waiting_for_ack_keeps_the_handle() {
        let exec = Arc::new(RecordingRemoteExec::silent("cmd-9"));
        let launcher = launcher_with(exec.clone());
        let ctx = ready_context(&launcher, None);
        let (tx, mut rx) = watch::channel(false);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1500)).await;
            let _ = tx.send(true);
        });

        let (ctx, confirmation) = launcher
            .dispatch(ctx, &mut rx)
            .await
            .expect("dispatch");

        assert_eq!(ctx.dispatch_handle(), Some("cmd-9"));
        assert_eq!(
            confirmation,
            DispatchConfirmation::Unconfirmed { attempts: 2 }
        );
    }
}
