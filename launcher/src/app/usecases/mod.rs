// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::app::errors::{LaunchError, LaunchResult};
use crate::app::ports::{
    ClockPort, ComputePort, ObjectStorePort, RemoteExecPort, TelemetryEvent, TelemetryPort,
};
use crate::app::services::commands;
use crate::app::services::poller::Schedule;
use crate::app::types::{ExecutionContext, JobSubmission};

mod build;
mod dispatch;
mod persist;
mod provision;
mod verify;

#[cfg(test)]
mod testing;

pub use dispatch::DispatchConfirmation;

const ONE_SECOND: Duration = Duration::from_secs(1);
/// Transport-level timeout of a dispatched invocation.
pub const EXECUTION_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// Attempt budgets and delays for every waiting step of a launch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelinePolicy {
    pub instance_poll: Schedule,
    pub start_retry: Schedule,
    pub role_check: Schedule,
    pub send_retry: Schedule,
    pub ack_poll: Schedule,
    pub execution_timeout: Duration,
}

impl Default for PipelinePolicy {
    fn default() -> Self {
        Self {
            instance_poll: Schedule::exponential(60, Duration::from_secs(60)),
            start_retry: Schedule::fixed(ONE_SECOND, 30),
            role_check: Schedule::fixed(ONE_SECOND, 120),
            send_retry: Schedule::fixed(ONE_SECOND, 30),
            ack_poll: Schedule::fixed(ONE_SECOND, 10),
            execution_timeout: EXECUTION_TIMEOUT,
        }
    }
}

/// A dispatched job and the non-fatal conditions met on the way.
#[derive(Debug)]
pub struct LaunchOutcome {
    pub context: ExecutionContext,
    pub warnings: Vec<LaunchError>,
}

/// Runs one job from allocation to dispatch. Provider handles are owned by
/// the launcher and handed to each stage; nothing is shared between jobs
/// except what the caller chooses to share.
#[derive(Clone)]
pub struct Launcher {
    pub(crate) compute: Arc<dyn ComputePort>,
    pub(crate) remote_exec: Arc<dyn RemoteExecPort>,
    pub(crate) objects: Arc<dyn ObjectStorePort>,
    pub(crate) clock: Arc<dyn ClockPort>,
    pub(crate) telemetry: Arc<dyn TelemetryPort>,
    pub(crate) policy: PipelinePolicy,
}

impl Launcher {
    pub fn new(
        compute: Arc<dyn ComputePort>,
        remote_exec: Arc<dyn RemoteExecPort>,
        objects: Arc<dyn ObjectStorePort>,
        clock: Arc<dyn ClockPort>,
        telemetry: Arc<dyn TelemetryPort>,
        policy: PipelinePolicy,
    ) -> Self {
        Self {
            compute,
            remote_exec,
            objects,
            clock,
            telemetry,
            policy,
        }
    }

    pub fn policy(&self) -> &PipelinePolicy {
        &self.policy
    }

    /// Creates the context of a fresh submission, stamped with the start time.
    pub fn begin(&self, submission: JobSubmission, region: &str) -> LaunchResult<ExecutionContext> {
        submission.into_context(region, self.clock.now_utc())
    }

    pub async fn submit(
        &self,
        submission: JobSubmission,
        region: &str,
        cancel: watch::Receiver<bool>,
    ) -> LaunchResult<LaunchOutcome> {
        let ctx = self.begin(submission, region)?;
        self.launch(ctx, cancel).await
    }

    /// Provision → verify → build → persist (daily jobs only) → dispatch.
    #[tracing::instrument(
        name = "launch",
        skip_all,
        fields(
            region = %ctx.region(),
            instance_type = %ctx.instance_request().instance_type,
            retry_attempt = ctx.retry_attempt(),
        )
    )]
    pub async fn launch(
        &self,
        ctx: ExecutionContext,
        mut cancel: watch::Receiver<bool>,
    ) -> LaunchResult<LaunchOutcome> {
        // A job that cannot be built must not cost an instance.
        commands::build(
            ctx.job(),
            ctx.storage(),
            ctx.forcing_source(),
            ctx.start_time(),
        )
        .map_err(LaunchError::InvalidJob)?;

        self.telemetry.event("launch.started", self.telemetry_base(&ctx));
        let base = self.telemetry_base(&ctx);
        let result = self.run_stages(ctx, &mut cancel).await;
        if let Err(err) = &result {
            self.telemetry.event(
                "launch.failed",
                TelemetryEvent {
                    detail: Some(err.code().to_string()),
                    ..base
                },
            );
        }
        result
    }

    async fn run_stages(
        &self,
        ctx: ExecutionContext,
        cancel: &mut watch::Receiver<bool>,
    ) -> LaunchResult<LaunchOutcome> {
        let ctx = self.allocate_and_start(ctx, cancel).await?;
        let ctx = self.verify_role(ctx, cancel).await?;
        let (ctx, metadata_target) = self.build_commands(ctx)?;

        let mut warnings = Vec::new();
        if let Some(target) = metadata_target {
            if let Err(err) = self.persist_metadata(&ctx, &target).await {
                tracing::warn!(error = %err, "execution record not written; dispatching anyway");
                warnings.push(err);
            }
        }

        let (ctx, confirmation) = self.dispatch(ctx, cancel).await?;
        if let DispatchConfirmation::Unconfirmed { attempts } = confirmation {
            warnings.push(LaunchError::DispatchUnconfirmed {
                handle: ctx.dispatch_handle().unwrap_or_default().to_string(),
                attempts,
            });
        }
        Ok(LaunchOutcome {
            context: ctx,
            warnings,
        })
    }

    pub(crate) fn telemetry_base(&self, ctx: &ExecutionContext) -> TelemetryEvent {
        TelemetryEvent {
            region: Some(ctx.region().to_string()),
            instance_id: ctx.instance_id().map(str::to_string),
            instance_type: Some(ctx.instance_request().instance_type.clone()),
            retry_attempt: Some(ctx.retry_attempt()),
            handle: ctx.dispatch_handle().map(str::to_string),
            detail: None,
        }
    }
}
