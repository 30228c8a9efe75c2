// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::convert::Infallible;
use std::sync::Mutex;

use tokio::sync::watch;

use super::Launcher;
use crate::app::errors::{AppError, AppErrorKind, LaunchError, LaunchResult, codes};
use crate::app::ports::{ComputePort, TelemetryEvent};
use crate::app::services::poller::{self, PollOutcome, PollResult};
use crate::app::types::{ExecutionContext, InstanceIdentity};

const STAGE: &str = "provision";

fn take_last(last: &Mutex<Option<AppError>>) -> Option<AppError> {
    last.lock().ok().and_then(|mut guard| guard.take())
}

fn remember(last: &Mutex<Option<AppError>>, err: AppError) {
    if let Ok(mut guard) = last.lock() {
        *guard = Some(err);
    }
}

impl Launcher {
    /// Allocates exactly one instance, starts it and waits until the provider
    /// reports it running. The instance id and volume are recorded once.
    #[tracing::instrument(name = "provision", skip_all)]
    pub async fn allocate_and_start(
        &self,
        mut ctx: ExecutionContext,
        cancel: &mut watch::Receiver<bool>,
    ) -> LaunchResult<ExecutionContext> {
        if poller::is_cancelled(cancel) {
            return Err(LaunchError::Cancelled { stage: STAGE });
        }
        ctx.force_single_instance();

        let instance_id = self
            .compute
            .allocate(ctx.instance_request())
            .await
            .map_err(LaunchError::Provider)?;
        tracing::info!(instance_id = %instance_id, "instance allocated");
        self.telemetry.event(
            "instance.allocated",
            TelemetryEvent {
                instance_id: Some(instance_id.clone()),
                ..self.telemetry_base(&ctx)
            },
        );

        self.start_instance(&instance_id, cancel).await?;

        let compute: &dyn ComputePort = self.compute.as_ref();
        let id = instance_id.as_str();
        let outcome: PollOutcome<_, Infallible> =
            poller::poll(&self.policy.instance_poll, cancel, move |attempt| async move {
                match compute.describe(id).await {
                    Ok(description) if description.status.is_running() => {
                        PollResult::Ready(description)
                    }
                    Ok(description) => {
                        tracing::debug!(attempt, status = %description.status, "instance not running yet");
                        PollResult::NotReady
                    }
                    Err(err) => {
                        tracing::debug!(attempt, error = %err, "describe failed; polling again");
                        PollResult::NotReady
                    }
                }
            })
            .await;

        let description = match outcome {
            PollOutcome::Ready(description) => description,
            PollOutcome::Fatal(never) => match never {},
            PollOutcome::Timeout { attempts } => {
                tracing::warn!(instance_id = %instance_id, attempts, "instance never reached running");
                return Err(LaunchError::ProvisioningTimeout {
                    instance_id,
                    attempts,
                });
            }
            PollOutcome::Cancelled { .. } => return Err(LaunchError::Cancelled { stage: STAGE }),
        };

        ctx.record_instance(InstanceIdentity {
            instance_id: instance_id.clone(),
            volume_id: description.volume_id,
        })?;
        tracing::info!(instance_id = %instance_id, "instance running");
        self.telemetry
            .event("instance.running", self.telemetry_base(&ctx));
        Ok(ctx)
    }

    /// Start requests can race the allocation becoming visible, so transient
    /// refusals are retried on a fixed interval.
    async fn start_instance(
        &self,
        instance_id: &str,
        cancel: &mut watch::Receiver<bool>,
    ) -> LaunchResult<()> {
        let compute: &dyn ComputePort = self.compute.as_ref();
        let last = Mutex::new(None);
        let last_ref = &last;
        let outcome = poller::poll(&self.policy.start_retry, cancel, move |attempt| async move {
            match compute.start(instance_id).await {
                Ok(()) => PollResult::Ready(()),
                Err(err) if err.is_permanent() => PollResult::Fatal(err),
                Err(err) => {
                    tracing::debug!(attempt, error = %err, "start refused; retrying");
                    remember(last_ref, err);
                    PollResult::NotReady
                }
            }
        })
        .await;

        match outcome {
            PollOutcome::Ready(()) => Ok(()),
            PollOutcome::Fatal(err) => Err(LaunchError::Provider(err)),
            PollOutcome::Timeout { attempts } => {
                let err = take_last(&last).unwrap_or_else(|| {
                    AppError::with_message(
                        AppErrorKind::Unavailable,
                        codes::PROVIDER_ERROR,
                        format!("instance {instance_id} could not be started"),
                    )
                });
                Err(LaunchError::Provider(
                    err.with_context(format!("start gave up after {attempts} attempts")),
                ))
            }
            PollOutcome::Cancelled { .. } => Err(LaunchError::Cancelled { stage: STAGE }),
        }
    }
}
