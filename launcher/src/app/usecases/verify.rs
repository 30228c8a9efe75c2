// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use tokio::sync::watch;

use super::Launcher;
use crate::app::errors::{LaunchError, LaunchResult};
use crate::app::ports::ComputePort;
use crate::app::services::poller::{self, PollOutcome, PollResult};
use crate::app::types::ExecutionContext;

const STAGE: &str = "verify";

/// Providers may report the attached profile as an ARN; only its last path
/// segment is the profile name.
pub(crate) fn attached_role_name(attached: &str) -> &str {
    attached.rsplit('/').next().unwrap_or(attached)
}

impl Launcher {
    /// Confirms the running instance carries the requested role. A mismatch
    /// is final: it is reported once and never polled again.
    #[tracing::instrument(name = "verify", skip_all, fields(instance_id = ctx.instance_id().unwrap_or_default()))]
    pub async fn verify_role(
        &self,
        mut ctx: ExecutionContext,
        cancel: &mut watch::Receiver<bool>,
    ) -> LaunchResult<ExecutionContext> {
        let Some(instance_id) = ctx.instance_id().map(str::to_string) else {
            return Err(LaunchError::Internal(
                "role verification needs an allocated instance".into(),
            ));
        };
        let expected = ctx.instance_request().role_name().to_string();

        let compute: &dyn ComputePort = self.compute.as_ref();
        let id = instance_id.as_str();
        let wanted = expected.as_str();
        let outcome = poller::poll(&self.policy.role_check, cancel, move |attempt| async move {
            let description = match compute.describe(id).await {
                Ok(description) => description,
                Err(err) => {
                    tracing::debug!(attempt, error = %err, "describe failed during role check");
                    return PollResult::NotReady;
                }
            };
            if !description.status.is_running() {
                return PollResult::NotReady;
            }
            let actual = description
                .attached_role
                .as_deref()
                .map(attached_role_name)
                .unwrap_or_default();
            if actual == wanted {
                PollResult::Ready(actual.to_string())
            } else {
                PollResult::Fatal(LaunchError::IdentityMismatch {
                    expected: wanted.to_string(),
                    actual: actual.to_string(),
                })
            }
        })
        .await;

        match outcome {
            PollOutcome::Ready(role) => {
                tracing::info!(role = %role, "instance role verified");
                ctx.record_verified_role(role);
                self.telemetry
                    .event("instance.verified", self.telemetry_base(&ctx));
                Ok(ctx)
            }
            PollOutcome::Fatal(err) => {
                tracing::error!(error = %err, "instance role does not match the request");
                Err(err)
            }
            PollOutcome::Timeout { attempts } => Err(LaunchError::VerificationTimeout {
                instance_id,
                attempts,
            }),
            PollOutcome::Cancelled { .. } => Err(LaunchError::Cancelled { stage: STAGE }),
        }
    }
}
