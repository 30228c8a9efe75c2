// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use super::Launcher;
use crate::app::errors::{AppError, AppErrorKind, LaunchError, LaunchResult, codes};
use crate::app::services::metadata::{self, MetadataTarget};
use crate::app::types::ExecutionContext;

impl Launcher {
    /// Writes the resolved context as `execution.json`. Failures are returned
    /// to the caller, which decides whether they block the launch.
    #[tracing::instrument(name = "persist", skip_all, fields(bucket = %target.bucket, key = %target.key))]
    pub async fn persist_metadata(
        &self,
        ctx: &ExecutionContext,
        target: &MetadataTarget,
    ) -> LaunchResult<()> {
        let failed = |source: AppError| LaunchError::PersistenceFailed {
            bucket: target.bucket.clone(),
            key: target.key.clone(),
            source,
        };

        let body = metadata::render(ctx).map_err(|err| {
            failed(AppError::with_message(
                AppErrorKind::Internal,
                codes::INTERNAL_ERROR,
                format!("failed to encode execution record: {err}"),
            ))
        })?;
        self.objects
            .put(&target.bucket, &target.key, body)
            .await
            .map_err(failed)?;

        tracing::info!("execution record written");
        self.telemetry.event(
            "metadata.persisted",
            crate::app::ports::TelemetryEvent {
                detail: Some(format!("{}/{}", target.bucket, target.key)),
                ..self.telemetry_base(ctx)
            },
        );
        Ok(())
    }
}
