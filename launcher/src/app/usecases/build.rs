// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use super::Launcher;
use crate::app::errors::{LaunchError, LaunchResult};
use crate::app::services::commands;
use crate::app::services::metadata::MetadataTarget;
use crate::app::types::ExecutionContext;

impl Launcher {
    /// Replaces the job with its resolved commands. Returns where the
    /// execution record goes when the job is a daily one.
    #[tracing::instrument(name = "build", skip_all)]
    pub fn build_commands(
        &self,
        mut ctx: ExecutionContext,
    ) -> LaunchResult<(ExecutionContext, Option<MetadataTarget>)> {
        let built = commands::build(
            ctx.job(),
            ctx.storage(),
            ctx.forcing_source(),
            self.clock.now_utc(),
        )
        .map_err(LaunchError::InvalidJob)?;

        let metadata_target = if built.daily_prefix {
            built.storage.as_ref().map(MetadataTarget::for_storage)
        } else {
            None
        };
        if let Some(date) = &built.resolved_date {
            tracing::info!(date = %date, "resolved daily placeholder");
        }
        tracing::debug!(count = built.commands.len(), "commands built");

        ctx.record_commands(
            built.commands,
            built.storage,
            built.forcing_source,
            built.resolved_date,
        );
        Ok((ctx, metadata_target))
    }
}
