// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use crate::app::ports::{TelemetryEvent, TelemetryPort};

#[derive(Clone, Default)]
pub struct TracingTelemetry;

impl TracingTelemetry {
    pub fn new() -> Self {
        Self
    }
}

impl TelemetryPort for TracingTelemetry {
    fn event(&self, name: &'static str, fields: TelemetryEvent) {
        let TelemetryEvent {
            region,
            instance_id,
            instance_type,
            retry_attempt,
            handle,
            detail,
        } = fields;

        tracing::info!(
            target: "launcher::telemetry",
            event = name,
            region = region.as_deref(),
            instance_id = instance_id.as_deref(),
            instance_type = instance_type.as_deref(),
            retry_attempt = retry_attempt,
            handle = handle.as_deref(),
            detail = detail.as_deref(),
        );
    }
}
