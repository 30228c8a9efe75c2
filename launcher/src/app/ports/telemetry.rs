// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

#[derive(Clone, Debug, Default)]
pub struct TelemetryEvent {
    pub region: Option<String>,
    pub instance_id: Option<String>,
    pub instance_type: Option<String>,
    pub retry_attempt: Option<u32>,
    pub handle: Option<String>,
    pub detail: Option<String>,
}

/// Lifecycle events of a launch (instance running, role verified, dispatched...).
pub trait TelemetryPort: Send + Sync {
    fn event(&self, name: &'static str, fields: TelemetryEvent);
}

// Dummy telemetry port for tests.
#[derive(Clone, Default)]
pub struct NoopTelemetry;

impl TelemetryPort for NoopTelemetry {
    fn event(&self, _name: &'static str, _fields: TelemetryEvent) {}
}
