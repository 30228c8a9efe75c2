// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

pub mod clock;
pub mod compute;
pub mod object_store;
pub mod remote_exec;
pub mod telemetry;

pub use clock::ClockPort;
pub use compute::ComputePort;
pub use object_store::ObjectStorePort;
pub use remote_exec::RemoteExecPort;
pub use telemetry::{NoopTelemetry, TelemetryEvent, TelemetryPort};
