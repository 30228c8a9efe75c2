// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::time::Duration;

use async_trait::async_trait;

use crate::app::errors::AppResult;
use crate::app::types::InvocationStatus;

#[async_trait]
/// Remote command execution boundary.
/// `send` returns a correlation handle; `get_status` fails until the
/// invocation is registered on the instance.
pub trait RemoteExecPort: Send + Sync {
    async fn send(
        &self,
        instance_id: &str,
        commands: &[String],
        execution_timeout: Duration,
    ) -> AppResult<String>;

    async fn get_status(&self, handle: &str, instance_id: &str) -> AppResult<InvocationStatus>;
}
