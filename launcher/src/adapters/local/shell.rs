// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::app::errors::{AppError, AppErrorKind, AppResult, codes};
use crate::app::ports::RemoteExecPort;
use crate::app::services::random::lowercase_suffix;
use crate::app::types::InvocationStatus;

type Invocations = Arc<Mutex<HashMap<String, (String, InvocationStatus)>>>;

/// Runs dispatched commands with `sh -c` on this host, one after another,
/// in a background task.
#[derive(Clone, Debug, Default)]
pub struct LocalShell {
    invocations: Invocations,
}

impl LocalShell {
    pub fn new() -> Self {
        Self::default()
    }
}

fn set_status(invocations: &Invocations, handle: &str, status: InvocationStatus) {
    if let Ok(mut map) = invocations.lock() {
        if let Some(entry) = map.get_mut(handle) {
            entry.1 = status;
        }
    }
}

async fn run_all(commands: &[String]) -> InvocationStatus {
    for command in commands {
        let output = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await;
        match output {
            Ok(output) if output.status.success() => {
                tracing::debug!(
                    command = %command,
                    stdout_bytes = output.stdout.len(),
                    "command finished"
                );
            }
            Ok(output) => {
                tracing::warn!(
                    command = %command,
                    code = output.status.code(),
                    stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                    "command failed"
                );
                return InvocationStatus::Failed;
            }
            Err(err) => {
                tracing::error!(command = %command, error = %err, "failed to spawn command");
                return InvocationStatus::Failed;
            }
        }
    }
    InvocationStatus::Success
}

#[async_trait]
impl RemoteExecPort for LocalShell {
    #[tracing::instrument(name = "local_shell", level = "debug", skip(self, commands), fields(op = "send"))]
    async fn send(
        &self,
        instance_id: &str,
        commands: &[String],
        execution_timeout: Duration,
    ) -> AppResult<String> {
        if commands.is_empty() {
            return Err(AppError::with_message(
                AppErrorKind::Rejected,
                codes::PROVIDER_REJECTED,
                "no commands to run",
            ));
        }
        let handle = format!("cmd-{}", lowercase_suffix(16));
        self.invocations
            .lock()
            .map_err(|_| {
                AppError::with_message(
                    AppErrorKind::Internal,
                    codes::INTERNAL_ERROR,
                    "local invocation table poisoned",
                )
            })?
            .insert(
                handle.clone(),
                (instance_id.to_string(), InvocationStatus::Pending),
            );

        let invocations = self.invocations.clone();
        let task_handle = handle.clone();
        let commands = commands.to_vec();
        tokio::spawn(async move {
            set_status(&invocations, &task_handle, InvocationStatus::InProgress);
            let status = match tokio::time::timeout(execution_timeout, run_all(&commands)).await {
                Ok(status) => status,
                Err(_) => {
                    tracing::warn!(handle = %task_handle, "invocation timed out");
                    InvocationStatus::TimedOut
                }
            };
            tracing::info!(handle = %task_handle, status = status.as_str(), "invocation finished");
            set_status(&invocations, &task_handle, status);
        });
        Ok(handle)
    }

    async fn get_status(&self, handle: &str, instance_id: &str) -> AppResult<InvocationStatus> {
        let invocations = self.invocations.lock().map_err(|_| {
            AppError::with_message(
                AppErrorKind::Internal,
                codes::INTERNAL_ERROR,
                "local invocation table poisoned",
            )
        })?;
        match invocations.get(handle) {
            Some((owner, status)) if owner == instance_id => Ok(*status),
            _ => Err(AppError::with_message(
                AppErrorKind::NotFound,
                codes::NOT_FOUND,
                format!("no invocation {handle} on {instance_id}"),
            )),
        }
    }
}
