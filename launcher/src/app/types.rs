// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use crate::app::errors::{LaunchError, LaunchResult};

pub const DEFAULT_RUN_TIMEOUT_SECS: u64 = 3600;

/// Key under `instance_parameters` that carries the allocated instance id.
const INSTANCE_ID_KEY: &str = "InstanceId";

fn single_instance() -> u32 {
    1
}

fn default_run_timeout() -> u64 {
    DEFAULT_RUN_TIMEOUT_SECS
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IamInstanceProfile {
    #[serde(rename = "Name")]
    pub name: String,
}

/// Requested compute shape. Keys follow the provider's run-instances
/// vocabulary; anything not modelled here is passed through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceRequest {
    #[serde(rename = "InstanceType")]
    pub instance_type: String,
    #[serde(rename = "ImageId")]
    pub image_id: String,
    #[serde(rename = "IamInstanceProfile")]
    pub iam_instance_profile: IamInstanceProfile,
    #[serde(rename = "MinCount", default = "single_instance")]
    pub min_count: u32,
    #[serde(rename = "MaxCount", default = "single_instance")]
    pub max_count: u32,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl InstanceRequest {
    pub fn role_name(&self) -> &str {
        &self.iam_instance_profile.name
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOptions {
    /// Upper bound for the job itself. The dispatch channel uses its own timeout.
    #[serde(default = "default_run_timeout")]
    pub timeout_s: u64,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            timeout_s: DEFAULT_RUN_TIMEOUT_SECS,
        }
    }
}

/// Structured datastream parameters, synthesized into a single command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOptions {
    pub start_time: String,
    pub end_time: String,
    pub nprocs: u32,
    pub forcing_source: String,
    pub realization: String,
    pub hydrofabric_version: String,
    pub subset_id: String,
    pub subset_id_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s3_bucket: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s3_prefix: Option<String>,
}

/// A job is described either by options or by literal commands, never both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobSpec {
    #[serde(rename = "datastream_command_options")]
    Options(JobOptions),
    #[serde(rename = "commands")]
    Commands(Vec<String>),
}

impl JobSpec {
    pub fn commands(&self) -> Option<&[String]> {
        match self {
            JobSpec::Commands(commands) => Some(commands),
            JobSpec::Options(_) => None,
        }
    }

    pub fn options(&self) -> Option<&JobOptions> {
        match self {
            JobSpec::Options(options) => Some(options),
            JobSpec::Commands(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageTarget {
    pub bucket: String,
    pub prefix: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceIdentity {
    pub instance_id: String,
    pub volume_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceStatus {
    Pending,
    Running,
    Stopping,
    Stopped,
    ShuttingDown,
    Terminated,
    Other(String),
}

impl InstanceStatus {
    pub fn as_str(&self) -> &str {
        match self {
            InstanceStatus::Pending => "pending",
            InstanceStatus::Running => "running",
            InstanceStatus::Stopping => "stopping",
            InstanceStatus::Stopped => "stopped",
            InstanceStatus::ShuttingDown => "shutting-down",
            InstanceStatus::Terminated => "terminated",
            InstanceStatus::Other(value) => value,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, InstanceStatus::Running)
    }
}

impl FromStr for InstanceStatus {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Self::Pending,
            "running" => Self::Running,
            "stopping" => Self::Stopping,
            "stopped" => Self::Stopped,
            "shutting-down" => Self::ShuttingDown,
            "terminated" => Self::Terminated,
            other => Self::Other(other.to_string()),
        })
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the compute provider reports about an instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceDescription {
    pub status: InstanceStatus,
    pub attached_role: Option<String>,
    pub volume_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationStatus {
    Pending,
    InProgress,
    Success,
    Failed,
    TimedOut,
    Cancelled,
}

impl InvocationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            InvocationStatus::Pending => "Pending",
            InvocationStatus::InProgress => "InProgress",
            InvocationStatus::Success => "Success",
            InvocationStatus::Failed => "Failed",
            InvocationStatus::TimedOut => "TimedOut",
            InvocationStatus::Cancelled => "Cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, InvocationStatus::Pending | InvocationStatus::InProgress)
    }
}

/// Job description handed over by the external orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSubmission {
    pub instance_parameters: InstanceRequest,
    #[serde(default)]
    pub run_options: RunOptions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datastream_command_options: Option<JobOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commands: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<StorageTarget>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forcing_source: Option<String>,
    #[serde(default)]
    pub retry_attempt: u32,
}

impl JobSubmission {
    /// The same job, submitted once more after a failure.
    pub fn resubmission(&self) -> Self {
        let mut next = self.clone();
        next.retry_attempt = next.retry_attempt.saturating_add(1);
        next
    }

    pub fn into_context(
        self,
        region: impl Into<String>,
        start_time: OffsetDateTime,
    ) -> LaunchResult<ExecutionContext> {
        let job = match (self.datastream_command_options, self.commands) {
            (Some(options), None) => JobSpec::Options(options),
            (None, Some(commands)) => {
                if commands.is_empty() {
                    return Err(LaunchError::InvalidJob("commands must not be empty".into()));
                }
                JobSpec::Commands(commands)
            }
            (Some(_), Some(_)) => {
                return Err(LaunchError::InvalidJob(
                    "datastream_command_options and commands are mutually exclusive".into(),
                ));
            }
            (None, None) => {
                return Err(LaunchError::InvalidJob(
                    "either datastream_command_options or commands is required".into(),
                ));
            }
        };
        if self.instance_parameters.role_name().trim().is_empty() {
            return Err(LaunchError::InvalidJob(
                "IamInstanceProfile.Name must not be empty".into(),
            ));
        }
        // A record fed back in as a new job still names the old instance.
        let mut instance_request = self.instance_parameters;
        instance_request.extra.remove(INSTANCE_ID_KEY);
        Ok(ExecutionContext {
            start_time,
            retry_attempt: self.retry_attempt,
            region: region.into(),
            instance_request,
            run_options: self.run_options,
            job,
            storage: self.storage,
            forcing_source: self.forcing_source,
            resolved_date: None,
            instance_identity: None,
            verified_role: None,
            dispatch_handle: None,
            revision: 0,
        })
    }
}

/// State of one job, handed from stage to stage by value.
///
/// Every field has a single writer; write-once fields refuse a second write.
/// The serialized form is the `execution.json` audit record, so key names are
/// part of the contract with downstream readers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "ExecutionRecord", into = "ExecutionRecord")]
pub struct ExecutionContext {
    start_time: OffsetDateTime,
    retry_attempt: u32,
    region: String,
    instance_request: InstanceRequest,
    run_options: RunOptions,
    job: JobSpec,
    storage: Option<StorageTarget>,
    forcing_source: Option<String>,
    resolved_date: Option<String>,
    instance_identity: Option<InstanceIdentity>,
    verified_role: Option<String>,
    dispatch_handle: Option<String>,
    revision: u32,
}

/// On-disk shape of `execution.json`. The instance id sits in
/// `instance_parameters.InstanceId` and the volume id at the top level.
#[derive(Serialize, Deserialize)]
struct ExecutionRecord {
    #[serde(rename = "t0", with = "time::serde::timestamp")]
    start_time: OffsetDateTime,
    retry_attempt: u32,
    region: String,
    instance_parameters: InstanceRequest,
    run_options: RunOptions,
    #[serde(flatten)]
    job: JobSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    storage: Option<StorageTarget>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    forcing_source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    resolved_date: Option<String>,
    #[serde(default)]
    volume_id: Option<String>,
    #[serde(default)]
    verified_role: Option<String>,
    #[serde(rename = "command_id", default)]
    dispatch_handle: Option<String>,
    #[serde(default)]
    revision: u32,
}

impl From<ExecutionContext> for ExecutionRecord {
    fn from(ctx: ExecutionContext) -> Self {
        let mut instance_parameters = ctx.instance_request;
        let volume_id = ctx.instance_identity.and_then(|identity| {
            instance_parameters.extra.insert(
                INSTANCE_ID_KEY.to_string(),
                Value::String(identity.instance_id),
            );
            identity.volume_id
        });
        Self {
            start_time: ctx.start_time,
            retry_attempt: ctx.retry_attempt,
            region: ctx.region,
            instance_parameters,
            run_options: ctx.run_options,
            job: ctx.job,
            storage: ctx.storage,
            forcing_source: ctx.forcing_source,
            resolved_date: ctx.resolved_date,
            volume_id,
            verified_role: ctx.verified_role,
            dispatch_handle: ctx.dispatch_handle,
            revision: ctx.revision,
        }
    }
}

impl From<ExecutionRecord> for ExecutionContext {
    fn from(record: ExecutionRecord) -> Self {
        let mut instance_request = record.instance_parameters;
        // Blank ids are how a fresh job template spells "not allocated yet".
        let instance_identity = match instance_request.extra.remove(INSTANCE_ID_KEY) {
            Some(Value::String(instance_id)) if !instance_id.is_empty() => {
                Some(InstanceIdentity {
                    instance_id,
                    volume_id: record.volume_id,
                })
            }
            _ => None,
        };
        Self {
            start_time: record.start_time,
            retry_attempt: record.retry_attempt,
            region: record.region,
            instance_request,
            run_options: record.run_options,
            job: record.job,
            storage: record.storage,
            forcing_source: record.forcing_source,
            resolved_date: record.resolved_date,
            instance_identity,
            verified_role: record.verified_role,
            dispatch_handle: record.dispatch_handle,
            revision: record.revision,
        }
    }
}

impl ExecutionContext {
    pub fn start_time(&self) -> OffsetDateTime {
        self.start_time
    }

    pub fn retry_attempt(&self) -> u32 {
        self.retry_attempt
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn instance_request(&self) -> &InstanceRequest {
        &self.instance_request
    }

    pub fn run_options(&self) -> &RunOptions {
        &self.run_options
    }

    pub fn job(&self) -> &JobSpec {
        &self.job
    }

    pub fn commands(&self) -> Option<&[String]> {
        self.job.commands()
    }

    pub fn storage(&self) -> Option<&StorageTarget> {
        self.storage.as_ref()
    }

    pub fn forcing_source(&self) -> Option<&str> {
        self.forcing_source.as_deref()
    }

    pub fn resolved_date(&self) -> Option<&str> {
        self.resolved_date.as_deref()
    }

    pub fn instance_identity(&self) -> Option<&InstanceIdentity> {
        self.instance_identity.as_ref()
    }

    pub fn instance_id(&self) -> Option<&str> {
        self.instance_identity
            .as_ref()
            .map(|identity| identity.instance_id.as_str())
    }

    pub fn verified_role(&self) -> Option<&str> {
        self.verified_role.as_deref()
    }

    pub fn dispatch_handle(&self) -> Option<&str> {
        self.dispatch_handle.as_deref()
    }

    pub fn revision(&self) -> u32 {
        self.revision
    }

    pub(crate) fn force_single_instance(&mut self) {
        self.instance_request.min_count = 1;
        self.instance_request.max_count = 1;
    }

    pub(crate) fn record_instance(&mut self, identity: InstanceIdentity) -> LaunchResult<()> {
        if let Some(existing) = &self.instance_identity {
            return Err(LaunchError::Internal(format!(
                "instance identity already recorded as {}",
                existing.instance_id
            )));
        }
        self.instance_identity = Some(identity);
        self.revision += 1;
        Ok(())
    }

    pub(crate) fn record_verified_role(&mut self, role: String) {
        self.verified_role = Some(role);
        self.revision += 1;
    }

    pub(crate) fn record_commands(
        &mut self,
        commands: Vec<String>,
        storage: Option<StorageTarget>,
        forcing_source: Option<String>,
        resolved_date: Option<String>,
    ) {
        self.job = JobSpec::Commands(commands);
        self.storage = storage;
        self.forcing_source = forcing_source;
        self.resolved_date = resolved_date;
        self.revision += 1;
    }

    pub(crate) fn record_dispatch_handle(&mut self, handle: String) -> LaunchResult<()> {
        if let Some(existing) = &self.dispatch_handle {
            return Err(LaunchError::Internal(format!(
                "dispatch handle already recorded as {existing}"
            )));
        }
        self.dispatch_handle = Some(handle);
        self.revision += 1;
        Ok(())
    }
}
