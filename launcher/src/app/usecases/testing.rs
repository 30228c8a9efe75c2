// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use time::OffsetDateTime;

use super::{Launcher, PipelinePolicy};
use crate::adapters::time::FixedClock;
use crate::app::errors::{AppError, AppErrorKind, AppResult, codes};
use crate::app::ports::{ComputePort, NoopTelemetry, ObjectStorePort, RemoteExecPort};
use crate::app::types::{
    IamInstanceProfile, InstanceDescription, InstanceRequest, InstanceStatus, InvocationStatus,
    JobOptions, JobSubmission, RunOptions,
};

pub fn described(status: InstanceStatus, role: Option<&str>) -> InstanceDescription {
    InstanceDescription {
        status,
        attached_role: role.map(str::to_string),
        volume_id: None,
    }
}

pub fn described_with_volume(
    status: InstanceStatus,
    role: Option<&str>,
    volume_id: &str,
) -> InstanceDescription {
    InstanceDescription {
        volume_id: Some(volume_id.to_string()),
        ..described(status, role)
    }
}

fn unavailable() -> AppError {
    AppError::new(AppErrorKind::Unavailable, codes::PROVIDER_ERROR)
}

pub struct ScriptedCompute {
    instance_id: String,
    allocation_error: Option<AppError>,
    allocations: Mutex<Vec<InstanceRequest>>,
    start_failures: Mutex<VecDeque<AppError>>,
    start_calls: AtomicU32,
    describes: Mutex<VecDeque<AppResult<InstanceDescription>>>,
    fallback: Option<InstanceDescription>,
    describe_calls: AtomicU32,
}

impl ScriptedCompute {
    pub fn new(instance_id: &str) -> Self {
        Self {
            instance_id: instance_id.to_string(),
            allocation_error: None,
            allocations: Mutex::new(Vec::new()),
            start_failures: Mutex::new(VecDeque::new()),
            start_calls: AtomicU32::new(0),
            describes: Mutex::new(VecDeque::new()),
            fallback: None,
            describe_calls: AtomicU32::new(0),
        }
    }

    /// Answers handed out in order before falling back.
    pub fn with_describes(self, describes: Vec<AppResult<InstanceDescription>>) -> Self {
        *self.describes.lock().expect("describes lock") = describes.into();
        self
    }

    pub fn with_fallback(mut self, description: InstanceDescription) -> Self {
        self.fallback = Some(description);
        self
    }

    pub fn with_start_failures(self, failures: Vec<AppError>) -> Self {
        *self.start_failures.lock().expect("start lock") = failures.into();
        self
    }

    pub fn failing_allocation(mut self, err: AppError) -> Self {
        self.allocation_error = Some(err);
        self
    }

    pub fn allocations(&self) -> Vec<InstanceRequest> {
        self.allocations.lock().expect("allocations lock").clone()
    }

    pub fn describe_calls(&self) -> u32 {
        self.describe_calls.load(Ordering::SeqCst)
    }

    pub fn start_calls(&self) -> u32 {
        self.start_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ComputePort for ScriptedCompute {
    async fn allocate(&self, request: &InstanceRequest) -> AppResult<String> {
        self.allocations
            .lock()
            .expect("allocations lock")
            .push(request.clone());
        match &self.allocation_error {
            Some(err) => Err(err.clone()),
            None => Ok(self.instance_id.clone()),
        }
    }

    async fn start(&self, _instance_id: &str) -> AppResult<()> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        match self.start_failures.lock().expect("start lock").pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn describe(&self, _instance_id: &str) -> AppResult<InstanceDescription> {
        self.describe_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(next) = self.describes.lock().expect("describes lock").pop_front() {
            return next;
        }
        self.fallback.clone().ok_or_else(unavailable)
    }
}

type SentCommands = (String, Vec<String>, Duration);

pub struct RecordingRemoteExec {
    handle: String,
    acknowledges: bool,
    send_failures: Mutex<VecDeque<AppError>>,
    sends: Mutex<Vec<SentCommands>>,
    send_calls: AtomicU32,
    statuses: Mutex<VecDeque<AppResult<InvocationStatus>>>,
    status_calls: AtomicU32,
}

impl RecordingRemoteExec {
    fn build(handle: &str, acknowledges: bool) -> Self {
        Self {
            handle: handle.to_string(),
            acknowledges,
            send_failures: Mutex::new(VecDeque::new()),
            sends: Mutex::new(Vec::new()),
            send_calls: AtomicU32::new(0),
            statuses: Mutex::new(VecDeque::new()),
            status_calls: AtomicU32::new(0),
        }
    }

    /// Reports `Pending` for any status query once the queue is empty.
    pub fn acknowledging(handle: &str) -> Self {
        Self::build(handle, true)
    }

    /// Never finds the invocation.
    pub fn silent(handle: &str) -> Self {
        Self::build(handle, false)
    }

    pub fn with_statuses(self, statuses: Vec<AppResult<InvocationStatus>>) -> Self {
        *self.statuses.lock().expect("statuses lock") = statuses.into();
        self
    }

    pub fn with_send_failures(self, failures: Vec<AppError>) -> Self {
        *self.send_failures.lock().expect("send lock") = failures.into();
        self
    }

    pub fn sends(&self) -> Vec<SentCommands> {
        self.sends.lock().expect("sends lock").clone()
    }

    pub fn send_calls(&self) -> u32 {
        self.send_calls.load(Ordering::SeqCst)
    }

    pub fn status_calls(&self) -> u32 {
        self.status_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteExecPort for RecordingRemoteExec {
    async fn send(
        &self,
        instance_id: &str,
        commands: &[String],
        execution_timeout: Duration,
    ) -> AppResult<String> {
        self.send_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.send_failures.lock().expect("send lock").pop_front() {
            return Err(err);
        }
        self.sends.lock().expect("sends lock").push((
            instance_id.to_string(),
            commands.to_vec(),
            execution_timeout,
        ));
        Ok(self.handle.clone())
    }

    async fn get_status(&self, _handle: &str, _instance_id: &str) -> AppResult<InvocationStatus> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(next) = self.statuses.lock().expect("statuses lock").pop_front() {
            return next;
        }
        if self.acknowledges {
            Ok(InvocationStatus::Pending)
        } else {
            Err(AppError::new(AppErrorKind::NotFound, codes::NOT_FOUND))
        }
    }
}

type StoredObject = (String, String, Vec<u8>);

#[derive(Default)]
pub struct MemoryObjectStore {
    fail: bool,
    puts: Mutex<Vec<StoredObject>>,
}

impl MemoryObjectStore {
    pub fn failing() -> Self {
        Self {
            fail: true,
            puts: Mutex::new(Vec::new()),
        }
    }

    pub fn puts(&self) -> Vec<StoredObject> {
        self.puts.lock().expect("puts lock").clone()
    }
}

#[async_trait]
impl ObjectStorePort for MemoryObjectStore {
    async fn put(&self, bucket: &str, key: &str, body: Vec<u8>) -> AppResult<()> {
        if self.fail {
            return Err(AppError::with_message(
                AppErrorKind::Unavailable,
                codes::REMOTE_ERROR,
                "access denied",
            ));
        }
        self.puts
            .lock()
            .expect("puts lock")
            .push((bucket.to_string(), key.to_string(), body));
        Ok(())
    }
}

pub fn build_launcher(
    compute: Arc<dyn ComputePort>,
    remote_exec: Arc<dyn RemoteExecPort>,
    objects: Arc<dyn ObjectStorePort>,
    now: OffsetDateTime,
) -> Launcher {
    Launcher::new(
        compute,
        remote_exec,
        objects,
        Arc::new(FixedClock::new(now)),
        Arc::new(NoopTelemetry),
        PipelinePolicy::default(),
    )
}

fn instance_request() -> InstanceRequest {
    InstanceRequest {
        instance_type: "t4g.large".into(),
        image_id: "ami-0123".into(),
        iam_instance_profile: IamInstanceProfile {
            name: "datastream-role".into(),
        },
        min_count: 1,
        max_count: 1,
        extra: Default::default(),
    }
}

pub fn options_submission(prefix: &str) -> JobSubmission {
    JobSubmission {
        instance_parameters: instance_request(),
        run_options: RunOptions::default(),
        datastream_command_options: Some(JobOptions {
            start_time: "2024-06-01 00:00:00".into(),
            end_time: "2024-06-02 00:00:00".into(),
            nprocs: 4,
            forcing_source: "SHORT_RANGE_06".into(),
            realization: "realization.json".into(),
            hydrofabric_version: "v2.1.1".into(),
            subset_id: "Gages-09106150".into(),
            subset_id_type: "hl".into(),
            s3_bucket: Some("b".into()),
            s3_prefix: Some(prefix.into()),
        }),
        commands: None,
        storage: None,
        forcing_source: None,
        retry_attempt: 0,
    }
}

pub fn commands_submission() -> JobSubmission {
    JobSubmission {
        instance_parameters: instance_request(),
        run_options: RunOptions::default(),
        datastream_command_options: None,
        commands: Some(vec!["echo hello".into()]),
        storage: None,
        forcing_source: None,
        retry_attempt: 0,
    }
}
