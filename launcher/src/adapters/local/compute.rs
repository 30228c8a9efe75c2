// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::app::errors::{AppError, AppErrorKind, AppResult, codes};
use crate::app::ports::ComputePort;
use crate::app::services::random::lowercase_suffix;
use crate::app::types::{InstanceDescription, InstanceRequest, InstanceStatus};

const SUFFIX_LEN: usize = 10;

#[derive(Debug, Clone)]
struct LocalInstance {
    status: InstanceStatus,
    role: String,
    volume_id: String,
}

/// Book-keeping only: instances are names, the host itself does the work.
#[derive(Debug, Default)]
pub struct LocalCompute {
    attached_role: Option<String>,
    instances: Mutex<HashMap<String, LocalInstance>>,
}

impl LocalCompute {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports `role` as attached to every instance, whatever was requested.
    pub fn with_attached_role(role: Option<String>) -> Self {
        Self {
            attached_role: role,
            instances: Mutex::new(HashMap::new()),
        }
    }

    fn instances(&self) -> AppResult<std::sync::MutexGuard<'_, HashMap<String, LocalInstance>>> {
        self.instances.lock().map_err(|_| {
            AppError::with_message(
                AppErrorKind::Internal,
                codes::INTERNAL_ERROR,
                "local instance table poisoned",
            )
        })
    }
}

fn unknown_instance(instance_id: &str) -> AppError {
    AppError::with_message(
        AppErrorKind::NotFound,
        codes::NOT_FOUND,
        format!("unknown instance {instance_id}"),
    )
}

#[async_trait]
impl ComputePort for LocalCompute {
    #[tracing::instrument(name = "local_compute", level = "debug", skip_all, fields(op = "allocate"))]
    async fn allocate(&self, request: &InstanceRequest) -> AppResult<String> {
        if request.max_count != 1 {
            return Err(AppError::with_message(
                AppErrorKind::Rejected,
                codes::PROVIDER_REJECTED,
                format!("local compute allocates one instance, not {}", request.max_count),
            ));
        }
        let suffix = lowercase_suffix(SUFFIX_LEN);
        let instance_id = format!("local-{suffix}");
        let role = self
            .attached_role
            .clone()
            .unwrap_or_else(|| request.role_name().to_string());
        self.instances()?.insert(
            instance_id.clone(),
            LocalInstance {
                status: InstanceStatus::Pending,
                role,
                volume_id: format!("vol-{suffix}"),
            },
        );
        Ok(instance_id)
    }

    #[tracing::instrument(name = "local_compute", level = "debug", skip(self), fields(op = "start"))]
    async fn start(&self, instance_id: &str) -> AppResult<()> {
        let mut instances = self.instances()?;
        let instance = instances
            .get_mut(instance_id)
            .ok_or_else(|| unknown_instance(instance_id))?;
        instance.status = InstanceStatus::Running;
        Ok(())
    }

    #[tracing::instrument(name = "local_compute", level = "debug", skip(self), fields(op = "describe"))]
    async fn describe(&self, instance_id: &str) -> AppResult<InstanceDescription> {
        let instances = self.instances()?;
        let instance = instances
            .get(instance_id)
            .ok_or_else(|| unknown_instance(instance_id))?;
        Ok(InstanceDescription {
            status: instance.status.clone(),
            attached_role: Some(instance.role.clone()),
            volume_id: Some(instance.volume_id.clone()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::types::IamInstanceProfile;

    fn request(role: &str) -> InstanceRequest {
        InstanceRequest {
            instance_type: "local".into(),
            image_id: "none".into(),
            iam_instance_profile: IamInstanceProfile { name: role.into() },
            min_count: 1,
            max_count: 1,
            extra: Default::default(),
        }
    }

    #[tokio::test]
    async fn instance_is_pending_until_started() {
        let compute = LocalCompute::new();
        let id = compute.allocate(&request("roleA")).await.expect("allocate");
        assert!(id.starts_with("local-"));
        assert_eq!(id.len(), "local-".len() + SUFFIX_LEN);

        let before = compute.describe(&id).await.expect("describe");
        assert_eq!(before.status, InstanceStatus::Pending);

        compute.start(&id).await.expect("start");
        let after = compute.describe(&id).await.expect("describe");
        assert_eq!(after.status, InstanceStatus::Running);
        assert_eq!(after.attached_role.as_deref(), Some("roleA"));
        let volume = after.volume_id.expect("volume");
        assert_eq!(&volume["vol-".len()..], &id["local-".len()..]);
    }

    #[tokio::test]
    async fn attached_role_override_is_reported() {
        let compute = LocalCompute::with_attached_role(Some("other".into()));
        let id = compute.allocate(&request("roleA")).await.expect("allocate");
        let description = compute.describe(&id).await.expect("describe");
        assert_eq!(description.attached_role.as_deref(), Some("other"));
    }

    #[tokio::test]
    async fn unknown_instance_is_not_found() {
        let compute = LocalCompute::new();
        let err = compute.start("local-missing").await.expect_err("must fail");
        assert_eq!(err.kind(), AppErrorKind::NotFound);
        assert!(!err.is_permanent());
    }
}
