// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use async_trait::async_trait;

use crate::app::errors::AppResult;
use crate::app::types::{InstanceDescription, InstanceRequest};

#[async_trait]
/// Compute provider boundary: allocate, start and describe single instances.
/// Errors are transient unless their kind is `Rejected`.
pub trait ComputePort: Send + Sync {
    async fn allocate(&self, request: &InstanceRequest) -> AppResult<String>;
    async fn start(&self, instance_id: &str) -> AppResult<()>;
    async fn describe(&self, instance_id: &str) -> AppResult<InstanceDescription>;
}
