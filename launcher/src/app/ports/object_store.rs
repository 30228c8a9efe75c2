// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use async_trait::async_trait;

use crate::app::errors::AppResult;

#[async_trait]
pub trait ObjectStorePort: Send + Sync {
    async fn put(&self, bucket: &str, key: &str, body: Vec<u8>) -> AppResult<()>;
}
