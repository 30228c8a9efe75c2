// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;

use crate::app::errors::{AppError, AppErrorKind, AppResult, codes};
use crate::app::ports::ObjectStorePort;
use crate::app::services::random;

const STAGING_SUFFIX_LEN: usize = 8;

/// Object store backed by a directory: `<root>/<bucket>/<key>`.
#[derive(Clone, Debug)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, bucket: &str, key: &str) -> AppResult<PathBuf> {
        let invalid = |message: String| {
            AppError::with_message(AppErrorKind::Rejected, codes::INVALID_ARGUMENT, message)
        };
        if bucket.is_empty() || bucket.contains('/') || bucket == "." || bucket == ".." {
            return Err(invalid(format!("invalid bucket name '{bucket}'")));
        }
        let key_path = Path::new(key);
        if key.is_empty()
            || !key_path
                .components()
                .all(|component| matches!(component, Component::Normal(_)))
        {
            return Err(invalid(format!("invalid object key '{key}'")));
        }
        Ok(self.root.join(bucket).join(key_path))
    }
}

/// Hidden sibling of `path`, unique per write.
fn staging_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(
        ".{name}.{}.partial",
        random::lowercase_suffix(STAGING_SUFFIX_LEN)
    ))
}

fn local_error(action: &str, path: &Path, err: std::io::Error) -> AppError {
    AppError::with_message(
        AppErrorKind::Unavailable,
        codes::LOCAL_ERROR,
        format!("failed to {action} {}: {err}", path.display()),
    )
}

#[async_trait]
impl ObjectStorePort for FsObjectStore {
    #[tracing::instrument(name = "fs", level = "debug", skip(self, body), fields(op = "put", bytes = body.len()))]
    async fn put(&self, bucket: &str, key: &str, body: Vec<u8>) -> AppResult<()> {
        let path = self.object_path(bucket, key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| local_error("create", parent, err))?;
        }
        // Readers never see a half-written object.
        let staging = staging_path(&path);
        let staged = match tokio::fs::write(&staging, &body).await {
            Ok(()) => tokio::fs::rename(&staging, &path)
                .await
                .map_err(|err| local_error("move into place", &path, err)),
            Err(err) => Err(local_error("write", &staging, err)),
        };
        if staged.is_err() {
            if let Err(err) = tokio::fs::remove_file(&staging).await {
                tracing::debug!(path = %staging.display(), error = %err, "staging file not removed");
            }
        }
        staged
    }
}
