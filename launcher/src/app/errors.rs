// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::fmt;

use thiserror::Error as ThisError;

pub mod codes {
    pub const INVALID_ARGUMENT: &str = "invalid_argument";
    pub const NOT_FOUND: &str = "not_found";
    pub const CONFLICT: &str = "conflict";
    pub const INTERNAL_ERROR: &str = "internal_error";
    pub const CANCELED: &str = "canceled";
    pub const REMOTE_ERROR: &str = "remote_error";
    pub const LOCAL_ERROR: &str = "local_error";
    pub const PROVIDER_ERROR: &str = "provider_error";
    pub const PROVIDER_REJECTED: &str = "provider_rejected";
    pub const PROVISIONING_TIMEOUT: &str = "provisioning_timeout";
    pub const IDENTITY_MISMATCH: &str = "identity_mismatch";
    pub const VERIFICATION_TIMEOUT: &str = "verification_timeout";
    pub const PERSISTENCE_FAILED: &str = "persistence_failed";
    pub const DISPATCH_REJECTED: &str = "dispatch_rejected";
    pub const DISPATCH_UNCONFIRMED: &str = "dispatch_unconfirmed";
    pub const INVALID_JOB: &str = "invalid_job";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppErrorKind {
    InvalidArgument,
    NotFound,
    Conflict,
    /// Permanent refusal by a provider. Every other kind is treated as transient.
    Rejected,
    Internal,
    Unavailable,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct AppError {
    kind: AppErrorKind,
    code: &'static str,
    message: String,
    context: Option<String>,
}

impl AppError {
    pub fn new(kind: AppErrorKind, code: &'static str) -> Self {
        Self {
            kind,
            code,
            message: code.to_string(),
            context: None,
        }
    }

    pub fn with_message(
        kind: AppErrorKind,
        code: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            code,
            message: message.into(),
            context: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn kind(&self) -> AppErrorKind {
        self.kind
    }

    pub fn code(&self) -> &'static str {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    pub fn is_permanent(&self) -> bool {
        self.kind == AppErrorKind::Rejected
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ctx) = &self.context {
            write!(f, "{} ({})", self.message, ctx)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl std::error::Error for AppError {}

pub type AppResult<T> = Result<T, AppError>;

/// Named exits of the launch pipeline.
#[derive(Debug, Clone, ThisError)]
pub enum LaunchError {
    #[error("instance {instance_id} did not reach the running state after {attempts} checks")]
    ProvisioningTimeout { instance_id: String, attempts: u32 },

    #[error("instance role mismatch: expected '{expected}', found '{actual}'")]
    IdentityMismatch { expected: String, actual: String },

    #[error("instance {instance_id} was not confirmed running after {attempts} checks")]
    VerificationTimeout { instance_id: String, attempts: u32 },

    #[error("failed to write execution metadata to {bucket}/{key}: {source}")]
    PersistenceFailed {
        bucket: String,
        key: String,
        #[source]
        source: AppError,
    },

    #[error("commands for instance {instance_id} were rejected: {reason}")]
    DispatchRejected { instance_id: String, reason: String },

    #[error("no status reported for command {handle} after {attempts} checks")]
    DispatchUnconfirmed { handle: String, attempts: u32 },

    #[error("launch cancelled during {stage}")]
    Cancelled { stage: &'static str },

    #[error("invalid job: {0}")]
    InvalidJob(String),

    #[error("provider call failed: {0}")]
    Provider(#[source] AppError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl LaunchError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::ProvisioningTimeout { .. } => codes::PROVISIONING_TIMEOUT,
            Self::IdentityMismatch { .. } => codes::IDENTITY_MISMATCH,
            Self::VerificationTimeout { .. } => codes::VERIFICATION_TIMEOUT,
            Self::PersistenceFailed { .. } => codes::PERSISTENCE_FAILED,
            Self::DispatchRejected { .. } => codes::DISPATCH_REJECTED,
            Self::DispatchUnconfirmed { .. } => codes::DISPATCH_UNCONFIRMED,
            Self::Cancelled { .. } => codes::CANCELED,
            Self::InvalidJob(_) => codes::INVALID_JOB,
            Self::Provider(_) => codes::PROVIDER_ERROR,
            Self::Internal(_) => codes::INTERNAL_ERROR,
        }
    }

    /// Whether resubmitting the whole job (with a fresh instance) may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ProvisioningTimeout { .. }
                | Self::VerificationTimeout { .. }
                | Self::Provider(_)
        )
    }

    /// Conditions that must abort the pipeline and never be retried automatically.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::IdentityMismatch { .. } | Self::DispatchRejected { .. } | Self::InvalidJob(_)
        )
    }

    /// Conditions reported alongside a successful launch.
    pub fn is_warning(&self) -> bool {
        matches!(
            self,
            Self::PersistenceFailed { .. } | Self::DispatchUnconfirmed { .. }
        )
    }
}

pub type LaunchResult<T> = Result<T, LaunchError>;
