// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::io::{Read, Write};
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::watch;

use launcher::adapters;
use launcher::app::errors::LaunchError;
use launcher::app::ports::ClockPort;
use launcher::app::services::metadata;
use launcher::app::types::{InvocationStatus, JobSubmission};
use launcher::app::usecases::{LaunchOutcome, Launcher};
use launcher::{config, logging};

const WAIT_POLL_INTERVAL: Duration = Duration::from_secs(2);

fn log_config_report(report: &config::ConfigReport) {
    match (&report.config_path, report.config_path_source) {
        (Some(path), Some(source)) => tracing::info!(
            path = %path.display(),
            source = source.as_str(),
            present = report.config_file_present,
            "config path"
        ),
        (Some(path), None) => tracing::info!(
            path = %path.display(),
            present = report.config_file_present,
            "config path"
        ),
        (None, _) => tracing::info!("config path: (none)"),
    }
    for (key, value) in report.entries() {
        tracing::info!("config {key}: {value}");
    }
}

fn read_submission(path: &Path) -> anyhow::Result<JobSubmission> {
    let raw = if path == Path::new("-") {
        let mut raw = String::new();
        std::io::stdin()
            .read_to_string(&mut raw)
            .context("failed to read job submission from stdin")?;
        raw
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("failed to read job submission {}", path.display()))?
    };
    serde_json::from_str(&raw).context("job submission is not valid JSON for this launcher")
}

fn exit_code(err: &LaunchError) -> u8 {
    match err {
        LaunchError::Cancelled { .. } => 130,
        LaunchError::InvalidJob(_) => 2,
        err if err.is_fatal() => 3,
        err if err.is_retryable() => 4,
        _ => 1,
    }
}

fn write_outcome(outcome: &LaunchOutcome, output: Option<&Path>) -> anyhow::Result<()> {
    let mut body = metadata::render(&outcome.context).context("failed to encode context")?;
    body.push(b'\n');
    match output {
        Some(path) => std::fs::write(path, &body)
            .with_context(|| format!("failed to write {}", path.display())),
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&body)?;
            stdout.flush()?;
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let parsed = adapters::cli::parse_opts();
    let opts = parsed.opts;
    let config::LoadResult { config, report } = config::load_with_report(
        opts.config.clone(),
        config::Overrides {
            region: opts.region.clone(),
            object_store_root: opts.object_store_root.clone(),
            verbose: parsed.verbose_override,
        },
    )?;
    logging::init(config.verbose);
    log_config_report(&report);

    let submission = match read_submission(&opts.exec) {
        Ok(submission) => submission,
        Err(err) => {
            tracing::error!(error = %format!("{err:#}"), "invalid job submission");
            return Ok(ExitCode::from(2));
        }
    };

    let clock: Arc<dyn ClockPort> = match opts.now {
        Some(now) => {
            tracing::info!(now = %now, "clock pinned");
            Arc::new(adapters::time::FixedClock::new(now))
        }
        None => Arc::new(adapters::time::SystemClock::new()),
    };
    let launcher = Launcher::new(
        Arc::new(adapters::local::LocalCompute::with_attached_role(
            config.local_attached_role.clone(),
        )),
        Arc::new(adapters::local::LocalShell::new()),
        Arc::new(adapters::fs::FsObjectStore::new(&config.object_store_root)),
        clock,
        Arc::new(adapters::telemetry::TracingTelemetry::new()),
        config.policy(),
    );

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received; cancelling launch");
            let _ = cancel_tx.send(true);
        }
    });

    let outcome = match launcher
        .submit(submission, &config.region, cancel_rx.clone())
        .await
    {
        Ok(outcome) => outcome,
        Err(err) => {
            tracing::error!(code = err.code(), error = %err, "launch failed");
            return Ok(ExitCode::from(exit_code(&err)));
        }
    };
    for warning in &outcome.warnings {
        tracing::warn!(code = warning.code(), warning = %warning, "launch completed with warning");
    }
    write_outcome(&outcome, opts.output.as_deref())?;

    if !opts.wait {
        return Ok(ExitCode::SUCCESS);
    }
    let mut cancel = cancel_rx;
    match launcher
        .wait_for_completion(&outcome.context, WAIT_POLL_INTERVAL, &mut cancel)
        .await
    {
        Ok(InvocationStatus::Success) => Ok(ExitCode::SUCCESS),
        Ok(status) => {
            tracing::error!(status = status.as_str(), "dispatched commands did not succeed");
            Ok(ExitCode::from(1))
        }
        Err(err) => Ok(ExitCode::from(exit_code(&err))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use launcher::app::errors::{AppError, AppErrorKind, codes};

    #[test]
    fn exit_codes_follow_error_class() {
        assert_eq!(exit_code(&LaunchError::Cancelled { stage: "verify" }), 130);
        assert_eq!(exit_code(&LaunchError::InvalidJob("x".into())), 2);
        assert_eq!(
            exit_code(&LaunchError::IdentityMismatch {
                expected: "a".into(),
                actual: "b".into()
            }),
            3
        );
        assert_eq!(
            exit_code(&LaunchError::Provider(AppError::new(
                AppErrorKind::Unavailable,
                codes::PROVIDER_ERROR
            ))),
            4
        );
        assert_eq!(exit_code(&LaunchError::Internal("x".into())), 1);
    }

    #[test]
    fn submission_file_is_parsed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("job.json");
        std::fs::write(
            &path,
            r#"{
                "instance_parameters": {
                    "ImageId": "ami-1",
                    "InstanceType": "t4g.large",
                    "IamInstanceProfile": { "Name": "role" }
                },
                "commands": ["echo hi"]
            }"#,
        )
        .expect("write");
        let submission = read_submission(&path).expect("parse");
        assert_eq!(submission.commands, Some(vec!["echo hi".to_string()]));
        assert!(read_submission(&dir.path().join("missing.json")).is_err());
    }
}
