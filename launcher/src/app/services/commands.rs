// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use time::OffsetDateTime;

use crate::app::services::forecast;
use crate::app::types::{JobOptions, JobSpec, StorageTarget};

const DATASTREAM_USER: &str = "ec2-user";
const DATASTREAM_HOME: &str = "/home/ec2-user/datastream";

/// Commands ready to dispatch, with the storage target they write to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltCommands {
    pub commands: Vec<String>,
    pub storage: Option<StorageTarget>,
    pub forcing_source: Option<String>,
    /// `YYYYMMDD`, set when a placeholder was resolved.
    pub resolved_date: Option<String>,
    /// The storage prefix itself carried the placeholder.
    pub daily_prefix: bool,
}

/// Datastream invocation for a set of job options.
pub fn synthesize(options: &JobOptions) -> String {
    let mut command = format!(
        "runuser -l {DATASTREAM_USER} -c 'cd {DATASTREAM_HOME} && ./scripts/datastream \
         -s {start} -e {end} -C {forcing} -I {subset_id} -i {subset_type} -v {hf_version} \
         -d $(pwd)/data/datastream -R {realization} -n {nprocs}",
        start = options.start_time,
        end = options.end_time,
        forcing = options.forcing_source,
        subset_id = options.subset_id,
        subset_type = options.subset_id_type,
        hf_version = options.hydrofabric_version,
        realization = options.realization,
        nprocs = options.nprocs,
    );
    if let (Some(bucket), Some(prefix)) = (&options.s3_bucket, &options.s3_prefix) {
        command.push_str(&format!(" -S {bucket} -o {prefix}"));
    }
    command.push('\'');
    command
}

fn options_storage(options: &JobOptions) -> Result<Option<StorageTarget>, String> {
    match (&options.s3_bucket, &options.s3_prefix) {
        (Some(bucket), Some(prefix)) => Ok(Some(StorageTarget {
            bucket: bucket.clone(),
            prefix: prefix.clone(),
        })),
        (None, None) => Ok(None),
        (Some(_), None) => Err("s3_bucket is set without s3_prefix".to_string()),
        (None, Some(_)) => Err("s3_prefix is set without s3_bucket".to_string()),
    }
}

/// Turns a job into dispatchable commands and resolves the `DAILY`
/// placeholder against `now`.
///
/// Options produce exactly one command and take precedence over a storage
/// target or forcing source supplied next to them. Literal commands are used
/// as given.
pub fn build(
    job: &JobSpec,
    storage: Option<&StorageTarget>,
    forcing_source: Option<&str>,
    now: OffsetDateTime,
) -> Result<BuiltCommands, String> {
    let (mut commands, mut storage, forcing_source) = match job {
        JobSpec::Options(options) => {
            let storage = match options_storage(options)? {
                Some(target) => Some(target),
                None => storage.cloned(),
            };
            (
                vec![synthesize(options)],
                storage,
                Some(options.forcing_source.clone()),
            )
        }
        JobSpec::Commands(commands) => (
            commands.clone(),
            storage.cloned(),
            forcing_source.map(str::to_string),
        ),
    };

    if commands.is_empty() || commands.iter().all(|command| command.trim().is_empty()) {
        return Err("no commands to dispatch".to_string());
    }
    if let Some(target) = &storage {
        if target.bucket.trim().is_empty() || target.prefix.trim().is_empty() {
            return Err("storage bucket and prefix must not be empty".to_string());
        }
    }

    let daily_prefix = storage
        .as_ref()
        .is_some_and(|target| forecast::contains_placeholder(&target.prefix));
    let needs_date =
        daily_prefix || commands.iter().any(|command| forecast::contains_placeholder(command));

    let mut resolved_date = None;
    if needs_date {
        let cycle = forecast::cycle_hour(forcing_source.as_deref())?;
        let date = forecast::format_date(forecast::resolve_date(now, cycle));
        for command in commands.iter_mut() {
            *command = forecast::substitute(command, &date);
        }
        if let Some(target) = storage.as_mut() {
            target.prefix = forecast::substitute(&target.prefix, &date);
        }
        resolved_date = Some(date);
    }

    Ok(BuiltCommands {
        commands,
        storage,
        forcing_source,
        resolved_date,
        daily_prefix,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn options(prefix: Option<&str>) -> JobOptions {
        JobOptions {
            start_time: "2024-06-01 00:00:00".into(),
            end_time: "2024-06-02 00:00:00".into(),
            nprocs: 4,
            forcing_source: "SHORT_RANGE_06".into(),
            realization: "realization.json".into(),
            hydrofabric_version: "v2.1.1".into(),
            subset_id: "Gages-09106150".into(),
            subset_id_type: "hl".into(),
            s3_bucket: prefix.map(|_| "b".to_string()),
            s3_prefix: prefix.map(str::to_string),
        }
    }

    #[test]
    fn synthesized_command_follows_datastream_template() {
        let command = synthesize(&options(Some("path/x")));
        assert_eq!(
            command,
            "runuser -l ec2-user -c 'cd /home/ec2-user/datastream && ./scripts/datastream \
             -s 2024-06-01 00:00:00 -e 2024-06-02 00:00:00 -C SHORT_RANGE_06 -I Gages-09106150 \
             -i hl -v v2.1.1 -d $(pwd)/data/datastream -R realization.json -n 4 -S b -o path/x'"
        );
    }

    #[test]
    fn synthesized_command_omits_storage_flags_without_bucket() {
        let command = synthesize(&options(None));
        assert!(!command.contains(" -S "));
        assert!(!command.contains(" -o "));
        assert!(command.ends_with("-n 4'"));
    }

    #[test]
    fn daily_prefix_before_cycle_resolves_to_previous_day() {
        let job = JobSpec::Options(options(Some("path/DAILY/x")));
        let built = build(&job, None, None, datetime!(2024-06-01 03:00 UTC)).expect("build");
        let storage = built.storage.expect("storage");
        assert_eq!(storage.prefix, "path/20240531/x");
        assert_eq!(storage.bucket, "b");
        assert_eq!(built.resolved_date.as_deref(), Some("20240531"));
        assert!(built.daily_prefix);
        assert_eq!(built.commands.len(), 1);
        assert!(built.commands[0].contains("-o path/20240531/x'"));
        assert!(!built.commands[0].contains("DAILY"));
    }

    #[test]
    fn daily_start_argument_resolves_with_the_prefix() {
        let mut opts = options(Some("path/DAILY/x"));
        opts.start_time = "DAILY".into();
        let built = build(
            &JobSpec::Options(opts),
            None,
            None,
            datetime!(2024-06-01 03:00 UTC),
        )
        .expect("build");
        let command = &built.commands[0];
        assert!(command.contains("./scripts/datastream -s 20240531 -e "));
        assert!(command.contains("-o path/20240531/x'"));
        assert!(!command.contains("DAILY"));
    }

    #[test]
    fn daily_prefix_after_cycle_resolves_to_today() {
        let job = JobSpec::Options(options(Some("path/DAILY/x")));
        let built = build(&job, None, None, datetime!(2024-06-01 10:00 UTC)).expect("build");
        assert_eq!(built.storage.expect("storage").prefix, "path/20240601/x");
    }

    #[test]
    fn literal_commands_are_kept_when_no_placeholder() {
        let commands = vec!["echo one".to_string(), "echo two".to_string()];
        let job = JobSpec::Commands(commands.clone());
        let built = build(&job, None, None, datetime!(2024-06-01 10:00 UTC)).expect("build");
        assert_eq!(built.commands, commands);
        assert_eq!(built.resolved_date, None);
        assert!(!built.daily_prefix);
    }

    #[test]
    fn placeholder_in_commands_without_storage_is_still_resolved() {
        let job = JobSpec::Commands(vec![
            "run -F s3://f/DAILY/forcing.nc -o out/DAILY".to_string(),
            "echo done".to_string(),
        ]);
        let built = build(
            &job,
            None,
            Some("NWM_MEDIUM_RANGE_12_1"),
            datetime!(2024-06-01 11:00 UTC),
        )
        .expect("build");
        assert_eq!(
            built.commands,
            vec![
                "run -F s3://f/20240531/forcing.nc -o out/20240531".to_string(),
                "echo done".to_string(),
            ]
        );
        assert_eq!(built.storage, None);
        assert!(!built.daily_prefix);
    }

    #[test]
    fn prefix_and_commands_are_substituted_independently() {
        let storage = StorageTarget {
            bucket: "b".into(),
            prefix: "daily/DAILY".into(),
        };
        let job = JobSpec::Commands(vec!["sync --s3_prefix other/DAILY/y".to_string()]);
        let built = build(
            &job,
            Some(&storage),
            None,
            datetime!(2024-06-01 17:00 UTC),
        )
        .expect("build");
        assert_eq!(built.storage.expect("storage").prefix, "daily/20240601");
        assert_eq!(built.commands, vec!["sync --s3_prefix other/20240601/y"]);
    }

    #[test]
    fn half_configured_storage_is_rejected() {
        let mut opts = options(Some("path/x"));
        opts.s3_bucket = None;
        let err = build(
            &JobSpec::Options(opts),
            None,
            None,
            datetime!(2024-06-01 10:00 UTC),
        )
        .expect_err("must fail");
        assert!(err.contains("s3_prefix"));
    }

    #[test]
    fn bad_cycle_digits_fail_only_when_a_date_is_needed() {
        let mut opts = options(Some("path/x"));
        opts.forcing_source = "SHORT_RANGE_zz".into();
        assert!(build(
            &JobSpec::Options(opts.clone()),
            None,
            None,
            datetime!(2024-06-01 10:00 UTC)
        )
        .is_ok());

        opts.s3_prefix = Some("path/DAILY".into());
        assert!(build(
            &JobSpec::Options(opts),
            None,
            None,
            datetime!(2024-06-01 10:00 UTC)
        )
        .is_err());
    }

    #[test]
    fn empty_command_list_is_rejected() {
        let err = build(
            &JobSpec::Commands(vec!["  ".into()]),
            None,
            None,
            datetime!(2024-06-01 10:00 UTC),
        )
        .expect_err("must fail");
        assert_eq!(err, "no commands to dispatch");
    }
}
