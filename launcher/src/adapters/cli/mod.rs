// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::PathBuf;

use clap::{CommandFactory, FromArgMatches, Parser};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

#[derive(Parser, Debug)]
#[command(
    name = "launcher",
    version,
    about = "Provision one instance, verify its role and dispatch a datastream job to it",
    long_about = None,
    after_help = "Configuration precedence: defaults < config file < command-line flags.\n\
Config path precedence: defaults < LAUNCHER_CONFIG_PATH < command-line flags.\n\
If --config is omitted, launcher tries LAUNCHER_CONFIG_PATH, then the default config file location; missing default config is OK.\n\
\n\
Exit codes: 0 dispatched, 1 commands failed (with --wait) or internal error, 2 invalid job, 3 fatal (role mismatch, rejected), 4 retryable, 130 cancelled."
)]
pub struct Opts {
    #[arg(
        short,
        long,
        value_name = "PATH",
        help = "Job submission JSON. Use '-' to read it from stdin."
    )]
    pub exec: PathBuf,
    #[arg(
        short,
        long,
        value_name = "PATH",
        help = "Path to a TOML config file. When omitted, launcher uses LAUNCHER_CONFIG_PATH if set, otherwise the default config file location if available."
    )]
    pub config: Option<PathBuf>,
    #[arg(
        long,
        value_name = "REGION",
        help = "Provider region recorded with the launch. Overrides `region` from the config file."
    )]
    pub region: Option<String>,
    #[arg(
        long,
        value_name = "PATH",
        help = "Directory backing the object store. Overrides `object_store_root` from the config file."
    )]
    pub object_store_root: Option<PathBuf>,
    #[arg(
        short,
        long,
        action = clap::ArgAction::SetTrue,
        help = "Enable debug logging. Overrides `verbose` from the config file."
    )]
    pub verbose: bool,
    #[arg(
        short,
        long,
        value_name = "PATH",
        help = "Write the final execution context here instead of stdout."
    )]
    pub output: Option<PathBuf>,
    #[arg(
        short,
        long,
        action = clap::ArgAction::SetTrue,
        help = "Stay attached until the dispatched commands finish and exit with their outcome."
    )]
    pub wait: bool,
    #[arg(
        long,
        value_name = "RFC3339",
        value_parser = parse_now,
        help = "Pretend the launch happens at this instant, e.g. to replay a forecast cycle."
    )]
    pub now: Option<OffsetDateTime>,
}

fn parse_now(raw: &str) -> Result<OffsetDateTime, String> {
    OffsetDateTime::parse(raw, &Rfc3339).map_err(|err| format!("invalid RFC 3339 time: {err}"))
}

pub struct ParsedOpts {
    pub opts: Opts,
    pub verbose_override: Option<bool>,
}

const HELP_TEMPLATE: &str = "\
{before-help}{about-with-newline}{usage-heading} {usage}
{after-help}

{all-args}
";

pub fn cli_command() -> clap::Command {
    Opts::command().help_template(HELP_TEMPLATE)
}

pub fn parse_opts() -> ParsedOpts {
    let matches = cli_command().get_matches();
    let verbose_override = if matches.get_flag("verbose") {
        Some(true)
    } else {
        None
    };
    let opts = Opts::from_arg_matches(&matches).unwrap_or_else(|err| err.exit());
    ParsedOpts {
        opts,
        verbose_override,
    }
}
