// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use time::{Date, OffsetDateTime, UtcOffset};

/// Literal marker replaced by the resolved forecast date.
pub const DAILY_TOKEN: &str = "DAILY";
/// Cycle used for analysis/assimilation forcings.
pub const DEFAULT_CYCLE_HOUR: u8 = 16;

const SHORT_RANGE_MARKER: &str = "SHORT_RANGE";
const MEDIUM_RANGE_MARKER: &str = "MEDIUM_RANGE";

/// Hour of day (UTC) after which today's forecast cycle is available.
///
/// Short-range sources end with the cycle (`..._SHORT_RANGE_06`), medium-range
/// sources carry it two characters before the end (`..._MEDIUM_RANGE_06_3`
/// style identifiers, characters `-4..-2`). Anything else uses the default.
pub fn cycle_hour(forcing_source: Option<&str>) -> Result<u8, String> {
    let Some(source) = forcing_source else {
        return Ok(DEFAULT_CYCLE_HOUR);
    };
    let len = source.len();
    if source.contains(SHORT_RANGE_MARKER) {
        parse_hour(source, len.checked_sub(2).map(|start| (start, len)))
    } else if source.contains(MEDIUM_RANGE_MARKER) {
        parse_hour(source, len.checked_sub(4).map(|start| (start, start + 2)))
    } else {
        Ok(DEFAULT_CYCLE_HOUR)
    }
}

fn parse_hour(source: &str, range: Option<(usize, usize)>) -> Result<u8, String> {
    let digits = range
        .and_then(|(start, end)| source.get(start..end))
        .filter(|digits| digits.bytes().all(|b| b.is_ascii_digit()))
        .ok_or_else(|| format!("cannot read forecast cycle hour from '{source}'"))?;
    let hour: u8 = digits
        .parse()
        .map_err(|_| format!("cannot read forecast cycle hour from '{source}'"))?;
    if hour > 23 {
        return Err(format!(
            "forecast cycle hour {hour} in '{source}' is not an hour of the day"
        ));
    }
    Ok(hour)
}

/// Before the cycle hour the previous UTC day is used, otherwise today.
pub fn resolve_date(now: OffsetDateTime, cycle_hour: u8) -> Date {
    let now = now.to_offset(UtcOffset::UTC);
    let today = now.date();
    if now.hour() < cycle_hour {
        today.previous_day().unwrap_or(today)
    } else {
        today
    }
}

/// `YYYYMMDD`.
pub fn format_date(date: Date) -> String {
    format!(
        "{:04}{:02}{:02}",
        date.year(),
        u8::from(date.month()),
        date.day()
    )
}

pub fn contains_placeholder(value: &str) -> bool {
    value.contains(DAILY_TOKEN)
}

pub fn substitute(value: &str, date: &str) -> String {
    value.replace(DAILY_TOKEN, date)
}
