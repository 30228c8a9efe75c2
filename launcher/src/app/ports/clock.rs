// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use time::OffsetDateTime;

/// UTC time source. Stamps the pipeline start and drives the forecast-date
/// rule, so tests can pin "now" to a given cycle hour.
pub trait ClockPort: Send + Sync {
    fn now_utc(&self) -> OffsetDateTime;
}
