// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

pub mod commands;
pub mod forecast;
pub mod metadata;
pub mod poller;
pub mod random;
