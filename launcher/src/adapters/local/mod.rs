// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! Provider stand-ins that run on the local host.

mod compute;
mod shell;

pub use compute::LocalCompute;
pub use shell::LocalShell;
