// SPDX-FileCopyrightText: Cluster Discovery Contributors
//
// SPDX-License-Identifier: EUPL-1.2

//! Top-level error types for each FSM's fallible entry point.
//!
//! Both fold a [`ConfigError`] in transparently, matching how this codebase's other etcd-backed
//! tasks wrap a lower layer's error behind a `snafu` enum before their callers ever see it.

use snafu::Snafu;

use crate::config::ConfigError;

#[derive(Debug, Snafu)]
pub enum DiscoveryError {
    #[snafu(transparent)]
    Config { source: ConfigError },
}

#[derive(Debug, Snafu)]
pub enum SeedListError {
    #[snafu(transparent)]
    Config { source: ConfigError },
}
