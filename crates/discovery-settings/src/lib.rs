// SPDX-FileCopyrightText: Cluster Discovery Contributors
//
// SPDX-License-Identifier: EUPL-1.2

//! Layered configuration loading for `discovery-core`.
//!
//! A TOML file is the base layer, environment variables prefixed `DISCOVERY_` (double underscore
//! as the nested-key separator) are the override layer, matching how this codebase's other
//! settings crates layer `config::Environment` over a `config::File`. The result is validated once
//! here, before it ever reaches an FSM, so a misconfigured node fails fast instead of surprising
//! `discovery_core::DiscoveryFsm::spawn` with a runtime error.

use config::{Config as ConfigSource, Environment, File, FileFormat};
use discovery_core::config::{Config, ConfigError};
use serde::Deserialize;
use snafu::{ResultExt, Snafu};

const ENV_PREFIX: &str = "DISCOVERY";

#[derive(Debug, Snafu)]
pub enum SettingsError {
    #[snafu(display("failed to load configuration from {file_name}: {source}"))]
    Load {
        file_name: String,
        source: config::ConfigError,
    },

    #[snafu(transparent)]
    Validation { source: ConfigError },
}

/// The on-disk shape of the configuration file. Every field but the four namespace-defining ones
/// is optional and falls back to [`discovery_core::config::Config::new`]'s defaults.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSettings {
    etcd_urls: Vec<String>,
    etcd_path: String,

    #[serde(default)]
    leader_entry_ttl_secs: Option<u64>,
    #[serde(default)]
    leader_refresh_interval_secs: Option<u64>,
    #[serde(default)]
    etcd_retry_delay_secs: Option<u64>,
    #[serde(default)]
    seeds_fetch_timeout_secs: Option<u64>,
    #[serde(default)]
    election_retry_delay_secs: Option<u64>,
}

impl RawSettings {
    fn into_config(self) -> Config {
        use std::time::Duration;

        let mut config = Config::new(self.etcd_urls, self.etcd_path);

        if let Some(secs) = self.leader_entry_ttl_secs {
            config.leader_entry_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = self.leader_refresh_interval_secs {
            config.leader_refresh_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = self.etcd_retry_delay_secs {
            config.etcd_retry_delay = Duration::from_secs(secs);
        }
        if let Some(secs) = self.seeds_fetch_timeout_secs {
            config.seeds_fetch_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.election_retry_delay_secs {
            config.election_retry_delay = Duration::from_secs(secs);
        }

        config
    }
}

/// Loads and validates a [`Config`] from `file_name`, with `DISCOVERY_`-prefixed environment
/// variables (double underscore separated, e.g. `DISCOVERY_ETCD_PATH`) overriding the file.
pub fn load(file_name: &str) -> Result<Config, SettingsError> {
    let source = ConfigSource::builder()
        .add_source(File::new(file_name, FileFormat::Toml))
        .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
        .build()
        .context(LoadSnafu {
            file_name: file_name.to_owned(),
        })?;

    let raw: RawSettings = source.try_deserialize().context(LoadSnafu {
        file_name: file_name.to_owned(),
    })?;

    let config = raw.into_config();
    config.validate()?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use pretty_assertions::assert_eq;

    use super::*;

    /// Writes `contents` to a fresh scratch file under the OS temp dir and returns its path.
    /// `serial_test` isn't pulled in here since each test gets its own file, so no shared-state
    /// races exist despite mutating the filesystem.
    fn scratch_toml(contents: &str) -> String {
        static COUNTER: AtomicU32 = AtomicU32::new(0);
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        let path = std::env::temp_dir().join(format!(
            "discovery-settings-test-{}-{n}.toml",
            std::process::id()
        ));
        std::fs::write(&path, contents).unwrap();
        path.to_str().unwrap().to_owned()
    }

    #[test]
    fn loads_defaults_from_a_minimal_file() {
        let path = scratch_toml(
            r#"
            etcd_urls = ["http://localhost:2379"]
            etcd_path = "/akka"
            "#,
        );

        let config = load(&path).unwrap();

        assert_eq!(config.leader_path, "/akka/leader");
        assert_eq!(config.seeds_path, "/akka/seeds");
        assert_eq!(config.leader_entry_ttl.as_secs(), 30);
    }

    #[test]
    fn rejects_an_invalid_combination() {
        let path = scratch_toml(
            r#"
            etcd_urls = ["http://localhost:2379"]
            etcd_path = "/akka"
            leader_entry_ttl_secs = 5
            leader_refresh_interval_secs = 10
            "#,
        );

        let err = load(&path).unwrap_err();
        assert!(matches!(err, SettingsError::Validation { .. }));
    }

    #[test]
    fn rejects_an_unknown_field() {
        let path = scratch_toml(
            r#"
            etcd_urls = ["http://localhost:2379"]
            etcd_path = "/akka"
            not_a_real_field = true
            "#,
        );

        assert!(load(&path).is_err());
    }
}
