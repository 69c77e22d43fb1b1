// SPDX-FileCopyrightText: Cluster Discovery Contributors
//
// SPDX-License-Identifier: EUPL-1.2

//! Immutable configuration consumed by both FSMs.
//!
//! This crate only validates and stores the configuration; loading it from a file plus
//! environment overrides is the job of the `discovery-settings` crate, which produces a
//! [`Config`] as its final output.

use std::time::Duration;

use snafu::Snafu;

#[derive(Debug, Snafu, PartialEq, Eq)]
pub enum ConfigError {
    #[snafu(display(
        "leader_refresh_interval ({refresh:?}) must be strictly less than leader_entry_ttl ({ttl:?})"
    ))]
    RefreshNotShorterThanTtl { refresh: Duration, ttl: Duration },

    #[snafu(display("etcd_urls must not be empty"))]
    NoEtcdUrls,
}

/// Configuration for one node's participation in the discovery protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Addresses of the etcd cluster backing the store.
    pub etcd_urls: Vec<String>,
    /// Base directory key in the store, e.g. `/akka`.
    pub etcd_path: String,
    /// Key holding the current leader's address, under `etcd_path`.
    pub leader_path: String,
    /// Directory key under which seed entries live.
    pub seeds_path: String,
    /// Lease duration on the leader key.
    pub leader_entry_ttl: Duration,
    /// Period for refreshing the leader key. Must be strictly less than `leader_entry_ttl`.
    pub leader_refresh_interval: Duration,
    /// Back-off between retries of failed store operations.
    pub etcd_retry_delay: Duration,
    /// Bounded wait for the initial seed fetch.
    pub seeds_fetch_timeout: Duration,
    /// Back-off before retrying a lost election.
    pub election_retry_delay: Duration,
}

impl Config {
    /// Builds a [`Config`] with the published data layout: `<etcd_path>/leader` and
    /// `<etcd_path>/seeds`.
    pub fn new(etcd_urls: Vec<String>, etcd_path: impl Into<String>) -> Self {
        let etcd_path = etcd_path.into();
        let leader_path = format!("{}/leader", etcd_path.trim_end_matches('/'));
        let seeds_path = format!("{}/seeds", etcd_path.trim_end_matches('/'));

        Self {
            etcd_urls,
            etcd_path,
            leader_path,
            seeds_path,
            leader_entry_ttl: Duration::from_secs(30),
            leader_refresh_interval: Duration::from_secs(10),
            etcd_retry_delay: Duration::from_secs(5),
            seeds_fetch_timeout: Duration::from_secs(10),
            election_retry_delay: Duration::from_secs(5),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.etcd_urls.is_empty() {
            return Err(ConfigError::NoEtcdUrls);
        }

        if self.leader_refresh_interval >= self.leader_entry_ttl {
            return Err(ConfigError::RefreshNotShorterThanTtl {
                refresh: self.leader_refresh_interval,
                ttl: self.leader_entry_ttl,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_layout_is_bit_exact() {
        let config = Config::new(vec!["http://localhost:2379".to_owned()], "/akka");

        assert_eq!(config.leader_path, "/akka/leader");
        assert_eq!(config.seeds_path, "/akka/seeds");
    }

    #[test]
    fn rejects_refresh_interval_not_shorter_than_ttl() {
        let mut config = Config::new(vec!["http://localhost:2379".to_owned()], "/akka");
        config.leader_entry_ttl = Duration::from_secs(10);
        config.leader_refresh_interval = Duration::from_secs(10);

        assert_eq!(
            config.validate(),
            Err(ConfigError::RefreshNotShorterThanTtl {
                refresh: Duration::from_secs(10),
                ttl: Duration::from_secs(10),
            })
        );
    }

    #[test]
    fn rejects_empty_etcd_urls() {
        let config = Config::new(vec![], "/akka");

        assert_eq!(config.validate(), Err(ConfigError::NoEtcdUrls));
    }
}
