// SPDX-FileCopyrightText: Cluster Discovery Contributors
//
// SPDX-License-Identifier: EUPL-1.2

//! Abstraction over the rendezvous key-value store.
//!
//! Both FSMs talk to the store exclusively through the [`Store`] trait; they never see
//! `etcd_client` types. This keeps the FSMs testable against [`EtcdStore`]'s in-memory
//! counterpart and keeps the etcd v2-to-v3 translation in exactly one place.

mod etcd;
#[cfg(any(test, feature = "test-util"))]
mod mock;

pub use etcd::EtcdStore;
#[cfg(any(test, feature = "test-util"))]
pub use mock::MockStore;

use async_trait::async_trait;
use snafu::Snafu;

/// Address string of a cluster member, as published under [`seeds_path`](crate::config::Config::seeds_path).
pub type Address = String;

/// A key as reported by the store, e.g. `"/akka/seeds/3f9a2c"`.
pub type StoreKey = String;

/// A node returned by [`Store::get`]. Leaf nodes have `value` set and no children;
/// directory nodes have children and no value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub key: StoreKey,
    pub value: Option<String>,
    pub children: Vec<Node>,
}

/// Parameters for [`Store::compare_and_set`], mirroring etcd v2's `compareAndSet` query parameters.
#[derive(Debug, Clone, Default)]
pub struct CasOptions {
    /// Lease duration in seconds. `None` means no TTL.
    pub ttl: Option<u64>,
    /// Succeed only if the key's current value equals this.
    pub prev_value: Option<String>,
    /// Succeed only if the key currently does (`Some(true)`) or does not (`Some(false)`) exist.
    pub prev_exist: Option<bool>,
}

/// Errors the store can return, folding every `etcd_client` failure mode into the three logical
/// codes this protocol understands plus one catch-all transport error.
#[derive(Debug, Snafu)]
pub enum StoreError {
    /// `create_dir`/`compare_and_set(prev_exist = false)` found the key already present.
    #[snafu(display("key already exists"))]
    NodeExists,

    /// `get`/`delete` found no value at the requested key.
    #[snafu(display("key not found"))]
    KeyNotFound,

    /// `compare_and_set` found the precondition (`prev_value`/`prev_exist`) did not hold.
    #[snafu(display("compare-and-swap precondition failed"))]
    TestFailed,

    /// Connection, (de)serialization, or any other failure not anticipated by the protocol.
    #[snafu(display("store transport error: {source}"))]
    Transport { source: etcd_client::Error },

    /// A call wrapped in a bounded wait (e.g. [`Config::seeds_fetch_timeout`](crate::config::Config::seeds_fetch_timeout))
    /// did not complete in time.
    #[snafu(display("store call timed out"))]
    Timeout,
}

impl StoreError {
    /// True for errors the protocol did not anticipate: every store call site that receives one of
    /// these schedules a retry of the triggering message rather than treating it as a state-driving
    /// event.
    pub fn is_unexpected(&self, expected: &[std::mem::Discriminant<StoreError>]) -> bool {
        !expected.contains(&std::mem::discriminant(self))
    }

    /// Discriminant of [`StoreError::NodeExists`], for building `is_unexpected` expectation lists.
    pub fn node_exists_discriminant() -> std::mem::Discriminant<StoreError> {
        std::mem::discriminant(&StoreError::NodeExists)
    }

    /// Discriminant of [`StoreError::KeyNotFound`], for building `is_unexpected` expectation lists.
    pub fn key_not_found_discriminant() -> std::mem::Discriminant<StoreError> {
        std::mem::discriminant(&StoreError::KeyNotFound)
    }
}

#[async_trait]
pub trait Store: Send + Sync + 'static {
    /// Create a directory at `key`. Returns [`StoreError::NodeExists`] if already present.
    async fn create_dir(&self, key: &str) -> Result<(), StoreError>;

    /// Fetch the node at `key`. When `recursive` is true and `key` is a directory, children are
    /// populated. When `sorted` is true, children are ordered by key.
    async fn get(&self, key: &str, recursive: bool, sorted: bool) -> Result<Node, StoreError>;

    /// Create a uniquely-keyed child of the directory at `dir_key` holding `value`.
    /// Returns the server-generated key; callers must not predict or reuse it.
    async fn create(&self, dir_key: &str, value: &str) -> Result<StoreKey, StoreError>;

    /// Delete `key`. Returns the value the key held just before deletion.
    async fn delete(&self, key: &str, recursive: bool) -> Result<String, StoreError>;

    /// Atomic conditional write of `key` to `value`, subject to `opts`.
    async fn compare_and_set(
        &self,
        key: &str,
        value: &str,
        opts: CasOptions,
    ) -> Result<(), StoreError>;
}
