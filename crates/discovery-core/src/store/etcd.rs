// SPDX-FileCopyrightText: Cluster Discovery Contributors
//
// SPDX-License-Identifier: EUPL-1.2

// Translates the etcd v2-shaped `Store` trait onto etcd's v3 gRPC API, the only API
// `etcd_client` speaks. Directories are implicit key prefixes, TTLs are leases, and
// server-generated child keys are UUIDs guarded by a version check to rule out collisions.

use async_trait::async_trait;
use etcd_client::{Client, Compare, CompareOp, DeleteOptions, GetOptions, PutOptions, Txn, TxnOp};
use uuid::Uuid;

use super::{CasOptions, Node, Store, StoreError};

/// How many times [`EtcdStore::create`] retries on a generated-key collision before giving up.
const CREATE_KEY_COLLISION_RETRIES: usize = 5;

/// `Store` backed by a real etcd cluster.
pub struct EtcdStore {
    client: Client,
}

impl EtcdStore {
    pub async fn connect(urls: &[String]) -> Result<Self, StoreError> {
        let client = Client::connect(urls, None)
            .await
            .map_err(|source| StoreError::Transport { source })?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Store for EtcdStore {
    async fn create_dir(&self, key: &str) -> Result<(), StoreError> {
        let marker = dir_marker(key);

        let txn = Txn::new()
            .when([Compare::version(marker.as_bytes(), CompareOp::Equal, 0)])
            .and_then([TxnOp::put(marker.as_bytes(), "", None)]);

        let resp = self
            .client
            .clone()
            .txn(txn)
            .await
            .map_err(|source| StoreError::Transport { source })?;

        if resp.succeeded() {
            Ok(())
        } else {
            Err(StoreError::NodeExists)
        }
    }

    async fn get(&self, key: &str, recursive: bool, sorted: bool) -> Result<Node, StoreError> {
        let mut opts = GetOptions::new();
        if recursive {
            opts = opts.with_prefix();
        }
        if sorted {
            opts = opts.with_sort(
                etcd_client::SortTarget::Key,
                etcd_client::SortOrder::Ascend,
            );
        }

        let resp = self
            .client
            .clone()
            .get(key, Some(opts))
            .await
            .map_err(|source| StoreError::Transport { source })?;

        if !recursive {
            return resp
                .kvs()
                .first()
                .map(|kv| Node {
                    key: kv.key_str().unwrap_or_default().to_owned(),
                    value: Some(kv.value_str().unwrap_or_default().to_owned()),
                    children: Vec::new(),
                })
                .ok_or(StoreError::KeyNotFound);
        }

        let children: Vec<Node> = resp
            .kvs()
            .iter()
            .filter(|kv| !kv.key_str().unwrap_or_default().ends_with(DIR_MARKER_SUFFIX))
            .map(|kv| Node {
                key: kv.key_str().unwrap_or_default().to_owned(),
                value: Some(kv.value_str().unwrap_or_default().to_owned()),
                children: Vec::new(),
            })
            .collect();

        if resp.kvs().is_empty() {
            return Err(StoreError::KeyNotFound);
        }

        Ok(Node {
            key: key.to_owned(),
            value: None,
            children,
        })
    }

    async fn create(&self, dir_key: &str, value: &str) -> Result<String, StoreError> {
        let mut client = self.client.clone();

        for _ in 0..CREATE_KEY_COLLISION_RETRIES {
            let child_key = format!("{}/{}", dir_key.trim_end_matches('/'), Uuid::new_v4());

            let txn = Txn::new()
                .when([Compare::version(child_key.as_bytes(), CompareOp::Equal, 0)])
                .and_then([TxnOp::put(child_key.as_bytes(), value, None)]);

            let resp = client
                .txn(txn)
                .await
                .map_err(|source| StoreError::Transport { source })?;

            if resp.succeeded() {
                return Ok(child_key);
            }

            log::warn!("generated seed-list key {child_key} collided, retrying");
        }

        Err(StoreError::Transport {
            source: etcd_client::Error::InvalidArgs(
                "exhausted retries generating a unique child key".to_owned(),
            ),
        })
    }

    async fn delete(&self, key: &str, recursive: bool) -> Result<String, StoreError> {
        let mut opts = DeleteOptions::new().with_prev_key();
        if recursive {
            opts = opts.with_prefix();
        }

        let resp = self
            .client
            .clone()
            .delete(key, Some(opts))
            .await
            .map_err(|source| StoreError::Transport { source })?;

        resp.prev_kvs()
            .first()
            .and_then(|kv| kv.value_str().ok())
            .map(str::to_owned)
            .ok_or(StoreError::KeyNotFound)
    }

    async fn compare_and_set(
        &self,
        key: &str,
        value: &str,
        opts: CasOptions,
    ) -> Result<(), StoreError> {
        let mut client = self.client.clone();

        let lease_id = match opts.ttl {
            Some(ttl) => {
                let lease = client
                    .lease_grant(ttl as i64, None)
                    .await
                    .map_err(|source| StoreError::Transport { source })?;
                Some(lease.id())
            }
            None => None,
        };

        let mut compares = Vec::new();
        if let Some(prev_value) = &opts.prev_value {
            compares.push(Compare::value(key.as_bytes(), CompareOp::Equal, prev_value.as_str()));
        }
        if let Some(prev_exist) = opts.prev_exist {
            let op = if prev_exist {
                CompareOp::Greater
            } else {
                CompareOp::Equal
            };
            compares.push(Compare::version(key.as_bytes(), op, 0));
        }

        let put_options = lease_id.map(|id| PutOptions::new().with_lease(id));
        let txn = Txn::new()
            .when(compares)
            .and_then([TxnOp::put(key.as_bytes(), value, put_options)]);

        let resp = client
            .txn(txn)
            .await
            .map_err(|source| StoreError::Transport { source })?;

        if resp.succeeded() {
            return Ok(());
        }

        if let Some(id) = lease_id {
            if let Err(source) = client.lease_revoke(id).await {
                log::warn!("failed to revoke unused lease {id} after failed compare-and-set: {source}");
            }
        }

        if opts.prev_exist == Some(false) {
            Err(StoreError::NodeExists)
        } else {
            Err(StoreError::TestFailed)
        }
    }
}

const DIR_MARKER_SUFFIX: &str = "/.dir";

fn dir_marker(key: &str) -> String {
    format!("{}{DIR_MARKER_SUFFIX}", key.trim_end_matches('/'))
}
