// SPDX-FileCopyrightText: Cluster Discovery Contributors
//
// SPDX-License-Identifier: EUPL-1.2

//! Deterministic in-memory [`Store`] used by the FSM test suites.
//!
//! Every accessor locks a plain [`std::sync::Mutex`] around a flat key→value map; directories are
//! just prefixes, exactly like real etcd. Tests script transient failures with [`MockStore::fail_next`].

use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::Mutex,
};

use async_trait::async_trait;
use uuid::Uuid;

use super::{CasOptions, Node, Store, StoreError};

#[derive(Default)]
struct Inner {
    entries: HashMap<String, String>,
    dirs: HashSet<String>,
    scripted_failures: VecDeque<StoreError>,
}

#[derive(Default)]
pub struct MockStore {
    inner: Mutex<Inner>,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next call to any `Store` method returns this error instead of touching the map.
    pub fn fail_next(&self, err: StoreError) {
        self.inner.lock().unwrap().scripted_failures.push_back(err);
    }

    fn take_scripted_failure(&self) -> Option<StoreError> {
        self.inner.lock().unwrap().scripted_failures.pop_front()
    }

    /// Seeds a child entry directly, bypassing `create`'s UUID-key generation, for tests that need
    /// a known starting key.
    pub fn seed_child(&self, dir_key: &str, value: &str) -> String {
        let key = format!("{}/{value}", dir_key.trim_end_matches('/'));
        self.inner
            .lock()
            .unwrap()
            .entries
            .insert(key.clone(), value.to_owned());
        key
    }

    /// Snapshot of every value currently stored under `prefix`, for test assertions.
    pub fn children_of(&self, prefix: &str) -> HashMap<String, String> {
        let prefix = format!("{}/", prefix.trim_end_matches('/'));
        self.inner
            .lock()
            .unwrap()
            .entries
            .iter()
            .filter(|(k, _)| k.starts_with(&prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

#[async_trait]
impl Store for MockStore {
    async fn create_dir(&self, key: &str) -> Result<(), StoreError> {
        if let Some(err) = self.take_scripted_failure() {
            return Err(err);
        }

        let mut inner = self.inner.lock().unwrap();
        if !inner.dirs.insert(key.to_owned()) {
            return Err(StoreError::NodeExists);
        }

        Ok(())
    }

    async fn get(&self, key: &str, recursive: bool, sorted: bool) -> Result<Node, StoreError> {
        if let Some(err) = self.take_scripted_failure() {
            return Err(err);
        }

        let inner = self.inner.lock().unwrap();

        if !recursive {
            return inner
                .entries
                .get(key)
                .map(|value| Node {
                    key: key.to_owned(),
                    value: Some(value.clone()),
                    children: Vec::new(),
                })
                .ok_or(StoreError::KeyNotFound);
        }

        let prefix = format!("{}/", key.trim_end_matches('/'));
        let mut children: Vec<Node> = inner
            .entries
            .iter()
            .filter(|(k, _)| k.starts_with(&prefix))
            .map(|(k, v)| Node {
                key: k.clone(),
                value: Some(v.clone()),
                children: Vec::new(),
            })
            .collect();

        if sorted {
            children.sort_by(|a, b| a.key.cmp(&b.key));
        }

        if children.is_empty() {
            return Err(StoreError::KeyNotFound);
        }

        Ok(Node {
            key: key.to_owned(),
            value: None,
            children,
        })
    }

    async fn create(&self, dir_key: &str, value: &str) -> Result<String, StoreError> {
        if let Some(err) = self.take_scripted_failure() {
            return Err(err);
        }

        let mut inner = self.inner.lock().unwrap();
        let child_key = loop {
            let candidate = format!("{}/{}", dir_key.trim_end_matches('/'), Uuid::new_v4());
            if !inner.entries.contains_key(&candidate) {
                break candidate;
            }
        };

        inner.entries.insert(child_key.clone(), value.to_owned());
        Ok(child_key)
    }

    async fn delete(&self, key: &str, recursive: bool) -> Result<String, StoreError> {
        if let Some(err) = self.take_scripted_failure() {
            return Err(err);
        }

        let mut inner = self.inner.lock().unwrap();

        if recursive {
            let prefix = format!("{}/", key.trim_end_matches('/'));
            let keys: Vec<String> = inner
                .entries
                .keys()
                .filter(|k| k.starts_with(&prefix) || *k == key)
                .cloned()
                .collect();

            if keys.is_empty() {
                return Err(StoreError::KeyNotFound);
            }

            let mut first_value = None;
            for k in keys {
                if let Some(v) = inner.entries.remove(&k) {
                    first_value.get_or_insert(v);
                }
            }
            return first_value.ok_or(StoreError::KeyNotFound);
        }

        inner.entries.remove(key).ok_or(StoreError::KeyNotFound)
    }

    async fn compare_and_set(
        &self,
        key: &str,
        value: &str,
        opts: CasOptions,
    ) -> Result<(), StoreError> {
        if let Some(err) = self.take_scripted_failure() {
            return Err(err);
        }

        let mut inner = self.inner.lock().unwrap();
        let current = inner.entries.get(key).cloned();

        if let Some(prev_exist) = opts.prev_exist {
            if prev_exist != current.is_some() {
                return Err(if prev_exist {
                    StoreError::TestFailed
                } else {
                    StoreError::NodeExists
                });
            }
        }

        if let Some(prev_value) = &opts.prev_value {
            if current.as_deref() != Some(prev_value.as_str()) {
                return Err(StoreError::TestFailed);
            }
        }

        inner.entries.insert(key.to_owned(), value.to_owned());
        Ok(())
    }
}
