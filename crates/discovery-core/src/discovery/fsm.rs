// SPDX-FileCopyrightText: Cluster Discovery Contributors
//
// SPDX-License-Identifier: EUPL-1.2

//! Node-level bootstrap lifecycle: init the shared namespace, contend for leadership, lead or
//! follow, and maintain leader-key tenure.
//!
//! A `compareAndSet`-based election over a shared store, a periodic lease-refresh loop that
//! demotes unconditionally on failure, and a handle type that forwards an external event
//! subscription into the FSM's own mailbox.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::error::DiscoveryError;
use crate::gossip::{ClusterEvent, Membership};
use crate::retry::schedule_retry;
use crate::seed_list::{SeedListFsm, SeedListHandle};
use crate::store::{Address, CasOptions, Store, StoreError};

use super::messages::{DiscoveryMsg, State};

/// A cloneable reference to a running Discovery FSM.
#[derive(Clone)]
pub struct DiscoveryHandle {
    sender: mpsc::UnboundedSender<DiscoveryMsg>,
    state: watch::Receiver<State>,
}

impl DiscoveryHandle {
    /// Kicks off the bootstrap sequence. Calling this more than once, or after the FSM has already
    /// left `Initial`, has no further effect.
    pub fn start(&self) {
        let _ = self.sender.send(DiscoveryMsg::Start);
    }

    /// The FSM's state as of the last observed transition.
    pub fn state(&self) -> State {
        *self.state.borrow()
    }

    /// Subscribe to state-transition notifications.
    pub fn subscribe_state(&self) -> watch::Receiver<State> {
        self.state.clone()
    }
}

/// Drives one node through cluster bootstrap and leader-key tenure.
pub struct DiscoveryFsm<S: Store, M: Membership> {
    store: Arc<S>,
    membership: Arc<M>,
    config: Arc<Config>,
    mailbox: mpsc::UnboundedReceiver<DiscoveryMsg>,
    self_sender: mpsc::UnboundedSender<DiscoveryMsg>,
    state_tx: watch::Sender<State>,
    state: State,
    seed_list: Option<SeedListHandle>,
    refresh_task: Option<JoinHandle<()>>,
}

impl<S: Store, M: Membership> DiscoveryFsm<S, M> {
    /// Validates `config`, then spawns a new Discovery FSM in `Initial`. Call
    /// [`DiscoveryHandle::start`] to begin bootstrap.
    pub fn spawn(
        config: Config,
        store: Arc<S>,
        membership: Arc<M>,
    ) -> Result<DiscoveryHandle, DiscoveryError> {
        config.validate()?;
        let config = Arc::new(config);

        let (tx, rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(State::Initial);

        let mut cluster_events = membership.subscribe();
        let forward_sender = tx.clone();
        tokio::spawn(async move {
            while let Some(event) = cluster_events.recv().await {
                if forward_sender.send(DiscoveryMsg::Cluster(event)).is_err() {
                    break;
                }
            }
        });

        let fsm = Self {
            store,
            membership,
            config,
            mailbox: rx,
            self_sender: tx.clone(),
            state_tx,
            state: State::Initial,
            seed_list: None,
            refresh_task: None,
        };

        tokio::spawn(fsm.run());

        Ok(DiscoveryHandle {
            sender: tx,
            state: state_rx,
        })
    }

    async fn run(mut self) {
        while let Some(msg) = self.mailbox.recv().await {
            self.handle(msg).await;
        }

        self.leave_leader();
        log::debug!("discovery FSM mailbox closed, exiting");
    }

    fn set_state(&mut self, state: State) {
        self.state = state;
        let _ = self.state_tx.send(state);
    }

    async fn handle(&mut self, msg: DiscoveryMsg) {
        match msg {
            DiscoveryMsg::Start => {
                if self.state == State::Initial {
                    self.issue_create_dir();
                }
            }
            DiscoveryMsg::CreateDirDone(result) => {
                if self.state != State::Initial {
                    return;
                }
                match result {
                    Ok(()) => self.enter_election(),
                    Err(err) if !err.is_unexpected(&[StoreError::node_exists_discriminant()]) => {
                        self.enter_election()
                    }
                    Err(err) => {
                        log::warn!(
                            "createDir({}) failed ({err}), retrying in {:?}",
                            self.config.etcd_path,
                            self.config.etcd_retry_delay
                        );
                        schedule_retry(
                            self.config.etcd_retry_delay,
                            self.self_sender.clone(),
                            DiscoveryMsg::Start,
                        );
                    }
                }
            }
            DiscoveryMsg::RetryElection => {
                if self.state == State::Election {
                    self.enter_election();
                }
            }
            DiscoveryMsg::ElectionResult(result) => {
                if self.state != State::Election {
                    return;
                }
                match result {
                    Ok(()) => self.enter_leader(),
                    Err(err) if !err.is_unexpected(&[StoreError::node_exists_discriminant()]) => {
                        self.enter_awaiting_seeds_fetch()
                    }
                    Err(err) => {
                        log::warn!(
                            "election bid failed ({err}), retrying in {:?}",
                            self.config.election_retry_delay
                        );
                        schedule_retry(
                            self.config.election_retry_delay,
                            self.self_sender.clone(),
                            DiscoveryMsg::RetryElection,
                        );
                    }
                }
            }
            DiscoveryMsg::RetryFetchSeeds => {
                if self.state == State::AwaitingSeedsFetch {
                    self.issue_fetch_seeds();
                }
            }
            DiscoveryMsg::SeedsFetched(result) => {
                if self.state != State::AwaitingSeedsFetch {
                    return;
                }
                match result {
                    Ok(node) => {
                        let seeds: Vec<Address> = node
                            .children
                            .into_iter()
                            .filter_map(|child| child.value)
                            .collect();

                        if seeds.is_empty() {
                            log::info!("prior leader published no seeds, retrying election");
                            self.enter_election();
                        } else {
                            self.enter_joining_cluster(seeds);
                        }
                    }
                    Err(err) if !err.is_unexpected(&[StoreError::key_not_found_discriminant()]) => {
                        log::info!("no seed list published yet, retrying election");
                        self.enter_election();
                    }
                    Err(err) => {
                        log::warn!(
                            "seed fetch failed ({err}), retrying in {:?}",
                            self.config.etcd_retry_delay
                        );
                        schedule_retry(
                            self.config.etcd_retry_delay,
                            self.self_sender.clone(),
                            DiscoveryMsg::RetryFetchSeeds,
                        );
                    }
                }
            }
            DiscoveryMsg::JoinCompleted => {
                if self.state == State::JoiningCluster {
                    self.set_state(State::Follower);
                    log::info!("joined cluster, now following");
                }
            }
            DiscoveryMsg::RefreshResult(result) => {
                if self.state != State::Leader {
                    return;
                }
                if let Err(err) = result {
                    log::warn!("leader-key refresh failed ({err}), yielding leadership");
                    self.leave_leader();
                    self.enter_election();
                }
            }
            DiscoveryMsg::Cluster(event) => self.handle_cluster_event(event),
        }
    }

    fn handle_cluster_event(&mut self, event: ClusterEvent) {
        match (self.state, event) {
            (State::Follower, ClusterEvent::LeaderChanged(leader)) => {
                // Covers both a departed leader and the edge case of observing ourselves as leader
                // without ever having won a bid (a lost success reply to our own election attempt).
                if leader.is_none() || leader.as_deref() == Some(self.membership.self_address().as_str())
                {
                    log::info!("leader change observed while following, retrying election");
                    self.enter_election();
                }
            }
            (State::Leader, ClusterEvent::MemberUp(addr)) => {
                if let Some(seed_list) = &self.seed_list {
                    seed_list.member_added(addr);
                }
            }
            (State::Leader, ClusterEvent::MemberRemoved(addr)) => {
                if let Some(seed_list) = &self.seed_list {
                    seed_list.member_removed(addr);
                }
            }
            _ => {}
        }
    }

    fn issue_create_dir(&mut self) {
        let store = self.store.clone();
        let etcd_path = self.config.etcd_path.clone();
        let sender = self.self_sender.clone();

        tokio::spawn(async move {
            let result = store.create_dir(&etcd_path).await;
            let _ = sender.send(DiscoveryMsg::CreateDirDone(result));
        });
    }

    fn enter_election(&mut self) {
        self.set_state(State::Election);
        log::debug!("bidding for leadership at {}", self.config.leader_path);

        let store = self.store.clone();
        let config = self.config.clone();
        let self_address = self.membership.self_address();
        let sender = self.self_sender.clone();

        tokio::spawn(async move {
            let result = store
                .compare_and_set(
                    &config.leader_path,
                    &self_address,
                    CasOptions {
                        ttl: Some(config.leader_entry_ttl.as_secs()),
                        prev_value: None,
                        prev_exist: Some(false),
                    },
                )
                .await;
            let _ = sender.send(DiscoveryMsg::ElectionResult(result));
        });
    }

    fn enter_awaiting_seeds_fetch(&mut self) {
        self.set_state(State::AwaitingSeedsFetch);
        self.issue_fetch_seeds();
    }

    fn issue_fetch_seeds(&mut self) {
        let store = self.store.clone();
        let seeds_path = self.config.seeds_path.clone();
        let timeout = self.config.seeds_fetch_timeout;
        let sender = self.self_sender.clone();

        tokio::spawn(async move {
            let result = match tokio::time::timeout(timeout, store.get(&seeds_path, true, true)).await {
                Ok(result) => result,
                Err(_) => Err(StoreError::Timeout),
            };
            let _ = sender.send(DiscoveryMsg::SeedsFetched(result));
        });
    }

    fn enter_joining_cluster(&mut self, seeds: Vec<Address>) {
        self.set_state(State::JoiningCluster);
        log::info!("joining cluster via {} seed(s)", seeds.len());

        let membership = self.membership.clone();
        let sender = self.self_sender.clone();

        tokio::spawn(async move {
            membership.join(seeds).await;
            let _ = sender.send(DiscoveryMsg::JoinCompleted);
        });
    }

    fn enter_leader(&mut self) {
        self.set_state(State::Leader);
        log::info!("won election, became leader at {}", self.config.leader_path);

        let seed_list = SeedListFsm::spawn(self.config.clone(), self.store.clone());
        seed_list.seed(self.membership.current_members());
        self.seed_list = Some(seed_list);

        let store = self.store.clone();
        let config = self.config.clone();
        let self_address = self.membership.self_address();
        let sender = self.self_sender.clone();

        self.refresh_task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(config.leader_refresh_interval);
            ticker.tick().await; // the leading tick fires immediately; the key was just written

            loop {
                ticker.tick().await;

                let result = store
                    .compare_and_set(
                        &config.leader_path,
                        &self_address,
                        CasOptions {
                            ttl: Some(config.leader_entry_ttl.as_secs()),
                            prev_value: Some(self_address.clone()),
                            prev_exist: None,
                        },
                    )
                    .await;

                if sender.send(DiscoveryMsg::RefreshResult(result)).is_err() {
                    break;
                }
            }
        }));
    }

    /// Cancels the refresh timer and terminates the Seed-list FSM child, if either is running.
    fn leave_leader(&mut self) {
        if let Some(task) = self.refresh_task.take() {
            task.abort();
        }
        self.seed_list = None;
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::time::Duration;

    use pretty_assertions::assert_eq;
    use tokio::sync::watch;

    use super::*;
    use crate::gossip::MockMembership;
    use crate::store::MockStore;

    fn test_config() -> Config {
        let mut config = Config::new(vec!["http://localhost:2379".to_owned()], "/akka");
        config.etcd_retry_delay = Duration::from_millis(50);
        config.election_retry_delay = Duration::from_millis(50);
        config
    }

    /// Polls `rx` until it reports `target` or `timeout` elapses.
    async fn await_state(mut rx: watch::Receiver<State>, target: State, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if *rx.borrow() == target {
                return true;
            }
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return false;
            }
            if tokio::time::timeout(remaining, rx.changed()).await.is_err() {
                return false;
            }
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn fresh_bootstrap_becomes_leader() {
        let store = Arc::new(MockStore::new());
        let membership = Arc::new(MockMembership::new("node-a", HashSet::new()));

        let handle = DiscoveryFsm::spawn(test_config(), store.clone(), membership).unwrap();
        handle.start();

        assert!(
            await_state(handle.subscribe_state(), State::Leader, Duration::from_secs(1)).await,
            "expected Initial -> Election -> Leader"
        );
        assert_eq!(store.children_of("/akka/seeds"), std::collections::HashMap::new());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn existing_namespace_becomes_leader() {
        let store = Arc::new(MockStore::new());
        store.create_dir("/akka").await.unwrap();
        let membership = Arc::new(MockMembership::new("node-a", HashSet::new()));

        let handle = DiscoveryFsm::spawn(test_config(), store.clone(), membership).unwrap();
        handle.start();

        assert!(
            await_state(handle.subscribe_state(), State::Leader, Duration::from_secs(1)).await,
            "createDir's NodeExists should still lead to an election bid"
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn loses_election_and_joins_as_follower() {
        let store = Arc::new(MockStore::new());
        store
            .compare_and_set(
                "/akka/leader",
                "other-node",
                CasOptions {
                    ttl: Some(30),
                    prev_value: None,
                    prev_exist: Some(false),
                },
            )
            .await
            .unwrap();
        store.seed_child("/akka/seeds", "other-node");
        let membership = Arc::new(MockMembership::new("node-a", HashSet::new()));

        let handle = DiscoveryFsm::spawn(test_config(), store.clone(), membership.clone()).unwrap();
        handle.start();

        assert!(
            await_state(handle.subscribe_state(), State::Follower, Duration::from_secs(1)).await,
            "expected Election -> AwaitingSeedsFetch -> JoiningCluster -> Follower"
        );
        assert_eq!(membership.joins(), vec![vec!["other-node".to_owned()]]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn promotes_follower_once_departed_leader_key_is_gone() {
        let store = Arc::new(MockStore::new());
        store
            .compare_and_set(
                "/akka/leader",
                "other-node",
                CasOptions {
                    ttl: Some(30),
                    prev_value: None,
                    prev_exist: Some(false),
                },
            )
            .await
            .unwrap();
        store.seed_child("/akka/seeds", "other-node");
        let membership = Arc::new(MockMembership::new("node-a", HashSet::new()));

        let handle = DiscoveryFsm::spawn(test_config(), store.clone(), membership.clone()).unwrap();
        handle.start();

        assert!(
            await_state(handle.subscribe_state(), State::Follower, Duration::from_secs(1)).await,
            "precondition: node should settle as a follower first"
        );

        // Simulate the prior leader's lease expiring, then the gossip layer delivering the
        // documented edge-case hint that tells a follower to re-contend.
        store.delete("/akka/leader", false).await.unwrap();
        membership.emit(ClusterEvent::LeaderChanged(Some("node-a".to_owned())));

        assert!(
            await_state(handle.subscribe_state(), State::Leader, Duration::from_secs(1)).await,
            "expected the follower to re-enter Election and win now that the key is free"
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn retries_a_transient_election_failure() {
        let store = Arc::new(MockStore::new());
        store.create_dir("/akka").await.unwrap();
        store.fail_next(StoreError::Transport {
            source: etcd_client::Error::InvalidArgs("injected transient failure".to_owned()),
        });
        let membership = Arc::new(MockMembership::new("node-a", HashSet::new()));

        let handle = DiscoveryFsm::spawn(test_config(), store, membership).unwrap();
        handle.start();

        assert!(
            await_state(handle.subscribe_state(), State::Leader, Duration::from_millis(500)).await,
            "expected the failed compare_and_set to be retried after etcd_retry_delay"
        );
    }
}
