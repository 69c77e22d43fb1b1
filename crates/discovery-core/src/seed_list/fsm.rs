// SPDX-FileCopyrightText: Cluster Discovery Contributors
//
// SPDX-License-Identifier: EUPL-1.2

//! Leader-only reconciliation of cluster membership against the persisted seed list.
//!
//! A single task owns a mailbox and an explicit state, issues store operations by spawning a task
//! that replies into its own mailbox, and never has more than one store operation in flight.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::config::Config;
use crate::error::SeedListError;
use crate::retry::schedule_retry;
use crate::stash::Stash;
use crate::store::{Address, Store, StoreError, StoreKey};

use super::messages::{Command, EtcdOutcome, SeedListMsg};

/// Seed-list FSM states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    AwaitingInitialState,
    AwaitingRegisteredSeeds,
    AwaitingCommand,
    AwaitingEtcdReply,
}

/// A cloneable reference to a running Seed-list FSM. Dropping every clone of the handle closes the
/// mailbox and lets the FSM's task exit.
#[derive(Clone)]
pub struct SeedListHandle {
    sender: mpsc::UnboundedSender<SeedListMsg>,
}

impl SeedListHandle {
    pub fn send(&self, msg: SeedListMsg) {
        // The receiving task only ever disappears because the Discovery FSM already dropped this
        // handle; a failed send here is therefore not a protocol error.
        let _ = self.sender.send(msg);
    }

    pub fn seed(&self, members: HashSet<Address>) {
        self.send(SeedListMsg::InitialState(members));
    }

    pub fn member_added(&self, address: Address) {
        self.send(SeedListMsg::Command(Command::MemberAdded(address)));
    }

    pub fn member_removed(&self, address: Address) {
        self.send(SeedListMsg::Command(Command::MemberRemoved(address)));
    }
}

/// Leader-only FSM that mirrors live cluster membership into the store's seed list.
pub struct SeedListFsm<S: Store> {
    store: Arc<S>,
    config: Arc<Config>,
    mailbox: mpsc::UnboundedReceiver<SeedListMsg>,
    self_sender: mpsc::UnboundedSender<SeedListMsg>,
    state: State,
    current_seeds: HashSet<Address>,
    /// address -> the store key holding that address, once reconciled.
    address_mapping: HashMap<Address, StoreKey>,
    pending_command: Option<Command>,
    stash: Stash<Command>,
}

impl<S: Store> SeedListFsm<S> {
    /// Validates `config` before spawning. Prefer this entry point when embedding a Seed-list FSM
    /// directly rather than through [`crate::discovery::DiscoveryFsm`], which validates once
    /// up front and then uses [`Self::spawn`].
    pub fn try_spawn(config: Config, store: Arc<S>) -> Result<SeedListHandle, SeedListError> {
        config.validate()?;
        Ok(Self::spawn(Arc::new(config), store))
    }

    /// Spawns a new Seed-list FSM and returns a handle to it. The FSM stays in
    /// `AwaitingInitialState` until [`SeedListHandle::seed`] is called.
    pub fn spawn(config: Arc<Config>, store: Arc<S>) -> SeedListHandle {
        let (tx, rx) = mpsc::unbounded_channel();

        let fsm = Self {
            store,
            config,
            mailbox: rx,
            self_sender: tx.clone(),
            state: State::AwaitingInitialState,
            current_seeds: HashSet::new(),
            address_mapping: HashMap::new(),
            pending_command: None,
            stash: Stash::new(),
        };

        tokio::spawn(fsm.run());

        SeedListHandle { sender: tx }
    }

    async fn run(mut self) {
        while let Some(msg) = self.mailbox.recv().await {
            self.handle(msg).await;
        }

        log::debug!("seed-list FSM mailbox closed, exiting");
    }

    async fn handle(&mut self, msg: SeedListMsg) {
        match msg {
            SeedListMsg::InitialState(members) => {
                if self.state == State::AwaitingInitialState {
                    self.current_seeds = members;
                    self.fetch_registered_seeds();
                } else {
                    log::debug!("ignoring stale InitialState in state {:?}", self.state);
                }
            }
            SeedListMsg::Command(cmd) => self.handle_command(cmd),
            SeedListMsg::RegisteredSeedsFetched(result) => {
                if self.state == State::AwaitingRegisteredSeeds {
                    self.handle_registered_seeds(result);
                } else {
                    log::debug!("ignoring stale RegisteredSeedsFetched in state {:?}", self.state);
                }
            }
            SeedListMsg::EtcdReply(result) => {
                if self.state == State::AwaitingEtcdReply {
                    self.handle_etcd_reply(result);
                } else {
                    log::debug!("ignoring stale EtcdReply in state {:?}", self.state);
                }
            }
        }
    }

    fn fetch_registered_seeds(&mut self) {
        self.state = State::AwaitingRegisteredSeeds;

        let store = self.store.clone();
        let seeds_path = self.config.seeds_path.clone();
        let sender = self.self_sender.clone();

        tokio::spawn(async move {
            let result = store.get(&seeds_path, true, false).await;
            let _ = sender.send(SeedListMsg::RegisteredSeedsFetched(result));
        });
    }

    /// Reconciles the registered (`R`) set against the live (`current_seeds`, `C`) set: members in
    /// `C \ R` are added, members in `R \ C` are removed. Real stash contents are replayed before
    /// these synthetic deltas, since they reflect events that genuinely arrived earlier.
    fn handle_registered_seeds(&mut self, result: Result<crate::store::Node, StoreError>) {
        match result {
            Ok(node) => {
                let mut registered = HashMap::new();
                for child in node.children {
                    if let Some(value) = child.value {
                        registered.insert(value, child.key);
                    }
                }
                let r_set: HashSet<Address> = registered.keys().cloned().collect();
                let to_add: Vec<Address> = self.current_seeds.difference(&r_set).cloned().collect();
                let to_remove: Vec<Address> = r_set.difference(&self.current_seeds).cloned().collect();

                self.address_mapping = registered;
                self.state = State::AwaitingCommand;
                self.unstash();

                for address in to_add {
                    self.handle_command(Command::MemberAdded(address));
                }
                for address in to_remove {
                    self.handle_command(Command::MemberRemoved(address));
                }
            }
            Err(err) if !err.is_unexpected(&[StoreError::key_not_found_discriminant()]) => {
                let to_add: Vec<Address> = self.current_seeds.iter().cloned().collect();

                self.address_mapping.clear();
                self.state = State::AwaitingCommand;
                self.unstash();

                for address in to_add {
                    self.handle_command(Command::MemberAdded(address));
                }
            }
            Err(err) => {
                log::warn!(
                    "failed to fetch registered seeds ({err}), retrying in {:?}",
                    self.config.etcd_retry_delay
                );
                let current = self.current_seeds.clone();
                schedule_retry(
                    self.config.etcd_retry_delay,
                    self.self_sender.clone(),
                    SeedListMsg::InitialState(current),
                );
                self.state = State::AwaitingInitialState;
            }
        }
    }

    fn handle_command(&mut self, cmd: Command) {
        if self.state != State::AwaitingCommand {
            if !self.stash.push(cmd) {
                log::error!("seed-list stash is full, dropping a membership event");
            }
            return;
        }

        self.dispatch(cmd);
    }

    fn dispatch(&mut self, cmd: Command) {
        match &cmd {
            Command::MemberAdded(address) => {
                let store = self.store.clone();
                let seeds_path = self.config.seeds_path.clone();
                let sender = self.self_sender.clone();
                let address = address.clone();

                self.pending_command = Some(cmd);
                self.state = State::AwaitingEtcdReply;

                tokio::spawn(async move {
                    let result = store.create(&seeds_path, &address).await;
                    let outcome = result.map(|key| EtcdOutcome::Created { address, key });
                    let _ = sender.send(SeedListMsg::EtcdReply(outcome));
                });
            }
            Command::MemberRemoved(address) => {
                let Some(key) = self.address_mapping.get(address).cloned() else {
                    log::debug!("member {address} already absent from seed list, ignoring removal");
                    return;
                };

                let store = self.store.clone();
                let sender = self.self_sender.clone();
                let address = address.clone();

                self.pending_command = Some(cmd);
                self.state = State::AwaitingEtcdReply;

                tokio::spawn(async move {
                    let result = store.delete(&key, false).await;
                    let outcome = result.map(|_| EtcdOutcome::Deleted { address });
                    let _ = sender.send(SeedListMsg::EtcdReply(outcome));
                });
            }
        }
    }

    fn handle_etcd_reply(&mut self, result: Result<EtcdOutcome, StoreError>) {
        match result {
            Ok(EtcdOutcome::Created { address, key }) => {
                self.address_mapping.insert(address, key);
            }
            Ok(EtcdOutcome::Deleted { address }) => {
                self.address_mapping.remove(&address);
            }
            Err(err) => {
                log::warn!(
                    "seed-list store operation failed ({err}), retrying in {:?}",
                    self.config.etcd_retry_delay
                );
                if let Some(cmd) = self.pending_command.clone() {
                    schedule_retry(
                        self.config.etcd_retry_delay,
                        self.self_sender.clone(),
                        SeedListMsg::Command(cmd),
                    );
                }
            }
        }

        self.pending_command = None;
        self.state = State::AwaitingCommand;
        self.unstash();
    }

    /// Replays stashed commands in arrival order. Only the first can actually dispatch; any further
    /// ones re-stash themselves through `handle_command`, preserving the single-in-flight invariant.
    fn unstash(&mut self) {
        let pending: Vec<Command> = self.stash.drain().collect();
        for cmd in pending {
            self.handle_command(cmd);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::store::MockStore;

    fn config() -> Arc<Config> {
        Arc::new(Config::new(vec!["http://localhost:2379".to_owned()], "/akka"))
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn reconciles_fresh_member_into_empty_seed_list() {
        let store = Arc::new(MockStore::new());
        let handle = SeedListFsm::spawn(config(), store.clone());

        handle.seed(HashSet::from(["node-a".to_owned()]));

        tokio::time::sleep(Duration::from_millis(50)).await;

        let children = store.children_of("/akka/seeds");
        assert_eq!(children.values().collect::<Vec<_>>(), vec!["node-a"]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn removes_member_no_longer_registered() {
        let store = Arc::new(MockStore::new());
        store.seed_child("/akka/seeds", "node-stale");
        let handle = SeedListFsm::spawn(config(), store.clone());

        handle.seed(HashSet::new());

        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(store.children_of("/akka/seeds").is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn reconciles_mixed_add_and_remove_against_registered_seeds() {
        let store = Arc::new(MockStore::new());
        store.seed_child("/akka/seeds", "B");
        store.seed_child("/akka/seeds", "C");
        let handle = SeedListFsm::spawn(config(), store.clone());

        handle.seed(HashSet::from(["A".to_owned(), "B".to_owned()]));

        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut addresses: Vec<_> = store.children_of("/akka/seeds").into_values().collect();
        addresses.sort();
        assert_eq!(
            addresses,
            vec!["A".to_owned(), "B".to_owned()],
            "A (in current_seeds but not registered) should be created, C (registered but not \
             current) should be deleted, and B (in both) should be left untouched"
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn serializes_concurrent_commands_through_the_stash() {
        let store = Arc::new(MockStore::new());
        let handle = SeedListFsm::spawn(config(), store.clone());

        handle.seed(HashSet::new());
        handle.member_added("node-a".to_owned());
        handle.member_added("node-b".to_owned());

        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut addresses: Vec<_> = store.children_of("/akka/seeds").into_values().collect();
        addresses.sort();
        assert_eq!(addresses, vec!["node-a", "node-b"]);
    }
}
