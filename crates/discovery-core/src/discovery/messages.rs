// SPDX-FileCopyrightText: Cluster Discovery Contributors
//
// SPDX-License-Identifier: EUPL-1.2

use crate::gossip::ClusterEvent;
use crate::store::{Node, StoreError};

/// Messages the Discovery FSM's mailbox accepts. Every reply to a spawned store/membership call is
/// self-delivered through one of these, so the FSM itself never awaits I/O directly.
#[derive(Debug)]
pub enum DiscoveryMsg {
    /// External kick-off signal.
    Start,
    /// Reply to `createDir(etcdPath)`.
    CreateDirDone(Result<(), StoreError>),
    /// Re-attempt the election bid (the triggering message for a transient `Election` failure).
    RetryElection,
    /// Reply to `compareAndSet(leaderPath, ..., prevExist=false)`.
    ElectionResult(Result<(), StoreError>),
    /// Re-attempt the seed fetch (the triggering message for a transient fetch failure).
    RetryFetchSeeds,
    /// Reply to `get(seedsPath)`.
    SeedsFetched(Result<Node, StoreError>),
    /// The membership layer's `join(seeds)` call has returned.
    JoinCompleted,
    /// Reply to the periodic leader-key refresh `compareAndSet`.
    RefreshResult(Result<(), StoreError>),
    /// An event forwarded from the membership layer's subscription.
    Cluster(ClusterEvent),
}

/// Discovery FSM states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Initial,
    Election,
    AwaitingSeedsFetch,
    JoiningCluster,
    Follower,
    Leader,
}
