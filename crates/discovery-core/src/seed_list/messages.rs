// SPDX-FileCopyrightText: Cluster Discovery Contributors
//
// SPDX-License-Identifier: EUPL-1.2

use std::collections::HashSet;

use crate::store::{Address, Node, StoreError, StoreKey};

/// A mutation the Seed-list FSM must eventually reflect in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    MemberAdded(Address),
    MemberRemoved(Address),
}

/// Outcome of a store mutation dispatched while `AwaitingEtcdReply`.
#[derive(Debug)]
pub enum EtcdOutcome {
    Created { address: Address, key: StoreKey },
    Deleted { address: Address },
}

/// Messages the Seed-list FSM's mailbox accepts.
#[derive(Debug)]
pub enum SeedListMsg {
    /// The cluster-membership snapshot the FSM was seeded with on leader entry.
    InitialState(HashSet<Address>),
    /// A membership delta, either from the owning Discovery FSM or replayed from the stash.
    Command(Command),
    /// Reply to the reconciling `get(seeds_path)` issued on entry to `AwaitingRegisteredSeeds`.
    RegisteredSeedsFetched(Result<Node, StoreError>),
    /// Reply to the `create`/`delete` issued on entry to `AwaitingEtcdReply`.
    EtcdReply(Result<EtcdOutcome, StoreError>),
}
