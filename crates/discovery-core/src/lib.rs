// SPDX-FileCopyrightText: Cluster Discovery Contributors
//
// SPDX-License-Identifier: EUPL-1.2

//! Etcd-backed rendezvous bootstrap and seed-list maintenance for peer-to-peer clusters.
//!
//! Two cooperating state machines, each its own `tokio`-spawned task: the [`discovery`] FSM drives
//! a node through bootstrap and leader-key tenure, and the [`seed_list`] FSM, owned by the current
//! leader, mirrors live cluster membership into the store's seed list. Both talk to the rendezvous
//! store only through the [`store::Store`] trait and to the cluster-membership gossip layer only
//! through the [`gossip::Membership`] trait; neither is implemented here (see `EtcdStore` for the
//! shipped store backend, and bring your own `Membership`).

pub mod config;
pub mod discovery;
pub mod error;
pub mod gossip;
pub mod seed_list;
pub mod store;

mod retry;
mod stash;

pub use config::Config;
pub use discovery::{DiscoveryFsm, DiscoveryHandle};
pub use error::{DiscoveryError, SeedListError};
pub use gossip::{ClusterEvent, Membership};
pub use seed_list::{SeedListFsm, SeedListHandle};
pub use store::{EtcdStore, Store};
