// SPDX-FileCopyrightText: Cluster Discovery Contributors
//
// SPDX-License-Identifier: EUPL-1.2

//! Minimal [`Membership`] adapter for the standalone binary.
//!
//! The cluster-membership gossip layer itself lives outside this workspace: a real deployment
//! wires `discovery-core` to whatever gossip protocol the host application already runs (`foca`,
//! `chitchat`, or similar) and feeds its `MemberUp`/`MemberRemoved`/`LeaderChanged` events into the
//! FSM. This binary ships only a static stand-in so the wiring is exercisable end-to-end: the
//! "known peers" passed on the command line are the one-shot snapshot handed to the Seed-list FSM
//! on leader entry, and `join` just logs the seeds a real gossip layer would have been told to
//! contact.

use std::collections::HashSet;

use async_trait::async_trait;
use discovery_core::store::Address;
use discovery_core::{ClusterEvent, Membership};
use tokio::sync::mpsc;

pub struct StaticMembership {
    self_address: Address,
    known_peers: HashSet<Address>,
}

impl StaticMembership {
    pub fn new(self_address: Address, known_peers: Vec<Address>) -> Self {
        let mut members: HashSet<Address> = known_peers.into_iter().collect();
        members.insert(self_address.clone());

        Self {
            self_address,
            known_peers: members,
        }
    }
}

#[async_trait]
impl Membership for StaticMembership {
    fn self_address(&self) -> Address {
        self.self_address.clone()
    }

    fn current_members(&self) -> HashSet<Address> {
        self.known_peers.clone()
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<ClusterEvent> {
        // No live gossip feed is wired up, so there is nothing to forward; dropping the sender
        // immediately closes the channel and the Discovery FSM's forwarding task exits quietly.
        let (_tx, rx) = mpsc::unbounded_channel();
        rx
    }

    async fn join(&self, seeds: Vec<Address>) {
        log::info!(
            "would join cluster via {} seed(s) (no gossip layer wired up): {seeds:?}",
            seeds.len()
        );
    }
}
