// SPDX-FileCopyrightText: Cluster Discovery Contributors
//
// SPDX-License-Identifier: EUPL-1.2

//! Narrow interface onto the cluster-membership gossip layer.
//!
//! The gossip layer itself is implemented elsewhere; both FSMs depend on it only through
//! [`Membership`], the same pattern used for every other injected collaborator in this crate (a
//! trait plus a cloneable handle where the implementation needs one).

use std::collections::HashSet;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::store::Address;

/// Events the gossip layer delivers about cluster membership and leadership.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterEvent {
    MemberUp(Address),
    MemberRemoved(Address),
    LeaderChanged(Option<Address>),
}

/// What the discovery protocol needs from the cluster-membership gossip layer.
#[async_trait]
pub trait Membership: Send + Sync + 'static {
    /// A stable address identifying this node.
    fn self_address(&self) -> Address;

    /// The members currently known to be up, used to seed the Seed-list FSM on leader entry.
    fn current_members(&self) -> HashSet<Address>;

    /// Subscribe to `MemberUp`/`MemberRemoved`/`LeaderChanged` events.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<ClusterEvent>;

    /// Trigger cluster formation toward the given seed nodes.
    async fn join(&self, seeds: Vec<Address>);
}

#[cfg(any(test, feature = "test-util"))]
pub use mock::MockMembership;

#[cfg(any(test, feature = "test-util"))]
mod mock {
    use std::sync::Mutex;

    use tokio::sync::mpsc;

    use super::*;

    /// Deterministic [`Membership`] test double: events are delivered by calling [`MockMembership::emit`],
    /// and every `join()` call is recorded for assertions.
    pub struct MockMembership {
        self_address: Address,
        members: Mutex<HashSet<Address>>,
        subscribers: Mutex<Vec<mpsc::UnboundedSender<ClusterEvent>>>,
        joins: Mutex<Vec<Vec<Address>>>,
    }

    impl MockMembership {
        pub fn new(self_address: impl Into<Address>, members: HashSet<Address>) -> Self {
            Self {
                self_address: self_address.into(),
                members: Mutex::new(members),
                subscribers: Mutex::new(Vec::new()),
                joins: Mutex::new(Vec::new()),
            }
        }

        /// Deliver `event` to every current subscriber.
        pub fn emit(&self, event: ClusterEvent) {
            match &event {
                ClusterEvent::MemberUp(addr) => {
                    self.members.lock().unwrap().insert(addr.clone());
                }
                ClusterEvent::MemberRemoved(addr) => {
                    self.members.lock().unwrap().remove(addr);
                }
                ClusterEvent::LeaderChanged(_) => {}
            }

            self.subscribers
                .lock()
                .unwrap()
                .retain(|tx| tx.send(event.clone()).is_ok());
        }

        /// The seed lists passed to every `join()` call so far, in order.
        pub fn joins(&self) -> Vec<Vec<Address>> {
            self.joins.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Membership for MockMembership {
        fn self_address(&self) -> Address {
            self.self_address.clone()
        }

        fn current_members(&self) -> HashSet<Address> {
            self.members.lock().unwrap().clone()
        }

        fn subscribe(&self) -> mpsc::UnboundedReceiver<ClusterEvent> {
            let (tx, rx) = mpsc::unbounded_channel();
            self.subscribers.lock().unwrap().push(tx);
            rx
        }

        async fn join(&self, seeds: Vec<Address>) {
            self.joins.lock().unwrap().push(seeds);
        }
    }
}
