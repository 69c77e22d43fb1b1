// SPDX-FileCopyrightText: Cluster Discovery Contributors
//
// SPDX-License-Identifier: EUPL-1.2

//! Discovery FSM: drives a single node through bootstrap, leadership contention, and leader-key
//! tenure.

mod fsm;
mod messages;

pub use fsm::{DiscoveryFsm, DiscoveryHandle};
pub use messages::{DiscoveryMsg, State};
