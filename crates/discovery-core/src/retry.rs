// SPDX-FileCopyrightText: Cluster Discovery Contributors
//
// SPDX-License-Identifier: EUPL-1.2

//! Single-shot retry timer.
//!
//! A retry is just a detached task that sleeps and then re-delivers the triggering message to the
//! FSM's own mailbox. It needs no cancellation handle: once the owning task (and its mailbox
//! receiver) is dropped, the `send` below fails silently and the sleeping task exits on its next
//! poll, so a retry firing after the FSM has already terminated is harmless.

use std::time::Duration;

use rand::Rng;
use tokio::sync::mpsc;

/// Fraction of `delay` applied as random jitter, so that many nodes hitting the same outage don't
/// all retry in lock-step against the store.
const JITTER_FRACTION: f64 = 0.2;

fn jittered(delay: Duration) -> Duration {
    let jitter = delay.mul_f64(rand::thread_rng().gen_range(0.0..JITTER_FRACTION));
    delay + jitter
}

/// Re-delivers `msg` to `sender` after `delay` plus a small random jitter, unless the receiving
/// end is gone by then.
pub fn schedule_retry<M>(delay: Duration, sender: mpsc::UnboundedSender<M>, msg: M)
where
    M: Send + 'static,
{
    let delay = jittered(delay);
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let _ = sender.send(msg);
    });
}
