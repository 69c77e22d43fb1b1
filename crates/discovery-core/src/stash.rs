// SPDX-FileCopyrightText: Cluster Discovery Contributors
//
// SPDX-License-Identifier: EUPL-1.2

//! Event-stashing buffer.
//!
//! Messages that arrive while a store operation is in flight are held here in arrival order and
//! drained back onto the front of the mailbox once the FSM re-enters an accepting state.

use std::collections::VecDeque;

/// Fail fast rather than grow without bound if churn outpaces the store.
pub const MAX_STASHED: usize = 10_000;

#[derive(Debug, Default)]
pub struct Stash<T> {
    buffer: VecDeque<T>,
}

impl<T> Stash<T> {
    pub fn new() -> Self {
        Self {
            buffer: VecDeque::new(),
        }
    }

    /// Stashes `item`. Returns `false` (and drops `item`) if the stash is already at capacity.
    #[must_use]
    pub fn push(&mut self, item: T) -> bool {
        if self.buffer.len() >= MAX_STASHED {
            return false;
        }

        self.buffer.push_back(item);
        true
    }

    /// Drains all stashed items in arrival order.
    pub fn drain(&mut self) -> impl Iterator<Item = T> + '_ {
        self.buffer.drain(..)
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drains_in_arrival_order() {
        let mut stash = Stash::new();
        assert!(stash.push(1));
        assert!(stash.push(2));
        assert!(stash.push(3));

        assert_eq!(stash.drain().collect::<Vec<_>>(), vec![1, 2, 3]);
        assert!(stash.is_empty());
    }

    #[test]
    fn refuses_past_capacity() {
        let mut stash: Stash<u32> = Stash::new();
        for i in 0..MAX_STASHED {
            assert!(stash.push(i as u32));
        }

        assert!(!stash.push(u32::MAX));
        assert_eq!(stash.len(), MAX_STASHED);
    }
}
