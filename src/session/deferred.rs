use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

/// Commands held back until the state machine reaches a given state
///
/// Each target state has its own FIFO; draining a state replays its commands
/// in arrival order.
#[derive(Debug)]
pub struct DeferredQueue<S, C> {
    queues: HashMap<S, VecDeque<C>>,
}

impl<S, C> Default for DeferredQueue<S, C> {
    fn default() -> Self {
        Self {
            queues: HashMap::new(),
        }
    }
}

impl<S: Copy + Eq + Hash, C> DeferredQueue<S, C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn defer(&mut self, target: S, command: C) {
        self.queues.entry(target).or_default().push_back(command);
    }

    /// Next command waiting for `state`, oldest first
    pub fn pop(&mut self, state: S) -> Option<C> {
        self.queues.get_mut(&state)?.pop_front()
    }

    /// Drop everything, returning the discarded commands
    pub fn clear(&mut self) -> Vec<C> {
        self.queues
            .drain()
            .flat_map(|(_, queue)| queue)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.queues.values().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
