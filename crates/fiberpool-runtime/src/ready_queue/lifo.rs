//! Last-in first-out ready queue
//!
//! The scheduler drains a snapshot of the queue per pass, so a fiber that
//! keeps yielding still cannot starve the others.

use fiberpool_core::FiberId;

use super::ReadyQueue;

#[derive(Debug, Default)]
pub struct LifoQueue {
    ids: Vec<FiberId>,
}

impl LifoQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ReadyQueue for LifoQueue {
    #[inline]
    fn push(&mut self, id: FiberId) {
        self.ids.push(id);
    }

    #[inline]
    fn pop(&mut self) -> Option<FiberId> {
        self.ids.pop()
    }

    fn len(&self) -> usize {
        self.ids.len()
    }
}
