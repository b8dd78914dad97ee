//! First-in first-out ready queue

use std::collections::VecDeque;

use fiberpool_core::FiberId;

use super::ReadyQueue;

#[derive(Debug, Default)]
pub struct FifoQueue {
    ids: VecDeque<FiberId>,
}

impl FifoQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ReadyQueue for FifoQueue {
    #[inline]
    fn push(&mut self, id: FiberId) {
        self.ids.push_back(id);
    }

    #[inline]
    fn pop(&mut self) -> Option<FiberId> {
        self.ids.pop_front()
    }

    fn len(&self) -> usize {
        self.ids.len()
    }
}
