//! Ready queue abstraction for fiber scheduling
//!
//! The scheduler keeps runnable fiber ids in a `ReadyQueue`. Which one is
//! used decides the order fibers resume in.
//!
//! # Implementations
//! - `FifoQueue` - resume in the order fibers became ready (default)
//! - `LifoQueue` - resume the most recently readied fiber first

mod fifo;
mod lifo;

pub use fifo::FifoQueue;
pub use lifo::LifoQueue;

use std::fmt;

use fiberpool_core::FiberId;

/// Trait for ready queue implementations
///
/// The scheduler owns its queue on a single thread, so implementations
/// need not be `Send` or `Sync`.
pub trait ReadyQueue {
    /// Mark a fiber runnable
    fn push(&mut self, id: FiberId);

    /// Next fiber to resume, if any
    fn pop(&mut self) -> Option<FiberId>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Selects the `ReadyQueue` implementation a scheduler is built with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadyPolicy {
    #[default]
    Fifo,
    Lifo,
}

impl ReadyPolicy {
    /// Parse `fifo` / `lifo` (any case)
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fifo" => Some(ReadyPolicy::Fifo),
            "lifo" => Some(ReadyPolicy::Lifo),
            _ => None,
        }
    }

    pub fn build(self) -> Box<dyn ReadyQueue> {
        match self {
            ReadyPolicy::Fifo => Box::new(FifoQueue::new()),
            ReadyPolicy::Lifo => Box::new(LifoQueue::new()),
        }
    }
}

impl fmt::Display for ReadyPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadyPolicy::Fifo => write!(f, "fifo"),
            ReadyPolicy::Lifo => write!(f, "lifo"),
        }
    }
}
