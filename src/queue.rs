//! The three bounded FIFOs that carry commands in, events out, and stalled page
//! requests in both directions. §3 (Queues), §4.6.

use std::collections::VecDeque;

use crate::error::{Error, Result};
use crate::fault::FaultRecord;
use crate::types::{ContextId, StreamId};

/// A stalled-transaction page request, submitted when a stream in [`crate::types::FaultMode::Stall`]
/// takes a translation fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub stream: StreamId,
    pub context: ContextId,
    pub address: u64,
}

/// Everything that can appear on the event queue. §4.6.
#[derive(Debug, Clone)]
pub enum Event {
    Fault(FaultRecord),
    CommandSyncCompletion,
    PagePageRequest(PageRequest),
    InvalidationCompletion,
    ConfigurationError(String),
    InternalError(String),
}

/// A command submitted to the command queue. §4.6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    PrefetchConfig,
    PrefetchAddr,
    InvalidateSte(StreamId),
    InvalidateAllConfig,
    TlbiNhAll,
    TlbiEl2All,
    TlbiS12Vmall(StreamId),
    AtcInvalidate {
        stream: StreamId,
        context: ContextId,
        start: u64,
        end: u64,
    },
    PriResponse {
        stream: StreamId,
        context: ContextId,
        address: u64,
    },
    Resume(StreamId),
    /// A synchronization barrier: processing stops after emitting a
    /// [`Event::CommandSyncCompletion`] for this command.
    Sync,
}

/// A bounded FIFO that drops the oldest entry on overflow ("lossy"). Used for the event
/// and PRI queues.
#[derive(Debug)]
struct LossyQueue<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> LossyQueue<T> {
    fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
        }
    }

    fn push(&mut self, item: T) {
        if self.items.len() >= self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(item);
    }

    fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        while self.items.len() > self.capacity {
            self.items.pop_front();
        }
    }

    fn len(&self) -> usize {
        self.items.len()
    }

    fn clear(&mut self) {
        self.items.clear();
    }
}

/// Bounded FIFO of [`Event`]s. Overflow drops the oldest event.
#[derive(Debug)]
pub struct EventQueue {
    inner: LossyQueue<Event>,
}

impl EventQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: LossyQueue::new(capacity),
        }
    }

    pub fn push(&mut self, event: Event) {
        self.inner.push(event);
    }

    /// Returns every queued event and empties the queue.
    pub fn drain(&mut self) -> Vec<Event> {
        self.inner.items.drain(..).collect()
    }

    pub fn has_events(&self) -> bool {
        !self.inner.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.inner.clear();
    }

    pub fn set_capacity(&mut self, capacity: usize) {
        self.inner.set_capacity(capacity);
    }
}

/// Bounded, non-lossy FIFO of [`Command`]s: submission fails with [`Error::CommandQueueFull`]
/// at capacity rather than dropping anything.
#[derive(Debug)]
pub struct CommandQueue {
    items: VecDeque<Command>,
    capacity: usize,
}

impl CommandQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
        }
    }

    pub fn submit(&mut self, command: Command) -> Result<()> {
        if self.items.len() >= self.capacity {
            return Err(Error::CommandQueueFull);
        }
        self.items.push_back(command);
        Ok(())
    }

    /// Pops the next command in FIFO order, if any.
    pub fn pop_front(&mut self) -> Option<Command> {
        self.items.pop_front()
    }

    pub fn is_full(&self) -> bool {
        self.items.len() >= self.capacity
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        while self.items.len() > self.capacity {
            self.items.pop_front();
        }
    }

    pub fn snapshot(&self) -> Vec<Command> {
        self.items.iter().copied().collect()
    }
}

/// Bounded FIFO of [`PageRequest`]s. Overflow drops the oldest request.
#[derive(Debug)]
pub struct PriQueue {
    inner: LossyQueue<PageRequest>,
}

impl PriQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: LossyQueue::new(capacity),
        }
    }

    pub fn submit(&mut self, request: PageRequest) {
        self.inner.push(request);
    }

    pub fn pop_front(&mut self) -> Option<PageRequest> {
        self.inner.items.pop_front()
    }

    pub fn snapshot(&self) -> Vec<PageRequest> {
        self.inner.items.iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.inner.clear();
    }

    pub fn set_capacity(&mut self, capacity: usize) {
        self.inner.set_capacity(capacity);
    }
}
