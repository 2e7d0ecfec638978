//! Bounded FIFO of pending events.

use heapless::Deque;
use log::trace;

use super::event::Event;
use crate::config::EVENT_QUEUE_CAPACITY;
use crate::error::{Error, Result};

pub struct EventQueue {
    events: Deque<Event, EVENT_QUEUE_CAPACITY>,
    accepted: u32,
}

impl EventQueue {
    pub const fn new() -> Self {
        Self {
            events: Deque::new(),
            accepted: 0,
        }
    }

    /// Append to the tail. Fails with [`Error::QueueFull`] instead of dropping;
    /// the caller decides whether to retry or discard.
    pub fn raise(&mut self, event: Event) -> Result<()> {
        let code = event.code();
        self.events.push_back(event).map_err(|_| Error::QueueFull)?;
        self.accepted = self.accepted.saturating_add(1);
        trace!("Queued {:?} ({} pending)", code, self.events.len());
        Ok(())
    }

    pub fn pop(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Total events accepted since boot.
    pub fn accepted(&self) -> u32 {
        self.accepted
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}
