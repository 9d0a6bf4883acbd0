//! Shared buffers between the IDE-facing API and the worker loops
//!
//! Each buffer owns its own lock and no lock is held across a blocking wait.
//! A slot is filled and emptied under the lock in a single step.

use crate::bridge::types::{
    next_auto_id, slot_for, CorrelationEntry, ParsedResponse, ASYNC_BASE, SYNC_WINDOW,
    TABLE_SLOTS,
};
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Bounded FIFO of outbound commands
#[derive(Debug)]
pub struct CommandBuffer {
    queue: Mutex<VecDeque<String>>,
    wake: Condvar,
    capacity: usize,
}

impl CommandBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            wake: Condvar::new(),
            capacity,
        }
    }

    /// Queue a command. Returns false when the queue is full.
    pub fn push(&self, command: &str) -> bool {
        let mut queue = lock(&self.queue);
        if queue.len() >= self.capacity {
            return false;
        }
        queue.push_back(command.to_string());
        drop(queue);
        self.wake.notify_one();
        true
    }

    /// Pop a command, waiting up to `timeout` for one to arrive
    pub fn pop_timeout(&self, timeout: Duration) -> Option<String> {
        let queue = lock(&self.queue);
        let (mut queue, _) = self
            .wake
            .wait_timeout_while(queue, timeout, |q| q.is_empty())
            .unwrap_or_else(PoisonError::into_inner);
        queue.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.queue).is_empty()
    }

    pub fn len(&self) -> usize {
        lock(&self.queue).len()
    }

    pub fn clear(&self) {
        lock(&self.queue).clear();
    }
}

#[derive(Debug)]
struct CorrelationSlots {
    slots: Vec<Option<CorrelationEntry>>,
    pending: usize,
}

/// Pending commands keyed by folded sequence id
#[derive(Debug)]
pub struct CorrelationBuffer {
    inner: Mutex<CorrelationSlots>,
}

impl CorrelationBuffer {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(CorrelationSlots {
                slots: vec![None; TABLE_SLOTS],
                pending: 0,
            }),
        }
    }

    /// Record a pending command. Fails if its slot is still occupied.
    pub fn insert(&self, entry: CorrelationEntry) -> bool {
        let mut inner = lock(&self.inner);
        let slot = slot_for(entry.seq_id);
        if inner.slots[slot].is_some() {
            return false;
        }
        inner.slots[slot] = Some(entry);
        inner.pending += 1;
        true
    }

    /// Consume the entry for `seq_id`, if any
    pub fn take(&self, seq_id: u32) -> Option<CorrelationEntry> {
        let mut inner = lock(&self.inner);
        let entry = inner.slots[slot_for(seq_id)].take();
        if entry.is_some() {
            inner.pending -= 1;
        }
        entry
    }

    pub fn pending(&self) -> usize {
        lock(&self.inner).pending
    }

    pub fn is_empty(&self) -> bool {
        self.pending() == 0
    }

    pub fn clear(&self) {
        let mut inner = lock(&self.inner);
        inner.slots.iter_mut().for_each(|slot| *slot = None);
        inner.pending = 0;
    }
}

impl Default for CorrelationBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
struct OutputSlots {
    slots: Vec<Option<ParsedResponse>>,
    /// Next asynchronous slot handed to the IDE
    async_out: u32,
}

/// Parsed responses waiting for the IDE.
///
/// Slots below 50 hold synchronous responses addressed by sequence id. The
/// remaining slots form a ring that is filled and drained in the same order.
#[derive(Debug)]
pub struct OutputBuffer {
    inner: Mutex<OutputSlots>,
    async_ready: Condvar,
}

impl OutputBuffer {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(OutputSlots {
                slots: vec![None; TABLE_SLOTS],
                async_out: ASYNC_BASE,
            }),
            async_ready: Condvar::new(),
        }
    }

    /// Store a response in `slot_id`'s slot. Hands the response back if the
    /// slot has not been consumed yet.
    pub fn publish(
        &self,
        slot_id: u32,
        response: ParsedResponse,
    ) -> std::result::Result<(), ParsedResponse> {
        let mut inner = lock(&self.inner);
        let slot = slot_for(slot_id);
        if inner.slots[slot].is_some() {
            return Err(response);
        }
        inner.slots[slot] = Some(response);
        drop(inner);
        if slot_id >= SYNC_WINDOW {
            self.async_ready.notify_all();
        }
        Ok(())
    }

    /// Take the synchronous response for `seq_id`
    pub fn take_sync(&self, seq_id: u32) -> Option<ParsedResponse> {
        if seq_id >= SYNC_WINDOW {
            return None;
        }
        lock(&self.inner).slots[seq_id as usize].take()
    }

    /// Take the next asynchronous response, waiting up to `timeout` for it
    pub fn wait_async(&self, timeout: Duration) -> Option<ParsedResponse> {
        let inner = lock(&self.inner);
        let (mut inner, _) = self
            .async_ready
            .wait_timeout_while(inner, timeout, |inner| {
                inner.slots[slot_for(inner.async_out)].is_none()
            })
            .unwrap_or_else(PoisonError::into_inner);
        Self::take_async_locked(&mut inner)
    }

    fn take_async_locked(inner: &mut OutputSlots) -> Option<ParsedResponse> {
        let slot = slot_for(inner.async_out);
        let response = inner.slots[slot].take()?;
        inner.async_out = next_auto_id(inner.async_out);
        Some(response)
    }

    pub fn clear(&self) {
        let mut inner = lock(&self.inner);
        inner.slots.iter_mut().for_each(|slot| *slot = None);
        inner.async_out = ASYNC_BASE;
    }
}

impl Default for OutputBuffer {
    fn default() -> Self {
        Self::new()
    }
}
