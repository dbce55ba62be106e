use ringbuffer::{AllocRingBuffer, RingBuffer};

use crate::capacity::Capacity;

/// Fixed-capacity FIFO slot storage for a channel. Not synchronized; the
/// channel serializes every access behind its own mutex.
#[derive(Debug)]
pub(crate) struct Buffer<T> {
    // No storage at all in the rendezvous case.
    buf: Option<AllocRingBuffer<T>>,
    capacity: usize,
}

impl<T> Buffer<T> {
    pub fn new(capacity: Capacity) -> Self {
        match capacity {
            Capacity::Rendezvous => Self {
                buf: None,
                capacity: 0,
            },
            Capacity::Bounded(n) => Self {
                buf: Some(AllocRingBuffer::new(n.get())),
                capacity: n.get(),
            },
        }
    }

    /// Enqueues `value`, handing it back when no slot is free.
    pub fn try_push(&mut self, value: T) -> Result<(), T> {
        match &mut self.buf {
            Some(buf) if !buf.is_full() => {
                buf.push(value);
                Ok(())
            }
            _ => Err(value),
        }
    }

    pub fn try_pop(&mut self) -> Option<T> {
        self.buf.as_mut().and_then(|buf| buf.dequeue())
    }

    pub fn len(&self) -> usize {
        self.buf.as_ref().map_or(0, |buf| buf.len())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() == self.capacity
    }

    pub fn clear(&mut self) {
        while self.try_pop().is_some() {}
    }
}
