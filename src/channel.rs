use std::num::NonZero;
use std::sync::{Condvar, Mutex};

use log::{debug, error};
use thiserror::Error;

use crate::buffer::Buffer;
use crate::capacity::Capacity;
use crate::select::{Direction, SelectGroup, SelectToken};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChannelError {
    #[error("the channel is closed")]
    Closed,

    #[error("no data available in channel")]
    Empty,
}

/// Error returned by [`Channel::send`], handing the undelivered value back.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("sending on a closed channel")]
pub struct SendError<T>(pub T);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TrySendError<T> {
    #[error("the channel is full")]
    Full(T),

    #[error("the channel is closed")]
    Closed(T),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DestroyError {
    #[error("destroy called on a channel that is still open")]
    StillOpen,

    #[error("the channel was already destroyed")]
    AlreadyDestroyed,
}

/// A thread-safe FIFO channel with a capacity fixed at creation.
///
/// One mutex guards the buffer and the liveness flag; senders park on
/// `not_full`, receivers on `not_empty`, and [`close`](Channel::close)
/// broadcasts on everything so parked threads re-check liveness and fail
/// with [`ChannelError::Closed`]. Share it between threads behind an `Arc`.
#[derive(Debug)]
pub struct Channel<T> {
    capacity: Capacity,
    state: Mutex<State<T>>,
    /// Senders wait here for a free buffer or exchange slot.
    not_full: Condvar,
    /// Receivers wait here for data.
    not_empty: Condvar,
    /// A rendezvous sender waits here until its deposit is consumed.
    handoff: Condvar,
}

#[derive(Debug)]
struct State<T> {
    buffer: Buffer<T>,
    /// Rendezvous slot: the item currently offered by a sender.
    exchange: Option<T>,
    /// Receivers parked in `recv`. Gates non-blocking rendezvous sends.
    recv_waiting: usize,
    /// Total items accepted (buffer or exchange slot).
    pushed: u64,
    /// Total items handed out to receivers.
    popped: u64,
    alive: bool,
    destroyed: bool,
    recv_watchers: Vec<(SelectToken, SelectGroup)>,
    send_watchers: Vec<(SelectToken, SelectGroup)>,
}

impl<T> Channel<T> {
    /// Creates a channel. `Capacity::Rendezvous` gives an unbuffered
    /// channel where a send completes only once a receive takes the value.
    pub fn new(capacity: Capacity) -> Self {
        Self {
            capacity,
            state: Mutex::new(State {
                buffer: Buffer::new(capacity),
                exchange: None,
                recv_waiting: 0,
                pushed: 0,
                popped: 0,
                alive: true,
                destroyed: false,
                recv_watchers: vec![],
                send_watchers: vec![],
            }),
            not_full: Condvar::default(),
            not_empty: Condvar::default(),
            handoff: Condvar::default(),
        }
    }

    pub fn bounded(slots: NonZero<usize>) -> Self {
        Self::new(Capacity::Bounded(slots))
    }

    pub fn rendezvous() -> Self {
        Self::new(Capacity::Rendezvous)
    }

    /// Blocking send. Returns once `value` is durably enqueued (bounded) or
    /// consumed by a receiver (rendezvous); fails with the value handed
    /// back once the channel is closed.
    pub fn send(&self, value: T) -> Result<(), SendError<T>> {
        match self.capacity {
            Capacity::Rendezvous => self.send_rendezvous(value),
            Capacity::Bounded(_) => self.send_bounded(value),
        }
    }

    fn send_bounded(&self, value: T) -> Result<(), SendError<T>> {
        let state = self.state.lock().unwrap();
        let mut state = self
            .not_full
            .wait_while(state, |s| s.alive && s.buffer.is_full())
            .unwrap();

        if !state.alive {
            return Err(SendError(value));
        }

        match state.buffer.try_push(value) {
            Ok(()) => {}
            Err(value) => {
                // The wait predicate guarantees a free slot.
                error!("buffer rejected a push although a slot was free");
                debug_assert!(false, "buffer rejected a push although a slot was free");
                return Err(SendError(value));
            }
        }
        debug_assert!(state.buffer.len() <= state.buffer.capacity());

        state.pushed += 1;
        self.not_empty.notify_one();
        self.sync_watchers(&state);

        Ok(())
    }

    fn send_rendezvous(&self, value: T) -> Result<(), SendError<T>> {
        let state = self.state.lock().unwrap();
        let mut state = self
            .not_full
            .wait_while(state, |s| s.alive && s.exchange.is_some())
            .unwrap();

        if !state.alive {
            return Err(SendError(value));
        }

        state.exchange = Some(value);
        state.pushed += 1;
        let ticket = state.pushed;

        self.not_empty.notify_one();
        self.sync_watchers(&state);

        // Wait until a receiver has taken our item.
        state = self
            .handoff
            .wait_while(state, |s| s.alive && s.popped < ticket)
            .unwrap();

        if state.popped >= ticket {
            return Ok(());
        }

        // Closed before the handoff completed; the slot still holds our item.
        match state.exchange.take() {
            Some(value) => {
                self.sync_watchers(&state);
                Err(SendError(value))
            }
            // Drained by destroy while we were parked: a caller sequencing
            // error, nothing left to hand back.
            None => Ok(()),
        }
    }

    /// Blocking receive. Fails with [`ChannelError::Closed`] once the
    /// channel is closed, even if undelivered items remain (close discards
    /// them).
    pub fn recv(&self) -> Result<T, ChannelError> {
        match self.capacity {
            Capacity::Rendezvous => self.recv_rendezvous(),
            Capacity::Bounded(_) => self.recv_bounded(),
        }
    }

    fn recv_bounded(&self) -> Result<T, ChannelError> {
        let state = self.state.lock().unwrap();
        let mut state = self
            .not_empty
            .wait_while(state, |s| s.alive && s.buffer.is_empty())
            .unwrap();

        if !state.alive {
            return Err(ChannelError::Closed);
        }

        // The wait predicate guarantees data.
        let value = state.buffer.try_pop().unwrap();
        state.popped += 1;
        self.not_full.notify_one();
        self.sync_watchers(&state);

        Ok(value)
    }

    fn recv_rendezvous(&self) -> Result<T, ChannelError> {
        let mut state = self.state.lock().unwrap();

        state.recv_waiting += 1;
        // A committed receiver makes non-blocking sends possible.
        self.sync_watchers(&state);

        state = self
            .not_empty
            .wait_while(state, |s| s.alive && s.exchange.is_none())
            .unwrap();

        state.recv_waiting -= 1;

        if !state.alive {
            self.sync_watchers(&state);
            return Err(ChannelError::Closed);
        }

        let value = state.exchange.take().unwrap();
        state.popped += 1;
        self.handoff.notify_all();
        self.not_full.notify_one();
        self.sync_watchers(&state);

        Ok(value)
    }

    /// Non-blocking send; never suspends the calling thread.
    pub fn try_send(&self, value: T) -> Result<(), TrySendError<T>> {
        let mut state = self.state.lock().unwrap();

        if !state.alive {
            return Err(TrySendError::Closed(value));
        }

        match self.capacity {
            Capacity::Rendezvous => {
                // Deliverable only if a receiver is already committed.
                if state.exchange.is_none() && state.recv_waiting > 0 {
                    state.exchange = Some(value);
                    state.pushed += 1;
                    self.not_empty.notify_one();
                    self.sync_watchers(&state);
                    Ok(())
                } else {
                    Err(TrySendError::Full(value))
                }
            }
            Capacity::Bounded(_) => match state.buffer.try_push(value) {
                Ok(()) => {
                    state.pushed += 1;
                    self.not_empty.notify_one();
                    self.sync_watchers(&state);
                    Ok(())
                }
                Err(value) => Err(TrySendError::Full(value)),
            },
        }
    }

    /// Non-blocking receive; never suspends the calling thread.
    pub fn try_recv(&self) -> Result<T, ChannelError> {
        let mut state = self.state.lock().unwrap();

        if !state.alive {
            return Err(ChannelError::Closed);
        }

        let value = match state.exchange.take() {
            Some(value) => {
                // Completes a parked rendezvous sender.
                self.handoff.notify_all();
                value
            }
            None => state.buffer.try_pop().ok_or(ChannelError::Empty)?,
        };

        state.popped += 1;
        self.not_full.notify_one();
        self.sync_watchers(&state);

        Ok(value)
    }

    /// Closes the channel. Every later operation fails with the closed
    /// error, and every parked sender, receiver, and selector is woken to
    /// observe the closure. A second close fails with
    /// [`ChannelError::Closed`].
    pub fn close(&self) -> Result<(), ChannelError> {
        let mut state = self.state.lock().unwrap();

        if !state.alive {
            return Err(ChannelError::Closed);
        }

        state.alive = false;

        let undelivered = state.buffer.len() + state.exchange.is_some() as usize;
        if undelivered > 0 {
            debug!("channel closed with {undelivered} undelivered item(s)");
        }

        self.not_full.notify_all();
        self.not_empty.notify_all();
        self.handoff.notify_all();

        for (token, group) in state.recv_watchers.iter().chain(state.send_watchers.iter()) {
            group.set_closed(*token);
        }

        Ok(())
    }

    /// Releases everything the channel still holds. Valid only after a
    /// successful [`close`](Channel::close); the caller must ensure no
    /// other operation runs concurrently.
    pub fn destroy(&self) -> Result<(), DestroyError> {
        let mut state = self.state.lock().unwrap();

        if state.alive {
            return Err(DestroyError::StillOpen);
        }
        if state.destroyed {
            return Err(DestroyError::AlreadyDestroyed);
        }

        let dropped = state.buffer.len() + state.exchange.is_some() as usize;
        if dropped > 0 {
            debug!("destroying channel with {dropped} undelivered item(s)");
        }

        state.destroyed = true;
        state.exchange = None;
        state.buffer.clear();
        state.recv_watchers.clear();
        state.send_watchers.clear();

        Ok(())
    }

    pub fn capacity(&self) -> usize {
        self.capacity.slots()
    }

    /// Items currently held (buffered plus an occupied exchange slot).
    pub fn len(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.buffer.len() + state.exchange.is_some() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity.slots()
    }

    pub fn is_closed(&self) -> bool {
        !self.state.lock().unwrap().alive
    }

    /// Recomputes per-direction readiness and pushes it to every registered
    /// selector. Called after every state mutation, inside the state lock.
    fn sync_watchers(&self, state: &State<T>) {
        if state.recv_watchers.is_empty() && state.send_watchers.is_empty() {
            return;
        }

        let recv_ready = state.alive && (state.exchange.is_some() || !state.buffer.is_empty());
        let send_ready = state.alive
            && match self.capacity {
                Capacity::Rendezvous => state.exchange.is_none() && state.recv_waiting > 0,
                Capacity::Bounded(_) => !state.buffer.is_full(),
            };

        for (token, group) in &state.recv_watchers {
            group.set_ready(*token, recv_ready);
        }
        for (token, group) in &state.send_watchers {
            group.set_ready(*token, send_ready);
        }
    }

    pub(crate) fn register_watcher(
        &self,
        direction: Direction,
        token: SelectToken,
        group: SelectGroup,
    ) {
        let mut state = self.state.lock().unwrap();

        if !state.alive {
            group.set_closed(token);
        }

        match direction {
            Direction::Recv => state.recv_watchers.push((token, group)),
            Direction::Send => state.send_watchers.push((token, group)),
        }

        self.sync_watchers(&state);
    }

    pub(crate) fn unregister_watcher(
        &self,
        direction: Direction,
        token: SelectToken,
        group: &SelectGroup,
    ) {
        let mut state = self.state.lock().unwrap();

        let watchers = match direction {
            Direction::Recv => &mut state.recv_watchers,
            Direction::Send => &mut state.send_watchers,
        };
        watchers.retain(|(tk, g)| !(*tk == token && g.ptr_eq(group)));
    }
}
