use std::sync::{Arc, Condvar, Mutex};

use thiserror::Error;

use crate::channel::{Channel, ChannelError, TrySendError};

/// Identifies one descriptor's slot inside a [`SelectGroup`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct SelectToken {
    index: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Direction {
    Send,
    Recv,
}

#[derive(Debug, Clone, Copy, Default)]
struct Entry {
    ready: bool,
    closed: bool,
}

/// Wakeup state shared between a [`Select`] and the channels it watches.
/// Channels push readiness updates in under their own state lock; the
/// selector parks on the condvar until any entry turns ready or closed.
#[derive(Debug, Clone, Default)]
pub(crate) struct SelectGroup {
    inner: Arc<SelectGroupInner>,
}

#[derive(Debug, Default)]
struct SelectGroupInner {
    entries: Mutex<Vec<Entry>>,
    cv: Condvar,
}

impl SelectGroup {
    fn add_slot(&self) -> SelectToken {
        let mut entries = self.inner.entries.lock().unwrap();
        entries.push(Entry::default());

        SelectToken {
            index: entries.len() - 1,
        }
    }

    pub(crate) fn set_ready(&self, token: SelectToken, ready: bool) {
        let mut entries = self.inner.entries.lock().unwrap();
        entries[token.index].ready = ready;

        if ready {
            self.inner.cv.notify_all();
        }
    }

    pub(crate) fn set_closed(&self, token: SelectToken) {
        let mut entries = self.inner.entries.lock().unwrap();
        entries[token.index].closed = true;

        self.inner.cv.notify_all();
    }

    pub(crate) fn ptr_eq(&self, other: &SelectGroup) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn clear(&self, token: SelectToken) {
        let mut entries = self.inner.entries.lock().unwrap();
        entries[token.index] = Entry::default();
    }

    fn wait_any(&self) {
        let entries = self.inner.entries.lock().unwrap();
        let _entries = self
            .inner
            .cv
            .wait_while(entries, |entries| {
                entries.iter().all(|e| !e.ready && !e.closed)
            })
            .unwrap();
    }
}

/// Resolution of a [`Select`] call.
#[derive(Debug, PartialEq, Eq)]
pub enum Selection<T> {
    /// The send descriptor at `index` delivered its value.
    Sent { index: usize },
    /// The receive descriptor at `index` produced `value`.
    Received { index: usize, value: T },
}

impl<T> Selection<T> {
    /// Position of the descriptor that resolved the select.
    pub fn index(&self) -> usize {
        match self {
            Selection::Sent { index } => *index,
            Selection::Received { index, .. } => *index,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectError {
    /// The channel of the descriptor at this index is closed.
    #[error("channel of select descriptor {0} is closed")]
    Closed(usize),

    /// No descriptor could complete without blocking.
    #[error("no select descriptor is ready")]
    NotReady,
}

enum OpKind<T> {
    Send(Option<T>),
    Recv,
}

impl<T> OpKind<T> {
    fn direction(&self) -> Direction {
        match self {
            OpKind::Send(_) => Direction::Send,
            OpKind::Recv => Direction::Recv,
        }
    }
}

struct Op<'a, T> {
    channel: &'a Channel<T>,
    token: SelectToken,
    kind: OpKind<T>,
    /// False once a send descriptor delivered and was unregistered.
    active: bool,
}

/// Performs the first send or receive, in list order, that can complete
/// without blocking across a set of channels.
///
/// Descriptors are registered with their channels when added and
/// unregistered when the `Select` drops. A closed channel counts as
/// immediately ready and resolves to [`SelectError::Closed`] with its
/// descriptor index rather than being skipped.
pub struct Select<'a, T> {
    group: SelectGroup,
    ops: Vec<Op<'a, T>>,
}

impl<'a, T> Default for Select<'a, T> {
    fn default() -> Self {
        Self {
            group: SelectGroup::default(),
            ops: vec![],
        }
    }
}

impl<'a, T> Select<'a, T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a receive descriptor; returns its index.
    pub fn recv(&mut self, channel: &'a Channel<T>) -> usize {
        self.add(channel, OpKind::Recv)
    }

    /// Adds a send descriptor carrying `value`; returns its index.
    pub fn send(&mut self, channel: &'a Channel<T>, value: T) -> usize {
        self.add(channel, OpKind::Send(Some(value)))
    }

    fn add(&mut self, channel: &'a Channel<T>, kind: OpKind<T>) -> usize {
        let token = self.group.add_slot();
        channel.register_watcher(kind.direction(), token, self.group.clone());

        self.ops.push(Op {
            channel,
            token,
            kind,
            active: true,
        });

        self.ops.len() - 1
    }

    /// Blocks until one descriptor completes (or reports its channel
    /// closed) and resolves it. Every pass attempts the descriptors in
    /// list order, so ties always resolve to the lowest index.
    pub fn select(&mut self) -> Result<Selection<T>, SelectError> {
        // Nothing left that could ever resolve: an empty list, or only
        // exhausted send descriptors.
        if self.ops.iter().all(|op| !op.active) {
            return Err(SelectError::NotReady);
        }

        loop {
            if let Some(selection) = self.scan()? {
                return Ok(selection);
            }
            self.group.wait_any();
        }
    }

    /// Like [`select`](Select::select) but never blocks; `NotReady` when no
    /// descriptor can complete right now.
    pub fn try_select(&mut self) -> Result<Selection<T>, SelectError> {
        match self.scan()? {
            Some(selection) => Ok(selection),
            None => Err(SelectError::NotReady),
        }
    }

    /// One non-blocking pass over all descriptors in list order.
    fn scan(&mut self) -> Result<Option<Selection<T>>, SelectError> {
        for (index, op) in self.ops.iter_mut().enumerate() {
            if !op.active {
                continue;
            }

            match &mut op.kind {
                OpKind::Recv => match op.channel.try_recv() {
                    Ok(value) => return Ok(Some(Selection::Received { index, value })),
                    Err(ChannelError::Empty) => {}
                    Err(ChannelError::Closed) => return Err(SelectError::Closed(index)),
                },
                OpKind::Send(slot) => {
                    let Some(value) = slot.take() else {
                        continue;
                    };

                    match op.channel.try_send(value) {
                        Ok(()) => {
                            // Exhausted: stop watching so a reused Select
                            // does not spin on this channel's readiness.
                            op.active = false;
                            op.channel
                                .unregister_watcher(Direction::Send, op.token, &self.group);
                            self.group.clear(op.token);

                            return Ok(Some(Selection::Sent { index }));
                        }
                        Err(TrySendError::Full(value)) => *slot = Some(value),
                        Err(TrySendError::Closed(value)) => {
                            *slot = Some(value);
                            return Err(SelectError::Closed(index));
                        }
                    }
                }
            }
        }

        Ok(None)
    }
}

impl<'a, T> Drop for Select<'a, T> {
    fn drop(&mut self) {
        for op in &self.ops {
            if op.active {
                op.channel
                    .unregister_watcher(op.kind.direction(), op.token, &self.group);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use anyhow::Result;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::capacity::Capacity;

    fn bounded<T>(slots: usize) -> Channel<T> {
        Channel::new(Capacity::from(slots))
    }

    #[test]
    fn test_select_second_ready() {
        let ch1 = bounded::<i32>(1);
        let ch2 = bounded::<i32>(1);

        ch2.try_send(20).unwrap();

        let mut select = Select::new();
        select.recv(&ch1);
        select.recv(&ch2);

        assert_eq!(
            select.select(),
            Ok(Selection::Received {
                index: 1,
                value: 20
            })
        );
        assert_eq!(select.try_select(), Err(SelectError::NotReady));
    }

    #[test]
    fn test_select_list_order_tie_break() {
        let ch1 = bounded::<i32>(1);
        let ch2 = bounded::<i32>(1);

        ch1.try_send(1).unwrap();
        ch2.try_send(2).unwrap();

        let mut select = Select::new();
        select.recv(&ch1);
        select.recv(&ch2);

        assert_eq!(select.select(), Ok(Selection::Received { index: 0, value: 1 }));
        assert_eq!(select.select(), Ok(Selection::Received { index: 1, value: 2 }));
    }

    #[test]
    fn test_select_send_descriptor() {
        let full = bounded::<i32>(1);
        let free = bounded::<i32>(1);

        full.try_send(0).unwrap();

        let mut select = Select::new();
        select.send(&full, 1);
        select.send(&free, 2);

        assert_eq!(select.select(), Ok(Selection::Sent { index: 1 }));
        assert_eq!(free.try_recv(), Ok(2));

        // The delivered descriptor is exhausted; the full one still waits.
        assert_eq!(select.try_select(), Err(SelectError::NotReady));
    }

    #[test]
    fn test_select_blocks_until_send() -> Result<()> {
        let ch1 = Arc::new(bounded::<i32>(1));
        let ch2 = Arc::new(bounded::<i32>(1));

        let handle = {
            let ch1 = ch1.clone();
            let ch2 = ch2.clone();
            thread::spawn(move || {
                let mut select = Select::new();
                select.recv(&ch1);
                select.recv(&ch2);
                select.select()
            })
        };

        thread::sleep(Duration::from_millis(50));
        ch2.send(42)?;

        assert_eq!(
            handle.join().unwrap(),
            Ok(Selection::Received {
                index: 1,
                value: 42
            })
        );
        Ok(())
    }

    #[test]
    fn test_select_wakes_on_close() {
        let ch = Arc::new(bounded::<i32>(1));

        let handle = {
            let ch = ch.clone();
            thread::spawn(move || {
                let mut select = Select::new();
                select.recv(&ch);
                select.select()
            })
        };

        thread::sleep(Duration::from_millis(50));
        ch.close().unwrap();

        assert_eq!(handle.join().unwrap(), Err(SelectError::Closed(0)));
    }

    #[test]
    fn test_select_closed_propagates_index() {
        let open = bounded::<i32>(1);
        let closed = bounded::<i32>(1);
        closed.close().unwrap();

        let mut select = Select::new();
        select.recv(&open);
        select.recv(&closed);

        assert_eq!(select.select(), Err(SelectError::Closed(1)));
        assert_eq!(select.try_select(), Err(SelectError::Closed(1)));
    }

    #[test]
    fn test_try_select_not_ready() {
        let ch = bounded::<i32>(1);

        let mut select = Select::new();
        select.recv(&ch);

        assert_eq!(select.try_select(), Err(SelectError::NotReady));

        ch.try_send(3).unwrap();
        assert_eq!(select.try_select(), Ok(Selection::Received { index: 0, value: 3 }));
    }

    #[test]
    fn test_empty_select_does_not_block() {
        let mut select = Select::<i32>::new();

        assert_eq!(select.select(), Err(SelectError::NotReady));
        assert_eq!(select.try_select(), Err(SelectError::NotReady));
    }

    #[test]
    fn test_select_recv_completes_rendezvous_sender() -> Result<()> {
        let ch = Arc::new(Channel::<i32>::rendezvous());

        let handle = {
            let ch = ch.clone();
            thread::spawn(move || ch.send(5))
        };

        thread::sleep(Duration::from_millis(50));

        let mut select = Select::new();
        select.recv(&ch);
        assert_eq!(select.select(), Ok(Selection::Received { index: 0, value: 5 }));

        assert_eq!(handle.join().unwrap(), Ok(()));
        Ok(())
    }

    #[test]
    fn test_drop_unregisters_watchers() {
        let ch = bounded::<i32>(1);

        {
            let mut select = Select::new();
            select.recv(&ch);
            assert_eq!(select.try_select(), Err(SelectError::NotReady));
        }

        // Channel keeps working once the selector is gone.
        ch.try_send(1).unwrap();
        assert_eq!(ch.try_recv(), Ok(1));
    }
}
