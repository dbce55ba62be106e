//! Thread-safe bounded and rendezvous channels with explicit close
//! semantics and a multi-channel select.
//!
//! A [`Channel`] couples fixed-capacity ring-buffer storage with one mutex
//! and condition variables: senders park while the buffer is full,
//! receivers park while it is empty, and [`Channel::close`] wakes every
//! parked thread with [`ChannelError::Closed`]. A capacity of zero gives a
//! rendezvous channel where a send completes only once a receive has taken
//! the value. [`Select`] performs the first ready send or receive among a
//! list of channels, blocking until one becomes ready.
//!
//! ```
//! use std::sync::Arc;
//! use std::thread;
//!
//! use ringchannel::{Capacity, Channel};
//!
//! let ch = Arc::new(Channel::new(Capacity::from(2usize)));
//!
//! let sender = ch.clone();
//! let handle = thread::spawn(move || {
//!     sender.send(42).unwrap();
//! });
//!
//! assert_eq!(ch.recv(), Ok(42));
//! handle.join().unwrap();
//! ```

mod buffer;
mod capacity;
mod channel;
mod select;

pub use capacity::Capacity;
pub use channel::{Channel, ChannelError, DestroyError, SendError, TrySendError};
pub use select::{Select, SelectError, Selection};
