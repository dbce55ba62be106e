use std::num::NonZero;

/// Capacity of a channel, fixed at creation.
///
/// `Rendezvous` is the unbuffered case: a send completes only once a
/// receive has taken the value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capacity {
    Rendezvous,
    Bounded(NonZero<usize>),
}

impl Capacity {
    /// Number of buffer slots (0 for rendezvous).
    pub fn slots(&self) -> usize {
        match self {
            Capacity::Rendezvous => 0,
            Capacity::Bounded(n) => n.get(),
        }
    }
}

impl<T> From<T> for Capacity
where
    T: Into<usize>,
{
    fn from(value: T) -> Self {
        let value: usize = value.into();
        match NonZero::new(value) {
            Some(n) => Capacity::Bounded(n),
            None => Capacity::Rendezvous,
        }
    }
}
