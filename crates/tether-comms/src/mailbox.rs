//! Single-slot, read-clears message storage.

/// Holds at most one message. Reading takes it.
#[derive(Clone, Debug, PartialEq)]
pub struct Mailbox<T>(Option<T>);

impl<T> Default for Mailbox<T> {
    fn default() -> Self {
        Self(None)
    }
}

impl<T> Mailbox<T> {
    /// An empty mailbox.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `msg`, returning any message it displaced.
    pub fn put(&mut self, msg: T) -> Option<T> {
        self.0.replace(msg)
    }

    /// Take the message, leaving the mailbox empty.
    pub fn try_take(&mut self) -> Option<T> {
        self.0.take()
    }

    /// Look without taking.
    pub fn peek(&self) -> Option<&T> {
        self.0.as_ref()
    }

    /// `true` if a message is waiting.
    pub fn is_full(&self) -> bool {
        self.0.is_some()
    }

    /// Drop any waiting message.
    pub fn clear(&mut self) -> Option<T> {
        self.0.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_clears() {
        let mut m = Mailbox::new();
        m.put(7);
        assert_eq!(m.try_take(), Some(7));
        assert_eq!(m.try_take(), None);
    }

    #[test]
    fn put_displaces() {
        let mut m = Mailbox::new();
        assert_eq!(m.put(1), None);
        assert_eq!(m.put(2), Some(1));
        assert_eq!(m.peek(), Some(&2));
        assert!(m.is_full());
    }
}
