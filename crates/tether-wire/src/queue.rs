//! Bounded, size-accounted command queue.

use tether_core::CommandPayload;

use crate::encode::{encode_command, frame, framed_len};
use crate::error::WireError;

struct Entry {
    payload: CommandPayload,
    bytes: Vec<u8>,
}

/// Insertion-ordered queue of outgoing commands.
///
/// Each command is encoded when it is queued and the encoding cached, so
/// the framed size of the whole document is always known. The queue
/// never holds more than `capacity` framed bytes.
pub struct CommandQueue {
    entries: Vec<Entry>,
    body_len: usize,
    capacity: usize,
}

impl CommandQueue {
    /// Create a queue whose framed document may not exceed `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::new(),
            body_len: 0,
            capacity,
        }
    }

    /// Maximum framed size in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a command.
    ///
    /// # Errors
    ///
    /// [`WireError::CapacityExceeded`] if the framed document would no
    /// longer fit, [`WireError::NonFiniteParameter`] for NaN or infinite
    /// floats. The queue is unchanged on error.
    pub fn enqueue(&mut self, payload: CommandPayload) -> Result<(), WireError> {
        let bytes = encode_command(&payload)?;
        let required = framed_len(self.entries.len() + 1, self.body_len + bytes.len());
        if required > self.capacity {
            return Err(WireError::CapacityExceeded {
                command: payload.type_name(),
                required,
                capacity: self.capacity,
            });
        }
        self.body_len += bytes.len();
        self.entries.push(Entry { payload, bytes });
        Ok(())
    }

    /// Append several commands, all or none.
    ///
    /// # Errors
    ///
    /// As [`enqueue`](Self::enqueue), for the first command that fails;
    /// `CapacityExceeded` reports the size of the whole batch. The queue
    /// is unchanged on error.
    pub fn enqueue_all(
        &mut self,
        payloads: impl IntoIterator<Item = CommandPayload>,
    ) -> Result<(), WireError> {
        let mut batch = Vec::new();
        let mut body_len = self.body_len;
        for payload in payloads {
            let bytes = encode_command(&payload)?;
            body_len += bytes.len();
            batch.push(Entry { payload, bytes });
        }
        let Some(first) = batch.first() else {
            return Ok(());
        };
        let required = framed_len(self.entries.len() + batch.len(), body_len);
        if required > self.capacity {
            return Err(WireError::CapacityExceeded {
                command: first.payload.type_name(),
                required,
                capacity: self.capacity,
            });
        }
        self.body_len = body_len;
        self.entries.extend(batch);
        Ok(())
    }

    /// Number of queued commands.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Framed size of the current contents, sentinel included.
    pub fn framed_len(&self) -> usize {
        framed_len(self.entries.len(), self.body_len)
    }

    /// Queued commands, oldest first.
    pub fn pending(&self) -> impl Iterator<Item = &CommandPayload> {
        self.entries.iter().map(|e| &e.payload)
    }

    /// Write the framed document into `out` (replacing its contents).
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.reserve(self.framed_len());
        frame(self.entries.iter().map(|e| e.bytes.as_slice()), out);
    }

    /// Drop every queued command, returning how many were dropped.
    pub fn clear(&mut self) -> usize {
        let n = self.entries.len();
        self.entries.clear();
        self.body_len = 0;
        n
    }
}

impl std::fmt::Debug for CommandQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandQueue")
            .field("len", &self.entries.len())
            .field("framed_len", &self.framed_len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::encode;
    use proptest::prelude::*;

    fn custom(n: usize) -> CommandPayload {
        CommandPayload::Custom {
            name: "Pad".into(),
            numbers: vec![],
            strings: vec!["x".repeat(n)],
        }
    }

    #[test]
    fn preserves_insertion_order() {
        let mut q = CommandQueue::new(4096);
        q.enqueue(CommandPayload::RenderQuality { quality: 1 }).unwrap();
        q.enqueue(CommandPayload::RenderViewport { render: true }).unwrap();
        let kinds: Vec<_> = q.pending().map(|p| p.type_name()).collect();
        assert_eq!(kinds, vec!["AdjustRenderQuality", "RenderViewport"]);
    }

    #[test]
    fn refusal_leaves_queue_untouched() {
        let mut q = CommandQueue::new(128);
        q.enqueue(custom(10)).unwrap();
        let before = q.framed_len();
        match q.enqueue(custom(200)) {
            Err(WireError::CapacityExceeded {
                required, capacity, ..
            }) => {
                assert!(required > capacity);
                assert_eq!(capacity, 128);
            }
            other => panic!("expected CapacityExceeded, got {other:?}"),
        }
        assert_eq!(q.len(), 1);
        assert_eq!(q.framed_len(), before);
    }

    #[test]
    fn batch_is_all_or_nothing() {
        let mut q = CommandQueue::new(1024);
        q.enqueue(custom(10)).unwrap();
        match q.enqueue_all([custom(10), custom(10), custom(2000)]) {
            Err(WireError::CapacityExceeded { command, .. }) => assert_eq!(command, "CustomCommand"),
            other => panic!("expected CapacityExceeded, got {other:?}"),
        }
        assert_eq!(q.len(), 1);

        let nan = CommandPayload::Custom {
            name: "Bad".into(),
            numbers: vec![f64::NAN],
            strings: vec![],
        };
        match q.enqueue_all([custom(1), nan]) {
            Err(WireError::NonFiniteParameter { .. }) => {}
            other => panic!("expected NonFiniteParameter, got {other:?}"),
        }
        assert_eq!(q.len(), 1);

        q.enqueue_all([custom(1), custom(2)]).unwrap();
        assert_eq!(q.len(), 3);
        q.enqueue_all(Vec::new()).unwrap();
        assert_eq!(q.len(), 3);
    }

    #[test]
    fn clear_reports_dropped_count() {
        let mut q = CommandQueue::new(4096);
        q.enqueue(custom(1)).unwrap();
        q.enqueue(custom(2)).unwrap();
        assert_eq!(q.clear(), 2);
        assert!(q.is_empty());
        assert_eq!(q.framed_len(), framed_len(0, 0));
    }

    proptest! {
        #[test]
        fn framed_len_tracks_encoding(sizes in proptest::collection::vec(0usize..64, 0..20)) {
            let mut q = CommandQueue::new(usize::MAX);
            let mut all = Vec::new();
            for n in &sizes {
                q.enqueue(custom(*n)).unwrap();
                all.push(custom(*n));
            }
            let mut out = Vec::new();
            q.encode_into(&mut out);
            prop_assert_eq!(out.len(), q.framed_len());
            prop_assert_eq!(out, encode(&all).unwrap());
        }

        #[test]
        fn never_exceeds_capacity(capacity in 16usize..512, sizes in proptest::collection::vec(0usize..128, 1..30)) {
            let mut q = CommandQueue::new(capacity);
            for n in sizes {
                let _ = q.enqueue(custom(n));
                if !q.is_empty() {
                    prop_assert!(q.framed_len() <= capacity);
                }
            }
        }
    }
}
