//! The shared command buffer pair.

use tether_core::{BufferSpec, CommandPayload, ElementType};
use tether_shm::{naming, ClientBuffer, RegionManager};
use tracing::trace;

use crate::error::WireError;
use crate::queue::CommandQueue;

/// Size of the simulator's command buffer in bytes.
pub const DEFAULT_CAPACITY: usize = 1_048_576;

/// Owns the outgoing queue and the two buffers it is flushed into:
/// `command_buffer` (the document) and `command_bool` (the dirty flag).
pub struct CommandCenter {
    queue: CommandQueue,
    buffer: ClientBuffer,
    dirty: ClientBuffer,
    scratch: Vec<u8>,
}

impl CommandCenter {
    /// Map the command buffers and create an empty queue sized to fit them.
    pub fn new(regions: &mut RegionManager, capacity: usize) -> Result<Self, WireError> {
        let buffer =
            regions.allocate_client(naming::COMMAND_BUFFER, BufferSpec::vector(capacity, ElementType::I8))?;
        let dirty =
            regions.allocate_client(naming::COMMAND_BOOL, BufferSpec::vector(1, ElementType::Bool))?;
        dirty.set_flag(0, false);
        Ok(Self {
            queue: CommandQueue::new(capacity),
            buffer,
            dirty,
            scratch: Vec::new(),
        })
    }

    /// Queue a command for the next flush.
    pub fn enqueue(&mut self, payload: CommandPayload) -> Result<(), WireError> {
        self.queue.enqueue(payload)
    }

    /// Queue several commands, all or none.
    pub fn enqueue_all(
        &mut self,
        payloads: impl IntoIterator<Item = CommandPayload>,
    ) -> Result<(), WireError> {
        self.queue.enqueue_all(payloads)
    }

    /// Write the queued document into the command buffer, raise the
    /// dirty flag, and clear the queue. Returns the bytes written; an
    /// empty queue writes nothing and returns 0.
    ///
    /// # Errors
    ///
    /// [`WireError::CapacityExceeded`] if the document does not fit; the
    /// buffer, the flag and the queue are then left untouched.
    pub fn flush(&mut self) -> Result<usize, WireError> {
        if self.queue.is_empty() {
            return Ok(0);
        }
        let capacity = self.buffer.spec().byte_len();
        let required = self.queue.framed_len();
        if required > capacity {
            return Err(self.overflow(required, capacity));
        }
        self.queue.encode_into(&mut self.scratch);
        if !self.buffer.write_bytes(0, &self.scratch) {
            return Err(self.overflow(self.scratch.len(), capacity));
        }
        self.dirty.set_flag(0, true);
        let n = self.queue.clear();
        trace!(commands = n, bytes = self.scratch.len(), "flushed command buffer");
        Ok(self.scratch.len())
    }

    fn overflow(&self, required: usize, capacity: usize) -> WireError {
        WireError::CapacityExceeded {
            command: self
                .queue
                .pending()
                .last()
                .map_or("CustomCommand", CommandPayload::type_name),
            required,
            capacity,
        }
    }

    /// Lower the dirty flag once the simulator has consumed a flush.
    pub fn acknowledge(&mut self) {
        self.dirty.set_flag(0, false);
    }

    /// Whether a flushed document is waiting for the simulator.
    pub fn is_dirty(&self) -> bool {
        self.dirty.byte(0).is_some_and(|b| b != 0)
    }

    /// Drop every queued command without writing it.
    pub fn discard(&mut self) -> usize {
        self.queue.clear()
    }

    /// Number of queued commands.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// `true` if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Queued commands, oldest first.
    pub fn pending(&self) -> impl Iterator<Item = &CommandPayload> {
        self.queue.pending()
    }

    /// The command buffer contents.
    pub fn buffer_bytes(&self) -> &[u8] {
        self.buffer.as_bytes()
    }
}

impl std::fmt::Debug for CommandCenter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandCenter")
            .field("queue", &self.queue)
            .field("dirty", &self.is_dirty())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::decode;
    use tether_shm::ShmConfig;

    fn center(dir: &tempfile::TempDir, capacity: usize) -> (RegionManager, CommandCenter) {
        let mut regions = RegionManager::new(ShmConfig::with_root(dir.path()), "wire").unwrap();
        let c = CommandCenter::new(&mut regions, capacity).unwrap();
        (regions, c)
    }

    fn checksum(bytes: &[u8]) -> u64 {
        bytes
            .iter()
            .fold(0xcbf2_9ce4_8422_2325u64, |h, b| (h ^ u64::from(*b)).wrapping_mul(0x100_0000_01b3))
    }

    #[test]
    fn flush_writes_document_and_raises_flag() {
        let dir = tempfile::tempdir().unwrap();
        let (_regions, mut c) = center(&dir, DEFAULT_CAPACITY);
        c.enqueue(CommandPayload::RenderViewport { render: true }).unwrap();
        let n = c.flush().unwrap();
        assert!(n > 0);
        assert!(c.is_dirty());
        assert!(c.is_empty());
        let cmds = decode(c.buffer_bytes()).unwrap();
        assert_eq!(cmds[0].kind, "RenderViewport");
        c.acknowledge();
        assert!(!c.is_dirty());
    }

    #[test]
    fn empty_flush_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let (_regions, mut c) = center(&dir, 256);
        assert_eq!(c.flush().unwrap(), 0);
        assert!(!c.is_dirty());
        assert!(c.buffer_bytes().iter().all(|b| *b == 0));
    }

    #[test]
    fn oversized_command_never_touches_the_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let (_regions, mut c) = center(&dir, 256);
        c.enqueue(CommandPayload::RenderQuality { quality: 2 }).unwrap();
        c.flush().unwrap();
        c.acknowledge();
        let before = checksum(c.buffer_bytes());

        let huge = CommandPayload::Custom {
            name: "Big".into(),
            numbers: vec![1.0; 100],
            strings: vec![],
        };
        assert!(matches!(c.enqueue(huge), Err(WireError::CapacityExceeded { .. })));
        assert_eq!(c.flush().unwrap(), 0);
        assert_eq!(checksum(c.buffer_bytes()), before);
        assert!(!c.is_dirty());
    }

    #[test]
    fn discard_drops_queue() {
        let dir = tempfile::tempdir().unwrap();
        let (_regions, mut c) = center(&dir, 4096);
        c.enqueue(CommandPayload::RenderQuality { quality: 0 }).unwrap();
        c.enqueue(CommandPayload::RenderQuality { quality: 1 }).unwrap();
        assert_eq!(c.discard(), 2);
        assert_eq!(c.flush().unwrap(), 0);
    }
}
