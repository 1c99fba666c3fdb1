//! Region manager errors.

use std::io;
use std::path::PathBuf;

use tether_core::BufferSpec;
use thiserror::Error;

/// Errors from mapping or releasing shared regions.
///
/// [`NameCollision`](ShmError::NameCollision) and
/// [`NamespaceExhausted`](ShmError::NamespaceExhausted) are fatal and
/// never retried: neither can be fixed by trying again.
#[derive(Debug, Error)]
pub enum ShmError {
    /// A region with this name already exists with a different size,
    /// typically left behind by a crashed instance with the same uuid.
    #[error("region '{name}' at {path:?} already exists with {found} bytes, expected {expected}")]
    NameCollision {
        /// Buffer name.
        name: String,
        /// Backing file.
        path: PathBuf,
        /// Size found on disk.
        found: u64,
        /// Size this allocation needs.
        expected: u64,
    },
    /// The platform's shared-memory namespace is out of space or handles.
    #[error("shared-memory namespace exhausted while mapping '{name}': {source}")]
    NamespaceExhausted {
        /// Buffer name.
        name: String,
        /// The OS error.
        #[source]
        source: io::Error,
    },
    /// A buffer name was allocated twice with different descriptors.
    #[error("region '{name}' is {existing}, requested {requested}")]
    ShapeMismatch {
        /// Buffer name.
        name: String,
        /// Descriptor it was first allocated with.
        existing: BufferSpec,
        /// Descriptor of the conflicting request.
        requested: BufferSpec,
    },
    /// The descriptor describes a zero-byte buffer.
    #[error("region '{name}' would be empty ({spec})")]
    EmptyRegion {
        /// Buffer name.
        name: String,
        /// The empty descriptor.
        spec: BufferSpec,
    },
    /// The configured root is not a directory.
    #[error("shared-memory root {root:?} is not a directory")]
    InvalidRoot {
        /// The configured root.
        root: PathBuf,
    },
    /// Any other I/O failure.
    #[error("shared-memory I/O on {path:?} failed: {source}")]
    Io {
        /// Backing file.
        path: PathBuf,
        /// The OS error.
        #[source]
        source: io::Error,
    },
}

impl ShmError {
    /// `true` for a request the manager refused without touching the
    /// namespace: a conflicting descriptor for a live name, or an empty
    /// one.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::ShapeMismatch { .. } | Self::EmptyRegion { .. })
    }

    /// Classify an OS error from creating or sizing `path`.
    pub(crate) fn from_io(name: &str, path: PathBuf, source: io::Error) -> Self {
        if is_exhaustion(&source) {
            Self::NamespaceExhausted {
                name: name.to_string(),
                source,
            }
        } else {
            Self::Io { path, source }
        }
    }
}

#[cfg(unix)]
fn is_exhaustion(e: &io::Error) -> bool {
    matches!(
        e.raw_os_error(),
        Some(libc::ENOSPC | libc::EMFILE | libc::ENFILE | libc::ENOMEM)
    )
}

#[cfg(not(unix))]
fn is_exhaustion(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::StorageFull | io::ErrorKind::OutOfMemory
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn enospc_is_exhaustion() {
        let e = ShmError::from_io(
            "RESET",
            PathBuf::from("/dev/shm/x"),
            io::Error::from_raw_os_error(libc::ENOSPC),
        );
        assert!(matches!(e, ShmError::NamespaceExhausted { .. }));
    }

    #[test]
    fn permission_denied_is_plain_io() {
        let e = ShmError::from_io(
            "RESET",
            PathBuf::from("/dev/shm/x"),
            io::Error::from(io::ErrorKind::PermissionDenied),
        );
        assert!(matches!(e, ShmError::Io { .. }));
    }
}
