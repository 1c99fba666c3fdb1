//! Typed handles onto mapped regions.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tether_core::{BufferSpec, ElementType};

use crate::cleanup::CleanupGuard;
use crate::raw::Mapping;

/// One mapped region. Shared by every handle allocated under its name.
pub(crate) struct Region {
    pub(crate) name: String,
    pub(crate) path: PathBuf,
    pub(crate) spec: BufferSpec,
    pub(crate) map: Mapping,
    pub(crate) _cleanup: Option<CleanupGuard>,
}

macro_rules! common_reads {
    () => {
        /// Buffer name.
        pub fn name(&self) -> &str {
            &self.0.name
        }

        /// Backing-file path.
        pub fn path(&self) -> &Path {
            &self.0.path
        }

        /// Shape and element type.
        pub fn spec(&self) -> &BufferSpec {
            &self.0.spec
        }

        /// Raw bytes, copied.
        pub fn to_bytes(&self) -> Vec<u8> {
            self.as_bytes().to_vec()
        }

        /// Borrow the raw bytes.
        pub fn as_bytes(&self) -> &[u8] {
            self.0.map.slice::<u8>()
        }

        /// Read one byte.
        pub fn byte(&self, index: usize) -> Option<u8> {
            self.as_bytes().get(index).copied()
        }

        /// Borrow as `f32` elements, `None` unless the element type is `F32`.
        pub fn as_f32(&self) -> Option<&[f32]> {
            (self.0.spec.element == ElementType::F32).then(|| self.0.map.slice::<f32>())
        }

        /// Borrow as `f64` elements, `None` unless the element type is `F64`.
        pub fn as_f64(&self) -> Option<&[f64]> {
            (self.0.spec.element == ElementType::F64).then(|| self.0.map.slice::<f64>())
        }

        /// Borrow as `i32` elements, `None` unless the element type is `I32`.
        pub fn as_i32(&self) -> Option<&[i32]> {
            (self.0.spec.element == ElementType::I32).then(|| self.0.map.slice::<i32>())
        }

        /// Copy out `f32` elements, `None` unless the element type is `F32`.
        pub fn to_f32_vec(&self) -> Option<Vec<f32>> {
            if self.0.spec.element != ElementType::F32 {
                return None;
            }
            let mut out = vec![0.0f32; self.0.spec.len()];
            self.0.map.read(0, &mut out).then_some(out)
        }
    };
}

// ── ClientBuffer ──────────────────────────────────────────────────

/// A buffer this process writes and the simulator reads.
#[derive(Clone)]
pub struct ClientBuffer(pub(crate) Arc<Region>);

impl ClientBuffer {
    common_reads!();

    /// Write bytes at `offset`. Returns `false` (writing nothing) when
    /// the range does not fit.
    pub fn write_bytes(&self, offset: usize, bytes: &[u8]) -> bool {
        self.0.map.write(offset, bytes)
    }

    /// Set one byte.
    pub fn set_byte(&self, index: usize, value: u8) -> bool {
        self.0.map.write(index, &[value])
    }

    /// Set a `Bool` element.
    pub fn set_flag(&self, index: usize, value: bool) -> bool {
        self.set_byte(index, u8::from(value))
    }

    /// Write `f32` elements starting at element `start`. Returns `false`
    /// (writing nothing) for non-`F32` buffers or out-of-range writes.
    pub fn write_f32(&self, start: usize, values: &[f32]) -> bool {
        self.0.spec.element == ElementType::F32 && self.0.map.write(start, values)
    }

    /// Zero the whole buffer.
    pub fn zero(&self) {
        self.0.map.fill(0);
    }

    /// Flush written pages to the backing file.
    pub fn flush(&self) -> std::io::Result<()> {
        self.0.map.flush()
    }
}

impl fmt::Debug for ClientBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientBuffer")
            .field("name", &self.0.name)
            .field("spec", &self.0.spec)
            .finish()
    }
}

// ── SimBuffer ─────────────────────────────────────────────────────

/// A buffer the simulator writes and this process only reads.
#[derive(Clone)]
pub struct SimBuffer(pub(crate) Arc<Region>);

impl SimBuffer {
    common_reads!();

    /// `true` if the buffer holds floats and every element is NaN, the
    /// simulator's "no data this tick" sentinel.
    pub fn is_all_nan(&self) -> bool {
        match self.0.spec.element {
            ElementType::F32 => self.0.map.slice::<f32>().iter().all(|v| v.is_nan()),
            ElementType::F64 => self.0.map.slice::<f64>().iter().all(|v| v.is_nan()),
            _ => false,
        }
    }

    /// `true` if the buffer holds floats and any element is NaN.
    pub fn has_nan(&self) -> bool {
        match self.0.spec.element {
            ElementType::F32 => self.0.map.slice::<f32>().iter().any(|v| v.is_nan()),
            ElementType::F64 => self.0.map.slice::<f64>().iter().any(|v| v.is_nan()),
            _ => false,
        }
    }
}

impl fmt::Debug for SimBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimBuffer")
            .field("name", &self.0.name)
            .field("spec", &self.0.spec)
            .finish()
    }
}
