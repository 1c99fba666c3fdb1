//! Raw access to mapped memory.
//!
//! Every `unsafe` block of the crate lives here. A [`Mapping`] is a
//! read-write shared mapping of a whole backing file; the simulator
//! process maps the same pages. All access goes through bounds-checked
//! copies or through slices whose lifetime is tied to a borrow of the
//! mapping.

#![allow(unsafe_code)]

use std::fs::File;
use std::io;
use std::mem::size_of;

use memmap2::{MmapOptions, MmapRaw};

mod sealed {
    pub trait Sealed {}
}

/// Plain element types valid for every bit pattern.
pub(crate) trait Element: Copy + sealed::Sealed {}

macro_rules! element {
    ($($t:ty),*) => {
        $(
            impl sealed::Sealed for $t {}
            impl Element for $t {}
        )*
    };
}

element!(u8, i8, i32, f32, f64);

pub(crate) struct Mapping {
    map: MmapRaw,
}

impl Mapping {
    /// Map the first `len` bytes of `file` shared and writable.
    pub(crate) fn new(file: &File, len: usize) -> io::Result<Self> {
        let map = MmapOptions::new().len(len).map_raw(file)?;
        Ok(Self { map })
    }

    pub(crate) fn len(&self) -> usize {
        self.map.len()
    }

    fn elems<T: Element>(&self) -> usize {
        self.len() / size_of::<T>()
    }

    /// Copy `out.len()` elements starting at element `start` into `out`.
    /// Returns `false` (copying nothing) if the range is out of bounds.
    pub(crate) fn read<T: Element>(&self, start: usize, out: &mut [T]) -> bool {
        if start.checked_add(out.len()).is_none_or(|end| end > self.elems::<T>()) {
            return false;
        }
        // SAFETY: the range was bounds-checked above, the mapping base is
        // page-aligned so `T` elements are aligned, and `T: Element` is
        // valid for any bit pattern. `out` is a Rust-owned buffer and
        // cannot overlap the mapping.
        unsafe {
            let src = (self.map.as_ptr() as *const T).add(start);
            std::ptr::copy_nonoverlapping(src, out.as_mut_ptr(), out.len());
        }
        true
    }

    /// Copy `src` into the mapping starting at element `start`.
    /// Returns `false` (writing nothing) if the range is out of bounds.
    pub(crate) fn write<T: Element>(&self, start: usize, src: &[T]) -> bool {
        if start.checked_add(src.len()).is_none_or(|end| end > self.elems::<T>()) {
            return false;
        }
        // SAFETY: bounds-checked above; aligned as in `read`. No Rust
        // reference into the written range is live: borrowed views are
        // only handed out for simulator-written buffers, and this is
        // only reachable through client-written handles.
        unsafe {
            let dst = (self.map.as_mut_ptr() as *mut T).add(start);
            std::ptr::copy_nonoverlapping(src.as_ptr(), dst, src.len());
        }
        true
    }

    /// Set every byte of the mapping to `byte`.
    pub(crate) fn fill(&self, byte: u8) {
        // SAFETY: writes exactly `len` bytes starting at the mapping base.
        unsafe {
            std::ptr::write_bytes(self.map.as_mut_ptr(), byte, self.len());
        }
    }

    /// Borrow the whole mapping as a slice of `T`.
    ///
    /// The slice aliases memory the simulator writes during a handshake.
    /// Callers must only hold it while the client owns the buffers, which
    /// the engine guarantees by requiring `&mut` access to tick.
    pub(crate) fn slice<T: Element>(&self) -> &[T] {
        // SAFETY: the pointer is non-null, page-aligned and valid for
        // `elems::<T>()` elements for as long as `self` lives; every bit
        // pattern is a valid `T`.
        unsafe { std::slice::from_raw_parts(self.map.as_ptr() as *const T, self.elems::<T>()) }
    }

    pub(crate) fn flush(&self) -> io::Result<()> {
        self.map.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn mapping(len: usize) -> (tempfile::NamedTempFile, Mapping) {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(&vec![0u8; len]).unwrap();
        let m = Mapping::new(f.as_file(), len).unwrap();
        (f, m)
    }

    #[test]
    fn write_then_read_f32() {
        let (_f, m) = mapping(16);
        assert!(m.write(1, &[1.5f32, -2.0]));
        let mut out = [0.0f32; 4];
        assert!(m.read(0, &mut out));
        assert_eq!(out, [0.0, 1.5, -2.0, 0.0]);
        assert_eq!(m.slice::<f32>(), &[0.0, 1.5, -2.0, 0.0]);
    }

    #[test]
    fn out_of_bounds_is_refused() {
        let (_f, m) = mapping(8);
        assert!(!m.write(1, &[1.0f32, 2.0]));
        let mut out = [0u8; 9];
        assert!(!m.read(0, &mut out));
        assert!(!m.read::<u8>(usize::MAX, &mut [0u8; 1]));
    }

    #[test]
    fn fill_sets_every_byte() {
        let (_f, m) = mapping(4);
        m.fill(0xff);
        assert_eq!(m.slice::<u8>(), &[0xff; 4]);
    }
}
