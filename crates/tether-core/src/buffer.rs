//! Shape and element-type descriptors for shared buffers.
//!
//! Both sides of the wire derive a buffer's size from the same
//! [`BufferSpec`]; there is no negotiation, so the descriptor is the
//! whole contract.

use smallvec::SmallVec;
use std::fmt;

/// Dimensions of a buffer, outermost first.
pub type Shape = SmallVec<[usize; 4]>;

/// Element type stored in a shared buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ElementType {
    /// One byte, `0` = false, anything else = true.
    Bool,
    /// Unsigned byte.
    U8,
    /// Signed byte (used by the command buffer).
    I8,
    /// 32-bit signed integer.
    I32,
    /// 32-bit float, the type of nearly every sensor.
    F32,
    /// 64-bit float.
    F64,
}

impl ElementType {
    /// Size of one element in bytes.
    pub fn size_bytes(self) -> usize {
        match self {
            Self::Bool | Self::U8 | Self::I8 => 1,
            Self::I32 | Self::F32 => 4,
            Self::F64 => 8,
        }
    }

    /// Whether the element is a floating-point type (and can hold NaN).
    pub fn is_float(self) -> bool {
        matches!(self, Self::F32 | Self::F64)
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Bool => "bool",
            Self::U8 => "u8",
            Self::I8 => "i8",
            Self::I32 => "i32",
            Self::F32 => "f32",
            Self::F64 => "f64",
        };
        f.write_str(s)
    }
}

/// Fixed shape and element type of one shared buffer.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct BufferSpec {
    /// Dimensions, outermost first.
    pub shape: Shape,
    /// Element type.
    pub element: ElementType,
}

impl BufferSpec {
    /// Build a descriptor from any dimension list.
    pub fn new(shape: impl IntoIterator<Item = usize>, element: ElementType) -> Self {
        Self {
            shape: shape.into_iter().collect(),
            element,
        }
    }

    /// A one-dimensional buffer of `len` elements.
    pub fn vector(len: usize, element: ElementType) -> Self {
        Self::new([len], element)
    }

    /// Total element count (product of the dimensions).
    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }

    /// `true` if any dimension is zero.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Size of the buffer in bytes.
    pub fn byte_len(&self) -> usize {
        self.len() * self.element.size_bytes()
    }
}

impl fmt::Display for BufferSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{:?}", self.element, self.shape.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_len_is_product_times_width() {
        let spec = BufferSpec::new([256, 256, 4], ElementType::U8);
        assert_eq!(spec.len(), 262_144);
        assert_eq!(spec.byte_len(), 262_144);

        let imu = BufferSpec::new([2, 3], ElementType::F32);
        assert_eq!(imu.byte_len(), 24);
    }

    #[test]
    fn zero_dimension_is_empty() {
        assert!(BufferSpec::new([3, 0], ElementType::F32).is_empty());
        assert!(!BufferSpec::vector(1, ElementType::Bool).is_empty());
    }

    #[test]
    fn display_is_compact() {
        let spec = BufferSpec::new([4, 4], ElementType::F32);
        assert_eq!(spec.to_string(), "f32[4, 4]");
    }
}
