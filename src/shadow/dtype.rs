//! Element types and memory order of shelved arrays

use std::fmt;

use serde::{Deserialize, Serialize};

/// Element type of an array or tensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
    Bool,
    UInt8,
    Int8,
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
}

impl DType {
    /// Size of one element in bytes
    pub fn itemsize(&self) -> usize {
        match self {
            DType::Bool | DType::UInt8 | DType::Int8 => 1,
            DType::Int16 => 2,
            DType::Int32 | DType::Float32 => 4,
            DType::Int64 | DType::Float64 => 8,
        }
    }

    /// Numpy-style type string, e.g. `<f8`
    pub fn type_str(&self) -> &'static str {
        match self {
            DType::Bool => "|b1",
            DType::UInt8 => "|u1",
            DType::Int8 => "|i1",
            DType::Int16 => "<i2",
            DType::Int32 => "<i4",
            DType::Int64 => "<i8",
            DType::Float32 => "<f4",
            DType::Float64 => "<f8",
        }
    }

    /// Parse a numpy-style type string or a plain name (`float64`)
    pub fn parse(text: &str) -> Option<Self> {
        let all = [
            DType::Bool,
            DType::UInt8,
            DType::Int8,
            DType::Int16,
            DType::Int32,
            DType::Int64,
            DType::Float32,
            DType::Float64,
        ];
        all.into_iter()
            .find(|d| d.type_str() == text || d.name() == text)
    }

    /// Plain name of the type
    pub fn name(&self) -> &'static str {
        match self {
            DType::Bool => "bool",
            DType::UInt8 => "uint8",
            DType::Int8 => "int8",
            DType::Int16 => "int16",
            DType::Int32 => "int32",
            DType::Int64 => "int64",
            DType::Float32 => "float32",
            DType::Float64 => "float64",
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Memory order of a multi-dimensional array
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Order {
    /// Row-major
    #[default]
    C,
    /// Column-major
    Fortran,
}

/// A Rust type that can be stored as an array element
pub trait Element: Copy + PartialEq + fmt::Debug + Send + Sync + 'static {
    /// Stored type
    const DTYPE: DType;

    /// Decode from exactly `DTYPE.itemsize()` little-endian bytes
    fn read_le(bytes: &[u8]) -> Self;

    /// Encode into exactly `DTYPE.itemsize()` bytes
    fn write_le(self, out: &mut [u8]);
}

macro_rules! impl_element {
    ($($t:ty => $dtype:expr),*) => {$(
        impl Element for $t {
            const DTYPE: DType = $dtype;

            fn read_le(bytes: &[u8]) -> Self {
                let mut raw = [0u8; std::mem::size_of::<$t>()];
                raw.copy_from_slice(bytes);
                <$t>::from_le_bytes(raw)
            }

            fn write_le(self, out: &mut [u8]) {
                out.copy_from_slice(&self.to_le_bytes());
            }
        }
    )*};
}

impl_element!(
    u8 => DType::UInt8,
    i8 => DType::Int8,
    i16 => DType::Int16,
    i32 => DType::Int32,
    i64 => DType::Int64,
    f32 => DType::Float32,
    f64 => DType::Float64
);

impl Element for bool {
    const DTYPE: DType = DType::Bool;

    fn read_le(bytes: &[u8]) -> Self {
        bytes[0] != 0
    }

    fn write_le(self, out: &mut [u8]) {
        out[0] = u8::from(self);
    }
}

/// Contiguous strides in bytes for `shape`, `None` on overflow
pub fn contiguous_strides(shape: &[usize], itemsize: usize, order: Order) -> Option<Vec<usize>> {
    let axes: Vec<usize> = match order {
        Order::C => (0..shape.len()).rev().collect(),
        Order::Fortran => (0..shape.len()).collect(),
    };
    let mut strides = vec![0; shape.len()];
    let mut step = itemsize;
    for (i, &axis) in axes.iter().enumerate() {
        if i > 0 {
            step = step.checked_mul(shape[axes[i - 1]].max(1))?;
        }
        strides[axis] = step;
    }
    Some(strides)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_type_strings() {
        assert_eq!(DType::parse("<f8"), Some(DType::Float64));
        assert_eq!(DType::parse("int32"), Some(DType::Int32));
        assert_eq!(DType::parse("complex64"), None);
    }

    #[test]
    fn test_element_codec() {
        let mut buf = [0u8; 8];
        (-2.5f64).write_le(&mut buf);
        assert_eq!(f64::read_le(&buf), -2.5);

        let mut buf = [0u8; 2];
        (-300i16).write_le(&mut buf);
        assert_eq!(i16::read_le(&buf), -300);

        let mut buf = [0u8; 1];
        true.write_le(&mut buf);
        assert!(bool::read_le(&buf));
    }

    #[test]
    fn test_strides() {
        assert_eq!(contiguous_strides(&[2, 3, 4], 8, Order::C), Some(vec![96, 32, 8]));
        assert_eq!(contiguous_strides(&[2, 3, 4], 8, Order::Fortran), Some(vec![8, 16, 48]));
        assert_eq!(contiguous_strides(&[], 4, Order::C), Some(Vec::new()));
        assert_eq!(contiguous_strides(&[2, usize::MAX, 2], 8, Order::C), None);
        assert_eq!(
            contiguous_strides(&[0, usize::MAX, 2], 1, Order::Fortran),
            Some(vec![1, 1, usize::MAX])
        );
    }
}
