//! Primitive result types of IR nodes.
//!
//! Nodes carry the machine-level type of the value they produce. Sub-word
//! integers exist only for memory accesses; arithmetic widens to `Int32`.

use std::fmt;

/// Result type of an IR node.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum DataType {
    /// No value (control, stores, checks without a result).
    #[default]
    Void = 0,
    Bool = 1,
    Int8 = 2,
    Int16 = 3,
    Uint16 = 4,
    Int32 = 5,
    Int64 = 6,
    Float32 = 7,
    Float64 = 8,
    /// Heap reference (may be null).
    Reference = 9,
}

impl DataType {
    #[inline]
    pub const fn is_integral(self) -> bool {
        matches!(
            self,
            DataType::Bool
                | DataType::Int8
                | DataType::Int16
                | DataType::Uint16
                | DataType::Int32
                | DataType::Int64
        )
    }

    #[inline]
    pub const fn is_floating_point(self) -> bool {
        matches!(self, DataType::Float32 | DataType::Float64)
    }

    #[inline]
    pub const fn is_reference(self) -> bool {
        matches!(self, DataType::Reference)
    }

    /// Types that occupy two vregs in an environment.
    #[inline]
    pub const fn is_64_bit(self) -> bool {
        matches!(self, DataType::Int64 | DataType::Float64)
    }

    /// Storage size in bytes.
    pub const fn size(self) -> usize {
        match self {
            DataType::Void => 0,
            DataType::Bool | DataType::Int8 => 1,
            DataType::Int16 | DataType::Uint16 => 2,
            DataType::Int32 | DataType::Float32 | DataType::Reference => 4,
            DataType::Int64 | DataType::Float64 => 8,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            DataType::Void => "void",
            DataType::Bool => "bool",
            DataType::Int8 => "int8",
            DataType::Int16 => "int16",
            DataType::Uint16 => "uint16",
            DataType::Int32 => "int32",
            DataType::Int64 => "int64",
            DataType::Float32 => "float32",
            DataType::Float64 => "float64",
            DataType::Reference => "reference",
        }
    }
}

impl fmt::Debug for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
