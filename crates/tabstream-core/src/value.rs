//! Typed cell access over Arrow columns
//!
//! Text encoders read rows through [`Cell`] so every output path matches on
//! the same closed set of value shapes. Primitive Arrow types map to their own
//! variant; everything else (dates, timestamps, decimals, nested types, binary)
//! is rendered once by Arrow's display formatter into [`Cell::Text`].

use arrow::array::{Array, AsArray, BooleanArray, PrimitiveArray};
use arrow::datatypes::{
    DataType, Float32Type, Float64Type, Int16Type, Int32Type, Int64Type, Int8Type, UInt16Type,
    UInt32Type, UInt64Type, UInt8Type,
};
use arrow::error::ArrowError;
use arrow::util::display::{ArrayFormatter, FormatOptions};
use serde::ser::{Serialize, Serializer};

/// One value of one row.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell<'a> {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Str(&'a str),
    Text(String),
}

impl Serialize for Cell<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_unit(),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Int(i) => serializer.serialize_i64(*i),
            Self::UInt(u) => serializer.serialize_u64(*u),
            // JSON has no NaN/Infinity
            Self::Float(f) if !f.is_finite() => serializer.serialize_unit(),
            Self::Float(f) => serializer.serialize_f64(*f),
            Self::Str(s) => serializer.serialize_str(s),
            Self::Text(s) => serializer.serialize_str(s),
        }
    }
}

/// Typed view of one column, resolved once per batch.
enum Column<'a> {
    Null,
    Bool(&'a BooleanArray),
    I8(&'a PrimitiveArray<Int8Type>),
    I16(&'a PrimitiveArray<Int16Type>),
    I32(&'a PrimitiveArray<Int32Type>),
    I64(&'a PrimitiveArray<Int64Type>),
    U8(&'a PrimitiveArray<UInt8Type>),
    U16(&'a PrimitiveArray<UInt16Type>),
    U32(&'a PrimitiveArray<UInt32Type>),
    U64(&'a PrimitiveArray<UInt64Type>),
    F32(&'a PrimitiveArray<Float32Type>),
    F64(&'a PrimitiveArray<Float64Type>),
    Utf8(&'a arrow::array::StringArray),
    LargeUtf8(&'a arrow::array::LargeStringArray),
    Utf8View(&'a arrow::array::StringViewArray),
    Formatted(ArrayFormatter<'a>),
}

/// Reads [`Cell`]s out of one Arrow column.
pub struct CellReader<'a> {
    array: &'a dyn Array,
    column: Column<'a>,
}

impl<'a> CellReader<'a> {
    pub fn new(array: &'a dyn Array) -> Result<Self, ArrowError> {
        let column = match array.data_type() {
            DataType::Null => Column::Null,
            DataType::Boolean => Column::Bool(array.as_boolean()),
            DataType::Int8 => Column::I8(array.as_primitive()),
            DataType::Int16 => Column::I16(array.as_primitive()),
            DataType::Int32 => Column::I32(array.as_primitive()),
            DataType::Int64 => Column::I64(array.as_primitive()),
            DataType::UInt8 => Column::U8(array.as_primitive()),
            DataType::UInt16 => Column::U16(array.as_primitive()),
            DataType::UInt32 => Column::U32(array.as_primitive()),
            DataType::UInt64 => Column::U64(array.as_primitive()),
            DataType::Float32 => Column::F32(array.as_primitive()),
            DataType::Float64 => Column::F64(array.as_primitive()),
            DataType::Utf8 => Column::Utf8(array.as_string::<i32>()),
            DataType::LargeUtf8 => Column::LargeUtf8(array.as_string::<i64>()),
            DataType::Utf8View => Column::Utf8View(array.as_string_view()),
            _ => Column::Formatted(ArrayFormatter::try_new(array, &FormatOptions::default())?),
        };
        Ok(Self { array, column })
    }

    pub fn cell(&self, row: usize) -> Cell<'a> {
        if self.array.is_null(row) {
            return Cell::Null;
        }
        match &self.column {
            Column::Null => Cell::Null,
            Column::Bool(a) => Cell::Bool(a.value(row)),
            Column::I8(a) => Cell::Int(a.value(row).into()),
            Column::I16(a) => Cell::Int(a.value(row).into()),
            Column::I32(a) => Cell::Int(a.value(row).into()),
            Column::I64(a) => Cell::Int(a.value(row)),
            Column::U8(a) => Cell::UInt(a.value(row).into()),
            Column::U16(a) => Cell::UInt(a.value(row).into()),
            Column::U32(a) => Cell::UInt(a.value(row).into()),
            Column::U64(a) => Cell::UInt(a.value(row)),
            Column::F32(a) => Cell::Float(a.value(row).into()),
            Column::F64(a) => Cell::Float(a.value(row)),
            Column::Utf8(a) => Cell::Str(a.value(row)),
            Column::LargeUtf8(a) => Cell::Str(a.value(row)),
            Column::Utf8View(a) => Cell::Str(a.value(row)),
            Column::Formatted(f) => Cell::Text(f.value(row).to_string()),
        }
    }
}
