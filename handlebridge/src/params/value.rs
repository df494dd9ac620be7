use std::fmt;

use super::{ParamError, ParamMap, ParamResult};

/// An enumeration of all possible value types.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum ValueType {
    Int,
    Double,
    Bool,
    Text,
    TextList,
    Bytes,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::Int => "int",
            ValueType::Double => "double",
            ValueType::Bool => "bool",
            ValueType::Text => "text",
            ValueType::TextList => "text list",
            ValueType::Bytes => "bytes",
        };
        f.write_str(name)
    }
}

/// A value stored in a [`ParamMap`].
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Int(i64),
    Double(f64),
    Bool(bool),
    Text(String),
    TextList(Vec<String>),
    /// Raw payload bytes, produced when decoding opaque event data.
    Bytes(Vec<u8>),
}

impl ParamValue {
    pub fn value_type(&self) -> ValueType {
        match self {
            ParamValue::Int(_) => ValueType::Int,
            ParamValue::Double(_) => ValueType::Double,
            ParamValue::Bool(_) => ValueType::Bool,
            ParamValue::Text(_) => ValueType::Text,
            ParamValue::TextList(_) => ValueType::TextList,
            ParamValue::Bytes(_) => ValueType::Bytes,
        }
    }
}

/// A trait for values which can be stored in a map.
pub trait Value: Sized {
    /// Retrieves the value from the map.
    fn get_from_map(map: &ParamMap, key: &str) -> ParamResult<Self>;

    /// Sets the value in the map, replacing any previous one.
    fn store_in_map(map: &mut ParamMap, key: &str, x: &Self) -> ParamResult<()>;
}

// Implements `Value` for a type that maps onto one `ParamValue` variant.
macro_rules! impl_value {
    ($type:ty, $variant:ident) => {
        impl Value for $type {
            #[inline]
            fn get_from_map(map: &ParamMap, key: &str) -> ParamResult<Self> {
                match map.get_value(key)? {
                    ParamValue::$variant(x) => Ok(x.clone()),
                    _ => Err(ParamError::WrongValueType),
                }
            }

            #[inline]
            fn store_in_map(map: &mut ParamMap, key: &str, x: &Self) -> ParamResult<()> {
                map.set_value(key, ParamValue::$variant(x.clone()))
            }
        }
    };
}

impl_value!(i64, Int);
impl_value!(f64, Double);
impl_value!(bool, Bool);
impl_value!(String, Text);
impl_value!(Vec<String>, TextList);
impl_value!(Vec<u8>, Bytes);

impl Value for i32 {
    #[inline]
    fn get_from_map(map: &ParamMap, key: &str) -> ParamResult<Self> {
        let x = i64::get_from_map(map, key)?;
        i32::try_from(x).map_err(|_| ParamError::OutOfRange {
            name: key.to_owned(),
        })
    }

    #[inline]
    fn store_in_map(map: &mut ParamMap, key: &str, x: &Self) -> ParamResult<()> {
        map.set_value(key, ParamValue::Int(i64::from(*x)))
    }
}
