use std::ffi::NulError;
use std::result;

use thiserror::Error;

use super::{ParamType, ValueType};

/// The error type for parameter marshalling and `ParamMap` operations.
#[derive(Error, Debug, PartialEq)]
pub enum ParamError {
    #[error("Value for '{name}' can't be stored in a {expected} field (got {found})")]
    TypeMismatch {
        name: String,
        expected: ParamType,
        found: ValueType,
    },
    #[error("Field '{name}' has an unsupported type tag {tag}")]
    UnsupportedType { name: String, tag: i32 },
    #[error("Field '{name}' ({size} bytes at offset {offset}) doesn't fit in a {len} byte block")]
    OutOfBounds {
        name: String,
        offset: usize,
        size: usize,
        len: usize,
    },
    #[error("Field '{name}' has a size its type can't be stored in")]
    InvalidLayout { name: String },
    #[error("Value for '{name}' is out of range for its field")]
    OutOfRange { name: String },
    #[error("The requested key wasn't found in the map")]
    KeyNotFound,
    #[error("The requested value type doesn't match the type of the entry")]
    WrongValueType,
    #[error("The key is invalid")]
    InvalidKey(#[from] InvalidKeyError),
    #[error("Couldn't convert to a CString")]
    CStringConversion(#[from] NulError),
}

/// A specialized `Result` type for parameter operations.
pub type ParamResult<T> = result::Result<T, ParamError>;

/// An error indicating the map key is invalid.
#[derive(Error, Debug, Eq, PartialEq)]
#[rustfmt::skip]
pub enum InvalidKeyError {
    #[error("The key is empty")]
    EmptyKey,
    #[error("The key contains an invalid character at index {}", _0)]
    InvalidCharacter(usize),
}
