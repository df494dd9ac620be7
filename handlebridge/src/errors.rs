use std::result;

use thiserror::Error;

use crate::handle::{Capability, TaggedHandle};
use crate::params::ParamError;

/// The error type for registry, ownership and wrapper operations.
#[derive(Error, Debug, PartialEq)]
pub enum BridgeError {
    #[error("Unsupported owner {owner} for a {kind} wrapper")]
    InvalidOwner { kind: Capability, owner: Capability },
    #[error("A {kind} wrapper requires an owner")]
    MissingOwner { kind: Capability },
    #[error("Handle {0} is already owned by a live wrapper")]
    DoubleOwnership(TaggedHandle),
    #[error("Handle {0} is not registered")]
    UnknownHandle(TaggedHandle),
    #[error("Handle {0} already has a live wrapper")]
    AlreadyRegistered(TaggedHandle),
    #[error("Handle {0} is registered with a different wrapper type")]
    KindMismatch(TaggedHandle),
    #[error("Native resource creation failed: {0}")]
    Allocation(String),
    #[error("Native call failed: {0}")]
    Native(String),
    #[error(transparent)]
    Param(#[from] ParamError),
}

impl From<BridgeError> for String {
    fn from(error: BridgeError) -> Self {
        error.to_string()
    }
}

/// A specialized `Result` type for bridge operations.
pub type BridgeResult<T> = result::Result<T, BridgeError>;
