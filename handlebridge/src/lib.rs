//! Lifetime and identity bridge between native library handles and managed Rust wrappers.
//!
//! Native resources (pipeline filters and their ports, events, displays, scene objects) are
//! created and freed under the native library's rules. This crate keeps one wrapper per native
//! handle, decides which wrapper destroys the resource, keeps owners alive for as long as their
//! dependents, and lets a cycle collector break reference cycles between wrappers.
//!
//! Native parameter structs described by runtime descriptors are marshalled to and from a
//! [`ParamMap`](params::ParamMap).
extern crate self as handlebridge;

pub use handlebridge_derive::Traverse;

pub mod canvas;
pub mod display;
pub mod errors;
pub mod gc;
pub mod handle;
pub mod ownership;
pub mod params;
pub mod pipeline;
pub mod registry;
pub mod shared;
mod state;

#[cfg(test)]
mod mock;

pub mod prelude {
    //! The handlebridge prelude.
    //!
    //! Contains the types you most likely want to import anyway.
    pub use super::{
        errors::{BridgeError, BridgeResult},
        gc::{Slot, SlotList, Trace, Traverse},
        handle::{Capability, RawHandle, TaggedHandle},
        ownership::{Collaborator, OwnerPolicy, Ownership, Registration, Wrapper},
        params::{ParamDescriptor, ParamMap, ParamType, ParamValue},
        shared::SharedRef,
    };
}

/// A simple macro to create a parameter map
///
/// its syntax is `param_map!({"key": value}, ... , {"key": value})`
///
/// # Example
///
/// ```
/// use handlebridge::param_map;
/// let map = param_map!({"gain": &2.0f64}, {"enabled": &true});
/// assert_eq!(map.get::<f64>("gain"), Ok(2.0));
/// ```
#[macro_export]
macro_rules! param_map {
    ($({$key:literal: $x:expr }),*) => {
        {
            let mut temp_map = $crate::params::ParamMap::new();
            $(
                temp_map.set($key, $x).unwrap();
            )*
            temp_map
        }
    };
}
