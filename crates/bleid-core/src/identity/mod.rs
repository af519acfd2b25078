//! Local identity table
//!
//! - [`types`] - the identity record and its operation phase
//! - [`store`] - index allocation, removal and key clearing

pub mod store;
pub mod types;

pub use store::{IdentityStore, RemovePolicy};
pub use types::{Identity, IdentityState};
