#![doc = include_str!("../README.md")]

mod coordinator;
mod error;
mod identifier;
mod store;

pub use crate::coordinator::*;
pub use crate::error::*;
pub use crate::identifier::*;
pub use crate::store::*;
