//! Shared daemon types.

pub mod error;

pub use error::*;
