//! Shared fixtures for unit tests.

mod native;

pub use modules::*;
pub use native::*;
