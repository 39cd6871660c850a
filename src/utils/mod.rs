//! Shared building blocks used across the crate.

pub mod synchronization;
