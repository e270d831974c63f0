//! Shared helpers.

pub mod container;
