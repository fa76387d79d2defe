//! CLI command implementations.

pub mod listen;
pub mod send;
