//! Process-wide registries: the only shared mutable state in the
//! system. Everything else lives inside a single actor.

pub mod connection;
pub mod node;
