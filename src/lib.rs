//! `ripple` is a peer-to-peer gossip dissemination core for a small
//! node fleet: message identity, TTL admission, seen-set caching,
//! neighbor-exclusion forwarding and upstream reply aggregation, built
//! on a per-connection actor layer over TCP.

pub mod gossip;

pub use gossip::{init, InitConfig, InitGuard};
