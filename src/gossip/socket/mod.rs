//! The per-connection actor layer: Socket Owner, Readiness Monitor,
//! and outbound connection establishment.

mod owner;
mod tcp;

pub use owner::{adopt_accepted, ensure_connection, Outbox, OwnerHandle, SharedOutbox};
pub use tcp::{bind, Listener, Socket};
