//! Connection Registry: a process-wide mapping from `(address, port)`
//! to the single live Socket Owner serving that peer endpoint.
//!
//! Addresses are normalized to `IpAddr` before use as a key, so that
//! equivalent textual representations of the same endpoint collide.

use std::net::IpAddr;

use parking_lot::RwLock;

use crate::gossip::collections::{self, HashMap};
use crate::gossip::error::*;
use crate::gossip::socket::OwnerHandle;

type Key = (IpAddr, u16);

static REGISTRY: RwLock<Option<HashMap<Key, OwnerHandle>>> = RwLock::new(None);

pub(crate) fn init() {
    *REGISTRY.write() = Some(collections::hash_map());
}

pub(crate) fn clear() {
    if let Some(map) = REGISTRY.write().as_mut() {
        map.clear();
    }
}

/// Returns the live Socket Owner for `(address, port)`, if any.
pub fn lookup(address: IpAddr, port: u16) -> Option<OwnerHandle> {
    REGISTRY
        .read()
        .as_ref()
        .and_then(|map| map.get(&(address, port)).cloned())
}

/// Registers `owner` as the Socket Owner for `(address, port)`.
/// Fails with `DuplicateConnection` if a live entry already exists.
pub fn insert(address: IpAddr, port: u16, owner: OwnerHandle) -> Result<()> {
    let mut guard = REGISTRY.write();
    let map = guard.get_or_insert_with(collections::hash_map);
    if map.contains_key(&(address, port)) {
        return Err(Error::simple(ErrorKind::DuplicateConnection));
    }
    map.insert((address, port), owner);
    Ok(())
}

/// Removes the entry for `(address, port)`, if any. Idempotent:
/// removing an absent key is not an error.
pub fn remove(address: IpAddr, port: u16) {
    if let Some(map) = REGISTRY.write().as_mut() {
        map.remove(&(address, port));
    }
}

/// Number of live entries. Exposed for tests.
pub fn len() -> usize {
    REGISTRY.read().as_ref().map_or(0, |m| m.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn addr() -> IpAddr {
        IpAddr::V4(Ipv4Addr::LOCALHOST)
    }

    #[test]
    fn insert_then_duplicate_fails() {
        init();
        let handle = crate::gossip::socket::OwnerHandle::dangling_for_test();
        insert(addr(), 40001, handle.clone()).unwrap();
        let err = insert(addr(), 40001, handle).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DuplicateConnection);
        remove(addr(), 40001);
    }

    #[test]
    fn remove_is_idempotent() {
        init();
        remove(addr(), 40002);
        remove(addr(), 40002);
    }
}
