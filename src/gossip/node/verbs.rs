//! Verb registration table: `verb name → handler`, looked up by name
//! rather than matched in a `match` scattered through the node.
//!
//! Solicit handlers fold into a running aggregate starting from an
//! algebraic identity, so a fresh reply box and a pre-seeded one go
//! through the exact same merge path (see `node::handle_solicit`).

use std::sync::Arc;

use crate::gossip::error::*;
use crate::gossip::message::Verb;
use crate::gossip::uid::Uid;

/// A solicitation verb's pure query behavior.
pub trait VerbHandler: Send + Sync {
    /// The aggregate's starting value before any contribution is folded in.
    fn identity(&self) -> Vec<u8>;
    /// This node's own answer to the query.
    fn own_contribution(&self, own_uid: Uid) -> Vec<u8>;
    /// Folds `other` (a downstream reply, or a local contribution) into `aggregate`.
    fn merge(&self, aggregate: &mut Vec<u8>, other: &[u8]) -> Result<()>;
}

type SolicitTable = std::collections::HashMap<String, Arc<dyn VerbHandler>>;
type CommandHandler = Arc<dyn Fn(&[u8]) + Send + Sync>;
type CommandTable = std::collections::HashMap<String, CommandHandler>;

static SOLICIT_HANDLERS: parking_lot::RwLock<Option<SolicitTable>> = parking_lot::RwLock::new(None);
static COMMAND_HANDLERS: parking_lot::RwLock<Option<CommandTable>> = parking_lot::RwLock::new(None);

pub(crate) fn init() {
    let mut solicit: SolicitTable = std::collections::HashMap::new();
    solicit.insert(Verb::COUNT_ALIVE.to_string(), Arc::new(CountAlive) as Arc<dyn VerbHandler>);
    solicit.insert(Verb::LIST_ALIVE.to_string(), Arc::new(ListAlive) as Arc<dyn VerbHandler>);
    *SOLICIT_HANDLERS.write() = Some(solicit);
    *COMMAND_HANDLERS.write() = Some(std::collections::HashMap::new());
}

/// Registers a solicit-verb handler, overwriting any prior handler of
/// the same name.
pub fn register_solicit(name: impl Into<String>, handler: Arc<dyn VerbHandler>) {
    SOLICIT_HANDLERS
        .write()
        .get_or_insert_with(std::collections::HashMap::new)
        .insert(name.into(), handler);
}

/// Registers a fire-and-forget command-verb handler.
pub fn register_command(name: impl Into<String>, handler: CommandHandler) {
    COMMAND_HANDLERS
        .write()
        .get_or_insert_with(std::collections::HashMap::new)
        .insert(name.into(), handler);
}

fn solicit_handler(verb: &Verb) -> Option<Arc<dyn VerbHandler>> {
    SOLICIT_HANDLERS.read().as_ref()?.get(verb.as_str()).cloned()
}

pub fn identity(verb: &Verb) -> Vec<u8> {
    solicit_handler(verb).map(|h| h.identity()).unwrap_or_default()
}

pub fn own_contribution(verb: &Verb, uid: Uid) -> Vec<u8> {
    solicit_handler(verb)
        .map(|h| h.own_contribution(uid))
        .unwrap_or_default()
}

pub fn merge(verb: &Verb, aggregate: &mut Vec<u8>, other: &[u8]) -> Result<()> {
    match solicit_handler(verb) {
        Some(h) => h.merge(aggregate, other),
        None => Ok(()),
    }
}

/// Runs a command verb's side effect, if one is registered. Unknown
/// command verbs are a logged no-op, not an error — the verb table is
/// an extension point, not a closed set.
pub fn execute_command(verb: &Verb, payload: &[u8]) {
    let handler = COMMAND_HANDLERS
        .read()
        .as_ref()
        .and_then(|m| m.get(verb.as_str()).cloned());
    match handler {
        Some(h) => h(payload),
        None => tracing::debug!(%verb, "no command handler registered"),
    }
}

struct CountAlive;

impl VerbHandler for CountAlive {
    fn identity(&self) -> Vec<u8> {
        bincode::serialize(&0u64).unwrap()
    }

    fn own_contribution(&self, _own_uid: Uid) -> Vec<u8> {
        bincode::serialize(&1u64).unwrap()
    }

    fn merge(&self, aggregate: &mut Vec<u8>, other: &[u8]) -> Result<()> {
        let mut acc: u64 = bincode::deserialize(aggregate).wrapped(ErrorKind::DecodeFailed)?;
        let delta: u64 = bincode::deserialize(other).wrapped(ErrorKind::DecodeFailed)?;
        acc += delta;
        *aggregate = bincode::serialize(&acc).wrapped(ErrorKind::DecodeFailed)?;
        Ok(())
    }
}

struct ListAlive;

impl VerbHandler for ListAlive {
    fn identity(&self) -> Vec<u8> {
        bincode::serialize(&Vec::<u64>::new()).unwrap()
    }

    fn own_contribution(&self, own_uid: Uid) -> Vec<u8> {
        bincode::serialize(&vec![u64::from(own_uid)]).unwrap()
    }

    fn merge(&self, aggregate: &mut Vec<u8>, other: &[u8]) -> Result<()> {
        let mut acc: Vec<u64> = bincode::deserialize(aggregate).wrapped(ErrorKind::DecodeFailed)?;
        let more: Vec<u64> = bincode::deserialize(other).wrapped(ErrorKind::DecodeFailed)?;
        for uid in more {
            if !acc.contains(&uid) {
                acc.push(uid);
            }
        }
        *aggregate = bincode::serialize(&acc).wrapped(ErrorKind::DecodeFailed)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_alive_sums_contributions() {
        init();
        let verb = Verb::new(Verb::COUNT_ALIVE);
        let mut aggregate = identity(&verb);
        merge(&verb, &mut aggregate, &own_contribution(&verb, Uid::from_raw(1))).unwrap();
        merge(&verb, &mut aggregate, &own_contribution(&verb, Uid::from_raw(2))).unwrap();
        let total: u64 = bincode::deserialize(&aggregate).unwrap();
        assert_eq!(total, 2);
    }

    #[test]
    fn list_alive_unions_without_duplicates() {
        init();
        let verb = Verb::new(Verb::LIST_ALIVE);
        let mut aggregate = identity(&verb);
        merge(&verb, &mut aggregate, &own_contribution(&verb, Uid::from_raw(5))).unwrap();
        merge(&verb, &mut aggregate, &own_contribution(&verb, Uid::from_raw(5))).unwrap();
        let list: Vec<u64> = bincode::deserialize(&aggregate).unwrap();
        assert_eq!(list, vec![5]);
    }
}
