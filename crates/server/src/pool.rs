//! Actor pools: actors sharing a lifetime, with bulk disconnect.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use crate::actor::{Actor, ActorFactory, ActorId};

/// Handle to a pool owned by a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PoolId(pub(crate) u64);

impl fmt::Display for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pool{}", self.0)
    }
}

/// A registered actor.
pub enum PoolEntry {
    /// Not yet instantiated; replaced by its instance on first use.
    Factory {
        factory: Rc<dyn ActorFactory>,
        parent_id: Option<ActorId>,
    },
    Live(Box<dyn Actor>),
    /// The live actor is checked out while it handles a request.
    Dispatching,
}

impl PoolEntry {
    pub fn factory(factory: Rc<dyn ActorFactory>, parent_id: Option<ActorId>) -> Self {
        PoolEntry::Factory { factory, parent_id }
    }

    pub fn live(actor: impl Actor) -> Self {
        PoolEntry::Live(Box::new(actor))
    }

    pub fn actor_prefix(&self) -> Option<&str> {
        match self {
            PoolEntry::Factory { factory, .. } => factory.actor_prefix(),
            PoolEntry::Live(actor) => actor.actor_prefix(),
            PoolEntry::Dispatching => None,
        }
    }

    pub fn is_factory(&self) -> bool {
        matches!(self, PoolEntry::Factory { .. })
    }

    pub fn is_live(&self) -> bool {
        matches!(self, PoolEntry::Live(_) | PoolEntry::Dispatching)
    }

    fn has_disconnect(&mut self) -> bool {
        match self {
            PoolEntry::Live(actor) => actor.as_disconnect().is_some(),
            _ => false,
        }
    }
}

impl fmt::Debug for PoolEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolEntry::Factory { factory, parent_id } => f
                .debug_struct("Factory")
                .field("name", &factory.name())
                .field("parent_id", parent_id)
                .finish(),
            PoolEntry::Live(actor) => f
                .debug_tuple("Live")
                .field(&actor.actor_prefix())
                .finish(),
            PoolEntry::Dispatching => f.write_str("Dispatching"),
        }
    }
}

/// Mints actor ids as `connection prefix + sub-prefix + sequence`.
#[derive(Debug)]
pub struct IdAllocator {
    prefix: String,
    next: u64,
}

impl IdAllocator {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: 1,
        }
    }

    pub fn alloc(&mut self, prefix: Option<&str>) -> ActorId {
        let id = format!("{}{}{}", self.prefix, prefix.unwrap_or_default(), self.next);
        self.next += 1;
        id
    }

    pub fn connection_prefix(&self) -> &str {
        &self.prefix
    }
}

/// A keyed collection of actors that share a lifetime.
///
/// Actors with a disconnect hook are also tracked in a cleanup set, which is
/// always a subset of the registered ids.
#[derive(Debug, Default)]
pub struct ActorPool {
    actors: HashMap<ActorId, PoolEntry>,
    cleanups: BTreeSet<ActorId>,
}

impl ActorPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `entry` under a freshly allocated id.
    pub fn add_actor(&mut self, ids: &mut IdAllocator, entry: PoolEntry) -> ActorId {
        let id = ids.alloc(entry.actor_prefix());
        self.insert(id.clone(), entry);
        id
    }

    /// Register `entry` under a known id, returning what it replaced.
    pub fn insert(&mut self, id: ActorId, mut entry: PoolEntry) -> Option<PoolEntry> {
        if entry.has_disconnect() {
            self.cleanups.insert(id.clone());
        } else {
            self.cleanups.remove(&id);
        }
        self.actors.insert(id, entry)
    }

    pub fn get(&self, id: &str) -> Option<&PoolEntry> {
        self.actors.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut PoolEntry> {
        self.actors.get_mut(id)
    }

    pub fn has(&self, id: &str) -> bool {
        self.actors.contains_key(id)
    }

    pub fn remove_actor(&mut self, id: &str) -> Option<PoolEntry> {
        self.cleanups.remove(id);
        self.actors.remove(id)
    }

    pub fn is_empty(&self) -> bool {
        self.actors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.actors.len()
    }

    pub fn actor_ids(&self) -> impl Iterator<Item = &str> {
        self.actors.keys().map(String::as_str)
    }

    pub fn tracks_cleanup(&self, id: &str) -> bool {
        self.cleanups.contains(id)
    }

    /// Run every tracked disconnect hook once, then forget the cleanup set.
    ///
    /// Registered actors stay in the pool. A hook that fails or panics is
    /// logged and the remaining hooks still run. Actors checked out for
    /// dispatch are skipped.
    pub fn cleanup(&mut self) {
        for id in mem::take(&mut self.cleanups) {
            let Some(PoolEntry::Live(actor)) = self.actors.get_mut(&id) else {
                continue;
            };
            run_disconnect(&id, actor.as_mut());
        }
    }

    pub(crate) fn take_for_dispatch(&mut self, id: &str) -> Option<PoolEntry> {
        let entry = self.actors.get_mut(id)?;
        match entry {
            PoolEntry::Dispatching => None,
            _ => Some(mem::replace(entry, PoolEntry::Dispatching)),
        }
    }

    pub(crate) fn is_dispatching(&self, id: &str) -> bool {
        matches!(self.actors.get(id), Some(PoolEntry::Dispatching))
    }
}

pub(crate) fn run_disconnect(id: &str, actor: &mut dyn Actor) {
    let Some(hook) = actor.as_disconnect() else {
        return;
    };
    tracing::trace!(actor = %id, "disconnecting actor");
    match panic::catch_unwind(AssertUnwindSafe(|| hook.disconnect())) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(actor = %id, error = %e, "actor disconnect failed"),
        Err(_) => tracing::error!(actor = %id, "actor disconnect panicked"),
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use transport::Packet;

    use super::*;
    use crate::actor::{Disconnect, DispatchError, FactoryContext, FnFactory, Reply};
    use crate::connection::ActorContext;

    struct Probe {
        disconnects: Rc<Cell<u32>>,
        fail: bool,
        panic: bool,
    }

    impl Probe {
        fn new(disconnects: &Rc<Cell<u32>>) -> Self {
            Self {
                disconnects: Rc::clone(disconnects),
                fail: false,
                panic: false,
            }
        }
    }

    impl Actor for Probe {
        fn actor_prefix(&self) -> Option<&str> {
            Some("probe")
        }

        fn handle(
            &mut self,
            _packet: &Packet,
            _ctx: &mut ActorContext<'_>,
        ) -> Result<Reply, DispatchError> {
            Ok(Reply::Deferred)
        }

        fn as_disconnect(&mut self) -> Option<&mut dyn Disconnect> {
            Some(self)
        }
    }

    impl Disconnect for Probe {
        fn disconnect(&mut self) -> eyre::Result<()> {
            self.disconnects.set(self.disconnects.get() + 1);
            if self.panic {
                panic!("probe exploded");
            }
            if self.fail {
                eyre::bail!("probe refused to disconnect");
            }
            Ok(())
        }
    }

    struct Silent;

    impl Actor for Silent {
        fn handle(
            &mut self,
            _packet: &Packet,
            _ctx: &mut ActorContext<'_>,
        ) -> Result<Reply, DispatchError> {
            Ok(Reply::Deferred)
        }
    }

    #[test]
    fn ids_use_connection_and_actor_prefixes() {
        let mut ids = IdAllocator::new("conn3.");
        let mut pool = ActorPool::new();
        let disconnects = Rc::new(Cell::new(0));

        let first = pool.add_actor(&mut ids, PoolEntry::live(Probe::new(&disconnects)));
        let second = pool.add_actor(&mut ids, PoolEntry::live(Silent));

        assert_eq!(first, "conn3.probe1");
        assert_eq!(second, "conn3.2");
        assert!(pool.has(&first));
        assert!(pool.get(&second).is_some_and(PoolEntry::is_live));
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn factory_entries_use_factory_prefix() {
        let mut ids = IdAllocator::new("conn0.");
        let mut pool = ActorPool::new();
        let factory = FnFactory::new("thread", |_ctx: &FactoryContext<'_>| {
            Ok(Box::new(Silent) as Box<dyn Actor>)
        });

        let id = pool.add_actor(&mut ids, PoolEntry::factory(Rc::new(factory), None));

        assert_eq!(id, "conn0.thread1");
        assert!(pool.get(&id).is_some_and(PoolEntry::is_factory));
        assert!(!pool.tracks_cleanup(&id));
    }

    #[test]
    fn remove_actor_drops_cleanup_tracking() {
        let mut ids = IdAllocator::new("conn0.");
        let mut pool = ActorPool::new();
        let disconnects = Rc::new(Cell::new(0));

        let id = pool.add_actor(&mut ids, PoolEntry::live(Probe::new(&disconnects)));
        assert!(pool.tracks_cleanup(&id));

        assert!(pool.remove_actor(&id).is_some());
        assert!(pool.remove_actor(&id).is_none());
        assert!(!pool.has(&id));
        assert!(!pool.tracks_cleanup(&id));
        assert!(pool.is_empty());

        pool.cleanup();
        assert_eq!(disconnects.get(), 0);
    }

    #[test]
    fn cleanup_survives_failing_hooks() {
        let mut ids = IdAllocator::new("conn0.");
        let mut pool = ActorPool::new();
        let disconnects = Rc::new(Cell::new(0));

        let mut failing = Probe::new(&disconnects);
        failing.fail = true;
        let mut panicking = Probe::new(&disconnects);
        panicking.panic = true;

        pool.add_actor(&mut ids, PoolEntry::live(failing));
        pool.add_actor(&mut ids, PoolEntry::live(panicking));
        pool.add_actor(&mut ids, PoolEntry::live(Probe::new(&disconnects)));
        pool.add_actor(&mut ids, PoolEntry::live(Silent));

        pool.cleanup();
        assert_eq!(disconnects.get(), 3);

        // the cleanup set is cleared, the actors are not
        pool.cleanup();
        assert_eq!(disconnects.get(), 3);
        assert_eq!(pool.len(), 4);
    }

    #[test]
    fn cleanup_skips_checked_out_actors() {
        let mut ids = IdAllocator::new("conn0.");
        let mut pool = ActorPool::new();
        let disconnects = Rc::new(Cell::new(0));

        let id = pool.add_actor(&mut ids, PoolEntry::live(Probe::new(&disconnects)));
        let entry = pool.take_for_dispatch(&id);
        assert!(matches!(entry, Some(PoolEntry::Live(_))));
        assert!(pool.is_dispatching(&id));
        assert!(pool.take_for_dispatch(&id).is_none());

        pool.cleanup();
        assert_eq!(disconnects.get(), 0);
    }

    #[test]
    fn replacing_factory_with_instance_starts_tracking() {
        let mut ids = IdAllocator::new("conn0.");
        let mut pool = ActorPool::new();
        let disconnects = Rc::new(Cell::new(0));
        let factory = FnFactory::new("probe", |_ctx: &FactoryContext<'_>| {
            eyre::bail!("unused")
        });

        let id = pool.add_actor(&mut ids, PoolEntry::factory(Rc::new(factory), None));
        let replaced = pool.insert(id.clone(), PoolEntry::live(Probe::new(&disconnects)));

        assert!(replaced.is_some_and(|entry| entry.is_factory()));
        assert!(pool.tracks_cleanup(&id));
    }
}
