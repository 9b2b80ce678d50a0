//! A single client connection: pools, id allocation and packet dispatch.

use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};

use serde_json::Value;
use transport::{CloseStatus, Inbound, Packet, PacketSender, Transport};

use crate::actor::{Actor, ActorId, DispatchError, FactoryContext, Reply, RootActor};
use crate::error::{ProtocolError, ServerError};
use crate::pool::{self, ActorPool, IdAllocator, PoolEntry, PoolId};
use crate::registry::ActorRegistry;

/// Address clients use for the connection's root actor.
pub const ROOT_ACTOR: &str = "root";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Open,
    Closed,
}

/// Routes the packets of one transport to the actors in its pools.
///
/// The default pool exists for the connection's whole lifetime. Extra pools
/// are searched after it, in the order they were added. Each actor id is
/// registered in at most one pool at a time.
pub struct DebuggerServerConnection {
    prefix: String,
    transport: Box<dyn Transport>,
    ids: IdAllocator,
    pools: HashMap<PoolId, ActorPool>,
    next_pool: u64,
    default_pool: PoolId,
    extra_pools: Vec<PoolId>,
    registered: HashMap<ActorId, PoolId>,
    root_actor: Option<ActorId>,
    state: ConnectionState,
}

impl DebuggerServerConnection {
    pub fn new(prefix: impl Into<String>, transport: Box<dyn Transport>) -> Self {
        let prefix = prefix.into();
        let default_pool = PoolId(0);
        let mut pools = HashMap::new();
        pools.insert(default_pool, ActorPool::new());

        Self {
            ids: IdAllocator::new(prefix.clone()),
            prefix,
            transport,
            pools,
            next_pool: 1,
            default_pool,
            extra_pools: Vec::new(),
            registered: HashMap::new(),
            root_actor: None,
            state: ConnectionState::Open,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == ConnectionState::Closed
    }

    /// Mint a new actor id unique within this connection.
    pub fn alloc_id(&mut self, prefix: Option<&str>) -> ActorId {
        self.ids.alloc(prefix)
    }

    pub fn send(&self, packet: Packet) {
        tracing::trace!(connection = %self.prefix, ?packet, "sending packet");
        self.transport.send(packet);
    }

    /// Handle for replying after a handler has returned [`Reply::Deferred`].
    pub fn sender(&self) -> PacketSender {
        self.transport.sender()
    }

    pub fn ready(&mut self) -> Result<Inbound, ServerError> {
        Ok(self.transport.ready()?)
    }

    pub fn close(&mut self) {
        self.transport.close();
    }

    pub fn default_pool(&self) -> PoolId {
        self.default_pool
    }

    pub fn extra_pools(&self) -> &[PoolId] {
        &self.extra_pools
    }

    pub fn pool(&self, pool: PoolId) -> Option<&ActorPool> {
        self.pools.get(&pool)
    }

    /// Create a pool that is not searched until added with
    /// [`add_actor_pool`](Self::add_actor_pool).
    pub fn create_pool(&mut self) -> PoolId {
        let id = PoolId(self.next_pool);
        self.next_pool += 1;
        self.pools.insert(id, ActorPool::new());
        id
    }

    pub fn add_actor_pool(&mut self, pool: PoolId) -> Result<(), ServerError> {
        if pool == self.default_pool || !self.pools.contains_key(&pool) {
            return Err(ServerError::NoSuchPool);
        }
        self.extra_pools.push(pool);
        Ok(())
    }

    /// Stop searching `pool`, removing its last occurrence from the search
    /// list.
    ///
    /// With `cleanup`, the pool's disconnect hooks run and the pool and its
    /// actors are discarded.
    pub fn remove_actor_pool(&mut self, pool: PoolId, cleanup: bool) -> Result<(), ServerError> {
        if pool == self.default_pool || !self.pools.contains_key(&pool) {
            return Err(ServerError::NoSuchPool);
        }
        if let Some(index) = self.extra_pools.iter().rposition(|p| *p == pool) {
            self.extra_pools.remove(index);
        }
        if cleanup {
            self.discard_pool(pool);
        }
        Ok(())
    }

    /// Register `entry` in the default pool.
    pub fn add_actor(&mut self, entry: PoolEntry) -> ActorId {
        let pool = self.default_pool;
        self.register_new(pool, entry)
    }

    pub fn add_actor_to(&mut self, pool: PoolId, entry: PoolEntry) -> Result<ActorId, ServerError> {
        if !self.pools.contains_key(&pool) {
            return Err(ServerError::NoSuchPool);
        }
        Ok(self.register_new(pool, entry))
    }

    /// Register `entry` under a known id, first removing that id from any
    /// other pool.
    pub fn add_actor_with_id(
        &mut self,
        pool: PoolId,
        id: impl Into<ActorId>,
        entry: PoolEntry,
    ) -> Result<(), ServerError> {
        if !self.pools.contains_key(&pool) {
            return Err(ServerError::NoSuchPool);
        }
        let id = id.into();
        if let Some(previous) = self.registered.get(&id).copied() {
            if previous != pool {
                if let Some(old) = self.pools.get_mut(&previous) {
                    old.remove_actor(&id);
                }
            }
        }
        self.insert_entry(pool, id, entry);
        Ok(())
    }

    /// Move an actor to another pool, keeping its id.
    ///
    /// Returns `false` if no actor is registered under `id`.
    pub fn reparent(&mut self, id: &str, pool: PoolId) -> Result<bool, ServerError> {
        if !self.pools.contains_key(&pool) {
            return Err(ServerError::NoSuchPool);
        }
        let Some(current) = self.registered.get(id).copied() else {
            return Ok(false);
        };
        if current == pool {
            return Ok(true);
        }
        let entry = self
            .pools
            .get_mut(&current)
            .and_then(|p| p.remove_actor(id));
        match entry {
            Some(entry) => {
                self.insert_entry(pool, id.to_owned(), entry);
                Ok(true)
            }
            None => {
                self.registered.remove(id);
                Ok(false)
            }
        }
    }

    /// Remove an actor from the default pool.
    pub fn remove_actor(&mut self, id: &str) -> Option<PoolEntry> {
        let pool = self.default_pool;
        self.remove_actor_from(pool, id)
    }

    pub fn remove_actor_from(&mut self, pool: PoolId, id: &str) -> Option<PoolEntry> {
        let entry = self.pools.get_mut(&pool)?.remove_actor(id)?;
        self.registered.remove(id);
        Some(entry)
    }

    /// Look up the actor a packet addressed to `to` would reach.
    pub fn get_actor(&self, to: &str) -> Option<&PoolEntry> {
        let (id, pool) = self.resolve(to)?;
        self.pools.get(&pool)?.get(&id)
    }

    /// The pool the actor `id` is registered in, searched or not.
    pub fn pool_of(&self, id: &str) -> Option<PoolId> {
        self.registered.get(id).copied()
    }

    pub fn root_actor_id(&self) -> Option<&str> {
        self.root_actor.as_deref()
    }

    /// Register the connection's root actor in the default pool.
    pub fn set_root_actor(&mut self, actor: Box<dyn RootActor>) -> ActorId {
        let actor: Box<dyn Actor> = actor;
        let id = self.add_actor(PoolEntry::Live(actor));
        tracing::debug!(connection = %self.prefix, actor = %id, "registered root actor");
        self.root_actor = Some(id.clone());
        id
    }

    /// Log the contents of every pool.
    pub fn dump_pools(&self) {
        let dump = |label: &str, pool: PoolId| {
            if let Some(actors) = self.pools.get(&pool) {
                let mut ids: Vec<_> = actors.actor_ids().collect();
                ids.sort_unstable();
                tracing::debug!(connection = %self.prefix, %pool, ?ids, "{label}");
            }
        };
        dump("default pool", self.default_pool);
        for pool in &self.extra_pools {
            dump("extra pool", *pool);
        }
    }

    /// Dispatch one inbound packet, sending whatever reply it produces.
    pub fn on_packet(
        &mut self,
        packet: Packet,
        registry: &ActorRegistry,
    ) -> Result<(), ServerError> {
        if self.is_closed() {
            return Err(ServerError::ConnectionClosed(self.prefix.clone()));
        }
        tracing::trace!(connection = %self.prefix, ?packet, "received packet");
        if let Some(reply) = self.dispatch(&packet, registry) {
            self.send(reply);
        }
        Ok(())
    }

    /// Tear down after the transport closed. Only the first call has any
    /// effect.
    pub fn on_closed(&mut self, status: &CloseStatus) {
        if self.is_closed() {
            return;
        }
        self.state = ConnectionState::Closed;
        tracing::info!(connection = %self.prefix, %status, "connection closed");

        if let Some(pool) = self.pools.get_mut(&self.default_pool) {
            pool.cleanup();
        }
        for pool in std::mem::take(&mut self.extra_pools) {
            self.discard_pool(pool);
        }
    }

    fn dispatch(&mut self, packet: &Packet, registry: &ActorRegistry) -> Option<Packet> {
        let to = packet.to().unwrap_or_default();
        let Some((actor_id, pool_id)) = self.resolve(to) else {
            return Some(no_such_actor(packet));
        };
        let Some(entry) = self
            .pools
            .get_mut(&pool_id)
            .and_then(|p| p.take_for_dispatch(&actor_id))
        else {
            return Some(no_such_actor(packet));
        };

        let mut actor = match entry {
            PoolEntry::Live(actor) => actor,
            PoolEntry::Factory { factory, parent_id } => {
                let ctx = FactoryContext {
                    actor_id: &actor_id,
                    parent_id: parent_id.as_deref(),
                    connection_prefix: &self.prefix,
                };
                match factory.create(&ctx) {
                    Ok(actor) => {
                        tracing::debug!(
                            connection = %self.prefix,
                            actor = %actor_id,
                            factory = factory.name(),
                            "instantiated actor from factory"
                        );
                        actor
                    }
                    Err(e) => {
                        tracing::warn!(actor = %actor_id, error = ?e, "actor factory failed");
                        let message = format!(
                            "error occurred while creating actor '{}': {e:#}",
                            factory.name()
                        );
                        if let Some(pool) = self.pools.get_mut(&pool_id) {
                            if pool.is_dispatching(&actor_id) {
                                pool.insert(actor_id, PoolEntry::Factory { factory, parent_id });
                            }
                        }
                        return Some(error_reply(to, ProtocolError::UnknownError, message));
                    }
                }
            }
            PoolEntry::Dispatching => return Some(no_such_actor(packet)),
        };

        let request_type = packet.request_type().unwrap_or_default();
        let result = {
            let mut ctx = ActorContext {
                conn: self,
                registry,
                actor_id: &actor_id,
                pool: pool_id,
            };
            panic::catch_unwind(AssertUnwindSafe(|| actor.handle(packet, &mut ctx)))
        };
        self.finish_dispatch(actor_id.clone(), pool_id, actor);

        match result {
            Ok(Ok(Reply::Packet(mut reply))) => {
                if reply.from_actor().is_none() {
                    reply.set_from(to);
                }
                Some(reply)
            }
            Ok(Ok(Reply::Deferred)) => None,
            Ok(Err(DispatchError::UnrecognizedPacketType)) => Some(error_reply(
                to,
                ProtocolError::UnrecognizedPacketType,
                format!("Actor \"{actor_id}\" does not recognize the packet type \"{request_type}\""),
            )),
            Ok(Err(DispatchError::Failed(e))) => {
                tracing::error!(actor = %to, request_type, error = ?e, "request handler failed");
                Some(error_reply(
                    to,
                    ProtocolError::UnknownError,
                    format!("error occurred while processing '{request_type}' request: {e:#}"),
                ))
            }
            Err(payload) => {
                let description = panic_description(payload.as_ref());
                tracing::error!(actor = %to, request_type, %description, "request handler panicked");
                Some(error_reply(
                    to,
                    ProtocolError::UnknownError,
                    format!("error occurred while processing '{request_type}' request: {description}"),
                ))
            }
        }
    }

    /// Check a dispatched actor back in.
    ///
    /// The handler may have moved, removed or discarded the actor in the
    /// meantime. A removed actor is dropped; one whose pool was discarded
    /// gets its disconnect hook run first.
    fn finish_dispatch(&mut self, id: ActorId, origin: PoolId, mut actor: Box<dyn Actor>) {
        if let Some(pool) = self.registered.get(&id).copied() {
            if let Some(actors) = self.pools.get_mut(&pool) {
                if actors.is_dispatching(&id) {
                    actors.insert(id, PoolEntry::Live(actor));
                    return;
                }
            }
        }
        if !self.pools.contains_key(&origin) {
            pool::run_disconnect(&id, actor.as_mut());
        }
        tracing::debug!(connection = %self.prefix, actor = %id, "dropping actor removed during dispatch");
    }

    fn resolve(&self, to: &str) -> Option<(ActorId, PoolId)> {
        if to == ROOT_ACTOR {
            let id = self.root_actor.as_ref()?;
            let pool = self.registered.get(id)?;
            return Some((id.clone(), *pool));
        }
        std::iter::once(&self.default_pool)
            .chain(self.extra_pools.iter())
            .find(|pool| self.pools.get(*pool).is_some_and(|p| p.has(to)))
            .map(|pool| (to.to_owned(), *pool))
    }

    fn register_new(&mut self, pool: PoolId, entry: PoolEntry) -> ActorId {
        let id = self.ids.alloc(entry.actor_prefix());
        self.insert_entry(pool, id.clone(), entry);
        id
    }

    fn insert_entry(&mut self, pool: PoolId, id: ActorId, entry: PoolEntry) {
        if let Some(actors) = self.pools.get_mut(&pool) {
            actors.insert(id.clone(), entry);
            self.registered.insert(id, pool);
        }
    }

    fn discard_pool(&mut self, pool: PoolId) {
        let Some(mut actors) = self.pools.remove(&pool) else {
            return;
        };
        actors.cleanup();
        for id in actors.actor_ids() {
            if self.registered.get(id) == Some(&pool) {
                self.registered.remove(id);
            }
        }
        tracing::debug!(connection = %self.prefix, %pool, actors = actors.len(), "discarded actor pool");
    }
}

/// What a handler can reach while it handles a request.
pub struct ActorContext<'a> {
    conn: &'a mut DebuggerServerConnection,
    registry: &'a ActorRegistry,
    actor_id: &'a str,
    pool: PoolId,
}

impl<'a> ActorContext<'a> {
    /// Id of the actor handling the request.
    pub fn actor_id(&self) -> &str {
        self.actor_id
    }

    /// The pool the handling actor was dispatched from.
    pub fn pool(&self) -> PoolId {
        self.pool
    }

    pub fn connection(&mut self) -> &mut DebuggerServerConnection {
        self.conn
    }

    pub fn registry(&self) -> &'a ActorRegistry {
        self.registry
    }

    pub fn send(&self, packet: Packet) {
        self.conn.send(packet);
    }

    pub fn sender(&self) -> PacketSender {
        self.conn.sender()
    }
}

/// Replies from the requested address as sent, or from the root actor
/// when none was given.
fn no_such_actor(packet: &Packet) -> Packet {
    let error = ProtocolError::NoSuchActor.as_str();
    match packet.get("to") {
        Some(Value::String(to)) if !to.is_empty() => Packet::error(to.as_str(), error, None),
        Some(Value::Null) | Some(Value::String(_)) | None => Packet::error(ROOT_ACTOR, error, None),
        Some(to) => Packet::new().with("from", to.clone()).with("error", error),
    }
}

fn error_reply(to: &str, error: ProtocolError, message: String) -> Packet {
    Packet::error(to, error.as_str(), Some(message))
}

fn panic_description(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked".to_owned()
    }
}
