//! The contract between the connection and the actors it routes packets to.

use std::collections::HashMap;
use std::fmt;

use transport::Packet;

use crate::connection::{ActorContext, DebuggerServerConnection};

/// Connection-unique actor address, e.g. `conn0.tab2`.
pub type ActorId = String;

/// What a request handler produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Send this packet back, filling in `from` when it is missing.
    Packet(Packet),
    /// The handler replies later through the connection's packet sender.
    ///
    /// Nothing checks that the reply is ever sent.
    Deferred,
}

impl From<Packet> for Reply {
    fn from(packet: Packet) -> Self {
        Reply::Packet(packet)
    }
}

/// Failure to handle a request.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The actor has no handler for the packet's `type`.
    #[error("unrecognized packet type")]
    UnrecognizedPacketType,
    /// The handler ran and failed.
    #[error("{0:#}")]
    Failed(eyre::Report),
}

impl From<eyre::Report> for DispatchError {
    fn from(report: eyre::Report) -> Self {
        DispatchError::Failed(report)
    }
}

/// A stateful protocol endpoint addressed by its actor id.
pub trait Actor: 'static {
    /// Sub-prefix used when allocating this actor's id.
    fn actor_prefix(&self) -> Option<&str> {
        None
    }

    /// Handle one request addressed to this actor.
    fn handle(
        &mut self,
        packet: &Packet,
        ctx: &mut ActorContext<'_>,
    ) -> Result<Reply, DispatchError>;

    /// The actor's disconnect hook, if it has one.
    ///
    /// Pools only track actors that return `Some` here when they are
    /// registered.
    fn as_disconnect(&mut self) -> Option<&mut dyn Disconnect> {
        None
    }
}

/// Hook invoked when the pool owning an actor is cleaned up.
pub trait Disconnect {
    fn disconnect(&mut self) -> eyre::Result<()>;
}

/// The root actor of a connection, addressable as `root`.
pub trait RootActor: Actor {
    /// The greeting sent as the first packet of every connection.
    fn say_hello(&self) -> Packet;
}

/// Builds the root actor for each new connection.
pub trait RootActorFactory: 'static {
    fn create_root(&self, conn: &DebuggerServerConnection) -> Box<dyn RootActor>;
}

impl<F> RootActorFactory for F
where
    F: Fn(&DebuggerServerConnection) -> Box<dyn RootActor> + 'static,
{
    fn create_root(&self, conn: &DebuggerServerConnection) -> Box<dyn RootActor> {
        self(conn)
    }
}

/// Everything a factory learns about the actor it is asked to create.
#[derive(Debug, Clone, Copy)]
pub struct FactoryContext<'a> {
    /// Id the factory was registered under; the instance keeps it.
    pub actor_id: &'a str,
    /// Id of the actor that registered the factory, if any.
    pub parent_id: Option<&'a str>,
    pub connection_prefix: &'a str,
}

/// Stands in for an actor until the first packet addressed to it arrives.
pub trait ActorFactory: 'static {
    /// Name used in diagnostics and to match registrations for removal.
    fn name(&self) -> &str;

    fn actor_prefix(&self) -> Option<&str> {
        None
    }

    fn create(&self, ctx: &FactoryContext<'_>) -> eyre::Result<Box<dyn Actor>>;
}

/// An [`ActorFactory`] backed by a closure.
///
/// The factory's actor prefix defaults to its name.
pub struct FnFactory<F> {
    name: String,
    prefix: Option<String>,
    create: F,
}

impl<F> FnFactory<F>
where
    F: Fn(&FactoryContext<'_>) -> eyre::Result<Box<dyn Actor>> + 'static,
{
    pub fn new(name: impl Into<String>, create: F) -> Self {
        Self {
            name: name.into(),
            prefix: None,
            create,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }
}

impl<F> ActorFactory for FnFactory<F>
where
    F: Fn(&FactoryContext<'_>) -> eyre::Result<Box<dyn Actor>> + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn actor_prefix(&self) -> Option<&str> {
        Some(self.prefix.as_deref().unwrap_or(&self.name))
    }

    fn create(&self, ctx: &FactoryContext<'_>) -> eyre::Result<Box<dyn Actor>> {
        (self.create)(ctx)
    }
}

/// Request handler signature stored in a [`RequestTypes`] table.
pub type Handler<A> = fn(&mut A, &Packet, &mut ActorContext<'_>) -> eyre::Result<Reply>;

/// Table mapping packet `type` names to an actor's handlers.
///
/// Built once when the actor is constructed:
///
/// ```
/// use server::{ActorContext, Reply, RequestTypes};
/// use transport::Packet;
///
/// struct Echo;
///
/// impl Echo {
///     fn echo(&mut self, packet: &Packet, _ctx: &mut ActorContext<'_>) -> eyre::Result<Reply> {
///         Ok(Reply::Packet(packet.clone()))
///     }
/// }
///
/// let table = RequestTypes::<Echo>::new().on("echo", Echo::echo);
/// assert!(table.contains("echo"));
/// assert!(!table.contains("bogus"));
/// ```
pub struct RequestTypes<A> {
    handlers: HashMap<&'static str, Handler<A>>,
}

impl<A> RequestTypes<A> {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub fn on(mut self, request_type: &'static str, handler: Handler<A>) -> Self {
        self.handlers.insert(request_type, handler);
        self
    }

    pub fn contains(&self, request_type: &str) -> bool {
        self.handlers.contains_key(request_type)
    }

    pub fn lookup(&self, request_type: &str) -> Result<Handler<A>, DispatchError> {
        self.handlers
            .get(request_type)
            .copied()
            .ok_or(DispatchError::UnrecognizedPacketType)
    }

    /// The handler for `packet`'s `type`; a missing type is unrecognized.
    pub fn handler_for(&self, packet: &Packet) -> Result<Handler<A>, DispatchError> {
        self.lookup(packet.request_type().unwrap_or_default())
    }

    /// Route `packet` to the handler for its `type`.
    ///
    /// Actors that keep their table in a field cannot lend it and themselves
    /// at once; they copy the handler out with [`RequestTypes::handler_for`]
    /// and call it directly.
    pub fn dispatch(
        &self,
        actor: &mut A,
        packet: &Packet,
        ctx: &mut ActorContext<'_>,
    ) -> Result<Reply, DispatchError> {
        let handler = self.handler_for(packet)?;
        Ok(handler(actor, packet, ctx)?)
    }

    pub fn request_types(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.handlers.keys().copied()
    }
}

impl<A> Default for RequestTypes<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> fmt::Debug for RequestTypes<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.handlers.keys()).finish()
    }
}
