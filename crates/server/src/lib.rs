//! Actor-based remote debugging protocol server.
//!
//! A [`DebuggerServer`] accepts transports (TCP sockets or in-process pipes)
//! and wraps each in a [`DebuggerServerConnection`]. A connection owns pools
//! of actors, addressable protocol endpoints, and routes every inbound
//! packet to the actor named by its `to` field:
//!
//! - [`Actor`], [`RequestTypes`] and [`Disconnect`] define what an actor is
//! - [`ActorFactory`] lets an actor be instantiated lazily, on its first
//!   packet
//! - [`ActorPool`] groups actors that are cleaned up together
//! - [`ActorRegistry`] holds the root actor constructor and the factories
//!   registered at runtime
//!
//! [`actors`] contains a minimal browser actor set: a root actor answering
//! `listTabs` and a tab actor clients can attach to.

mod actor;
pub mod actors;
mod admission;
mod config;
mod connection;
mod error;
mod pool;
mod registry;
mod server;

pub use actor::{
    Actor, ActorFactory, ActorId, Disconnect, DispatchError, FactoryContext, FnFactory, Handler,
    Reply, RequestTypes, RootActor, RootActorFactory,
};
pub use admission::{AdmissionPolicy, PromptAnswer, prompt_for_connection};
pub use config::{ServerConfig, TabDescriptor};
pub use connection::{ActorContext, ConnectionState, DebuggerServerConnection, ROOT_ACTOR};
pub use error::{ProtocolError, ServerError};
pub use pool::{ActorPool, IdAllocator, PoolEntry, PoolId};
pub use registry::{ActorModule, ActorRegistry};
pub use server::DebuggerServer;
