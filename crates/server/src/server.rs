//! The process-level server: listener, connection registry and event loop.

use std::collections::HashMap;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::rc::Rc;

use tokio::net::{TcpListener, TcpStream};
use tokio_stream::{StreamExt, StreamMap};
use transport::{Inbound, LocalTransport, SocketTransport, Transport, TransportEvent};

use crate::actor::ActorFactory;
use crate::actors::BrowserActors;
use crate::admission::{AdmissionPolicy, PromptAnswer};
use crate::config::ServerConfig;
use crate::connection::DebuggerServerConnection;
use crate::error::ServerError;
use crate::registry::{ActorModule, ActorRegistry};

/// Owns every connection, the actor registry and the listening socket.
///
/// All state lives on the task that drives the server: call
/// [`run`](Self::run) (or [`run_once`](Self::run_once)) for socket
/// connections, or [`process_pending`](Self::process_pending) to handle
/// events already queued by pipe connections.
///
/// ```
/// use server::{AdmissionPolicy, DebuggerServer, ServerConfig};
/// use transport::{Transport, TransportEvent};
///
/// let mut server = DebuggerServer::new(ServerConfig::default());
/// server.init(Some(AdmissionPolicy::deny_all()));
/// server.add_browser_actors()?;
///
/// let mut client = server.connect_pipe()?;
/// let mut inbound = client.ready()?;
/// match inbound.try_next() {
///     Some(TransportEvent::Packet(hello)) => assert_eq!(hello.from_actor(), Some("root")),
///     other => panic!("expected hello, got {other:?}"),
/// }
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct DebuggerServer {
    config: ServerConfig,
    registry: ActorRegistry,
    admission: Option<AdmissionPolicy>,
    transport_initialized: bool,
    connections: HashMap<String, DebuggerServerConnection>,
    inbound: StreamMap<String, Inbound>,
    next_conn_id: u64,
    listener: Option<TcpListener>,
    socket_connections: u32,
}

impl DebuggerServer {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            registry: ActorRegistry::new(),
            admission: None,
            transport_initialized: false,
            connections: HashMap::new(),
            inbound: StreamMap::new(),
            next_conn_id: 0,
            listener: None,
            socket_connections: 0,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut ServerConfig {
        &mut self.config
    }

    pub fn registry(&self) -> &ActorRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut ActorRegistry {
        &mut self.registry
    }

    /// Initialize the transport layer and the actor registry.
    ///
    /// Later calls do nothing. `allow` defaults to the terminal prompt.
    pub fn init(&mut self, allow: Option<AdmissionPolicy>) {
        if self.initialized() {
            return;
        }
        self.init_transport(allow);
        self.registry.init();
        tracing::debug!("debugger server initialized");
    }

    /// Initialize only the transport layer; later calls do nothing.
    pub fn init_transport(&mut self, allow: Option<AdmissionPolicy>) {
        if self.transport_initialized {
            return;
        }
        self.connections.clear();
        self.inbound.clear();
        self.next_conn_id = 0;
        self.admission = Some(allow.unwrap_or_default());
        self.transport_initialized = true;
    }

    pub fn initialized(&self) -> bool {
        self.registry.is_initialized()
    }

    /// Shut down if no connection is open.
    ///
    /// Closes the listener and forgets every actor module, factory and the
    /// admission policy. Returns whether the server shut down.
    pub fn destroy(&mut self) -> bool {
        if !self.connections.is_empty() {
            return false;
        }
        self.close_listener(false);
        self.registry.reset();
        self.admission = None;
        self.transport_initialized = false;
        tracing::info!("debugger server shut down");
        true
    }

    /// Layer in an actor module; a module already loaded is skipped.
    pub fn add_actors(&mut self, module: &dyn ActorModule) -> Result<bool, ServerError> {
        self.registry.add_module(module)
    }

    /// Install the built-in browser actors, listing the configured tabs.
    pub fn add_browser_actors(&mut self) -> Result<bool, ServerError> {
        let module = BrowserActors::new(self.config.tabs.clone());
        self.add_actors(&module)
    }

    pub fn add_global_actor(
        &mut self,
        factory: Rc<dyn ActorFactory>,
        name: Option<&str>,
    ) -> Result<String, ServerError> {
        self.registry.add_global_actor(factory, name)
    }

    pub fn remove_global_actor(&mut self, factory: &dyn ActorFactory) -> Result<usize, ServerError> {
        self.registry.remove_global_actor(factory)
    }

    pub fn add_tab_actor(
        &mut self,
        factory: Rc<dyn ActorFactory>,
        name: Option<&str>,
    ) -> Result<String, ServerError> {
        self.registry.add_tab_actor(factory, name)
    }

    pub fn remove_tab_actor(&mut self, factory: &dyn ActorFactory) -> Result<usize, ServerError> {
        self.registry.remove_tab_actor(factory)
    }

    /// Start listening for remote connections on `port`.
    ///
    /// Returns `Ok(false)` when remote debugging is disabled. Opening an
    /// already listening server does nothing; the listener is held until
    /// [`close_listener`](Self::close_listener).
    #[tracing::instrument(skip(self))]
    pub async fn open_listener(&mut self, port: u16) -> Result<bool, ServerError> {
        if !self.config.remote_enabled {
            tracing::info!("remote debugging is disabled");
            return Ok(false);
        }
        self.check_init()?;

        if self.listener.is_some() {
            return Ok(true);
        }

        let ip = if self.config.force_local {
            Ipv4Addr::LOCALHOST
        } else {
            Ipv4Addr::UNSPECIFIED
        };
        let listener = TcpListener::bind((ip, port))
            .await
            .map_err(|source| ServerError::Listen { port, source })?;
        tracing::info!(addr = ?listener.local_addr().ok(), "listening for debugger connections");

        self.listener = Some(listener);
        self.socket_connections += 1;
        Ok(true)
    }

    /// Release a hold on the listener, closing it at the last hold or when
    /// `force` is set. Returns `false` if not listening.
    pub fn close_listener(&mut self, force: bool) -> bool {
        if self.listener.is_none() || self.socket_connections == 0 {
            return false;
        }
        self.socket_connections -= 1;
        if self.socket_connections == 0 || force {
            self.listener = None;
            self.socket_connections = 0;
            tracing::info!("stopped listening for debugger connections");
        }
        true
    }

    pub fn listener_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref()?.local_addr().ok()
    }

    pub fn listener_holds(&self) -> u32 {
        self.socket_connections
    }

    /// Open an in-process connection, returning the client's end.
    ///
    /// No admission check is made.
    pub fn connect_pipe(&mut self) -> Result<LocalTransport, ServerError> {
        self.check_init()?;
        let (client, server) = LocalTransport::pair();
        self.on_connection(Box::new(server))?;
        Ok(client)
    }

    /// Bootstrap a connection over any transport and return its prefix.
    ///
    /// The root actor is registered and its hello packet sent before the
    /// transport starts delivering packets.
    #[tracing::instrument(skip_all)]
    pub fn on_connection(&mut self, transport: Box<dyn Transport>) -> Result<String, ServerError> {
        let prefix = format!("conn{}.", self.next_conn_id);
        self.next_conn_id += 1;

        let mut conn = DebuggerServerConnection::new(prefix.clone(), transport);
        let root = self.registry.create_root_actor(&conn)?;
        let hello = root.say_hello();
        conn.set_root_actor(root);
        conn.send(hello);
        let inbound = conn.ready()?;

        tracing::info!(connection = %prefix, "new debugger connection");
        self.inbound.insert(prefix.clone(), inbound);
        self.connections.insert(prefix.clone(), conn);
        Ok(prefix)
    }

    pub fn connection(&self, prefix: &str) -> Option<&DebuggerServerConnection> {
        self.connections.get(prefix)
    }

    pub fn connection_mut(&mut self, prefix: &str) -> Option<&mut DebuggerServerConnection> {
        self.connections.get_mut(prefix)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Handle every event already queued on any connection, without waiting.
    ///
    /// Returns the number of events handled.
    pub fn process_pending(&mut self) -> usize {
        let mut handled = 0;
        loop {
            let next = self
                .inbound
                .iter_mut()
                .find_map(|(prefix, inbound)| inbound.try_next().map(|event| (prefix.clone(), event)));
            let Some((prefix, event)) = next else {
                return handled;
            };
            self.handle_event(&prefix, event);
            handled += 1;
        }
    }

    /// Wait for one accepted socket or one transport event and handle it.
    ///
    /// Returns `false` without waiting when there is nothing left to wait
    /// for: no listener and no open connection.
    pub async fn run_once(&mut self) -> bool {
        if self.listener.is_none() && self.inbound.is_empty() {
            return false;
        }
        tokio::select! {
            accepted = accept(self.listener.as_ref()) => match accepted {
                Ok((stream, peer)) => self.on_socket_accepted(stream, peer),
                Err(e) => tracing::warn!(error = %e, "failed to accept connection"),
            },
            Some((prefix, event)) = self.inbound.next(), if !self.inbound.is_empty() => {
                self.handle_event(&prefix, event);
            }
        }
        true
    }

    /// Serve until the listener is closed and every connection has ended.
    pub async fn run(&mut self) {
        while self.run_once().await {}
        tracing::debug!("nothing left to serve");
    }

    fn check_init(&self) -> Result<(), ServerError> {
        if !self.transport_initialized {
            return Err(ServerError::NotInitialized);
        }
        if !self.registry.has_root_actor() {
            return Err(ServerError::NoRootActor);
        }
        Ok(())
    }

    fn on_socket_accepted(&mut self, stream: TcpStream, peer: SocketAddr) {
        let answer = match self.admission.as_mut() {
            Some(policy) => policy.decide(),
            None => PromptAnswer::Deny,
        };
        match answer {
            PromptAnswer::Allow => {
                let transport = SocketTransport::new(stream);
                if let Err(e) = self.on_connection(Box::new(transport)) {
                    tracing::error!(%peer, error = %e, "couldn't initialize connection");
                }
            }
            PromptAnswer::Deny => {
                tracing::info!(%peer, "refused debugger connection");
            }
            PromptAnswer::Disable => {
                tracing::info!(%peer, "refused debugger connection");
                self.disable_remote();
            }
        }
    }

    fn disable_remote(&mut self) {
        tracing::warn!("remote debugging disabled");
        self.close_listener(true);
        self.config.remote_enabled = false;
    }

    fn handle_event(&mut self, prefix: &str, event: TransportEvent) {
        match event {
            TransportEvent::Packet(packet) => {
                let Some(conn) = self.connections.get_mut(prefix) else {
                    tracing::debug!(connection = %prefix, "dropping packet for unknown connection");
                    return;
                };
                if let Err(e) = conn.on_packet(packet, &self.registry) {
                    tracing::warn!(connection = %prefix, error = %e, "packet not dispatched");
                }
            }
            TransportEvent::Closed(status) => {
                self.inbound.remove(prefix);
                if let Some(mut conn) = self.connections.remove(prefix) {
                    conn.on_closed(&status);
                }
            }
        }
    }
}

async fn accept(listener: Option<&TcpListener>) -> io::Result<(TcpStream, SocketAddr)> {
    match listener {
        Some(listener) => listener.accept().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote_server() -> DebuggerServer {
        let mut server = DebuggerServer::new(ServerConfig {
            remote_enabled: true,
            ..Default::default()
        });
        server.init(Some(AdmissionPolicy::allow_all()));
        server.add_browser_actors().unwrap();
        server
    }

    #[test]
    fn init_is_idempotent() {
        let mut server = DebuggerServer::new(ServerConfig::default());
        assert!(!server.initialized());

        server.init(None);
        assert!(server.initialized());
        assert!(server.add_browser_actors().unwrap());

        server.init(None);
        assert!(server.registry().is_loaded("browser"));
        assert!(!server.add_browser_actors().unwrap());
    }

    #[test]
    fn connect_pipe_requires_init_and_root() {
        let mut server = DebuggerServer::new(ServerConfig::default());
        assert!(matches!(server.connect_pipe(), Err(ServerError::NotInitialized)));

        server.init(None);
        assert!(matches!(server.connect_pipe(), Err(ServerError::NoRootActor)));

        server.add_browser_actors().unwrap();
        assert!(server.connect_pipe().is_ok());
        assert_eq!(server.connection_count(), 1);
        assert!(server.connection("conn0.").is_some());
    }

    #[tokio::test]
    async fn listener_disabled_by_config() {
        let mut server = DebuggerServer::new(ServerConfig::default());
        server.init(None);
        server.add_browser_actors().unwrap();

        assert!(!server.open_listener(0).await.unwrap());
        assert!(server.listener_addr().is_none());
        assert!(!server.close_listener(false));
    }

    #[tokio::test]
    async fn opening_twice_keeps_one_hold() {
        let mut server = remote_server();

        assert!(server.open_listener(0).await.unwrap());
        let addr = server.listener_addr().unwrap();
        assert!(addr.ip().is_loopback());
        assert!(server.open_listener(0).await.unwrap());
        assert_eq!(server.listener_holds(), 1);
        assert_eq!(server.listener_addr(), Some(addr));

        assert!(server.close_listener(false));
        assert!(server.listener_addr().is_none());
        assert_eq!(server.listener_holds(), 0);
        assert!(!server.close_listener(false));
    }

    #[tokio::test]
    async fn forced_close_stops_listening() {
        let mut server = remote_server();
        server.open_listener(0).await.unwrap();

        assert!(server.close_listener(true));
        assert!(server.listener_addr().is_none());
        assert_eq!(server.listener_holds(), 0);
    }

    #[tokio::test]
    async fn destroy_closes_listener() {
        let mut server = remote_server();
        server.open_listener(0).await.unwrap();
        server.open_listener(0).await.unwrap();

        assert!(server.destroy());
        assert!(server.listener_addr().is_none());
        assert_eq!(server.listener_holds(), 0);
    }

    #[tokio::test]
    async fn bind_failure_is_reported() {
        let mut server = remote_server();
        let taken = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let port = taken.local_addr().unwrap().port();

        let err = server.open_listener(port).await.unwrap_err();
        assert!(matches!(err, ServerError::Listen { port: p, .. } if p == port));
    }

    #[tokio::test]
    async fn disabling_remote_closes_listener() {
        let mut server = remote_server();
        server.open_listener(0).await.unwrap();
        server.open_listener(0).await.unwrap();

        server.disable_remote();

        assert!(server.listener_addr().is_none());
        assert!(!server.config().remote_enabled);
        assert!(!server.open_listener(0).await.unwrap());
    }

    #[tokio::test]
    async fn run_once_returns_when_idle() {
        let mut server = remote_server();
        assert!(!server.run_once().await);
    }

    #[test]
    fn destroy_waits_for_connections() {
        let mut server = remote_server();
        let client = server.connect_pipe().unwrap();
        assert!(!server.destroy());

        drop(client);
        server.process_pending();
        assert_eq!(server.connection_count(), 0);

        assert!(server.destroy());
        assert!(!server.initialized());
        assert!(matches!(server.connect_pipe(), Err(ServerError::NotInitialized)));
    }
}
