//! End-to-end tests over TCP.

use std::io::IsTerminal;
use std::net::SocketAddr;
use std::time::Duration;

use eyre::{OptionExt, Result, WrapErr};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use server::{AdmissionPolicy, DebuggerServer, ServerConfig, TabDescriptor};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing_subscriber::EnvFilter;
use transport::{Packet, PacketCodec};

// test suite "constructor"
#[ctor::ctor]
fn init() {
    let in_ci = std::env::var("CI")
        .map(|val| val == "true")
        .unwrap_or(false);

    if std::io::stderr().is_terminal() || in_ci {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .try_init();
    } else {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .json()
            .try_init();
    }

    // error traces
    let _ = color_eyre::install();
}

const TIMEOUT: Duration = Duration::from_secs(10);

type Connection = Framed<TcpStream, PacketCodec>;

async fn listening_server(policy: AdmissionPolicy) -> Result<(DebuggerServer, SocketAddr)> {
    let mut server = DebuggerServer::new(ServerConfig {
        remote_enabled: true,
        port: 0,
        tabs: vec![TabDescriptor::new("Example", "https://example.com/")],
        ..Default::default()
    });
    server.init(Some(policy));
    server.add_browser_actors()?;
    assert!(server.open_listener(0).await?);
    let addr = server.listener_addr().ok_or_eyre("listener address")?;
    Ok((server, addr))
}

async fn connect(addr: SocketAddr) -> Result<Connection> {
    let stream = TcpStream::connect(addr).await.wrap_err("connecting")?;
    Ok(Framed::new(stream, PacketCodec::new()))
}

async fn receive(conn: &mut Connection) -> Result<Option<Packet>> {
    Ok(conn.next().await.transpose()?)
}

/// Drive the server while `client` runs.
async fn with_server<T>(
    server: &mut DebuggerServer,
    client: impl Future<Output = Result<T>>,
) -> Result<T> {
    let driven = async {
        tokio::select! {
            result = client => result,
            _ = server.run() => eyre::bail!("server stopped serving"),
        }
    };
    tokio::time::timeout(TIMEOUT, driven)
        .await
        .wrap_err("timed out")?
}

#[tokio::test]
async fn accepted_socket_gets_hello_and_replies() -> Result<()> {
    let (mut server, addr) = listening_server(AdmissionPolicy::allow_all()).await?;

    let (hello, tabs) = with_server(&mut server, async {
        let mut conn = connect(addr).await?;
        let hello = receive(&mut conn).await?.ok_or_eyre("hello")?;
        conn.send(Packet::request("root", "listTabs")).await?;
        let tabs = receive(&mut conn).await?.ok_or_eyre("listTabs reply")?;
        Ok((hello, tabs))
    })
    .await?;

    assert_eq!(
        hello.into_value(),
        json!({"from": "root", "applicationType": "browser", "traits": {}})
    );
    assert_eq!(
        tabs.into_value(),
        json!({
            "from": "root",
            "selected": 0,
            "tabs": [{"actor": "conn0.tab2", "title": "Example", "url": "https://example.com/"}],
        })
    );
    assert_eq!(server.connection_count(), 1);

    Ok(())
}

#[tokio::test]
async fn refused_socket_is_dropped() -> Result<()> {
    let (mut server, addr) = listening_server(AdmissionPolicy::deny_all()).await?;

    let received = with_server(&mut server, async {
        let mut conn = connect(addr).await?;
        receive(&mut conn).await
    })
    .await?;

    assert!(received.is_none());
    assert_eq!(server.connection_count(), 0);
    assert!(server.listener_addr().is_some());

    Ok(())
}

#[tokio::test]
async fn malformed_input_closes_only_that_connection() -> Result<()> {
    let (mut server, addr) = listening_server(AdmissionPolicy::allow_all()).await?;

    let reply = with_server(&mut server, async {
        let mut good = connect(addr).await?;
        receive(&mut good).await?.ok_or_eyre("hello")?;

        let mut bad = TcpStream::connect(addr).await?;
        let mut hello = [0u8; 1];
        tokio::io::AsyncReadExt::read(&mut bad, &mut hello).await?;
        tokio::io::AsyncWriteExt::write_all(&mut bad, b"not json at all").await?;
        // the server hangs up, possibly with a reset
        let _ = tokio::io::AsyncReadExt::read_to_end(&mut bad, &mut Vec::new()).await;

        good.send(Packet::request("root", "bogus")).await?;
        receive(&mut good).await?.ok_or_eyre("reply")
    })
    .await?;

    assert_eq!(reply.error_name(), Some("unrecognizedPacketType"));
    assert_eq!(server.connection_count(), 1);
    assert!(server.connection("conn0.").is_some());

    Ok(())
}

#[tokio::test]
async fn client_hangup_removes_connection() -> Result<()> {
    let (mut server, addr) = listening_server(AdmissionPolicy::allow_all()).await?;

    with_server(&mut server, async {
        let mut conn = connect(addr).await?;
        receive(&mut conn).await?.ok_or_eyre("hello")?;
        Ok(())
    })
    .await?;
    assert_eq!(server.connection_count(), 1);

    // the client is gone; serve until the close is noticed
    tokio::time::timeout(TIMEOUT, async {
        while server.connection_count() > 0 {
            server.run_once().await;
        }
    })
    .await
    .wrap_err("timed out waiting for the connection to close")?;

    assert!(server.close_listener(false));
    assert!(!server.run_once().await);

    Ok(())
}
