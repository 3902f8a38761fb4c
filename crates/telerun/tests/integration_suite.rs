//! Integration tests for telerun over real TCP channels.

use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use telepack::Value;
use telerpc::ExceptionKind;
use telerpc::HandshakeReply;
use telerpc::Reply;
use telerpc::Request;
use telerpc::VERSION;

use telerun::client;
use telerun::client::RpcClient;
use telerun::client::sync_up;
use telerun::config::ConfigError;
use telerun::config::ServerConfig;
use telerun::connection::Connection;
use telerun::identity::Identity;
use telerun::manager::RemoteManager;
use telerun::proxy::ProxyResource;
use telerun::server;
use telerun::server::ProxyServer;
use telerun::sim::SimBackend;
use telerun::sim::message_resource_shape;
use telerun::target::Backend;
use telerun::target::DEFAULT_QUERY;
use telerun::target::OpenOptions;
use telerun::transport::Transport;
use telerun::transport::read_frame;
use telerun::transport::write_frame;

const TIMEOUT: Duration = Duration::from_secs(5);

/// A running server and the task driving its loop.
struct Harness {
    server: Arc<ProxyServer>,
    runner: tokio::task::JoinHandle<()>,
}

impl Harness {
    async fn start() -> anyhow::Result<Self> {
        Self::start_with(ServerConfig::ephemeral().poll_interval(Duration::from_millis(20))).await
    }

    async fn start_with(config: ServerConfig) -> anyhow::Result<Self> {
        let server = Arc::new(ProxyServer::bind(config, Arc::new(SimBackend::new())).await?);
        let runner = tokio::spawn({
            let server = server.clone();
            async move { server.run().await }
        });
        Ok(Self { server, runner })
    }

    fn port(&self) -> u16 {
        self.server.handshake_addr().port()
    }

    fn library_path(&self) -> String {
        format!("127.0.0.1:{}", self.port())
    }

    async fn shutdown(self) -> anyhow::Result<()> {
        let stop = self.server.stop_handle();
        stop.stop();
        assert!(stop.is_stopped());
        tokio::time::timeout(TIMEOUT, self.runner).await??;
        self.server.close();
        Ok(())
    }
}

/// Opens a raw RPC connection and introduces it as `identity`.
async fn raw_channel(h: &Harness, identity: &str) -> anyhow::Result<tokio::net::TcpStream> {
    let mut stream = tokio::net::TcpStream::connect(h.server.rpc_addr()).await?;
    write_frame(&mut stream, identity.as_bytes()).await?;
    Ok(stream)
}

async fn next_reply(stream: &mut tokio::net::TcpStream) -> anyhow::Result<Reply> {
    let frame = tokio::time::timeout(TIMEOUT, read_frame(stream))
        .await??
        .ok_or_else(|| anyhow::anyhow!("server closed the channel"))?;
    Ok(Reply::decode(&frame)?)
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_env_filter("telerun=debug").with_test_writer().try_init();
}

// --- Test 1: Handshake Advertises the RPC Channel ---

#[tokio::test]
async fn test_handshake_fields() -> anyhow::Result<()> {
    init_tracing();
    let h = Harness::start().await?;

    let reply = sync_up(("127.0.0.1", h.port()), TIMEOUT).await?;
    assert_eq!(reply.rpc_port, h.server.rpc_addr().port());
    assert_ne!(reply.rpc_port, h.port());
    assert_eq!(reply.backend.as_deref(), Some("@sim"));
    assert_eq!(reply.version, VERSION);
    assert_eq!(&reply, h.server.handshake_reply());

    h.shutdown().await
}

#[tokio::test]
async fn test_handshake_answers_any_payload() -> anyhow::Result<()> {
    let h = Harness::start().await?;

    let conn = Connection::connect(("127.0.0.1", h.port()), Identity::from("curious")).await?;
    let first = conn.call(b"anything at all").await?;
    let second = conn.call(&[]).await?;
    assert_eq!(first, second);
    assert_eq!(HandshakeReply::decode(&first)?.rpc_port, h.server.rpc_addr().port());
    conn.close().await;

    h.shutdown().await
}

#[tokio::test]
async fn test_unadvertised_backend() -> anyhow::Result<()> {
    let h = Harness::start_with(ServerConfig::ephemeral().advertise_backend(false)).await?;
    let reply = sync_up(("127.0.0.1", h.port()), TIMEOUT).await?;
    assert_eq!(reply.backend, None);
    h.shutdown().await
}

// --- Test 2: Configuration Errors ---

#[tokio::test]
async fn test_identical_ports_rejected() {
    let config = ServerConfig::ephemeral().handshake_port(47123).rpc_port(47123);
    let result = ProxyServer::bind(config, Arc::new(SimBackend::new())).await;
    assert!(matches!(result, Err(server::Error::Config(ConfigError::PortsIdentical(47123)))));
}

// --- Test 3: Discovery Without a Server ---

#[tokio::test]
async fn test_sync_up_times_out() -> anyhow::Result<()> {
    let port = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        listener.local_addr()?.port()
    };
    let started = Instant::now();
    let result = sync_up(("127.0.0.1", port), Duration::from_millis(300)).await;
    assert!(matches!(result, Err(client::Error::HandshakeTimeout(_))));
    assert!(started.elapsed() < TIMEOUT);
    Ok(())
}

// --- Test 4: Transparent Proxy End to End ---

#[tokio::test]
async fn test_proxy_query_over_tcp() -> anyhow::Result<()> {
    init_tracing();
    let h = Harness::start().await?;
    let shape = Arc::new(message_resource_shape());

    let proxy = ProxyResource::open("127.0.0.1", h.port(), "ASRL1::INSTR", OpenOptions::default(), shape, TIMEOUT).await?;
    let idn = proxy.call("query", vec![Value::from("*IDN?")], Vec::new()).await?;
    assert_eq!(idn, Value::Str("TELEPATH,SIM-1000,ASRL1::INSTR,1.0".into()));
    assert_eq!(proxy.get("timeout").await?, Value::Int(2000));
    assert_eq!(h.server.registry().len(), 1);

    proxy.close().await?;
    assert!(h.server.registry().is_empty());

    h.shutdown().await
}

#[tokio::test]
async fn test_open_failure_reaches_client() -> anyhow::Result<()> {
    let h = Harness::start().await?;
    let shape = Arc::new(message_resource_shape());

    let result = ProxyResource::open("127.0.0.1", h.port(), "GPIB7::1::INSTR", OpenOptions::default(), shape, TIMEOUT).await;
    let Err(client::Error::Remote(err)) = result else {
        anyhow::bail!("opening a missing resource should raise remotely");
    };
    assert_eq!(err.kind_name(), "VisaIOError");
    assert!(h.server.registry().is_empty());

    h.shutdown().await
}

// --- Test 5: Manager ---

#[tokio::test]
async fn test_manager_lists_and_reports() -> anyhow::Result<()> {
    let h = Harness::start().await?;
    let manager = RemoteManager::connect(&h.library_path(), TIMEOUT).await?;

    let expected = SimBackend::new().list_resources(DEFAULT_QUERY)?;
    assert_eq!(manager.list_resources(None).await?, expected);
    assert_eq!(manager.list_resources(Some("?*SOCKET")).await?, vec!["TCPIP0::localhost::5025::SOCKET".to_string()]);

    let info = manager.debug_info();
    assert_eq!(info.server_version, VERSION);
    assert_eq!(info.client_version, VERSION);
    assert_eq!(info.backend.as_deref(), Some("@sim"));
    assert_eq!(info.rpc_port, h.server.rpc_addr().port());
    assert!(info.to_string().contains("Backend: @sim"));

    manager.close().await;
    h.shutdown().await
}

#[tokio::test]
async fn test_manager_rejects_bad_library_path() {
    let result = RemoteManager::connect("no-port-here", Duration::from_millis(100)).await;
    assert!(matches!(result, Err(client::Error::InvalidAddress(_))));
}

// --- Test 6: Sessions Are Per Identity ---

#[tokio::test]
async fn test_resources_opened_by_manager_are_isolated() -> anyhow::Result<()> {
    let h = Harness::start().await?;
    let manager = RemoteManager::connect(&h.library_path(), TIMEOUT).await?;
    let shape = Arc::new(message_resource_shape());

    let first = manager.open_resource("ASRL1::INSTR", OpenOptions::default(), shape.clone()).await?;
    let second = manager
        .open_resource("GPIB0::8::INSTR", OpenOptions::default().attribute("timeout", 10), shape)
        .await?;
    assert_ne!(first.client().identity(), second.client().identity());
    assert_eq!(h.server.registry().len(), 2);

    first.setattr("timeout", 500).await?;
    assert_eq!(first.get("timeout").await?, Value::Int(500));
    assert_eq!(second.get("timeout").await?, Value::Int(10));

    first.close().await?;
    assert_eq!(second.get("timeout").await?, Value::Int(10));
    second.close().await?;
    assert!(h.server.registry().is_empty());

    manager.close().await;
    h.shutdown().await
}

#[tokio::test]
async fn test_requests_without_session_fail() -> anyhow::Result<()> {
    let h = Harness::start().await?;
    let client = RpcClient::connect(h.server.rpc_addr()).await?;

    let result = client.request(&Request::getattr("timeout")).await;
    assert!(matches!(result, Err(client::Error::Remote(ref e)) if e.is_invalid_session()));

    client.close().await;
    h.shutdown().await
}

// --- Test 7: Closing Unblocks a Pending Call ---

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_close_during_slow_call() -> anyhow::Result<()> {
    let h = Harness::start().await?;
    let client = Arc::new(RpcClient::connect(h.server.rpc_addr()).await?);
    client.request(&Request::open_resource("ASRL1::INSTR")).await?;

    let pending = tokio::spawn({
        let client = client.clone();
        async move { client.request(&Request::getattr("query").arg("*IDN?").arg(1.0)).await }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;
    client.close().await;

    let result = tokio::time::timeout(Duration::from_millis(500), pending).await??;
    assert!(matches!(result, Err(client::Error::ChannelClosed)));
    assert!(matches!(client.request(&Request::getattr("timeout")).await, Err(client::Error::ChannelClosed)));

    h.shutdown().await
}

// --- Test 8: A Slow Target Does Not Stall the Loop ---

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_slow_client_does_not_block_others() -> anyhow::Result<()> {
    let h = Harness::start().await?;
    let slow = Arc::new(RpcClient::connect(h.server.rpc_addr()).await?);
    let fast = RpcClient::connect(h.server.rpc_addr()).await?;
    slow.request(&Request::open_resource("ASRL1::INSTR")).await?;
    fast.request(&Request::open_resource("GPIB0::8::INSTR")).await?;

    let started = Instant::now();
    let pending = tokio::spawn({
        let slow = slow.clone();
        async move { slow.request(&Request::getattr("query").arg("*OPC?").arg(1.5)).await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let reply = sync_up(("127.0.0.1", h.port()), TIMEOUT).await?;
    assert_eq!(reply.rpc_port, h.server.rpc_addr().port());
    assert_eq!(fast.request(&Request::getattr("timeout")).await?, Value::Int(2000));
    assert!(started.elapsed() < Duration::from_millis(1500));

    let answer = tokio::time::timeout(TIMEOUT, pending).await???;
    assert_eq!(answer, Value::Str("1".into()));

    fast.close().await;
    slow.close().await;
    h.shutdown().await
}

// --- Test 9: Shutdown Releases Sessions ---

#[tokio::test]
async fn test_shutdown_releases_sessions() -> anyhow::Result<()> {
    let h = Harness::start().await?;
    let shape = Arc::new(message_resource_shape());
    let proxy = ProxyResource::open("127.0.0.1", h.port(), "USB0::0x1111::0x2222::0x4444::INSTR", OpenOptions::default(), shape, TIMEOUT).await?;
    assert_eq!(h.server.registry().len(), 1);

    let registry = h.server.registry().clone();
    h.shutdown().await?;
    assert!(registry.is_empty());
    assert!(registry.is_closed());

    let after = tokio::time::timeout(TIMEOUT, proxy.get("timeout")).await?;
    assert!(after.is_err());
    Ok(())
}

// --- Test 10: Pipelined Requests Are Answered in Order ---

#[tokio::test]
async fn test_pipelined_requests_keep_order() -> anyhow::Result<()> {
    let h = Harness::start().await?;
    let mut stream = raw_channel(&h, "ordered-client").await?;

    write_frame(&mut stream, &Request::open_resource("ASRL1::INSTR").encode()?).await?;
    for i in 1..=5i64 {
        write_frame(&mut stream, &Request::setattr("timeout", i).encode()?).await?;
        write_frame(&mut stream, &Request::getattr("timeout").encode()?).await?;
    }

    assert_eq!(next_reply(&mut stream).await?, Reply::Value(Value::Str(String::new())));
    for i in 1..=5i64 {
        assert_eq!(next_reply(&mut stream).await?, Reply::Value(Value::Null));
        assert_eq!(next_reply(&mut stream).await?, Reply::Value(Value::Int(i)));
    }

    drop(stream);
    h.shutdown().await
}

// --- Test 11: Requests Beyond the Pending Limit Are Refused ---

#[tokio::test]
async fn test_pending_limit_refuses_extra_requests() -> anyhow::Result<()> {
    let config = ServerConfig::ephemeral().poll_interval(Duration::from_millis(20)).max_pending(2);
    let h = Harness::start_with(config).await?;
    let mut stream = raw_channel(&h, "eager-client").await?;

    write_frame(&mut stream, &Request::open_resource("ASRL1::INSTR").encode()?).await?;
    assert!(matches!(next_reply(&mut stream).await?, Reply::Value(_)));

    write_frame(&mut stream, &Request::getattr("query").arg("*IDN?").arg(0.5).encode()?).await?;
    for _ in 0..4 {
        write_frame(&mut stream, &Request::getattr("timeout").encode()?).await?;
    }

    for _ in 0..2 {
        let Reply::Exception(exc) = next_reply(&mut stream).await? else {
            anyhow::bail!("requests over the limit should be refused first");
        };
        assert_eq!(exc.kind, ExceptionKind::Protocol);
        assert!(exc.message.contains("pending"));
    }
    assert_eq!(next_reply(&mut stream).await?, Reply::Value(Value::Str("TELEPATH,SIM-1000,ASRL1::INSTR,1.0".into())));
    assert_eq!(next_reply(&mut stream).await?, Reply::Value(Value::Int(2000)));
    assert_eq!(next_reply(&mut stream).await?, Reply::Value(Value::Int(2000)));

    drop(stream);
    h.shutdown().await
}
