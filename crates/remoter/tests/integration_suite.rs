use std::sync::Arc;
use std::sync::OnceLock;
use std::time::Duration;

use serde_json::Value;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use remoter::Args;
use remoter::CallError;
use remoter::CallResult;
use remoter::DispatcherBuilder;
use remoter::HttpTransport;
use remoter::InstanceRegistry;
use remoter::LocalTransport;
use remoter::MethodTable;
use remoter::PeerHandle;
use remoter::Session;
use remoter::SessionProxy;
use remoter::SessionType;
use remoter::Transport;
use remoter::TransportServer;
use remoter::transport::ASYNC_HEADER;

type R<T> = anyhow::Result<T>;

fn init_tracing() {
    static INIT: OnceLock<()> = OnceLock::new();
    INIT.get_or_init(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

async fn within<T>(fut: impl std::future::Future<Output = T>) -> R<T> {
    Ok(tokio::time::timeout(Duration::from_secs(10), fut).await?)
}

// --- Ping-pong fixture ---

/// Session that reports each connecting peer to the test.
struct Table {
    joined: mpsc::UnboundedSender<PeerHandle>,
}

#[async_trait::async_trait]
impl Session for Table {
    async fn peer_connected(self: Arc<Self>, peer: PeerHandle) {
        let _ = self.joined.send(peer);
    }
}

async fn pong(args: Args) -> CallResult {
    let m: i64 = args.get(0, "m")?;
    Ok(json!(m + 1))
}

async fn refuse() -> CallResult {
    Err(CallError::Application("table is closed".to_string()))
}

async fn crash() -> CallResult {
    panic!("table fell over")
}

fn table_methods() -> MethodTable<Table> {
    MethodTable::new()
        .sync("pong", |_, args| pong(args))
        .sync("refuse", |_, _| refuse())
        .sync("crash", |_, _| crash())
}

struct Player {
    session: SessionProxy,
}

/// Bounces `n + 1` off the session and returns its answer.
async fn ping(player: Arc<Player>, args: Args) -> CallResult {
    let n: i64 = args.get(0, "n")?;
    Ok(player.session.call("pong", Args::new().arg(n + 1)).await?)
}

fn player_methods() -> MethodTable<Player> {
    MethodTable::new()
        .with_builtins()
        .long_running("ping", |player, args| ping(player, args))
}

fn registry() -> (Arc<InstanceRegistry>, mpsc::UnboundedReceiver<PeerHandle>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let registry = InstanceRegistry::new().with(SessionType::new(
        "pingpong",
        move || Table { joined: tx.clone() },
        table_methods(),
    ));
    (Arc::new(registry), rx)
}

async fn ping_pong_over(transport: Arc<dyn Transport>, joined: &mut mpsc::UnboundedReceiver<PeerHandle>) -> R<()> {
    let dispatcher = DispatcherBuilder::new(transport)
        .poll_interval(Duration::from_millis(10))
        .session_conventions(table_methods().conventions())
        .connect(player_methods(), |session| Player { session })
        .await?;

    let peer = within(joined.recv())
        .await?
        .ok_or_else(|| anyhow::anyhow!("peer never connected"))?;
    let running = tokio::spawn(dispatcher.run());

    let answer: i64 = within(peer.call_as("ping", Args::new().arg(5))).await??;
    assert_eq!(answer, 7);

    // stop the peer the way a session does
    let status = within(peer.call("exit", Args::new().arg(0))).await??;
    assert_eq!(status, json!("0"));
    assert_eq!(within(running).await??, 0);
    Ok(())
}

// --- Test 1: In-process round trip ---

#[tokio::test]
async fn test_ping_pong_local() -> R<()> {
    init_tracing();
    let (registry, mut joined) = registry();
    let transport = Arc::new(LocalTransport::new(registry, "pingpong"));
    ping_pong_over(transport, &mut joined).await
}

// --- Test 2: Same exchange over HTTP ---

async fn spawn_server(registry: Arc<InstanceRegistry>) -> R<String> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(TransportServer::new(registry).serve(listener));
    Ok(format!("http://{}", addr))
}

#[tokio::test]
async fn test_ping_pong_http() -> R<()> {
    init_tracing();
    let (registry, mut joined) = registry();
    let base = spawn_server(registry).await?;

    let transport = Arc::new(HttpTransport::new(&base, "pingpong"));
    ping_pong_over(transport, &mut joined).await
}

// --- Test 3: Wire format seen by a raw HTTP client ---

#[tokio::test]
async fn test_http_wire_format() -> R<()> {
    init_tracing();
    let (registry, mut joined) = registry();
    let base = spawn_server(registry).await?;
    let http = reqwest::Client::new();

    let instance: u64 = http.post(format!("{}/pingpong", base)).send().await?.json().await?;
    let pid: u64 = http
        .post(format!("{}/pingpong/{}/player", base, instance))
        .send()
        .await?
        .json()
        .await?;
    assert!((1000..10000).contains(&pid));

    let peer = within(joined.recv())
        .await?
        .ok_or_else(|| anyhow::anyhow!("peer never connected"))?;
    let pending = tokio::spawn(async move { peer.call("greet", Args::new().arg(1).arg(2).kwarg("x", 3)).await });

    let events_url = format!("{}/pingpong/{}/player/{}/e", base, instance, pid);
    let listing = within(async {
        loop {
            let listing: Value = http.get(&events_url).send().await?.json().await?;
            if listing.as_object().is_some_and(|events| !events.is_empty()) {
                return Ok::<_, anyhow::Error>(listing);
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await??;
    assert_eq!(listing, json!({"1": ["greet", [1, 2], {"x": 3}]}));

    let ack = http.post(format!("{}/1", events_url)).json(&json!(6)).send().await?;
    assert!(ack.status().is_success());
    assert_eq!(within(pending).await???, json!(6));

    // a second ack of the same id is harmless
    let again = http.post(format!("{}/1", events_url)).body("not json").send().await?;
    assert!(again.status().is_success());

    // synchronous invocation with positional and keyword arguments
    let reply: Value = http
        .post(format!("{}/pingpong/{}/pong", base, instance))
        .json(&json!({"": [], "m": 41}))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(reply, json!(42));

    // long-running invocation answers with a future id, resolved under /f
    let future: u64 = http
        .post(format!("{}/pingpong/{}/pong", base, instance))
        .header(ASYNC_HEADER, pid.to_string())
        .json(&json!({"": [9]}))
        .send()
        .await?
        .json()
        .await?;

    let futures_url = format!("{}/pingpong/{}/player/{}/f", base, instance, pid);
    let resolved = within(async {
        loop {
            let listing: Value = http.get(&futures_url).send().await?.json().await?;
            if let Some(value) = listing.get(future.to_string()) {
                return Ok::<_, anyhow::Error>(value.clone());
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await??;
    assert_eq!(resolved, json!(10));

    let deleted = http.delete(format!("{}/{}", futures_url, future)).send().await?;
    assert!(deleted.status().is_success());
    let listing: Value = http.get(&futures_url).send().await?.json().await?;
    assert_eq!(listing, json!({}));
    Ok(())
}

// --- Test 4: Error statuses ---

#[tokio::test]
async fn test_http_error_statuses() -> R<()> {
    init_tracing();
    let (registry, _joined) = registry();
    let base = spawn_server(registry).await?;
    let http = reqwest::Client::new();

    let status = http.post(format!("{}/chess", base)).send().await?.status();
    assert_eq!(status.as_u16(), 404);

    let instance: u64 = http.post(format!("{}/pingpong", base)).send().await?.json().await?;

    let status = http.post(format!("{}/pingpong/999/player", base)).send().await?.status();
    assert_eq!(status.as_u16(), 404);

    let status = http
        .get(format!("{}/pingpong/{}/player/1/e", base, instance))
        .send()
        .await?
        .status();
    assert_eq!(status.as_u16(), 404);

    let status = http
        .post(format!("{}/pingpong/{}/nope", base, instance))
        .send()
        .await?
        .status();
    assert_eq!(status.as_u16(), 404);

    let status = http
        .post(format!("{}/pingpong/{}/pong", base, instance))
        .header(ASYNC_HEADER, "someone")
        .send()
        .await?
        .status();
    assert_eq!(status.as_u16(), 400);

    // a malformed body means no arguments, so `pong` reports the missing one
    let reply: Value = http
        .post(format!("{}/pingpong/{}/pong", base, instance))
        .body("{{{")
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(reply, json!("missing required argument 'm'"));
    Ok(())
}

// --- Test 5: Session method failures over HTTP ---

#[tokio::test]
async fn test_http_session_failures_are_strings() -> R<()> {
    init_tracing();
    let (registry, _joined) = registry();
    let base = spawn_server(registry).await?;
    let http = reqwest::Client::new();

    let instance: u64 = http.post(format!("{}/pingpong", base)).send().await?.json().await?;
    let pid: u64 = http
        .post(format!("{}/pingpong/{}/player", base, instance))
        .send()
        .await?
        .json()
        .await?;

    for (method, expected) in [
        ("refuse", json!("table is closed")),
        ("crash", json!("method 'crash' panicked")),
    ] {
        let response = http
            .post(format!("{}/pingpong/{}/{}", base, instance, method))
            .json(&json!({"": []}))
            .send()
            .await?;
        assert!(response.status().is_success(), "{} answered {}", method, response.status());
        let reply: Value = response.json().await?;
        assert_eq!(reply, expected);

        let future: u64 = http
            .post(format!("{}/pingpong/{}/{}", base, instance, method))
            .header(ASYNC_HEADER, pid.to_string())
            .json(&json!({"": []}))
            .send()
            .await?
            .json()
            .await?;

        let futures_url = format!("{}/pingpong/{}/player/{}/f", base, instance, pid);
        let resolved = within(async {
            loop {
                let listing: Value = http.get(&futures_url).send().await?.json().await?;
                if let Some(value) = listing.get(future.to_string()) {
                    return Ok::<_, anyhow::Error>(value.clone());
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await??;
        assert_eq!(resolved, expected);
        http.delete(format!("{}/{}", futures_url, future)).send().await?;
    }

    // the server is still up and the instance still answers
    let reply: Value = http
        .post(format!("{}/pingpong/{}/pong", base, instance))
        .json(&json!({"": [1]}))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(reply, json!(2));
    Ok(())
}
