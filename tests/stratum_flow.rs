//! End-to-end Stratum protocol scenarios over real TCP connections

use joulecoin::cost::{CostFn, CostParams, FixedCostMeter};
use joulecoin::ledger::{Ledger, LedgerParams};
use joulecoin::stratum::{StratumConfig, StratumServer};
use joulecoin::types::Difficulty;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

fn test_config() -> StratumConfig {
    StratumConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        reward_address: "pool-operator".to_string(),
        max_connections: 16,
        // long enough to stay out of the way unless a test shortens it
        refresh_interval: Duration::from_secs(600),
        sweep_interval: Duration::from_secs(600),
        inactivity_timeout: Duration::from_secs(600),
    }
}

struct TestNode {
    addr: SocketAddr,
    ledger: Arc<Mutex<Ledger>>,
    cost: Arc<CostFn>,
    shutdown: CancellationToken,
}

impl Drop for TestNode {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn spawn_node(config: StratumConfig) -> TestNode {
    let cost =
        Arc::new(CostFn::new(CostParams::light(), Box::new(FixedCostMeter(1.0))).unwrap());
    let ledger = Arc::new(Mutex::new(Ledger::with_params(
        Arc::clone(&cost),
        LedgerParams {
            initial_difficulty: Difficulty::MIN,
            ..LedgerParams::default()
        },
    )));

    let server = StratumServer::bind(config, Arc::clone(&ledger)).await.unwrap();
    let addr = server.local_addr().unwrap();
    let shutdown = server.shutdown_token();
    tokio::spawn(server.run());

    TestNode {
        addr,
        ledger,
        cost,
        shutdown,
    }
}

struct TestClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl TestClient {
    async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (reader, writer) = stream.into_split();
        Self {
            reader: BufReader::new(reader),
            writer,
        }
    }

    async fn send_raw(&mut self, raw: &str) {
        self.writer.write_all(raw.as_bytes()).await.unwrap();
        self.writer.flush().await.unwrap();
    }

    async fn send(&mut self, message: Value) {
        self.send_raw(&format!("{message}\n")).await;
    }

    async fn recv(&mut self) -> Value {
        let mut line = String::new();
        timeout(Duration::from_secs(5), self.reader.read_line(&mut line))
            .await
            .expect("timed out waiting for a message")
            .unwrap();
        serde_json::from_str(line.trim()).unwrap()
    }

    /// Receive within `window`, or None if nothing arrives
    async fn try_recv(&mut self, window: Duration) -> Option<Value> {
        let mut line = String::new();
        match timeout(window, self.reader.read_line(&mut line)).await {
            Ok(Ok(n)) if n > 0 => Some(serde_json::from_str(line.trim()).unwrap()),
            _ => None,
        }
    }

    /// True if the server closes the connection within `window`
    async fn wait_closed(&mut self, window: Duration) -> bool {
        let wait = async {
            loop {
                let mut line = String::new();
                match self.reader.read_line(&mut line).await {
                    Ok(0) | Err(_) => return,
                    Ok(_) => continue,
                }
            }
        };
        timeout(window, wait).await.is_ok()
    }

    /// Subscribe and consume the reply plus the two initial pushes.
    /// Returns (extranonce1, initial mining.notify message).
    async fn subscribe(&mut self) -> (String, Value) {
        self.send(json!({"id": 1, "method": "mining.subscribe", "params": []}))
            .await;

        let response = self.recv().await;
        assert!(response["error"].is_null());
        let extranonce1 = response["result"][1].as_str().unwrap().to_string();
        assert_eq!(response["result"][2], json!(4));

        let set_difficulty = self.recv().await;
        assert_eq!(set_difficulty["method"], "mining.set_difficulty");

        let notify = self.recv().await;
        assert_eq!(notify["method"], "mining.notify");

        (extranonce1, notify)
    }

    async fn authorize(&mut self) {
        self.send(json!({"id": 2, "method": "mining.authorize", "params": ["worker1", "x"]}))
            .await;
        let response = self.recv().await;
        assert_eq!(response["result"], json!(true));
        assert!(response["error"].is_null());
    }
}

/// Brute-force a nonce whose share digest has (or lacks) a leading zero
fn find_nonce(
    cost: &CostFn,
    job_id: &str,
    prev_hash: &str,
    extranonce1: &str,
    extranonce2: &str,
    ntime: &str,
    meets: bool,
) -> String {
    for value in 0u64..100_000 {
        let nonce = format!("{value:08x}");
        let digest = cost.hash(
            format!("{job_id}{prev_hash}{extranonce1}{extranonce2}{ntime}{nonce}").as_bytes(),
        );
        if digest.starts_with('0') == meets {
            return nonce;
        }
    }
    panic!("no nonce found");
}

#[tokio::test]
async fn test_subscribe_flow() {
    let node = spawn_node(test_config()).await;
    let mut client = TestClient::connect(node.addr).await;

    client
        .send(json!({"id": 1, "method": "mining.subscribe", "params": []}))
        .await;

    let response = client.recv().await;
    assert_eq!(response["id"], json!(1));
    assert!(response["error"].is_null());
    let extranonce1 = response["result"][1].as_str().unwrap();
    assert_eq!(extranonce1.len(), 8);
    assert!(extranonce1.bytes().all(|b| b.is_ascii_hexdigit()));
    assert_eq!(response["result"][2], json!(4));

    // current difficulty is pushed right after the reply
    let set_difficulty = client.recv().await;
    assert_eq!(set_difficulty["id"], Value::Null);
    assert_eq!(set_difficulty["method"], "mining.set_difficulty");
    assert_eq!(set_difficulty["params"][0], json!(1));

    // a job exists at startup, pushed with the clean flag set
    let notify = client.recv().await;
    assert_eq!(notify["method"], "mining.notify");
    let params = notify["params"].as_array().unwrap();
    assert_eq!(params.len(), 9);
    assert_eq!(params[1], json!(node.ledger.lock().head().hash));
    assert_eq!(params[8], json!(true));
}

#[tokio::test]
async fn test_authorize() {
    let node = spawn_node(test_config()).await;
    let mut client = TestClient::connect(node.addr).await;

    client.authorize().await;

    // arity is checked
    client
        .send(json!({"id": 3, "method": "mining.authorize", "params": ["only-worker"]}))
        .await;
    let response = client.recv().await;
    assert!(response["result"].is_null());
    assert!(!response["error"].is_null());
}

#[tokio::test]
async fn test_submit_before_authorize_is_rejected() {
    let node = spawn_node(test_config()).await;
    let mut client = TestClient::connect(node.addr).await;

    client
        .send(json!({
            "id": 5,
            "method": "mining.submit",
            "params": ["worker1", "0", "00000001", "5e000000", "00000001"]
        }))
        .await;

    let response = client.recv().await;
    assert_eq!(response["id"], json!(5));
    assert!(response["result"].is_null());
    assert_eq!(response["error"][0], json!(24));
}

#[tokio::test]
async fn test_unknown_method_keeps_connection_open() {
    let node = spawn_node(test_config()).await;
    let mut client = TestClient::connect(node.addr).await;

    client
        .send(json!({"id": 7, "method": "mining.extranonce.subscribe", "params": []}))
        .await;
    let response = client.recv().await;
    assert_eq!(response["id"], json!(7));
    assert!(!response["error"].is_null());

    // the session still works
    client.subscribe().await;
}

#[tokio::test]
async fn test_malformed_payload_is_dropped() {
    let node = spawn_node(test_config()).await;
    let mut client = TestClient::connect(node.addr).await;

    client.send_raw("this is not json\n").await;

    // no reply for the garbage line, and the connection stays open
    client.subscribe().await;
}

#[tokio::test]
async fn test_head_change_broadcasts_to_subscribed_sessions_only() {
    let mut config = test_config();
    config.refresh_interval = Duration::from_millis(50);
    let node = spawn_node(config).await;

    let mut miner_a = TestClient::connect(node.addr).await;
    let mut miner_b = TestClient::connect(node.addr).await;
    miner_a.subscribe().await;
    miner_b.subscribe().await;
    // connected but never subscribed
    let mut lurker = TestClient::connect(node.addr).await;

    // advance the head outside the submit path
    let head = {
        let mut ledger = node.ledger.lock();
        ledger.add_transaction("alice", "bob", 1.0, None).unwrap();
        ledger
            .mine_pending_transactions("miner", &CancellationToken::new())
            .unwrap()
            .hash
    };

    for miner in [&mut miner_a, &mut miner_b] {
        let notify = miner.recv().await;
        assert_eq!(notify["method"], "mining.notify");
        assert_eq!(notify["params"][1], json!(head));
        assert_eq!(notify["params"][8], json!(true));
        // exactly one push per head change
        assert!(miner.try_recv(Duration::from_millis(300)).await.is_none());
    }

    assert!(lurker.try_recv(Duration::from_millis(300)).await.is_none());
}

#[tokio::test]
async fn test_chain_target_share_seals_a_block() {
    let node = spawn_node(test_config()).await;
    let mut client = TestClient::connect(node.addr).await;

    let (extranonce1, notify) = client.subscribe().await;
    client.authorize().await;

    let job_id = notify["params"][0].as_str().unwrap();
    let prev_hash = notify["params"][1].as_str().unwrap();
    let ntime = notify["params"][7].as_str().unwrap();
    let extranonce2 = "00000001";

    let nonce = find_nonce(
        &node.cost, job_id, prev_hash, &extranonce1, extranonce2, ntime, true,
    );
    client
        .send(json!({
            "id": 10,
            "method": "mining.submit",
            "params": ["worker1", job_id, extranonce2, ntime, nonce]
        }))
        .await;

    let response = client.recv().await;
    assert_eq!(response["result"], json!(true));
    assert!(response["error"].is_null());

    // the share met the chain target: a block is sealed and fresh work pushed
    let notify = client.recv().await;
    assert_eq!(notify["method"], "mining.notify");
    assert_eq!(notify["params"][8], json!(true));
    assert_ne!(notify["params"][1], json!(prev_hash));

    let ledger = node.ledger.lock();
    assert_eq!(ledger.chain_length(), 2);
    assert_eq!(notify["params"][1], json!(ledger.head().hash));
    assert!(ledger.head().transactions.last().unwrap().is_reward());
    assert!(ledger.is_chain_valid());
}

#[tokio::test]
async fn test_low_difficulty_share_is_rejected() {
    let node = spawn_node(test_config()).await;
    let mut client = TestClient::connect(node.addr).await;

    let (extranonce1, notify) = client.subscribe().await;
    client.authorize().await;

    let job_id = notify["params"][0].as_str().unwrap();
    let prev_hash = notify["params"][1].as_str().unwrap();
    let ntime = notify["params"][7].as_str().unwrap();
    let extranonce2 = "00000001";

    let nonce = find_nonce(
        &node.cost, job_id, prev_hash, &extranonce1, extranonce2, ntime, false,
    );
    client
        .send(json!({
            "id": 11,
            "method": "mining.submit",
            "params": ["worker1", job_id, extranonce2, ntime, nonce]
        }))
        .await;

    let response = client.recv().await;
    assert!(response["result"].is_null());
    assert_eq!(response["error"][0], json!(23));
    assert_eq!(node.ledger.lock().chain_length(), 1);
}

#[tokio::test]
async fn test_stale_job_is_rejected() {
    let node = spawn_node(test_config()).await;
    let mut client = TestClient::connect(node.addr).await;

    client.subscribe().await;
    client.authorize().await;

    client
        .send(json!({
            "id": 12,
            "method": "mining.submit",
            "params": ["worker1", "ffff", "00000001", "5e000000", "00000001"]
        }))
        .await;

    let response = client.recv().await;
    assert!(response["result"].is_null());
    assert_eq!(response["error"][0], json!(21));
}

#[tokio::test]
async fn test_malformed_submit_params_are_rejected() {
    let node = spawn_node(test_config()).await;
    let mut client = TestClient::connect(node.addr).await;

    client.subscribe().await;
    client.authorize().await;

    // wrong arity
    client
        .send(json!({"id": 13, "method": "mining.submit", "params": ["worker1"]}))
        .await;
    let response = client.recv().await;
    assert_eq!(response["error"][0], json!(20));

    // extranonce2 is not hex of the advertised size
    client
        .send(json!({
            "id": 14,
            "method": "mining.submit",
            "params": ["worker1", "0", "zz", "5e000000", "00000001"]
        }))
        .await;
    let response = client.recv().await;
    assert_eq!(response["error"][0], json!(20));
}

#[tokio::test]
async fn test_inactive_session_is_swept() {
    let mut config = test_config();
    config.sweep_interval = Duration::from_millis(50);
    config.inactivity_timeout = Duration::from_millis(100);
    let node = spawn_node(config).await;

    let mut client = TestClient::connect(node.addr).await;
    client.subscribe().await;

    // no further activity: the sweep disconnects the session
    assert!(client.wait_closed(Duration::from_secs(5)).await);
}
