//! The Stratum job coordinator
//!
//! Accepts many concurrent line-delimited JSON-RPC connections, turns ledger
//! state into mining jobs, validates submitted shares against per-session
//! difficulty, and routes chain-target shares back into the ledger's sealing
//! path. Connection handlers are independent tasks; shared state lives in a
//! session table and a broadcast channel, so pushing to subscribers never
//! races subscribe/unsubscribe.

use crate::cost::CostFn;
use crate::error::{Error, Result};
use crate::ledger::Ledger;
use crate::types::Difficulty;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, RwLock};
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::job::MiningJob;
use super::protocol::{
    StratumErrorCode, StratumMessage, StratumMethod, StratumNotification, StratumRequest,
    StratumResponse,
};
use super::session::{Session, SessionId, EXTRANONCE2_SIZE};

/// Stratum server configuration
#[derive(Debug, Clone)]
pub struct StratumConfig {
    /// Listen address
    pub host: String,
    /// Listen port
    pub port: u16,
    /// Address credited by the reward transaction of sealed blocks
    pub reward_address: String,
    /// Max concurrent connections
    pub max_connections: usize,
    /// Cadence of difficulty/head reconciliation against the ledger
    pub refresh_interval: Duration,
    /// Cadence of the inactive-session sweep
    pub sweep_interval: Duration,
    /// Idle time after which a session is disconnected
    pub inactivity_timeout: Duration,
}

/// Push delivered to every subscribed session
#[derive(Debug, Clone)]
enum ServerEvent {
    /// New job; `clean` tells miners to discard in-flight work
    Job { job: MiningJob, clean: bool },
    /// Chain difficulty changed
    Difficulty(Difficulty),
}

/// State shared across all connection handlers
struct ServerState {
    /// Active sessions
    sessions: DashMap<SessionId, Arc<RwLock<Session>>>,
    /// Current job
    current_job: RwLock<Option<MiningJob>>,
    /// Job counter
    job_counter: AtomicU64,
    /// Cached chain difficulty, reconciled against the ledger
    difficulty: RwLock<Difficulty>,
    /// Cancelled on shutdown
    shutdown: CancellationToken,
}

/// Per-connection handle on the shared coordinator state
#[derive(Clone)]
struct ConnCtx {
    config: Arc<StratumConfig>,
    state: Arc<ServerState>,
    ledger: Arc<Mutex<Ledger>>,
    cost: Arc<CostFn>,
    event_tx: broadcast::Sender<ServerEvent>,
}

/// Stratum server coordinating mining jobs over a shared ledger
pub struct StratumServer {
    config: Arc<StratumConfig>,
    ledger: Arc<Mutex<Ledger>>,
    cost: Arc<CostFn>,
    state: Arc<ServerState>,
    listener: TcpListener,
    event_tx: broadcast::Sender<ServerEvent>,
}

impl StratumServer {
    /// Bind the listen socket and stage an initial job from the chain head
    pub async fn bind(config: StratumConfig, ledger: Arc<Mutex<Ledger>>) -> Result<Self> {
        let addr: SocketAddr = format!("{}:{}", config.host, config.port)
            .parse()
            .map_err(|e| Error::config(format!("Invalid listen address: {e}")))?;
        let listener = TcpListener::bind(&addr).await?;

        let (cost, difficulty, head_hash) = {
            let ledger = ledger.lock();
            (
                Arc::clone(ledger.cost_fn()),
                ledger.difficulty(),
                ledger.head().hash.clone(),
            )
        };

        let state = Arc::new(ServerState {
            sessions: DashMap::new(),
            current_job: RwLock::new(None),
            job_counter: AtomicU64::new(0),
            difficulty: RwLock::new(difficulty),
            shutdown: CancellationToken::new(),
        });

        // stage a job so the first subscriber always receives work
        let job = MiningJob::new(
            state.job_counter.fetch_add(1, Ordering::Relaxed),
            &head_hash,
            difficulty,
        );
        *state.current_job.write().await = Some(job);

        let (event_tx, _) = broadcast::channel(100);

        info!("Stratum server listening on {}", listener.local_addr()?);

        Ok(Self {
            config: Arc::new(config),
            ledger,
            cost,
            state,
            listener,
            event_tx,
        })
    }

    /// The bound socket address
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Token cancelled when the server shuts down; cancelling it externally
    /// stops the server.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.state.shutdown.clone()
    }

    /// Serve connections until shutdown or ctrl-c
    pub async fn run(self) -> Result<()> {
        let refresh = self.spawn_refresh_task();
        let sweep = self.spawn_sweep_task();

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => self.accept_connection(stream, addr),
                        Err(e) => warn!("Accept failed: {}", e),
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutting down Stratum server");
                    self.state.shutdown.cancel();
                    break;
                }
                _ = self.state.shutdown.cancelled() => break,
            }
        }

        refresh.abort();
        sweep.abort();
        Ok(())
    }

    fn accept_connection(&self, stream: TcpStream, addr: SocketAddr) {
        if self.state.sessions.len() >= self.config.max_connections {
            warn!("Connection limit reached, rejecting {}", addr);
            return;
        }

        let ctx = ConnCtx {
            config: Arc::clone(&self.config),
            state: Arc::clone(&self.state),
            ledger: Arc::clone(&self.ledger),
            cost: Arc::clone(&self.cost),
            event_tx: self.event_tx.clone(),
        };
        let event_rx = self.event_tx.subscribe();

        tokio::spawn(async move {
            if let Err(e) = handle_client(stream, addr, ctx, event_rx).await {
                error!("Client {} error: {}", addr, e);
            }
        });
    }

    /// Periodically reconcile the cached difficulty and the current job
    /// against the live ledger, pushing updates to all subscribers.
    fn spawn_refresh_task(&self) -> tokio::task::JoinHandle<()> {
        let state = Arc::clone(&self.state);
        let ledger = Arc::clone(&self.ledger);
        let event_tx = self.event_tx.clone();
        let period = self.config.refresh_interval;

        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = state.shutdown.cancelled() => break,
                }

                // skip the tick while a seal holds the ledger
                let Some((live_difficulty, head_hash)) = ledger
                    .try_lock()
                    .map(|l| (l.difficulty(), l.head().hash.clone()))
                else {
                    continue;
                };

                let cached = *state.difficulty.read().await;
                if live_difficulty != cached {
                    *state.difficulty.write().await = live_difficulty;
                    info!("Updating difficulty to {}", live_difficulty);
                    let _ = event_tx.send(ServerEvent::Difficulty(live_difficulty));
                }

                let stale = match state.current_job.read().await.as_ref() {
                    Some(job) => job.previous_hash != head_hash,
                    None => true,
                };
                if stale {
                    let job = MiningJob::new(
                        state.job_counter.fetch_add(1, Ordering::Relaxed),
                        &head_hash,
                        live_difficulty,
                    );
                    info!(job_id = %job.id, "New job generated for head {}", head_hash);
                    *state.current_job.write().await = Some(job.clone());
                    let _ = event_tx.send(ServerEvent::Job { job, clean: true });
                }
            }
        })
    }

    /// Periodically disconnect sessions idle past the inactivity threshold
    fn spawn_sweep_task(&self) -> tokio::task::JoinHandle<()> {
        let state = Arc::clone(&self.state);
        let period = self.config.sweep_interval;
        let timeout = self.config.inactivity_timeout;

        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = state.shutdown.cancelled() => break,
                }

                let sessions: Vec<_> = state
                    .sessions
                    .iter()
                    .map(|entry| Arc::clone(entry.value()))
                    .collect();
                for session in sessions {
                    let session = session.read().await;
                    if session.idle_for() > timeout {
                        info!(peer = %session.peer, "Removing inactive session {}", session.id);
                        session.disconnect.cancel();
                    }
                }
            }
        })
    }
}

/// Handle a client connection from accept to teardown
async fn handle_client(
    stream: TcpStream,
    addr: SocketAddr,
    ctx: ConnCtx,
    mut event_rx: broadcast::Receiver<ServerEvent>,
) -> Result<()> {
    info!("New connection from {}", addr);

    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    let difficulty = *ctx.state.difficulty.read().await;
    let session = Arc::new(RwLock::new(Session::new(addr, difficulty)));
    let (session_id, disconnect) = {
        let session = session.read().await;
        (session.id, session.disconnect.clone())
    };
    ctx.state.sessions.insert(session_id, Arc::clone(&session));

    let result = connection_loop(
        &mut reader,
        &mut writer,
        &ctx,
        &session,
        &mut event_rx,
        &disconnect,
    )
    .await;

    // removal is the single teardown point: whatever closed the connection,
    // the id leaves the table (and with it the subscriber set) exactly once
    ctx.state.sessions.remove(&session_id);
    info!("Connection closed for {}", addr);
    result
}

async fn connection_loop(
    reader: &mut BufReader<OwnedReadHalf>,
    writer: &mut OwnedWriteHalf,
    ctx: &ConnCtx,
    session: &Arc<RwLock<Session>>,
    event_rx: &mut broadcast::Receiver<ServerEvent>,
    disconnect: &CancellationToken,
) -> Result<()> {
    loop {
        let mut line = String::new();

        tokio::select! {
            read = reader.read_line(&mut line) => {
                match read {
                    Ok(0) => {
                        debug!("Client {} disconnected", session.read().await.peer);
                        return Ok(());
                    }
                    Ok(_) => {
                        let trimmed = line.trim();
                        if trimmed.is_empty() {
                            continue;
                        }
                        match StratumMessage::from_json(trimmed) {
                            Ok(StratumMessage::Request(req)) => {
                                handle_request(req, ctx, session, writer).await?;
                            }
                            Ok(_) => {
                                warn!("Unexpected message type from {}", session.read().await.peer);
                            }
                            Err(e) => {
                                // malformed payloads are dropped, the connection stays open
                                warn!("Invalid JSON from {}: {}", session.read().await.peer, e);
                            }
                        }
                    }
                    Err(e) => return Err(e.into()),
                }
            }

            event = event_rx.recv() => {
                match event {
                    Ok(event) => forward_event(event, session, writer).await?,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(
                            "Session {} lagged, skipped {} pushes",
                            session.read().await.id,
                            skipped
                        );
                    }
                    Err(broadcast::error::RecvError::Closed) => return Ok(()),
                }
            }

            _ = disconnect.cancelled() => return Ok(()),

            _ = ctx.state.shutdown.cancelled() => return Ok(()),
        }
    }
}

/// Forward a broadcast push to this connection if it is subscribed
async fn forward_event(
    event: ServerEvent,
    session: &Arc<RwLock<Session>>,
    writer: &mut OwnedWriteHalf,
) -> Result<()> {
    if !session.read().await.subscribed {
        return Ok(());
    }
    match event {
        ServerEvent::Difficulty(difficulty) => {
            session.write().await.difficulty = difficulty;
            send_notification(
                writer,
                StratumMethod::SetDifficulty.as_str(),
                vec![json!(difficulty.value())],
            )
            .await
        }
        ServerEvent::Job { job, clean } => {
            send_notification(
                writer,
                StratumMethod::Notify.as_str(),
                job.to_notify_params(clean),
            )
            .await
        }
    }
}

/// Dispatch one request; errors escaping here are connection failures
async fn handle_request(
    req: StratumRequest,
    ctx: &ConnCtx,
    session: &Arc<RwLock<Session>>,
    writer: &mut OwnedWriteHalf,
) -> Result<()> {
    session.write().await.touch();

    match req.method_enum() {
        StratumMethod::Subscribe => handle_subscribe(req, ctx, session, writer).await,
        StratumMethod::Authorize => handle_authorize(req, session, writer).await,
        StratumMethod::Submit => handle_submit(req, ctx, session, writer).await,
        _ => {
            warn!(
                "Unknown method {} from {}",
                req.method,
                session.read().await.peer
            );
            let message = format!("Unknown method: {}", req.method);
            send_json(
                writer,
                &StratumResponse::error(req.id, StratumErrorCode::Other as i32, &message),
            )
            .await
        }
    }
}

async fn handle_subscribe(
    req: StratumRequest,
    ctx: &ConnCtx,
    session: &Arc<RwLock<Session>>,
    writer: &mut OwnedWriteHalf,
) -> Result<()> {
    let difficulty = *ctx.state.difficulty.read().await;
    let (session_id, extranonce1) = {
        let mut session = session.write().await;
        session.subscribed = true;
        session.difficulty = difficulty;
        (session.id, session.extranonce1.clone())
    };

    let result = json!([
        [
            ["mining.set_difficulty", session_id.to_string()],
            ["mining.notify", session_id.to_string()]
        ],
        extranonce1,
        EXTRANONCE2_SIZE
    ]);
    send_json(writer, &StratumResponse::success(req.id, result)).await?;

    // initial pushes: the current difficulty, then the current job flagged
    // to discard any in-flight work
    send_notification(
        writer,
        StratumMethod::SetDifficulty.as_str(),
        vec![json!(difficulty.value())],
    )
    .await?;

    let job = ctx.state.current_job.read().await.clone();
    if let Some(job) = job {
        send_notification(
            writer,
            StratumMethod::Notify.as_str(),
            job.to_notify_params(true),
        )
        .await?;
    }

    debug!("Session {} subscribed", session_id);
    Ok(())
}

async fn handle_authorize(
    req: StratumRequest,
    session: &Arc<RwLock<Session>>,
    writer: &mut OwnedWriteHalf,
) -> Result<()> {
    if req.params.len() < 2 {
        return send_json(
            writer,
            &StratumResponse::error(req.id, StratumErrorCode::Other as i32, "Invalid params"),
        )
        .await;
    }
    let worker_name = match req.params[0].as_str() {
        Some(name) => name.to_string(),
        None => {
            return send_json(
                writer,
                &StratumResponse::error(
                    req.id,
                    StratumErrorCode::Other as i32,
                    "Invalid worker name",
                ),
            )
            .await
        }
    };

    // the credential argument is arity-checked but never verified
    let peer = {
        let mut session = session.write().await;
        session.authorized = true;
        session.worker_name = Some(worker_name.clone());
        session.peer
    };

    send_json(writer, &StratumResponse::success(req.id, json!(true))).await?;
    info!("Worker {} authorized from {}", worker_name, peer);
    Ok(())
}

async fn handle_submit(
    req: StratumRequest,
    ctx: &ConnCtx,
    session: &Arc<RwLock<Session>>,
    writer: &mut OwnedWriteHalf,
) -> Result<()> {
    if !session.read().await.authorized {
        return send_json(
            writer,
            &StratumResponse::error_with_code(req.id, StratumErrorCode::UnauthorizedWorker),
        )
        .await;
    }

    // mining.submit("worker", "job_id", "extranonce2", "ntime", "nonce")
    if req.params.len() < 5 || !req.params[..5].iter().all(|p| p.is_string()) {
        return send_json(
            writer,
            &StratumResponse::error(req.id, StratumErrorCode::Other as i32, "Invalid params"),
        )
        .await;
    }
    let field = |i: usize| req.params[i].as_str().unwrap_or_default();
    let (job_id, extranonce2, ntime, nonce) = (field(1), field(2), field(3), field(4));

    // well-formed and authorized: the submission counts
    let (extranonce1, session_difficulty) = {
        let mut session = session.write().await;
        session.shares_submitted += 1;
        (session.extranonce1.clone(), session.difficulty)
    };

    let job = match ctx.state.current_job.read().await.clone() {
        Some(job) if job.id == job_id => job,
        _ => {
            return send_json(
                writer,
                &StratumResponse::error_with_code(req.id, StratumErrorCode::JobNotFound),
            )
            .await
        }
    };

    match hex::decode(extranonce2) {
        Ok(bytes) if bytes.len() == EXTRANONCE2_SIZE => {}
        _ => {
            return send_json(
                writer,
                &StratumResponse::error(
                    req.id,
                    StratumErrorCode::Other as i32,
                    "Invalid extranonce2",
                ),
            )
            .await
        }
    }

    let digest = job.share_digest(&ctx.cost, &extranonce1, extranonce2, ntime, nonce);

    if !session_difficulty.is_met_by(&digest) {
        return send_json(
            writer,
            &StratumResponse::error_with_code(req.id, StratumErrorCode::LowDifficultyShare),
        )
        .await;
    }

    {
        let mut session = session.write().await;
        session.shares_valid += 1;
        debug!(
            "Valid share from session {} ({}/{})",
            session.id, session.shares_valid, session.shares_submitted
        );
    }
    send_json(writer, &StratumResponse::success(req.id, json!(true))).await?;

    // a share meeting the full chain target completes a block
    let chain_difficulty = *ctx.state.difficulty.read().await;
    if chain_difficulty.is_met_by(&digest) {
        seal_block(ctx, session).await;
    }

    Ok(())
}

/// Finalize a block through the ledger and rebroadcast fresh work.
///
/// The unbounded proof-of-work search runs on a blocking worker holding the
/// ledger lock, so other connections keep being serviced while it runs.
async fn seal_block(ctx: &ConnCtx, session: &Arc<RwLock<Session>>) {
    let worker = {
        let session = session.read().await;
        session.worker_name.clone().unwrap_or_default()
    };
    let ledger = Arc::clone(&ctx.ledger);
    let reward_address = ctx.config.reward_address.clone();
    let cancel = ctx.state.shutdown.child_token();

    let sealed = tokio::task::spawn_blocking(move || {
        ledger
            .lock()
            .mine_pending_transactions(&reward_address, &cancel)
    })
    .await;

    match sealed {
        Ok(Ok(block)) => {
            info!("New block sealed from share by {}: {}", worker, block.hash);
            broadcast_new_job(ctx).await;
        }
        Ok(Err(e)) => error!("Failed to seal block: {}", e),
        Err(e) => error!("Sealing task failed: {}", e),
    }
}

/// Regenerate the job from the live head and push it (and any difficulty
/// change) to every subscriber.
async fn broadcast_new_job(ctx: &ConnCtx) {
    let (live_difficulty, head_hash) = {
        let ledger = ctx.ledger.lock();
        (ledger.difficulty(), ledger.head().hash.clone())
    };

    let cached = *ctx.state.difficulty.read().await;
    if live_difficulty != cached {
        *ctx.state.difficulty.write().await = live_difficulty;
        let _ = ctx.event_tx.send(ServerEvent::Difficulty(live_difficulty));
    }

    let job = MiningJob::new(
        ctx.state.job_counter.fetch_add(1, Ordering::Relaxed),
        &head_hash,
        live_difficulty,
    );
    *ctx.state.current_job.write().await = Some(job.clone());
    let _ = ctx.event_tx.send(ServerEvent::Job { job, clean: true });
}

async fn send_json<T: Serialize>(writer: &mut OwnedWriteHalf, message: &T) -> Result<()> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

async fn send_notification(
    writer: &mut OwnedWriteHalf,
    method: &str,
    params: Vec<Value>,
) -> Result<()> {
    send_json(writer, &StratumNotification::new(method, params)).await
}
