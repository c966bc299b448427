//! Relay server: accept loop, per-connection tasks, and the broker task that
//! owns the [`RelayCore`]. Connection tasks only pass events to the broker;
//! the broker answers with text frames routed to each connection's writer.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use fileport_core::{ConnId, MessageError, OutboundAction, RelayCore, RelayStatus, Role};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;

use crate::config::{Config, TICK_INTERVAL};
use crate::{files, http, ws};

/// Connection lifecycle as seen by the broker.
#[derive(Debug)]
pub enum RelayEvent {
    /// WebSocket established; frames for it go to the sender.
    Opened(ConnId, mpsc::UnboundedSender<String>),
    Message(ConnId, String),
    Closed(ConnId),
}

/// Bind the configured address and serve until the task is dropped.
pub async fn run(config: Config) -> Result<()> {
    if let Err(e) = files::ensure_files_dir(&config.files_dir).await {
        log::warn!("[Relay] Cannot prepare {}: {e}", config.files_dir.display());
    }
    let addr = config.listen_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    log::info!("[Relay] Listening on {}", listener.local_addr()?);
    serve(listener, config).await
}

/// Serve on an already bound listener.
pub async fn serve(listener: TcpListener, config: Config) -> Result<()> {
    let core = RelayCore::with_config(config.relay_config());
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (status_tx, status_rx) = watch::channel(core.status());
    tokio::spawn(run_broker(core, event_rx, status_tx, TICK_INTERVAL));

    let files_dir = Arc::new(config.files_dir);
    let mut next_id = 0u64;
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                log::warn!("[Relay] Accept failed: {e}");
                tokio::time::sleep(Duration::from_millis(100)).await;
                continue;
            }
        };
        next_id += 1;
        let conn = ConnId(next_id);
        let events = event_tx.clone();
        let status = status_rx.clone();
        let files_dir = files_dir.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, peer, conn, events, status, &files_dir).await {
                log::debug!("[Relay] {conn} ({peer}): {e:#}");
            }
        });
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    conn: ConnId,
    events: mpsc::UnboundedSender<RelayEvent>,
    status: watch::Receiver<RelayStatus>,
    files_dir: &Path,
) -> Result<()> {
    let Some((head, leftover)) = http::read_head(&mut stream).await? else {
        return Ok(());
    };
    if !head.is_websocket_upgrade() {
        log::debug!("[Http] {peer} {} {}", head.method, head.path);
        let snapshot = status.borrow().clone();
        return http::respond(&mut stream, &head, files_dir, &snapshot).await;
    }
    if !http::accept_upgrade(&mut stream, &head, &leftover).await? {
        log::debug!("[Relay] {conn} from {peer}: handshake refused");
        return Ok(());
    }
    log::debug!("[Relay] {conn} connected from {peer}");
    run_websocket(stream, conn, events).await;
    Ok(())
}

async fn run_websocket(stream: TcpStream, conn: ConnId, events: mpsc::UnboundedSender<RelayEvent>) {
    let (mut writer, mut reader) = ws::from_upgraded(stream).await;
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
    if events.send(RelayEvent::Opened(conn, out_tx)).is_err() {
        return;
    }

    // Ends once the broker drops this connection's sender.
    let writer_task = tokio::spawn(async move {
        while let Some(text) = out_rx.recv().await {
            if let Err(e) = writer.send_text(text).await {
                log::debug!("[Relay] {conn} write failed: {e:#}");
                return;
            }
        }
        let _ = writer.close().await;
    });

    while let Some(next) = reader.recv_text().await {
        match next {
            Ok(text) => {
                if events.send(RelayEvent::Message(conn, text)).is_err() {
                    break;
                }
            }
            Err(e) => {
                log::debug!("[Relay] {conn} read failed: {e:#}");
                break;
            }
        }
    }
    let _ = events.send(RelayEvent::Closed(conn));
    let _ = writer_task.await;
}

/// Single owner of the relay state. Runs until every event sender is gone.
pub async fn run_broker(
    mut core: RelayCore,
    mut events: mpsc::UnboundedReceiver<RelayEvent>,
    status: watch::Sender<RelayStatus>,
    tick_every: Duration,
) {
    let mut writers: HashMap<ConnId, mpsc::UnboundedSender<String>> = HashMap::new();
    let mut ticker = tokio::time::interval(tick_every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        let actions = tokio::select! {
            event = events.recv() => match event {
                Some(event) => handle_event(&mut core, &mut writers, event),
                None => break,
            },
            _ = ticker.tick() => {
                let actions = core.tick();
                if !actions.is_empty() {
                    log::info!("[Relay] {} request(s) timed out", actions.len());
                }
                actions
            }
        };
        for OutboundAction::Send(to, text) in actions {
            match writers.get(&to) {
                Some(tx) => {
                    let _ = tx.send(text);
                }
                None => log::debug!("[Relay] Dropping frame for closed {to}"),
            }
        }
        status.send_if_modified(|current| {
            let next = core.status();
            let changed = *current != next;
            *current = next;
            changed
        });
    }
}

fn handle_event(
    core: &mut RelayCore,
    writers: &mut HashMap<ConnId, mpsc::UnboundedSender<String>>,
    event: RelayEvent,
) -> Vec<OutboundAction> {
    match event {
        RelayEvent::Opened(conn, tx) => {
            writers.insert(conn, tx);
            core.on_connection_opened(conn);
            vec![]
        }
        RelayEvent::Message(conn, text) => {
            let before = core.registry().role(conn);
            let result = core.on_message_received(conn, &text);
            let after = core.registry().role(conn);
            if before != after {
                match after {
                    Some(Role::Host) => log::info!("[Relay] Host registered: {conn}"),
                    Some(Role::Client) => log::info!("[Relay] Client registered: {conn}"),
                    _ => {}
                }
            }
            result.unwrap_or_else(|e| {
                log_dropped(conn, &e);
                vec![]
            })
        }
        RelayEvent::Closed(conn) => {
            writers.remove(&conn);
            let role = core.registry().role(conn);
            let pending = core.registry().pending_count();
            let actions = core.on_connection_closed(conn);
            match role {
                Some(Role::Host) => log::info!(
                    "[Relay] Host {conn} disconnected; {pending} pending request(s) dropped"
                ),
                Some(Role::Client) => log::info!("[Relay] Client {conn} disconnected"),
                _ => log::debug!("[Relay] {conn} closed before registering"),
            }
            actions
        }
    }
}

fn log_dropped(conn: ConnId, err: &MessageError) {
    match err {
        MessageError::NoHost | MessageError::HostTaken(_) => {
            log::warn!("[Relay] Dropped frame from {conn}: {err}")
        }
        _ => log::debug!("[Relay] Dropped frame from {conn}: {err}"),
    }
}
