//! Live Channel Adapter
//!
//! Owns the single Socket.IO connection of a viewer session: joins the
//! viewer's room, answers heartbeats, normalises events and forwards them in
//! receipt order, and reconnects with capped exponential backoff.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::ReconnectPolicy;
use crate::error::AgendaError;
use crate::events::{AgendaEvent, ConnectionState, EventBus};
use crate::sync::{EventNormalizer, Inbound};

use super::socketio::{connect_frame, event_frame, EnginePacket, SocketPacket};
use super::transport::{LiveConnection, LiveTransport};

pub const JOIN_EVENT: &str = "join";

/// Everything the adapter needs, passed explicitly.
pub struct ChannelContext {
    pub url: String,
    pub viewer_id: String,
    pub policy: ReconnectPolicy,
    pub normalizer: EventNormalizer,
    pub bus: EventBus,
}

/// Running channel. Dropping it aborts the connection task.
pub struct LiveChannelHandle {
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl LiveChannelHandle {
    /// Close the connection and wait for the task to finish. No inbound event
    /// is forwarded after this returns.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, |t| t.is_finished())
    }
}

impl Drop for LiveChannelHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

enum Exit {
    Shutdown,
    Disconnected { reason: String, joined: bool },
}

enum Step {
    Shutdown,
    Frame(Option<Result<String, AgendaError>>),
}

pub fn spawn(
    ctx: ChannelContext,
    transport: Arc<dyn LiveTransport>,
    inbound: mpsc::Sender<Inbound>,
) -> LiveChannelHandle {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(run(ctx, transport, inbound, shutdown_rx));
    LiveChannelHandle {
        shutdown: shutdown_tx,
        task: Some(task),
    }
}

async fn run(
    ctx: ChannelContext,
    transport: Arc<dyn LiveTransport>,
    inbound: mpsc::Sender<Inbound>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut failures: u32 = 0;

    loop {
        if *shutdown.borrow() {
            break;
        }

        ctx.bus.publish(AgendaEvent::Connection(ConnectionState::Connecting {
            attempt: failures + 1,
        }));
        info!("Connecting live channel for viewer {} ({})", ctx.viewer_id, ctx.url);

        let connected = match tokio::time::timeout(ctx.policy.connect_timeout, transport.connect(&ctx.url)).await {
            Ok(result) => result,
            Err(_) => Err(AgendaError::transport("connect timed out")),
        };
        match connected {
            Ok(mut conn) => match drive(&ctx, conn.as_mut(), &inbound, &mut shutdown).await {
                Exit::Shutdown => {
                    conn.close().await;
                    break;
                }
                Exit::Disconnected { reason, joined } => {
                    info!("Live channel disconnected: {}", reason);
                    conn.close().await;
                    ctx.bus.publish(AgendaEvent::Connection(ConnectionState::Disconnected { reason }));
                    if joined {
                        failures = 0;
                    }
                }
            },
            Err(e) => {
                warn!("Live channel connection failed: {}", e);
                ctx.bus.publish(AgendaEvent::Connection(ConnectionState::Disconnected {
                    reason: e.to_string(),
                }));
            }
        }

        failures += 1;
        if failures > ctx.policy.max_attempts {
            error!("Live channel gave up after {} attempts", ctx.policy.max_attempts);
            ctx.bus.publish(AgendaEvent::Connection(ConnectionState::GaveUp {
                attempts: ctx.policy.max_attempts,
            }));
            return;
        }

        let delay = ctx.policy.delay_for(failures);
        debug!("Reconnecting in {:?} (attempt {})", delay, failures);
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => break,
        }
    }

    info!("Live channel closed for viewer {}", ctx.viewer_id);
    ctx.bus.publish(AgendaEvent::Connection(ConnectionState::Closed));
}

async fn drive(
    ctx: &ChannelContext,
    conn: &mut dyn LiveConnection,
    inbound: &mpsc::Sender<Inbound>,
    shutdown: &mut watch::Receiver<bool>,
) -> Exit {
    let mut joined = false;
    let mut heartbeat: Option<Duration> = None;
    // Until the handshake completes the server must answer within the
    // connect timeout.
    let mut silence_limit = Some(Silence {
        limit: ctx.policy.connect_timeout,
        reason: "handshake timed out",
    });

    loop {
        if *shutdown.borrow() {
            return Exit::Shutdown;
        }

        let step = tokio::select! {
            biased;
            _ = shutdown.changed() => Step::Shutdown,
            frame = recv_within(conn, silence_limit) => Step::Frame(frame),
        };

        let text = match step {
            Step::Shutdown => return Exit::Shutdown,
            Step::Frame(None) => {
                return Exit::Disconnected { reason: "closed by server".into(), joined }
            }
            Step::Frame(Some(Err(e))) => {
                return Exit::Disconnected { reason: e.to_string(), joined }
            }
            Step::Frame(Some(Ok(text))) => text,
        };

        let packet = match EnginePacket::decode(&text) {
            Ok(packet) => packet,
            Err(e) => {
                warn!("Dropping malformed live frame: {}", e);
                continue;
            }
        };

        let reply = match packet {
            EnginePacket::Open(handshake) => {
                debug!("Engine.IO session {} opened", handshake.sid);
                if handshake.ping_interval > 0 {
                    let limit = Duration::from_millis(handshake.ping_interval + handshake.ping_timeout);
                    heartbeat = Some(limit);
                    silence_limit = Some(Silence {
                        limit,
                        reason: "heartbeat timed out",
                    });
                }
                Some(connect_frame())
            }
            EnginePacket::Ping(data) => Some(EnginePacket::Pong(data).encode()),
            EnginePacket::Close => {
                return Exit::Disconnected { reason: "engine.io close".into(), joined }
            }
            EnginePacket::Message(SocketPacket::Connect(_)) => {
                joined = true;
                silence_limit = heartbeat.map(|limit| Silence {
                    limit,
                    reason: "heartbeat timed out",
                });
                info!("Live channel connected, joining room {}", ctx.viewer_id);
                ctx.bus.publish(AgendaEvent::Connection(ConnectionState::Connected));
                Some(event_frame(JOIN_EVENT, Value::String(ctx.viewer_id.clone())))
            }
            EnginePacket::Message(SocketPacket::Disconnect) => {
                return Exit::Disconnected { reason: "server disconnect".into(), joined }
            }
            EnginePacket::Message(SocketPacket::ConnectError(detail)) => {
                return Exit::Disconnected { reason: format!("connect error: {}", detail), joined }
            }
            EnginePacket::Message(SocketPacket::Event { name, payload }) => {
                debug!("Live event '{}': {}", name, payload);
                if let Some(event) = ctx.normalizer.normalize(&name, &payload) {
                    if inbound.send(event).await.is_err() {
                        // Session loop is gone.
                        return Exit::Shutdown;
                    }
                }
                None
            }
            other => {
                debug!("Ignoring live packet {:?}", other);
                None
            }
        };

        if let Some(frame) = reply {
            if let Err(e) = conn.send(frame).await {
                return Exit::Disconnected { reason: e.to_string(), joined };
            }
        }
    }
}

/// Longest the server may stay quiet, and what to report when it does.
#[derive(Clone, Copy)]
struct Silence {
    limit: Duration,
    reason: &'static str,
}

async fn recv_within(
    conn: &mut dyn LiveConnection,
    silence: Option<Silence>,
) -> Option<Result<String, AgendaError>> {
    match silence {
        None => conn.recv().await,
        Some(Silence { limit, reason }) => match tokio::time::timeout(limit, conn.recv()).await {
            Ok(frame) => frame,
            Err(_) => Some(Err(AgendaError::transport(reason))),
        },
    }
}
