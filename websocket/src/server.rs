//! WebSocket bridge server.
//!
//! Accepts the platform adapter at `/ws` and serves Prometheus metrics at
//! `/metrics`. Inbound events are queued per principal and applied to the
//! verification engine in arrival order, off the socket reader; effect
//! results are routed straight back to the [`BridgeGateway`] so waiting
//! transitions can continue.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};
use warden_types::{MessageHandle, MessageOrigin, Principal};
use warden_verification::{IncomingMessage, VerificationEngine};

use crate::error::BridgeError;
use crate::gateway::BridgeGateway;
use crate::protocol::{AdapterMessage, BridgeMessage, CommandKind};

type WsSender = Arc<Mutex<SplitSink<WebSocket, Message>>>;

/// Open per-principal queues. A lane exists only while it has work.
type Lanes = Arc<Mutex<HashMap<Principal, mpsc::UnboundedSender<PrincipalEvent>>>>;

/// An adapter event addressed to one principal.
#[derive(Debug)]
enum PrincipalEvent {
    Arrived,
    Message {
        text: String,
        origin: MessageOrigin,
        handle: Option<MessageHandle>,
    },
    Command(CommandKind),
}

/// Shared state for the bridge: the engine and the gateway it talks through.
pub struct BridgeState {
    pub engine: VerificationEngine,
    pub gateway: Arc<BridgeGateway>,
    lanes: Lanes,
}

impl BridgeState {
    pub fn new(engine: VerificationEngine, gateway: Arc<BridgeGateway>) -> Self {
        Self {
            engine,
            gateway,
            lanes: Lanes::default(),
        }
    }

    /// Principals with events queued or being applied.
    pub async fn active_lanes(&self) -> usize {
        self.lanes.lock().await.len()
    }
}

/// The bridge server, configured with a port and shared state.
pub struct BridgeServer {
    pub port: u16,
    pub state: Arc<BridgeState>,
}

impl BridgeServer {
    pub fn new(port: u16, engine: VerificationEngine, gateway: Arc<BridgeGateway>) -> Self {
        Self {
            port,
            state: Arc::new(BridgeState::new(engine, gateway)),
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/ws", get(ws_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(self.state.clone())
    }

    /// Listen until `shutdown` resolves.
    pub async fn start<F>(&self, shutdown: F) -> Result<(), BridgeError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = format!("0.0.0.0:{}", self.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|source| BridgeError::Bind {
                addr: addr.clone(),
                source,
            })?;
        info!("bridge listening on {}", addr);
        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(BridgeError::Serve)
    }
}

async fn metrics_handler(State(state): State<Arc<BridgeState>>) -> impl IntoResponse {
    match state.engine.metrics().encode() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

/// Axum handler that upgrades an HTTP request to a WebSocket connection.
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<BridgeState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle one adapter connection.
///
/// 1. Split the socket and attach the connection to the gateway.
/// 2. Spawn a writer that drains the gateway's outbound queue to the socket.
/// 3. Read adapter frames until close, dispatching each one.
/// 4. Detach from the gateway and stop the writer.
async fn handle_socket(socket: WebSocket, state: Arc<BridgeState>) {
    let (ws_sender, mut ws_receiver) = socket.split();
    let ws_sender: WsSender = Arc::new(Mutex::new(ws_sender));

    let (connection, mut outbound) = state.gateway.attach().await;
    info!(connection, "adapter connected");

    let writer = {
        let sender = ws_sender.clone();
        tokio::spawn(async move {
            while let Some(frame) = outbound.recv().await {
                if !send_frame(&sender, &frame).await {
                    break;
                }
            }
        })
    };

    while let Some(msg_result) = ws_receiver.next().await {
        let msg = match msg_result {
            Ok(msg) => msg,
            Err(e) => {
                warn!(connection, "WebSocket receive error: {}", e);
                break;
            }
        };

        match msg {
            Message::Text(text) => {
                let reply = match serde_json::from_str::<AdapterMessage>(&text) {
                    Ok(message) => dispatch(&state, message).await,
                    Err(e) => Some(BridgeMessage::Error {
                        message: format!("Invalid message: {}", e),
                    }),
                };
                if let Some(reply) = reply {
                    send_frame(&ws_sender, &reply).await;
                }
            }
            Message::Close(_) => {
                debug!(connection, "adapter sent close frame");
                break;
            }
            Message::Ping(data) => {
                let mut sender = ws_sender.lock().await;
                let _ = sender.send(Message::Pong(data)).await;
            }
            _ => {}
        }
    }

    state.gateway.detach(connection).await;
    writer.abort();
    info!(connection, "adapter disconnected");
}

/// Route one adapter frame. Returns a frame to answer with directly, if any.
///
/// Engine work runs on lane tasks so a slow transition never holds up the
/// socket reader, which must stay free to route effect results.
pub async fn dispatch(state: &BridgeState, message: AdapterMessage) -> Option<BridgeMessage> {
    match message {
        AdapterMessage::MemberJoined { principal } => {
            enqueue(state, principal, PrincipalEvent::Arrived).await;
            None
        }
        AdapterMessage::Message {
            principal,
            text,
            origin,
            handle,
        } => {
            let event = PrincipalEvent::Message {
                text,
                origin,
                handle,
            };
            enqueue(state, principal, event).await;
            None
        }
        AdapterMessage::Command { principal, command } => {
            enqueue(state, principal, PrincipalEvent::Command(command)).await;
            None
        }
        AdapterMessage::EffectResult { id, handle, error } => {
            state.gateway.complete(id, handle, error).await;
            None
        }
        AdapterMessage::Ping => Some(BridgeMessage::Pong),
    }
}

/// Append an event to the principal's lane, opening one if none is running.
async fn enqueue(state: &BridgeState, principal: Principal, event: PrincipalEvent) {
    let mut lanes = state.lanes.lock().await;
    let event = match lanes.get(&principal) {
        Some(lane) => match lane.send(event) {
            Ok(()) => return,
            // The lane's task died; open a fresh one.
            Err(mpsc::error::SendError(event)) => event,
        },
        None => event,
    };
    let (lane, queue) = mpsc::unbounded_channel();
    let _ = lane.send(event);
    lanes.insert(principal, lane);
    tokio::spawn(run_lane(
        state.engine.clone(),
        state.lanes.clone(),
        principal,
        queue,
    ));
}

/// Apply one principal's events in order, closing the lane once it runs dry.
///
/// Senders only push while holding the lanes lock, so an empty queue seen
/// under that lock stays empty.
async fn run_lane(
    engine: VerificationEngine,
    lanes: Lanes,
    principal: Principal,
    mut queue: mpsc::UnboundedReceiver<PrincipalEvent>,
) {
    let mut next = queue.recv().await;
    while let Some(event) = next {
        apply(&engine, principal, event).await;
        let mut open = lanes.lock().await;
        next = queue.try_recv().ok();
        if next.is_none() {
            open.remove(&principal);
        }
    }
}

async fn apply(engine: &VerificationEngine, principal: Principal, event: PrincipalEvent) {
    match event {
        PrincipalEvent::Arrived => {
            if let Err(e) = engine.on_arrival(principal).await {
                warn!(%principal, error = %e, "arrival could not be challenged");
            }
        }
        PrincipalEvent::Message {
            text,
            origin,
            handle,
        } => {
            let disposition = engine
                .on_message(IncomingMessage {
                    principal,
                    text,
                    origin,
                    handle,
                })
                .await;
            debug!(%principal, ?disposition, "message observed");
        }
        PrincipalEvent::Command(command) => {
            let result = match command {
                CommandKind::Retry => engine.retry(principal).await,
                CommandKind::NewChallenge => engine.new_challenge(principal).await,
            };
            if let Err(e) = result {
                warn!(%principal, ?command, error = %e, "command failed");
            }
        }
    }
}

/// Serialize and send one frame; false once the socket is gone.
async fn send_frame(sender: &WsSender, frame: &BridgeMessage) -> bool {
    let text = match serde_json::to_string(frame) {
        Ok(text) => text,
        Err(e) => {
            warn!("could not encode frame: {}", e);
            return true;
        }
    };
    let mut sender = sender.lock().await;
    sender.send(Message::Text(text)).await.is_ok()
}
