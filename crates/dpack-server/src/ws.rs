//! The HMR channel: one websocket per open page.
//!
//! Payloads are broadcast as JSON text frames. Pages talk back with
//! `custom` events, which are dispatched to listeners registered with
//! [`HmrChannel::on`].

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use futures::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use dpack_config::HMR_PROTOCOL;
use dpack_graph::Update;

use crate::error::ServerError;

/// Source position of an error, when known
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorLocation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    pub line: u32,
    pub column: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub message: String,
    pub stack: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plugin: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plugin_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loc: Option<ErrorLocation>,
}

impl From<&ServerError> for ErrorPayload {
    fn from(err: &ServerError) -> Self {
        Self {
            message: err.to_string(),
            stack: String::new(),
            id: err.id().map(str::to_string),
            plugin: err.plugin().map(str::to_string),
            plugin_code: err.code().map(str::to_string),
            loc: None,
        }
    }
}

/// Server to page messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum HmrPayload {
    Connected,
    Update {
        updates: Vec<Update>,
    },
    FullReload {
        #[serde(skip_serializing_if = "Option::is_none")]
        path: Option<String>,
    },
    Custom {
        event: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
    },
    Prune {
        paths: Vec<String>,
    },
    Error {
        err: ErrorPayload,
    },
}

impl HmrPayload {
    pub fn full_reload() -> Self {
        HmrPayload::FullReload { path: None }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// One connected page.
#[derive(Debug, Clone)]
pub struct HmrClient {
    id: usize,
    tx: mpsc::Sender<String>,
}

impl HmrClient {
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn send(&self, payload: &HmrPayload) {
        if self.tx.try_send(payload.to_json()).is_err() {
            debug!(client = self.id, "hmr message dropped");
        }
    }

    pub fn send_custom(&self, event: &str, data: Option<Value>) {
        self.send(&HmrPayload::Custom {
            event: event.to_string(),
            data,
        });
    }
}

pub type CustomListener = Arc<dyn Fn(Option<Value>, &HmrClient) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(usize);

#[derive(Default)]
pub struct HmrChannel {
    clients: RwLock<FxHashMap<usize, HmrClient>>,
    next_client_id: AtomicUsize,
    /// An error raised while no page was connected, replayed to the next one
    buffered_error: Mutex<Option<HmrPayload>>,
    listeners: RwLock<FxHashMap<String, Vec<(ListenerId, CustomListener)>>>,
    next_listener_id: AtomicUsize,
}

impl std::fmt::Debug for HmrChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HmrChannel")
            .field("clients", &self.clients.read().len())
            .finish()
    }
}

impl HmrChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a page. It is greeted with `connected` and any buffered
    /// error right away.
    pub fn register_client(&self) -> (HmrClient, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(256);
        let id = self.next_client_id.fetch_add(1, Ordering::Relaxed);
        let client = HmrClient { id, tx };
        client.send(&HmrPayload::Connected);
        if let Some(error) = self.buffered_error.lock().take() {
            client.send(&error);
        }
        self.clients.write().insert(id, client.clone());
        debug!(client = id, "hmr client connected");
        (client, rx)
    }

    pub fn unregister_client(&self, id: usize) {
        self.clients.write().remove(&id);
        debug!(client = id, "hmr client disconnected");
    }

    pub fn client_count(&self) -> usize {
        self.clients.read().len()
    }

    /// Broadcast to every page. An error with nobody listening is kept for
    /// the next page that connects.
    pub fn send(&self, payload: HmrPayload) {
        if matches!(payload, HmrPayload::Error { .. }) && self.client_count() == 0 {
            *self.buffered_error.lock() = Some(payload);
            return;
        }
        let json = payload.to_json();
        let mut closed = Vec::new();
        for (id, client) in self.clients.read().iter() {
            match client.tx.try_send(json.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Closed(_)) => closed.push(*id),
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(client = id, "hmr client is not keeping up, message dropped");
                }
            }
        }
        if !closed.is_empty() {
            let mut clients = self.clients.write();
            for id in closed {
                clients.remove(&id);
            }
        }
    }

    pub fn send_custom(&self, event: &str, data: Option<Value>) {
        self.send(HmrPayload::Custom {
            event: event.to_string(),
            data,
        });
    }

    /// Listen for a custom event sent by pages.
    pub fn on(&self, event: &str, listener: CustomListener) -> ListenerId {
        let id = ListenerId(self.next_listener_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .write()
            .entry(event.to_string())
            .or_default()
            .push((id, listener));
        id
    }

    pub fn off(&self, event: &str, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let Some(list) = listeners.get_mut(event) else {
            return false;
        };
        let before = list.len();
        list.retain(|(lid, _)| *lid != id);
        before != list.len()
    }

    /// Handle a text frame from a page.
    pub fn handle_message(&self, client_id: usize, text: &str) {
        let Ok(message) = serde_json::from_str::<Value>(text) else {
            return;
        };
        if message.get("type").and_then(Value::as_str) != Some("custom") {
            return;
        }
        let Some(event) = message.get("event").and_then(Value::as_str) else {
            return;
        };
        let listeners: Vec<CustomListener> = match self.listeners.read().get(event) {
            Some(list) if !list.is_empty() => list.iter().map(|(_, l)| Arc::clone(l)).collect(),
            _ => return,
        };
        let Some(client) = self.clients.read().get(&client_id).cloned() else {
            return;
        };
        let data = message.get("data").cloned();
        for listener in listeners {
            listener(data.clone(), &client);
        }
    }

    /// Disconnect every page.
    pub fn close(&self) {
        self.clients.write().clear();
    }
}

/// Upgrade a request on the HMR path. Only requests asking for the HMR
/// sub-protocol are accepted.
pub fn upgrade(ws: WebSocketUpgrade, headers: &HeaderMap, channel: Arc<HmrChannel>) -> Response {
    let wants_hmr = headers
        .get(header::SEC_WEBSOCKET_PROTOCOL)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.split(',').any(|p| p.trim() == HMR_PROTOCOL));
    if !wants_hmr {
        return StatusCode::BAD_REQUEST.into_response();
    }
    ws.protocols([HMR_PROTOCOL])
        .on_upgrade(move |socket| client_session(socket, channel))
}

async fn client_session(socket: WebSocket, channel: Arc<HmrChannel>) {
    let (client, mut rx) = channel.register_client();
    let (mut sink, mut stream) = socket.split();

    let forward = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    while let Some(Ok(message)) = stream.next().await {
        match message {
            Message::Text(text) => channel.handle_message(client.id(), text.as_str()),
            Message::Close(_) => break,
            _ => {}
        }
    }

    channel.unregister_client(client.id());
    forward.abort();
}
