//! [`Target`] implemented by a browser-side content script over WebSocket.
//!
//! The agent listens; the browser extension connects and answers requests of
//! the form `{"id", "op", "args"}` with `{"id", "ok", "result", "error", "code"}`.
//! Requests go to the most recently connected client.

use std::{collections::HashMap, net::SocketAddr, sync::Arc, time::Duration};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use futures_util::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::{
    net::TcpListener,
    sync::{mpsc, oneshot, Mutex},
    task::JoinHandle,
};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use uuid::Uuid;

use crate::document::ElementHandle;
use crate::errors::AutomationError;
use crate::locator::Locator;
use crate::target::{EventKind, Target};

pub const DEFAULT_BRIDGE_ADDR: &str = "127.0.0.1:17373";

const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

type BridgeResult = Result<Value, AutomationError>;
type Pending = Arc<Mutex<HashMap<String, oneshot::Sender<BridgeResult>>>>;
type Clients = Arc<Mutex<Vec<Client>>>;

#[derive(Debug, Serialize)]
struct BridgeRequest<'a> {
    id: &'a str,
    op: &'a str,
    args: Value,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum BridgeIncoming {
    Reply {
        id: String,
        ok: bool,
        #[serde(default)]
        result: Option<Value>,
        #[serde(default)]
        error: Option<String>,
        #[serde(default)]
        code: Option<String>,
    },
    Typed(TypedIncoming),
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum TypedIncoming {
    Hello {
        #[serde(default)]
        from: Option<String>,
    },
    Pong,
}

struct Client {
    id: u64,
    sender: mpsc::UnboundedSender<Message>,
}

pub struct BridgeTarget {
    server_task: JoinHandle<()>,
    clients: Clients,
    pending: Pending,
    local_addr: SocketAddr,
    call_timeout: Duration,
}

impl Drop for BridgeTarget {
    fn drop(&mut self) {
        self.server_task.abort();
    }
}

impl BridgeTarget {
    /// Binds the listener. Use port 0 to let the OS pick one, then read
    /// [`BridgeTarget::local_addr`].
    pub async fn bind(addr: &str) -> Result<Self, AutomationError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| AutomationError::PlatformError(format!("bridge bind {addr}: {e}")))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| AutomationError::PlatformError(format!("bridge local addr: {e}")))?;
        tracing::info!(%local_addr, "target bridge listening");

        let clients: Clients = Arc::new(Mutex::new(Vec::new()));
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let server_task = tokio::spawn(accept_loop(listener, clients.clone(), pending.clone()));

        Ok(Self {
            server_task,
            clients,
            pending,
            local_addr,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        })
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub async fn is_client_connected(&self) -> bool {
        !self.clients.lock().await.is_empty()
    }

    async fn call(&self, op: &str, args: Value, timeout: Duration) -> BridgeResult {
        let id = Uuid::new_v4().to_string();
        let payload = serde_json::to_string(&BridgeRequest { id: &id, op, args })
            .map_err(|e| AutomationError::PlatformError(format!("bridge serialize: {e}")))?;

        let (tx, rx) = oneshot::channel::<BridgeResult>();
        self.pending.lock().await.insert(id.clone(), tx);

        let sent = {
            let clients = self.clients.lock().await;
            match clients.last() {
                Some(c) => c.sender.send(Message::Text(payload)).is_ok(),
                None => false,
            }
        };
        if !sent {
            self.pending.lock().await.remove(&id);
            return Err(AutomationError::PlatformError(
                "no browser connected to the target bridge".to_string(),
            ));
        }
        tracing::debug!(%id, op, "bridge request sent");

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_canceled)) => Err(AutomationError::PlatformError(format!(
                "bridge reply channel for '{op}' dropped"
            ))),
            Err(_elapsed) => {
                self.pending.lock().await.remove(&id);
                tracing::warn!(%id, op, "timed out waiting for bridge reply");
                Err(AutomationError::Timeout(format!(
                    "no reply to '{op}' within {}ms",
                    timeout.as_millis()
                )))
            }
        }
    }

    async fn call_as<T: DeserializeOwned>(&self, op: &str, args: Value) -> Result<T, AutomationError> {
        let value = self.call(op, args, self.call_timeout).await?;
        serde_json::from_value(value)
            .map_err(|e| AutomationError::PlatformError(format!("bad '{op}' reply: {e}")))
    }
}

async fn accept_loop(listener: TcpListener, clients: Clients, pending: Pending) {
    let mut next_client_id = 0u64;
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("bridge accept error: {}", e);
                continue;
            }
        };
        next_client_id += 1;
        let client_id = next_client_id;
        let clients = clients.clone();
        let pending = pending.clone();

        tokio::spawn(async move {
            let ws_stream = match accept_async(stream).await {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!(%peer, "bridge handshake error: {}", e);
                    return;
                }
            };
            let (mut sink, mut stream) = ws_stream.split();
            let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

            let writer = tokio::spawn(async move {
                while let Some(msg) = rx.recv().await {
                    if let Err(e) = sink.send(msg).await {
                        tracing::warn!("bridge send error: {}", e);
                        break;
                    }
                }
            });

            clients.lock().await.push(Client {
                id: client_id,
                sender: tx,
            });
            tracing::info!(%peer, client_id, "browser connected to target bridge");

            while let Some(Ok(msg)) = stream.next().await {
                if !msg.is_text() {
                    continue;
                }
                let txt = msg.into_text().unwrap_or_default();
                match serde_json::from_str::<BridgeIncoming>(&txt) {
                    Ok(BridgeIncoming::Reply {
                        id,
                        ok,
                        result,
                        error,
                        code,
                    }) => {
                        let reply = if ok {
                            Ok(result.unwrap_or(Value::Null))
                        } else {
                            let message = error.unwrap_or_else(|| "unknown error".into());
                            tracing::debug!(%id, code = ?code, %message, "bridge call failed");
                            Err(AutomationError::from_code(
                                code.as_deref().unwrap_or_default(),
                                message,
                            ))
                        };
                        if let Some(tx) = pending.lock().await.remove(&id) {
                            let _ = tx.send(reply);
                        }
                    }
                    Ok(BridgeIncoming::Typed(TypedIncoming::Hello { from })) => {
                        tracing::info!(client_id, from = ?from, "bridge hello");
                    }
                    Ok(BridgeIncoming::Typed(TypedIncoming::Pong)) => {}
                    Err(e) => tracing::warn!("invalid bridge message: {}", e),
                }
            }

            clients.lock().await.retain(|c| c.id != client_id);
            writer.abort();
            tracing::info!(client_id, "browser disconnected from target bridge");
        });
    }
}

#[async_trait]
impl Target for BridgeTarget {
    async fn current_url(&self) -> Result<String, AutomationError> {
        self.call_as("currentUrl", Value::Null).await
    }

    async fn snapshot(&self) -> Result<String, AutomationError> {
        self.call_as("snapshot", Value::Null).await
    }

    async fn query(&self, locator: &Locator) -> Result<Option<ElementHandle>, AutomationError> {
        self.call_as("query", json!({ "locator": locator })).await
    }

    async fn query_all(&self, locator: &Locator) -> Result<Vec<ElementHandle>, AutomationError> {
        self.call_as("queryAll", json!({ "locator": locator })).await
    }

    async fn click(&self, element: ElementHandle) -> Result<(), AutomationError> {
        self.call("click", json!({ "element": element }), self.call_timeout)
            .await
            .map(|_| ())
    }

    async fn set_value(&self, element: ElementHandle, value: &str) -> Result<(), AutomationError> {
        self.call(
            "setValue",
            json!({ "element": element, "value": value }),
            self.call_timeout,
        )
        .await
        .map(|_| ())
    }

    async fn set_attribute(
        &self,
        element: ElementHandle,
        name: &str,
        value: Option<&str>,
    ) -> Result<(), AutomationError> {
        self.call(
            "setAttribute",
            json!({ "element": element, "name": name, "value": value }),
            self.call_timeout,
        )
        .await
        .map(|_| ())
    }

    async fn dispatch_event(
        &self,
        element: Option<ElementHandle>,
        event: EventKind,
    ) -> Result<(), AutomationError> {
        self.call(
            "dispatchEvent",
            json!({ "element": element, "event": event }),
            self.call_timeout,
        )
        .await
        .map(|_| ())
    }

    async fn text(&self, element: ElementHandle) -> Result<String, AutomationError> {
        self.call_as("text", json!({ "element": element })).await
    }

    async fn attribute(
        &self,
        element: ElementHandle,
        name: &str,
    ) -> Result<Option<String>, AutomationError> {
        self.call_as("attribute", json!({ "element": element, "name": name }))
            .await
    }

    async fn inner_html(&self, element: ElementHandle) -> Result<String, AutomationError> {
        self.call_as("innerHtml", json!({ "element": element })).await
    }

    async fn outer_html(&self, element: ElementHandle) -> Result<String, AutomationError> {
        self.call_as("outerHtml", json!({ "element": element })).await
    }

    async fn scroll_position(&self) -> Result<(f64, f64), AutomationError> {
        #[derive(Deserialize)]
        struct Position {
            x: f64,
            y: f64,
        }
        let p: Position = self.call_as("scrollPosition", Value::Null).await?;
        Ok((p.x, p.y))
    }

    async fn scroll_to(&self, x: f64, y: f64) -> Result<(), AutomationError> {
        self.call("scrollTo", json!({ "x": x, "y": y }), self.call_timeout)
            .await
            .map(|_| ())
    }

    async fn capture_visible_region(&self) -> Result<Vec<u8>, AutomationError> {
        let encoded: String = self.call_as("capture", Value::Null).await?;
        let data = encoded
            .split_once("base64,")
            .map_or(encoded.as_str(), |(_, data)| data);
        STANDARD
            .decode(data)
            .map_err(|e| AutomationError::PlatformError(format!("bad capture payload: {e}")))
    }

    async fn navigate_and_await(
        &self,
        url: &str,
        timeout: Duration,
    ) -> Result<bool, AutomationError> {
        let value = self
            .call(
                "navigate",
                json!({ "url": url, "timeoutMs": timeout.as_millis() as u64 }),
                timeout + self.call_timeout,
            )
            .await?;
        Ok(value.as_bool().unwrap_or(true))
    }

    async fn evaluate(&self, expression: &str) -> Result<String, AutomationError> {
        let value = self
            .call("evaluate", json!({ "expression": expression }), self.call_timeout)
            .await?;
        Ok(match value {
            Value::String(s) => s,
            other => other.to_string(),
        })
    }

    async fn clipboard_write(&self, text: &str) -> Result<(), AutomationError> {
        self.call("clipboardWrite", json!({ "text": text }), self.call_timeout)
            .await
            .map(|_| ())
    }
}
