use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::{tungstenite::Message, WebSocketStream};

use crate::server::auth::IdentityProvider;
use crate::server::config::ServerConfig;
use crate::server::events::ClientEvent;
use crate::server::router::Router;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthMessage {
    pub message_type: String, // "auth"
    pub session_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthResponse {
    pub message_type: String, // "auth_response"
    pub success: bool,
    pub user_id: Option<String>,
    pub error: Option<String>,
}

impl AuthResponse {
    fn success(user_id: &str) -> Self {
        Self {
            message_type: "auth_response".to_string(),
            success: true,
            user_id: Some(user_id.to_string()),
            error: None,
        }
    }

    fn failure(error: &str) -> Self {
        Self {
            message_type: "auth_response".to_string(),
            success: false,
            user_id: None,
            error: Some(error.to_string()),
        }
    }
}

/// WebSocket front door: authenticates the connection, binds it in the
/// registry, then pumps frames between the socket and the router.
pub struct ChatGateway {
    router: Arc<Router>,
    identity: Arc<dyn IdentityProvider>,
    auth_timeout: Duration,
}

impl ChatGateway {
    pub fn new(
        router: Arc<Router>,
        identity: Arc<dyn IdentityProvider>,
        config: &ServerConfig,
    ) -> Self {
        Self {
            router,
            identity,
            auth_timeout: Duration::from_secs(config.auth_timeout_secs),
        }
    }

    pub async fn accept<S>(&self, stream: S, peer: SocketAddr) -> anyhow::Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        log::info!("[WS] WebSocket handshake complete for {}", peer);
        self.handle_connection(ws_stream).await
    }

    /// The first frame must be an auth message; no registry binding happens
    /// until the identity collaborator vouches for the token.
    async fn handle_connection<S>(&self, ws_stream: WebSocketStream<S>) -> anyhow::Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        let auth = match tokio::time::timeout(self.auth_timeout, ws_receiver.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => match serde_json::from_str::<AuthMessage>(&text) {
                Ok(auth) if auth.message_type == "auth" => auth,
                Ok(_) => {
                    let response = AuthResponse::failure("Invalid message type, expected 'auth'");
                    let _ = ws_sender
                        .send(Message::Text(serde_json::to_string(&response)?))
                        .await;
                    return Err(anyhow::anyhow!("invalid auth message type"));
                }
                Err(e) => {
                    let response = AuthResponse::failure(&format!("Invalid JSON: {}", e));
                    let _ = ws_sender
                        .send(Message::Text(serde_json::to_string(&response)?))
                        .await;
                    return Err(anyhow::anyhow!("invalid JSON in auth message"));
                }
            },
            Ok(Some(Ok(Message::Close(_)))) | Ok(None) => {
                log::info!("[WS] Client closed connection during auth");
                return Ok(());
            }
            Ok(Some(Ok(_))) => {
                let response = AuthResponse::failure("Expected text message for authentication");
                let _ = ws_sender
                    .send(Message::Text(serde_json::to_string(&response)?))
                    .await;
                return Err(anyhow::anyhow!("unexpected message type during auth"));
            }
            Ok(Some(Err(e))) => {
                return Err(anyhow::anyhow!("WebSocket error during auth: {}", e));
            }
            Err(_) => {
                let response = AuthResponse::failure("Authentication timeout");
                let _ = ws_sender
                    .send(Message::Text(serde_json::to_string(&response)?))
                    .await;
                return Err(anyhow::anyhow!("authentication timeout"));
            }
        };

        let user_id = match self.identity.verify(&auth.session_token).await {
            Ok(user_id) => user_id,
            Err(err) => {
                let response = AuthResponse::failure("Invalid or expired session token");
                let _ = ws_sender
                    .send(Message::Text(serde_json::to_string(&response)?))
                    .await;
                return Err(anyhow::anyhow!("authentication failed: {}", err));
            }
        };
        ws_sender
            .send(Message::Text(serde_json::to_string(&AuthResponse::success(
                &user_id,
            ))?))
            .await?;
        log::info!("[WS] Authentication successful for user {}", user_id);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = self.router.on_connect(&user_id, tx).await;

        // Writer: drains the connection's outbound queue into the socket.
        // The registry never waits on this, so a slow socket only backs up
        // its own queue.
        let send_task = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let text = match serde_json::to_string(&event) {
                    Ok(text) => text,
                    Err(e) => {
                        log::error!("[WS] Failed to encode outbound event: {}", e);
                        continue;
                    }
                };
                if ws_sender.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
        });

        // Reader: dispatches events sequentially, so each event from this
        // connection completes before the next one starts.
        let router = self.router.clone();
        let conn = handle.clone();
        let receive_task = tokio::spawn(async move {
            while let Some(frame) = ws_receiver.next().await {
                match frame {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ClientEvent>(&text) {
                        Ok(event) => router.handle_event(&conn, event).await,
                        Err(e) => {
                            log::warn!("[WS] Unparseable frame from {}: {}", conn.user_id, e);
                        }
                    },
                    Ok(Message::Close(_)) => break,
                    Err(_) => break,
                    _ => {}
                }
            }
            // A dropped socket is a normal departure, not an error
            router.on_disconnect(&conn.conn_id).await;
        });

        tokio::select! {
            _ = send_task => {},
            _ = receive_task => {},
        }

        Ok(())
    }
}
