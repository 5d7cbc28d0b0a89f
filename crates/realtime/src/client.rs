//! WebSocket handshake for the push channel.
//!
//! [`ChannelClient`] holds the endpoint configuration. Each call to
//! [`ChannelClient::connect`] opens a new physical connection with a fresh
//! connection id.

use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

pub type ChannelStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Endpoint configuration for the push channel.
#[derive(Debug, Clone)]
pub struct ChannelClient {
    ws_url: String,
}

/// A live physical connection.
pub struct ChannelConnection {
    /// Unique id sent during the handshake; new for every reconnect.
    pub connection_id: String,
    /// The raw WebSocket stream for reading/writing frames.
    pub ws_stream: ChannelStream,
}

impl ChannelClient {
    /// * `ws_url` - WebSocket endpoint, e.g. `ws://host:8000/ws`.
    pub fn new(ws_url: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
        }
    }

    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    /// Open a connection.
    ///
    /// Generates a `client_id` (UUID v4) and appends it as a query
    /// parameter so the server can address this connection.
    pub async fn connect(&self) -> Result<ChannelConnection, ChannelClientError> {
        let connection_id = uuid::Uuid::new_v4().to_string();
        let separator = if self.ws_url.contains('?') { '&' } else { '?' };
        let url = format!("{}{separator}clientId={connection_id}", self.ws_url);

        let (ws_stream, _response) = connect_async(&url).await.map_err(|e| {
            ChannelClientError::Connection(format!(
                "Failed to connect to push channel at {}: {e}",
                self.ws_url
            ))
        })?;

        tracing::info!(
            connection_id = %connection_id,
            "Connected to push channel at {}",
            self.ws_url,
        );

        Ok(ChannelConnection {
            connection_id,
            ws_stream,
        })
    }
}

/// Errors that can occur when opening a push-channel connection.
#[derive(Debug, thiserror::Error)]
pub enum ChannelClientError {
    /// Failed to establish the WebSocket connection.
    #[error("Connection error: {0}")]
    Connection(String),
}
