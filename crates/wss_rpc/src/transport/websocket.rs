use futures::future::BoxFuture;
use futures::{FutureExt, SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tracing::{debug, warn};
use url::Url;

use super::{CloseEvent, Connector, Outbound, TransportChannel, TransportEvent};
use crate::error::TransportError;

/// Close code reported when the peer closed without a status.
const NO_STATUS_RECEIVED: u16 = 1005;

/// Opens `ws://` / `wss://` channels with `tokio-tungstenite`.
///
/// Credentials travel in the `Sec-WebSocket-Protocol` header. Text frames map
/// to messages one to one; binary frames are accepted when they hold UTF-8.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    pub fn new() -> Self {
        Self
    }
}

impl Connector for WebSocketConnector {
    fn open(
        &self,
        remote: &str,
        protocols: &[String],
    ) -> BoxFuture<'static, Result<TransportChannel, TransportError>> {
        let remote = remote.to_string();
        let protocols = protocols.to_vec();
        async move { connect(remote, protocols).await }.boxed()
    }
}

async fn connect(
    remote: String,
    protocols: Vec<String>,
) -> Result<TransportChannel, TransportError> {
    let url = Url::parse(&remote).map_err(|_| TransportError::InvalidRemote(remote.clone()))?;
    if !matches!(url.scheme(), "ws" | "wss") {
        return Err(TransportError::InvalidRemote(remote));
    }

    let connect_failed = |reason: String| TransportError::Connect {
        remote: remote.clone(),
        reason,
    };

    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|e| connect_failed(e.to_string()))?;
    if !protocols.is_empty() {
        let value =
            HeaderValue::from_str(&protocols.join(", ")).map_err(|e| connect_failed(e.to_string()))?;
        request.headers_mut().insert("Sec-WebSocket-Protocol", value);
    }

    let (stream, _response) = connect_async(request)
        .await
        .map_err(|e| connect_failed(e.to_string()))?;
    debug!(remote = %remote, "WebSocket connected");

    let (mut sink, mut source) = stream.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Outbound>();
    let (in_tx, in_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            let (message, closing) = match frame {
                Outbound::Text(text) => (WsMessage::Text(text.into()), false),
                Outbound::Close => (WsMessage::Close(None), true),
            };
            if let Err(e) = sink.send(message).await {
                warn!(error = %e, "Failed to write WebSocket frame");
                break;
            }
            if closing {
                break;
            }
        }
    });

    tokio::spawn(async move {
        let close = loop {
            match source.next().await {
                Some(Ok(WsMessage::Text(text))) => {
                    if in_tx
                        .send(TransportEvent::Message(text.as_str().to_string()))
                        .is_err()
                    {
                        return;
                    }
                }
                Some(Ok(WsMessage::Binary(data))) => match String::from_utf8(data.to_vec()) {
                    Ok(text) => {
                        if in_tx.send(TransportEvent::Message(text)).is_err() {
                            return;
                        }
                    }
                    Err(_) => debug!("Dropping non-UTF-8 binary frame"),
                },
                Some(Ok(WsMessage::Close(frame))) => {
                    break match frame {
                        Some(frame) => {
                            CloseEvent::clean(u16::from(frame.code), frame.reason.as_str())
                        }
                        None => CloseEvent::clean(NO_STATUS_RECEIVED, ""),
                    };
                }
                // Pings are answered by tungstenite itself.
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    let _ = in_tx.send(TransportEvent::Error(e.to_string()));
                    break CloseEvent::abnormal(e.to_string());
                }
                None => break CloseEvent::abnormal("connection dropped"),
            }
        };
        let _ = in_tx.send(TransportEvent::Closed(close));
    });

    Ok(TransportChannel {
        outbound: out_tx,
        inbound: in_rx,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rejects_unparseable_remote() {
        let result = WebSocketConnector::new().open("not a url", &[]).await;
        assert_eq!(
            result.unwrap_err(),
            TransportError::InvalidRemote("not a url".to_string())
        );
    }

    #[tokio::test]
    async fn test_rejects_non_websocket_scheme() {
        let result = WebSocketConnector::new()
            .open("https://example.test", &[])
            .await;
        assert!(matches!(result, Err(TransportError::InvalidRemote(_))));
    }
}
