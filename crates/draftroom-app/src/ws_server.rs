// WebSocket hub for remote participants.
//
// Every accepted connection gets a `ClientId` and its own outbound channel.
// Inbound text frames are forwarded to the host loop tagged with the client
// they came from; the host loop answers by pushing frames into the client's
// outbox, which a per-connection writer task drains into the socket.

use futures_util::stream::Stream;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

pub type ClientId = u64;

/// Frames buffered per client before the host starts dropping them.
pub const OUTBOX_CAPACITY: usize = 256;

/// Events emitted by the WebSocket server to the host loop.
#[derive(Debug)]
pub enum WsEvent {
    /// A client finished the WebSocket handshake. Frames sent into `outbox`
    /// are written to its socket.
    Connected {
        client: ClientId,
        addr: String,
        outbox: mpsc::Sender<String>,
    },
    /// The client's connection closed.
    Disconnected { client: ClientId },
    /// A text frame from the client (raw JSON string).
    Message { client: ClientId, text: String },
}

/// Accept connections on `0.0.0.0:{port}` forever, serving each on its own
/// task. Returns when the host loop stops listening.
pub async fn run(port: u16, tx: mpsc::Sender<WsEvent>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(format!("0.0.0.0:{port}")).await?;
    let local_addr = listener.local_addr()?;
    info!("WebSocket server listening on {local_addr}");

    let mut next_client: ClientId = 0;
    loop {
        let (stream, addr) = listener.accept().await?;
        if tx.is_closed() {
            break;
        }
        next_client += 1;
        info!("Accepted TCP connection from {addr} as client {next_client}");
        tokio::spawn(serve_client(stream, addr.to_string(), next_client, tx.clone()));
    }

    Ok(())
}

async fn serve_client(stream: TcpStream, addr: String, client: ClientId, tx: mpsc::Sender<WsEvent>) {
    let ws_stream = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("WebSocket handshake failed for {addr}: {e}");
            return;
        }
    };

    let (mut write, read) = ws_stream.split();
    let (outbox, mut outbound) = mpsc::channel::<String>(OUTBOX_CAPACITY);
    let writer = tokio::spawn(async move {
        while let Some(text) = outbound.recv().await {
            if let Err(e) = write.send(Message::Text(text.into())).await {
                debug!("write to client {client} failed: {e}");
                break;
            }
        }
        let _ = write.close().await;
    });

    if tx
        .send(WsEvent::Connected {
            client,
            addr: addr.clone(),
            outbox,
        })
        .await
        .is_err()
    {
        writer.abort();
        return;
    }

    let _ = process_message_stream(read, &tx, client, &addr).await;
    writer.abort();
    let _ = tx.send(WsEvent::Disconnected { client }).await;
}

/// Forward text frames from `stream` through `tx` until the peer closes or
/// errors. Returns `Err(())` if the receiver is gone.
///
/// Generic over the stream so it can be tested without opening sockets.
pub async fn process_message_stream<St>(
    mut stream: St,
    tx: &mpsc::Sender<WsEvent>,
    client: ClientId,
    addr: &str,
) -> Result<(), ()>
where
    St: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    while let Some(msg_result) = stream.next().await {
        match msg_result {
            Ok(Message::Text(text)) => {
                let event = WsEvent::Message {
                    client,
                    text: text.to_string(),
                };
                if tx.send(event).await.is_err() {
                    return Err(());
                }
            }
            Ok(Message::Close(_)) => {
                info!("Client {addr} sent close frame");
                break;
            }
            Err(e) => {
                warn!("WebSocket error from {addr}: {e}");
                break;
            }
            _ => {
                // Binary, Ping, Pong and raw frames carry nothing for us.
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;
    use tokio_tungstenite::tungstenite::Error as WsError;

    fn mock_stream(
        messages: Vec<Result<Message, WsError>>,
    ) -> impl Stream<Item = Result<Message, WsError>> + Unpin {
        stream::iter(messages)
    }

    /// Unwrap a forwarded text frame.
    fn text_of(event: WsEvent) -> (ClientId, String) {
        match event {
            WsEvent::Message { client, text } => (client, text),
            other => panic!("expected a message, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn text_frames_are_tagged_with_their_client() {
        let (tx, mut rx) = mpsc::channel(64);
        let messages = vec![
            Ok(Message::Text("first".into())),
            Ok(Message::Text("second".into())),
        ];

        process_message_stream(mock_stream(messages), &tx, 7, "test")
            .await
            .unwrap();

        assert_eq!(text_of(rx.recv().await.unwrap()), (7, "first".to_string()));
        assert_eq!(text_of(rx.recv().await.unwrap()), (7, "second".to_string()));
    }

    #[tokio::test]
    async fn close_frame_stops_processing() {
        let (tx, mut rx) = mpsc::channel(64);
        let messages = vec![
            Ok(Message::Text("before_close".into())),
            Ok(Message::Close(None)),
            Ok(Message::Text("after_close".into())),
        ];

        process_message_stream(mock_stream(messages), &tx, 1, "test")
            .await
            .unwrap();

        assert_eq!(text_of(rx.recv().await.unwrap()).1, "before_close");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn error_stops_processing() {
        let (tx, mut rx) = mpsc::channel(64);
        let messages = vec![
            Ok(Message::Text("before_error".into())),
            Err(WsError::ConnectionClosed),
            Ok(Message::Text("after_error".into())),
        ];

        process_message_stream(mock_stream(messages), &tx, 1, "test")
            .await
            .unwrap();

        assert_eq!(text_of(rx.recv().await.unwrap()).1, "before_error");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn binary_and_ping_frames_are_ignored() {
        let (tx, mut rx) = mpsc::channel(64);
        let messages = vec![
            Ok(Message::Binary(vec![1, 2, 3].into())),
            Ok(Message::Ping(vec![].into())),
            Ok(Message::Pong(vec![].into())),
            Ok(Message::Text("after_ignored".into())),
        ];

        process_message_stream(mock_stream(messages), &tx, 1, "test")
            .await
            .unwrap();

        assert_eq!(text_of(rx.recv().await.unwrap()).1, "after_ignored");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn returns_err_when_host_is_gone() {
        let (tx, rx) = mpsc::channel(64);
        drop(rx);

        let messages = vec![Ok(Message::Text("orphan".into()))];
        let result = process_message_stream(mock_stream(messages), &tx, 1, "test").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn json_payload_preserved_exactly() {
        let (tx, mut rx) = mpsc::channel(64);
        let payload = r#"{"type":"COMMAND","attempt_id":"k1","action":{"kind":"bid","amount":12}}"#;
        let messages = vec![Ok(Message::Text(payload.into()))];

        process_message_stream(mock_stream(messages), &tx, 3, "test")
            .await
            .unwrap();

        assert_eq!(text_of(rx.recv().await.unwrap()), (3, payload.to_string()));
    }
}
