//! WebSocket streaming.
//!
//! Interactive operations exchange raw bytes over the socket and end
//! with a literal trailer carrying the exit status; clients scan for
//! the sentinel to tell status from data, because a close code cannot
//! be read reliably across WebSocket stacks. Keep the sentinel
//! byte-for-byte.

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use rack_provider::ProviderError;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tracing::debug;

/// Sentinel prefix of the final trailer line.
pub const EXIT_SENTINEL: &str = "F1E49A85-0AD7-4AEF-A618-C249C6E6568D";

/// Render the exit trailer for a code.
pub fn exit_trailer(code: i32) -> String {
    format!("{EXIT_SENTINEL}:{code}\n")
}

/// Render the pre-stream error line.
pub fn error_line(err: &ProviderError) -> String {
    format!("ERROR: {err}\n")
}

/// Bridge an interactive provider operation onto a WebSocket.
///
/// `client` is our end of the duplex handed to the provider; `op`
/// resolves to the exit code once the session finishes.
pub async fn interactive<Fut>(socket: WebSocket, client: DuplexStream, op: Fut)
where
    Fut: Future<Output = Result<i32, ProviderError>> + Send + 'static,
{
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (mut read_half, mut write_half) = tokio::io::split(client);

    // Socket → session.
    let inbound = tokio::spawn(async move {
        while let Some(Ok(message)) = ws_rx.next().await {
            let data = match message {
                Message::Binary(data) => data.to_vec(),
                Message::Text(text) => text.as_bytes().to_vec(),
                Message::Close(_) => break,
                _ => continue,
            };
            if write_half.write_all(&data).await.is_err() {
                break;
            }
        }
    });

    let op = tokio::spawn(op);

    // Session → socket until the provider closes its end.
    let mut buf = [0u8; 8192];
    loop {
        match read_half.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if ws_tx
                    .send(Message::Binary(buf[..n].to_vec().into()))
                    .await
                    .is_err()
                {
                    break;
                }
            }
        }
    }

    match op.await {
        Ok(Ok(code)) => {
            let _ = ws_tx.send(Message::Text(exit_trailer(code).into())).await;
        }
        Ok(Err(err)) => {
            debug!(error = %err, "interactive session failed");
            let _ = ws_tx.send(Message::Text(error_line(&err).into())).await;
        }
        Err(_) => {}
    }

    let _ = ws_tx.close().await;
    inbound.abort();
}

/// Stream a provider reader to the socket and close. Log streams carry
/// no trailer; the close marks the end.
pub async fn reader(socket: WebSocket, mut source: rack_provider::Reader) {
    let (mut ws_tx, _ws_rx) = socket.split();
    let mut buf = [0u8; 8192];
    loop {
        match source.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if ws_tx
                    .send(Message::Binary(buf[..n].to_vec().into()))
                    .await
                    .is_err()
                {
                    break;
                }
            }
        }
    }
    let _ = ws_tx.close().await;
}

/// Report a pre-stream failure on a socket that never produced data.
pub async fn send_error(socket: WebSocket, err: &ProviderError) {
    let (mut ws_tx, _ws_rx) = socket.split();
    let _ = ws_tx.send(Message::Text(error_line(err).into())).await;
    let _ = ws_tx.close().await;
}
