//! Receiver task: counts data frames until the target is reached.

use futures::{Sink, Stream, StreamExt};
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, info, warn};

use super::connection::SharedSink;

/// Read frames until `target` text or binary frames have been counted.
///
/// Reaching the target fires `done`; a read error, a close frame or the end
/// of the stream stops the loop without firing it. The connection is closed
/// on every exit path. Returns the number of frames counted.
pub async fn run<R, S>(
    mut stream: R,
    sink: SharedSink<S>,
    target: usize,
    done: oneshot::Sender<()>,
) -> usize
where
    R: Stream<Item = Result<Message, WsError>> + Unpin,
    S: Sink<Message, Error = WsError> + Unpin,
{
    let mut received = 0;

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(_)) | Ok(Message::Binary(_)) => {
                received += 1;
                if received >= target {
                    info!(received, "Received all messages, closing connection");
                    // The handler may already have timed out and dropped its end
                    let _ = done.send(());
                    break;
                }
            }
            Ok(Message::Close(frame)) => {
                warn!(received, ?frame, "Client closed the connection");
                break;
            }
            // Ping and pong are answered by the WebSocket layer
            Ok(_) => {}
            Err(e) => {
                warn!(received, error = %e, "Read failed");
                break;
            }
        }
    }

    sink.close().await;
    debug!(received, "Receiver finished");
    received
}
