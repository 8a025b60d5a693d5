//! Sender task: writes the message burst as fast as the connection takes it.

use futures::Sink;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, trace, warn};

use super::connection::SharedSink;
use super::WriteErrorPolicy;

/// Final counts of a sender run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SendReport {
    /// Messages written successfully.
    pub sent: usize,
    /// Writes that returned an error.
    pub failed: usize,
}

/// Write `count` text messages carrying `payload`.
///
/// No pacing and no delivery confirmation. Failed writes are handled as
/// `policy` says; the exchange outcome never depends on the sender.
pub async fn run<S>(
    sink: SharedSink<S>,
    count: usize,
    payload: String,
    policy: WriteErrorPolicy,
) -> SendReport
where
    S: Sink<Message, Error = WsError> + Unpin,
{
    let mut report = SendReport::default();

    for attempt in 0..count {
        match sink.send(Message::text(payload.clone())).await {
            Ok(()) => report.sent += 1,
            Err(e) => {
                report.failed += 1;
                match policy {
                    WriteErrorPolicy::Ignore => {
                        trace!(attempt, error = %e, "Write failed, continuing");
                    }
                    WriteErrorPolicy::Abort => {
                        warn!(attempt, error = %e, "Write failed, sender stopping");
                        break;
                    }
                }
            }
        }
    }

    debug!(sent = report.sent, failed = report.failed, "Sender finished");
    report
}
