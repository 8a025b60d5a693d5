//! Write half of an exchange connection, shared between tasks.
//!
//! The sender writes through it while the receiver and the handler may both
//! close it. Closing is best effort: the first call sends a close frame, any
//! later call returns immediately.

use futures::{Sink, SinkExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::debug;

/// Upper bound on how long a close may wait for the writer.
///
/// A sender blocked on a peer that stopped reading holds the sink; the
/// close gives up rather than stall the caller.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

struct Inner<S> {
    sink: Mutex<S>,
    closed: AtomicBool,
}

/// Cloneable handle to the write half of a connection.
pub struct SharedSink<S> {
    inner: Arc<Inner<S>>,
}

impl<S> Clone for SharedSink<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S> SharedSink<S>
where
    S: Sink<Message, Error = WsError> + Unpin,
{
    pub fn new(sink: S) -> Self {
        Self {
            inner: Arc::new(Inner {
                sink: Mutex::new(sink),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Write and flush a single message.
    pub async fn send(&self, message: Message) -> Result<(), WsError> {
        if self.is_closed() {
            return Err(WsError::AlreadyClosed);
        }
        let mut sink = self.inner.sink.lock().await;
        sink.send(message).await
    }

    /// Close the connection. Only the first call has any effect.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let result = tokio::time::timeout(CLOSE_TIMEOUT, async {
            let mut sink = self.inner.sink.lock().await;
            sink.close().await
        })
        .await;

        match result {
            Ok(Ok(())) => debug!("Connection closed"),
            Ok(Err(e)) => debug!(error = %e, "Close failed"),
            Err(_) => debug!("Close timed out waiting for the writer"),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}
