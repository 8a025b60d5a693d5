//! Echo exchange handler for the Tokio runtime.

use futures::{Sink, Stream, StreamExt};
use std::net::SocketAddr;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{error, info};

use super::connection::SharedSink;
use super::{receiver, sender, ExchangeError, ExchangeSettings, Outcome};

/// Handle one client connection.
///
/// Upgrades the stream, waits for the client's readiness frame and then runs
/// the timed exchange. Errors are returned only for failures before the
/// exchange starts; once it starts, the result is an [`Outcome`].
pub async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    settings: ExchangeSettings,
) -> Result<Outcome, ExchangeError> {
    let ws = accept_async(stream).await.map_err(ExchangeError::Upgrade)?;
    info!(peer = %peer, "Connected, waiting for client to be ready");

    let (write, mut read) = ws.split();
    let ready = wait_until_ready(&mut read).await?;
    info!(peer = %peer, message = %ready, "Client is ready");

    Ok(run_exchange(read, SharedSink::new(write), &settings).await)
}

/// Block until the first data frame arrives and return its content.
async fn wait_until_ready<R>(read: &mut R) -> Result<String, ExchangeError>
where
    R: Stream<Item = Result<Message, WsError>> + Unpin,
{
    loop {
        match read.next().await {
            Some(Ok(Message::Text(text))) => return Ok(text),
            Some(Ok(Message::Binary(data))) => {
                return Ok(String::from_utf8_lossy(&data).into_owned())
            }
            Some(Ok(Message::Close(_))) | None => return Err(ExchangeError::Handshake(None)),
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(ExchangeError::Handshake(Some(e))),
        }
    }
}

/// Start the sender and receiver and race completion against the deadline.
///
/// The deadline starts now. Tasks still running when this returns are left
/// behind; the connection is closed either way.
pub async fn run_exchange<R, S>(
    read: R,
    sink: SharedSink<S>,
    settings: &ExchangeSettings,
) -> Outcome
where
    R: Stream<Item = Result<Message, WsError>> + Unpin + Send + 'static,
    S: Sink<Message, Error = WsError> + Unpin + Send + 'static,
{
    tokio::spawn(sender::run(
        sink.clone(),
        settings.messages,
        settings.payload.clone(),
        settings.on_write_error,
    ));

    let (done_tx, done_rx) = oneshot::channel();
    tokio::spawn(receiver::run(read, sink.clone(), settings.messages, done_tx));

    // A receiver that stops early never signals; only the deadline is left
    let completed = async {
        if done_rx.await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    let outcome = match tokio::time::timeout(settings.deadline, completed).await {
        Ok(()) => Outcome::Completed,
        Err(_) => Outcome::TimedOut,
    };

    sink.close().await;

    match outcome {
        Outcome::Completed => info!(messages = settings.messages, "Received all messages"),
        Outcome::TimedOut => error!(
            messages = settings.messages,
            deadline_secs = settings.deadline.as_secs_f64(),
            "Timed out waiting for messages"
        ),
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::WriteErrorPolicy;
    use futures::channel::mpsc;
    use futures::SinkExt;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;
    use tokio::time::Instant;
    use tokio_tungstenite::connect_async;

    fn settings(messages: usize, deadline: Duration) -> ExchangeSettings {
        ExchangeSettings {
            messages,
            deadline,
            payload: "Hello".to_string(),
            on_write_error: WriteErrorPolicy::Ignore,
        }
    }

    type ChannelSink = futures::sink::SinkMapErr<
        mpsc::UnboundedSender<Message>,
        fn(mpsc::SendError) -> WsError,
    >;

    /// In-memory connection: frames pushed into the returned sender are read
    /// by the exchange, frames it writes come out of the returned receiver.
    fn in_memory() -> (
        mpsc::UnboundedSender<Result<Message, WsError>>,
        mpsc::UnboundedReceiver<Result<Message, WsError>>,
        SharedSink<ChannelSink>,
        mpsc::UnboundedReceiver<Message>,
    ) {
        let (client_tx, server_rx) = mpsc::unbounded();
        let (server_tx, client_rx) = mpsc::unbounded();
        let map: fn(mpsc::SendError) -> WsError = |_| WsError::ConnectionClosed;
        (
            client_tx,
            server_rx,
            SharedSink::new(server_tx.sink_map_err(map)),
            client_rx,
        )
    }

    #[tokio::test]
    async fn test_completes_when_target_reached() {
        let (client_tx, server_rx, sink, _client_rx) = in_memory();
        for i in 0..3 {
            client_tx
                .unbounded_send(Ok(Message::text(format!("echo {i}"))))
                .unwrap();
        }

        let settings = settings(3, Duration::from_secs(2));
        let outcome = run_exchange(server_rx, sink.clone(), &settings).await;

        assert_eq!(outcome, Outcome::Completed);
        assert!(sink.is_closed());
    }

    #[tokio::test]
    async fn test_times_out_when_short() {
        let (client_tx, server_rx, sink, _client_rx) = in_memory();
        for _ in 0..2 {
            client_tx.unbounded_send(Ok(Message::text("echo"))).unwrap();
        }

        let deadline = Duration::from_millis(200);
        let started = Instant::now();
        let outcome = run_exchange(server_rx, sink.clone(), &settings(3, deadline)).await;

        assert_eq!(outcome, Outcome::TimedOut);
        assert!(started.elapsed() >= deadline);
        assert!(sink.is_closed());
    }

    #[tokio::test]
    async fn test_read_failure_waits_for_deadline() {
        let (client_tx, server_rx, sink, _client_rx) = in_memory();
        client_tx.unbounded_send(Ok(Message::text("echo"))).unwrap();
        client_tx
            .unbounded_send(Err(WsError::ConnectionClosed))
            .unwrap();

        let deadline = Duration::from_millis(200);
        let started = Instant::now();
        let outcome = run_exchange(server_rx, sink, &settings(3, deadline)).await;

        assert_eq!(outcome, Outcome::TimedOut);
        assert!(started.elapsed() >= deadline);
    }

    #[tokio::test]
    async fn test_sender_emits_payload() {
        let (client_tx, server_rx, sink, client_rx) = in_memory();
        for _ in 0..4 {
            client_tx.unbounded_send(Ok(Message::binary(vec![0u8]))).unwrap();
        }

        let settings = settings(4, Duration::from_secs(2));
        let outcome = run_exchange(server_rx, sink, &settings).await;
        assert_eq!(outcome, Outcome::Completed);

        // Whatever the sender managed to write before the close is "Hello"
        let sent: Vec<Message> = client_rx.collect().await;
        assert!(sent.len() <= 4);
        assert!(sent.iter().all(|m| *m == Message::text("Hello")));
    }

    #[tokio::test]
    async fn test_ready_skips_control_frames() {
        let (client_tx, mut server_rx, _sink, _client_rx) = in_memory();
        client_tx.unbounded_send(Ok(Message::Ping(vec![]))).unwrap();
        client_tx.unbounded_send(Ok(Message::text("ready"))).unwrap();

        let ready = wait_until_ready(&mut server_rx).await.unwrap();
        assert_eq!(ready, "ready");
    }

    #[tokio::test]
    async fn test_ready_fails_on_close() {
        let (client_tx, mut server_rx, _sink, _client_rx) = in_memory();
        client_tx.unbounded_send(Ok(Message::Close(None))).unwrap();

        let err = wait_until_ready(&mut server_rx).await.unwrap_err();
        assert!(matches!(err, ExchangeError::Handshake(None)));
    }

    async fn accept_one(listener: &TcpListener) -> (TcpStream, SocketAddr) {
        listener.accept().await.unwrap()
    }

    #[tokio::test]
    async fn test_client_leaves_before_ready() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client = tokio::spawn(async move {
            let (mut ws, _) = connect_async(format!("ws://{addr}/")).await.unwrap();
            ws.close(None).await.unwrap();
        });

        let (stream, peer) = accept_one(&listener).await;
        let result = handle_connection(stream, peer, settings(3, Duration::from_secs(2))).await;

        assert!(matches!(result, Err(ExchangeError::Handshake(_))));
        client.await.unwrap();
    }

    #[tokio::test]
    async fn test_plain_http_is_rejected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client = tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            stream
                .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n")
                .await
                .unwrap();
            stream
        });

        let (stream, peer) = accept_one(&listener).await;
        let result = handle_connection(stream, peer, settings(3, Duration::from_secs(2))).await;

        assert!(matches!(result, Err(ExchangeError::Upgrade(_))));
        drop(client.await.unwrap());
    }

    #[tokio::test]
    async fn test_echo_client_completes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client = tokio::spawn(async move {
            let (mut ws, _) = connect_async(format!("ws://{addr}/")).await.unwrap();
            ws.send(Message::text("ready")).await.unwrap();

            let mut echoed = 0;
            while echoed < 5 {
                match ws.next().await {
                    Some(Ok(message @ Message::Text(_))) => {
                        assert_eq!(message, Message::text("Hello"));
                        ws.send(message).await.unwrap();
                        echoed += 1;
                    }
                    Some(Ok(_)) => {}
                    other => panic!("unexpected frame: {other:?}"),
                }
            }
            echoed
        });

        let (stream, peer) = accept_one(&listener).await;
        let outcome = handle_connection(stream, peer, settings(5, Duration::from_secs(2)))
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::Completed);
        assert_eq!(client.await.unwrap(), 5);
    }
}
