//! Echo exchange: the smoke test run against a single WebSocket client.
//!
//! ## Wire behaviour
//!
//! ```text
//! client                              server
//!   | ---- HTTP upgrade ---------------> |
//!   | ---- readiness frame (any) ------> |   deadline starts here
//!   | <--- "Hello" x N ----------------- |   sender task
//!   | ---- any frame x N --------------> |   receiver task counts these
//! ```
//!
//! The run completes when the receiver has counted N data frames before the
//! deadline, and times out otherwise. Frame content is never inspected.
//!
//! The exchange never exits the process itself: it returns an [`Outcome`]
//! and the entry point maps it to an exit status.

pub mod connection;
pub mod handler;
pub mod receiver;
pub mod sender;

pub use handler::handle_connection;

use serde::Deserialize;
use std::process::ExitCode;
use std::time::Duration;
use tokio_tungstenite::tungstenite::Error as WsError;

/// Parameters of one exchange.
#[derive(Debug, Clone)]
pub struct ExchangeSettings {
    /// Messages to send, and the count the receiver waits for.
    pub messages: usize,
    /// Deadline for the exchange, measured from the readiness frame.
    pub deadline: Duration,
    /// Text payload of every sent message.
    pub payload: String,
    pub on_write_error: WriteErrorPolicy,
}

/// What the sender does when writing a message fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum WriteErrorPolicy {
    /// Count the failure and keep sending until every attempt is made.
    #[default]
    Ignore,
    /// Stop sending at the first failure.
    Abort,
}

/// Terminal result of an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The receiver counted all messages before the deadline.
    Completed,
    /// The deadline elapsed first.
    TimedOut,
}

impl Outcome {
    pub fn is_success(self) -> bool {
        matches!(self, Outcome::Completed)
    }

    /// Process exit status reported to the calling harness.
    pub fn exit_code(self) -> ExitCode {
        match self {
            Outcome::Completed => ExitCode::SUCCESS,
            Outcome::TimedOut => ExitCode::FAILURE,
        }
    }
}

/// Failures that end an exchange before the timed run starts.
///
/// Neither of these decides the process outcome; the server keeps
/// listening for another client.
#[derive(Debug)]
pub enum ExchangeError {
    /// The request was not a valid WebSocket upgrade.
    Upgrade(WsError),
    /// The client went away before sending its readiness frame.
    Handshake(Option<WsError>),
}

impl std::fmt::Display for ExchangeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExchangeError::Upgrade(e) => write!(f, "WebSocket upgrade failed: {e}"),
            ExchangeError::Handshake(Some(e)) => {
                write!(f, "Client disconnected before it was ready: {e}")
            }
            ExchangeError::Handshake(None) => {
                write!(f, "Client disconnected before it was ready")
            }
        }
    }
}

impl std::error::Error for ExchangeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ExchangeError::Upgrade(e) => Some(e),
            ExchangeError::Handshake(e) => e
                .as_ref()
                .map(|e| e as &(dyn std::error::Error + 'static)),
        }
    }
}
