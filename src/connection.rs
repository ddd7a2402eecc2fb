//! Per-connection request loop.
//!
//! A connection alternates between waiting for a frame and processing it:
//!
//! ```text
//! AwaitingFrame --frame--> Processing --reply--> AwaitingFrame
//!       |                      |
//!      EOF                 disconnect
//!       v                      v
//!   Terminated <---------------+
//! ```
//!
//! Requests are strictly sequential: a response is fully written before the
//! next frame is read.

use crate::dispatch::{Dispatcher, Outcome};
use crate::framing::{read_frame, write_frame, FrameError, DEFAULT_MAX_FRAME_SIZE};
use crate::request::classify;
use crate::session::Session;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::trace;

/// Limits applied to every connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionLimits {
    /// Idle time allowed while waiting for a frame (None = wait forever)
    pub read_timeout: Option<Duration>,
    /// Largest accepted payload in bytes
    pub max_frame_size: usize,
}

impl Default for ConnectionLimits {
    fn default() -> Self {
        Self {
            read_timeout: None,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

/// Errors that end a connection
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error("failed to encode response: {0}")]
    Encode(#[from] serde_json::Error),
}

enum State {
    AwaitingFrame,
    Processing(String),
    Terminated,
}

/// Serve one client until it disconnects.
///
/// The session lives exactly as long as this call.
pub async fn handle_connection<S>(
    mut stream: S,
    dispatcher: Arc<Dispatcher>,
    limits: ConnectionLimits,
) -> Result<(), ConnectionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut session = Session::new();
    let mut state = State::AwaitingFrame;

    loop {
        state = match state {
            State::AwaitingFrame => match next_frame(&mut stream, &limits).await? {
                Some(payload) => State::Processing(payload),
                None => {
                    trace!("Connection closed by client");
                    State::Terminated
                }
            },

            State::Processing(payload) => {
                let request = classify(&payload);
                trace!(kind = request.kind(), "Processing request");

                match dispatcher.dispatch(request, &mut session) {
                    Outcome::Reply(response) => {
                        write_frame(&mut stream, &response.to_json()?).await?;
                        State::AwaitingFrame
                    }
                    Outcome::Close => {
                        trace!("Client sent disconnect");
                        State::Terminated
                    }
                }
            }

            State::Terminated => break,
        };
    }

    // The peer may already be gone; closing is best effort.
    let _ = stream.shutdown().await;
    Ok(())
}

async fn next_frame<S>(
    stream: &mut S,
    limits: &ConnectionLimits,
) -> Result<Option<String>, FrameError>
where
    S: AsyncRead + Unpin,
{
    match limits.read_timeout {
        Some(timeout) => tokio::time::timeout(timeout, read_frame(stream, limits.max_frame_size))
            .await
            .map_err(|_| FrameError::Timeout)?,
        None => read_frame(stream, limits.max_frame_size).await,
    }
}
