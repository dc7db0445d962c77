//! Drives a [`Session`] over a byte stream.
//!
//! The engine connects out to the client, so [`Listener`] accepts TCP
//! connections and [`connect`] runs one session per stream: a reader task
//! that reassembles frames and dispatches them in arrival order, and a
//! writer task that drains encoded commands onto the stream.
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::sync::{mpsc, Mutex};
use tokio::time::Duration;

use crate::client::{SessionHandle, COMMAND_TIMEOUT_SECS};
use crate::error::DbgpError;
use crate::frame::FrameReader;
use crate::session::{Session, SessionEvent, SessionOptions};

/// Read buffer size for the reader task.
const READ_CHUNK: usize = 8192;

/// Settings for one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    pub session: SessionOptions,
    /// Deadline for each command's reply.
    pub command_timeout: Duration,
    /// Deadline for `run`, `step_*` and `stop`; `None` waits for as long
    /// as the script takes to break or end.
    pub continuation_timeout: Option<Duration>,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            session: SessionOptions::default(),
            command_timeout: Duration::from_secs(COMMAND_TIMEOUT_SECS),
            continuation_timeout: None,
        }
    }
}

/// Start a session on `stream` and return its handle and event stream.
///
/// Must be called within a tokio runtime. The session closes on EOF, a
/// transport error, a fatal protocol error or once the engine reports
/// `stopping`; [`SessionEvent::Closed`] is the last event.
pub fn connect<S>(
    stream: S,
    options: ConnectOptions,
) -> (SessionHandle, mpsc::UnboundedReceiver<SessionEvent>)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let session = Arc::new(Mutex::new(Session::new(
        options.session,
        events_tx.clone(),
        outbound_tx,
    )));
    let (mut read_half, mut write_half) = tokio::io::split(stream);

    // Writer task: ends when the session drops its outbound sender.
    tokio::spawn(async move {
        while let Some(bytes) = outbound_rx.recv().await {
            if let Err(e) = write_half.write_all(&bytes).await {
                tracing::warn!(error = %e, "write to engine failed");
                break;
            }
            if write_half.flush().await.is_err() {
                break;
            }
        }
        let _ = write_half.shutdown().await;
    });

    // Reader task
    let reader_session = session.clone();
    tokio::spawn(async move {
        let mut frames = FrameReader::new();
        let mut buf = vec![0u8; READ_CHUNK];
        loop {
            let n = match read_half.read(&mut buf).await {
                Ok(0) => {
                    tracing::info!("engine closed the connection");
                    break;
                }
                Ok(n) => n,
                Err(e) => {
                    tracing::warn!(error = %e, "read from engine failed");
                    if !reader_session.lock().await.is_closed() {
                        let _ = events_tx.send(SessionEvent::Error(DbgpError::Transport(e.to_string())));
                    }
                    break;
                }
            };

            let mut session = reader_session.lock().await;
            if session.is_closed() {
                tracing::debug!("session closed locally, reader stopping");
                break;
            }
            let mut finished = false;
            for frame in frames.feed(&buf[..n]) {
                if session.is_closed() {
                    finished = true;
                    break;
                }
                let result = frame.and_then(|text| session.dispatch(&text));
                if let Err(e) = result {
                    tracing::warn!(error = %e, "dropped engine message");
                    let fatal = e.is_fatal();
                    let _ = events_tx.send(SessionEvent::Error(e));
                    if fatal {
                        finished = true;
                        break;
                    }
                }
                if session.is_finished() || session.is_closed() {
                    finished = true;
                    break;
                }
            }
            if finished {
                break;
            }
        }
        reader_session.lock().await.close();
    });

    (
        SessionHandle::new(session, options.command_timeout)
            .with_continuation_deadline(options.continuation_timeout),
        events_rx,
    )
}

/// Accepts engine connections.
#[derive(Debug)]
pub struct Listener {
    inner: TcpListener,
    options: ConnectOptions,
}

impl Listener {
    /// Bind to `addr`.
    pub async fn bind(addr: impl ToSocketAddrs, options: ConnectOptions) -> Result<Self, DbgpError> {
        let inner = TcpListener::bind(addr).await?;
        tracing::info!(addr = ?inner.local_addr().ok(), "listening for debugger engines");
        Ok(Self { inner, options })
    }

    /// Address actually bound, useful after binding port 0.
    pub fn local_addr(&self) -> Result<SocketAddr, DbgpError> {
        Ok(self.inner.local_addr()?)
    }

    /// Wait for the next engine and start a session on it.
    pub async fn accept(
        &self,
    ) -> Result<(SessionHandle, mpsc::UnboundedReceiver<SessionEvent>, SocketAddr), DbgpError> {
        let (stream, peer) = self.inner.accept().await?;
        tracing::info!(%peer, "engine connected");
        stream.set_nodelay(true)?;
        let (handle, events) = connect(stream, self.options.clone());
        Ok((handle, events, peer))
    }
}
