use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::codec::{Framed, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::codec::{WireCodec, WireFrame};
use super::ingest_line;
use crate::config::ClientConfig;
use crate::error::ConnectionError;
use crate::storage::MeasurementStore;

/// Connection lifecycle, as observed by subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Opened { addr: String },
    Closed { reason: String },
    Error { message: String },
    ReconnectFailed { attempts: u32 },
}

/// Bounded exponential backoff for (re)connecting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of connection attempts
    pub max_attempts: u32,
    /// Delay after the first failed attempt
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Delay after failed attempt number `attempt` (1-based): doubles each
    /// time, capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::from(&ClientConfig::default())
    }
}

impl From<&ClientConfig> for RetryPolicy {
    fn from(config: &ClientConfig) -> Self {
        RetryPolicy {
            max_attempts: config.max_reconnect_attempts.max(1),
            initial_delay: Duration::from_millis(config.initial_backoff_ms),
            max_delay: Duration::from_millis(config.max_backoff_ms),
        }
    }
}

/// One outbound connection to an ingestion server.
///
/// Messages received from the server are parsed and stored like the server
/// does for its peers. When the connection drops, a background task
/// reconnects with [`RetryPolicy`]; messages sent meanwhile stay queued.
pub struct IngestClient {
    addr: String,
    outbound: mpsc::Sender<String>,
    events: broadcast::Sender<ConnectionEvent>,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl IngestClient {
    /// Connects (retrying per the configured policy) and starts the
    /// background session. Returns once the first connection is open.
    pub async fn connect(
        addr: impl Into<String>,
        store: Arc<MeasurementStore>,
        config: &ClientConfig,
    ) -> Result<Self, ConnectionError> {
        let addr = addr.into();
        let policy = RetryPolicy::from(config);
        let shutdown = CancellationToken::new();

        let stream = connect_with_retry(&addr, &policy, &shutdown).await?;
        info!(%addr, "connected to ingestion server");

        let (outbound, queued) = mpsc::channel(config.queue_capacity);
        let (events, _) = broadcast::channel(64);

        let session = Session {
            addr: addr.clone(),
            store,
            policy,
            max_line_length: config.max_line_length,
            send_timeout: config.send_timeout(),
            events: events.clone(),
            shutdown: shutdown.clone(),
        };
        let task = tokio::spawn(session.run(stream, queued));

        Ok(IngestClient {
            addr,
            outbound,
            events,
            shutdown,
            task,
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Lifecycle events from now on (the initial `Opened` has already happened).
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    /// Queues a wire message for the server.
    pub async fn send(&self, message: impl Into<String>) -> Result<(), ConnectionError> {
        self.outbound
            .send(message.into())
            .await
            .map_err(|_| ConnectionError::Closed)
    }

    /// False once the session gave up reconnecting or was shut down.
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    pub async fn shutdown(self) {
        self.shutdown.cancel();
        if let Err(e) = self.task.await {
            error!(addr = %self.addr, error = %e, "client session task failed");
        }
    }
}

async fn connect_with_retry(
    addr: &str,
    policy: &RetryPolicy,
    shutdown: &CancellationToken,
) -> Result<TcpStream, ConnectionError> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(source) if attempt >= policy.max_attempts => {
                return Err(ConnectionError::Connect {
                    addr: addr.to_string(),
                    attempts: attempt,
                    source,
                });
            }
            Err(e) => {
                let delay = policy.delay_for(attempt);
                warn!(%addr, attempt, ?delay, error = %e, "connection attempt failed, retrying");
                tokio::select! {
                    _ = shutdown.cancelled() => return Err(ConnectionError::Closed),
                    _ = sleep(delay) => {}
                }
            }
        }
    }
}

struct Session {
    addr: String,
    store: Arc<MeasurementStore>,
    policy: RetryPolicy,
    max_line_length: usize,
    send_timeout: Duration,
    events: broadcast::Sender<ConnectionEvent>,
    shutdown: CancellationToken,
}

enum SessionEnd {
    Shutdown,
    Disconnected(String),
}

enum Step {
    Shutdown,
    Outbound(Option<String>),
    Inbound(Option<Result<WireFrame, LinesCodecError>>),
}

impl Session {
    async fn run(self, mut stream: TcpStream, mut queued: mpsc::Receiver<String>) {
        loop {
            match self.drive(stream, &mut queued).await {
                SessionEnd::Shutdown => break,
                SessionEnd::Disconnected(reason) => {
                    info!(addr = %self.addr, %reason, "disconnected from ingestion server");
                    self.emit(ConnectionEvent::Closed { reason });
                }
            }

            info!(addr = %self.addr, "attempting to reconnect");
            match connect_with_retry(&self.addr, &self.policy, &self.shutdown).await {
                Ok(next) => {
                    info!(addr = %self.addr, "reconnected to ingestion server");
                    self.emit(ConnectionEvent::Opened {
                        addr: self.addr.clone(),
                    });
                    stream = next;
                }
                Err(ConnectionError::Closed) => break,
                Err(e) => {
                    error!(error = %e, "giving up on reconnect");
                    self.emit(ConnectionEvent::ReconnectFailed {
                        attempts: self.policy.max_attempts,
                    });
                    break;
                }
            }
        }

        info!(addr = %self.addr, "ingestion client stopped");
    }

    async fn drive(&self, stream: TcpStream, queued: &mut mpsc::Receiver<String>) -> SessionEnd {
        let mut framed = Framed::new(stream, WireCodec::new(self.max_line_length));

        loop {
            let step = tokio::select! {
                _ = self.shutdown.cancelled() => Step::Shutdown,
                message = queued.recv() => Step::Outbound(message),
                inbound = framed.next() => Step::Inbound(inbound),
            };

            match step {
                // a dropped client handle ends the session as well
                Step::Shutdown | Step::Outbound(None) => {
                    if let Err(e) = SinkExt::<String>::close(&mut framed).await {
                        debug!(addr = %self.addr, error = %e, "error closing connection");
                    }
                    return SessionEnd::Shutdown;
                }
                Step::Outbound(Some(message)) => {
                    match timeout(self.send_timeout, framed.send(message)).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            self.emit(ConnectionEvent::Error {
                                message: e.to_string(),
                            });
                            return SessionEnd::Disconnected(e.to_string());
                        }
                        Err(_) => {
                            return SessionEnd::Disconnected("send timed out".to_string());
                        }
                    }
                }
                Step::Inbound(Some(Ok(WireFrame::Line(line)))) => self.handle_line(&line),
                Step::Inbound(Some(Ok(WireFrame::Rejected(reason)))) => {
                    warn!(addr = %self.addr, max = self.max_line_length, error = %reason, "dropping undecodable message");
                }
                Step::Inbound(Some(Err(e))) => {
                    let err = ConnectionError::from(e);
                    self.emit(ConnectionEvent::Error {
                        message: err.to_string(),
                    });
                    return SessionEnd::Disconnected(err.to_string());
                }
                Step::Inbound(None) => {
                    return SessionEnd::Disconnected("closed by server".to_string());
                }
            }
        }
    }

    fn handle_line(&self, line: &str) {
        if line.trim().is_empty() {
            return;
        }
        match ingest_line(&self.store, line) {
            Ok((measurement, stored)) => debug!(
                patient_id = measurement.patient_id(),
                kind = %measurement.kind(),
                stored,
                "broadcast message stored"
            ),
            Err(e) => warn!(raw = %line, error = %e, "dropping malformed message"),
        }
    }

    fn emit(&self, event: ConnectionEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }
}
