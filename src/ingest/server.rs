use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::codec::{WireCodec, WireFrame};
use super::ingest_line;
use crate::config::ServerConfig;
use crate::error::ConnectionError;
use crate::storage::MeasurementStore;

pub type PeerId = u64;

#[derive(Debug)]
struct Peer {
    addr: SocketAddr,
    outbound: mpsc::Sender<String>,
}

/// Outcome of one fan-out.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub dropped: usize,
}

/// Connected peers and their outbound queues.
///
/// Each peer owns a bounded queue drained by its own writer task, so a slow
/// or broken peer only ever loses its own messages.
#[derive(Debug, Default)]
pub struct PeerRegistry {
    next_id: AtomicU64,
    peers: RwLock<HashMap<PeerId, Peer>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        PeerRegistry::default()
    }

    /// Adds a peer and returns its id and the receiving end of its queue.
    pub fn register(&self, addr: SocketAddr, capacity: usize) -> (PeerId, mpsc::Receiver<String>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (outbound, rx) = mpsc::channel(capacity);
        self.peers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Peer { addr, outbound });
        (id, rx)
    }

    /// Removes a peer. Dropping its sender lets the writer drain and finish.
    pub fn unregister(&self, id: PeerId) -> bool {
        self.peers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.peers.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Queues `message` for every peer except `from`. Never blocks: a full or
    /// closed queue is reported and skipped.
    pub fn broadcast(&self, from: PeerId, message: &str) -> BroadcastReport {
        let peers = self.peers.read().unwrap_or_else(PoisonError::into_inner);
        let mut report = BroadcastReport::default();

        for (_, peer) in peers.iter().filter(|(id, _)| **id != from) {
            match peer.outbound.try_send(message.to_string()) {
                Ok(()) => report.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(peer = %peer.addr, "outbound queue full, broadcast dropped for peer");
                    report.dropped += 1;
                }
                Err(TrySendError::Closed(_)) => {
                    warn!(peer = %peer.addr, "peer writer closed, broadcast dropped for peer");
                    report.dropped += 1;
                }
            }
        }

        report
    }
}

/// Line-oriented ingestion endpoint.
///
/// Every well-formed message is stored and then rebroadcast verbatim to all
/// other connected peers. Malformed messages are logged and dropped; the
/// connection stays open.
pub struct IngestServer {
    listener: TcpListener,
    store: Arc<MeasurementStore>,
    peers: Arc<PeerRegistry>,
    config: ServerConfig,
}

impl IngestServer {
    pub async fn bind(config: &ServerConfig, store: Arc<MeasurementStore>) -> Result<Self, ConnectionError> {
        let addr = config.address();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ConnectionError::Bind { addr, source })?;

        Ok(IngestServer {
            listener,
            store,
            peers: Arc::new(PeerRegistry::new()),
            config: config.clone(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ConnectionError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn peers(&self) -> Arc<PeerRegistry> {
        Arc::clone(&self.peers)
    }

    /// Accepts connections until `shutdown` is cancelled, then stops
    /// accepting, lets every connection flush its queue and waits for them.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), ConnectionError> {
        let local = self.listener.local_addr()?;
        info!(%local, "ingestion server listening");

        let mut connections = JoinSet::new();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        connections.spawn(serve_connection(
                            stream,
                            addr,
                            Arc::clone(&self.store),
                            Arc::clone(&self.peers),
                            self.config.clone(),
                            shutdown.clone(),
                        ));
                    }
                    Err(e) => {
                        warn!(error = %e, "failed to accept connection");
                        if !pause_after_accept_error(&shutdown).await {
                            break;
                        }
                    }
                },
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "connection task failed");
                    }
                }
            }
        }

        drop(self.listener);
        info!(open = connections.len(), "ingestion server shutting down");
        while let Some(joined) = connections.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "connection task failed");
            }
        }
        info!("ingestion server stopped");
        Ok(())
    }
}

const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Backs off after a failed accept. Returns `false` if shutdown came first.
async fn pause_after_accept_error(shutdown: &CancellationToken) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => false,
        _ = tokio::time::sleep(ACCEPT_ERROR_BACKOFF) => true,
    }
}

async fn serve_connection(
    stream: TcpStream,
    addr: SocketAddr,
    store: Arc<MeasurementStore>,
    peers: Arc<PeerRegistry>,
    config: ServerConfig,
    shutdown: CancellationToken,
) {
    info!(%addr, "peer connected");

    let (peer_id, outbound) = peers.register(addr, config.peer_queue_capacity);
    let framed = Framed::new(stream, WireCodec::new(config.max_line_length));
    let (sink, mut lines) = framed.split();
    let writer = tokio::spawn(write_outbound(sink, outbound, addr, config.send_timeout()));

    loop {
        let next = tokio::select! {
            _ = shutdown.cancelled() => break,
            next = lines.next() => next,
        };

        match next {
            Some(Ok(WireFrame::Line(line))) => handle_line(&store, &peers, peer_id, addr, &line),
            Some(Ok(WireFrame::Rejected(reason))) => {
                warn!(%addr, max = config.max_line_length, error = %reason, "dropping undecodable message");
            }
            Some(Err(e)) => {
                let err = ConnectionError::from(e);
                warn!(%addr, error = %err, "connection error");
                break;
            }
            None => break,
        }
    }

    peers.unregister(peer_id);
    if let Err(e) = writer.await {
        error!(%addr, error = %e, "peer writer task failed");
    }
    info!(%addr, "peer disconnected");
}

fn handle_line(store: &MeasurementStore, peers: &PeerRegistry, peer_id: PeerId, addr: SocketAddr, line: &str) {
    if line.trim().is_empty() {
        return;
    }

    match ingest_line(store, line) {
        Ok((measurement, stored)) => {
            let report = peers.broadcast(peer_id, line);
            debug!(
                %addr,
                patient_id = measurement.patient_id(),
                kind = %measurement.kind(),
                stored,
                delivered = report.delivered,
                dropped = report.dropped,
                "message ingested"
            );
        }
        Err(e) => warn!(%addr, raw = %line, error = %e, "dropping malformed message"),
    }
}

type LineSink = futures::stream::SplitSink<Framed<TcpStream, WireCodec>, String>;

/// Drains one peer's queue onto its socket until the queue closes or a
/// write fails or times out.
async fn write_outbound(
    mut sink: LineSink,
    mut outbound: mpsc::Receiver<String>,
    addr: SocketAddr,
    send_timeout: Duration,
) {
    while let Some(message) = outbound.recv().await {
        match timeout(send_timeout, sink.send(message)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(%addr, error = %e, "send to peer failed");
                break;
            }
            Err(_) => {
                let err = ConnectionError::Timeout { peer: addr };
                warn!(error = %err, "closing slow peer");
                break;
            }
        }
    }

    outbound.close();
    match timeout(send_timeout, sink.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(%addr, error = %e, "error closing peer socket"),
        Err(_) => debug!(%addr, "timed out closing peer socket"),
    }
}
