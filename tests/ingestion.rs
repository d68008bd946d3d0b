use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use pretty_assertions::assert_eq;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::codec::{Framed, LinesCodec};
use tokio_util::sync::CancellationToken;

use vitalstream::config::{ClientConfig, ServerConfig};
use vitalstream::ingest::{ConnectionEvent, PeerRegistry};
use vitalstream::{ConnectionError, IngestClient, IngestServer, MeasurementStore, VitalKind};

type Line = Framed<TcpStream, LinesCodec>;

struct TestServer {
    addr: String,
    store: Arc<MeasurementStore>,
    peers: Arc<PeerRegistry>,
    shutdown: CancellationToken,
    handle: JoinHandle<Result<(), ConnectionError>>,
}

impl TestServer {
    async fn start() -> Self {
        let config = ServerConfig {
            port: 0,
            max_line_length: 128,
            ..ServerConfig::default()
        };
        let store = Arc::new(MeasurementStore::new());
        let server = IngestServer::bind(&config, Arc::clone(&store)).await.unwrap();
        let addr = server.local_addr().unwrap().to_string();
        let peers = server.peers();
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(server.run(shutdown.clone()));

        TestServer {
            addr,
            store,
            peers,
            shutdown,
            handle,
        }
    }

    async fn raw_peer(&self) -> Line {
        let before = self.peers.len();
        let stream = TcpStream::connect(&self.addr).await.unwrap();
        self.wait_for_peers(before + 1).await;
        Framed::new(stream, LinesCodec::new())
    }

    async fn wait_for_peers(&self, count: usize) {
        timeout(Duration::from_secs(5), async {
            while self.peers.len() != count {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("peers never registered");
    }

    async fn wait_for_records(&self, count: usize) {
        wait_for_len(&self.store, count).await;
    }

    async fn stop(self) {
        self.shutdown.cancel();
        timeout(Duration::from_secs(5), self.handle)
            .await
            .expect("server did not stop")
            .unwrap()
            .unwrap();
    }
}

async fn wait_for_len(store: &MeasurementStore, count: usize) {
    timeout(Duration::from_secs(5), async {
        while store.len() < count {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("records never arrived");
}

async fn recv_line(peer: &mut Line) -> Option<String> {
    match timeout(Duration::from_millis(300), peer.next()).await {
        Ok(Some(Ok(line))) => Some(line),
        _ => None,
    }
}

fn client_config() -> ClientConfig {
    ClientConfig {
        max_reconnect_attempts: 3,
        initial_backoff_ms: 10,
        max_backoff_ms: 50,
        ..ClientConfig::default()
    }
}

#[tokio::test]
async fn test_server_stores_received_messages() {
    let server = TestServer::start().await;
    let mut peer = server.raw_peer().await;

    peer.send("7,1000,SystolicPressure,120").await.unwrap();
    peer.send("7,2000,Saturation,95%").await.unwrap();
    server.wait_for_records(2).await;

    let records = server.store.query(7, 0, 5000);
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].kind(), &VitalKind::SystolicPressure);
    assert_eq!(records[1].value(), 95.0);

    server.stop().await;
}

#[tokio::test]
async fn test_broadcast_reaches_others_but_not_sender() {
    let server = TestServer::start().await;
    let mut a = server.raw_peer().await;
    let mut b = server.raw_peer().await;
    let mut c = server.raw_peer().await;

    a.send("1,1000,HeartRate,80").await.unwrap();

    assert_eq!(recv_line(&mut b).await.as_deref(), Some("1,1000,HeartRate,80"));
    assert_eq!(recv_line(&mut c).await.as_deref(), Some("1,1000,HeartRate,80"));
    assert_eq!(recv_line(&mut a).await, None);

    server.stop().await;
}

#[tokio::test]
async fn test_duplicates_are_rebroadcast_but_stored_once() {
    let server = TestServer::start().await;
    let mut a = server.raw_peer().await;
    let mut b = server.raw_peer().await;

    a.send("1,1000,HeartRate,80").await.unwrap();
    a.send("1,1000,HeartRate,80").await.unwrap();

    assert_eq!(recv_line(&mut b).await.as_deref(), Some("1,1000,HeartRate,80"));
    assert_eq!(recv_line(&mut b).await.as_deref(), Some("1,1000,HeartRate,80"));
    assert_eq!(server.store.len(), 1);

    server.stop().await;
}

#[tokio::test]
async fn test_malformed_message_dropped_connection_kept() {
    let server = TestServer::start().await;
    let mut a = server.raw_peer().await;
    let mut b = server.raw_peer().await;

    a.send("this is not a measurement").await.unwrap();
    a.send("1,1000,HeartRate").await.unwrap();
    a.send("x".repeat(512)).await.unwrap();
    a.send("2,3000,DiastolicPressure,70").await.unwrap();

    // only the valid message is relayed
    assert_eq!(recv_line(&mut b).await.as_deref(), Some("2,3000,DiastolicPressure,70"));
    server.wait_for_records(1).await;
    assert_eq!(server.store.len(), 1);
    assert_eq!(server.peers.len(), 2);

    server.stop().await;
}

#[tokio::test]
async fn test_invalid_utf8_dropped_connection_kept() {
    let server = TestServer::start().await;
    let mut a = server.raw_peer().await;
    let mut b = server.raw_peer().await;

    // one write, so the valid line is already buffered behind the bad one
    a.get_mut()
        .write_all(b"1,1000,Heart\xff\xfeRate,80\n2,3000,DiastolicPressure,70\n")
        .await
        .unwrap();

    assert_eq!(recv_line(&mut b).await.as_deref(), Some("2,3000,DiastolicPressure,70"));
    server.wait_for_records(1).await;
    assert_eq!(server.store.len(), 1);
    assert_eq!(server.peers.len(), 2);

    a.send("2,4000,DiastolicPressure,72").await.unwrap();
    assert_eq!(recv_line(&mut b).await.as_deref(), Some("2,4000,DiastolicPressure,72"));

    server.stop().await;
}

#[tokio::test]
async fn test_disconnected_peer_is_unregistered() {
    let server = TestServer::start().await;
    let a = server.raw_peer().await;
    let mut b = server.raw_peer().await;

    drop(a);
    server.wait_for_peers(1).await;

    b.send("4,1000,HeartRate,66").await.unwrap();
    server.wait_for_records(1).await;

    server.stop().await;
}

#[tokio::test]
async fn test_client_stores_broadcasts_from_server() {
    let server = TestServer::start().await;
    let client_store = Arc::new(MeasurementStore::new());
    let client = IngestClient::connect(server.addr.clone(), Arc::clone(&client_store), &client_config())
        .await
        .unwrap();
    server.wait_for_peers(1).await;

    let mut producer = server.raw_peer().await;
    producer.send("9,1000,Saturation,91").await.unwrap();
    producer.send("9,2000,Saturation,90").await.unwrap();

    wait_for_len(&client_store, 2).await;
    let readings = client_store.query_kind(9, &VitalKind::Saturation, 0, 5000);
    let values: Vec<f64> = readings.iter().map(|m| m.value()).collect();
    assert_eq!(values, vec![91.0, 90.0]);

    client.shutdown().await;
    server.stop().await;
}

#[tokio::test]
async fn test_client_messages_reach_server_and_peers() {
    let server = TestServer::start().await;
    let mut listener = server.raw_peer().await;
    let client = IngestClient::connect(server.addr.clone(), Arc::new(MeasurementStore::new()), &client_config())
        .await
        .unwrap();
    server.wait_for_peers(2).await;

    client.send("5,1000,HeartRate,120").await.unwrap();

    assert_eq!(recv_line(&mut listener).await.as_deref(), Some("5,1000,HeartRate,120"));
    server.wait_for_records(1).await;

    client.shutdown().await;
    server.stop().await;
}

#[tokio::test]
async fn test_client_reports_server_shutdown() {
    let server = TestServer::start().await;
    let client = IngestClient::connect(server.addr.clone(), Arc::new(MeasurementStore::new()), &client_config())
        .await
        .unwrap();
    let mut events = client.subscribe();
    server.wait_for_peers(1).await;

    server.stop().await;

    let mut saw_closed = false;
    let failed = timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(ConnectionEvent::Closed { .. }) => saw_closed = true,
                Ok(ConnectionEvent::ReconnectFailed { attempts }) => return attempts,
                Ok(_) => {}
                Err(e) => panic!("event stream ended: {e}"),
            }
        }
    })
    .await
    .expect("client never gave up");

    assert!(saw_closed);
    assert_eq!(failed, 3);
}

#[tokio::test]
async fn test_server_shutdown_closes_peers() {
    let server = TestServer::start().await;
    let mut peer = server.raw_peer().await;

    server.stop().await;

    let end = timeout(Duration::from_secs(5), peer.next()).await.unwrap();
    assert!(end.is_none() || matches!(end, Some(Err(_))));
}
