//! End-to-end pipeline tests over localhost
//!
//! Drives the real transfer path: producer staging on one directory,
//! shipping daemon over a real TCP socket, receiving server publishing into a
//! second directory, consumer dispatching into the database channel.

use noter::channel::{ChannelRegistry, DatabaseChannel, DEFAULT_CHANNEL};
use noter::consumer::{Consumer, ConsumerConfig};
use noter::envelope;
use noter::producer::Producer;
use noter::server::{Server, ServerConfig};
use noter::shipper::{Shipper, ShipperConfig};
use noter::staging::StagingStore;
use noter::wire::{self, StatusCode};
use rusqlite::Connection;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

async fn start_server(staging_dir: &std::path::Path) -> (std::net::SocketAddr, broadcast::Sender<()>) {
    let server = Server::bind(ServerConfig::new(staging_dir, "127.0.0.1:0"))
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    let (shutdown_tx, _) = broadcast::channel(1);
    tokio::spawn(server.run(shutdown_tx.subscribe()));
    (addr, shutdown_tx)
}

#[tokio::test]
async fn test_produce_ship_receive() {
    let client_dir = tempfile::tempdir().unwrap();
    let server_dir = tempfile::tempdir().unwrap();

    let client_store = StagingStore::open(client_dir.path()).unwrap();
    let producer = Producer::new(client_store.clone(), "db");
    assert!(producer.stage(&b"pipeline payload"[..]).await.unwrap());
    let identity = producer.identity().to_string();

    let (addr, _shutdown) = start_server(server_dir.path()).await;

    let mut shipper =
        Shipper::new(ShipperConfig::new(client_dir.path(), addr.to_string())).unwrap();
    shipper.heartbeat().await.unwrap();

    // Acked: gone locally, published remotely with identical bytes
    assert!(!client_store.final_path(&identity).exists());
    assert!(!client_store.sidecar_path(&identity).exists());

    let received = std::fs::read(server_dir.path().join(&identity)).unwrap();
    let (body, metadata) = envelope::decode(&received).unwrap();
    assert_eq!(body, b"pipeline payload");
    assert_eq!(metadata.get("ch").map(String::as_str), Some("db"));
}

#[tokio::test]
async fn test_multiple_notes_ship_over_one_connection() {
    let client_dir = tempfile::tempdir().unwrap();
    let server_dir = tempfile::tempdir().unwrap();

    let client_store = StagingStore::open(client_dir.path()).unwrap();
    let mut identities = Vec::new();
    for i in 0..3 {
        let producer = Producer::new(client_store.clone(), "email");
        let body = format!("note number {}", i);
        producer.stage(body.as_bytes()).await.unwrap();
        identities.push(producer.identity().to_string());
    }

    let (addr, _shutdown) = start_server(server_dir.path()).await;

    let mut shipper =
        Shipper::new(ShipperConfig::new(client_dir.path(), addr.to_string())).unwrap();
    shipper.heartbeat().await.unwrap();

    for identity in &identities {
        assert!(!client_store.final_path(identity).exists());
        assert!(server_dir.path().join(identity).exists());
    }
}

#[tokio::test]
async fn test_connection_drop_mid_batch_keeps_unacked_notes() {
    let client_dir = tempfile::tempdir().unwrap();

    let client_store = StagingStore::open(client_dir.path()).unwrap();
    for i in 0..5 {
        let producer = Producer::new(client_store.clone(), "db");
        let body = format!("note {}", i);
        producer.stage(body.as_bytes()).await.unwrap();
    }

    // A server that acknowledges exactly two exchanges, then drops the
    // connection without replying to the third.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        for exchange in 0..3 {
            let header = wire::read_frame_header(&mut socket).await.unwrap().unwrap();
            let mut sink = vec![0u8; header.size as usize];
            wire::read_exact_timed(&mut socket, &mut sink).await.unwrap();
            if exchange < 2 {
                wire::write_status(&mut socket, StatusCode::Ok).await.unwrap();
            }
        }
    });

    let mut shipper =
        Shipper::new(ShipperConfig::new(client_dir.path(), addr.to_string())).unwrap();
    shipper.heartbeat().await.unwrap();

    // Two acked notes deleted, the other three retained for the next run
    let remaining = std::fs::read_dir(client_dir.path())
        .unwrap()
        .filter(|e| {
            !e.as_ref()
                .unwrap()
                .file_name()
                .to_string_lossy()
                .ends_with(".md5")
        })
        .count();
    assert_eq!(remaining, 3);
}

#[tokio::test]
async fn test_received_note_dispatched_to_database() {
    let client_dir = tempfile::tempdir().unwrap();
    let server_dir = tempfile::tempdir().unwrap();
    let db_path = server_dir.path().join("notes.db");

    let client_store = StagingStore::open(client_dir.path()).unwrap();
    let producer = Producer::new(client_store, "db");
    producer.stage(&b"stored note"[..]).await.unwrap();
    let identity = producer.identity().to_string();

    let (addr, _shutdown) = start_server(server_dir.path()).await;

    let mut shipper =
        Shipper::new(ShipperConfig::new(client_dir.path(), addr.to_string())).unwrap();
    shipper.heartbeat().await.unwrap();

    let server_store = StagingStore::open(server_dir.path()).unwrap();
    let mut registry = ChannelRegistry::new();
    registry.register(Arc::new(
        DatabaseChannel::open(&db_path, server_store.transfer_dir()).unwrap(),
    ));
    registry.alias(DEFAULT_CHANNEL, "db").unwrap();

    let consumer = Consumer::new(ConsumerConfig::new(server_dir.path()), registry).unwrap();
    consumer.cycle().await.unwrap();

    // Dispatched and archived on the server side
    assert!(!server_dir.path().join(&identity).exists());
    assert!(server_dir.path().join("archive").join(&identity).exists());

    let conn = Connection::open(&db_path).unwrap();
    let blob: Vec<u8> = conn
        .query_row(
            "SELECT blob_content FROM note WHERE note_id = ?1",
            [&identity],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(blob, b"stored note");
}
