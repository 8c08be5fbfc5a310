//! End-to-end handshake and file transfer over real loopback sockets.
//!
//! Mirrors the per-connection listener pattern used by the server binary:
//! a fixed listening endpoint only ever sees the initial SYN, then a fresh
//! ephemeral endpoint carries the rest of the connection.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use rft_protocol::filestore::{ChunkReader, ChunkWriter};
use rft_protocol::packet::{Operation, PacketHeader, RecoveryMode, SYN};
use rft_protocol::{Connection, Endpoint};

fn loopback(port: u16) -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
}

fn temp_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("rft-protocol-test-{}-{name}", std::process::id()))
}

async fn run_transfer(mode: RecoveryMode, payload: &[u8]) {
    let listener = Endpoint::bind(loopback(0)).await.unwrap();
    let listener_addr = listener.local_addr().unwrap();

    let src_path = temp_path("src.bin");
    let dst_path = temp_path("dst.bin");
    tokio::fs::write(&src_path, payload).await.unwrap();

    let server = tokio::spawn(async move {
        let (buf, client_addr) = listener.recv_any().await.unwrap();
        let (header, _) = PacketHeader::parse(&buf).unwrap();
        assert!(header.has(SYN));

        let mut conn = Connection::accept(loopback(0), client_addr, header.seq)
            .await
            .unwrap();
        assert_eq!(conn.operation(), Operation::Upload);

        let mut writer = ChunkWriter::create(&dst_path).await.unwrap();
        conn.recv_file(&mut writer).await.unwrap();
        conn.close().await;
        dst_path
    });

    let mut reader = ChunkReader::open(&src_path).await.unwrap();
    let mut client = Connection::connect(
        loopback(0),
        listener_addr,
        Operation::Upload,
        mode,
        "payload.bin",
    )
    .await
    .unwrap();
    client.send_file(&mut reader).await.unwrap();
    client.close().await;

    let dst_path = server.await.unwrap();
    let written = tokio::fs::read(&dst_path).await.unwrap();
    assert_eq!(written, payload);

    let _ = tokio::fs::remove_file(&src_path).await;
    let _ = tokio::fs::remove_file(&dst_path).await;
}

#[tokio::test]
async fn stop_and_wait_delivers_small_payload_in_order() {
    run_transfer(RecoveryMode::StopAndWait, b"hello, reliable world").await;
}

#[tokio::test]
async fn selective_repeat_delivers_multi_segment_payload() {
    // Large enough to span several PAYLOAD_SIZE segments and exercise the window.
    let payload: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
    run_transfer(RecoveryMode::SelectiveRepeat, &payload).await;
}

#[tokio::test]
async fn stop_and_wait_handles_multi_segment_payload() {
    let payload: Vec<u8> = (0..4096u32).map(|i| (i % 233) as u8).collect();
    run_transfer(RecoveryMode::StopAndWait, &payload).await;
}
