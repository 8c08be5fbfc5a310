//! Accept loop: binds the well-known port, and for every SYN spawns a fresh
//! ephemeral-port connection running in its own task.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::Result;
use rft_protocol::filestore::{sanitize_file_name, ChunkReader, ChunkWriter};
use rft_protocol::packet::{Operation, PacketHeader, ACK, SYN};
use rft_protocol::{Connection, Endpoint};
use tracing::{info, warn};

/// Run the listening loop forever. The listening socket is only ever touched
/// by SYNs; it never demultiplexes established connections.
pub async fn run(bind_addr: SocketAddr, storage_dir: PathBuf) -> Result<()> {
    let listener = Endpoint::bind(bind_addr).await?;

    loop {
        let (buf, client_addr) = listener.recv_any().await?;

        let (header, _) = match PacketHeader::parse(&buf) {
            Ok(v) => v,
            Err(e) => {
                warn!(peer = %client_addr, error = %e, "dropping malformed datagram on listener");
                continue;
            }
        };

        if !header.has(SYN) || header.has(ACK) {
            // The listening socket only ever sees SYNs; anything else is stray traffic.
            continue;
        }

        let client_isn = header.seq;
        let local_ip = bind_addr.ip();
        let storage_dir = storage_dir.clone();

        tokio::spawn(async move {
            if let Err(e) = handle_connection(local_ip, client_addr, client_isn, storage_dir).await
            {
                warn!(peer = %client_addr, error = %e, "connection failed");
            }
        });
    }
}

async fn handle_connection(
    local_ip: std::net::IpAddr,
    client_addr: SocketAddr,
    client_isn: u32,
    storage_dir: PathBuf,
) -> Result<()> {
    let ephemeral = SocketAddr::new(local_ip, 0);
    let mut conn = Connection::accept(ephemeral, client_addr, client_isn).await?;

    info!(
        peer = %conn.peer_addr(),
        local = ?conn.local_addr(),
        file = conn.filename(),
        "connection established"
    );

    let file_name = sanitize_file_name(conn.filename())?;
    let path = resolve_path(&storage_dir, file_name);

    let result = match conn.operation() {
        Operation::Upload => {
            // Client is sending us the file.
            let mut writer = ChunkWriter::create(&path).await?;
            conn.recv_file(&mut writer).await
        }
        Operation::Download => {
            // Client wants to receive the file from us.
            let mut reader = ChunkReader::open(&path).await?;
            conn.send_file(&mut reader).await
        }
    };

    conn.close().await;

    result.map_err(Into::into)
}

fn resolve_path(storage_dir: &Path, file_name: &str) -> PathBuf {
    storage_dir.join(file_name)
}
