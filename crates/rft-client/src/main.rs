//! rft-client: upload and download files over the reliable UDP protocol

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use rft_protocol::filestore::{ChunkReader, ChunkWriter};
use rft_protocol::packet::{Operation, RecoveryMode};
use rft_protocol::Connection;
use tracing::info;

#[derive(Parser)]
#[command(name = "rft-client")]
#[command(about = "Upload or download a file from an rft-server")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a local file to the server
    Upload {
        /// Verbose logging (debug level)
        #[arg(short = 'v', long, conflicts_with = "quiet")]
        verbose: bool,

        /// Quiet logging (warnings only)
        #[arg(short = 'q', long, conflicts_with = "verbose")]
        quiet: bool,

        /// Server address
        #[arg(short = 'H', long = "host", default_value = "127.0.0.1")]
        host: IpAddr,

        /// Server port
        #[arg(short = 'p', long, default_value_t = 65432, value_parser = clap::value_parser!(u16).range(1..=65535))]
        port: u16,

        /// Path to the local file to upload
        #[arg(short = 's', long = "filepath")]
        filepath: PathBuf,

        /// Name the file should be stored as on the server
        #[arg(short = 'n', long = "filename")]
        filename: String,

        /// Recovery mode
        #[arg(short = 'r', long = "protocol", default_value = "SW")]
        recovery: RecoveryArg,
    },

    /// Fetch a remote file from the server
    Download {
        /// Verbose logging (debug level)
        #[arg(short = 'v', long, conflicts_with = "quiet")]
        verbose: bool,

        /// Quiet logging (warnings only)
        #[arg(short = 'q', long, conflicts_with = "verbose")]
        quiet: bool,

        /// Server address
        #[arg(short = 'H', long = "host", default_value = "127.0.0.1")]
        host: IpAddr,

        /// Server port
        #[arg(short = 'p', long, default_value_t = 65432, value_parser = clap::value_parser!(u16).range(1..=65535))]
        port: u16,

        /// Directory the downloaded file is written into
        #[arg(short = 'd', long = "dst", default_value = ".")]
        dstpath: PathBuf,

        /// Name of the file to request from the server
        #[arg(short = 'n', long = "filename")]
        filename: String,

        /// Recovery mode
        #[arg(short = 'r', long = "protocol", default_value = "SW")]
        recovery: RecoveryArg,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum RecoveryArg {
    /// Stop-and-wait
    #[value(name = "SW")]
    Sw,
    /// Selective repeat
    #[value(name = "SR")]
    Sr,
}

impl From<RecoveryArg> for RecoveryMode {
    fn from(value: RecoveryArg) -> Self {
        match value {
            RecoveryArg::Sw => RecoveryMode::StopAndWait,
            RecoveryArg::Sr => RecoveryMode::SelectiveRepeat,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            e.print().ok();
            std::process::exit(2);
        }
    };

    let result = match cli.command {
        Commands::Upload {
            verbose,
            quiet,
            host,
            port,
            filepath,
            filename,
            recovery,
        } => {
            setup_logging(verbose, quiet);
            run_upload(host, port, filepath, filename, recovery.into()).await
        }
        Commands::Download {
            verbose,
            quiet,
            host,
            port,
            dstpath,
            filename,
            recovery,
        } => {
            setup_logging(verbose, quiet);
            run_download(host, port, dstpath, filename, recovery.into()).await
        }
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }

    Ok(())
}

async fn run_upload(
    host: IpAddr,
    port: u16,
    filepath: PathBuf,
    filename: String,
    mode: RecoveryMode,
) -> Result<()> {
    let mut reader = ChunkReader::open(&filepath)
        .await
        .with_context(|| format!("cannot open {filepath:?} for upload"))?;

    let server_addr = SocketAddr::new(host, port);
    let local_addr = SocketAddr::new(any_addr_for(host), 0);

    let mut conn = Connection::connect(local_addr, server_addr, Operation::Upload, mode, &filename)
        .await
        .context("handshake failed")?;

    info!(peer = %conn.peer_addr(), "uploading {}", filename);
    conn.send_file(&mut reader).await.context("upload failed")?;
    conn.close().await;

    println!("Uploaded {filename} to {server_addr}");
    Ok(())
}

async fn run_download(
    host: IpAddr,
    port: u16,
    dstpath: PathBuf,
    filename: String,
    mode: RecoveryMode,
) -> Result<()> {
    std::fs::create_dir_all(&dstpath)
        .with_context(|| format!("cannot create destination directory {dstpath:?}"))?;
    let out_path = dstpath.join(&filename);

    let server_addr = SocketAddr::new(host, port);
    let local_addr = SocketAddr::new(any_addr_for(host), 0);

    let mut conn =
        Connection::connect(local_addr, server_addr, Operation::Download, mode, &filename)
            .await
            .context("handshake failed")?;

    let mut writer = ChunkWriter::create(&out_path)
        .await
        .with_context(|| format!("cannot create {out_path:?}"))?;

    info!(peer = %conn.peer_addr(), "downloading {}", filename);
    conn.recv_file(&mut writer).await.context("download failed")?;
    conn.close().await;

    println!("Downloaded {filename} to {out_path:?}");
    Ok(())
}

fn any_addr_for(host: IpAddr) -> IpAddr {
    match host {
        IpAddr::V4(_) => IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED),
        IpAddr::V6(_) => IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED),
    }
}

fn setup_logging(verbose: bool, quiet: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let default_level = if verbose {
        "debug"
    } else if quiet {
        "warn"
    } else {
        "info"
    };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .init();
}
