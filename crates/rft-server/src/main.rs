//! rft-server: the listening side of the reliable file-transfer protocol
//!
//! Accepts connections on a well-known port and hands each one to its own
//! ephemeral-port endpoint, running concurrently with no shared state.

use std::net::IpAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

mod listener;

/// Start the reliable file-transfer server
#[derive(Parser)]
#[command(name = "start-server")]
#[command(about = "Serve file uploads and downloads over the reliable UDP protocol")]
#[command(version)]
struct Cli {
    /// Verbose logging (debug level)
    #[arg(short = 'v', long, conflicts_with = "quiet")]
    verbose: bool,

    /// Quiet logging (warnings only)
    #[arg(short = 'q', long, conflicts_with = "verbose")]
    quiet: bool,

    /// Address to listen on
    #[arg(short = 'H', long = "host", default_value = "127.0.0.1")]
    host: IpAddr,

    /// Port to listen on
    #[arg(short = 'p', long, default_value_t = 65432, value_parser = clap::value_parser!(u16).range(1..=65535))]
    port: u16,

    /// Directory files are uploaded into and downloaded from
    #[arg(short = 's', long = "dirpath", default_value = ".")]
    storage_dir: PathBuf,
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

    setup_logging(cli.verbose, cli.quiet);

    std::fs::create_dir_all(&cli.storage_dir)
        .with_context(|| format!("failed to create storage directory {:?}", cli.storage_dir))?;

    let bind_addr = std::net::SocketAddr::new(cli.host, cli.port);
    info!(%bind_addr, dir = ?cli.storage_dir, "starting rft-server");

    if let Err(e) = listener::run(bind_addr, cli.storage_dir).await {
        tracing::error!(error = %e, "server exited with error");
        std::process::exit(1);
    }

    Ok(())
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol_well_known_port() {
        let cli = Cli::try_parse_from(["start-server"]).unwrap();
        assert_eq!(cli.host, IpAddr::from([127, 0, 0, 1]));
        assert_eq!(cli.port, 65432);
        assert_eq!(cli.storage_dir, PathBuf::from("."));
        assert!(!cli.verbose);
        assert!(!cli.quiet);
    }

    #[test]
    fn verbose_and_quiet_are_mutually_exclusive() {
        let err = Cli::try_parse_from(["start-server", "-v", "-q"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn rejects_non_numeric_port() {
        assert!(Cli::try_parse_from(["start-server", "-p", "not-a-port"]).is_err());
    }

    #[test]
    fn rejects_port_zero() {
        assert!(Cli::try_parse_from(["start-server", "-p", "0"]).is_err());
    }

    #[test]
    fn accepts_overridden_host_port_and_storage_dir() {
        let cli =
            Cli::try_parse_from(["start-server", "-H", "0.0.0.0", "-p", "9000", "-s", "/tmp/rft"])
                .unwrap();
        assert_eq!(cli.host, IpAddr::from([0, 0, 0, 0]));
        assert_eq!(cli.port, 9000);
        assert_eq!(cli.storage_dir, PathBuf::from("/tmp/rft"));
    }
}
