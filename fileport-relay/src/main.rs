// fileport relay: WebSocket broker between one host device and many clients,
// plus the host agent and a command-line client.

mod client;
mod config;
mod files;
mod host;
mod http;
mod server;
mod ws;

use std::path::{Path, PathBuf};
use std::time::{Duration, UNIX_EPOCH};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fileport_core::{FileEntry, DEFAULT_CHUNK_SIZE};

const DEFAULT_RELAY: &str = "ws://127.0.0.1:3000";

#[derive(Parser, Debug)]
#[command(name = "fileport-relay", version, about = "Relay files from one host to many clients")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the relay server (default)
    Serve {
        /// Override the configured port
        #[arg(long)]
        port: Option<u16>,
    },
    /// Register as the relay's host and serve a local directory
    Host {
        #[arg(long, default_value = DEFAULT_RELAY)]
        relay: String,
        /// Directory to serve
        #[arg(long, default_value = ".")]
        root: PathBuf,
        /// Bytes per chunk frame, before base64 (0 picks the default)
        #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
        chunk_size: usize,
    },
    /// List a directory on the host
    List {
        #[arg(long, default_value = DEFAULT_RELAY)]
        relay: String,
        #[arg(long)]
        path: Option<String>,
        #[arg(long, default_value_t = 30)]
        timeout_secs: u64,
        /// Print raw JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Download one file from the host
    Download {
        #[arg(long, default_value = DEFAULT_RELAY)]
        relay: String,
        #[arg(long)]
        path: String,
        /// Output file (default: the file's own name)
        #[arg(long)]
        out: Option<PathBuf>,
        #[arg(long, default_value_t = 30)]
        timeout_secs: u64,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    let cli = Cli::parse();
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(cli))
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command.unwrap_or(Commands::Serve { port: None }) {
        Commands::Serve { port } => {
            let mut cfg = config::load();
            if let Some(port) = port {
                cfg.port = port;
            }
            tokio::select! {
                result = server::run(cfg) => result,
                result = shutdown_signal() => {
                    log::info!("[Relay] Shutting down");
                    result
                }
            }
        }
        Commands::Host {
            relay,
            root,
            chunk_size,
        } => {
            tokio::select! {
                result = host::run(relay, root, chunk_size) => result,
                result = shutdown_signal() => result,
            }
        }
        Commands::List {
            relay,
            path,
            timeout_secs,
            json,
        } => {
            let files =
                client::list(&relay, path, Duration::from_secs(timeout_secs)).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&files)?);
            } else {
                print_table(&files);
            }
            Ok(())
        }
        Commands::Download {
            relay,
            path,
            out,
            timeout_secs,
        } => {
            let bytes =
                client::download(&relay, &path, Duration::from_secs(timeout_secs)).await?;
            let out = out.unwrap_or_else(|| default_output(&path));
            tokio::fs::write(&out, &bytes)
                .await
                .with_context(|| format!("write {}", out.display()))?;
            log::info!("[Client] Saved {} bytes to {}", bytes.len(), out.display());
            Ok(())
        }
    }
}

fn print_table(files: &[FileEntry]) {
    for f in files {
        let modified = UNIX_EPOCH + Duration::from_millis(f.last_modified);
        let age = modified.elapsed().map_or(0, |d| d.as_secs() / 86_400);
        println!("{:>12}  {:>5}d  {}", f.size, age, f.name);
    }
}

fn default_output(requested: &str) -> PathBuf {
    Path::new(requested)
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("download.bin"))
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_subcommand_means_serve() {
        let cli = Cli::try_parse_from(["fileport-relay"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn download_args() {
        let cli = Cli::try_parse_from([
            "fileport-relay",
            "download",
            "--path",
            "docs/a.txt",
            "--timeout-secs",
            "5",
        ])
        .unwrap();
        match cli.command {
            Some(Commands::Download {
                relay,
                path,
                out,
                timeout_secs,
            }) => {
                assert_eq!(relay, DEFAULT_RELAY);
                assert_eq!(path, "docs/a.txt");
                assert!(out.is_none());
                assert_eq!(timeout_secs, 5);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn output_defaults_to_file_name() {
        assert_eq!(default_output("docs/a.txt"), PathBuf::from("a.txt"));
        assert_eq!(default_output(""), PathBuf::from("download.bin"));
    }
}
