//! Canopy server binary
//!
//! Serves a virtual filesystem namespace over FTP and HTTP.
//!
//! ## Usage
//!
//! ```bash
//! # Serve a demo in-memory namespace
//! canopy-server
//!
//! # Mirror a directory tree, inlining tar archives
//! canopy-server /srv/files
//!
//! # Also mount a SQLite database as a subtree
//! canopy-server --db app.db /srv/files
//! ```

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use canopy_server::constants::{DEFAULT_BIND_ADDRESS, DEFAULT_FTP_PORT, DEFAULT_HTTP_PORT};
use canopy_server::{FtpServer, HttpServer};
use canopy_vfs::{Loader, MemoryNode, Node, SqliteProvider, TarHandler};

fn print_usage() {
    eprintln!(
        r#"canopy-server - FTP + HTTP server over a virtual filesystem

USAGE:
    canopy-server [OPTIONS] [ROOT]

ARGS:
    ROOT                          Directory to mirror into the namespace.
                                  Tar archives inside it are inlined as
                                  virtual directories. Without ROOT a small
                                  demo namespace is served.

OPTIONS:
    --ftp-port <PORT>             FTP control port (default: {ftp})
    --http-port <PORT>            HTTP port (default: {http})
    --db <FILE>                   Mount a SQLite database as a subtree
    --help, -h                    Show this help

EXAMPLES:
    canopy-server                             # demo namespace
    canopy-server /srv/files                  # serve a directory tree
    canopy-server --ftp-port 2121 /srv/files
    canopy-server --db app.db
"#,
        ftp = DEFAULT_FTP_PORT,
        http = DEFAULT_HTTP_PORT,
    );
}

struct Options {
    ftp_port: u16,
    http_port: u16,
    root: Option<PathBuf>,
    db: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let args: Vec<String> = env::args().collect();
    let mut options = Options {
        ftp_port: DEFAULT_FTP_PORT,
        http_port: DEFAULT_HTTP_PORT,
        root: None,
        db: None,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_usage();
                return ExitCode::SUCCESS;
            }
            "--ftp-port" | "--http-port" | "--db" => {
                let Some(value) = args.get(i + 1) else {
                    eprintln!("{} requires a value", args[i]);
                    return ExitCode::FAILURE;
                };
                match args[i].as_str() {
                    "--ftp-port" => match value.parse() {
                        Ok(port) => options.ftp_port = port,
                        Err(_) => {
                            eprintln!("Bad port: {value}");
                            return ExitCode::FAILURE;
                        }
                    },
                    "--http-port" => match value.parse() {
                        Ok(port) => options.http_port = port,
                        Err(_) => {
                            eprintln!("Bad port: {value}");
                            return ExitCode::FAILURE;
                        }
                    },
                    _ => options.db = Some(PathBuf::from(value)),
                }
                i += 2;
            }
            arg if !arg.starts_with('-') => {
                options.root = Some(PathBuf::from(arg));
                i += 1;
            }
            arg => {
                eprintln!("Unknown option: {arg}");
                print_usage();
                return ExitCode::FAILURE;
            }
        }
    }

    match run(options).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("Server error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(options: Options) -> anyhow::Result<()> {
    let root = match &options.root {
        Some(dir) => {
            tracing::info!(dir = %dir.display(), "loading namespace");
            Loader::new()
                .handler(Arc::new(TarHandler))
                .load(dir)
                .await?
        }
        None => demo_root(),
    };
    if let Some(db) = &options.db {
        root.add(SqliteProvider::load(db)?);
    }

    let ftp = FtpServer::bind((DEFAULT_BIND_ADDRESS, options.ftp_port), root.clone()).await?;
    let http = HttpServer::bind((DEFAULT_BIND_ADDRESS, options.http_port), root).await?;

    // Shutdown is best-effort: in-flight connections are not drained.
    tokio::select! {
        result = ftp.run() => result?,
        result = http.run() => result?,
        _ = tokio::signal::ctrl_c() => tracing::info!("shutting down..."),
    }
    Ok(())
}

/// Small synthetic namespace served when no root directory is given.
fn demo_root() -> Node {
    let root = MemoryNode::dir("root");
    root.add(MemoryNode::file("test.txt", "It works!"));
    root.add(MemoryNode::file("world.txt", "Hello world"));
    let folder = MemoryNode::dir("folder");
    folder.add(MemoryNode::file("file", "test"));
    folder.add(MemoryNode::file("test.txt", "It works!"));
    root.add(folder);
    root
}
