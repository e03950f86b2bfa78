//! GET-only static HTTP adapter.
//!
//! A thin translator from HTTP to the tree engine: it consumes only
//! `query` and `open`. No ranges, no content types, no keep-alive — the
//! response body is delimited by connection close.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::Semaphore;

use canopy_vfs::{Node, Passthrough, PolicyView, SecurityPolicy, SEPARATOR};

use crate::constants::CONNECTION_LIMIT;

/// GET-only HTTP server over a virtual filesystem root.
pub struct HttpServer {
    listener: TcpListener,
    view: PolicyView,
    limit: usize,
}

impl HttpServer {
    /// Bind with the pass-through policy.
    pub async fn bind(addr: impl ToSocketAddrs, root: Node) -> io::Result<Self> {
        Self::bind_with_policy(addr, root, Arc::new(Passthrough)).await
    }

    /// Bind with an explicit security policy.
    pub async fn bind_with_policy(
        addr: impl ToSocketAddrs,
        root: Node,
        policy: Arc<dyn SecurityPolicy>,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            view: PolicyView::new(root, policy),
            limit: CONNECTION_LIMIT,
        })
    }

    /// The bound socket address.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections forever, one bounded task per connection.
    pub async fn run(self) -> io::Result<()> {
        tracing::info!(addr = %self.listener.local_addr()?, "HTTP server listening");
        let connections = Arc::new(Semaphore::new(self.limit));
        loop {
            let (socket, peer) = match self.listener.accept().await {
                Ok(pair) => pair,
                Err(err) => {
                    tracing::error!(%err, "accept failed");
                    continue;
                }
            };
            let permit = connections.clone().acquire_owned().await.ok();
            let view = self.view.clone();
            tokio::spawn(async move {
                let _permit = permit;
                tracing::debug!(%peer, "client connected");
                if let Err(err) = serve(socket, view).await {
                    tracing::debug!(%peer, %err, "request failed");
                }
                tracing::debug!(%peer, "client closed");
            });
        }
    }
}

async fn serve(socket: TcpStream, view: PolicyView) -> io::Result<()> {
    let (read_half, mut writer) = socket.into_split();
    let mut reader = BufReader::new(read_half);

    let mut request = String::new();
    if reader.read_line(&mut request).await? == 0 {
        return Ok(());
    }
    let mut parts = request.split_whitespace();
    let (Some("GET"), Some(target), Some(version)) =
        (parts.next(), parts.next(), parts.next())
    else {
        return Ok(());
    };
    let version = version.to_owned();

    // Drain headers up to the blank line.
    let mut header = String::new();
    loop {
        header.clear();
        if reader.read_line(&mut header).await? == 0 || header.trim().is_empty() {
            break;
        }
    }

    let path = if target == SEPARATOR {
        "/index.html"
    } else {
        target
    };
    tracing::debug!(path, "GET");

    match view.query(path) {
        Some(file) if !file.is_dir() => match file.open().await {
            Ok(mut stream) => {
                writer
                    .write_all(format!("{version} 200 OK\r\n\r\n").as_bytes())
                    .await?;
                tokio::io::copy(&mut stream, &mut writer).await?;
                writer.shutdown().await?;
            }
            Err(err) => {
                tracing::debug!(path, %err, "open failed");
                writer
                    .write_all(format!("{version} 404 Not Found\r\n\r\n").as_bytes())
                    .await?;
            }
        },
        _ => {
            writer
                .write_all(format!("{version} 404 Not Found\r\n\r\n").as_bytes())
                .await?;
        }
    }
    Ok(())
}
