//! TCP status endpoint.
//!
//! Serves the current [`StatusSnapshot`] as a single JSON document per
//! accepted connection, newline-terminated, then closes. No request parsing;
//! external consumers (dashboards, health checks) just connect and read.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tracing::{debug, error, info};

use ravn_core::shutdown::ShutdownToken;

use crate::agent::StatusSnapshot;

/// Run the status listener until the shutdown token is signalled.
pub async fn run_status_server(
    addr: SocketAddr,
    status: Arc<RwLock<StatusSnapshot>>,
    token: ShutdownToken,
) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding status listener on {addr}"))?;
    serve(listener, status, token).await
}

/// Accept loop over an already-bound listener.
async fn serve(
    listener: TcpListener,
    status: Arc<RwLock<StatusSnapshot>>,
    token: ShutdownToken,
) -> Result<()> {
    info!(addr = %listener.local_addr()?, "status server listening");

    loop {
        tokio::select! {
            _ = token.wait() => {
                info!("status server shutting down");
                return Ok(());
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        debug!(%peer, "status client connected");
                        let snapshot = status.read().await.clone();
                        tokio::spawn(serve_snapshot(stream, snapshot));
                    }
                    Err(e) => {
                        error!(error = %e, "failed to accept status connection");
                    }
                }
            }
        }
    }
}

async fn serve_snapshot(mut stream: tokio::net::TcpStream, snapshot: StatusSnapshot) {
    let body = match serde_json::to_string(&snapshot) {
        Ok(body) => body,
        Err(e) => {
            error!(error = %e, "failed to serialize status snapshot");
            return;
        }
    };
    if let Err(e) = stream.write_all(body.as_bytes()).await {
        debug!(error = %e, "status write failed");
        return;
    }
    let _ = stream.write_all(b"\n").await;
    let _ = stream.shutdown().await;
}
