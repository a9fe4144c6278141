use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio_stream::wrappers::TcpListenerStream;
use tokio_stream::StreamExt;
use tokio_util::codec::{Framed, FramedParts};
use tracing::{error, info, warn};

use crate::codec::SstpCodec;
use crate::config::ServerConfig;
use crate::diagnostics::ServerStats;
use crate::handshake;
use crate::session;
use crate::types::{Packet, Result, SessionId, SstpError};

/// TCP listener that turns each accepted connection into an SSTP session
pub struct SstpServer {
    listener: TcpListener,
    config: Arc<ServerConfig>,
    stats: Arc<ServerStats>,
    next_session_id: Arc<AtomicU64>,
}

impl SstpServer {
    /// Bind to the configured listen address
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        let listener = TcpListener::bind(config.listen).await?;
        info!("SSTP server bound to {}", listener.local_addr()?);

        Ok(Self {
            listener,
            config: Arc::new(config),
            stats: ServerStats::new(),
            next_session_id: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Share counters with another component, e.g. the diagnostics endpoint
    pub fn with_stats(mut self, stats: Arc<ServerStats>) -> Self {
        self.stats = stats;
        self
    }

    pub fn stats(&self) -> Arc<ServerStats> {
        self.stats.clone()
    }

    /// Get the local address this server is bound to
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().map_err(SstpError::Io)
    }

    /// Accept connections until the listener fails; one task per connection
    pub async fn run(self) -> Result<()> {
        info!("SSTP server starting...");
        let mut incoming = TcpListenerStream::new(self.listener);

        while let Some(conn) = incoming.next().await {
            match conn {
                Ok(socket) => {
                    let id = self.next_session_id.fetch_add(1, Ordering::Relaxed) + 1;
                    let config = self.config.clone();
                    let stats = self.stats.clone();

                    tokio::spawn(async move {
                        if let Err(e) = Self::handle_connection(id, socket, config, stats).await {
                            error!("Connection {} ended with error: {}", id, e);
                        }
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            }
        }

        Ok(())
    }

    /// Handshake, then run the session over the same socket
    async fn handle_connection(
        id: SessionId,
        mut socket: TcpStream,
        config: Arc<ServerConfig>,
        stats: Arc<ServerStats>,
    ) -> Result<()> {
        let peer = socket.peer_addr()?;
        info!("New connection {} from {}", id, peer);
        socket.set_nodelay(true)?;

        let buffered = match handshake::accept(&mut socket, &config.http_path).await {
            Ok(buffered) => buffered,
            Err(e) => {
                warn!("Handshake with {} failed: {}", peer, e);
                return Ok(());
            }
        };

        let mut parts = FramedParts::new::<Packet>(socket, SstpCodec::new());
        parts.read_buf = buffered;
        session::serve(id, Framed::from_parts(parts), config, stats).await
    }
}
