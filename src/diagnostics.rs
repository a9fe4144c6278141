//! Local-only diagnostics endpoint.
//!
//! `GET /debug/stats` returns the live server counters as JSON.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tracing::info;

use crate::types::{Result, SstpError};

/// Counters shared by every session of a server
#[derive(Debug, Default)]
pub struct ServerStats {
    active_sessions: AtomicU64,
    total_sessions: AtomicU64,
    uplink_frames: AtomicU64,
    uplink_bytes: AtomicU64,
    downlink_frames: AtomicU64,
    downlink_bytes: AtomicU64,
}

/// Point-in-time copy of [`ServerStats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub active_sessions: u64,
    pub total_sessions: u64,
    pub uplink_frames: u64,
    pub uplink_bytes: u64,
    pub downlink_frames: u64,
    pub downlink_bytes: u64,
}

impl ServerStats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn session_opened(&self) {
        self.active_sessions.fetch_add(1, Ordering::Relaxed);
        self.total_sessions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_closed(&self) {
        let _ = self
            .active_sessions
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    /// Client to link payload
    pub fn record_uplink(&self, bytes: usize) {
        self.uplink_frames.fetch_add(1, Ordering::Relaxed);
        self.uplink_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Link to client payload
    pub fn record_downlink(&self, bytes: usize) {
        self.downlink_frames.fetch_add(1, Ordering::Relaxed);
        self.downlink_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            active_sessions: self.active_sessions.load(Ordering::Relaxed),
            total_sessions: self.total_sessions.load(Ordering::Relaxed),
            uplink_frames: self.uplink_frames.load(Ordering::Relaxed),
            uplink_bytes: self.uplink_bytes.load(Ordering::Relaxed),
            downlink_frames: self.downlink_frames.load(Ordering::Relaxed),
            downlink_bytes: self.downlink_bytes.load(Ordering::Relaxed),
        }
    }
}

async fn stats_handler(State(stats): State<Arc<ServerStats>>) -> Json<StatsSnapshot> {
    Json(stats.snapshot())
}

pub fn router(stats: Arc<ServerStats>) -> Router {
    Router::new()
        .route("/debug/stats", get(stats_handler))
        .with_state(stats)
}

/// Serve the diagnostics endpoint on a loopback address.
pub async fn serve(addr: SocketAddr, stats: Arc<ServerStats>) -> Result<()> {
    if !addr.ip().is_loopback() {
        return Err(SstpError::Config(format!(
            "diagnostics endpoint must be loopback-only, got {}",
            addr
        )));
    }

    let listener = TcpListener::bind(addr).await?;
    info!("Diagnostics listening on {}", listener.local_addr()?);
    axum::serve(listener, router(stats)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let stats = ServerStats::new();
        stats.session_opened();
        stats.session_opened();
        stats.session_closed();
        stats.record_uplink(100);
        stats.record_downlink(40);
        stats.record_downlink(60);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.active_sessions, 1);
        assert_eq!(snapshot.total_sessions, 2);
        assert_eq!(snapshot.uplink_frames, 1);
        assert_eq!(snapshot.uplink_bytes, 100);
        assert_eq!(snapshot.downlink_frames, 2);
        assert_eq!(snapshot.downlink_bytes, 100);
    }

    #[test]
    fn test_active_sessions_never_underflow() {
        let stats = ServerStats::new();
        stats.session_closed();
        assert_eq!(stats.snapshot().active_sessions, 0);
    }

    #[tokio::test]
    async fn test_handler_returns_snapshot() {
        let stats = ServerStats::new();
        stats.record_uplink(3);
        let Json(snapshot) = stats_handler(State(stats.clone())).await;
        assert_eq!(snapshot, stats.snapshot());

        let json = serde_json::to_value(snapshot).unwrap();
        assert_eq!(json["uplink_bytes"], 3);
    }

    #[tokio::test]
    async fn test_rejects_public_address() {
        let addr: SocketAddr = "0.0.0.0:0".parse().unwrap();
        assert!(matches!(
            serve(addr, ServerStats::new()).await,
            Err(SstpError::Config(_))
        ));
    }
}
