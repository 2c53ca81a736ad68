use crate::agents::AgentSession;
use crate::channels::{BotSession, ZaloOaChannel};
use crate::config::{SettingsStore, DEFAULT_SERVER_BIND, DEFAULT_SERVER_PORT};
use crate::gateway::routes;

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Shared state for the control surface.
#[derive(Clone)]
pub struct GatewayState {
    pub store: Arc<SettingsStore>,
    pub agent: Arc<AgentSession>,
    pub bot: Arc<BotSession>,
    pub oa: Arc<ZaloOaChannel>,
    pub start_time: std::time::Instant,
    pub version: String,
}

/// HTTP control surface.
pub struct GatewayServer {
    state: GatewayState,
    addr: SocketAddr,
    shutdown: CancellationToken,
}

impl GatewayServer {
    pub fn new(state: GatewayState, addr: SocketAddr) -> Self {
        Self {
            state,
            addr,
            shutdown: CancellationToken::new(),
        }
    }

    /// Token that stops the server when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Serve until Ctrl+C, SIGTERM, or the shutdown token fires.
    pub async fn run_until_shutdown(self) -> Result<()> {
        let app = routes::build_routes(self.state.clone());
        let listener = tokio::net::TcpListener::bind(self.addr)
            .await
            .with_context(|| format!("failed to bind {}", self.addr))?;

        info!("zalo-advisor v{} listening on http://{}", self.state.version, self.addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(self.shutdown.clone()))
            .await?;

        info!("Control surface shut down gracefully");
        Ok(())
    }
}

/// Wait for Ctrl+C, SIGTERM, or cancellation of `token`.
pub async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, initiating shutdown"),
        _ = terminate => info!("Received SIGTERM, initiating shutdown"),
        _ = token.cancelled() => info!("Shutdown requested"),
    }
    token.cancel();
}

/// Resolve the listen address: CLI flags, then `ZALO_ADVISOR_BIND` /
/// `ZALO_ADVISOR_PORT`, then defaults.
pub fn resolve_bind_address(bind: Option<&str>, port: Option<u16>) -> Result<SocketAddr> {
    let host = bind
        .map(str::to_string)
        .or_else(|| std::env::var("ZALO_ADVISOR_BIND").ok())
        .filter(|h| !h.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_SERVER_BIND.to_string());

    let port = match port {
        Some(port) => port,
        None => match std::env::var("ZALO_ADVISOR_PORT") {
            Ok(raw) => raw
                .trim()
                .parse()
                .with_context(|| format!("invalid ZALO_ADVISOR_PORT: {raw}"))?,
            Err(_) => DEFAULT_SERVER_PORT,
        },
    };

    format!("{host}:{port}")
        .parse()
        .with_context(|| format!("invalid bind address {host}:{port}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_flags_win() {
        let addr = resolve_bind_address(Some("0.0.0.0"), Some(9100)).unwrap();
        assert_eq!(addr.to_string(), "0.0.0.0:9100");
    }

    #[test]
    fn bad_host_is_an_error() {
        assert!(resolve_bind_address(Some("not a host"), Some(1)).is_err());
    }
}
