use super::api::{
    force_breathing_session, get_stats, reset_stats, set_breathing_interval, stop_session,
    stream_stats, toggle_breathing_pause,
};
use super::assets::{index_handler, static_handler};
use super::DashboardState;
use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use std::net::{IpAddr, SocketAddr, TcpListener};
use std::thread::{self, JoinHandle};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

pub fn router(state: DashboardState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/api/stats", get(get_stats))
        .route("/api/stats/stream", get(stream_stats))
        .route("/api/stats/reset", post(reset_stats))
        .route("/api/breathing/pause", post(toggle_breathing_pause))
        .route("/api/breathing/force", post(force_breathing_session))
        .route("/api/breathing/interval", post(set_breathing_interval))
        .route("/api/session/stop", post(stop_session))
        .route("/*path", get(static_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Binds to `port`, moving up one port at a time while the address is taken.
fn bind_with_fallback(host: IpAddr, port: u16) -> Result<TcpListener> {
    let mut current_port = port;
    loop {
        let addr = SocketAddr::new(host, current_port);
        match TcpListener::bind(addr) {
            Ok(listener) => {
                // Tokio requires non-blocking sockets
                listener.set_nonblocking(true)?;
                info!("Successfully bound to {}", addr);
                return Ok(listener);
            }
            Err(e) => {
                warn!("Failed to bind to {}: {}. Trying next port...", addr, e);
                current_port = current_port
                    .checked_add(1)
                    .ok_or_else(|| anyhow::anyhow!("No available ports found"))?;
            }
        }
    }
}

pub async fn run_server(listener: TcpListener, state: DashboardState) -> Result<()> {
    let tokio_listener = tokio::net::TcpListener::from_std(listener)?;
    info!(
        "Wellness dashboard started on http://{}",
        tokio_listener.local_addr()?
    );
    axum::serve(tokio_listener, router(state)).await?;
    Ok(())
}

/// Serves the dashboard from its own runtime thread so the camera loop can
/// stay on the main thread. Binding happens before returning.
pub fn spawn_dashboard(
    host: IpAddr,
    port: u16,
    state: DashboardState,
) -> Result<(SocketAddr, JoinHandle<()>)> {
    let listener = bind_with_fallback(host, port)?;
    let addr = listener.local_addr()?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()?;

    let handle = thread::Builder::new()
        .name("dashboard".into())
        .spawn(move || {
            if let Err(e) = runtime.block_on(run_server(listener, state)) {
                tracing::error!("Dashboard server stopped: {:#}", e);
            }
        })?;
    Ok((addr, handle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_bind_falls_back_to_next_port() {
        let host = IpAddr::V4(Ipv4Addr::LOCALHOST);
        let taken = TcpListener::bind(SocketAddr::new(host, 0)).unwrap();
        let port = taken.local_addr().unwrap().port();
        if port == u16::MAX {
            return;
        }

        let listener = bind_with_fallback(host, port).unwrap();
        assert!(listener.local_addr().unwrap().port() > port);
    }
}
