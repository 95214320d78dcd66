use std::{net::SocketAddr, sync::Arc};

use {
    axum::{
        Router,
        extract::State,
        response::{IntoResponse, Json},
        routing::get,
    },
    switchboard_config::SwitchboardConfig,
    switchboard_sessions::ClientFactory,
    tokio::signal,
    tower_http::trace::TraceLayer,
    tracing::{error, info},
};

use crate::state::GatewayState;

// ── Server startup ───────────────────────────────────────────────────────────

/// Build the gateway router (shared between production startup and tests).
pub fn build_gateway_app(state: Arc<GatewayState>) -> Router {
    let router = Router::new().route("/health", get(health_handler));

    #[cfg(feature = "prometheus")]
    let router = router.route("/metrics", get(metrics_handler));

    router.layer(TraceLayer::new_for_http()).with_state(state)
}

/// Run the gateway until Ctrl-C or SIGTERM.
pub async fn start_gateway(
    config: SwitchboardConfig,
    factory: Arc<dyn ClientFactory>,
) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port).parse()?;
    let state = GatewayState::open(config, factory).await?;

    #[cfg(feature = "prometheus")]
    match switchboard_metrics::install_prometheus_recorder() {
        Ok(handle) => state.set_prometheus(handle),
        Err(e) => error!(error = %e, "metrics endpoint disabled"),
    }

    state.spawn_reconcile();

    let app = build_gateway_app(Arc::clone(&state));
    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Startup banner.
    let w = &state.config.webhooks;
    let lines = [
        format!("switchboard gateway v{}", state.version),
        format!("listening on {addr}"),
        format!(
            "database: {}",
            state.config.database.resolved_path().display()
        ),
        if w.enabled {
            format!(
                "webhooks: {} workers, queue {}, {} attempts",
                w.workers, w.queue_capacity, w.retry_limit
            )
        } else {
            "webhooks: disabled".to_string()
        },
    ];
    let width = lines.iter().map(|l| l.len()).max().unwrap_or(0) + 4;
    info!("┌{}┐", "─".repeat(width));
    for line in &lines {
        info!("│  {:<w$}│", line, w = width - 2);
    }
    info!("└{}┘", "─".repeat(width));

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;
    state.shutdown().await;
    served?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            },
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn health_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    let statuses = state.registry.statuses().await;
    let connected = statuses.iter().filter(|s| s.connected).count();
    Json(serde_json::json!({
        "status": "ok",
        "version": state.version,
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "sessions": {
            "total": statuses.len(),
            "connected": connected,
        },
        "webhooks": {
            "enabled": state.engine.is_enabled(),
            "stats": state.engine.stats(),
        },
    }))
}

#[cfg(feature = "prometheus")]
async fn metrics_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    use axum::http::StatusCode;

    match state.prometheus.get() {
        Some(handle) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            handle.render(),
        ),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            [("content-type", "text/plain; version=0.0.4")],
            String::new(),
        ),
    }
}
