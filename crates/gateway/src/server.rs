use std::{net::SocketAddr, sync::Arc};

use {
    axum::{
        Router,
        extract::State,
        response::{IntoResponse, Json},
        routing::get,
    },
    tower_http::trace::TraceLayer,
    tracing::{info, warn},
};

use relaygate_config::RelaygateConfig;

use crate::state::{GatewayState, build_engine, open_store};

// ── Server startup ───────────────────────────────────────────────────────────

/// Build the gateway router (shared between production startup and tests).
pub fn build_gateway_app(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the gateway until Ctrl-C / SIGTERM.
///
/// Shutdown order: stop accepting requests, stop the dispatcher once its
/// current batch is done, then disconnect every live session.
pub async fn start_gateway(config: RelaygateConfig) -> anyhow::Result<()> {
    let store = open_store(&config.database).await?;
    let engine = build_engine(&config.engine);
    let engine_id = engine.id().to_string();
    let state = GatewayState::new(&config, store, engine)?;

    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Startup banner.
    let lines = [
        format!("relaygate gateway v{}", state.version),
        format!("listening on {addr}"),
        format!("engine: {engine_id}"),
        format!("database: {}", config.database.resolved_path().display()),
    ];
    let width = lines.iter().map(|l| l.len()).max().unwrap_or(0) + 4;
    info!("┌{}┐", "─".repeat(width));
    for line in &lines {
        info!("│  {:<w$}│", line, w = width - 2);
    }
    info!("└{}┘", "─".repeat(width));

    state.start(config.reconnect_on_start).await;

    let app = build_gateway_app(Arc::clone(&state));
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    info!("shutting down");
    state.shutdown().await;
    served?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            },
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn health_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    let sessions = state.registry.session_count().await;
    let pending = match state.store.count_pending().await {
        Ok(n) => Some(n),
        Err(e) => {
            warn!(error = %e, "failed to count pending webhook events");
            None
        },
    };
    Json(serde_json::json!({
        "status": "ok",
        "version": state.version,
        "sessions": sessions,
        "pendingEvents": pending,
        "dispatcher": state.dispatcher.is_running(),
        "uptimeSecs": state.uptime_secs(),
    }))
}
