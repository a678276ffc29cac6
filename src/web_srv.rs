use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use axum::extract::State;
use axum::routing::get;
use axum::Router;
use diesel::SqliteConnection;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio_util::sync::CancellationToken;

use crate::utils::ResultExt;

struct AppState {
    conn: Mutex<SqliteConnection>,
    db_path: PathBuf,
    prometheus: PrometheusHandle,
}

pub async fn run(
    conn: SqliteConnection,
    db_path: PathBuf,
    addr: SocketAddr,
    prometheus: PrometheusHandle,
    cancel: CancellationToken,
) {
    let app_state =
        Arc::new(AppState { conn: Mutex::new(conn), db_path, prometheus });

    let app = Router::new()
        .route("/metrics", get(get_metrics))
        .route("/healthz", get(|| async { "ok" }))
        .with_state(app_state);

    let Some(listener) = tokio::net::TcpListener::bind(addr)
        .await
        .log_ok("Failed to bind metrics server")
    else {
        return;
    };
    log::info!("Serving metrics on http://{addr}/metrics");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .log_error("Metrics server error");
}

async fn get_metrics(State(state): State<Arc<AppState>>) -> String {
    crate::metrics::refresh(&mut state.conn.lock().unwrap(), &state.db_path);
    state.prometheus.render()
}
