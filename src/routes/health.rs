use std::{path::PathBuf, time::Duration};

use crate::state::AppState;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};

// Health check endpoint - lightweight
pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

// Readiness probe: the index root must be listable and the thumbnail dir present
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let root = state.root.as_ref().clone();
    let thumb_dir: Option<PathBuf> = state.thumbs.as_ref().map(|c| c.dir().to_path_buf());
    let check = async move {
        let root_err = |e: std::io::Error| format!("index root {}: {}", root.display(), e);
        let mut entries = tokio::fs::read_dir(&root).await.map_err(root_err)?;
        entries.next_entry().await.map_err(root_err)?;
        if let Some(dir) = thumb_dir {
            let md = tokio::fs::metadata(&dir)
                .await
                .map_err(|e| format!("thumbnail dir {}: {}", dir.display(), e))?;
            if !md.is_dir() {
                return Err(format!("thumbnail dir {} is not a directory", dir.display()));
            }
        }
        Ok::<_, String>(())
    };
    match tokio::time::timeout(Duration::from_secs(5), check).await {
        Ok(Ok(())) => (StatusCode::OK, "ready").into_response(),
        Ok(Err(e)) => (StatusCode::SERVICE_UNAVAILABLE, format!("not ready: {}", e)).into_response(),
        Err(_) => (StatusCode::SERVICE_UNAVAILABLE, "not ready: timeout").into_response(),
    }
}

// Metrics endpoint: returns JSON snapshot
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.metrics.get_snapshot();
    Json(snapshot)
}

// Prometheus-compatible text exposition format
pub async fn metrics_prometheus(State(state): State<AppState>) -> impl IntoResponse {
    let m = state.metrics.get_snapshot();
    let series: [(&str, &str, &str, u64); 12] = [
        ("thumbs_generated", "counter", "Thumbnails encoded", m.thumbs_generated),
        ("thumbs_failed", "counter", "Thumbnail generations that failed", m.thumbs_failed),
        ("thumbs_memory_hits", "counter", "Thumbnail requests served from the in-memory index", m.thumbs_memory_hits),
        ("thumbs_disk_hits", "counter", "Thumbnails reused from disk without encoding", m.thumbs_disk_hits),
        ("thumbs_coalesced", "counter", "Thumbnail requests that joined an in-flight generation", m.thumbs_coalesced),
        ("archives_started", "counter", "Archive streams started", m.archives_started),
        ("archives_completed", "counter", "Archive streams completed", m.archives_completed),
        ("archives_aborted", "counter", "Archive streams aborted", m.archives_aborted),
        ("archive_members_written", "counter", "Archive members written", m.archive_members_written),
        ("archive_members_skipped", "counter", "Archive members skipped", m.archive_members_skipped),
        ("archive_bytes", "counter", "Archive bytes written", m.archive_bytes),
        ("uptime_seconds", "gauge", "Uptime seconds", m.uptime_seconds),
    ];
    let mut body = String::new();
    for (name, kind, help, value) in series {
        body.push_str(&format!(
            "# HELP dirindex_{name} {help}\n# TYPE dirindex_{name} {kind}\ndirindex_{name} {value}\n"
        ));
    }
    ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body)
}

// Version/Build info endpoint (JSON)
pub async fn version() -> impl IntoResponse {
    let body = serde_json::json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "package": {
            "description": env!("CARGO_PKG_DESCRIPTION"),
            "authors": env!("CARGO_PKG_AUTHORS"),
            "license": env!("CARGO_PKG_LICENSE"),
        },
        "build": {
            "profile": if cfg!(debug_assertions) { "debug" } else { "release" },
            "os": std::env::consts::OS,
            "arch": std::env::consts::ARCH,
        }
    });
    (StatusCode::OK, Json(body))
}
