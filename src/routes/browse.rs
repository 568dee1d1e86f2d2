use std::{io, path::PathBuf};

use axum::{
    body::{Body, Bytes},
    extract::{Query, Request, State},
    http::{header, HeaderValue},
    response::{IntoResponse, Redirect, Response},
    Json,
};
use tokio::sync::mpsc;
use tokio::task::spawn_blocking;
use tokio_stream::wrappers::ReceiverStream;
use tower::ServiceExt;
use tower_http::services::ServeFile;
use tracing::{info, warn};

use crate::{
    archive::{self, BodyWriter},
    error::{validation::validate_request_path, AppError, AppResult},
    listing::{self, ListingOptions},
    state::AppState,
    thumb,
    types::{BrowseQuery, SortKey},
};

// Chunks buffered between the archiver thread and the response body
const ARCHIVE_CHANNEL_DEPTH: usize = 8;

/// Serves files, thumbnails, directory listings and directory archives under the index root.
pub async fn browse(
    State(state): State<AppState>,
    Query(query): Query<BrowseQuery>,
    req: Request,
) -> AppResult<Response> {
    let raw_path = req.uri().path().to_string();
    if raw_path != "/" && raw_path.ends_with('/') {
        let mut target = raw_path.trim_end_matches('/').to_string();
        if target.is_empty() {
            target.push('/');
        }
        if let Some(q) = req.uri().query() {
            target.push('?');
            target.push_str(q);
        }
        return Ok(Redirect::to(&target).into_response());
    }

    let url_path = urlencoding::decode(&raw_path)
        .map_err(|_| AppError::BadRequest("request path is not valid UTF-8".into()))?
        .into_owned();
    let rel = validate_request_path(&url_path)?;
    let fs_path = state.root.join(&rel);
    let md = tokio::fs::metadata(&fs_path).await?;
    let cfg = &state.config;

    if md.is_dir() {
        if query.zip && cfg.archive.enable {
            let recursive = query.rec && cfg.archive.recursive;
            return archive_response(&state, fs_path, recursive).await;
        }
        let opts = ListingOptions {
            sort: query.s.as_deref().and_then(SortKey::from_param),
            reverse: query.r,
            page: query.p.unwrap_or(1),
            page_size: cfg.index.gallery_images,
            show_modes: cfg.index.show_modes,
        };
        let listing = spawn_blocking(move || listing::list_directory(&fs_path, &url_path, &opts)).await??;
        return Ok(Json(listing).into_response());
    }

    let base = fs_path
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    if base == "index.html" || base == "index.htm" {
        return Ok(serve_file(fs_path, req).await);
    }

    if query.t && thumb::is_supported(&fs_path) {
        if let Some(cache) = &state.thumbs {
            let (w, h) = (cfg.thumbnails.width, cfg.thumbnails.height);
            // serve the original if no thumbnail can be made
            if let Some(thumb_path) = cache.get(&fs_path, w, h).await {
                return Ok(serve_file(thumb_path, req).await);
            }
        }
    }
    Ok(serve_file(fs_path, req).await)
}

async fn serve_file(path: PathBuf, req: Request) -> Response {
    let res = match ServeFile::new(path).oneshot(req).await {
        Ok(res) => res,
        Err(never) => match never {},
    };
    res.map(Body::new)
}

/// Builds the manifest, waits for a gate slot, then streams the archive from a blocking thread.
/// Enumeration errors are returned before any byte of the body exists.
async fn archive_response(state: &AppState, dir: PathBuf, recursive: bool) -> AppResult<Response> {
    let walk_dir = dir.clone();
    let manifest = spawn_blocking(move || archive::build_manifest(&walk_dir, recursive)).await??;

    let permit = state
        .gate
        .acquire()
        .await
        .map_err(|_| AppError::ServiceUnavailable("archive gate closed".into()))?;
    state.metrics.inc_archives_started();

    let (tx, rx) = mpsc::channel::<io::Result<Bytes>>(ARCHIVE_CHANNEL_DEPTH);
    let chunk_size = state.config.archive.chunk_size;
    let metrics = state.metrics.clone();
    let label = dir.display().to_string();
    spawn_blocking(move || {
        let _permit = permit;
        let writer = BodyWriter::new(tx, chunk_size);
        match archive::stream_archive(&manifest, writer) {
            Ok(summary) => {
                metrics.inc_archives_completed();
                metrics.add_archive_members(summary.members_written, summary.members_skipped);
                metrics.add_archive_bytes(summary.bytes_written);
                info!(
                    "zipper: sent {} ({} members, {} skipped, {} truncated, {} bytes)",
                    label,
                    summary.members_written,
                    summary.members_skipped,
                    summary.members_truncated,
                    summary.bytes_written
                );
            }
            Err(e) => {
                metrics.inc_archives_aborted();
                warn!("zipper: streaming {} aborted: {}", label, e);
            }
        }
    });

    let filename = archive::archive_file_name(&dir);
    let mut response = Body::from_stream(ReceiverStream::new(rx)).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/zip"));
    if let Ok(value) = HeaderValue::from_str(&archive::content_disposition(&filename)) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    Ok(response)
}
