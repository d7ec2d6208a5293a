use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use bytes::Bytes;
use serde::Deserialize;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::error::{CoreError, CoreResult};
use crate::manager::ManagerHandle;
use crate::models::SourceId;

/// Fully resolved audio for one composite id.
#[derive(Clone)]
pub struct CachedAudio {
    pub bytes: Bytes,
    pub content_type: String,
}

type Entry = Arc<OnceCell<Arc<CachedAudio>>>;

/// Shared audio cache keyed by composite id. Each entry is a `OnceCell`,
/// so concurrent requests for the same id converge on a single in-flight
/// resolution instead of duplicating the network/subprocess cost.
/// Failed resolutions leave the cell empty and are retried next request.
pub struct AudioCache {
    capacity: usize,
    entries: std::sync::Mutex<(HashMap<String, Entry>, Vec<String>)>,
}

impl AudioCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: std::sync::Mutex::new((HashMap::new(), Vec::new())),
        }
    }

    fn entry(&self, id: &str) -> Entry {
        let mut guard = self.entries.lock().expect("audio cache poisoned");
        let (map, order) = &mut *guard;
        if let Some(e) = map.get(id) {
            return e.clone();
        }
        if map.len() >= self.capacity && !order.is_empty() {
            let evicted = order.remove(0);
            map.remove(&evicted);
            debug!(id = %evicted, "audio cache: evicted oldest entry");
        }
        let e: Entry = Arc::new(OnceCell::new());
        map.insert(id.to_string(), e.clone());
        order.push(id.to_string());
        e
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("audio cache poisoned").0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct StreamState {
    pub handle: Arc<ManagerHandle>,
    cache: AudioCache,
    client: reqwest::Client,
}

impl StreamState {
    pub fn new(handle: Arc<ManagerHandle>, max_cache_entries: usize) -> Self {
        Self {
            handle,
            cache: AudioCache::new(max_cache_entries),
            client: reqwest::Client::new(),
        }
    }

    /// Resolve a composite id to cached audio bytes, fetching through the
    /// owning provider on first use.
    pub async fn resolve(&self, composite: &str) -> CoreResult<Arc<CachedAudio>> {
        let sid = SourceId::parse(composite)?;
        let entry = self.cache.entry(composite);
        let audio = entry
            .get_or_try_init(|| self.fetch(&sid, composite))
            .await?
            .clone();
        Ok(audio)
    }

    async fn fetch(&self, sid: &SourceId, composite: &str) -> CoreResult<Arc<CachedAudio>> {
        let manager = self.handle.current();
        let url = manager.get_stream_url(sid.source, &sid.id).await?;
        debug!(id = %composite, "stream: fetching resolved url");
        let resp = self.client.get(&url).send().await.map_err(|e| {
            CoreError::StreamResolution(composite.to_string(), format!("fetch: {}", e))
        })?;
        let status = resp.status();
        if !status.is_success() {
            return Err(CoreError::StreamResolution(
                composite.to_string(),
                format!("upstream status {}", status),
            ));
        }
        // reqwest 0.11 speaks http 0.2; axum's http 1.0 header names
        // don't cross that boundary, so the upstream read uses reqwest's
        // own constant.
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("audio/mpeg")
            .to_string();
        let bytes = resp.bytes().await.map_err(|e| {
            CoreError::StreamResolution(composite.to_string(), format!("read: {}", e))
        })?;
        info!(id = %composite, size = bytes.len(), "stream: cached audio");
        Ok(Arc::new(CachedAudio {
            bytes,
            content_type,
        }))
    }
}

#[derive(Debug, Deserialize)]
pub struct StreamParams {
    /// Hint for the track expected to play after this one; resolved and
    /// cached in the background, never blocking the current response.
    pub next: Option<String>,
}

pub fn router(state: Arc<StreamState>) -> Router {
    Router::new()
        .route("/stream/:id", get(stream_handler))
        .with_state(state)
}

async fn stream_handler(
    State(state): State<Arc<StreamState>>,
    Path(id): Path<String>,
    Query(params): Query<StreamParams>,
    headers: HeaderMap,
) -> Response {
    // Detached prefetch: not awaited, not cancelled when this request's
    // client goes away; failures are logged and nothing else.
    if let Some(next) = params.next {
        if next != id {
            let st = state.clone();
            tokio::spawn(async move {
                if let Err(e) = st.resolve(&next).await {
                    warn!(id = %next, "prefetch failed: {}", e);
                }
            });
        }
    }

    let audio = match state.resolve(&id).await {
        Ok(a) => a,
        Err(e) => {
            warn!(id = %id, "stream resolution failed: {}", e);
            return (StatusCode::BAD_GATEWAY, format!("stream error: {}", e)).into_response();
        }
    };

    let total = audio.bytes.len() as u64;
    let range = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| parse_range(v, total));

    match range {
        Some((start, end)) => {
            let body = audio.bytes.slice(start as usize..=end as usize);
            Response::builder()
                .status(StatusCode::PARTIAL_CONTENT)
                .header(header::CONTENT_TYPE, &audio.content_type)
                .header(header::ACCEPT_RANGES, "bytes")
                .header(
                    header::CONTENT_RANGE,
                    format!("bytes {}-{}/{}", start, end, total),
                )
                .body(axum::body::Body::from(body))
                .expect("static response build")
        }
        None => Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, &audio.content_type)
            .header(header::ACCEPT_RANGES, "bytes")
            .body(axum::body::Body::from(audio.bytes.clone()))
            .expect("static response build"),
    }
}

/// Parse a `Range: bytes=...` header into inclusive bounds, clamped to the
/// body. Only single ranges are honored; anything malformed or
/// unsatisfiable falls back to a full 200 response.
fn parse_range(header: &str, total: u64) -> Option<(u64, u64)> {
    if total == 0 {
        return None;
    }
    let spec = header.strip_prefix("bytes=")?.trim();
    if spec.contains(',') {
        return None;
    }
    let (start_s, end_s) = spec.split_once('-')?;
    match (start_s.is_empty(), end_s.is_empty()) {
        // bytes=-n : final n bytes
        (true, false) => {
            let n: u64 = end_s.parse().ok()?;
            if n == 0 {
                return None;
            }
            let start = total.saturating_sub(n);
            Some((start, total - 1))
        }
        // bytes=a- : from a to the end
        (false, true) => {
            let start: u64 = start_s.parse().ok()?;
            (start < total).then_some((start, total - 1))
        }
        // bytes=a-b
        (false, false) => {
            let start: u64 = start_s.parse().ok()?;
            let end: u64 = end_s.parse().ok()?;
            (start <= end && start < total).then_some((start, end.min(total - 1)))
        }
        (true, true) => None,
    }
}
