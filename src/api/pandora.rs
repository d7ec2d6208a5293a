use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, info, warn};

use super::pandora_protocol::{PandoraSession, PartnerCredentials, ProtocolClient};
use super::{PlaylistSource, Provider, Searchable, StreamSource};
use crate::config::PandoraConfig;
use crate::error::CoreError;
use crate::models::{CanonicalTrack, Playlist, SearchResult, Source, SourceId};
use crate::ratelimit::{RateLimiter, RetryPolicy};

/// Error code the tuner API uses for "call made too quickly".
const CODE_RATE_LIMITED: &str = "1039";

/// Primary provider, backed by the encrypted tuner protocol. Track
/// identifiers are `stationToken:trackToken` so a stream URL can be
/// re-resolved from the station playlist without extra state; URLs already
/// seen during playlist listing are kept in a small local map.
pub struct PandoraProvider {
    protocol: ProtocolClient,
    username: String,
    password: String,
    session: tokio::sync::RwLock<Option<Arc<PandoraSession>>>,
    limiter: RateLimiter,
    retry: RetryPolicy,
    audio_urls: tokio::sync::Mutex<HashMap<String, String>>,
}

impl PandoraProvider {
    pub fn new(cfg: &PandoraConfig) -> Self {
        Self {
            protocol: ProtocolClient::new(PartnerCredentials::default()),
            username: cfg.username.clone(),
            password: cfg.password.clone(),
            session: tokio::sync::RwLock::new(None),
            limiter: RateLimiter::new(cfg.requests_per_second, cfg.burst),
            retry: RetryPolicy::new(cfg.max_retries),
            audio_urls: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Run the two-phase handshake and swap the resulting session in as a
    /// whole. Concurrent requests see either the old session or the new
    /// one, never a partial mix.
    pub async fn login(&self) -> Result<(), CoreError> {
        let session = self
            .protocol
            .user_login(&self.username, &self.password)
            .await?;
        info!(user_id = %session.user_id, "pandora login ok");
        *self.session.write().await = Some(Arc::new(session));
        Ok(())
    }

    async fn current_session(&self) -> Result<Arc<PandoraSession>, CoreError> {
        if let Some(s) = self.session.read().await.clone() {
            return Ok(s);
        }
        self.login().await?;
        self.session
            .read()
            .await
            .clone()
            .ok_or_else(|| CoreError::UserAuth("no session after login".into()))
    }

    /// Rate-limited, retrying wrapper around a protocol call.
    async fn call(
        &self,
        method: &str,
        args: serde_json::Value,
        encrypted: bool,
    ) -> Result<serde_json::Value, CoreError> {
        let mut attempt: u32 = 0;
        loop {
            self.limiter.acquire().await;
            let session = self.current_session().await?;
            match self.protocol.call(&session, method, args.clone(), encrypted).await {
                Ok(v) => return Ok(v),
                Err(CoreError::Provider(e))
                    if e.to_string().contains(CODE_RATE_LIMITED) && attempt < self.retry.max_retries =>
                {
                    warn!(method, attempt, "pandora rate limited, backing off");
                    self.limiter.on_rate_limited().await;
                    tokio::time::sleep(self.retry.backoff_delay(attempt)).await;
                    attempt += 1;
                }
                Err(CoreError::Provider(e)) if e.to_string().contains(CODE_RATE_LIMITED) => {
                    return Err(CoreError::RateLimitExhausted {
                        provider: Source::Pandora,
                        attempts: attempt + 1,
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn track_from_item(item: &serde_json::Value, station_token: &str) -> Option<CanonicalTrack> {
        let token = item["trackToken"].as_str()?;
        let id = format!("{}:{}", station_token, token);
        Some(CanonicalTrack {
            id: id.clone(),
            title: item["songName"].as_str().unwrap_or("").to_string(),
            artist: item["artistName"].as_str().unwrap_or("").to_string(),
            album: item["albumName"].as_str().unwrap_or("").to_string(),
            duration_secs: item["trackLength"].as_u64().map(|d| d as u32),
            artwork_url: item["albumArtUrl"].as_str().map(|s| s.to_string()),
            source_id: SourceId::new(Source::Pandora, id),
        })
    }

    fn audio_url_from_item(item: &serde_json::Value) -> Option<String> {
        let map = &item["audioUrlMap"];
        for quality in ["highQuality", "mediumQuality", "lowQuality"] {
            if let Some(url) = map[quality]["audioUrl"].as_str() {
                return Some(url.to_string());
            }
        }
        item["audioUrl"].as_str().map(|s| s.to_string())
    }

    async fn fetch_station_playlist(&self, station_token: &str) -> Result<Vec<CanonicalTrack>> {
        let result = self
            .call(
                "station.getPlaylist",
                json!({ "stationToken": station_token }),
                true,
            )
            .await?;
        let mut tracks = Vec::new();
        let mut urls = self.audio_urls.lock().await;
        if let Some(items) = result["items"].as_array() {
            for item in items {
                // Ad entries carry no trackToken; skip them.
                let Some(track) = Self::track_from_item(item, station_token) else {
                    continue;
                };
                if let Some(url) = Self::audio_url_from_item(item) {
                    urls.insert(track.id.clone(), url);
                }
                tracks.push(track);
            }
        }
        debug!(station_token, count = tracks.len(), "station playlist fetched");
        Ok(tracks)
    }
}

impl Provider for PandoraProvider {
    fn source(&self) -> Source {
        Source::Pandora
    }
    fn is_authenticated(&self) -> bool {
        !self.username.is_empty() && !self.password.is_empty()
    }
    fn as_searchable(&self) -> Option<&dyn Searchable> {
        Some(self)
    }
    fn as_playlist_source(&self) -> Option<&dyn PlaylistSource> {
        Some(self)
    }
    fn as_stream_source(&self) -> Option<&dyn StreamSource> {
        Some(self)
    }
}

#[async_trait]
impl Searchable for PandoraProvider {
    async fn search(&self, query: &str) -> Result<SearchResult> {
        let result = self
            .call(
                "music.search",
                json!({ "searchText": query, "includeNearMatches": true }),
                true,
            )
            .await?;
        let mut out = SearchResult::default();
        if let Some(songs) = result["songs"].as_array() {
            for s in songs {
                let Some(token) = s["musicToken"].as_str() else {
                    continue;
                };
                out.tracks.push(CanonicalTrack {
                    id: token.to_string(),
                    title: s["songName"].as_str().unwrap_or("").to_string(),
                    artist: s["artistName"].as_str().unwrap_or("").to_string(),
                    album: String::new(),
                    duration_secs: None,
                    artwork_url: None,
                    source_id: SourceId::new(Source::Pandora, token),
                });
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl PlaylistSource for PandoraProvider {
    async fn list_playlists(&self) -> Result<Vec<Playlist>> {
        let result = self
            .call("user.getStationList", json!({ "includeStationArtUrl": true }), false)
            .await?;
        let mut playlists = Vec::new();
        if let Some(stations) = result["stations"].as_array() {
            for st in stations {
                let Some(token) = st["stationToken"].as_str() else {
                    continue;
                };
                playlists.push(Playlist {
                    id: token.to_string(),
                    name: st["stationName"].as_str().unwrap_or("").to_string(),
                    source: Source::Pandora,
                    artwork_url: st["artUrl"].as_str().map(|s| s.to_string()),
                });
            }
        }
        Ok(playlists)
    }

    async fn playlist_tracks(&self, playlist_id: &str) -> Result<Vec<CanonicalTrack>> {
        self.fetch_station_playlist(playlist_id).await
    }
}

#[async_trait]
impl StreamSource for PandoraProvider {
    async fn stream_url(&self, track_id: &str) -> Result<String> {
        if let Some(url) = self.audio_urls.lock().await.get(track_id) {
            return Ok(url.clone());
        }
        // Not seen yet: re-resolve via the owning station's playlist.
        let Some((station_token, _)) = track_id.split_once(':') else {
            return Err(anyhow!("unknown pandora track '{}': no cached url and no station context", track_id));
        };
        self.fetch_station_playlist(station_token).await?;
        self.audio_urls
            .lock()
            .await
            .get(track_id)
            .cloned()
            .ok_or_else(|| anyhow!("track '{}' not present in current station playlist", track_id))
    }
}
