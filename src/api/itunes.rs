use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, warn};

use super::{AlbumSource, Provider, ReleaseLookup};
use crate::config::MetadataProviderConfig;
use crate::error::CoreError;
use crate::matcher::NormalizedRelease;
use crate::models::{
    CanonicalAlbum, CanonicalTrack, ReleaseType, Source, SourceId,
};
use crate::ratelimit::{RateLimiter, RetryPolicy};

/// Metadata-only catalog adapter for the iTunes Search API. No auth; the
/// service rate-limits aggressively, so every request goes through the
/// token bucket and a backoff loop. Base URL can be overridden via
/// ITUNES_API_BASE for tests (mockito).
pub struct ItunesProvider {
    client: Client,
    limiter: RateLimiter,
    retry: RetryPolicy,
}

impl ItunesProvider {
    pub fn new(cfg: &MetadataProviderConfig) -> Self {
        Self {
            client: Client::new(),
            limiter: RateLimiter::new(cfg.requests_per_second, cfg.burst),
            retry: RetryPolicy::new(cfg.max_retries),
        }
    }

    fn api_base() -> String {
        std::env::var("ITUNES_API_BASE").unwrap_or_else(|_| "https://itunes.apple.com".into())
    }

    /// GET with admission control and retry on provider-side rate limiting
    /// (429/503). Exhausted retries surface as a terminal error.
    async fn get_json(&self, url: &str) -> Result<Value> {
        let mut attempt: u32 = 0;
        loop {
            self.limiter.acquire().await;
            let resp = self.client.get(url).send().await?;
            let status = resp.status();
            if status.as_u16() == 429 || status.as_u16() == 503 {
                self.limiter.on_rate_limited().await;
                if attempt >= self.retry.max_retries {
                    return Err(CoreError::RateLimitExhausted {
                        provider: Source::Itunes,
                        attempts: attempt + 1,
                    }
                    .into());
                }
                let delay = self.retry.backoff_delay(attempt);
                warn!(attempt, delay_ms = delay.as_millis() as u64, "itunes rate limited");
                tokio::time::sleep(delay).await;
                attempt += 1;
                continue;
            }
            if !status.is_success() {
                let txt = resp.text().await.unwrap_or_default();
                return Err(anyhow!("itunes request failed: {} => {}", status, txt));
            }
            return Ok(resp.json().await?);
        }
    }

    fn release_type_of(collection_type: Option<&str>, name: &str) -> ReleaseType {
        let lower = name.to_lowercase();
        if lower.ends_with("- single") || lower.ends_with("(single)") {
            ReleaseType::Single
        } else if lower.contains(" ep") || lower.ends_with("- ep") {
            ReleaseType::Ep
        } else if matches!(collection_type, Some("Compilation")) {
            ReleaseType::Compilation
        } else if collection_type.is_some() {
            ReleaseType::Album
        } else {
            ReleaseType::Unknown
        }
    }

    fn year_of(release_date: Option<&str>) -> Option<u32> {
        release_date?.get(..4)?.parse().ok()
    }
}

impl Provider for ItunesProvider {
    fn source(&self) -> Source {
        Source::Itunes
    }
    fn is_authenticated(&self) -> bool {
        true
    }
    fn as_release_lookup(&self) -> Option<&dyn ReleaseLookup> {
        Some(self)
    }
    fn as_album_source(&self) -> Option<&dyn AlbumSource> {
        Some(self)
    }
}

#[async_trait]
impl ReleaseLookup for ItunesProvider {
    async fn lookup_release(&self, title: &str, artist: &str) -> Result<Option<NormalizedRelease>> {
        let term = format!("{} {}", title, artist);
        let url = format!(
            "{}/search?term={}&entity=album&limit=3",
            Self::api_base(),
            urlencoding::encode(&term)
        );
        let j = self.get_json(&url).await?;
        let Some(first) = j["results"].as_array().and_then(|a| a.first()) else {
            debug!(title, artist, "itunes: no release match");
            return Ok(None);
        };
        let id = match first["collectionId"].as_i64() {
            Some(id) => id.to_string(),
            None => return Ok(None),
        };
        let name = first["collectionName"].as_str().unwrap_or(title);
        let release = NormalizedRelease::new(
            name,
            vec![first["artistName"].as_str().unwrap_or(artist).to_string()],
            Self::release_type_of(first["collectionType"].as_str(), name),
            SourceId::new(Source::Itunes, id),
        )
        .with_year(Self::year_of(first["releaseDate"].as_str()))
        .with_artwork(first["artworkUrl100"].as_str().map(|s| s.to_string()))
        .with_genres(
            first["primaryGenreName"]
                .as_str()
                .map(|g| vec![g.to_string()])
                .unwrap_or_default(),
        )
        .with_confidence(0.8);
        Ok(Some(release))
    }
}

#[async_trait]
impl AlbumSource for ItunesProvider {
    async fn album_tracks(&self, album_id: &str) -> Result<(CanonicalAlbum, Vec<CanonicalTrack>)> {
        let url = format!("{}/lookup?id={}&entity=song", Self::api_base(), album_id);
        let j = self.get_json(&url).await?;
        let results = j["results"]
            .as_array()
            .ok_or_else(|| anyhow!("itunes lookup: no results array"))?;
        let collection = results
            .iter()
            .find(|r| r["wrapperType"].as_str() == Some("collection"))
            .ok_or_else(|| anyhow!("itunes lookup: album {} not found", album_id))?;

        let mut tracks = Vec::new();
        for r in results {
            if r["wrapperType"].as_str() != Some("track") {
                continue;
            }
            let Some(track_id) = r["trackId"].as_i64() else {
                continue;
            };
            let id = track_id.to_string();
            tracks.push(CanonicalTrack {
                id: id.clone(),
                title: r["trackName"].as_str().unwrap_or("").to_string(),
                artist: r["artistName"].as_str().unwrap_or("").to_string(),
                album: r["collectionName"].as_str().unwrap_or("").to_string(),
                duration_secs: r["trackTimeMillis"].as_u64().map(|ms| (ms / 1000) as u32),
                artwork_url: r["artworkUrl100"].as_str().map(|s| s.to_string()),
                source_id: SourceId::new(Source::Itunes, id),
            });
        }
        let name = collection["collectionName"].as_str().unwrap_or("");
        let album = CanonicalAlbum {
            id: album_id.to_string(),
            title: name.to_string(),
            artist: collection["artistName"].as_str().unwrap_or("").to_string(),
            year: Self::year_of(collection["releaseDate"].as_str()),
            artwork_url: collection["artworkUrl100"].as_str().map(|s| s.to_string()),
            genres: collection["primaryGenreName"]
                .as_str()
                .map(|g| vec![g.to_string()])
                .unwrap_or_default(),
            release_type: Self::release_type_of(collection["collectionType"].as_str(), name),
            tracks: tracks.clone(),
            source_ids: vec![SourceId::new(Source::Itunes, album_id)],
        };
        Ok((album, tracks))
    }
}
