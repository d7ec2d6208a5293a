use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, warn};

use super::{Provider, ReleaseLookup};
use crate::config::MetadataProviderConfig;
use crate::error::CoreError;
use crate::matcher::NormalizedRelease;
use crate::models::{ReleaseType, Source, SourceId};
use crate::ratelimit::{RateLimiter, RetryPolicy};

/// Metadata-only adapter for the public Deezer catalog API (50 req/5s per
/// IP, no auth for search). Base URL overridable via DEEZER_API_BASE for
/// tests (mockito).
pub struct DeezerProvider {
    client: Client,
    limiter: RateLimiter,
    retry: RetryPolicy,
}

impl DeezerProvider {
    pub fn new(cfg: &MetadataProviderConfig) -> Self {
        Self {
            client: Client::new(),
            limiter: RateLimiter::new(cfg.requests_per_second, cfg.burst),
            retry: RetryPolicy::new(cfg.max_retries),
        }
    }

    fn api_base() -> String {
        std::env::var("DEEZER_API_BASE").unwrap_or_else(|_| "https://api.deezer.com".into())
    }

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
                        provider: Source::Deezer,
                        attempts: attempt + 1,
                    }
                    .into());
                }
                let delay = self.retry.backoff_delay(attempt);
                warn!(attempt, delay_ms = delay.as_millis() as u64, "deezer rate limited");
                tokio::time::sleep(delay).await;
                attempt += 1;
                continue;
            }
            if !status.is_success() {
                let txt = resp.text().await.unwrap_or_default();
                return Err(anyhow!("deezer request failed: {} => {}", status, txt));
            }
            let j: Value = resp.json().await?;
            // Deezer reports quota errors inside a 200 body.
            if j["error"]["code"].as_i64() == Some(4) {
                self.limiter.on_rate_limited().await;
                if attempt >= self.retry.max_retries {
                    return Err(CoreError::RateLimitExhausted {
                        provider: Source::Deezer,
                        attempts: attempt + 1,
                    }
                    .into());
                }
                tokio::time::sleep(self.retry.backoff_delay(attempt)).await;
                attempt += 1;
                continue;
            }
            return Ok(j);
        }
    }

    fn release_type_of(record_type: Option<&str>) -> ReleaseType {
        match record_type {
            Some("album") => ReleaseType::Album,
            Some("single") => ReleaseType::Single,
            Some("ep") => ReleaseType::Ep,
            Some("compile") | Some("compilation") => ReleaseType::Compilation,
            _ => ReleaseType::Unknown,
        }
    }
}

impl Provider for DeezerProvider {
    fn source(&self) -> Source {
        Source::Deezer
    }
    fn is_authenticated(&self) -> bool {
        true
    }
    fn as_release_lookup(&self) -> Option<&dyn ReleaseLookup> {
        Some(self)
    }
}

#[async_trait]
impl ReleaseLookup for DeezerProvider {
    async fn lookup_release(&self, title: &str, artist: &str) -> Result<Option<NormalizedRelease>> {
        let q = format!("album:\"{}\" artist:\"{}\"", title, artist);
        let url = format!(
            "{}/search/album?q={}&limit=1",
            Self::api_base(),
            urlencoding::encode(&q)
        );
        let j = self.get_json(&url).await?;
        let Some(first) = j["data"].as_array().and_then(|a| a.first()) else {
            debug!(title, artist, "deezer: no release match");
            return Ok(None);
        };
        let id = match first["id"].as_i64() {
            Some(id) => id.to_string(),
            None => return Ok(None),
        };
        let release = NormalizedRelease::new(
            first["title"].as_str().unwrap_or(title),
            vec![first["artist"]["name"]
                .as_str()
                .unwrap_or(artist)
                .to_string()],
            Self::release_type_of(first["record_type"].as_str()),
            SourceId::new(Source::Deezer, id),
        )
        .with_artwork(first["cover_medium"].as_str().map(|s| s.to_string()))
        .with_confidence(0.8);
        Ok(Some(release))
    }
}
