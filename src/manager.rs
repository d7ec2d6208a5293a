use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::api::{mock::MockProvider, Provider};
use crate::config::{Config, MatcherConfig};
use crate::error::{CoreError, CoreResult};
use crate::matcher::{NormalizedRelease, ReleaseMatcher};
use crate::models::{
    CanonicalAlbum, CanonicalTrack, Playlist, SearchResult, Source,
};

/// Per-search observability counters.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SearchStats {
    pub primary_providers: usize,
    pub primary_failures: usize,
    pub candidate_albums: usize,
    pub lookup_queries: usize,
    pub lookup_hits: usize,
    pub exact_matches: usize,
    pub fuzzy_matches: usize,
    pub merged_albums: usize,
    pub primary_ms: u64,
    pub lookup_ms: u64,
    pub match_ms: u64,
}

/// Capability-dispatch facade over all configured provider adapters.
/// Constructed once at startup; re-login rebuilds a fresh manager and
/// swaps it in through [`ManagerHandle`].
pub struct SourceManager {
    providers: Vec<Arc<dyn Provider>>,
    matcher_cfg: MatcherConfig,
}

impl SourceManager {
    pub fn new(providers: Vec<Arc<dyn Provider>>, matcher_cfg: MatcherConfig) -> Self {
        Self {
            providers,
            matcher_cfg,
        }
    }

    /// Build the adapter set the configuration asks for. With nothing
    /// configured you get a single mock provider, which keeps the facade
    /// usable in development.
    pub fn from_config(cfg: &Config) -> Self {
        let mut providers: Vec<Arc<dyn Provider>> = Vec::new();
        if let Some(p) = &cfg.pandora {
            providers.push(Arc::new(crate::api::pandora::PandoraProvider::new(p)));
        }
        if let Some(y) = &cfg.ytmusic {
            providers.push(Arc::new(crate::api::ytmusic::YtMusicProvider::new(y)));
        }
        if let Some(i) = &cfg.itunes {
            if i.enabled {
                providers.push(Arc::new(crate::api::itunes::ItunesProvider::new(i)));
            }
        }
        if let Some(d) = &cfg.deezer {
            if d.enabled {
                providers.push(Arc::new(crate::api::deezer::DeezerProvider::new(d)));
            }
        }
        if providers.is_empty() {
            warn!("no providers configured; falling back to mock");
            providers.push(Arc::new(MockProvider::new()));
        }
        Self::new(providers, cfg.matcher.clone())
    }

    pub fn providers(&self) -> &[Arc<dyn Provider>] {
        &self.providers
    }

    fn provider(&self, source: Source) -> CoreResult<&Arc<dyn Provider>> {
        self.providers
            .iter()
            .find(|p| p.source() == source)
            .ok_or(CoreError::CapabilityUnsupported {
                provider: source,
                operation: "any (provider not configured)",
            })
    }

    /// Multi-provider search with record linkage across metadata-only
    /// catalogs. One provider failing never fails the aggregate call.
    pub async fn search(&self, query: &str) -> CoreResult<SearchResult> {
        let (result, _stats) = self.search_with_stats(query).await?;
        Ok(result)
    }

    pub async fn search_with_stats(&self, query: &str) -> CoreResult<(SearchResult, SearchStats)> {
        let mut stats = SearchStats::default();

        // Stage 1: fan out to every search-capable provider; observe every
        // branch's outcome before aggregating, drop failures.
        let primary_start = Instant::now();
        let searchables: Vec<&Arc<dyn Provider>> = self
            .providers
            .iter()
            .filter(|p| p.as_searchable().is_some())
            .collect();
        stats.primary_providers = searchables.len();
        let branches = searchables.iter().map(|p| {
            let name = p.name();
            async move {
                let r = p
                    .as_searchable()
                    .expect("filtered on capability above")
                    .search(query)
                    .await;
                (name, r)
            }
        });
        let mut tracks: Vec<CanonicalTrack> = Vec::new();
        let mut primary_albums: Vec<CanonicalAlbum> = Vec::new();
        for (name, outcome) in join_all(branches).await {
            match outcome {
                Ok(mut r) => {
                    debug!(provider = name, tracks = r.tracks.len(), albums = r.albums.len(), "search branch ok");
                    tracks.append(&mut r.tracks);
                    primary_albums.append(&mut r.albums);
                }
                Err(e) => {
                    stats.primary_failures += 1;
                    warn!(provider = name, "search branch failed: {:#}", e);
                }
            }
        }
        stats.primary_ms = primary_start.elapsed().as_millis() as u64;
        stats.candidate_albums = primary_albums.len();

        // Fast path: with no metadata-only providers there is nothing to
        // merge, and the matcher must not be paid for.
        let lookups: Vec<&Arc<dyn Provider>> = self
            .providers
            .iter()
            .filter(|p| p.as_release_lookup().is_some())
            .collect();
        if lookups.is_empty() {
            stats.merged_albums = primary_albums.len();
            return Ok((
                SearchResult {
                    tracks,
                    albums: primary_albums,
                },
                stats,
            ));
        }

        // Stage 2: targeted release lookups, at most max_album_lookups
        // deduplicated title+artist pairs, across all metadata providers.
        let lookup_start = Instant::now();
        let mut seen: HashSet<String> = HashSet::new();
        let queries: Vec<(String, String)> = primary_albums
            .iter()
            .filter(|a| !a.title.is_empty() && !a.artist.is_empty())
            .filter(|a| {
                seen.insert(format!(
                    "{}::{}",
                    a.title.to_lowercase(),
                    a.artist.to_lowercase()
                ))
            })
            .take(self.matcher_cfg.max_album_lookups)
            .map(|a| (a.title.clone(), a.artist.clone()))
            .collect();
        stats.lookup_queries = queries.len();

        let mut lookup_branches = Vec::new();
        for p in &lookups {
            for (title, artist) in &queries {
                let name = p.name();
                lookup_branches.push(async move {
                    let r = p
                        .as_release_lookup()
                        .expect("filtered on capability above")
                        .lookup_release(title, artist)
                        .await;
                    (name, r)
                });
            }
        }
        let mut metadata_releases: Vec<NormalizedRelease> = Vec::new();
        for (name, outcome) in join_all(lookup_branches).await {
            match outcome {
                Ok(Some(rel)) => metadata_releases.push(rel),
                Ok(None) => {}
                Err(e) => warn!(provider = name, "release lookup failed: {:#}", e),
            }
        }
        stats.lookup_hits = metadata_releases.len();
        stats.lookup_ms = lookup_start.elapsed().as_millis() as u64;

        // Stage 3: record linkage. Primary albums feed first so they
        // anchor the groups and win priority ties.
        let match_start = Instant::now();
        let mut album_tracks: HashMap<String, Vec<CanonicalTrack>> = HashMap::new();
        let mut matcher = ReleaseMatcher::new(&self.matcher_cfg);
        for album in primary_albums {
            album_tracks.insert(album.id.clone(), album.tracks.clone());
            matcher.add_or_merge(normalize_album(&album));
        }
        for rel in metadata_releases {
            matcher.add_or_merge(rel);
        }
        let mstats = matcher.stats();
        stats.exact_matches = mstats.exact_matches;
        stats.fuzzy_matches = mstats.fuzzy_matches;

        let mut albums = matcher.into_albums();
        for album in &mut albums {
            // Track listings survive the merge via any contributing
            // primary album id.
            for sid in &album.source_ids {
                if let Some(t) = album_tracks.remove(&sid.id) {
                    album.tracks = t;
                    break;
                }
            }
        }
        stats.merged_albums = albums.len();
        stats.match_ms = match_start.elapsed().as_millis() as u64;

        info!(
            query,
            candidates = stats.candidate_albums,
            lookups = stats.lookup_hits,
            exact = stats.exact_matches,
            fuzzy = stats.fuzzy_matches,
            merged = stats.merged_albums,
            primary_ms = stats.primary_ms,
            lookup_ms = stats.lookup_ms,
            match_ms = stats.match_ms,
            "search complete"
        );
        Ok((SearchResult { tracks, albums }, stats))
    }

    pub async fn get_album_tracks(
        &self,
        source: Source,
        album_id: &str,
    ) -> CoreResult<(CanonicalAlbum, Vec<CanonicalTrack>)> {
        let provider = self.provider(source)?;
        let albums = provider
            .as_album_source()
            .ok_or(CoreError::CapabilityUnsupported {
                provider: source,
                operation: "get_album_tracks",
            })?;
        Ok(albums.album_tracks(album_id).await?)
    }

    pub async fn get_playlist_tracks(
        &self,
        source: Source,
        playlist_id: &str,
    ) -> CoreResult<Vec<CanonicalTrack>> {
        let provider = self.provider(source)?;
        let playlists = provider
            .as_playlist_source()
            .ok_or(CoreError::CapabilityUnsupported {
                provider: source,
                operation: "get_playlist_tracks",
            })?;
        Ok(playlists.playlist_tracks(playlist_id).await?)
    }

    pub async fn get_stream_url(&self, source: Source, track_id: &str) -> CoreResult<String> {
        let provider = self.provider(source)?;
        let streams = provider
            .as_stream_source()
            .ok_or(CoreError::CapabilityUnsupported {
                provider: source,
                operation: "get_stream_url",
            })?;
        streams
            .stream_url(track_id)
            .await
            .map_err(|e| CoreError::StreamResolution(track_id.to_string(), format!("{:#}", e)))
    }

    /// Enumerate playlists across every playlist-capable provider,
    /// tolerating per-provider failure.
    pub async fn list_all_playlists(&self) -> CoreResult<Vec<Playlist>> {
        let branches = self
            .providers
            .iter()
            .filter(|p| p.as_playlist_source().is_some())
            .map(|p| {
                let name = p.name();
                async move {
                    let r = p
                        .as_playlist_source()
                        .expect("filtered on capability above")
                        .list_playlists()
                        .await;
                    (name, r)
                }
            });
        let mut out = Vec::new();
        for (name, outcome) in join_all(branches).await {
            match outcome {
                Ok(mut pls) => out.append(&mut pls),
                Err(e) => warn!(provider = name, "list playlists failed: {:#}", e),
            }
        }
        Ok(out)
    }
}

fn normalize_album(album: &CanonicalAlbum) -> NormalizedRelease {
    let mut rel = NormalizedRelease::new(
        &album.title,
        vec![album.artist.clone()],
        album.release_type,
        album.source_ids.first().cloned().unwrap_or_else(|| {
            crate::models::SourceId::new(Source::Mock, album.id.clone())
        }),
    )
    .with_year(album.year)
    .with_artwork(album.artwork_url.clone())
    .with_genres(album.genres.clone());
    for sid in album.source_ids.iter().skip(1) {
        rel.ids.push(sid.clone());
    }
    rel
}

/// Swappable handle to the current manager. Re-login builds a new
/// `SourceManager` and replaces the whole thing; in-flight requests keep
/// the `Arc` they already cloned, new requests see the replacement.
pub struct ManagerHandle {
    inner: std::sync::RwLock<Arc<SourceManager>>,
}

impl ManagerHandle {
    pub fn new(manager: SourceManager) -> Self {
        Self {
            inner: std::sync::RwLock::new(Arc::new(manager)),
        }
    }

    pub fn current(&self) -> Arc<SourceManager> {
        self.inner.read().expect("manager handle poisoned").clone()
    }

    pub fn replace(&self, manager: SourceManager) {
        *self.inner.write().expect("manager handle poisoned") = Arc::new(manager);
    }
}
