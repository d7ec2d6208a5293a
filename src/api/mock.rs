use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tracing::info;

use super::{AlbumSource, PlaylistSource, Provider, ReleaseLookup, Searchable, StreamSource};
use crate::matcher::NormalizedRelease;
use crate::models::{
    CanonicalAlbum, CanonicalTrack, Playlist, ReleaseType, SearchResult, Source, SourceId,
};

/// Deterministic in-process provider used by tests and when no real
/// credentials are present. Capabilities are toggled per instance so tests
/// can exercise the dispatcher's capability errors; call counters let
/// single-flight behavior be asserted.
pub struct MockProvider {
    pub searchable: bool,
    pub streams: bool,
    pub playlists: bool,
    pub albums: bool,
    pub lookups: bool,
    /// When set, every enabled operation fails with this message.
    pub fail_with: Option<String>,
    /// URL returned by `stream_url`; defaults to a placeholder.
    pub stream_target: String,
    pub search_calls: AtomicUsize,
    pub stream_calls: AtomicUsize,
    pub lookup_calls: AtomicUsize,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self {
            searchable: true,
            streams: true,
            playlists: true,
            albums: true,
            lookups: false,
            fail_with: None,
            stream_target: "http://127.0.0.1:0/mock-audio".into(),
            search_calls: AtomicUsize::new(0),
            stream_calls: AtomicUsize::new(0),
            lookup_calls: AtomicUsize::new(0),
        }
    }
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(msg: &str) -> Self {
        Self {
            fail_with: Some(msg.to_string()),
            ..Self::default()
        }
    }

    fn check_failure(&self) -> Result<()> {
        match &self.fail_with {
            Some(msg) => Err(anyhow!("{}", msg)),
            None => Ok(()),
        }
    }

    fn track(&self, id: &str, title: &str, artist: &str, album: &str) -> CanonicalTrack {
        CanonicalTrack {
            id: id.to_string(),
            title: title.to_string(),
            artist: artist.to_string(),
            album: album.to_string(),
            duration_secs: Some(180),
            artwork_url: None,
            source_id: SourceId::new(Source::Mock, id),
        }
    }
}

impl Provider for MockProvider {
    fn source(&self) -> Source {
        Source::Mock
    }
    fn is_authenticated(&self) -> bool {
        true
    }
    fn as_searchable(&self) -> Option<&dyn Searchable> {
        self.searchable.then_some(self as &dyn Searchable)
    }
    fn as_playlist_source(&self) -> Option<&dyn PlaylistSource> {
        self.playlists.then_some(self as &dyn PlaylistSource)
    }
    fn as_album_source(&self) -> Option<&dyn AlbumSource> {
        self.albums.then_some(self as &dyn AlbumSource)
    }
    fn as_stream_source(&self) -> Option<&dyn StreamSource> {
        self.streams.then_some(self as &dyn StreamSource)
    }
    fn as_release_lookup(&self) -> Option<&dyn ReleaseLookup> {
        self.lookups.then_some(self as &dyn ReleaseLookup)
    }
}

#[async_trait]
impl Searchable for MockProvider {
    async fn search(&self, query: &str) -> Result<SearchResult> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        self.check_failure()?;
        info!("MockProvider: search {}", query);
        let track = self.track("mock-t1", query, "Mock Artist", "Mock Album");
        let album = CanonicalAlbum {
            id: "mock-a1".into(),
            title: "Mock Album".into(),
            artist: "Mock Artist".into(),
            year: Some(2020),
            artwork_url: None,
            genres: vec!["mock".into()],
            release_type: ReleaseType::Album,
            tracks: vec![track.clone()],
            source_ids: vec![SourceId::new(Source::Mock, "mock-a1")],
        };
        Ok(SearchResult {
            tracks: vec![track],
            albums: vec![album],
        })
    }
}

#[async_trait]
impl PlaylistSource for MockProvider {
    async fn list_playlists(&self) -> Result<Vec<Playlist>> {
        self.check_failure()?;
        Ok(vec![Playlist {
            id: "mock-pl1".into(),
            name: "Mock Playlist".into(),
            source: Source::Mock,
            artwork_url: None,
        }])
    }

    async fn playlist_tracks(&self, playlist_id: &str) -> Result<Vec<CanonicalTrack>> {
        self.check_failure()?;
        info!("MockProvider: playlist_tracks {}", playlist_id);
        Ok(vec![
            self.track("mock-t1", "Track One", "Mock Artist", "Mock Album"),
            self.track("mock-t2", "Track Two", "Mock Artist", "Mock Album"),
        ])
    }
}

#[async_trait]
impl AlbumSource for MockProvider {
    async fn album_tracks(&self, album_id: &str) -> Result<(CanonicalAlbum, Vec<CanonicalTrack>)> {
        self.check_failure()?;
        let tracks = vec![self.track("mock-t1", "Track One", "Mock Artist", "Mock Album")];
        let album = CanonicalAlbum {
            id: album_id.to_string(),
            title: "Mock Album".into(),
            artist: "Mock Artist".into(),
            year: Some(2020),
            artwork_url: None,
            genres: Vec::new(),
            release_type: ReleaseType::Album,
            tracks: tracks.clone(),
            source_ids: vec![SourceId::new(Source::Mock, album_id)],
        };
        Ok((album, tracks))
    }
}

#[async_trait]
impl StreamSource for MockProvider {
    async fn stream_url(&self, track_id: &str) -> Result<String> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);
        self.check_failure()?;
        info!("MockProvider: stream_url {}", track_id);
        Ok(self.stream_target.clone())
    }
}

#[async_trait]
impl ReleaseLookup for MockProvider {
    async fn lookup_release(&self, title: &str, artist: &str) -> Result<Option<NormalizedRelease>> {
        self.lookup_calls.fetch_add(1, Ordering::SeqCst);
        self.check_failure()?;
        Ok(Some(
            NormalizedRelease::new(
                title,
                vec![artist.to_string()],
                ReleaseType::Album,
                SourceId::new(Source::Mock, format!("mock-lookup-{}", title)),
            )
            .with_confidence(0.8),
        ))
    }
}
