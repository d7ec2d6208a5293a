pub mod deezer;
pub mod itunes;
pub mod mock;
pub mod pandora;
pub mod pandora_protocol;
pub mod ytmusic;

use anyhow::Result;

use crate::matcher::NormalizedRelease;
use crate::models::{CanonicalAlbum, CanonicalTrack, Playlist, SearchResult, Source};

/// Full-text search across a provider's catalog.
#[async_trait::async_trait]
pub trait Searchable: Send + Sync {
    async fn search(&self, query: &str) -> Result<SearchResult>;
}

/// Playlist enumeration and expansion (a pandora station is a playlist).
#[async_trait::async_trait]
pub trait PlaylistSource: Send + Sync {
    async fn list_playlists(&self) -> Result<Vec<Playlist>>;
    async fn playlist_tracks(&self, playlist_id: &str) -> Result<Vec<CanonicalTrack>>;
}

/// Album expansion into its track list.
#[async_trait::async_trait]
pub trait AlbumSource: Send + Sync {
    async fn album_tracks(&self, album_id: &str) -> Result<(CanonicalAlbum, Vec<CanonicalTrack>)>;
}

/// Resolution of one track id to a playable URL.
#[async_trait::async_trait]
pub trait StreamSource: Send + Sync {
    async fn stream_url(&self, track_id: &str) -> Result<String>;
}

/// Metadata-only providers answer targeted "find this exact release"
/// lookups instead of full-text search; one result per query.
#[async_trait::async_trait]
pub trait ReleaseLookup: Send + Sync {
    async fn lookup_release(&self, title: &str, artist: &str) -> Result<Option<NormalizedRelease>>;
}

/// A provider declares which capability interfaces it implements; the
/// dispatcher does a typed lookup per operation instead of probing at
/// runtime. The defaults return `None` so an adapter only overrides what
/// it actually supports.
pub trait Provider: Send + Sync {
    fn source(&self) -> Source;

    /// Provider name (for logging, stats).
    fn name(&self) -> &'static str {
        self.source().as_str()
    }

    /// True once credentials are present and usable.
    fn is_authenticated(&self) -> bool;

    fn as_searchable(&self) -> Option<&dyn Searchable> {
        None
    }
    fn as_playlist_source(&self) -> Option<&dyn PlaylistSource> {
        None
    }
    fn as_album_source(&self) -> Option<&dyn AlbumSource> {
        None
    }
    fn as_stream_source(&self) -> Option<&dyn StreamSource> {
        None
    }
    fn as_release_lookup(&self) -> Option<&dyn ReleaseLookup> {
        None
    }
}
