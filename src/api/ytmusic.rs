use std::collections::HashMap;
use std::process::Stdio;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use super::{AlbumSource, Provider, Searchable, StreamSource};
use crate::config::YtMusicConfig;
use crate::models::{
    CanonicalAlbum, CanonicalTrack, ReleaseType, SearchResult, Source, SourceId,
};

/// Video-platform music catalog, reached through the yt-dlp extraction
/// tool as a subprocess. No credentials needed; every operation is one
/// spawned process emitting JSON on stdout.
pub struct YtMusicProvider {
    bin: String,
    search_limit: usize,
}

impl YtMusicProvider {
    pub fn new(cfg: &YtMusicConfig) -> Self {
        Self {
            bin: cfg.ytdlp_bin.clone(),
            search_limit: cfg.search_limit,
        }
    }

    async fn run(&self, args: &[&str]) -> Result<String> {
        debug!(bin = %self.bin, ?args, "spawning extractor");
        let out = tokio::process::Command::new(&self.bin)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .with_context(|| format!("failed to spawn {}", self.bin))?;
        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr);
            return Err(anyhow!(
                "{} exited with {}: {}",
                self.bin,
                out.status,
                stderr.trim()
            ));
        }
        Ok(String::from_utf8_lossy(&out.stdout).into_owned())
    }

    fn track_from_entry(entry: &Value) -> Option<CanonicalTrack> {
        let id = entry["id"].as_str()?;
        let artist = entry["artist"]
            .as_str()
            .or_else(|| entry["uploader"].as_str())
            .or_else(|| entry["channel"].as_str())
            .unwrap_or("")
            .to_string();
        Some(CanonicalTrack {
            id: id.to_string(),
            title: entry["title"].as_str().unwrap_or("").to_string(),
            artist,
            album: entry["album"].as_str().unwrap_or("").to_string(),
            duration_secs: entry["duration"].as_f64().map(|d| d as u32),
            artwork_url: entry["thumbnail"].as_str().map(|s| s.to_string()),
            source_id: SourceId::new(Source::YtMusic, id),
        })
    }

    /// Search results come back track-by-track; releases are reconstructed
    /// by grouping on the album tag. The first member's video id stands in
    /// as the album id, which is enough for later re-resolution.
    fn group_albums(tracks: &[CanonicalTrack]) -> Vec<CanonicalAlbum> {
        let mut grouped: HashMap<String, CanonicalAlbum> = HashMap::new();
        let mut order: Vec<String> = Vec::new();
        for t in tracks {
            if t.album.is_empty() {
                continue;
            }
            let key = format!("{}::{}", t.album.to_lowercase(), t.artist.to_lowercase());
            let album = grouped.entry(key.clone()).or_insert_with(|| {
                order.push(key);
                CanonicalAlbum {
                    id: t.id.clone(),
                    title: t.album.clone(),
                    artist: t.artist.clone(),
                    year: None,
                    artwork_url: t.artwork_url.clone(),
                    genres: Vec::new(),
                    release_type: ReleaseType::Unknown,
                    tracks: Vec::new(),
                    source_ids: vec![SourceId::new(Source::YtMusic, t.id.clone())],
                }
            });
            album.tracks.push(t.clone());
        }
        order
            .into_iter()
            .filter_map(|k| grouped.remove(&k))
            .collect()
    }
}

impl Provider for YtMusicProvider {
    fn source(&self) -> Source {
        Source::YtMusic
    }
    fn is_authenticated(&self) -> bool {
        true
    }
    fn as_searchable(&self) -> Option<&dyn Searchable> {
        Some(self)
    }
    fn as_album_source(&self) -> Option<&dyn AlbumSource> {
        Some(self)
    }
    fn as_stream_source(&self) -> Option<&dyn StreamSource> {
        Some(self)
    }
}

#[async_trait]
impl Searchable for YtMusicProvider {
    async fn search(&self, query: &str) -> Result<SearchResult> {
        let target = format!("ytsearch{}:{}", self.search_limit, query);
        let stdout = self
            .run(&["--dump-json", "--no-warnings", &target])
            .await?;
        let mut tracks = Vec::new();
        for line in stdout.lines().filter(|l| !l.trim().is_empty()) {
            match serde_json::from_str::<Value>(line) {
                Ok(entry) => {
                    if let Some(t) = Self::track_from_entry(&entry) {
                        tracks.push(t);
                    }
                }
                Err(e) => warn!("unparseable extractor output line: {}", e),
            }
        }
        let albums = Self::group_albums(&tracks);
        Ok(SearchResult { tracks, albums })
    }
}

#[async_trait]
impl AlbumSource for YtMusicProvider {
    async fn album_tracks(&self, album_id: &str) -> Result<(CanonicalAlbum, Vec<CanonicalTrack>)> {
        // Album/playlist ids get the playlist endpoint; bare video ids fall
        // back to a single-entry "album".
        let url = if album_id.starts_with("OLAK") || album_id.starts_with("PL") {
            format!("https://music.youtube.com/playlist?list={}", album_id)
        } else {
            format!("https://music.youtube.com/watch?v={}", album_id)
        };
        let stdout = self
            .run(&["--dump-json", "--no-warnings", "--flat-playlist", &url])
            .await?;
        let mut tracks = Vec::new();
        for line in stdout.lines().filter(|l| !l.trim().is_empty()) {
            if let Ok(entry) = serde_json::from_str::<Value>(line) {
                if let Some(t) = Self::track_from_entry(&entry) {
                    tracks.push(t);
                }
            }
        }
        let first = tracks
            .first()
            .ok_or_else(|| anyhow!("album '{}' resolved to no tracks", album_id))?;
        let album = CanonicalAlbum {
            id: album_id.to_string(),
            title: first.album.clone(),
            artist: first.artist.clone(),
            year: None,
            artwork_url: first.artwork_url.clone(),
            genres: Vec::new(),
            release_type: ReleaseType::Unknown,
            tracks: tracks.clone(),
            source_ids: vec![SourceId::new(Source::YtMusic, album_id)],
        };
        Ok((album, tracks))
    }
}

#[async_trait]
impl StreamSource for YtMusicProvider {
    async fn stream_url(&self, track_id: &str) -> Result<String> {
        let url = format!("https://music.youtube.com/watch?v={}", track_id);
        let stdout = self
            .run(&["--get-url", "-f", "bestaudio", "--no-warnings", &url])
            .await?;
        stdout
            .lines()
            .find(|l| !l.trim().is_empty())
            .map(|l| l.trim().to_string())
            .ok_or_else(|| anyhow!("extractor returned no stream url for '{}'", track_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(id: &str, title: &str, artist: &str, album: &str) -> CanonicalTrack {
        CanonicalTrack {
            id: id.into(),
            title: title.into(),
            artist: artist.into(),
            album: album.into(),
            duration_secs: None,
            artwork_url: None,
            source_id: SourceId::new(Source::YtMusic, id),
        }
    }

    #[test]
    fn albums_group_by_album_and_artist() {
        let tracks = vec![
            track("v1", "Airbag", "Radiohead", "OK Computer"),
            track("v2", "Paranoid Android", "Radiohead", "OK Computer"),
            track("v3", "Single B-Side", "Radiohead", ""),
            track("v4", "Elsewhere", "Other Band", "OK Computer"),
        ];
        let albums = YtMusicProvider::group_albums(&tracks);
        assert_eq!(albums.len(), 2);
        assert_eq!(albums[0].id, "v1");
        assert_eq!(albums[0].tracks.len(), 2);
        assert_eq!(albums[1].artist, "Other Band");
    }
}
