use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// External provider tag. The set is fixed; composite ids reference it by
/// its lowercase wire name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Pandora,
    YtMusic,
    Itunes,
    Deezer,
    Mock,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Pandora => "pandora",
            Source::YtMusic => "ytmusic",
            Source::Itunes => "itunes",
            Source::Deezer => "deezer",
            Source::Mock => "mock",
        }
    }

    /// Fixed merge-priority ranking: lower rank wins representative-id and
    /// scalar-field ties in the matcher.
    pub fn priority(&self) -> u8 {
        match self {
            Source::Pandora => 0,
            Source::YtMusic => 1,
            Source::Itunes => 2,
            Source::Deezer => 3,
            Source::Mock => 4,
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Source {
    type Err = CoreError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pandora" => Ok(Source::Pandora),
            "ytmusic" => Ok(Source::YtMusic),
            "itunes" => Ok(Source::Itunes),
            "deezer" => Ok(Source::Deezer),
            "mock" => Ok(Source::Mock),
            other => Err(CoreError::CompositeIdParse(format!(
                "unknown source '{}'",
                other
            ))),
        }
    }
}

/// Stable reference to one item on one external provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceId {
    pub source: Source,
    pub id: String,
}

impl SourceId {
    pub fn new(source: Source, id: impl Into<String>) -> Self {
        Self {
            source,
            id: id.into(),
        }
    }

    /// Encode as the opaque composite form `source:identifier`.
    pub fn encode(&self) -> String {
        format!("{}:{}", self.source, self.id)
    }

    /// Parse a composite id. Everything after the first colon is the
    /// identifier, which may itself contain colons. A bare string with no
    /// colon is a pandora id, kept for backward compatibility with older
    /// clients.
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s.split_once(':') {
            Some((src, rest)) => Ok(SourceId {
                source: src.parse()?,
                id: rest.to_string(),
            }),
            None => Ok(SourceId {
                source: Source::Pandora,
                id: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source, self.id)
    }
}

/// One playable unit as seen by a single provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalTrack {
    pub id: String,
    pub title: String,
    pub artist: String,
    pub album: String,
    pub duration_secs: Option<u32>,
    pub artwork_url: Option<String>,
    pub source_id: SourceId,
}

/// Release type hint carried through matching.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReleaseType {
    Album,
    Single,
    Ep,
    Compilation,
    #[default]
    Unknown,
}

/// One release, possibly merged from several providers. `source_ids` is
/// never empty and `id` always equals one of its members' ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalAlbum {
    pub id: String,
    pub title: String,
    pub artist: String,
    pub year: Option<u32>,
    pub artwork_url: Option<String>,
    pub genres: Vec<String>,
    pub release_type: ReleaseType,
    pub tracks: Vec<CanonicalTrack>,
    pub source_ids: Vec<SourceId>,
}

/// Remote playlist (a pandora station, a ytmusic playlist, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Playlist {
    pub id: String,
    pub name: String,
    pub source: Source,
    pub artwork_url: Option<String>,
}

/// Aggregate output of a multi-provider search.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchResult {
    pub tracks: Vec<CanonicalTrack>,
    pub albums: Vec<CanonicalAlbum>,
}
