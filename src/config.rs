use serde::Deserialize;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub pandora: Option<PandoraConfig>,
    #[serde(default)]
    pub ytmusic: Option<YtMusicConfig>,
    #[serde(default)]
    pub itunes: Option<MetadataProviderConfig>,
    #[serde(default)]
    pub deezer: Option<MetadataProviderConfig>,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub matcher: MatcherConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PandoraConfig {
    pub username: String,
    pub password: String,
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: f64,
    #[serde(default = "default_burst")]
    pub burst: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct YtMusicConfig {
    /// Path or name of the yt-dlp binary.
    #[serde(default = "default_ytdlp_bin")]
    pub ytdlp_bin: String,
    #[serde(default = "default_search_limit")]
    pub search_limit: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MetadataProviderConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: f64,
    #[serde(default = "default_burst")]
    pub burst: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for MetadataProviderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_second: default_requests_per_second(),
            burst: default_burst(),
            max_retries: default_max_retries(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StreamConfig {
    /// Maximum number of cached audio entries kept in memory.
    #[serde(default = "default_cache_entries")]
    pub max_cache_entries: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            max_cache_entries: default_cache_entries(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct MatcherConfig {
    /// Similarity score at or above which two releases merge.
    #[serde(default = "default_match_threshold")]
    pub threshold: f64,
    /// How many targeted album lookups one search may issue.
    #[serde(default = "default_max_album_lookups")]
    pub max_album_lookups: usize,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            threshold: default_match_threshold(),
            max_album_lookups: default_max_album_lookups(),
        }
    }
}

fn default_requests_per_second() -> f64 {
    2.0
}
fn default_burst() -> u32 {
    5
}
fn default_max_retries() -> u32 {
    3
}
fn default_ytdlp_bin() -> String {
    "yt-dlp".into()
}
fn default_search_limit() -> usize {
    5
}
fn default_enabled() -> bool {
    true
}
fn default_cache_entries() -> usize {
    16
}
fn default_match_threshold() -> f64 {
    0.85
}
fn default_max_album_lookups() -> usize {
    8
}

impl Config {
    pub fn from_path(path: &std::path::Path) -> anyhow::Result<Self> {
        let s = std::fs::read_to_string(path)?;
        let cfg: Config = toml::from_str(&s)?;
        Ok(cfg)
    }
}
