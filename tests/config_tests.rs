use std::io::Write;

use polytone::config::Config;

#[test]
fn minimal_config_fills_defaults() {
    let mut f = tempfile::NamedTempFile::new().unwrap();
    write!(
        f,
        r#"
[pandora]
username = "listener@example.com"
password = "hunter2"

[ytmusic]
"#
    )
    .unwrap();

    let cfg = Config::from_path(f.path()).unwrap();
    let pandora = cfg.pandora.expect("pandora section");
    assert_eq!(pandora.username, "listener@example.com");
    assert_eq!(pandora.requests_per_second, 2.0);
    assert_eq!(pandora.burst, 5);
    assert_eq!(pandora.max_retries, 3);

    let ytmusic = cfg.ytmusic.expect("ytmusic section");
    assert_eq!(ytmusic.ytdlp_bin, "yt-dlp");
    assert_eq!(ytmusic.search_limit, 5);

    assert!(cfg.itunes.is_none());
    assert!(cfg.deezer.is_none());
    assert_eq!(cfg.stream.max_cache_entries, 16);
    assert_eq!(cfg.matcher.threshold, 0.85);
    assert_eq!(cfg.matcher.max_album_lookups, 8);
}

#[test]
fn explicit_values_override_defaults() {
    let mut f = tempfile::NamedTempFile::new().unwrap();
    write!(
        f,
        r#"
[itunes]
requests_per_second = 0.5
max_retries = 1

[deezer]
enabled = false

[stream]
max_cache_entries = 4

[matcher]
threshold = 0.9
"#
    )
    .unwrap();

    let cfg = Config::from_path(f.path()).unwrap();
    let itunes = cfg.itunes.expect("itunes section");
    assert!(itunes.enabled);
    assert_eq!(itunes.requests_per_second, 0.5);
    assert_eq!(itunes.max_retries, 1);
    assert!(!cfg.deezer.expect("deezer section").enabled);
    assert_eq!(cfg.stream.max_cache_entries, 4);
    assert_eq!(cfg.matcher.threshold, 0.9);
}

#[test]
fn missing_file_is_an_error() {
    assert!(Config::from_path(std::path::Path::new("/nonexistent/polytone.toml")).is_err());
}
