use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use strsim::normalized_levenshtein;
use tracing::debug;

use crate::config::MatcherConfig;
use crate::models::{CanonicalAlbum, ReleaseType, SourceId};

/// The matcher's working currency: one release as reported by one
/// provider, normalized enough to compare against other providers' view of
/// the same real-world release.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedRelease {
    /// `normalized_title::normalized_artist`, used for exact-key checks.
    pub fingerprint: String,
    pub title: String,
    pub artists: Vec<String>,
    pub release_type: ReleaseType,
    pub year: Option<u32>,
    pub ids: Vec<SourceId>,
    /// How much the contributing provider trusts this record, 0..=1.
    pub confidence: f64,
    pub genres: Vec<String>,
    pub artwork_url: Option<String>,
}

impl NormalizedRelease {
    pub fn new(
        title: &str,
        artists: Vec<String>,
        release_type: ReleaseType,
        id: SourceId,
    ) -> Self {
        let primary = artists.first().map(String::as_str).unwrap_or("");
        let fingerprint = format!("{}::{}", normalize(title), normalize(primary));
        Self {
            fingerprint,
            title: title.to_string(),
            artists,
            release_type,
            year: None,
            ids: vec![id],
            confidence: 1.0,
            genres: Vec::new(),
            artwork_url: None,
        }
    }

    pub fn with_year(mut self, year: Option<u32>) -> Self {
        self.year = year;
        self
    }

    pub fn with_artwork(mut self, artwork_url: Option<String>) -> Self {
        self.artwork_url = artwork_url;
        self
    }

    pub fn with_genres(mut self, genres: Vec<String>) -> Self {
        self.genres = genres;
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    fn priority(&self) -> u8 {
        self.ids
            .iter()
            .map(|s| s.source.priority())
            .min()
            .unwrap_or(u8::MAX)
    }
}

static PARENTHETICAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*[(\[][^)\]]*[)\]]\s*$").expect("static regex"));
static PUNCT: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w\s]").expect("static regex"));

/// Lowercase, drop trailing parenthetical disambiguation ("(Deluxe
/// Edition)", "[Remastered]"), strip punctuation, collapse whitespace.
pub fn normalize(s: &str) -> String {
    let lower = s.to_lowercase();
    let no_paren = PARENTHETICAL.replace_all(lower.trim(), "");
    let no_punct = PUNCT.replace_all(&no_paren, "");
    no_punct.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Jaccard similarity over word tokens; backs up edit distance for artist
/// strings where word order and extra credits vary wildly between
/// catalogs.
fn token_jaccard(a: &str, b: &str) -> f64 {
    let ta: HashSet<&str> = a.split_whitespace().collect();
    let tb: HashSet<&str> = b.split_whitespace().collect();
    if ta.is_empty() || tb.is_empty() {
        return 0.0;
    }
    let inter = ta.intersection(&tb).count();
    let uni = ta.union(&tb).count();
    inter as f64 / uni as f64
}

/// Combined title+artist similarity between two normalized fingerprint
/// halves. Title dominates; the artist leg takes the better of edit
/// distance and token overlap.
fn release_similarity(a: &NormalizedRelease, b: &NormalizedRelease) -> f64 {
    let (ta, aa) = split_fingerprint(&a.fingerprint);
    let (tb, ab) = split_fingerprint(&b.fingerprint);
    let title = normalized_levenshtein(ta, tb);
    let artist = normalized_levenshtein(aa, ab).max(token_jaccard(aa, ab));
    0.6 * title + 0.4 * artist
}

fn split_fingerprint(fp: &str) -> (&str, &str) {
    fp.split_once("::").unwrap_or((fp, ""))
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct MatcherStats {
    pub total: usize,
    pub exact_matches: usize,
    pub fuzzy_matches: usize,
    pub new_entries: usize,
}

/// Order-sensitive record-linkage accumulator. Releases fed first anchor
/// the merge groups, so the caller feeds primary-provider results before
/// metadata-only ones and primary ids win representative selection.
pub struct ReleaseMatcher {
    threshold: f64,
    groups: Vec<NormalizedRelease>,
    stats: MatcherStats,
}

impl ReleaseMatcher {
    pub fn new(cfg: &MatcherConfig) -> Self {
        Self {
            threshold: cfg.threshold,
            groups: Vec::new(),
            stats: MatcherStats::default(),
        }
    }

    pub fn with_threshold(threshold: f64) -> Self {
        Self {
            threshold,
            groups: Vec::new(),
            stats: MatcherStats::default(),
        }
    }

    /// Merge `release` into the best-scoring existing group, or append it
    /// as a new group when nothing clears the threshold.
    pub fn add_or_merge(&mut self, release: NormalizedRelease) {
        self.stats.total += 1;

        let mut best: Option<(usize, f64)> = None;
        for (i, group) in self.groups.iter().enumerate() {
            let score = release_similarity(group, &release);
            if score >= self.threshold && best.map(|(_, s)| score > s).unwrap_or(true) {
                best = Some((i, score));
            }
        }

        match best {
            Some((idx, score)) => {
                let exact = self.groups[idx].fingerprint == release.fingerprint;
                debug!(
                    score,
                    exact,
                    title = %release.title,
                    "matcher: merged into existing group"
                );
                if exact {
                    self.stats.exact_matches += 1;
                } else {
                    self.stats.fuzzy_matches += 1;
                }
                Self::merge_into(&mut self.groups[idx], release);
            }
            None => {
                self.stats.new_entries += 1;
                self.groups.push(release);
            }
        }
    }

    fn merge_into(group: &mut NormalizedRelease, incoming: NormalizedRelease) {
        let group_wins = group.priority() <= incoming.priority();

        for id in incoming.ids {
            if !group.ids.contains(&id) {
                group.ids.push(id);
            }
        }
        for g in incoming.genres {
            if !group.genres.contains(&g) {
                group.genres.push(g);
            }
        }
        // Scalars present on both sides: keep the higher-priority
        // provider's value. Present on one side only: take it.
        match (group.year, incoming.year) {
            (Some(_), Some(y)) if !group_wins => group.year = Some(y),
            (None, Some(y)) => group.year = Some(y),
            _ => {}
        }
        match (&group.artwork_url, incoming.artwork_url) {
            (Some(_), Some(a)) if !group_wins => group.artwork_url = Some(a),
            (None, Some(a)) => group.artwork_url = Some(a),
            _ => {}
        }
        if group.release_type == ReleaseType::Unknown {
            group.release_type = incoming.release_type;
        }
        group.confidence = group.confidence.max(incoming.confidence);
    }

    pub fn stats(&self) -> MatcherStats {
        self.stats
    }

    pub fn groups(&self) -> &[NormalizedRelease] {
        &self.groups
    }

    /// Convert merged groups to albums. Each album's representative id is
    /// the highest-priority member source id; `source_ids` keeps every
    /// contributing reference.
    pub fn into_albums(self) -> Vec<CanonicalAlbum> {
        self.groups
            .into_iter()
            .map(|g| {
                let rep = g
                    .ids
                    .iter()
                    .min_by_key(|s| s.source.priority())
                    .cloned()
                    .expect("matcher group always holds at least one id");
                CanonicalAlbum {
                    id: rep.id.clone(),
                    title: g.title,
                    artist: g.artists.into_iter().next().unwrap_or_default(),
                    year: g.year,
                    artwork_url: g.artwork_url,
                    genres: g.genres,
                    release_type: g.release_type,
                    tracks: Vec::new(),
                    source_ids: g.ids,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Source;

    fn rel(title: &str, artist: &str, source: Source, id: &str) -> NormalizedRelease {
        NormalizedRelease::new(
            title,
            vec![artist.to_string()],
            ReleaseType::Album,
            SourceId::new(source, id),
        )
    }

    #[test]
    fn normalize_strips_suffix_and_punctuation() {
        assert_eq!(normalize("OK Computer (Remastered 2017)"), "ok computer");
        assert_eq!(normalize("R.E.M."), "rem");
        assert_eq!(normalize("  Weird   Spacing "), "weird spacing");
    }

    #[test]
    fn identical_keys_merge_exactly() {
        let mut m = ReleaseMatcher::with_threshold(0.85);
        m.add_or_merge(rel("In Rainbows", "Radiohead", Source::Pandora, "p1"));
        m.add_or_merge(rel("In Rainbows", "Radiohead", Source::Itunes, "i1"));
        let st = m.stats();
        assert_eq!(st.exact_matches, 1);
        assert_eq!(st.new_entries, 1);
        assert_eq!(m.groups().len(), 1);
        assert_eq!(m.groups()[0].ids.len(), 2);
    }

    #[test]
    fn near_identical_strings_merge_fuzzily() {
        let mut m = ReleaseMatcher::with_threshold(0.85);
        m.add_or_merge(rel("In Rainbows", "Radiohead", Source::Pandora, "p1"));
        m.add_or_merge(rel("In Rainbows (Deluxe Edition)", "Radiohead ", Source::Deezer, "d1"));
        let st = m.stats();
        // Parenthetical strip makes the keys identical, so this lands exact.
        assert_eq!(st.exact_matches + st.fuzzy_matches, 1);
        assert_eq!(m.groups().len(), 1);
        let ids: Vec<_> = m.groups()[0].ids.iter().map(|s| s.id.as_str()).collect();
        assert!(ids.contains(&"p1") && ids.contains(&"d1"));
    }

    #[test]
    fn typo_merges_as_fuzzy() {
        let mut m = ReleaseMatcher::with_threshold(0.85);
        m.add_or_merge(rel("Kid A", "Radiohead", Source::Pandora, "p1"));
        m.add_or_merge(rel("Kid A", "Radioheed", Source::Deezer, "d1"));
        assert_eq!(m.stats().fuzzy_matches, 1);
        assert_eq!(m.groups().len(), 1);
    }

    #[test]
    fn dissimilar_release_starts_new_group() {
        let mut m = ReleaseMatcher::with_threshold(0.85);
        m.add_or_merge(rel("In Rainbows", "Radiohead", Source::Pandora, "p1"));
        m.add_or_merge(rel("Blackstar", "David Bowie", Source::Deezer, "d1"));
        let st = m.stats();
        assert_eq!(st.new_entries, 2);
        assert_eq!(st.exact_matches + st.fuzzy_matches, 0);
        assert_eq!(m.groups().len(), 2);
    }

    #[test]
    fn representative_id_is_highest_priority_source() {
        let mut m = ReleaseMatcher::with_threshold(0.85);
        // Metadata provider first, then primary: primary still wins the id
        // because priority decides, but the first-fed group anchors.
        m.add_or_merge(rel("Amnesiac", "Radiohead", Source::Deezer, "d9"));
        m.add_or_merge(rel("Amnesiac", "Radiohead", Source::Pandora, "p9"));
        let albums = m.into_albums();
        assert_eq!(albums.len(), 1);
        assert_eq!(albums[0].id, "p9");
        assert_eq!(albums[0].source_ids.len(), 2);
        assert!(albums[0].source_ids.iter().any(|s| s.id == albums[0].id));
    }

    #[test]
    fn scalar_conflicts_resolve_by_priority() {
        let mut m = ReleaseMatcher::with_threshold(0.85);
        m.add_or_merge(
            rel("Amnesiac", "Radiohead", Source::Deezer, "d9").with_year(Some(2000)),
        );
        m.add_or_merge(
            rel("Amnesiac", "Radiohead", Source::Pandora, "p9").with_year(Some(2001)),
        );
        let albums = m.into_albums();
        assert_eq!(albums[0].year, Some(2001));
    }

    #[test]
    fn genres_union_without_duplicates() {
        let mut m = ReleaseMatcher::with_threshold(0.85);
        m.add_or_merge(
            rel("Amnesiac", "Radiohead", Source::Pandora, "p9")
                .with_genres(vec!["rock".into()]),
        );
        m.add_or_merge(
            rel("Amnesiac", "Radiohead", Source::Deezer, "d9")
                .with_genres(vec!["rock".into(), "electronic".into()]),
        );
        assert_eq!(m.groups()[0].genres, vec!["rock", "electronic"]);
    }
}
