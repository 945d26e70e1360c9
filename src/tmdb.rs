use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::Result;
use crate::tmdb_cache::TmdbCache;

const TMDB_API_BASE: &str = "https://api.themoviedb.org/3";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Movie,
    Tv,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Movie => "movie",
            MediaKind::Tv => "tv",
        }
    }
}

/// One episode of an identified TV season.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeInfo {
    pub season: u32,
    pub episode: u32,
    pub name: Option<String>,
    pub runtime: Option<u32>, // minutes
}

/// Identified media content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    pub title: String,
    pub year: i32,
    pub kind: MediaKind,
    pub tmdb_id: i64,
    #[serde(default)]
    pub overview: String,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default)]
    pub season: Option<u32>,
    #[serde(default)]
    pub episodes: Vec<EpisodeInfo>,
    #[serde(default)]
    pub confidence: f32,
}

impl MediaInfo {
    pub fn is_movie(&self) -> bool {
        self.kind == MediaKind::Movie
    }

    pub fn is_tv(&self) -> bool {
        self.kind == MediaKind::Tv
    }
}

impl std::fmt::Display for MediaInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.title, self.year)
    }
}

// Documented response fields only; everything else is ignored.

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SearchResult {
    pub id: i64,
    #[serde(alias = "name")]
    pub title: String,
    #[serde(default, alias = "first_air_date")]
    pub release_date: Option<String>,
    #[serde(default)]
    pub overview: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Genre {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MovieDetails {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub release_date: Option<String>,
    #[serde(default)]
    pub overview: Option<String>,
    #[serde(default)]
    pub genres: Vec<Genre>,
    #[serde(default)]
    pub runtime: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TvDetails {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub first_air_date: Option<String>,
    #[serde(default)]
    pub overview: Option<String>,
    #[serde(default)]
    pub genres: Vec<Genre>,
    #[serde(default)]
    pub number_of_seasons: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EpisodeDetails {
    pub episode_number: u32,
    #[serde(default)]
    pub season_number: u32,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub runtime: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SeasonDetails {
    #[serde(default)]
    pub episodes: Vec<EpisodeDetails>,
}

/// Thin client for the TMDB HTTP API. Transport errors and non-2xx
/// responses are logged and surface as empty results or None; callers
/// never see a network fault from here.
pub struct TmdbClient {
    client: Client,
    api_key: String,
    language: String,
    base_url: String,
}

impl TmdbClient {
    pub fn new(config: &Config) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.tmdb_request_timeout))
            .build()
            .unwrap_or_default();

        TmdbClient {
            client,
            api_key: config.get_tmdb_api_key().unwrap_or_default(),
            language: config.tmdb_language.clone(),
            base_url: TMDB_API_BASE.to_string(),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        extra: &[(&str, String)],
    ) -> Option<T> {
        let url = format!("{}{}", self.base_url, path);
        let mut query: Vec<(&str, String)> = vec![
            ("api_key", self.api_key.clone()),
            ("language", self.language.clone()),
        ];
        query.extend_from_slice(extra);

        let response = match self.client.get(&url).query(&query).send().await {
            Ok(r) => r,
            Err(e) => {
                warn!("TMDB request failed: {e}");
                return None;
            }
        };

        if !response.status().is_success() {
            warn!("TMDB API error {} for {}", response.status(), path);
            return None;
        }

        match response.json::<T>().await {
            Ok(data) => Some(data),
            Err(e) => {
                warn!("Failed to decode TMDB response for {path}: {e}");
                None
            }
        }
    }

    pub async fn search_movie(&self, title: &str, year: Option<i32>) -> Vec<SearchResult> {
        let mut extra = vec![("query", title.to_string())];
        if let Some(year) = year {
            extra.push(("year", year.to_string()));
        }
        self.get_json::<SearchResponse>("/search/movie", &extra)
            .await
            .map(|r| r.results)
            .unwrap_or_default()
    }

    pub async fn search_tv(&self, title: &str, year: Option<i32>) -> Vec<SearchResult> {
        let mut extra = vec![("query", title.to_string())];
        if let Some(year) = year {
            extra.push(("first_air_date_year", year.to_string()));
        }
        self.get_json::<SearchResponse>("/search/tv", &extra)
            .await
            .map(|r| r.results)
            .unwrap_or_default()
    }

    pub async fn get_movie_details(&self, movie_id: i64) -> Option<MovieDetails> {
        self.get_json(&format!("/movie/{movie_id}"), &[]).await
    }

    pub async fn get_tv_details(&self, tv_id: i64) -> Option<TvDetails> {
        self.get_json(&format!("/tv/{tv_id}"), &[]).await
    }

    pub async fn get_tv_season(&self, tv_id: i64, season: u32) -> Option<SeasonDetails> {
        self.get_json(&format!("/tv/{tv_id}/season/{season}"), &[])
            .await
    }

    pub async fn get_tv_episode(
        &self,
        tv_id: i64,
        season: u32,
        episode: u32,
    ) -> Option<EpisodeDetails> {
        self.get_json(&format!("/tv/{tv_id}/season/{season}/episode/{episode}"), &[])
            .await
    }
}

/// Metadata identification service: cached search plus candidate scoring.
pub struct TmdbService {
    client: TmdbClient,
    cache: TmdbCache,
    config: Arc<Config>,
}

impl TmdbService {
    pub fn new(config: Arc<Config>) -> Result<Self> {
        let cache = TmdbCache::open(&config.tmdb_cache_db_path(), config.tmdb_cache_ttl_days)?;
        Ok(TmdbService {
            client: TmdbClient::new(&config),
            cache,
            config,
        })
    }

    pub fn cache(&self) -> &TmdbCache {
        &self.cache
    }

    async fn cached_search(&self, query: &str, kind: MediaKind) -> Vec<SearchResult> {
        if let Ok(Some(payload)) = self.cache.get(query, kind.as_str()) {
            if let Ok(results) = serde_json::from_str::<Vec<SearchResult>>(&payload) {
                return results;
            }
        }

        let results = match kind {
            MediaKind::Movie => self.client.search_movie(query, None).await,
            MediaKind::Tv => self.client.search_tv(query, None).await,
        };

        if !results.is_empty() {
            if let Ok(payload) = serde_json::to_string(&results) {
                let _ = self.cache.put(query, kind.as_str(), &payload);
            }
        }

        results
    }

    /// Identify media from a disc-derived query. Returns None when no
    /// acceptable candidate exists; network trouble looks the same as an
    /// empty result set.
    pub async fn identify(
        &self,
        query: &str,
        kind: MediaKind,
        runtime_hint: Option<u32>,
        season_hint: Option<u32>,
    ) -> Option<MediaInfo> {
        let query = query.trim();
        if query.is_empty() {
            return None;
        }

        info!("Identifying '{query}' as {}", kind.as_str());
        let results = self.cached_search(query, kind).await;
        if results.is_empty() {
            warn!("No TMDB results for '{query}'");
            return None;
        }

        let best = results
            .iter()
            .map(|r| (r, title_similarity(query, &r.title)))
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))?;

        let (candidate, mut score) = best;
        if score < 0.25 {
            debug!(
                "Best candidate '{}' scored {score:.2}, below acceptance",
                candidate.title
            );
            return None;
        }

        match kind {
            MediaKind::Movie => {
                let details = self.client.get_movie_details(candidate.id).await?;
                if let (Some(hint), Some(runtime)) = (runtime_hint, details.runtime) {
                    let delta = (i64::from(hint) - i64::from(runtime)).unsigned_abs() as f32;
                    score += (1.0 - (delta / 60.0).min(1.0)) * 0.2;
                }
                Some(MediaInfo {
                    title: details.title.clone(),
                    year: parse_year(details.release_date.as_deref()),
                    kind: MediaKind::Movie,
                    tmdb_id: details.id,
                    overview: details.overview.unwrap_or_default(),
                    genres: details.genres.into_iter().map(|g| g.name).collect(),
                    season: None,
                    episodes: Vec::new(),
                    confidence: score.min(1.0),
                })
            }
            MediaKind::Tv => {
                let details = self.client.get_tv_details(candidate.id).await?;
                let season = season_hint.unwrap_or(1);
                let episodes = self
                    .client
                    .get_tv_season(details.id, season)
                    .await
                    .map(|s| {
                        s.episodes
                            .into_iter()
                            .map(|e| EpisodeInfo {
                                season: if e.season_number > 0 { e.season_number } else { season },
                                episode: e.episode_number,
                                name: e.name,
                                runtime: e.runtime,
                            })
                            .collect()
                    })
                    .unwrap_or_default();

                Some(MediaInfo {
                    title: details.name.clone(),
                    year: parse_year(details.first_air_date.as_deref()),
                    kind: MediaKind::Tv,
                    tmdb_id: details.id,
                    overview: details.overview.unwrap_or_default(),
                    genres: details.genres.into_iter().map(|g| g.name).collect(),
                    season: Some(season),
                    episodes,
                    confidence: score.min(1.0),
                })
            }
        }
    }

    pub fn confidence_threshold(&self) -> f32 {
        self.config.confidence_threshold
    }

    /// Identify an externally produced file from its name.
    pub async fn identify_file(&self, path: &std::path::Path) -> Option<MediaInfo> {
        let (title, _year, season, episode) = parse_filename(path);
        if title.is_empty() {
            warn!("Could not extract a title from {}", path.display());
            return None;
        }

        let kind = if season.is_some() && episode.is_some() {
            MediaKind::Tv
        } else {
            MediaKind::Movie
        };
        self.identify(&title, kind, None, season).await
    }
}

/// Split a file name into (title, year, season, episode).
pub fn parse_filename(path: &std::path::Path) -> (String, Option<i32>, Option<u32>, Option<u32>) {
    let video_extensions = ["mkv", "mp4", "avi", "mov", "m4v", "webm"];
    let name = if path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| video_extensions.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
    {
        path.file_stem().unwrap_or_default().to_string_lossy().to_string()
    } else {
        path.file_name().unwrap_or_default().to_string_lossy().to_string()
    };

    // Separators first, so disc markers buried in underscore names get
    // word boundaries.
    let name = name.replace(['.', '_'], " ");
    let mut working = regex::Regex::new(r"(?i)\b(disc|disk|cd|dvd|bluray|blu-?ray)\s*\d*\b")
        .unwrap()
        .replace_all(&name, "")
        .to_string();

    let year_re = regex::Regex::new(r"\((\d{4})\)|\b(\d{4})\b").unwrap();
    let mut year = None;
    let year_match = year_re.captures(&working).map(|caps| {
        (
            caps.get(0).map(|m| m.as_str().to_string()).unwrap_or_default(),
            caps.get(1)
                .or_else(|| caps.get(2))
                .and_then(|m| m.as_str().parse::<i32>().ok()),
        )
    });
    if let Some((matched, parsed)) = year_match {
        year = parsed;
        working = working.replacen(&matched, "", 1);
    }

    let se_re = regex::Regex::new(r"[Ss](\d{1,2})[Ee](\d{1,2})|\b(\d{1,2})x(\d{1,2})\b").unwrap();
    let mut season = None;
    let mut episode = None;
    let se_match = se_re.captures(&working).map(|caps| {
        (
            caps.get(0).map(|m| m.start()).unwrap_or(0),
            caps.get(1)
                .or_else(|| caps.get(3))
                .and_then(|m| m.as_str().parse::<u32>().ok()),
            caps.get(2)
                .or_else(|| caps.get(4))
                .and_then(|m| m.as_str().parse::<u32>().ok()),
        )
    });
    if let Some((pos, parsed_season, parsed_episode)) = se_match {
        season = parsed_season;
        episode = parsed_episode;
        // Title is whatever precedes the season/episode marker
        working.truncate(pos);
    }

    let title = working
        .replace('-', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");

    (title, year, season, episode)
}

fn parse_year(date: Option<&str>) -> i32 {
    date.and_then(|d| d.get(..4))
        .and_then(|y| y.parse().ok())
        .unwrap_or(0)
}

/// Token-overlap similarity between the query and a candidate name.
/// Exact case-insensitive matches score 1.0.
pub fn title_similarity(query: &str, candidate: &str) -> f32 {
    let normalize = |s: &str| -> Vec<String> {
        s.to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect()
    };

    let query_tokens = normalize(query);
    let candidate_tokens = normalize(candidate);
    if query_tokens.is_empty() || candidate_tokens.is_empty() {
        return 0.0;
    }
    if query_tokens == candidate_tokens {
        return 1.0;
    }

    let query_set: HashSet<&String> = query_tokens.iter().collect();
    let candidate_set: HashSet<&String> = candidate_tokens.iter().collect();
    let intersection = query_set.intersection(&candidate_set).count() as f32;
    let union = query_set.union(&candidate_set).count() as f32;

    intersection / union
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_title_similarity_exact_match() {
        assert_eq!(title_similarity("blazing saddles", "Blazing Saddles"), 1.0);
    }

    #[test]
    fn test_title_similarity_partial_overlap() {
        let score = title_similarity("batman", "Batman: The Movie");
        assert!(score > 0.0 && score < 1.0);
    }

    #[test]
    fn test_title_similarity_disjoint() {
        assert_eq!(title_similarity("batman", "Gilmore Girls"), 0.0);
    }

    #[test]
    fn test_title_similarity_empty() {
        assert_eq!(title_similarity("", "anything"), 0.0);
        assert_eq!(title_similarity("___", "anything"), 0.0);
    }

    #[test]
    fn test_parse_year() {
        assert_eq!(parse_year(Some("1974-02-07")), 1974);
        assert_eq!(parse_year(Some("1966")), 1966);
        assert_eq!(parse_year(Some("")), 0);
        assert_eq!(parse_year(None), 0);
    }

    #[test]
    fn test_search_result_name_alias() {
        // /search/tv returns "name" and "first_air_date"
        let json = r#"{"id":2287,"name":"Batman","first_air_date":"1966-01-12"}"#;
        let result: SearchResult = serde_json::from_str(json).unwrap();
        assert_eq!(result.title, "Batman");
        assert_eq!(result.release_date.as_deref(), Some("1966-01-12"));
    }

    #[test]
    fn test_parse_filename_movie_with_year() {
        let (title, year, season, episode) =
            parse_filename(std::path::Path::new("/x/Blazing Saddles (1974).mkv"));
        assert_eq!(title, "Blazing Saddles");
        assert_eq!(year, Some(1974));
        assert_eq!(season, None);
        assert_eq!(episode, None);
    }

    #[test]
    fn test_parse_filename_tv_episode() {
        let (title, _year, season, episode) =
            parse_filename(std::path::Path::new("/x/Batman.S01E03.mkv"));
        assert_eq!(title, "Batman");
        assert_eq!(season, Some(1));
        assert_eq!(episode, Some(3));
    }

    #[test]
    fn test_parse_filename_nxm_pattern() {
        let (title, _year, season, episode) =
            parse_filename(std::path::Path::new("/x/Batman 1x03.mkv"));
        assert_eq!(title, "Batman");
        assert_eq!(season, Some(1));
        assert_eq!(episode, Some(3));
    }

    #[test]
    fn test_parse_filename_strips_disc_markers() {
        let (title, ..) = parse_filename(std::path::Path::new("/x/Some_Movie_DVD_1.mkv"));
        assert_eq!(title, "Some Movie");
    }

    #[test]
    fn test_media_info_serde_round_trip() {
        let info = MediaInfo {
            title: "Batman".to_string(),
            year: 1966,
            kind: MediaKind::Tv,
            tmdb_id: 2287,
            overview: "Caped crusader".to_string(),
            genres: vec!["Action".to_string(), "Comedy".to_string()],
            season: Some(1),
            episodes: vec![EpisodeInfo {
                season: 1,
                episode: 1,
                name: Some("Hi Diddle Riddle".to_string()),
                runtime: Some(25),
            }],
            confidence: 0.9,
        };

        let json = serde_json::to_string(&info).unwrap();
        let parsed: MediaInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, info);
        assert!(parsed.is_tv());
        assert_eq!(parsed.to_string(), "Batman (1966)");
    }
}
