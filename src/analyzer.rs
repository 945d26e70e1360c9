use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::{Config, EpisodeMappingStrategy};
use crate::disc_metadata::{is_generic_label, EnhancedDiscMetadata, MetadataExtractor};
use crate::error::{Result, SpindleError};
use crate::monitor::DiscInfo;
use crate::ripper::{Title, TrackKind};
use crate::series_cache::SeriesCache;
use crate::tmdb::{MediaInfo, MediaKind, TmdbService};

const MOVIE_CONFIDENCE_BASE: f32 = 0.60;
const TV_CONFIDENCE_BASE: f32 = 0.55;

/// Classified disc content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Movie,
    TvSeries,
    Unknown,
}

impl std::fmt::Display for ContentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContentKind::Movie => f.write_str("movie"),
            ContentKind::TvSeries => f.write_str("tv_series"),
            ContentKind::Unknown => f.write_str("unknown"),
        }
    }
}

/// Season/episode slot a planned title maps to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeAssignment {
    pub season: u32,
    pub episode: u32,
    pub episode_title: Option<String>,
}

/// One title the ripper should pull, with its track choices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedTitle {
    pub title_id: String,
    pub name: String,
    pub duration: u64,
    pub selected_tracks: Vec<String>,
    #[serde(default)]
    pub commentary_tracks: Vec<String>,
    #[serde(default)]
    pub episode: Option<EpisodeAssignment>,
    #[serde(default)]
    pub is_extra: bool,
}

/// The analyzer's decision record: what to rip and how it maps to the
/// identified content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RipPlan {
    pub content_kind: ContentKind,
    pub confidence: f32,
    pub titles: Vec<PlannedTitle>,
    pub media_info: Option<MediaInfo>,
    #[serde(default)]
    pub multi_disc: bool,
}

/// Analysis output handed back to the orchestrator.
#[derive(Debug, Clone)]
pub struct DiscAnalysisResult {
    pub primary_title: String,
    pub runtime_hint: Option<u32>,
    pub plan: RipPlan,
    pub enhanced: Option<EnhancedDiscMetadata>,
}

/// Normalise a volume label for identification: case-fold, underscores
/// and dots to spaces, media-format tokens removed, whitespace collapsed.
pub fn clean_label(label: &str) -> String {
    let lowered = label.to_lowercase().replace(['_', '.'], " ");
    let cleaned = Regex::new(r"\b(disc|dvd|bluray|blu-ray|complete|collection|box set)\b")
        .unwrap()
        .replace_all(&lowered, " ");
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Generic after cleaning means the label is useless for identification.
pub fn is_generic_cleaned_label(label: &str) -> bool {
    if label.is_empty() {
        return true;
    }
    // Remaining digit-only fragments ("1", "2 1") carry no signal either
    if label
        .split_whitespace()
        .all(|t| t.chars().all(|c| c.is_ascii_digit()))
    {
        return true;
    }
    is_generic_label(&label.replace(' ', "_"))
}

/// `season N` / `sNN` markers in a cleaned label.
pub fn detect_season_hint(label: &str) -> Option<u32> {
    let lower = label.to_lowercase();
    for pattern in [r"season\s+(\d+)", r"\bs(\d{1,2})\b"] {
        if let Some(caps) = Regex::new(pattern).unwrap().captures(&lower) {
            if let Ok(season) = caps[1].parse() {
                return Some(season);
            }
        }
    }
    None
}

/// `disc N` markers, for multi-disc sets.
pub fn detect_disc_hint(label: &str) -> Option<u32> {
    let lower = label.to_lowercase().replace(['_', '.'], " ");
    Regex::new(r"\bdisc\s*(\d+)\b")
        .unwrap()
        .captures(&lower)
        .and_then(|caps| caps[1].parse().ok())
}

/// Titles in the TV window whose durations cluster around the median
/// within ten minutes. Three or more clustered titles read as a season
/// disc.
pub fn find_tv_candidates<'a>(titles: &'a [Title], window: (u64, u64)) -> Vec<&'a Title> {
    let (tv_min, tv_max) = window;
    let mut candidates: Vec<&Title> = titles
        .iter()
        .filter(|t| t.duration >= tv_min && t.duration <= tv_max)
        .collect();

    if candidates.len() < 3 {
        return Vec::new();
    }

    candidates.sort_by_key(|t| t.duration);
    let median = candidates[candidates.len() / 2].duration as i64;

    let clustered: Vec<&Title> = titles
        .iter()
        .filter(|t| {
            t.duration >= tv_min
                && t.duration <= tv_max
                && (t.duration as i64 - median).abs() <= 10 * 60
        })
        .collect();

    if clustered.len() >= 3 {
        clustered
    } else {
        Vec::new()
    }
}

/// Every title in the TV window, or all titles when none fit. Used when
/// metadata says TV but the clustering heuristic found nothing.
fn fallback_tv_candidates<'a>(titles: &'a [Title], window: (u64, u64)) -> Vec<&'a Title> {
    let (tv_min, tv_max) = window;
    let in_window: Vec<&Title> = titles
        .iter()
        .filter(|t| t.duration >= tv_min && t.duration <= tv_max)
        .collect();
    if in_window.is_empty() {
        titles.iter().collect()
    } else {
        in_window
    }
}

/// Codec preference for picking a single main audio track.
fn codec_rank(codec: &str) -> u8 {
    let upper = codec.to_uppercase();
    if upper.contains("DTS-HD") {
        0
    } else if upper.contains("TRUEHD") || upper.contains("TRUE HD") {
        1
    } else if upper.contains("AC3") || upper.contains("AC-3") {
        2
    } else if upper.contains("AAC") {
        3
    } else {
        4
    }
}

/// Per-title track selection. Video always; audio per configuration;
/// subtitles excluded; duplicates dropped preserving first occurrence.
pub fn select_tracks(title: &Title, config: &Config) -> Vec<String> {
    let mut selected: Vec<String> = title
        .video_tracks()
        .iter()
        .map(|t| t.track_id.clone())
        .collect();

    if config.include_all_english_audio {
        let audio = if config.include_commentary_tracks {
            title.english_audio_tracks()
        } else {
            title.main_audio_tracks()
        };
        selected.extend(audio.iter().map(|t| t.track_id.clone()));
    } else {
        // Single best main track by codec preference, ties broken by
        // order of appearance.
        let main = title.main_audio_tracks();
        if let Some(best) = main
            .iter()
            .enumerate()
            .min_by_key(|(idx, t)| (codec_rank(&t.codec), *idx))
            .map(|(_, t)| t)
        {
            selected.push(best.track_id.clone());
        }
    }

    if config.include_alternate_audio {
        selected.extend(
            title
                .tracks
                .iter()
                .filter(|t| t.kind == TrackKind::Audio && !t.is_english())
                .map(|t| t.track_id.clone()),
        );
    }

    let mut seen = std::collections::HashSet::new();
    selected.retain(|id| seen.insert(id.clone()));
    selected
}

/// Map planned titles onto episodes.
///
/// `skip` discards the first N episodes of the list; later discs of a
/// season pass the per-disc offset so numbering continues.
pub fn build_episode_mapping(
    titles: &[&Title],
    media_info: Option<&MediaInfo>,
    season: u32,
    strategy: EpisodeMappingStrategy,
    skip: usize,
) -> Vec<EpisodeAssignment> {
    let mut available: Vec<crate::tmdb::EpisodeInfo> = media_info
        .map(|m| m.episodes.iter().skip(skip).cloned().collect())
        .unwrap_or_default();

    let mut assignments: Vec<Option<EpisodeAssignment>> = vec![None; titles.len()];

    if !available.is_empty() {
        let runtime_matching = matches!(
            strategy,
            EpisodeMappingStrategy::Duration | EpisodeMappingStrategy::Hybrid
        );

        if runtime_matching {
            for (idx, title) in titles.iter().enumerate() {
                let title_minutes = title.duration_minutes() as i64;
                let best = available
                    .iter()
                    .enumerate()
                    .filter(|(_, e)| e.runtime.is_some())
                    .min_by_key(|(_, e)| (i64::from(e.runtime.unwrap()) - title_minutes).abs());
                if let Some((pos, _)) = best {
                    let episode = available.remove(pos);
                    assignments[idx] = Some(EpisodeAssignment {
                        season: episode.season,
                        episode: episode.episode,
                        episode_title: episode.name,
                    });
                }
            }
        }

        // Sequential fill of whatever is still unassigned, in episode
        // order. This is the whole strategy for `sequential` and the
        // second pass for `hybrid`.
        if strategy != EpisodeMappingStrategy::Duration {
            for assignment in assignments.iter_mut() {
                if assignment.is_none() && !available.is_empty() {
                    let episode = available.remove(0);
                    *assignment = Some(EpisodeAssignment {
                        season: episode.season,
                        episode: episode.episode,
                        episode_title: episode.name,
                    });
                }
            }
        }
    }

    // No episode list (or it ran out): season hint plus title ordinal.
    let mut next_ordinal = skip as u32 + 1;
    assignments
        .into_iter()
        .map(|assignment| {
            let filled = assignment.unwrap_or(EpisodeAssignment {
                season,
                episode: next_ordinal,
                episode_title: None,
            });
            next_ordinal = filled.episode + 1;
            filled
        })
        .collect()
}

/// Classifies disc content and produces the rip plan.
pub struct DiscAnalyzer {
    config: Arc<Config>,
    tmdb: TmdbService,
    series_cache: SeriesCache,
}

impl DiscAnalyzer {
    pub fn new(config: Arc<Config>) -> Result<Self> {
        let tmdb = TmdbService::new(config.clone())?;
        let series_cache = SeriesCache::open(
            &config.series_cache_db_path(),
            config.series_cache_ttl_days,
        )?;
        Ok(DiscAnalyzer {
            config,
            tmdb,
            series_cache,
        })
    }

    pub fn series_cache(&self) -> &SeriesCache {
        &self.series_cache
    }

    pub fn tmdb(&self) -> &TmdbService {
        &self.tmdb
    }

    /// Analyze a scanned disc and produce its rip plan.
    pub async fn analyze(
        &self,
        disc: &DiscInfo,
        titles: &[Title],
        disc_path: Option<&Path>,
        scan_output: Option<&str>,
    ) -> Result<DiscAnalysisResult> {
        if titles.is_empty() {
            return Err(SpindleError::Analysis("no titles".to_string()));
        }

        let mut cleaned_label = clean_label(&disc.label);

        let main_title = titles
            .iter()
            .max_by_key(|t| t.duration)
            .ok_or_else(|| SpindleError::Analysis("no titles".to_string()))?;
        let runtime_hint = if main_title.duration > 0 {
            Some(main_title.duration_minutes())
        } else {
            None
        };

        let window = self.config.tv_episode_window_secs();
        let mut tv_candidates = find_tv_candidates(titles, window);
        let mut is_tv = !tv_candidates.is_empty();

        // Enhanced extraction only pays off when the label tells us
        // nothing and we can reach the mounted filesystem.
        let mut enhanced: Option<EnhancedDiscMetadata> = None;
        if self.config.enable_enhanced_disc_metadata && is_generic_cleaned_label(&cleaned_label) {
            if let Some(path) = disc_path {
                let mut metadata =
                    MetadataExtractor::extract_all(path, Some(disc.device.as_str())).await;
                if let Some(output) = scan_output {
                    MetadataExtractor::populate_from_scan_output(&mut metadata, output);
                }

                if let Some(candidate) = metadata.best_title_candidates().into_iter().next() {
                    cleaned_label = clean_label(&candidate);
                }
                if metadata.is_tv_series() && !is_tv {
                    is_tv = true;
                    tv_candidates = fallback_tv_candidates(titles, window);
                }
                enhanced = Some(metadata);
            }
        }

        let mut season_hint = detect_season_hint(&cleaned_label);
        let mut disc_hint = detect_disc_hint(&disc.label);
        if let Some(metadata) = &enhanced {
            let (season, disc_number) = metadata.season_disc_info();
            season_hint = season_hint.or(season);
            disc_hint = disc_hint.or(disc_number);
        }

        let mut query = if cleaned_label.is_empty() {
            clean_label(&main_title.name)
        } else {
            cleaned_label.clone()
        };
        // A TV label names the series plus packaging (season marker, disc
        // ordinal); strip those so every disc of a season yields the same
        // query and the same series-cache key.
        if is_tv {
            let series_query = Regex::new(r"(?i)\b(season\s*\d+|s\d{1,2}|tv|\d+)\b")
                .unwrap()
                .replace_all(&query, " ")
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ");
            if !series_query.is_empty() {
                query = series_query;
            }
        }

        // Sequential discs of the same season reuse the first disc's
        // identification.
        let mut media_info: Option<MediaInfo> = None;
        let mut cache_hit = false;
        if is_tv {
            if let Some(cached) = self.series_cache.lookup(&query, season_hint)? {
                media_info = Some(cached);
                cache_hit = true;
            }
        }

        if media_info.is_none() {
            let kind = if is_tv { MediaKind::Tv } else { MediaKind::Movie };
            media_info = self
                .tmdb
                .identify(&query, kind, runtime_hint, season_hint)
                .await;

            if let Some(info) = &media_info {
                if is_tv && info.is_tv() {
                    self.series_cache.cache(&query, season_hint, info)?;
                }
            }
        }

        // A returned match wins over the duration heuristic.
        if let Some(info) = &media_info {
            if info.is_tv() && !is_tv {
                is_tv = true;
                tv_candidates = fallback_tv_candidates(titles, window);
            }
            if info.is_movie() && is_tv && !cache_hit {
                is_tv = false;
            }
            if season_hint.is_none() {
                season_hint = info.season;
            }
        }

        let content_kind = if is_tv {
            ContentKind::TvSeries
        } else {
            ContentKind::Movie
        };

        // Title selection
        let selected: Vec<(&Title, bool)> = if is_tv {
            if tv_candidates.is_empty() {
                tv_candidates = fallback_tv_candidates(titles, window);
            }
            tv_candidates.iter().map(|t| (*t, false)).collect()
        } else {
            let mut selected = vec![(main_title, false)];
            if self.config.include_movie_extras {
                let max_extras_secs = u64::from(self.config.max_extras_duration) * 60;
                let mut extras: Vec<&Title> = titles
                    .iter()
                    .filter(|t| {
                        t.title_id != main_title.title_id && t.duration <= max_extras_secs
                    })
                    .collect();
                extras.sort_by(|a, b| b.duration.cmp(&a.duration));
                selected.extend(
                    extras
                        .into_iter()
                        .take(self.config.max_extras_to_rip)
                        .map(|t| (t, true)),
                );
            }
            selected
        };

        // Episode mapping
        let season = season_hint.unwrap_or(1);
        let episode_titles: Vec<&Title> = selected
            .iter()
            .filter(|(_, is_extra)| !is_extra)
            .map(|(t, _)| *t)
            .collect();
        let episode_assignments = if is_tv {
            let skip = disc_hint
                .map(|d| (d.saturating_sub(1)) as usize * episode_titles.len())
                .unwrap_or(0);
            build_episode_mapping(
                &episode_titles,
                media_info.as_ref(),
                season,
                self.config.episode_mapping_strategy,
                skip,
            )
        } else {
            Vec::new()
        };

        // Assemble planned titles
        let mut planned = Vec::with_capacity(selected.len());
        let mut episode_iter = episode_assignments.into_iter();
        for (title, is_extra) in &selected {
            let commentary = if self.config.include_commentary_tracks {
                title
                    .commentary_tracks()
                    .iter()
                    .map(|t| t.track_id.clone())
                    .collect()
            } else {
                Vec::new()
            };

            planned.push(PlannedTitle {
                title_id: title.title_id.clone(),
                name: title.name.clone(),
                duration: title.duration,
                selected_tracks: select_tracks(title, &self.config),
                commentary_tracks: commentary,
                episode: if is_tv && !is_extra {
                    episode_iter.next()
                } else {
                    None
                },
                is_extra: *is_extra,
            });
        }

        // Confidence: heuristic baseline, raised by the match, capped.
        let baseline = if is_tv {
            TV_CONFIDENCE_BASE
        } else {
            MOVIE_CONFIDENCE_BASE
        };
        let confidence = media_info
            .as_ref()
            .map(|m| baseline.max(m.confidence))
            .unwrap_or(baseline)
            .min(0.99);

        let primary_title = media_info
            .as_ref()
            .map(|m| m.title.clone())
            .unwrap_or_else(|| {
                if query.is_empty() {
                    main_title.name.clone()
                } else {
                    query.clone()
                }
            });

        let multi_disc = disc_hint.map(|d| d >= 1).unwrap_or(false)
            && (is_tv || enhanced.as_ref().map(|m| m.is_tv_series()).unwrap_or(false));

        info!(
            "Analysis: '{primary_title}' as {content_kind} (confidence {confidence:.2}, {} titles)",
            planned.len()
        );
        debug!("Season hint {season_hint:?}, disc hint {disc_hint:?}, cache hit {cache_hit}");

        Ok(DiscAnalysisResult {
            primary_title,
            runtime_hint,
            plan: RipPlan {
                content_kind,
                confidence,
                titles: planned,
                media_info,
                multi_disc,
            },
            enhanced,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ripper::Track;
    use crate::tmdb::EpisodeInfo;

    fn title(id: &str, duration_secs: u64) -> Title {
        Title::new(id, duration_secs, 0, 1, Vec::new(), None)
    }

    fn episode(number: u32, runtime: u32) -> EpisodeInfo {
        EpisodeInfo {
            season: 1,
            episode: number,
            name: Some(format!("Episode {number}")),
            runtime: Some(runtime),
        }
    }

    fn tv_media_info(episodes: Vec<EpisodeInfo>) -> MediaInfo {
        MediaInfo {
            title: "Batman".to_string(),
            year: 1966,
            kind: MediaKind::Tv,
            tmdb_id: 2287,
            overview: String::new(),
            genres: vec![],
            season: Some(1),
            episodes,
            confidence: 0.9,
        }
    }

    #[test]
    fn test_clean_label() {
        assert_eq!(clean_label("BLAZING_SADDLES"), "blazing saddles");
        assert_eq!(clean_label("BATMAN_TV_S1_DISC_1"), "batman tv s1 1");
        assert_eq!(
            clean_label("The.Complete.Collection.BluRay"),
            "the"
        );
        assert_eq!(clean_label(""), "");
    }

    #[test]
    fn test_generic_cleaned_labels() {
        assert!(is_generic_cleaned_label(""));
        assert!(is_generic_cleaned_label("123"));
        assert!(is_generic_cleaned_label("unknown"));
        assert!(!is_generic_cleaned_label("blazing saddles"));
    }

    #[test]
    fn test_season_hint() {
        assert_eq!(detect_season_hint("batman season 2"), Some(2));
        assert_eq!(detect_season_hint("batman s03"), Some(3));
        assert_eq!(detect_season_hint("batman tv s1 1"), Some(1));
        assert_eq!(detect_season_hint("blazing saddles"), None);
    }

    #[test]
    fn test_disc_hint() {
        assert_eq!(detect_disc_hint("BATMAN_TV_S1_DISC_2"), Some(2));
        assert_eq!(detect_disc_hint("batman disc 3"), Some(3));
        assert_eq!(detect_disc_hint("BLAZING_SADDLES"), None);
    }

    #[test]
    fn test_tv_candidates_need_three_clustered() {
        let window = (18 * 60, 90 * 60);

        // Three titles of identical in-window duration cluster
        let titles = vec![title("0", 1320), title("1", 1340), title("2", 1310)];
        assert_eq!(find_tv_candidates(&titles, window).len(), 3);

        // Two in-window titles are a movie candidate
        let titles = vec![title("0", 1320), title("1", 1340)];
        assert!(find_tv_candidates(&titles, window).is_empty());

        // Outliers inside the window but outside the cluster are dropped
        let titles = vec![
            title("0", 1320),
            title("1", 1340),
            title("2", 1310),
            title("3", 85 * 60),
        ];
        let candidates = find_tv_candidates(&titles, window);
        assert_eq!(candidates.len(), 3);
        assert!(candidates.iter().all(|t| t.duration < 2000));
    }

    #[test]
    fn test_tv_candidates_ignore_out_of_window() {
        let window = (18 * 60, 90 * 60);
        // Trailer (1 min) and credits (3 min) never count
        let titles = vec![
            title("0", 1320),
            title("1", 1340),
            title("2", 1310),
            title("3", 180),
            title("4", 60),
        ];
        let candidates = find_tv_candidates(&titles, window);
        assert_eq!(candidates.len(), 3);
    }

    #[test]
    fn test_codec_rank_ordering() {
        assert!(codec_rank("DTS-HD MA") < codec_rank("TrueHD"));
        assert!(codec_rank("TrueHD") < codec_rank("AC3"));
        assert!(codec_rank("AC3") < codec_rank("AAC"));
        assert!(codec_rank("AAC") < codec_rank("FLAC"));
    }

    fn audio_track(id: &str, lang: &str, codec: &str, name: Option<&str>) -> Track {
        Track {
            track_id: id.to_string(),
            kind: TrackKind::Audio,
            codec: codec.to_string(),
            language: lang.to_string(),
            duration: 0,
            size: 0,
            title: name.map(str::to_string),
            is_default: false,
        }
    }

    fn video_track(id: &str) -> Track {
        Track {
            track_id: id.to_string(),
            kind: TrackKind::Video,
            codec: "Mpeg4".to_string(),
            language: String::new(),
            duration: 0,
            size: 0,
            title: None,
            is_default: true,
        }
    }

    fn subtitle_track(id: &str) -> Track {
        Track {
            track_id: id.to_string(),
            kind: TrackKind::Subtitle,
            codec: "PGS".to_string(),
            language: "eng".to_string(),
            duration: 0,
            size: 0,
            title: None,
            is_default: false,
        }
    }

    fn rich_title() -> Title {
        Title::new(
            "0",
            5580,
            0,
            12,
            vec![
                video_track("0"),
                audio_track("1", "eng", "AC3", Some("Surround")),
                audio_track("2", "eng", "DTS-HD MA", Some("Main")),
                audio_track("3", "eng", "AC3", Some("Director's Commentary")),
                audio_track("4", "fra", "AC3", None),
                subtitle_track("5"),
            ],
            Some("Feature"),
        )
    }

    #[test]
    fn test_select_tracks_all_english_with_commentary() {
        let config = Config {
            include_all_english_audio: true,
            include_commentary_tracks: true,
            include_alternate_audio: false,
            ..Default::default()
        };
        let selected = select_tracks(&rich_title(), &config);
        assert_eq!(selected, vec!["0", "1", "2", "3"]);
    }

    #[test]
    fn test_select_tracks_excluding_commentary() {
        let config = Config {
            include_all_english_audio: true,
            include_commentary_tracks: false,
            include_alternate_audio: false,
            ..Default::default()
        };
        let selected = select_tracks(&rich_title(), &config);
        assert_eq!(selected, vec!["0", "1", "2"]);
    }

    #[test]
    fn test_select_tracks_single_main_prefers_dts_hd() {
        let config = Config {
            include_all_english_audio: false,
            include_commentary_tracks: false,
            include_alternate_audio: false,
            ..Default::default()
        };
        let selected = select_tracks(&rich_title(), &config);
        assert_eq!(selected, vec!["0", "2"]);
    }

    #[test]
    fn test_select_tracks_with_alternates() {
        let config = Config {
            include_all_english_audio: false,
            include_commentary_tracks: false,
            include_alternate_audio: true,
            ..Default::default()
        };
        let selected = select_tracks(&rich_title(), &config);
        assert_eq!(selected, vec!["0", "2", "4"]);
    }

    #[test]
    fn test_select_tracks_never_includes_subtitles() {
        let config = Config {
            include_all_english_audio: true,
            include_commentary_tracks: true,
            include_alternate_audio: true,
            ..Default::default()
        };
        let selected = select_tracks(&rich_title(), &config);
        assert!(!selected.contains(&"5".to_string()));
    }

    #[test]
    fn test_episode_mapping_by_runtime() {
        let t0 = title("0", 22 * 60);
        let t1 = title("1", 22 * 60);
        let t2 = title("2", 22 * 60);
        let titles: Vec<&Title> = vec![&t0, &t1, &t2];
        let info = tv_media_info(vec![episode(1, 25), episode(2, 25), episode(3, 25)]);

        let mapping = build_episode_mapping(
            &titles,
            Some(&info),
            1,
            EpisodeMappingStrategy::Hybrid,
            0,
        );
        assert_eq!(mapping.len(), 3);
        assert_eq!(mapping[0].episode, 1);
        assert_eq!(mapping[1].episode, 2);
        assert_eq!(mapping[2].episode, 3);
        assert_eq!(mapping[0].episode_title.as_deref(), Some("Episode 1"));
        assert!(mapping.iter().all(|m| m.season == 1));
    }

    #[test]
    fn test_episode_mapping_runtime_prefers_closest() {
        let short = title("0", 20 * 60);
        let long = title("1", 44 * 60);
        let titles: Vec<&Title> = vec![&short, &long];
        let info = tv_media_info(vec![episode(1, 45), episode(2, 21)]);

        let mapping = build_episode_mapping(
            &titles,
            Some(&info),
            1,
            EpisodeMappingStrategy::Duration,
            0,
        );
        assert_eq!(mapping[0].episode, 2); // 20 min title -> 21 min episode
        assert_eq!(mapping[1].episode, 1); // 44 min title -> 45 min episode
    }

    #[test]
    fn test_episode_mapping_sequential_strategy() {
        let t0 = title("0", 22 * 60);
        let t1 = title("1", 44 * 60);
        let titles: Vec<&Title> = vec![&t0, &t1];
        let info = tv_media_info(vec![episode(1, 45), episode(2, 21)]);

        let mapping = build_episode_mapping(
            &titles,
            Some(&info),
            1,
            EpisodeMappingStrategy::Sequential,
            0,
        );
        assert_eq!(mapping[0].episode, 1);
        assert_eq!(mapping[1].episode, 2);
    }

    #[test]
    fn test_episode_mapping_without_episode_list() {
        let t0 = title("0", 22 * 60);
        let t1 = title("1", 22 * 60);
        let titles: Vec<&Title> = vec![&t0, &t1];

        let mapping =
            build_episode_mapping(&titles, None, 3, EpisodeMappingStrategy::Hybrid, 0);
        assert_eq!(mapping[0].season, 3);
        assert_eq!(mapping[0].episode, 1);
        assert_eq!(mapping[1].episode, 2);
        assert!(mapping[0].episode_title.is_none());
    }

    #[test]
    fn test_episode_mapping_skip_for_later_disc() {
        let t0 = title("0", 22 * 60);
        let t1 = title("1", 22 * 60);
        let t2 = title("2", 22 * 60);
        let titles: Vec<&Title> = vec![&t0, &t1, &t2];
        let info = tv_media_info((1..=9).map(|n| episode(n, 25)).collect());

        // Second disc of the season skips the first disc's three episodes
        let mapping = build_episode_mapping(
            &titles,
            Some(&info),
            1,
            EpisodeMappingStrategy::Hybrid,
            3,
        );
        assert_eq!(mapping[0].episode, 4);
        assert_eq!(mapping[1].episode, 5);
        assert_eq!(mapping[2].episode, 6);
    }

    #[test]
    fn test_episode_mapping_hybrid_fills_sequentially_when_runtimes_missing() {
        let t0 = title("0", 22 * 60);
        let t1 = title("1", 22 * 60);
        let titles: Vec<&Title> = vec![&t0, &t1];
        let info = tv_media_info(vec![
            EpisodeInfo {
                season: 1,
                episode: 1,
                name: Some("One".to_string()),
                runtime: None,
            },
            EpisodeInfo {
                season: 1,
                episode: 2,
                name: Some("Two".to_string()),
                runtime: None,
            },
        ]);

        let mapping =
            build_episode_mapping(&titles, Some(&info), 1, EpisodeMappingStrategy::Hybrid, 0);
        assert_eq!(mapping[0].episode, 1);
        assert_eq!(mapping[1].episode, 2);
    }

    #[test]
    fn test_rip_plan_serde_round_trip() {
        let plan = RipPlan {
            content_kind: ContentKind::TvSeries,
            confidence: 0.9,
            titles: vec![PlannedTitle {
                title_id: "0".to_string(),
                name: "Episode".to_string(),
                duration: 1320,
                selected_tracks: vec!["0".to_string(), "1".to_string()],
                commentary_tracks: vec![],
                episode: Some(EpisodeAssignment {
                    season: 1,
                    episode: 1,
                    episode_title: Some("Pilot".to_string()),
                }),
                is_extra: false,
            }],
            media_info: None,
            multi_disc: true,
        };

        let json = serde_json::to_string(&plan).unwrap();
        assert!(json.contains("\"tv_series\""));
        let parsed: RipPlan = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, plan);
    }
}
