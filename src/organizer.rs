use reqwest::Client;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::analyzer::EpisodeAssignment;
use crate::config::Config;
use crate::error::{Result, SpindleError};
use crate::tmdb::{MediaInfo, MediaKind};

/// Strip characters unsafe for the target filesystem, collapse
/// whitespace, keep hyphens between tokens.
pub fn sanitize_component(name: &str) -> String {
    let filtered: String = name
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace() || *c == '-' || *c == '_')
        .collect();
    filtered.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// `Title (Year)` for movies; `Show - SNNENN[ - Episode Title]` for TV.
pub fn file_stem(media_info: &MediaInfo, episode: Option<&EpisodeAssignment>) -> String {
    let safe_title = sanitize_component(&media_info.title);

    match episode {
        Some(assignment) if media_info.is_tv() => {
            let marker = format!("S{:02}E{:02}", assignment.season, assignment.episode);
            match assignment
                .episode_title
                .as_deref()
                .map(sanitize_component)
                .filter(|t| !t.is_empty())
            {
                Some(episode_title) => format!("{safe_title} - {marker} - {episode_title}"),
                None => format!("{safe_title} - {marker}"),
            }
        }
        _ => format!("{safe_title} ({})", media_info.year),
    }
}

#[derive(Debug, Deserialize)]
struct PlexSection {
    key: String,
    title: String,
}

#[derive(Debug, Deserialize)]
struct PlexDirectoryList {
    #[serde(rename = "Directory", default)]
    directory: Vec<PlexSection>,
}

#[derive(Debug, Deserialize)]
struct PlexSectionsResponse {
    #[serde(rename = "MediaContainer")]
    media_container: PlexDirectoryList,
}

/// Installs encoded files into the library tree and pokes the media
/// server to index them.
pub struct LibraryOrganizer {
    config: Arc<Config>,
    client: Client,
}

impl LibraryOrganizer {
    pub fn new(config: Arc<Config>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.plex_request_timeout))
            .build()
            .unwrap_or_default();
        LibraryOrganizer { config, client }
    }

    /// Directory a piece of media lives in.
    fn target_dir(&self, media_info: &MediaInfo, episode: Option<&EpisodeAssignment>) -> PathBuf {
        let safe_title = sanitize_component(&media_info.title);
        let show_dir = format!("{safe_title} ({})", media_info.year);

        match media_info.kind {
            MediaKind::Movie => self
                .config
                .library_dir
                .join(&self.config.movies_dir)
                .join(show_dir),
            MediaKind::Tv => {
                let base = self.config.library_dir.join(&self.config.tv_dir).join(show_dir);
                let season = episode
                    .map(|e| e.season)
                    .or(media_info.season)
                    .unwrap_or(1);
                base.join(format!("Season {season:02}"))
            }
        }
    }

    /// Find a destination that does not collide: ` (N)` before the
    /// extension, N counting up from 1.
    fn unique_destination(dir: &Path, stem: &str, extension: &str) -> PathBuf {
        let mut candidate = dir.join(format!("{stem}{extension}"));
        let mut counter = 1;
        while candidate.exists() {
            candidate = dir.join(format!("{stem} ({counter}){extension}"));
            counter += 1;
        }
        candidate
    }

    /// Move an encoded file into the library; returns the final path.
    pub async fn organize(
        &self,
        src_path: &Path,
        media_info: &MediaInfo,
        episode: Option<&EpisodeAssignment>,
    ) -> Result<PathBuf> {
        let target_dir = self.target_dir(media_info, episode);
        tokio::fs::create_dir_all(&target_dir).await?;

        let stem = file_stem(media_info, episode);
        let extension = src_path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        let target = Self::unique_destination(&target_dir, &stem, &extension);

        info!("Moving {} -> {}", src_path.display(), target.display());
        move_file(src_path, &target).await?;
        Ok(target)
    }

    /// Quarantine a file that could not be identified. `_N` suffixes keep
    /// the original name unique within the bucket.
    pub async fn move_to_review(&self, src_path: &Path, bucket: &str) -> Result<PathBuf> {
        let review_dir = self.config.review_dir.join(bucket);
        tokio::fs::create_dir_all(&review_dir).await?;

        let stem = src_path
            .file_stem()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string();
        let extension = src_path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();

        let mut target = review_dir.join(format!("{stem}{extension}"));
        let mut counter = 1;
        while target.exists() {
            target = review_dir.join(format!("{stem}_{counter}{extension}"));
            counter += 1;
        }

        info!("Moving unidentified media to review: {}", target.display());
        move_file(src_path, &target).await?;
        Ok(target)
    }

    /// Ask the media server to rescan the section matching the content
    /// kind. Failures are logged and swallowed; the library does not
    /// depend on a successful refresh.
    pub async fn refresh_library(&self, kind: MediaKind) {
        let (Some(plex_url), Some(plex_token)) =
            (self.config.plex_url.as_ref(), self.config.plex_token.as_ref())
        else {
            debug!("Plex not configured, skipping library refresh");
            return;
        };

        let wanted = match kind {
            MediaKind::Movie => &self.config.movies_library,
            MediaKind::Tv => &self.config.tv_library,
        };

        let sections_url = format!("{}/library/sections", plex_url.trim_end_matches('/'));
        let response = self
            .client
            .get(&sections_url)
            .header("X-Plex-Token", plex_token)
            .header("Accept", "application/json")
            .send()
            .await;

        let sections = match response {
            Ok(r) if r.status().is_success() => match r.json::<PlexSectionsResponse>().await {
                Ok(body) => body.media_container.directory,
                Err(e) => {
                    warn!("Failed to decode Plex sections: {e}");
                    return;
                }
            },
            Ok(r) => {
                warn!("Plex sections request failed with status {}", r.status());
                return;
            }
            Err(e) => {
                warn!("Failed to reach Plex server: {e}");
                return;
            }
        };

        let Some(section) = sections.iter().find(|s| &s.title == wanted) else {
            warn!("No Plex library section named '{wanted}'");
            return;
        };

        let refresh_url = format!(
            "{}/library/sections/{}/refresh",
            plex_url.trim_end_matches('/'),
            section.key
        );
        match self
            .client
            .get(&refresh_url)
            .header("X-Plex-Token", plex_token)
            .send()
            .await
        {
            Ok(r) if r.status().is_success() => {
                info!("Triggered Plex scan for '{wanted}' library");
            }
            Ok(r) => warn!("Plex refresh failed with status {}", r.status()),
            Err(e) => warn!("Failed to trigger Plex refresh: {e}"),
        }
    }
}

/// Rename, falling back to copy-and-delete when the library lives on a
/// different filesystem than staging.
async fn move_file(src: &Path, dst: &Path) -> Result<()> {
    match tokio::fs::rename(src, dst).await {
        Ok(()) => Ok(()),
        Err(_) => {
            tokio::fs::copy(src, dst).await?;
            tokio::fs::remove_file(src).await.map_err(|e| {
                SpindleError::Filesystem(format!(
                    "copied {} but failed to remove source: {e}",
                    dst.display()
                ))
            })?;
            Ok(())
        }
    }
}
