use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};

const BD_INFO_BIN: &str = "bd_info";
const BD_INFO_TIMEOUT_SECS: u64 = 300;

/// A volume label that conveys no identification value.
pub fn is_generic_label(label: &str) -> bool {
    if label.is_empty() {
        return true;
    }
    let upper = label.to_uppercase();
    if matches!(
        upper.as_str(),
        "LOGICAL_VOLUME_ID" | "DVD_VIDEO" | "BLURAY" | "BD_ROM" | "UNTITLED" | "UNKNOWN"
    ) {
        return true;
    }
    if upper.chars().all(|c| c.is_ascii_digit()) {
        return true;
    }
    // Very short codes like "BD1"
    upper.len() <= 3 && upper.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Disc metadata merged from several sources. Each source only fills a
/// field when the held value is still empty or generic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnhancedDiscMetadata {
    // bd_info
    pub volume_id: Option<String>,
    pub disc_name: Option<String>,
    pub provider: Option<String>,

    // bdmt_eng.xml
    pub bdmt_title: Option<String>,
    pub language: Option<String>,
    pub thumbnails: Vec<String>,

    // MakeMKV scan output
    pub makemkv_label: Option<String>,
    pub title_names: Vec<String>,

    // mcmf.xml
    pub studio: Option<String>,
    pub studio_url: Option<String>,
    pub content_id: Option<String>,
}

impl EnhancedDiscMetadata {
    /// Title candidates in source-priority order, generic values skipped.
    pub fn best_title_candidates(&self) -> Vec<String> {
        let mut candidates = Vec::new();

        if let Some(name) = &self.disc_name {
            if !is_generic_label(name) {
                candidates.push(name.clone());
            }
        }
        if let Some(title) = &self.bdmt_title {
            if !is_generic_label(title) {
                candidates.push(title.clone());
            }
        }
        if let Some(volume_id) = &self.volume_id {
            if let Some(cleaned) = clean_volume_id(volume_id) {
                if !is_generic_label(&cleaned) {
                    candidates.push(cleaned);
                }
            }
        }
        if let Some(label) = &self.makemkv_label {
            if !is_generic_label(label) {
                candidates.push(label.clone());
            }
        }

        candidates
    }

    /// TV markers in the volume id or disc name.
    pub fn is_tv_series(&self) -> bool {
        if let Some(volume_id) = &self.volume_id {
            let patterns = [r"_S\d+_DISC_\d+", r"_TV_", r"SEASON_\d+", r"_SERIES_"];
            for pattern in patterns {
                if Regex::new(&format!("(?i){pattern}"))
                    .unwrap()
                    .is_match(volume_id)
                {
                    return true;
                }
            }
        }

        if let Some(disc_name) = &self.disc_name {
            let lower = disc_name.to_lowercase();
            for indicator in ["season", "series", "episode"] {
                if lower.contains(indicator) {
                    return true;
                }
            }
        }

        false
    }

    /// Season and disc number when this is a TV series disc.
    pub fn season_disc_info(&self) -> (Option<u32>, Option<u32>) {
        if let Some(volume_id) = &self.volume_id {
            if let Some(info) = parse_disc_type(volume_id) {
                return (info.0, info.1);
            }
        }

        let mut season = None;
        let mut disc = None;
        if let Some(disc_name) = &self.disc_name {
            if let Some(caps) = Regex::new(r"(?i)Season\s+(\d+)").unwrap().captures(disc_name) {
                season = caps[1].parse().ok();
            }
            if let Some(caps) = Regex::new(r"(?i)Disc\s+(\d+)").unwrap().captures(disc_name) {
                disc = caps[1].parse().ok();
            }
        }
        (season, disc)
    }
}

/// Strip packaging noise from a volume identifier (leading numbers,
/// season/disc suffixes, underscores).
pub fn clean_volume_id(volume_id: &str) -> Option<String> {
    if volume_id.is_empty() {
        return None;
    }

    let mut title = Regex::new(r"^\d+_")
        .unwrap()
        .replace(volume_id, "")
        .to_string();
    title = Regex::new(r"(?i)_S\d+_DISC_\d+$")
        .unwrap()
        .replace(&title, "")
        .to_string();
    title = Regex::new(r"(?i)_TV$")
        .unwrap()
        .replace(&title, "")
        .to_string();
    let title = title.replace('_', " ").trim().to_string();

    if title.is_empty() {
        None
    } else {
        Some(title)
    }
}

/// Season/disc markers in a volume identifier: `(season, disc)` or None
/// when the id carries no TV pattern.
fn parse_disc_type(volume_id: &str) -> Option<(Option<u32>, Option<u32>)> {
    let patterns = [
        r"(?i)S(\d+)_DISC_(\d+)",
        r"(?i)SEASON_(\d+)_DISC_(\d+)",
        r"(?i)_S(\d+)_D(\d+)",
    ];
    for pattern in patterns {
        if let Some(caps) = Regex::new(pattern).unwrap().captures(volume_id) {
            let season = caps.get(1).and_then(|m| m.as_str().parse().ok());
            let disc = caps.get(2).and_then(|m| m.as_str().parse().ok());
            return Some((season, disc));
        }
    }
    None
}

/// Parse `bd_info` output for the volume identifier, disc name and
/// provider data.
pub fn parse_bd_info_output(output: &str) -> (Option<String>, Option<String>, Option<String>) {
    let mut volume_id = None;
    let mut disc_name = None;
    let mut provider = None;

    for raw_line in output.lines() {
        let line = raw_line.trim();
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        if value.is_empty() {
            continue;
        }

        if key.contains("Volume Identifier") {
            volume_id = Some(value.to_string());
        } else if key.contains("Disc name") {
            disc_name = Some(value.to_string());
        } else if key.contains("provider data") {
            let cleaned = value.trim_matches('\'').trim();
            if !cleaned.is_empty() {
                provider = Some(cleaned.to_string());
            }
        }
    }

    (volume_id, disc_name, provider)
}

/// Parse `BDMV/META/DL/bdmt_eng.xml`: disc title, language, thumbnails.
pub fn parse_bdmt_xml(content: &str) -> (Option<String>, Option<String>, Vec<String>) {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    let mut title = None;
    let mut language = None;
    let mut thumbnails = Vec::new();
    let mut stack: Vec<String> = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let local = local_name(e.name().as_ref());
                if local == "thumbnail" {
                    if let Some(href) = attribute_value(&e, "href") {
                        thumbnails.push(href);
                    }
                }
                stack.push(local);
            }
            Ok(Event::Empty(e)) => {
                if local_name(e.name().as_ref()) == "thumbnail" {
                    if let Some(href) = attribute_value(&e, "href") {
                        thumbnails.push(href);
                    }
                }
            }
            Ok(Event::Text(t)) => {
                let text = t.unescape().unwrap_or_default().trim().to_string();
                if text.is_empty() {
                    continue;
                }
                match stack.last().map(String::as_str) {
                    Some("name") if stack.iter().any(|s| s.as_str() == "title") && title.is_none() => {
                        title = Some(text);
                    }
                    Some("language") if language.is_none() => language = Some(text),
                    _ => {}
                }
            }
            Ok(Event::End(_)) => {
                stack.pop();
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                warn!("Failed to parse bdmt_eng.xml: {e}");
                break;
            }
            _ => {}
        }
    }

    (title, language, thumbnails)
}

/// Parse `AACS/mcmf.xml`: content id and the studio URI.
pub fn parse_mcmf_xml(content: &str) -> (Option<String>, Option<String>) {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    let mut content_id = None;
    let mut uri = None;
    let mut in_uri = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let local = local_name(e.name().as_ref());
                if content_id.is_none() {
                    if let Some(id) = attribute_value(&e, "contentID") {
                        content_id = Some(id);
                    }
                }
                in_uri = local == "URI";
            }
            Ok(Event::Text(t)) if in_uri && uri.is_none() => {
                let text = t.unescape().unwrap_or_default().trim().to_string();
                if !text.is_empty() {
                    uri = Some(text);
                }
            }
            Ok(Event::End(_)) => in_uri = false,
            Ok(Event::Eof) => break,
            Err(e) => {
                warn!("Failed to parse mcmf.xml: {e}");
                break;
            }
            _ => {}
        }
    }

    (content_id, uri)
}

fn local_name(name: &[u8]) -> String {
    let name = String::from_utf8_lossy(name);
    name.rsplit(':').next().unwrap_or(&name).to_string()
}

fn attribute_value(e: &quick_xml::events::BytesStart<'_>, wanted: &str) -> Option<String> {
    e.attributes().flatten().find_map(|a| {
        let key = local_name(a.key.as_ref());
        if key == wanted {
            Some(String::from_utf8_lossy(&a.value).to_string())
        } else {
            None
        }
    })
}

/// Map a studio URL to a display name, falling back to the domain stem.
pub fn extract_studio_from_url(url: &str) -> Option<String> {
    if url.is_empty() {
        return None;
    }

    let known = [
        ("sonypictures.com", "Sony Pictures"),
        ("warnerbros.com", "Warner Bros"),
        ("universalstudios.com", "Universal"),
        ("disney.com", "Disney"),
        ("paramount.com", "Paramount"),
        ("mgm.com", "MGM"),
        ("foxmovies.com", "Fox"),
        ("lionsgate.com", "Lionsgate"),
    ];

    let lower = url.to_lowercase();
    for (domain, studio) in known {
        if lower.contains(domain) {
            return Some(studio.to_string());
        }
    }

    let host = lower
        .trim_start_matches("http://")
        .trim_start_matches("https://")
        .split('/')
        .next()?
        .trim_start_matches("www.");
    let stem = host.split('.').next()?;
    if stem.is_empty() {
        return None;
    }
    let mut chars = stem.chars();
    let first = chars.next()?;
    Some(format!("{}{}", first.to_uppercase(), chars.as_str()))
}

/// Runs the sources in priority order and merges the result.
pub struct MetadataExtractor;

impl MetadataExtractor {
    /// Extract everything available for a mounted disc. `device` is used
    /// for bd_info when given (the raw device yields a better volume id).
    pub async fn extract_all(disc_path: &Path, device: Option<&str>) -> EnhancedDiscMetadata {
        let mut metadata = EnhancedDiscMetadata::default();

        // Priority 1: bd_info (most reliable for Blu-ray)
        let target = device
            .map(str::to_string)
            .unwrap_or_else(|| disc_path.to_string_lossy().to_string());
        if let Some(output) = Self::run_bd_info(&target).await {
            let (volume_id, disc_name, provider) = parse_bd_info_output(&output);
            metadata.volume_id = volume_id;
            metadata.disc_name = disc_name;
            metadata.provider = provider;
        }

        // Priority 2: bdmt_eng.xml
        let bdmt_path = disc_path.join("BDMV").join("META").join("DL").join("bdmt_eng.xml");
        if let Ok(content) = std::fs::read_to_string(&bdmt_path) {
            let (title, language, thumbnails) = parse_bdmt_xml(&content);
            if metadata.bdmt_title.is_none() {
                metadata.bdmt_title = title;
            }
            metadata.language = language;
            metadata.thumbnails = thumbnails;
        }

        // Priority 4: mcmf.xml for studio info (priority 3, the MakeMKV
        // scan output, is merged by the caller who has it)
        let mcmf_path = disc_path.join("AACS").join("mcmf.xml");
        if let Ok(content) = std::fs::read_to_string(&mcmf_path) {
            let (content_id, uri) = parse_mcmf_xml(&content);
            metadata.content_id = content_id;
            metadata.studio_url = uri.clone();
            metadata.studio = uri.as_deref().and_then(extract_studio_from_url);
        }

        metadata
    }

    async fn run_bd_info(target: &str) -> Option<String> {
        info!("Running bd_info scan on {target}");
        let result = timeout(
            Duration::from_secs(BD_INFO_TIMEOUT_SECS),
            Command::new(BD_INFO_BIN).arg(target).output(),
        )
        .await;

        match result {
            Ok(Ok(output)) if output.status.success() => {
                Some(String::from_utf8_lossy(&output.stdout).to_string())
            }
            Ok(Ok(output)) => {
                warn!(
                    "bd_info failed: {}",
                    String::from_utf8_lossy(&output.stderr)
                );
                None
            }
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("bd_info not available (install libbluray-utils)");
                None
            }
            Ok(Err(e)) => {
                warn!("bd_info failed to run: {e}");
                None
            }
            Err(_) => {
                warn!("bd_info timed out");
                None
            }
        }
    }

    /// Merge fields recoverable from the MakeMKV robot scan output
    /// (`CINFO` codes 2/30/32, per-title names).
    pub fn populate_from_scan_output(metadata: &mut EnhancedDiscMetadata, scan_output: &str) {
        for raw_line in scan_output.lines() {
            let line = raw_line.trim();
            if let Some(rest) = line.strip_prefix("CINFO:") {
                let parts: Vec<&str> = rest.splitn(3, ',').collect();
                if parts.len() < 3 {
                    continue;
                }
                let code = parts[0];
                let value = parts[2].trim_matches('"').to_string();
                if value.is_empty() {
                    continue;
                }

                match code {
                    "2" => {
                        if metadata.disc_name.is_none() && !is_generic_label(&value) {
                            metadata.disc_name = Some(value);
                        }
                    }
                    "30" => {
                        if metadata.makemkv_label.is_none() && !is_generic_label(&value) {
                            metadata.makemkv_label = Some(value);
                        }
                    }
                    "32" => {
                        if metadata.volume_id.is_none() {
                            metadata.volume_id = Some(value);
                        }
                    }
                    _ => {}
                }
            } else if let Some(rest) = line.strip_prefix("TINFO:") {
                // Title names: TINFO:title,2,0,"Name"
                let parts: Vec<&str> = rest.splitn(4, ',').collect();
                if parts.len() >= 4 && parts[1] == "2" {
                    let name = parts[3].trim_matches('"').to_string();
                    if !name.is_empty() && !is_generic_label(&name) {
                        metadata.title_names.push(name);
                    }
                }
            }
        }
        debug!(
            "Merged scan output metadata: volume_id={:?}, disc_name={:?}",
            metadata.volume_id, metadata.disc_name
        );
    }
}
