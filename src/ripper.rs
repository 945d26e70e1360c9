use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Result, SpindleError};
use crate::progress::ProgressEvent;
use crate::subprocess::ActiveChild;

pub const MAKEMKV_BIN: &str = "makemkvcon";

/// Audio tracks whose name matches one of these are commentaries.
const COMMENTARY_KEYWORDS: [&str; 14] = [
    "commentary",
    "director",
    "director's",
    "cast",
    "crew",
    "behind",
    "making",
    "deleted",
    "alternate",
    "producer",
    "writer",
    "audio commentary",
    "filmmakers",
    "actors",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Video,
    Audio,
    Subtitle,
    Unknown,
}

/// One elementary stream within a title.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub track_id: String,
    pub kind: TrackKind,
    pub codec: String,
    pub language: String,
    pub duration: u64, // seconds
    pub size: u64,     // bytes
    pub title: Option<String>,
    pub is_default: bool,
}

impl Track {
    pub fn is_english(&self) -> bool {
        self.language.to_lowercase().starts_with("en")
    }

    pub fn is_commentary(&self) -> bool {
        if self.kind != TrackKind::Audio || !self.is_english() {
            return false;
        }
        let Some(title) = &self.title else {
            return false;
        };
        let lower = title.to_lowercase();
        COMMENTARY_KEYWORDS.iter().any(|k| lower.contains(k))
    }
}

/// One selectable unit on a disc.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Title {
    pub title_id: String,
    pub duration: u64, // seconds
    pub size: u64,     // bytes
    pub chapters: u32,
    pub tracks: Vec<Track>,
    pub name: String,
}

impl Title {
    pub fn new(title_id: &str, duration: u64, size: u64, chapters: u32, tracks: Vec<Track>, name: Option<&str>) -> Self {
        Title {
            title_id: title_id.to_string(),
            duration,
            size,
            chapters,
            tracks,
            name: name
                .map(str::to_string)
                .unwrap_or_else(|| format!("Title {title_id}")),
        }
    }

    pub fn video_tracks(&self) -> Vec<&Track> {
        self.tracks.iter().filter(|t| t.kind == TrackKind::Video).collect()
    }

    pub fn audio_tracks(&self) -> Vec<&Track> {
        self.tracks.iter().filter(|t| t.kind == TrackKind::Audio).collect()
    }

    pub fn subtitle_tracks(&self) -> Vec<&Track> {
        self.tracks
            .iter()
            .filter(|t| t.kind == TrackKind::Subtitle)
            .collect()
    }

    pub fn english_audio_tracks(&self) -> Vec<&Track> {
        self.audio_tracks()
            .into_iter()
            .filter(|t| t.is_english())
            .collect()
    }

    pub fn commentary_tracks(&self) -> Vec<&Track> {
        self.audio_tracks()
            .into_iter()
            .filter(|t| t.is_commentary())
            .collect()
    }

    /// English audio that is not a commentary.
    pub fn main_audio_tracks(&self) -> Vec<&Track> {
        self.english_audio_tracks()
            .into_iter()
            .filter(|t| !t.is_commentary())
            .collect()
    }

    pub fn duration_minutes(&self) -> u32 {
        (self.duration / 60) as u32
    }
}

impl std::fmt::Display for Title {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let hours = self.duration / 3600;
        let minutes = (self.duration % 3600) / 60;
        let seconds = self.duration % 60;
        write!(
            f,
            "{}: {hours:02}:{minutes:02}:{seconds:02}, {} tracks",
            self.name,
            self.tracks.len()
        )
    }
}

/// Parse a MakeMKV duration value to seconds. The tool sometimes emits
/// the value with a stray `N,"` prefix; strip it before splitting.
pub fn parse_duration(duration_str: &str) -> u64 {
    let mut clean = duration_str;
    if let Some(idx) = clean.find(",\"") {
        clean = &clean[idx + 2..];
    }
    let clean = clean.trim_matches('"');

    let parts: Vec<&str> = clean.split(':').collect();
    if parts.len() != 3 {
        warn!("Invalid duration format: '{duration_str}'");
        return 0;
    }
    let parse = |s: &str| s.trim().parse::<u64>().unwrap_or(0);
    parse(parts[0]) * 3600 + parse(parts[1]) * 60 + parse(parts[2])
}

/// TINFO values arrive as `code,"value"`; drop the numeric code and the
/// quotes. Some streams omit the code, so plain values pass through.
fn strip_attr_prefix(raw: &str) -> String {
    let raw = raw.trim();
    let rest = match raw.split_once(',') {
        Some((first, rest))
            if !first.is_empty()
                && first.chars().all(|c| c.is_ascii_digit())
                && rest.starts_with('"') =>
        {
            rest
        }
        _ => raw,
    };
    rest.trim_matches('"').to_string()
}

/// Pull the quoted message text out of a `MSG:code,flags,count,"text",…`
/// line.
fn msg_text(line: &str) -> Option<String> {
    let parts: Vec<&str> = line.splitn(5, ',').collect();
    if parts.len() >= 4 {
        return Some(parts[3].trim_matches('"').to_string());
    }
    None
}

/// Scan the output for fatal MakeMKV conditions. License and
/// copy-protection messages are surfaced verbatim with a hint appended.
fn check_scan_errors(output: &str) -> Result<()> {
    for line in output.lines() {
        if !line.starts_with("MSG:") {
            continue;
        }
        let Some(text) = msg_text(line) else { continue };
        let lower = text.to_lowercase();

        if lower.contains("too old") || lower.contains("registration key") {
            return Err(SpindleError::tool(
                MAKEMKV_BIN,
                format!("{text}. Update MakeMKV or purchase a license key from makemkv.com"),
            ));
        }
        if lower.contains("copy protection") || lower.contains("aacs") {
            return Err(SpindleError::tool(
                MAKEMKV_BIN,
                format!("{text}. This disc has copy protection MakeMKV cannot bypass"),
            ));
        }
    }
    Ok(())
}

/// Parse robot-mode scan output (`TINFO`/`SINFO` lines) into titles.
pub fn parse_scan_output(output: &str) -> Result<Vec<Title>> {
    check_scan_errors(output)?;

    let tinfo_re = Regex::new(r"^TINFO:(\d+),(\d+),(.+)$").unwrap();
    let sinfo_re = Regex::new(r"^SINFO:(\d+),(\d+),(\d+),(\d+),(.+)$").unwrap();

    #[derive(Default)]
    struct TitleData {
        name: Option<String>,
        duration: u64,
        size: u64,
        chapters: u32,
        tracks: BTreeMap<u32, Track>,
    }

    let mut titles: BTreeMap<u32, TitleData> = BTreeMap::new();

    for line in output.lines() {
        if let Some(caps) = tinfo_re.captures(line) {
            let title_id: u32 = caps[1].parse().unwrap_or(0);
            let attr_id: u32 = caps[2].parse().unwrap_or(0);
            let value = strip_attr_prefix(&caps[3]);
            let entry = titles.entry(title_id).or_default();

            match attr_id {
                2 => entry.name = Some(value),
                8 => entry.chapters = value.parse().unwrap_or(0),
                9 => entry.duration = parse_duration(&value),
                10 => {
                    if value.chars().all(|c| c.is_ascii_digit()) {
                        entry.size = value.parse().unwrap_or(0);
                    }
                }
                _ => {}
            }
        } else if let Some(caps) = sinfo_re.captures(line) {
            let title_id: u32 = caps[1].parse().unwrap_or(0);
            let stream_id: u32 = caps[2].parse().unwrap_or(0);
            let attr_id: u32 = caps[3].parse().unwrap_or(0);
            let value = caps[5].trim().trim_matches('"').to_string();

            let Some(entry) = titles.get_mut(&title_id) else {
                continue;
            };
            let track = entry.tracks.entry(stream_id).or_insert_with(|| Track {
                track_id: stream_id.to_string(),
                kind: TrackKind::Unknown,
                codec: String::new(),
                language: String::new(),
                duration: 0,
                size: 0,
                title: None,
                is_default: false,
            });

            match attr_id {
                1 => {
                    track.kind = match value.as_str() {
                        "Video" => TrackKind::Video,
                        "Audio" => TrackKind::Audio,
                        "Subtitles" => TrackKind::Subtitle,
                        other => {
                            warn!("Unknown track type '{other}' for title {title_id} stream {stream_id}");
                            TrackKind::Unknown
                        }
                    }
                }
                3 => track.language = value,
                6 => track.codec = value,
                30 => track.title = Some(value),
                _ => {}
            }
        }
    }

    let result: Vec<Title> = titles
        .into_iter()
        .map(|(id, data)| {
            let tracks: Vec<Track> = data.tracks.into_values().collect();
            debug!(
                "Parsed title {id}: {} tracks ({} audio)",
                tracks.len(),
                tracks.iter().filter(|t| t.kind == TrackKind::Audio).count()
            );
            Title::new(
                &id.to_string(),
                data.duration,
                data.size,
                data.chapters,
                tracks,
                data.name.as_deref(),
            )
        })
        .collect();

    Ok(result)
}

/// Track selection knobs the selection rule is derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionOptions {
    pub include_all_english_audio: bool,
    pub include_commentary_tracks: bool,
    pub include_alternate_audio: bool,
}

impl From<&Config> for SelectionOptions {
    fn from(config: &Config) -> Self {
        SelectionOptions {
            include_all_english_audio: config.include_all_english_audio,
            include_commentary_tracks: config.include_commentary_tracks,
            include_alternate_audio: config.include_alternate_audio,
        }
    }
}

/// Build MakeMKV's persistent selection rule from the effective audio
/// configuration. The same options always produce the same string.
pub fn build_selection_rule(options: SelectionOptions) -> String {
    let mut rules = vec!["-sel:all".to_string(), "+sel:video".to_string()];

    if options.include_all_english_audio {
        rules.push("+sel:audio&(eng)".to_string());
        if !options.include_commentary_tracks {
            rules.push("-sel:audio&(commentary)".to_string());
            rules.push("-sel:audio&(director)".to_string());
            rules.push("-sel:audio&(cast)".to_string());
        }
    } else {
        rules.push("+sel:audio&(eng)&(!commentary)".to_string());
    }

    if options.include_alternate_audio {
        rules.push("+sel:audio&(!eng)".to_string());
    }

    rules.push("-sel:subtitle".to_string());
    rules.join(",")
}

/// Write the selection rule into MakeMKV's settings file, preserving any
/// other keys already present.
pub fn configure_selection(settings_file: &Path, selection_rule: &str) -> Result<()> {
    if let Some(parent) = settings_file.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut settings: HashMap<String, String> = HashMap::new();
    let mut order: Vec<String> = Vec::new();
    if settings_file.exists() {
        for line in std::fs::read_to_string(settings_file)?.lines() {
            let line = line.trim();
            if line.starts_with('#') || !line.contains('=') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                let key = key.trim().to_string();
                if !settings.contains_key(&key) {
                    order.push(key.clone());
                }
                settings.insert(key, value.trim().trim_matches('"').to_string());
            }
        }
    }

    let rule_key = "app_DefaultSelectionString".to_string();
    if !settings.contains_key(&rule_key) {
        order.push(rule_key.clone());
    }
    settings.insert(rule_key, selection_rule.to_string());

    let mut contents = String::from("# MakeMKV settings file (managed by Spindle)\n");
    for key in &order {
        contents.push_str(&format!("{} = \"{}\"\n", key, settings[key]));
    }
    std::fs::write(settings_file, contents)?;
    debug!("Configured MakeMKV selection rule: {selection_rule}");
    Ok(())
}

/// Stateful parser for MakeMKV's progress stream. Progress is suppressed
/// until the save phase begins, initialisation artefacts are discarded,
/// and updates are throttled to 5-point forward steps.
pub struct ProgressParser {
    last_percent: f32,
    ripping_started: bool,
}

impl Default for ProgressParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressParser {
    pub fn new() -> Self {
        ProgressParser {
            last_percent: -1.0,
            ripping_started: false,
        }
    }

    pub fn parse_line(&mut self, line: &str) -> Option<ProgressEvent> {
        let line = line.trim();

        if line.starts_with("PRGV:") {
            return self.parse_prgv(line);
        }

        if let Some(action) = line.strip_prefix("Current action:") {
            return Some(ProgressEvent::RippingStatus {
                message: action.trim().to_string(),
            });
        }
        if let Some(operation) = line.strip_prefix("Current operation:") {
            return Some(ProgressEvent::RippingStatus {
                message: operation.trim().to_string(),
            });
        }

        // PRGC/PRGT carry the names of the current and total operations.
        if line.starts_with("PRGC:") || line.starts_with("PRGT:") {
            let name = line.splitn(4, ',').nth(2).map(|s| s.trim_matches('"'));
            if let Some(name) = name {
                if !name.is_empty() {
                    return Some(ProgressEvent::RippingStatus {
                        message: name.to_string(),
                    });
                }
            }
            return None;
        }

        if line.starts_with("MSG:") {
            if line.contains("Saving") && line.contains("titles into directory") {
                self.ripping_started = true;
                debug!("Rip save phase started");
            }
            if let Some(text) = msg_text(line) {
                return Some(ProgressEvent::RippingStatus { message: text });
            }
        }

        None
    }

    fn parse_prgv(&mut self, line: &str) -> Option<ProgressEvent> {
        let rest = line.strip_prefix("PRGV:")?;
        let parts: Vec<&str> = rest.splitn(3, ',').collect();
        if parts.len() < 3 {
            return None;
        }

        let current: u64 = parts[0].trim().parse().ok()?;
        let total: u64 = parts[1].trim().parse().ok()?;
        let maximum: u64 = parts[2].trim().parse().ok()?;
        if maximum == 0 {
            return None;
        }

        // Individual track completion, not overall progress.
        if current == maximum && total == 0 {
            return None;
        }

        if !self.ripping_started {
            return None;
        }

        let percent = (total as f32 / maximum as f32) * 100.0;

        if percent >= 100.0 {
            // 100% straight out of initialisation is an artefact; a real
            // completion follows earlier forward progress.
            if self.last_percent < 95.0 || percent <= self.last_percent {
                return None;
            }
        } else if percent < self.last_percent || percent - self.last_percent < 5.0 {
            return None;
        }

        self.last_percent = percent;
        Some(ProgressEvent::RippingProgress {
            stage: "Saving to MKV file".to_string(),
            percent,
        })
    }
}

/// Adapter around the external MakeMKV ripper.
pub struct MakeMkvRipper {
    config: Arc<Config>,
    active_child: Arc<ActiveChild>,
}

impl MakeMkvRipper {
    pub fn new(config: Arc<Config>, active_child: Arc<ActiveChild>) -> Self {
        MakeMkvRipper {
            config,
            active_child,
        }
    }

    fn settings_file() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".MakeMKV")
            .join("settings.conf")
    }

    /// Scan the disc and return the parsed titles.
    pub async fn scan_disc(&self, device: &str) -> Result<Vec<Title>> {
        let (titles, _) = self.scan_disc_with_output(device).await?;
        Ok(titles)
    }

    /// Scan the disc, returning the titles and the raw robot output for
    /// the enhanced-metadata path.
    pub async fn scan_disc_with_output(&self, device: &str) -> Result<(Vec<Title>, String)> {
        info!("Scanning disc on {device}");

        let output = timeout(
            Duration::from_secs(self.config.makemkv_info_timeout),
            Command::new(MAKEMKV_BIN)
                .arg("info")
                .arg(format!("dev:{device}"))
                .arg("--robot")
                .output(),
        )
        .await
        .map_err(|_| SpindleError::tool(MAKEMKV_BIN, "disc scan operation timed out"))?
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => SpindleError::Dependency {
                tool: MAKEMKV_BIN.to_string(),
                hint: "install MakeMKV from makemkv.com".to_string(),
            },
            _ => SpindleError::tool(MAKEMKV_BIN, e.to_string()),
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();

        if !output.status.success() {
            check_scan_errors(&stdout)?;
            let stderr = String::from_utf8_lossy(&output.stderr);
            let detail = if stderr.trim().is_empty() {
                stdout.trim().to_string()
            } else {
                stderr.trim().to_string()
            };
            return Err(SpindleError::tool(
                MAKEMKV_BIN,
                format!("exit code {:?}: {detail}", output.status.code()),
            ));
        }

        let titles = parse_scan_output(&stdout)?;
        info!("Found {} titles on disc", titles.len());
        Ok((titles, stdout))
    }

    /// Rip one title into `output_dir`, streaming progress events to the
    /// supplied reporter. Returns the path of the produced file.
    pub async fn rip_title<F>(
        &self,
        title: &Title,
        output_dir: &Path,
        device: &str,
        mut progress: F,
    ) -> Result<PathBuf>
    where
        F: FnMut(ProgressEvent) + Send,
    {
        std::fs::create_dir_all(output_dir)?;

        // Stale MakeMKV output would trigger its overwrite prompt.
        for entry in std::fs::read_dir(output_dir)? {
            let path = entry?.path();
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                if name.starts_with("title_t") && name.ends_with(".mkv") {
                    debug!("Removing stale MakeMKV output: {}", path.display());
                    std::fs::remove_file(&path)?;
                }
            }
        }

        let rule = build_selection_rule(SelectionOptions::from(self.config.as_ref()));
        configure_selection(&Self::settings_file(), &rule)?;

        info!("Ripping {} to {}", title.name, output_dir.display());

        let before: Vec<PathBuf> = mkv_files_in(output_dir)?;

        let mut child = Command::new(MAKEMKV_BIN)
            .arg("mkv")
            .arg("--noscan")
            .arg("--robot")
            .arg("--progress=-same")
            .arg(format!("dev:{device}"))
            .arg(&title.title_id)
            .arg(output_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => SpindleError::Dependency {
                    tool: MAKEMKV_BIN.to_string(),
                    hint: "install MakeMKV from makemkv.com".to_string(),
                },
                _ => SpindleError::tool(MAKEMKV_BIN, e.to_string()),
            })?;

        self.active_child.register(child.id());

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SpindleError::tool(MAKEMKV_BIN, "failed to capture stdout"))?;
        let mut reader = BufReader::new(stdout).lines();
        let mut parser = ProgressParser::new();

        let rip_result = timeout(
            Duration::from_secs(self.config.makemkv_rip_timeout),
            async {
                while let Ok(Some(line)) = reader.next_line().await {
                    debug!("makemkvcon: {line}");
                    if let Some(event) = parser.parse_line(&line) {
                        progress(event);
                    }
                }
                child.wait().await
            },
        )
        .await;

        self.active_child.clear();

        let status = match rip_result {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => return Err(SpindleError::tool(MAKEMKV_BIN, e.to_string())),
            Err(_) => {
                let _ = child.kill().await;
                return Err(SpindleError::tool(
                    MAKEMKV_BIN,
                    format!(
                        "ripping operation timed out after {}s",
                        self.config.makemkv_rip_timeout
                    ),
                ));
            }
        };

        if !status.success() {
            return Err(SpindleError::tool(
                MAKEMKV_BIN,
                format!("exit code {:?}", status.code()),
            ));
        }

        let after = mkv_files_in(output_dir)?;
        let mut new_files: Vec<PathBuf> = after
            .into_iter()
            .filter(|p| !before.contains(p))
            .collect();

        // Fall back to the newest file when MakeMKV reused a name.
        if new_files.is_empty() {
            new_files = mkv_files_in(output_dir)?;
        }
        let output_file = new_files
            .into_iter()
            .max_by_key(|p| {
                std::fs::metadata(p)
                    .and_then(|m| m.modified())
                    .unwrap_or(std::time::SystemTime::UNIX_EPOCH)
            })
            .ok_or_else(|| SpindleError::Media("no files produced".to_string()))?;

        info!("Successfully ripped to {}", output_file.display());
        Ok(output_file)
    }
}

fn mkv_files_in(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().and_then(|e| e.to_str()) == Some("mkv") {
            files.push(path);
        }
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn audio(id: &str, lang: &str, codec: &str, name: Option<&str>) -> Track {
        Track {
            track_id: id.to_string(),
            kind: TrackKind::Audio,
            codec: codec.to_string(),
            language: lang.to_string(),
            duration: 5580,
            size: 0,
            title: name.map(str::to_string),
            is_default: false,
        }
    }

    #[test]
    fn test_parse_duration_plain() {
        assert_eq!(parse_duration("1:33:00"), 5580);
        assert_eq!(parse_duration("\"0:22:00\""), 1320);
    }

    #[test]
    fn test_parse_duration_with_artefact_prefix() {
        // MakeMKV sometimes prefixes the value with a count and a quote
        assert_eq!(parse_duration("0,\"1:39:03"), 5943);
    }

    #[test]
    fn test_strip_attr_prefix() {
        assert_eq!(strip_attr_prefix("0,\"Blazing Saddles\""), "Blazing Saddles");
        assert_eq!(strip_attr_prefix("\"plain\""), "plain");
        assert_eq!(strip_attr_prefix("12"), "12");
    }

    #[test]
    fn test_parse_duration_invalid() {
        assert_eq!(parse_duration("90 minutes"), 0);
        assert_eq!(parse_duration(""), 0);
    }

    #[test]
    fn test_parse_scan_output_titles_and_tracks() {
        let output = r#"MSG:1005,0,1,"MakeMKV v1.17 started","%1 started","MakeMKV v1.17"
TCOUNT:2
TINFO:0,2,0,"Blazing Saddles"
TINFO:0,8,0,"12"
TINFO:0,9,0,"1:33:00"
TINFO:0,10,0,"28000000000"
SINFO:0,0,1,6201,"Video"
SINFO:0,0,6,0,"Mpeg4"
SINFO:0,1,1,6202,"Audio"
SINFO:0,1,3,0,"eng"
SINFO:0,1,6,0,"DTS-HD MA"
SINFO:0,2,1,6202,"Audio"
SINFO:0,2,3,0,"eng"
SINFO:0,2,6,0,"AC3"
SINFO:0,2,30,0,"Director's Commentary"
SINFO:0,3,1,6203,"Subtitles"
SINFO:0,3,3,0,"eng"
TINFO:1,9,0,"0:03:00"
TINFO:1,8,0,"1"
"#;

        let titles = parse_scan_output(output).unwrap();
        assert_eq!(titles.len(), 2);

        let main = &titles[0];
        assert_eq!(main.title_id, "0");
        assert_eq!(main.name, "Blazing Saddles");
        assert_eq!(main.duration, 5580);
        assert_eq!(main.size, 28_000_000_000);
        assert_eq!(main.chapters, 12);
        assert_eq!(main.video_tracks().len(), 1);
        assert_eq!(main.audio_tracks().len(), 2);
        assert_eq!(main.subtitle_tracks().len(), 1);
        assert_eq!(main.commentary_tracks().len(), 1);
        assert_eq!(main.main_audio_tracks().len(), 1);
        assert_eq!(main.main_audio_tracks()[0].codec, "DTS-HD MA");

        let trailer = &titles[1];
        assert_eq!(trailer.duration, 180);
        assert_eq!(trailer.name, "Title 1");
    }

    #[test]
    fn test_scan_output_license_error() {
        let output = r#"MSG:5021,0,1,"This application version is too old","%1","x""#;
        let err = parse_scan_output(output).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("too old"));
        assert!(msg.contains("makemkv.com"));
    }

    #[test]
    fn test_scan_output_copy_protection_error() {
        let output = r#"MSG:3024,0,1,"Error processing AACS key","%1","x""#;
        let err = parse_scan_output(output).unwrap_err();
        assert!(err.to_string().contains("copy protection"));
    }

    #[test]
    fn test_commentary_detection() {
        let track = audio("2", "eng", "AC3", Some("Audio Commentary by the director"));
        assert!(track.is_commentary());

        let plain = audio("1", "eng", "DTS-HD MA", Some("Surround 5.1"));
        assert!(!plain.is_commentary());

        // Non-English tracks never count as commentary
        let foreign = audio("3", "fra", "AC3", Some("Commentaire du réalisateur"));
        assert!(!foreign.is_commentary());

        let unnamed = audio("4", "eng", "AC3", None);
        assert!(!unnamed.is_commentary());
    }

    #[test]
    fn test_selection_rule_default_config() {
        let rule = build_selection_rule(SelectionOptions {
            include_all_english_audio: true,
            include_commentary_tracks: true,
            include_alternate_audio: false,
        });
        assert_eq!(rule, "-sel:all,+sel:video,+sel:audio&(eng),-sel:subtitle");
    }

    #[test]
    fn test_selection_rule_no_commentary() {
        let rule = build_selection_rule(SelectionOptions {
            include_all_english_audio: true,
            include_commentary_tracks: false,
            include_alternate_audio: false,
        });
        assert!(rule.contains("-sel:audio&(commentary)"));
        assert!(rule.contains("-sel:audio&(director)"));
    }

    #[test]
    fn test_selection_rule_main_audio_only_with_alternates() {
        let rule = build_selection_rule(SelectionOptions {
            include_all_english_audio: false,
            include_commentary_tracks: false,
            include_alternate_audio: true,
        });
        assert_eq!(
            rule,
            "-sel:all,+sel:video,+sel:audio&(eng)&(!commentary),+sel:audio&(!eng),-sel:subtitle"
        );
    }

    #[test]
    fn test_selection_rule_is_deterministic() {
        let options = SelectionOptions {
            include_all_english_audio: true,
            include_commentary_tracks: false,
            include_alternate_audio: true,
        };
        assert_eq!(build_selection_rule(options), build_selection_rule(options));
    }

    #[test]
    fn test_configure_selection_preserves_other_keys() {
        let dir = tempfile::tempdir().unwrap();
        let settings = dir.path().join("settings.conf");
        std::fs::write(
            &settings,
            "# comment\napp_MinLength = \"300\"\napp_DefaultSelectionString = \"old\"\n",
        )
        .unwrap();

        configure_selection(&settings, "-sel:all,+sel:video").unwrap();

        let contents = std::fs::read_to_string(&settings).unwrap();
        assert!(contents.contains("app_MinLength = \"300\""));
        assert!(contents.contains("app_DefaultSelectionString = \"-sel:all,+sel:video\""));
        assert!(!contents.contains("\"old\""));
    }

    #[test]
    fn test_progress_suppressed_until_save_phase() {
        let mut parser = ProgressParser::new();
        // Scan-phase progress must not leak through
        assert_eq!(parser.parse_line("PRGV:32768,32768,65536"), None);

        parser.parse_line(r#"MSG:5014,0,1,"Saving 1 titles into directory /out","%1","x""#);
        let event = parser.parse_line("PRGV:100,32768,65536").unwrap();
        assert_eq!(
            event,
            ProgressEvent::RippingProgress {
                stage: "Saving to MKV file".to_string(),
                percent: 50.0,
            }
        );
    }

    fn started_parser() -> ProgressParser {
        let mut parser = ProgressParser::new();
        parser.parse_line(r#"MSG:5014,0,1,"Saving 1 titles into directory /out","%1","x""#);
        parser
    }

    #[test]
    fn test_track_completion_line_discarded() {
        let mut parser = started_parser();
        // current == max while total == 0 is per-track completion noise
        assert_eq!(parser.parse_line("PRGV:65536,0,65536"), None);
    }

    #[test]
    fn test_early_hundred_percent_discarded() {
        let mut parser = started_parser();
        assert_eq!(parser.parse_line("PRGV:0,65536,65536"), None);
    }

    #[test]
    fn test_hundred_percent_after_progress_accepted() {
        let mut parser = started_parser();
        assert!(parser.parse_line("PRGV:0,62915,65536").is_some()); // 96%
        let event = parser.parse_line("PRGV:0,65536,65536").unwrap();
        assert_eq!(event.as_progress().unwrap().1, 100.0);
    }

    #[test]
    fn test_progress_throttled_to_five_point_steps() {
        let mut parser = started_parser();
        assert!(parser.parse_line("PRGV:0,6554,65536").is_some()); // 10%
        assert_eq!(parser.parse_line("PRGV:0,7864,65536"), None); // 12%
        assert_eq!(parser.parse_line("PRGV:0,3277,65536"), None); // backwards
        assert!(parser.parse_line("PRGV:0,9831,65536").is_some()); // 15%
    }

    #[test]
    fn test_action_lines_become_status_events() {
        let mut parser = ProgressParser::new();
        let event = parser
            .parse_line("Current action: Analyzing seamless segments")
            .unwrap();
        assert_eq!(
            event.message(),
            Some("Analyzing seamless segments")
        );

        let event = parser.parse_line("Current operation: Scanning CD-ROM content").unwrap();
        assert_eq!(event.message(), Some("Scanning CD-ROM content"));
    }

    #[test]
    fn test_msg_lines_become_status_events() {
        let mut parser = ProgressParser::new();
        let event = parser
            .parse_line(r#"MSG:3307,0,2,"File 00.mpls was added","%1 added","00.mpls""#)
            .unwrap();
        assert_eq!(event.message(), Some("File 00.mpls was added"));
    }
}
