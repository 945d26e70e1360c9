use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::SpindleError;

/// Episode numbering strategy for TV discs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EpisodeMappingStrategy {
    /// Number titles in plan order.
    Sequential,
    /// Match each title to the nearest-runtime episode.
    Duration,
    /// Runtime matching first, sequential fill for the rest.
    Hybrid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // Paths
    pub staging_dir: PathBuf,
    pub library_dir: PathBuf,
    pub log_dir: PathBuf,
    pub review_dir: PathBuf,

    // Hardware
    pub optical_drive: String,

    // TMDB
    pub tmdb_api_key: Option<String>,
    pub tmdb_language: String,

    // Drapto encoder
    pub drapto_quality_sd: u32,
    pub drapto_quality_hd: u32,
    pub drapto_quality_uhd: u32,
    pub drapto_preset: u32,

    // Library layout
    pub movies_dir: String,
    pub tv_dir: String,

    // Plex
    pub plex_url: Option<String>,
    pub plex_token: Option<String>,
    pub movies_library: String,
    pub tv_library: String,

    // Notifications
    pub ntfy_topic: Option<String>,

    // Timeouts (seconds)
    pub makemkv_info_timeout: u64,
    pub makemkv_rip_timeout: u64,
    pub drapto_encode_timeout: u64,
    pub tmdb_request_timeout: u64,
    pub plex_request_timeout: u64,
    pub ntfy_request_timeout: u64,
    pub disc_monitor_timeout: u64,

    // Intervals (seconds)
    pub queue_poll_interval: u64,
    pub error_retry_interval: u64,

    // Audio track selection
    pub include_all_english_audio: bool,
    pub include_commentary_tracks: bool,
    pub include_alternate_audio: bool,

    // TV series detection
    pub tv_episode_min_duration: u32, // minutes
    pub tv_episode_max_duration: u32, // minutes
    pub episode_mapping_strategy: EpisodeMappingStrategy,

    // Movie detection
    pub movie_min_duration: u32, // minutes
    pub include_movie_extras: bool,
    pub max_extras_to_rip: usize,
    pub max_extras_duration: u32, // minutes

    // Short content (cartoon discs)
    pub allow_short_content: bool,

    // Analysis
    pub enable_enhanced_disc_metadata: bool,
    pub confidence_threshold: f32,

    // Caching
    pub series_cache_ttl_days: u32,
    pub tmdb_cache_ttl_days: u32,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("spindle");
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));

        Config {
            staging_dir: data_dir.join("staging"),
            library_dir: home.join("library"),
            log_dir: data_dir.join("logs"),
            review_dir: home.join("review"),
            optical_drive: "/dev/sr0".to_string(),
            tmdb_api_key: None,
            tmdb_language: "en-US".to_string(),
            drapto_quality_sd: 23,
            drapto_quality_hd: 25,
            drapto_quality_uhd: 27,
            drapto_preset: 4,
            movies_dir: "movies".to_string(),
            tv_dir: "tv".to_string(),
            plex_url: None,
            plex_token: None,
            movies_library: "Movies".to_string(),
            tv_library: "TV Shows".to_string(),
            ntfy_topic: None,
            makemkv_info_timeout: 60,
            makemkv_rip_timeout: 3600,
            drapto_encode_timeout: 28800,
            tmdb_request_timeout: 30,
            plex_request_timeout: 30,
            ntfy_request_timeout: 10,
            disc_monitor_timeout: 5,
            queue_poll_interval: 5,
            error_retry_interval: 10,
            include_all_english_audio: true,
            include_commentary_tracks: true,
            include_alternate_audio: false,
            tv_episode_min_duration: 18,
            tv_episode_max_duration: 90,
            episode_mapping_strategy: EpisodeMappingStrategy::Hybrid,
            movie_min_duration: 70,
            include_movie_extras: false,
            max_extras_to_rip: 5,
            max_extras_duration: 30,
            allow_short_content: true,
            enable_enhanced_disc_metadata: true,
            confidence_threshold: 0.7,
            series_cache_ttl_days: 90,
            tmdb_cache_ttl_days: 30,
        }
    }
}

/// Get the path to the config file (~/.config/spindle/config.yaml).
pub fn get_config_path() -> PathBuf {
    if let Some(config_dir) = dirs::config_dir() {
        return config_dir.join("spindle").join("config.yaml");
    }
    PathBuf::from("config.yaml")
}

impl Config {
    /// Load config from the default location, falling back to defaults.
    pub fn load() -> Result<Self> {
        let config_path = get_config_path();

        if config_path.exists() {
            info!("Loading config from {}", config_path.display());
            Self::load_from_file(&config_path)
        } else {
            warn!("No config.yaml found, using defaults");
            Ok(Config::default())
        }
    }

    /// Load config from a specific file.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = serde_yaml::from_str(&contents)?;

        if let Some(ref key) = config.tmdb_api_key {
            if key == "YOUR_API_KEY_HERE" || key.is_empty() {
                warn!("TMDB API key not configured in config.yaml");
                config.tmdb_api_key = None;
            }
        }

        debug!(
            "Config loaded: drive={}, staging={}",
            config.optical_drive,
            config.staging_dir.display()
        );

        Ok(config)
    }

    /// Get the TMDB API key from config or environment.
    pub fn get_tmdb_api_key(&self) -> Option<String> {
        self.tmdb_api_key
            .clone()
            .or_else(|| std::env::var("TMDB_API_KEY").ok())
    }

    /// Fatal-at-startup validation. The daemon refuses to start without a
    /// metadata API key; everything else has a workable default.
    pub fn validate(&self) -> std::result::Result<(), SpindleError> {
        if self.get_tmdb_api_key().is_none() {
            return Err(SpindleError::Configuration {
                message: "tmdb_api_key is required; set it in config.yaml or TMDB_API_KEY"
                    .to_string(),
                path: Some(get_config_path()),
            });
        }
        if self.tv_episode_min_duration >= self.tv_episode_max_duration {
            return Err(SpindleError::Configuration {
                message: "tv_episode_min_duration must be below tv_episode_max_duration"
                    .to_string(),
                path: Some(get_config_path()),
            });
        }
        Ok(())
    }

    /// Create the staging, log and review trees if they don't exist.
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        for dir in [
            self.staging_dir.clone(),
            self.log_dir.clone(),
            self.review_dir.clone(),
            self.ripped_dir(),
            self.encoded_dir(),
            self.episodes_dir(),
            self.extras_dir(),
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    pub fn ripped_dir(&self) -> PathBuf {
        self.staging_dir.join("ripped")
    }

    pub fn encoded_dir(&self) -> PathBuf {
        self.staging_dir.join("encoded")
    }

    pub fn episodes_dir(&self) -> PathBuf {
        self.staging_dir.join("episodes")
    }

    pub fn extras_dir(&self) -> PathBuf {
        self.staging_dir.join("extras")
    }

    pub fn queue_db_path(&self) -> PathBuf {
        self.log_dir.join("queue.db")
    }

    pub fn tmdb_cache_db_path(&self) -> PathBuf {
        self.log_dir.join("tmdb_cache.db")
    }

    pub fn series_cache_db_path(&self) -> PathBuf {
        self.log_dir.join("series_cache.db")
    }

    pub fn lock_file_path(&self) -> PathBuf {
        self.log_dir.join("spindle.lock")
    }

    /// Effective TV episode window in seconds. With short content allowed
    /// the lower bound drops to cover cartoon-length titles.
    pub fn tv_episode_window_secs(&self) -> (u64, u64) {
        let min_minutes = if self.allow_short_content {
            self.tv_episode_min_duration.min(5)
        } else {
            self.tv_episode_min_duration
        };
        (
            u64::from(min_minutes) * 60,
            u64::from(self.tv_episode_max_duration) * 60,
        )
    }
}
