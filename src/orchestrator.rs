use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::analyzer::{ContentKind, DiscAnalyzer};
use crate::config::Config;
use crate::encoder::DraptoEncoder;
use crate::error::{Result, SpindleError};
use crate::monitor::{self, DiscInfo, DiscMonitor};
use crate::notify::Notifier;
use crate::organizer::{file_stem, sanitize_component, LibraryOrganizer};
use crate::process_lock::ProcessLock;
use crate::progress::ProgressEvent;
use crate::queue::{ItemState, QueueItem, QueueStore};
use crate::ripper::MakeMkvRipper;
use crate::subprocess::ActiveChild;
use crate::tmdb::MediaKind;

const CHILD_TERMINATE_GRACE_SECS: u64 = 10;

/// Snapshot returned by `get_status`.
#[derive(Debug, Clone)]
pub struct OrchestratorStatus {
    pub running: bool,
    pub current_disc: Option<String>,
    pub stats: std::collections::HashMap<ItemState, usize>,
    pub in_flight: Option<(i64, String, f32)>,
}

struct Inner {
    config: Arc<Config>,
    store: Arc<QueueStore>,
    analyzer: DiscAnalyzer,
    ripper: MakeMkvRipper,
    encoder: DraptoEncoder,
    organizer: LibraryOrganizer,
    notifier: Notifier,
    active_child: Arc<ActiveChild>,
    running: AtomicBool,
}

/// Owns the state machine: picks the next item, drives it through one
/// stage at a time, persists every transition before the next stage.
pub struct Orchestrator {
    inner: Arc<Inner>,
    lock: ProcessLock,
    monitor: Option<DiscMonitor>,
    pump: Option<JoinHandle<()>>,
}

impl Orchestrator {
    pub fn new(config: Arc<Config>) -> Result<Self> {
        let store = Arc::new(QueueStore::open(&config.queue_db_path())?);
        let active_child = Arc::new(ActiveChild::new());
        let lock = ProcessLock::new(config.lock_file_path());

        let inner = Arc::new(Inner {
            analyzer: DiscAnalyzer::new(config.clone())?,
            ripper: MakeMkvRipper::new(config.clone(), active_child.clone()),
            encoder: DraptoEncoder::new(config.clone(), active_child.clone()),
            organizer: LibraryOrganizer::new(config.clone()),
            notifier: Notifier::new(&config),
            store,
            active_child,
            running: AtomicBool::new(false),
            config,
        });

        Ok(Orchestrator {
            inner,
            lock,
            monitor: None,
            pump: None,
        })
    }

    pub fn store(&self) -> Arc<QueueStore> {
        self.inner.store.clone()
    }

    /// Acquire the instance lock, recover from any crash, start the disc
    /// monitor and the work pump.
    pub async fn start(&mut self) -> Result<()> {
        if self.inner.running.load(Ordering::SeqCst) {
            warn!("Orchestrator is already running");
            return Ok(());
        }

        self.inner.config.validate()?;
        if !self.lock.acquire() {
            return Err(SpindleError::AlreadyRunning);
        }
        self.inner.config.ensure_directories()?;

        let reset = self.inner.store.reset_stuck_processing()?;
        if reset > 0 {
            info!("Reset {reset} item(s) left mid-stage by a previous run");
        }

        self.inner.analyzer.series_cache().cleanup_expired()?;
        self.inner.analyzer.tmdb().cache().cleanup_expired()?;

        self.inner.running.store(true, Ordering::SeqCst);

        let (disc_tx, disc_rx) = mpsc::channel::<DiscInfo>(8);
        self.monitor = Some(DiscMonitor::start(
            self.inner.config.optical_drive.clone(),
            self.inner.config.disc_monitor_timeout,
            disc_tx.clone(),
        ));

        // A disc already sitting in the drive counts as an insertion.
        if let Some(disc) = monitor::detect_disc(
            &self.inner.config.optical_drive,
            self.inner.config.disc_monitor_timeout,
        )
        .await
        {
            info!("Found existing disc: {disc}");
            let _ = disc_tx.send(disc).await;
        }

        let inner = self.inner.clone();
        self.pump = Some(tokio::spawn(async move {
            inner.run_pump(disc_rx).await;
        }));

        info!("Orchestrator started - ready for discs");
        Ok(())
    }

    /// Signal the pump to exit at the next safe point, cancel any
    /// in-flight external process, release the lock.
    pub async fn stop(&mut self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("Stopping orchestrator");

        if let Some(monitor) = self.monitor.as_mut() {
            monitor.stop();
        }

        self.inner.active_child.terminate(CHILD_TERMINATE_GRACE_SECS).await;

        if let Some(pump) = self.pump.take() {
            // The pump persists the interrupted item before exiting.
            if tokio::time::timeout(Duration::from_secs(30), pump).await.is_err() {
                warn!("Work pump did not stop within 30s");
            }
        }

        self.lock.release();
        info!("Orchestrator stopped");
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Explicit user retry: FAILED items go back to PENDING.
    pub fn retry(&self, item_id: i64) -> Result<()> {
        let Some(mut item) = self.inner.store.get(item_id)? else {
            return Err(SpindleError::Store(format!("no queue item {item_id}")));
        };
        if item.state != ItemState::Failed {
            return Err(SpindleError::Store(format!(
                "item {item_id} is {}, only failed items can be retried",
                item.state
            )));
        }
        item.state = ItemState::Pending;
        item.error_message = None;
        item.progress_stage = None;
        item.progress_percent = 0.0;
        item.progress_message = None;
        self.inner.store.update(&item)?;
        info!("Retrying item {item_id}");
        Ok(())
    }

    pub async fn get_status(&self) -> Result<OrchestratorStatus> {
        let stats = self.inner.store.stats()?;

        let current_disc = monitor::detect_disc(
            &self.inner.config.optical_drive,
            self.inner.config.disc_monitor_timeout,
        )
        .await
        .map(|d| d.to_string());

        let mut in_flight = None;
        for state in [
            ItemState::Identifying,
            ItemState::Ripping,
            ItemState::Encoding,
            ItemState::Organizing,
        ] {
            if let Some(item) = self.inner.store.list_by_state(state)?.into_iter().next() {
                in_flight = Some((
                    item.id,
                    item.progress_stage.unwrap_or_else(|| state.to_string()),
                    item.progress_percent,
                ));
                break;
            }
        }

        Ok(OrchestratorStatus {
            running: self.is_running(),
            current_disc,
            stats,
            in_flight,
        })
    }
}

impl Inner {
    fn running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn run_pump(self: Arc<Self>, mut disc_rx: mpsc::Receiver<DiscInfo>) {
        info!("Started background work pump");

        while self.running() {
            // Fresh discs take precedence as soon as the current stage
            // is done.
            while let Ok(disc) = disc_rx.try_recv() {
                self.handle_disc(disc).await;
                if !self.running() {
                    break;
                }
            }
            if !self.running() {
                break;
            }

            let next = match self.next_processable() {
                Ok(next) => next,
                Err(e) => {
                    error!("Error reading the queue: {e}");
                    sleep(Duration::from_secs(self.config.error_retry_interval)).await;
                    continue;
                }
            };

            match next {
                Some(item) => self.process_item(item).await,
                None => {
                    tokio::select! {
                        disc = disc_rx.recv() => match disc {
                            Some(disc) => self.handle_disc(disc).await,
                            None => break,
                        },
                        _ = sleep(Duration::from_secs(self.config.queue_poll_interval)) => {}
                    }
                }
            }
        }

        info!("Background work pump stopped");
    }

    /// Scheduling policy: ready-to-rip first, then ready-to-encode, then
    /// ready-to-organize; FIFO within each bucket. Pending items that
    /// already carry files (crash recovery, retries of file items) are
    /// promoted back into the pipeline.
    fn next_processable(&self) -> Result<Option<QueueItem>> {
        for state in [ItemState::Identified, ItemState::Ripped, ItemState::Encoded] {
            if let Some(item) = self.store.list_by_state(state)?.into_iter().next() {
                return Ok(Some(item));
            }
        }

        for mut item in self.store.list_by_state(ItemState::Pending)? {
            if !item.encoded_files.is_empty() {
                item.state = ItemState::Encoded;
            } else if !item.ripped_files.is_empty() || item.source_path.is_some() {
                item.state = ItemState::Ripped;
            } else {
                continue; // disc item, waits for the disc
            }
            self.store.update(&item)?;
            return Ok(Some(item));
        }

        Ok(None)
    }

    async fn process_item(&self, item: QueueItem) {
        let item_id = item.id;
        let context = item.to_string();
        info!("Processing: {context}");

        let result = match item.state {
            ItemState::Identified => self.rip_stage(item).await,
            ItemState::Ripped => self.encode_stage(item).await,
            ItemState::Encoded => self.organize_stage(item).await,
            other => {
                debug!("Item {item_id} in state {other} has nothing to run");
                Ok(())
            }
        };

        if let Err(e) = result {
            let message = if self.running() {
                e.to_string()
            } else {
                "interrupted".to_string()
            };
            error!("Error processing item {item_id}: {message}");
            self.fail_item(item_id, &message).await;
            self.notifier.notify_error(&message, Some(context.as_str())).await;
        }
    }

    async fn fail_item(&self, item_id: i64, message: &str) {
        match self.store.get(item_id) {
            Ok(Some(mut item)) if !item.state.is_terminal() => {
                item.state = ItemState::Failed;
                item.error_message = Some(message.to_string());
                if let Err(e) = self.store.update(&item) {
                    error!("Failed to persist failure of item {item_id}: {e}");
                }
            }
            Ok(_) => {}
            Err(e) => error!("Failed to load item {item_id} for failure: {e}"),
        }
    }

    /// Disc insertion: one item per insertion. A repeat insertion while
    /// the previous item is live either re-dispatches identification
    /// (still PENDING, e.g. after a restart) or is ignored.
    async fn handle_disc(&self, disc: DiscInfo) {
        info!("Detected disc: {disc}");
        self.notifier
            .notify_disc_detected(&disc.label, &disc.disc_type.to_string())
            .await;

        let existing = match self.store.list_all() {
            Ok(items) => items.into_iter().find(|i| {
                !i.state.is_terminal() && i.disc_title.as_deref() == Some(disc.label.as_str())
            }),
            Err(e) => {
                error!("Queue lookup failed for disc {}: {e}", disc.label);
                return;
            }
        };

        let item = match existing {
            Some(item) if item.state == ItemState::Pending => {
                info!("Re-dispatching identification for existing item {}", item.id);
                item
            }
            Some(item) => {
                info!(
                    "Disc '{}' already queued as item {} ({}), ignoring insertion",
                    disc.label, item.id, item.state
                );
                return;
            }
            None => match self.store.add_disc(&disc.label) {
                Ok(item) => item,
                Err(e) => {
                    error!("Failed to enqueue disc {}: {e}", disc.label);
                    self.notifier
                        .notify_error(&e.to_string(), Some(disc.label.as_str()))
                        .await;
                    return;
                }
            },
        };

        let item_id = item.id;
        let context = item.to_string();
        if let Err(e) = self.identify_disc(item, &disc).await {
            let message = if self.running() {
                e.to_string()
            } else {
                "interrupted".to_string()
            };
            error!("Identification failed for item {item_id}: {message}");
            self.fail_item(item_id, &message).await;
            self.notifier.notify_error(&message, Some(context.as_str())).await;
        }
    }

    /// PENDING -> IDENTIFYING -> IDENTIFIED | REVIEW.
    async fn identify_disc(&self, mut item: QueueItem, disc: &DiscInfo) -> Result<()> {
        item.state = ItemState::Identifying;
        item.set_progress("identifying", 0.0, Some("scanning disc"));
        self.store.update(&item)?;

        let (titles, scan_output) = self.ripper.scan_disc_with_output(&disc.device).await?;

        let disc_path = find_mount_point(&disc.device);
        let analysis = self
            .analyzer
            .analyze(disc, &titles, disc_path.as_deref(), Some(&scan_output))
            .await?;

        if analysis.plan.media_info.is_none() {
            // Identification found no match; park for operator review.
            warn!("Could not identify disc '{}'", disc.label);
            item.state = ItemState::Review;
            item.rip_plan = Some(analysis.plan);
            item.set_progress("review", 0.0, Some("no metadata match"));
            self.store.update(&item)?;
            self.notifier.notify_unidentified_media(&disc.label).await;
            return Ok(());
        }

        info!(
            "Identified '{}' as {} (confidence {:.2})",
            analysis.primary_title, analysis.plan.content_kind, analysis.plan.confidence
        );
        item.media_info = analysis.plan.media_info.clone();
        item.rip_plan = Some(analysis.plan);
        item.state = ItemState::Identified;
        item.set_progress("identified", 100.0, Some(analysis.primary_title.as_str()));
        self.store.update(&item)?;
        Ok(())
    }

    /// IDENTIFIED -> RIPPING -> RIPPED. Ends with the disc ejected.
    async fn rip_stage(&self, mut item: QueueItem) -> Result<()> {
        let plan = item
            .rip_plan
            .clone()
            .ok_or_else(|| SpindleError::Media("item has no rip plan".to_string()))?;

        let disc_label = item.disc_title.clone().unwrap_or_default();
        item.state = ItemState::Ripping;
        item.set_progress("ripping", 0.0, None);
        self.store.update(&item)?;
        self.notifier.notify_rip_started(&disc_label).await;

        let started = std::time::Instant::now();
        let device = self.config.optical_drive.clone();
        let total = plan.titles.len().max(1);

        let shared = Arc::new(Mutex::new(item));
        let mut ripped_files: Vec<PathBuf> = Vec::new();

        for (idx, planned) in plan.titles.iter().enumerate() {
            if !self.running() {
                return Err(SpindleError::Media("interrupted".to_string()));
            }
            let output_dir = match plan.content_kind {
                ContentKind::TvSeries => self.config.episodes_dir(),
                _ if planned.is_extra => self.config.extras_dir(),
                _ => self.config.ripped_dir(),
            };

            let store = self.store.clone();
            let shared_item = shared.clone();
            let base_percent = (idx as f32 / total as f32) * 100.0;
            let span = 100.0 / total as f32;

            let title = crate::ripper::Title::new(
                &planned.title_id,
                planned.duration,
                0,
                0,
                Vec::new(),
                Some(&planned.name),
            );

            let output = self
                .ripper
                .rip_title(&title, &output_dir, &device, move |event| {
                    let mut item = shared_item.lock().unwrap();
                    match &event {
                        ProgressEvent::RippingProgress { stage, percent } => {
                            let overall = base_percent + percent / 100.0 * span;
                            if overall >= item.progress_percent {
                                item.set_progress("ripping", overall, Some(stage.as_str()));
                                let _ = store.update(&item);
                            }
                        }
                        ProgressEvent::RippingStatus { message } => {
                            let percent = item.progress_percent;
                            item.set_progress("ripping", percent, Some(message.as_str()));
                            let _ = store.update(&item);
                        }
                        _ => {}
                    }
                })
                .await?;

            // Name staging output after the plan so downstream stages can
            // trace files back to their episode slots.
            let stem = {
                let item = shared.lock().unwrap();
                match (&item.media_info, &planned.episode) {
                    (Some(info), episode) => file_stem(info, episode.as_ref()),
                    (None, _) => sanitize_component(&planned.name),
                }
            };
            let renamed = unique_path(&output_dir, &stem, "mkv");
            tokio::fs::rename(&output, &renamed).await?;
            ripped_files.push(renamed);
        }

        if ripped_files.is_empty() {
            return Err(SpindleError::Media("no files produced".to_string()));
        }

        // One disc in, one disc out: the drive frees up before encoding.
        monitor::eject_disc(&device, 30).await;

        let mut item = Arc::try_unwrap(shared)
            .map_err(|_| SpindleError::Store("rip progress callback still live".to_string()))?
            .into_inner()
            .unwrap();
        item.ripped_file = ripped_files.first().cloned();
        item.ripped_files = ripped_files;
        item.state = ItemState::Ripped;
        item.set_progress("ripped", 100.0, None);
        self.store.update(&item)?;

        let elapsed = format_duration(started.elapsed().as_secs());
        self.notifier
            .notify_rip_completed(&disc_label, &elapsed)
            .await;
        Ok(())
    }

    /// RIPPED -> ENCODING -> ENCODED. File-injected items without
    /// metadata are identified from their file name first; the
    /// unidentifiable ones move to review.
    async fn encode_stage(&self, mut item: QueueItem) -> Result<()> {
        if item.media_info.is_none() {
            if !self.identify_file_item(&mut item).await? {
                return Ok(()); // parked in REVIEW
            }
        }

        let inputs = if item.ripped_files.is_empty() {
            item.ripped_file.clone().map(|f| vec![f]).unwrap_or_default()
        } else {
            item.ripped_files.clone()
        };
        if inputs.is_empty() {
            return Err(SpindleError::Media(
                "no ripped file recorded for encoding".to_string(),
            ));
        }

        item.state = ItemState::Encoding;
        item.set_progress("encoding", 0.0, None);
        self.store.update(&item)?;

        let encoded_dir = self.config.encoded_dir();
        let shared = Arc::new(Mutex::new(item));
        let store = self.store.clone();
        let shared_for_progress = shared.clone();

        let results = self
            .encoder
            .encode_batch(&inputs, &encoded_dir, move |event| {
                let mut item = shared_for_progress.lock().unwrap();
                match &event {
                    ProgressEvent::EncodingProgress { percent, speed, fps, .. } => {
                        if *percent >= item.progress_percent {
                            let message = format!("speed {speed:.1}x, fps {fps:.1}");
                            item.set_progress("encoding", *percent, Some(message.as_str()));
                            let _ = store.update(&item);
                        }
                    }
                    ProgressEvent::StageProgress { stage, percent, message } => {
                        if *percent >= item.progress_percent {
                            let label = if message.is_empty() { stage } else { message };
                            item.set_progress("encoding", *percent, Some(label.as_str()));
                            let _ = store.update(&item);
                        }
                    }
                    ProgressEvent::EncodingComplete { size_reduction_percent } => {
                        info!("Encoding complete, size reduced {size_reduction_percent:.1}%");
                    }
                    ProgressEvent::ValidationComplete { validation_passed } => {
                        if !*validation_passed {
                            warn!("Encoder validation failed");
                        }
                    }
                    ProgressEvent::Warning { message } => warn!("drapto: {message}"),
                    ProgressEvent::Error { message } => error!("drapto: {message}"),
                    _ => {}
                }
            })
            .await?;

        let mut item = Arc::try_unwrap(shared)
            .map_err(|_| SpindleError::Store("encode progress callback still live".to_string()))?
            .into_inner()
            .unwrap();

        if let Some(failure) = results.iter().find(|r| !r.success) {
            let message = failure
                .error_message
                .clone()
                .unwrap_or_else(|| "encoding failed".to_string());
            return Err(SpindleError::tool(crate::encoder::DRAPTO_BIN, message));
        }

        item.encoded_files = results
            .iter()
            .filter_map(|r| r.output_file.clone())
            .collect();
        item.encoded_file = item.encoded_files.first().cloned();
        item.state = ItemState::Encoded;
        item.set_progress("encoded", 100.0, None);
        self.store.update(&item)?;
        info!("Encoded {} file(s)", item.encoded_files.len());
        Ok(())
    }

    /// Identify a file-injected item from its name. Returns false when
    /// the item was parked in REVIEW.
    async fn identify_file_item(&self, item: &mut QueueItem) -> Result<bool> {
        let Some(source) = item.ripped_file.clone().or_else(|| item.source_path.clone()) else {
            return Err(SpindleError::Media("item has no source file".to_string()));
        };

        item.state = ItemState::Identifying;
        item.set_progress("identifying", 0.0, Some("matching file name"));
        self.store.update(item)?;

        match self.analyzer.tmdb().identify_file(&source).await {
            Some(info) => {
                info!("Identified file as {info}");
                item.media_info = Some(info);
                item.state = ItemState::Ripped;
                self.store.update(item)?;
                Ok(true)
            }
            None => {
                let name = source
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default();
                let reviewed = self.organizer.move_to_review(&source, "unidentified").await?;
                item.ripped_file = Some(reviewed.clone());
                item.ripped_files = vec![reviewed];
                item.state = ItemState::Review;
                self.store.update(item)?;
                self.notifier.notify_unidentified_media(&name).await;
                Ok(false)
            }
        }
    }

    /// ENCODED -> ORGANIZING -> COMPLETED, then a library refresh and
    /// one notification.
    async fn organize_stage(&self, mut item: QueueItem) -> Result<()> {
        let media_info = item
            .media_info
            .clone()
            .ok_or_else(|| SpindleError::Media("no media info for organizing".to_string()))?;
        let files = if item.encoded_files.is_empty() {
            item.encoded_file.clone().map(|f| vec![f]).unwrap_or_default()
        } else {
            item.encoded_files.clone()
        };
        if files.is_empty() {
            return Err(SpindleError::Media(
                "no encoded file recorded for organizing".to_string(),
            ));
        }

        item.state = ItemState::Organizing;
        item.set_progress("organizing", 0.0, None);
        self.store.update(&item)?;

        // Episode slots in plan order line up with the staged files.
        let episodes: Vec<Option<crate::analyzer::EpisodeAssignment>> = item
            .rip_plan
            .as_ref()
            .map(|plan| {
                plan.titles
                    .iter()
                    .filter(|t| !t.is_extra)
                    .map(|t| t.episode.clone())
                    .collect()
            })
            .unwrap_or_default();

        let mut installed = Vec::with_capacity(files.len());
        for (idx, file) in files.iter().enumerate() {
            let episode = episodes.get(idx).cloned().flatten();
            let final_path = self
                .organizer
                .organize(file, &media_info, episode.as_ref())
                .await?;
            installed.push(final_path);
        }

        item.final_file = installed.first().cloned();
        item.state = ItemState::Completed;
        item.set_progress("completed", 100.0, None);
        self.store.update(&item)?;

        self.organizer.refresh_library(media_info.kind).await;
        let media_type = match media_info.kind {
            MediaKind::Movie => "Movie",
            MediaKind::Tv => "TV",
        };
        self.notifier
            .notify_media_added(&media_info.to_string(), media_type)
            .await;
        info!("Completed: {media_info}");
        Ok(())
    }
}

/// Look the device up in /proc/mounts to find where the disc is mounted,
/// if anywhere.
fn find_mount_point(device: &str) -> Option<PathBuf> {
    let mounts = std::fs::read_to_string("/proc/mounts").ok()?;
    for line in mounts.lines() {
        let mut fields = line.split_whitespace();
        let (Some(dev), Some(mount_point)) = (fields.next(), fields.next()) else {
            continue;
        };
        if dev == device {
            // Mount entries escape spaces as \040
            return Some(PathBuf::from(mount_point.replace("\\040", " ")));
        }
    }
    None
}

fn unique_path(dir: &Path, stem: &str, extension: &str) -> PathBuf {
    let mut candidate = dir.join(format!("{stem}.{extension}"));
    let mut counter = 1;
    while candidate.exists() {
        candidate = dir.join(format!("{stem} ({counter}).{extension}"));
        counter += 1;
    }
    candidate
}

fn format_duration(total_secs: u64) -> String {
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    format!("{hours:02}:{minutes:02}:{seconds:02}")
}
