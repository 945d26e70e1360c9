use chrono::{DateTime, Utc};
use std::path::Path;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

/// Kind of optical disc in the drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscType {
    Dvd,
    BluRay,
    Unknown,
}

impl std::fmt::Display for DiscType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiscType::Dvd => f.write_str("DVD"),
            DiscType::BluRay => f.write_str("Blu-ray"),
            DiscType::Unknown => f.write_str("Unknown"),
        }
    }
}

/// Transient descriptor of a disc present in the drive.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscInfo {
    pub device: String,
    pub disc_type: DiscType,
    pub label: String,
    pub detected_at: DateTime<Utc>,
}

impl DiscInfo {
    pub fn new(device: &str, disc_type: DiscType, label: &str) -> Self {
        DiscInfo {
            device: device.to_string(),
            disc_type,
            label: label.to_string(),
            detected_at: Utc::now(),
        }
    }
}

impl std::fmt::Display for DiscInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = if self.label.is_empty() {
            "Unknown"
        } else {
            &self.label
        };
        write!(f, "{} disc '{}' on {}", self.disc_type, label, self.device)
    }
}

async fn run_probe(cmd: &str, args: &[&str], timeout_secs: u64) -> Option<std::process::Output> {
    let result = timeout(
        Duration::from_secs(timeout_secs),
        Command::new(cmd).args(args).output(),
    )
    .await;

    match result {
        Ok(Ok(output)) => Some(output),
        Ok(Err(e)) => {
            debug!("Probe {cmd} failed to run: {e}");
            None
        }
        Err(_) => {
            debug!("Probe {cmd} timed out after {timeout_secs}s");
            None
        }
    }
}

/// Split `lsblk -no LABEL,FSTYPE` output into (label, fstype).
fn parse_lsblk_output(output: &str) -> Option<(String, String)> {
    let line = output.trim();
    if line.is_empty() {
        return None;
    }
    let mut parts = line.split_whitespace();
    // A blank label collapses to a single fstype column.
    match (parts.next(), parts.next()) {
        (Some(first), Some(second)) => Some((first.to_string(), second.to_string())),
        (Some(only), None) => Some((String::new(), only.to_string())),
        _ => None,
    }
}

/// One-shot probe: is there a readable disc in the drive right now?
pub async fn detect_disc(device: &str, timeout_secs: u64) -> Option<DiscInfo> {
    let output = run_probe("lsblk", &["-no", "LABEL,FSTYPE", device], timeout_secs).await?;
    if !output.status.success() {
        debug!("No disc detected on {device}");
        return None;
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let (label, fstype) = parse_lsblk_output(&stdout)?;
    let disc_type = determine_disc_type(device, &fstype, timeout_secs).await;

    Some(DiscInfo::new(device, disc_type, &label))
}

async fn determine_disc_type(device: &str, fstype: &str, timeout_secs: u64) -> DiscType {
    if let Some(output) = run_probe("blkid", &["-p", "-s", "TYPE", device], timeout_secs).await {
        if output.status.success() {
            let stdout = String::from_utf8_lossy(&output.stdout).to_lowercase();
            if stdout.contains("udf") {
                return detect_bluray_vs_dvd(device, timeout_secs).await;
            }
            if stdout.contains("iso9660") {
                return DiscType::Dvd;
            }
        }
    }

    match fstype.to_lowercase().as_str() {
        "udf" => detect_bluray_vs_dvd(device, timeout_secs).await,
        "iso9660" => DiscType::Dvd,
        _ => DiscType::Unknown,
    }
}

/// Classify a mounted disc by its directory structure.
fn classify_mounted_structure(mount_path: &Path) -> DiscType {
    if mount_path.join("BDMV").exists() {
        return DiscType::BluRay;
    }
    if mount_path.join("VIDEO_TS").exists() {
        return DiscType::Dvd;
    }
    DiscType::Unknown
}

/// UDF could be either format; check `file -s` first and fall back to a
/// short-lived mount probe of the directory structure.
async fn detect_bluray_vs_dvd(device: &str, timeout_secs: u64) -> DiscType {
    if let Some(output) = run_probe("file", &["-s", device], timeout_secs).await {
        if output.status.success() {
            let stdout = String::from_utf8_lossy(&output.stdout).to_lowercase();
            if stdout.contains("blu-ray") || stdout.contains("bdav") || stdout.contains("bdmv") {
                return DiscType::BluRay;
            }
        }
    }

    let mount_point = std::env::temp_dir().join("spindle-disc-probe");
    if std::fs::create_dir_all(&mount_point).is_ok() {
        let mount_point_str = mount_point.to_string_lossy().to_string();
        let mounted = run_probe(
            "mount",
            &["-o", "ro", device, mount_point_str.as_str()],
            timeout_secs,
        )
        .await
        .map(|o| o.status.success())
        .unwrap_or(false);

        if mounted {
            let kind = classify_mounted_structure(&mount_point);
            run_probe("umount", &[device], timeout_secs).await;
            if kind != DiscType::Unknown {
                return kind;
            }
        }
    }

    // Most modern UDF video discs are Blu-ray.
    DiscType::BluRay
}

/// Eject the disc. Failures are logged, not fatal.
pub async fn eject_disc(device: &str, timeout_secs: u64) -> bool {
    match run_probe("eject", &[device], timeout_secs).await {
        Some(output) if output.status.success() => {
            info!("Ejected disc from {device}");
            true
        }
        Some(output) => {
            warn!(
                "Failed to eject disc: {}",
                String::from_utf8_lossy(&output.stderr)
            );
            false
        }
        None => false,
    }
}

/// Wait for the drive to report no disc, up to `timeout_secs`.
pub async fn wait_for_removal(device: &str, timeout_secs: u64) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(timeout_secs);
    while tokio::time::Instant::now() < deadline {
        if detect_disc(device, 5).await.is_none() {
            return true;
        }
        sleep(Duration::from_secs(1)).await;
    }
    false
}

/// Watches the configured drive and hands newly detected discs to the
/// orchestrator over a channel. Polls on a 2-second cadence, which also
/// debounces repeat events: a disc fires once on the absent-to-present
/// transition and again only after it was removed.
pub struct DiscMonitor {
    handle: Option<JoinHandle<()>>,
}

impl DiscMonitor {
    pub fn start(device: String, probe_timeout: u64, events: mpsc::Sender<DiscInfo>) -> Self {
        info!("Starting disc monitoring on {device}");

        let handle = tokio::spawn(async move {
            let mut present_label: Option<String> = None;

            loop {
                match detect_disc(&device, probe_timeout).await {
                    Some(disc) => {
                        let is_new = present_label.as_deref() != Some(disc.label.as_str());
                        if is_new {
                            info!("Detected: {disc}");
                            present_label = Some(disc.label.clone());
                            if events.send(disc).await.is_err() {
                                debug!("Disc event channel closed, stopping monitor");
                                break;
                            }
                        }
                    }
                    None => {
                        if present_label.take().is_some() {
                            debug!("Disc removed from {device}");
                        }
                    }
                }

                sleep(Duration::from_secs(2)).await;
            }
        });

        DiscMonitor {
            handle: Some(handle),
        }
    }

    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            info!("Stopped disc monitoring");
        }
    }
}

impl Drop for DiscMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}
