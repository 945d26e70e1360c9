use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Result, SpindleError};
use crate::progress::ProgressEvent;
use crate::subprocess::ActiveChild;

pub const DRAPTO_BIN: &str = "drapto";

/// Outcome of one encode. Failures are data here, not errors; the caller
/// decides what a failed encode means for the pipeline.
#[derive(Debug, Clone)]
pub struct EncodeResult {
    pub success: bool,
    pub input_file: PathBuf,
    pub output_file: Option<PathBuf>,
    pub error_message: Option<String>,
    pub input_size: u64,
    pub output_size: u64,
    pub duration_secs: f64,
}

impl EncodeResult {
    fn failure(input_file: &Path, input_size: u64, message: impl Into<String>) -> Self {
        EncodeResult {
            success: false,
            input_file: input_file.to_path_buf(),
            output_file: None,
            error_message: Some(message.into()),
            input_size,
            output_size: 0,
            duration_secs: 0.0,
        }
    }

    pub fn size_reduction_percent(&self) -> f64 {
        if self.input_size == 0 {
            return 0.0;
        }
        (self.input_size as f64 - self.output_size as f64) / self.input_size as f64 * 100.0
    }
}

impl std::fmt::Display for EncodeResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let input = self
            .input_file
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        if self.success {
            let output = self
                .output_file
                .as_ref()
                .and_then(|p| p.file_name())
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            write!(
                f,
                "Encoded {input} -> {output} ({:.1}% reduction)",
                self.size_reduction_percent()
            )
        } else {
            write!(
                f,
                "Failed to encode {input}: {}",
                self.error_message.as_deref().unwrap_or("unknown error")
            )
        }
    }
}

/// Adapter around the external drapto encoder.
pub struct DraptoEncoder {
    config: Arc<Config>,
    active_child: Arc<ActiveChild>,
}

impl DraptoEncoder {
    pub fn new(config: Arc<Config>, active_child: Arc<ActiveChild>) -> Self {
        DraptoEncoder {
            config,
            active_child,
        }
    }

    fn build_command(&self, input_file: &Path, output_dir: &Path) -> Command {
        let mut cmd = Command::new(DRAPTO_BIN);
        cmd.arg("encode")
            .arg("-i")
            .arg(input_file)
            .arg("-o")
            .arg(output_dir)
            .arg("--quality-sd")
            .arg(self.config.drapto_quality_sd.to_string())
            .arg("--quality-hd")
            .arg(self.config.drapto_quality_hd.to_string())
            .arg("--quality-uhd")
            .arg(self.config.drapto_quality_uhd.to_string())
            .arg("--preset")
            .arg(self.config.drapto_preset.to_string())
            .arg("--progress-json");
        cmd
    }

    /// Transcode one file, forwarding each structured progress event.
    pub async fn encode_file<F>(
        &self,
        input_file: &Path,
        output_dir: &Path,
        mut progress: F,
    ) -> Result<EncodeResult>
    where
        F: FnMut(ProgressEvent) + Send,
    {
        if !input_file.exists() {
            return Ok(EncodeResult::failure(
                input_file,
                0,
                "input file does not exist",
            ));
        }

        std::fs::create_dir_all(output_dir)?;
        let input_size = std::fs::metadata(input_file)?.len();
        let started = Instant::now();

        info!("Starting encode of {}", input_file.display());

        let mut child = self
            .build_command(input_file, output_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => SpindleError::Dependency {
                    tool: DRAPTO_BIN.to_string(),
                    hint: "install drapto and make sure it is on PATH".to_string(),
                },
                _ => SpindleError::tool(DRAPTO_BIN, e.to_string()),
            })?;

        self.active_child.register(child.id());

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SpindleError::tool(DRAPTO_BIN, "failed to capture stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| SpindleError::tool(DRAPTO_BIN, "failed to capture stderr"))?;

        let mut stdout_reader = BufReader::new(stdout).lines();
        let mut stderr_reader = BufReader::new(stderr).lines();
        let mut tool_error: Option<String> = None;
        let mut stderr_tail: Vec<String> = Vec::new();

        let wait_result = timeout(
            Duration::from_secs(self.config.drapto_encode_timeout),
            async {
                loop {
                    tokio::select! {
                        line = stdout_reader.next_line() => {
                            match line {
                                Ok(Some(line)) => {
                                    let line = line.trim();
                                    if line.is_empty() {
                                        continue;
                                    }
                                    match serde_json::from_str::<ProgressEvent>(line) {
                                        Ok(event) => {
                                            if let ProgressEvent::Error { message } = &event {
                                                tool_error = Some(message.clone());
                                            }
                                            progress(event);
                                        }
                                        Err(e) => debug!("Unparseable drapto event '{line}': {e}"),
                                    }
                                }
                                Ok(None) => break,
                                Err(e) => {
                                    debug!("Error reading drapto stdout: {e}");
                                    break;
                                }
                            }
                        }
                        line = stderr_reader.next_line() => {
                            if let Ok(Some(line)) = line {
                                if !line.trim().is_empty() {
                                    warn!("drapto: {line}");
                                    stderr_tail.push(line);
                                    if stderr_tail.len() > 20 {
                                        stderr_tail.remove(0);
                                    }
                                }
                            }
                        }
                    }
                }

                // Drain whatever stderr still holds
                while let Ok(Some(line)) = stderr_reader.next_line().await {
                    if !line.trim().is_empty() {
                        warn!("drapto: {line}");
                        stderr_tail.push(line);
                        if stderr_tail.len() > 20 {
                            stderr_tail.remove(0);
                        }
                    }
                }
                child.wait().await
            },
        )
        .await;

        self.active_child.clear();

        let status = match wait_result {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => return Err(SpindleError::tool(DRAPTO_BIN, e.to_string())),
            Err(_) => {
                let _ = child.kill().await;
                return Ok(EncodeResult::failure(
                    input_file,
                    input_size,
                    format!(
                        "encode timed out after {}s",
                        self.config.drapto_encode_timeout
                    ),
                ));
            }
        };

        if !status.success() {
            let message = tool_error.unwrap_or_else(|| {
                if stderr_tail.is_empty() {
                    format!("drapto exited with code {:?}", status.code())
                } else {
                    stderr_tail.join("\n")
                }
            });
            warn!("Drapto encoding failed: {message}");
            return Ok(EncodeResult::failure(input_file, input_size, message));
        }

        let Some(output_file) = find_output_file(input_file, output_dir) else {
            return Ok(EncodeResult::failure(
                input_file,
                input_size,
                "output file not found after encoding",
            ));
        };

        let output_size = std::fs::metadata(&output_file)?.len();
        info!(
            "Successfully encoded {} -> {}",
            input_file.display(),
            output_file.display()
        );

        Ok(EncodeResult {
            success: true,
            input_file: input_file.to_path_buf(),
            output_file: Some(output_file),
            error_message: None,
            input_size,
            output_size,
            duration_secs: started.elapsed().as_secs_f64(),
        })
    }

    /// Encode several inputs serially. One failure does not abort the
    /// batch; every input gets its own result.
    pub async fn encode_batch<F>(
        &self,
        input_files: &[PathBuf],
        output_dir: &Path,
        mut progress: F,
    ) -> Result<Vec<EncodeResult>>
    where
        F: FnMut(ProgressEvent) + Send,
    {
        let mut results = Vec::with_capacity(input_files.len());

        for (i, input_file) in input_files.iter().enumerate() {
            if self.active_child.is_cancelled() {
                results.push(EncodeResult::failure(input_file, 0, "interrupted"));
                break;
            }
            debug!(
                "Encoding file {}/{}: {}",
                i + 1,
                input_files.len(),
                input_file.display()
            );
            let result = self
                .encode_file(input_file, output_dir, &mut progress)
                .await?;
            if !result.success {
                warn!("{result}");
            }
            results.push(result);
        }

        Ok(results)
    }
}

/// Locate drapto's output: the input base name with the output extension,
/// falling back to the most recently modified candidate.
fn find_output_file(input_file: &Path, output_dir: &Path) -> Option<PathBuf> {
    let expected = output_dir.join(format!(
        "{}.mkv",
        input_file.file_stem().unwrap_or_default().to_string_lossy()
    ));
    if expected.exists() {
        return Some(expected);
    }

    std::fs::read_dir(output_dir)
        .ok()?
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_file() && p.extension().and_then(|e| e.to_str()) == Some("mkv"))
        .max_by_key(|p| {
            std::fs::metadata(p)
                .and_then(|m| m.modified())
                .unwrap_or(std::time::SystemTime::UNIX_EPOCH)
        })
}
