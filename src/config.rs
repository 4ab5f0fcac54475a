use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::persist::{OutputFormat, DEFAULT_POLL_INTERVAL, DEFAULT_QUEUE_CAPACITY};
use crate::video::FourCc;
use crate::window::{WindowMode, WindowModeKind, WindowSpec};

const DEFAULT_OUTPUT_DIR: &str = "event6";
const DEFAULT_CAMERAS: usize = 6;
const DEFAULT_WIDTH: u32 = 800;
const DEFAULT_HEIGHT: u32 = 450;
const DEFAULT_QUALITY: u8 = 80;
const DEFAULT_PRE_SECS: f64 = 5.0;
const DEFAULT_POST_SECS: f64 = 5.0;
const DEFAULT_TARGET_FPS: f64 = 5.0;
const DEFAULT_RETENTION_SECS: f64 = 60.0;
const DEFAULT_SHUTDOWN_WAIT_SECS: f64 = 5.0;
const DEFAULT_INGEST_URL: &str = "stub://blackbox_rig";
const DEFAULT_INGEST_FPS: u32 = 20;

#[derive(Debug, Deserialize, Default)]
struct RecorderConfigFile {
    output_dir: Option<PathBuf>,
    cameras: Option<usize>,
    retention_secs: Option<f64>,
    shutdown_wait_secs: Option<f64>,
    frame: Option<FrameConfigFile>,
    window: Option<WindowConfigFile>,
    output: Option<OutputConfigFile>,
    queue: Option<QueueConfigFile>,
    ingest: Option<IngestConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct FrameConfigFile {
    width: Option<u32>,
    height: Option<u32>,
    quality: Option<u8>,
}

#[derive(Debug, Deserialize, Default)]
struct WindowConfigFile {
    pre_secs: Option<f64>,
    post_secs: Option<f64>,
    mode: Option<String>,
    target_fps: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct OutputConfigFile {
    format: Option<String>,
    fourcc: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct QueueConfigFile {
    capacity: Option<usize>,
    poll_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct IngestConfigFile {
    url: Option<String>,
    fps: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct RecorderConfig {
    pub output_dir: PathBuf,
    pub cameras: usize,
    pub frame: FrameSettings,
    pub window: WindowSettings,
    pub retention_secs: f64,
    pub output: OutputSettings,
    pub queue: QueueSettings,
    pub shutdown_wait: Duration,
    pub ingest: IngestSettings,
}

/// Uniform size and JPEG quality applied to every ingested frame.
#[derive(Debug, Clone)]
pub struct FrameSettings {
    pub width: u32,
    pub height: u32,
    pub quality: u8,
}

#[derive(Debug, Clone)]
pub struct WindowSettings {
    pub pre_secs: f64,
    pub post_secs: f64,
    pub mode: WindowModeKind,
    pub target_fps: f64,
}

#[derive(Debug, Clone)]
pub struct OutputSettings {
    pub format: OutputFormat,
    /// `None` lets the video writer pick its own tag.
    pub fourcc: Option<FourCc>,
}

#[derive(Debug, Clone)]
pub struct QueueSettings {
    pub capacity: usize,
    pub poll_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct IngestSettings {
    pub url: String,
    pub fps: u32,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            cameras: DEFAULT_CAMERAS,
            frame: FrameSettings {
                width: DEFAULT_WIDTH,
                height: DEFAULT_HEIGHT,
                quality: DEFAULT_QUALITY,
            },
            window: WindowSettings {
                pre_secs: DEFAULT_PRE_SECS,
                post_secs: DEFAULT_POST_SECS,
                mode: WindowModeKind::TimeBased,
                target_fps: DEFAULT_TARGET_FPS,
            },
            retention_secs: DEFAULT_RETENTION_SECS,
            output: OutputSettings {
                format: OutputFormat::ImageSequence,
                fourcc: None,
            },
            queue: QueueSettings {
                capacity: DEFAULT_QUEUE_CAPACITY,
                poll_interval: DEFAULT_POLL_INTERVAL,
            },
            shutdown_wait: Duration::from_secs_f64(DEFAULT_SHUTDOWN_WAIT_SECS),
            ingest: IngestSettings {
                url: DEFAULT_INGEST_URL.to_string(),
                fps: DEFAULT_INGEST_FPS,
            },
        }
    }
}

impl RecorderConfig {
    /// Load from `BLACKBOX_CONFIG` (if set), then apply env overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("BLACKBOX_CONFIG")
            .ok()
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    /// Load from an explicit file (if any), then apply env overrides.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: RecorderConfigFile) -> Result<Self> {
        let defaults = Self::default();
        let frame = file.frame.unwrap_or_default();
        let window = file.window.unwrap_or_default();
        let output = file.output.unwrap_or_default();
        let queue = file.queue.unwrap_or_default();
        let ingest = file.ingest.unwrap_or_default();

        let mode = match window.mode {
            Some(mode) => mode.parse()?,
            None => defaults.window.mode,
        };
        let format = match output.format {
            Some(format) => format.parse()?,
            None => defaults.output.format,
        };
        let fourcc = output
            .fourcc
            .map(|tag| tag.parse::<FourCc>())
            .transpose()?;
        let shutdown_wait = match file.shutdown_wait_secs {
            Some(secs) => duration_from_secs(secs, "shutdown_wait_secs")?,
            None => defaults.shutdown_wait,
        };

        Ok(Self {
            output_dir: file.output_dir.unwrap_or(defaults.output_dir),
            cameras: file.cameras.unwrap_or(defaults.cameras),
            frame: FrameSettings {
                width: frame.width.unwrap_or(defaults.frame.width),
                height: frame.height.unwrap_or(defaults.frame.height),
                quality: frame.quality.unwrap_or(defaults.frame.quality),
            },
            window: WindowSettings {
                pre_secs: window.pre_secs.unwrap_or(defaults.window.pre_secs),
                post_secs: window.post_secs.unwrap_or(defaults.window.post_secs),
                mode,
                target_fps: window.target_fps.unwrap_or(defaults.window.target_fps),
            },
            retention_secs: file.retention_secs.unwrap_or(defaults.retention_secs),
            output: OutputSettings { format, fourcc },
            queue: QueueSettings {
                capacity: queue.capacity.unwrap_or(defaults.queue.capacity),
                poll_interval: queue
                    .poll_ms
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.queue.poll_interval),
            },
            shutdown_wait,
            ingest: IngestSettings {
                url: ingest.url.unwrap_or(defaults.ingest.url),
                fps: ingest.fps.unwrap_or(defaults.ingest.fps),
            },
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(dir) = env_non_empty("BLACKBOX_OUTPUT_DIR") {
            self.output_dir = PathBuf::from(dir);
        }
        if let Some(cameras) = env_non_empty("BLACKBOX_CAMERAS") {
            self.cameras = cameras
                .parse()
                .map_err(|_| anyhow!("BLACKBOX_CAMERAS must be a positive integer"))?;
        }
        if let Some(secs) = env_non_empty("BLACKBOX_PRE_SECS") {
            self.window.pre_secs = parse_secs(&secs, "BLACKBOX_PRE_SECS")?;
        }
        if let Some(secs) = env_non_empty("BLACKBOX_POST_SECS") {
            self.window.post_secs = parse_secs(&secs, "BLACKBOX_POST_SECS")?;
        }
        if let Some(mode) = env_non_empty("BLACKBOX_WINDOW_MODE") {
            self.window.mode = mode.parse()?;
        }
        if let Some(fps) = env_non_empty("BLACKBOX_TARGET_FPS") {
            self.window.target_fps = fps
                .parse()
                .map_err(|_| anyhow!("BLACKBOX_TARGET_FPS must be a number"))?;
        }
        if let Some(secs) = env_non_empty("BLACKBOX_RETENTION_SECS") {
            self.retention_secs = parse_secs(&secs, "BLACKBOX_RETENTION_SECS")?;
        }
        if let Some(format) = env_non_empty("BLACKBOX_OUTPUT_FORMAT") {
            self.output.format = format.parse()?;
        }
        Ok(())
    }

    /// Reject settings the recorder cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.cameras == 0 {
            return Err(anyhow!("cameras must be at least 1"));
        }
        if self.frame.width == 0 || self.frame.height == 0 {
            return Err(anyhow!("frame width and height must be greater than zero"));
        }
        if !(1..=100).contains(&self.frame.quality) {
            return Err(anyhow!("frame quality must be within 1..=100"));
        }
        for (name, secs) in [
            ("pre_secs", self.window.pre_secs),
            ("post_secs", self.window.post_secs),
        ] {
            if !secs.is_finite() || secs < 0.0 {
                return Err(anyhow!("{} must be a non-negative number", name));
            }
        }
        if self.window.pre_secs + self.window.post_secs <= 0.0 {
            return Err(anyhow!("pre_secs + post_secs must be greater than zero"));
        }
        if !self.window.target_fps.is_finite() || self.window.target_fps <= 0.0 {
            return Err(anyhow!("target_fps must be greater than zero"));
        }
        if !self.retention_secs.is_finite() || self.retention_secs <= 0.0 {
            return Err(anyhow!("retention must be greater than zero"));
        }
        if self.retention_secs < self.window.pre_secs {
            return Err(anyhow!(
                "retention ({}s) must cover the pre-roll ({}s)",
                self.retention_secs,
                self.window.pre_secs
            ));
        }
        if self.queue.capacity == 0 {
            return Err(anyhow!("queue capacity must be at least 1"));
        }
        if self.queue.poll_interval.is_zero() {
            return Err(anyhow!("queue poll interval must be greater than zero"));
        }
        if self.ingest.fps == 0 {
            return Err(anyhow!("ingest fps must be >= 1"));
        }
        Ok(())
    }

    pub fn window_spec(&self) -> WindowSpec {
        let mode = match self.window.mode {
            WindowModeKind::TimeBased => WindowMode::TimeBased,
            WindowModeKind::ExactCount => WindowMode::ExactCount {
                target_fps: self.window.target_fps,
            },
        };
        WindowSpec {
            pre_secs: self.window.pre_secs,
            post_secs: self.window.post_secs,
            mode,
        }
    }
}

fn read_config_file(path: &Path) -> Result<RecorderConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_secs(value: &str, key: &str) -> Result<f64> {
    value
        .trim()
        .parse()
        .map_err(|_| anyhow!("{} must be a number of seconds", key))
}

fn duration_from_secs(secs: f64, name: &str) -> Result<Duration> {
    Duration::try_from_secs_f64(secs).map_err(|_| anyhow!("{} must be a non-negative number", name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() -> Result<()> {
        let cfg = RecorderConfig::default();
        cfg.validate()?;
        assert_eq!(cfg.cameras, 6);
        assert_eq!(cfg.window_spec().mode, WindowMode::TimeBased);
        Ok(())
    }

    #[test]
    fn toml_file_is_parsed() -> Result<()> {
        let raw = r#"
            cameras = 2
            [window]
            mode = "exact_count"
            target_fps = 10.0
            [output]
            format = "video"
            fourcc = "mp4v"
        "#;
        let file: RecorderConfigFile = toml::from_str(raw)?;
        let cfg = RecorderConfig::from_file(file)?;
        assert_eq!(cfg.cameras, 2);
        assert_eq!(cfg.output.format, OutputFormat::Video);
        assert_eq!(cfg.output.fourcc, Some(FourCc::MP4V));
        assert_eq!(
            cfg.window_spec().mode,
            WindowMode::ExactCount { target_fps: 10.0 }
        );
        Ok(())
    }

    #[test]
    fn rejects_bad_values() -> Result<()> {
        let mut cfg = RecorderConfig::default();
        cfg.cameras = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = RecorderConfig::default();
        cfg.retention_secs = 1.0;
        assert!(cfg.validate().is_err());

        let mut cfg = RecorderConfig::default();
        cfg.window.pre_secs = 0.0;
        cfg.window.post_secs = 0.0;
        assert!(cfg.validate().is_err());

        let file = RecorderConfigFile {
            window: Some(WindowConfigFile {
                mode: Some("frames".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(RecorderConfig::from_file(file).is_err());
        Ok(())
    }
}
