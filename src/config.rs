//! Application configuration (YAML) with hot-reload.

use anyhow::{anyhow, Result};
use calypso::background::{BackgroundImage, VirtualBackground};
use calypso::schedule::PerformanceUpdate;
use calypso::surface::FilterEffect;
use image::Rgba;
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;
use std::sync::mpsc::{channel, Receiver};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub camera: CameraSection,
    #[serde(default)]
    pub performance: PerformanceUpdate,
    #[serde(default)]
    pub segmentation: SegmentationSection,
    #[serde(default)]
    pub background: BackgroundSection,
    #[serde(default)]
    pub output: OutputSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CameraSection {
    #[serde(default)]
    pub device: u32,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_fps")]
    pub fps: u32,
}

fn default_width() -> u32 {
    1280
}

fn default_height() -> u32 {
    720
}

fn default_fps() -> u32 {
    30
}

impl Default for CameraSection {
    fn default() -> Self {
        Self {
            device: 0,
            width: default_width(),
            height: default_height(),
            fps: default_fps(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SegmentationSection {
    /// Backend id: "modnet" or "selfie".
    pub backend: Option<String>,
    /// Overrides the backend's default model path.
    pub model_path: Option<PathBuf>,
    /// Binarization threshold; omitted keeps the soft matte.
    pub foreground_threshold: Option<f32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum BackgroundSection {
    #[default]
    None,
    Transparent,
    Color {
        value: String,
    },
    Blur {
        #[serde(default = "default_blur_sigma")]
        sigma: f32,
    },
    Image {
        path: PathBuf,
    },
}

fn default_blur_sigma() -> f32 {
    8.0
}

impl BackgroundSection {
    /// Builds the runtime background descriptor, starting the image decode
    /// for image backgrounds.
    pub fn to_background(&self) -> Result<VirtualBackground> {
        Ok(match self {
            BackgroundSection::None => VirtualBackground::None,
            BackgroundSection::Transparent => VirtualBackground::Transparent,
            BackgroundSection::Color { value } => VirtualBackground::Color(parse_hex_color(value)?),
            BackgroundSection::Blur { sigma } => {
                VirtualBackground::Filter(FilterEffect::Blur(*sigma))
            }
            BackgroundSection::Image { path } => {
                VirtualBackground::Image(BackgroundImage::load(path))
            }
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputSection {
    /// ffmpeg output target: a file path, `/dev/video10`, an rtmp URL.
    /// Omitted runs the pipeline without a sink.
    pub target: Option<String>,
}

impl Config {
    pub fn load(path: &PathBuf) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| anyhow!("Failed to read config file {:?}: {}", path, e))?;
        serde_yaml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {:?}: {}", path, e))
    }
}

/// Parses `#rgb`, `#rrggbb` or `#rrggbbaa` into a color.
pub fn parse_hex_color(value: &str) -> Result<Rgba<u8>> {
    let hex = value
        .strip_prefix('#')
        .ok_or_else(|| anyhow!("color `{}` must start with '#'", value))?;

    let channel = |s: &str| u8::from_str_radix(s, 16).map_err(anyhow::Error::from);
    match hex.len() {
        3 => {
            let expand = |s: &str| channel(&s.repeat(2));
            Ok(Rgba([
                expand(&hex[0..1])?,
                expand(&hex[1..2])?,
                expand(&hex[2..3])?,
                255,
            ]))
        }
        6 => Ok(Rgba([
            channel(&hex[0..2])?,
            channel(&hex[2..4])?,
            channel(&hex[4..6])?,
            255,
        ])),
        8 => Ok(Rgba([
            channel(&hex[0..2])?,
            channel(&hex[2..4])?,
            channel(&hex[4..6])?,
            channel(&hex[6..8])?,
        ])),
        _ => Err(anyhow!("color `{}` has unsupported length", value)),
    }
}

/// Manages configuration file watching and reloading.
pub struct ConfigWatcher {
    path: PathBuf,
    _watcher: RecommendedWatcher,
    rx: Receiver<std::result::Result<Event, notify::Error>>,
}

impl ConfigWatcher {
    /// Create a new config watcher if a path is provided.
    pub fn new(path: Option<PathBuf>) -> Option<Self> {
        let path = path?;
        let (tx, rx) = channel();

        match RecommendedWatcher::new(tx, notify::Config::default()) {
            Ok(mut watcher) => {
                if let Err(e) = watcher.watch(&path, RecursiveMode::NonRecursive) {
                    warn!("Failed to watch config file {:?}: {}", path, e);
                    return None;
                }
                info!("Watching config file {:?} for changes", path);

                Some(Self {
                    path,
                    _watcher: watcher,
                    rx,
                })
            }
            Err(e) => {
                warn!("Failed to create config watcher: {}", e);
                None
            }
        }
    }

    /// Check for changes and return the re-parsed config if it changed.
    pub fn check_for_changes(&mut self) -> Option<Config> {
        let mut needs_reload = false;
        while let Ok(res) = self.rx.try_recv() {
            if let Ok(event) = res {
                if matches!(
                    event.kind,
                    notify::EventKind::Modify(_) | notify::EventKind::Create(_)
                ) {
                    needs_reload = true;
                }
            }
        }

        if needs_reload {
            info!("Config file changed, reloading...");
            match Config::load(&self.path) {
                Ok(config) => return Some(config),
                Err(e) => error!("{:#}", e),
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex_color_forms() {
        assert_eq!(parse_hex_color("#00ff00").unwrap().0, [0, 255, 0, 255]);
        assert_eq!(parse_hex_color("#0f8").unwrap().0, [0, 255, 136, 255]);
        assert_eq!(parse_hex_color("#11223344").unwrap().0, [17, 34, 51, 68]);
        assert!(parse_hex_color("00ff00").is_err());
        assert!(parse_hex_color("#12345").is_err());
    }

    #[test]
    fn test_config_defaults_from_empty_yaml() {
        let config: Config = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.camera.width, 1280);
        assert_eq!(config.camera.fps, 30);
        assert!(config.segmentation.backend.is_none());
        assert!(matches!(config.background, BackgroundSection::None));
        assert!(config.output.target.is_none());
    }

    #[test]
    fn test_config_parses_background_variants() {
        let yaml = "
background:
  type: color
  value: \"#336699\"
performance:
  strategy: precision-timer
  every_n_frames: 2
";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        let BackgroundSection::Color { value } = &config.background else {
            panic!("expected color background");
        };
        assert_eq!(value, "#336699");
        assert_eq!(config.performance.every_n_frames, Some(2));
    }
}
