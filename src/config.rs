use anyhow::{anyhow, Context};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use serde::Deserialize;
use std::{
    env, fs,
    path::{Path, PathBuf},
    sync::mpsc::{self, Receiver},
    time::Duration,
};

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub poller: PollerConfig,
    pub sync: SyncConfig,
    pub gesture: GestureConfig,
    pub scratch: ScratchConfig,
    pub panel: PanelConfig,
    pub player: PlayerConfig,
    pub ui: UiConfig,
}

impl Config {
    /// Loads the first config file found, or defaults when there is none.
    pub fn load() -> anyhow::Result<(Self, Option<PathBuf>)> {
        match Self::locate() {
            Some(path) => Ok((Self::load_from(&path)?, Some(path))),
            None => Ok((Config::default(), None)),
        }
    }

    pub fn locate() -> Option<PathBuf> {
        let mut candidates = Vec::new();

        if let Ok(current_dir) = env::current_dir() {
            candidates.push(current_dir.join("config.toml"));
            candidates.push(current_dir.join("config").join("config.toml"));
            candidates.push(current_dir.join("config").join("record_deck.toml"));
        }

        if let Ok(exe) = env::current_exe() {
            if let Some(dir) = exe.parent() {
                candidates.push(dir.join("config.toml"));
                candidates.push(dir.join("config").join("config.toml"));
                candidates.push(dir.join("config").join("record_deck.toml"));
            }
        }

        candidates.into_iter().find(|path| path.exists())
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&data).with_context(|| format!("Failed to parse config: {}", path.display()))
    }

    pub fn parse(data: &str) -> anyhow::Result<Self> {
        let doc: ConfigDocument = toml::from_str(data)?;
        Ok(doc.into())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PollerConfig {
    pub interval_ms: u64,
    pub max_backoff_ms: u64,
    pub stale_after_misses: u32,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            max_backoff_ms: 8000,
            stale_after_misses: 3,
        }
    }
}

impl PollerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.clamp(50, 60_000))
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms.max(self.interval_ms).clamp(50, 300_000))
    }

    pub fn stale_after_misses(&self) -> u32 {
        self.stale_after_misses.max(1)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    pub rpm: f64,
    pub reference_angle_deg: f64,
    pub correction_threshold_deg: f64,
    pub ms_per_degree: f64,
    pub command_settle_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            rpm: 100.0 / 3.0,
            reference_angle_deg: 0.0,
            correction_threshold_deg: 2.0,
            ms_per_degree: 100.0,
            command_settle_ms: 250,
        }
    }
}

impl SyncConfig {
    pub fn rpm(&self) -> f64 {
        self.rpm.clamp(1.0, 120.0)
    }

    pub fn correction_threshold_deg(&self) -> f64 {
        self.correction_threshold_deg.clamp(0.0, 180.0)
    }

    pub fn ms_per_degree(&self) -> f64 {
        self.ms_per_degree.max(0.0)
    }

    pub fn command_settle(&self) -> Duration {
        Duration::from_millis(self.command_settle_ms.min(10_000))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GestureConfig {
    pub seek_rotation_deg: f64,
    pub seek_hold_ms: u64,
    pub seek_hold_rotation_deg: f64,
    pub tap_max_ms: u64,
    pub tap_max_distance_px: f32,
    pub velocity_hold_ms: u64,
}

impl Default for GestureConfig {
    fn default() -> Self {
        Self {
            seek_rotation_deg: 10.0,
            seek_hold_ms: 200,
            seek_hold_rotation_deg: 5.0,
            tap_max_ms: 300,
            tap_max_distance_px: 20.0,
            velocity_hold_ms: 80,
        }
    }
}

impl GestureConfig {
    pub fn seek_hold(&self) -> Duration {
        Duration::from_millis(self.seek_hold_ms)
    }

    pub fn tap_max(&self) -> Duration {
        Duration::from_millis(self.tap_max_ms)
    }

    pub fn velocity_hold(&self) -> Duration {
        Duration::from_millis(self.velocity_hold_ms.max(1))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScratchConfig {
    pub min_audible_deg_per_s: f64,
    pub full_volume_deg_per_s: f64,
    pub rate_min: f32,
    pub rate_max: f32,
    pub ramp_ms: u64,
}

impl Default for ScratchConfig {
    fn default() -> Self {
        Self {
            min_audible_deg_per_s: 60.0,
            full_volume_deg_per_s: 720.0,
            rate_min: 0.25,
            rate_max: 3.0,
            ramp_ms: 40,
        }
    }
}

impl ScratchConfig {
    pub fn rate_bounds(&self) -> (f32, f32) {
        let low = self.rate_min.clamp(0.05, 8.0);
        (low, self.rate_max.clamp(low, 8.0))
    }

    pub fn full_volume_deg_per_s(&self) -> f64 {
        self.full_volume_deg_per_s.max(self.min_audible_deg_per_s).max(1.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PanelConfig {
    pub auto_hide_secs: f64,
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            auto_hide_secs: 5.0,
        }
    }
}

impl PanelConfig {
    pub fn auto_hide(&self) -> Duration {
        let secs = if self.auto_hide_secs.is_finite() {
            self.auto_hide_secs
        } else {
            Self::default().auto_hide_secs
        };
        Duration::from_secs_f64(secs.clamp(0.5, 600.0))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerBackend {
    Demo,
    SystemMedia,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlayerConfig {
    pub backend: PlayerBackend,
    pub sfx_dir: PathBuf,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            backend: if cfg!(target_os = "windows") {
                PlayerBackend::SystemMedia
            } else {
                PlayerBackend::Demo
            },
            sfx_dir: PathBuf::from("sfx"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct UiConfig {
    pub vinyl: VinylConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VinylConfig {
    pub label_ratio: f32,
    pub groove_spacing_px: f32,
    pub texture_size: usize,
    pub fullscreen: bool,
}

impl Default for VinylConfig {
    fn default() -> Self {
        Self {
            label_ratio: 0.3,
            groove_spacing_px: 8.0,
            texture_size: 768,
            fullscreen: true,
        }
    }
}

impl VinylConfig {
    pub fn label_ratio(&self) -> f32 {
        self.label_ratio.clamp(0.1, 0.6)
    }

    pub fn groove_spacing_px(&self) -> f32 {
        self.groove_spacing_px.clamp(2.0, 64.0)
    }

    pub fn texture_size(&self) -> usize {
        let size = self.texture_size.clamp(128, 2048);
        size + size % 2
    }
}

/// Watches the loaded config file and yields a fresh [`Config`] whenever it
/// changes on disk.
pub struct ConfigWatcher {
    path: PathBuf,
    _watcher: RecommendedWatcher,
    changes_rx: Receiver<notify::Result<notify::Event>>,
}

impl ConfigWatcher {
    pub fn watch(path: &Path) -> anyhow::Result<Self> {
        let dir = path
            .parent()
            .ok_or_else(|| anyhow!("Config path {} has no parent directory", path.display()))?;

        let (tx, rx) = mpsc::channel();
        let mut watcher = notify::recommended_watcher(move |res| {
            let _ = tx.send(res);
        })?;
        // Editors often replace the file, so watch the directory instead.
        watcher.watch(dir, RecursiveMode::NonRecursive)?;

        Ok(Self {
            path: path.to_path_buf(),
            _watcher: watcher,
            changes_rx: rx,
        })
    }

    pub fn poll(&self) -> Option<Config> {
        let mut relevant = false;
        while let Ok(event) = self.changes_rx.try_recv() {
            match event {
                Ok(evt) => {
                    if evt.paths.iter().any(|p| p.file_name() == self.path.file_name()) {
                        relevant = true;
                    }
                }
                Err(err) => log::warn!("Config watcher error: {err}"),
            }
        }

        if !relevant {
            return None;
        }

        match Config::load_from(&self.path) {
            Ok(config) => {
                log::info!("Reloaded config from {}", self.path.display());
                Some(config)
            }
            Err(err) => {
                log::warn!("Ignoring config change: {err:#}");
                None
            }
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigDocument {
    #[serde(default)]
    poller: PollerSection,
    #[serde(default)]
    sync: SyncSection,
    #[serde(default)]
    gesture: GestureSection,
    #[serde(default)]
    scratch: ScratchSection,
    #[serde(default)]
    panel: PanelSection,
    #[serde(default)]
    player: PlayerSection,
    #[serde(default)]
    ui: UiSection,
}

/// NaN and infinities are valid TOML floats; treat them as unset.
fn finite_or<T: Copy + Into<f64>>(value: Option<T>, default: T) -> T {
    value
        .filter(|v| Into::<f64>::into(*v).is_finite())
        .unwrap_or(default)
}

impl From<ConfigDocument> for Config {
    fn from(value: ConfigDocument) -> Self {
        let poller_defaults = PollerConfig::default();
        let poller = PollerConfig {
            interval_ms: value.poller.interval_ms.unwrap_or(poller_defaults.interval_ms),
            max_backoff_ms: value
                .poller
                .max_backoff_ms
                .unwrap_or(poller_defaults.max_backoff_ms),
            stale_after_misses: value
                .poller
                .stale_after_misses
                .unwrap_or(poller_defaults.stale_after_misses),
        };

        let sync_defaults = SyncConfig::default();
        let sync = SyncConfig {
            rpm: finite_or(value.sync.rpm, sync_defaults.rpm),
            reference_angle_deg: finite_or(
                value.sync.reference_angle_deg,
                sync_defaults.reference_angle_deg,
            ),
            correction_threshold_deg: finite_or(
                value.sync.correction_threshold_deg,
                sync_defaults.correction_threshold_deg,
            ),
            ms_per_degree: finite_or(value.sync.ms_per_degree, sync_defaults.ms_per_degree),
            command_settle_ms: value
                .sync
                .command_settle_ms
                .unwrap_or(sync_defaults.command_settle_ms),
        };

        let gesture_defaults = GestureConfig::default();
        let gesture = GestureConfig {
            seek_rotation_deg: finite_or(
                value.gesture.seek_rotation_deg,
                gesture_defaults.seek_rotation_deg,
            ),
            seek_hold_ms: value
                .gesture
                .seek_hold_ms
                .unwrap_or(gesture_defaults.seek_hold_ms),
            seek_hold_rotation_deg: finite_or(
                value.gesture.seek_hold_rotation_deg,
                gesture_defaults.seek_hold_rotation_deg,
            ),
            tap_max_ms: value
                .gesture
                .tap_max_ms
                .unwrap_or(gesture_defaults.tap_max_ms),
            tap_max_distance_px: finite_or(
                value.gesture.tap_max_distance_px,
                gesture_defaults.tap_max_distance_px,
            ),
            velocity_hold_ms: value
                .gesture
                .velocity_hold_ms
                .unwrap_or(gesture_defaults.velocity_hold_ms),
        };

        let scratch_defaults = ScratchConfig::default();
        let scratch = ScratchConfig {
            min_audible_deg_per_s: finite_or(
                value.scratch.min_audible_deg_per_s,
                scratch_defaults.min_audible_deg_per_s,
            ),
            full_volume_deg_per_s: finite_or(
                value.scratch.full_volume_deg_per_s,
                scratch_defaults.full_volume_deg_per_s,
            ),
            rate_min: finite_or(value.scratch.rate_min, scratch_defaults.rate_min),
            rate_max: finite_or(value.scratch.rate_max, scratch_defaults.rate_max),
            ramp_ms: value.scratch.ramp_ms.unwrap_or(scratch_defaults.ramp_ms),
        };

        let panel = PanelConfig {
            auto_hide_secs: finite_or(
                value.panel.auto_hide_secs,
                PanelConfig::default().auto_hide_secs,
            ),
        };

        let player_defaults = PlayerConfig::default();
        let backend = match value.player.backend.as_deref() {
            Some("demo") => PlayerBackend::Demo,
            Some("system") | Some("gsmtc") => PlayerBackend::SystemMedia,
            Some(other) => {
                log::warn!("Unknown player backend {other:?}; using the default");
                player_defaults.backend
            }
            None => player_defaults.backend,
        };
        let player = PlayerConfig {
            backend,
            sfx_dir: value.player.sfx_dir.unwrap_or(player_defaults.sfx_dir),
        };

        let vinyl_defaults = VinylConfig::default();
        let ui = UiConfig {
            vinyl: VinylConfig {
                label_ratio: finite_or(value.ui.vinyl.label_ratio, vinyl_defaults.label_ratio),
                groove_spacing_px: finite_or(
                    value.ui.vinyl.groove_spacing_px,
                    vinyl_defaults.groove_spacing_px,
                ),
                texture_size: value
                    .ui
                    .vinyl
                    .texture_size
                    .unwrap_or(vinyl_defaults.texture_size),
                fullscreen: value.ui.vinyl.fullscreen.unwrap_or(vinyl_defaults.fullscreen),
            },
        };

        Config {
            poller,
            sync,
            gesture,
            scratch,
            panel,
            player,
            ui,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct PollerSection {
    interval_ms: Option<u64>,
    max_backoff_ms: Option<u64>,
    stale_after_misses: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct SyncSection {
    rpm: Option<f64>,
    reference_angle_deg: Option<f64>,
    correction_threshold_deg: Option<f64>,
    ms_per_degree: Option<f64>,
    command_settle_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct GestureSection {
    seek_rotation_deg: Option<f64>,
    seek_hold_ms: Option<u64>,
    seek_hold_rotation_deg: Option<f64>,
    tap_max_ms: Option<u64>,
    tap_max_distance_px: Option<f32>,
    velocity_hold_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ScratchSection {
    min_audible_deg_per_s: Option<f64>,
    full_volume_deg_per_s: Option<f64>,
    rate_min: Option<f32>,
    rate_max: Option<f32>,
    ramp_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct PanelSection {
    auto_hide_secs: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct PlayerSection {
    backend: Option<String>,
    sfx_dir: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct UiSection {
    #[serde(default)]
    vinyl: VinylSection,
}

#[derive(Debug, Default, Deserialize)]
struct VinylSection {
    label_ratio: Option<f32>,
    groove_spacing_px: Option<f32>,
    texture_size: Option<usize>,
    fullscreen: Option<bool>,
}
