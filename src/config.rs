//! Configuration parsing and management for Marionette

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{ConfigError, MarionetteError};
use crate::relay::protocol::MAX_CLIENT_ID_LEN;
use crate::tracking::LandmarkSchema;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub tracking: TrackingConfig,
    pub unprojector: UnprojectorConfig,
    pub smoothing: SmoothingConfig,
    pub decomposer: DecomposerConfig,
    pub relay: RelayConfig,
    pub output: OutputConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, MarionetteError> {
        let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            ConfigError::ReadFile(format!("{}: {}", path.as_ref().display(), e))
        })?;

        Self::from_str(&contents)
    }

    /// Parse configuration from a TOML string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Result<Self, MarionetteError> {
        toml::from_str(s).map_err(|e| ConfigError::Parse(e.to_string()).into())
    }

    /// Load configuration from default paths
    pub fn load() -> Result<Self, MarionetteError> {
        let paths = [
            PathBuf::from("config.toml"),
            PathBuf::from("config/default.toml"),
            dirs_path().join("config.toml"),
        ];

        for path in &paths {
            if path.exists() {
                tracing::info!("Loading config from: {}", path.display());
                return Self::from_file(path);
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), MarionetteError> {
        if self.tracking.port == 0 {
            return Err(invalid("tracking.port", "Port must be greater than 0"));
        }

        if !(0.0..=1.0).contains(&self.unprojector.min_confidence) {
            return Err(invalid(
                "unprojector.min_confidence",
                "Confidence must be between 0.0 and 1.0",
            ));
        }

        if self.unprojector.reference_scale <= 0.0 {
            return Err(invalid(
                "unprojector.reference_scale",
                "Reference scale must be positive",
            ));
        }

        self.unprojector.arms.validate("unprojector.arms")?;
        if let Some(legs) = &self.unprojector.legs {
            legs.validate("unprojector.legs")?;
        }

        if !(0.0..=1.0).contains(&self.smoothing.acceptance_threshold) {
            return Err(invalid(
                "smoothing.acceptance_threshold",
                "Threshold must be between 0.0 and 1.0",
            ));
        }

        if self.smoothing.step_scale <= 0.0 {
            return Err(invalid(
                "smoothing.step_scale",
                "Step scale must be positive",
            ));
        }

        if self.decomposer.roll_reference_min < 0.0 {
            return Err(invalid(
                "decomposer.roll_reference_min",
                "Roll reference minimum cannot be negative",
            ));
        }

        if self.relay.port == 0 {
            return Err(invalid("relay.port", "Port must be greater than 0"));
        }

        if self.relay.path.is_empty() || self.relay.path.contains('/') {
            return Err(invalid(
                "relay.path",
                "Path must be a single non-empty segment",
            ));
        }

        if self.relay.role != RelayRole::Off {
            let id = &self.relay.client_id;
            if id.is_empty() || id.contains(',') || id.len() > MAX_CLIENT_ID_LEN {
                return Err(invalid(
                    "relay.client_id",
                    "Client id must be 1-255 bytes without commas",
                ));
            }
        }

        if self.relay.role == RelayRole::Supplier
            && (self.relay.leader.is_empty() || self.relay.leader == self.relay.client_id)
        {
            return Err(invalid(
                "relay.leader",
                "Supplier needs a leader other than itself",
            ));
        }

        if !(self.output.rate_hz.is_finite() && self.output.rate_hz > 0.0) {
            return Err(invalid("output.rate_hz", "Send rate must be positive"));
        }

        Ok(())
    }
}

fn invalid(field: &str, message: &str) -> MarionetteError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        message: message.to_string(),
    }
    .into()
}

/// Landmark detector input configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Listen address for the landmark UDP socket
    pub listen_address: String,
    /// UDP port the detector process sends landmark packets to
    pub port: u16,
    /// Landmark numbering used by the detector
    pub schema: LandmarkSchema,
    /// How long one receive waits before reporting "no frame"
    pub poll_timeout_ms: u64,
    /// Pause between cycles when no frame arrived
    pub idle_backoff_ms: u64,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            listen_address: "127.0.0.1".to_string(),
            port: 12347,
            schema: LandmarkSchema::BlazePose,
            poll_timeout_ms: 100,
            idle_backoff_ms: 5,
        }
    }
}

/// Depth inference strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnprojectorMode {
    /// Detector already supplies usable z
    Passthrough,
    /// Infer z from fixed limb lengths
    StaticLimbLength,
}

impl Default for UnprojectorMode {
    fn default() -> Self {
        Self::StaticLimbLength
    }
}

/// Squared segment lengths of one limb, in re-centred units
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SegmentLengths {
    /// Root to middle joint (shoulder-elbow, hip-knee)
    pub upper_sq: f64,
    /// Middle to end joint (elbow-wrist, knee-ankle)
    pub lower_sq: f64,
}

impl SegmentLengths {
    fn validate(&self, field: &str) -> Result<(), MarionetteError> {
        if self.upper_sq <= 0.0 || self.lower_sq <= 0.0 {
            return Err(invalid(field, "Squared lengths must be positive"));
        }
        Ok(())
    }
}

/// Unprojector configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UnprojectorConfig {
    pub mode: UnprojectorMode,
    /// Arm segment lengths
    pub arms: SegmentLengths,
    /// Leg segment lengths; legs keep z = 0 when unset
    pub legs: Option<SegmentLengths>,
    /// Reference length as a multiple of the shoulder distance
    pub reference_scale: f64,
    /// Added to every re-centred y
    pub vertical_offset: f64,
    /// Joints at or below this confidence keep z = 0
    pub min_confidence: f64,
}

impl Default for UnprojectorConfig {
    fn default() -> Self {
        Self {
            mode: UnprojectorMode::StaticLimbLength,
            arms: SegmentLengths {
                upper_sq: 0.08,
                lower_sq: 0.10,
            },
            legs: None,
            reference_scale: 8.0,
            vertical_offset: -0.2,
            min_confidence: 0.3,
        }
    }
}

/// Temporal smoother configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SmoothingConfig {
    /// Minimum confidence for a landmark's first estimate
    pub acceptance_threshold: f64,
    /// Maximum step per frame is confidence times this
    pub step_scale: f64,
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self {
            acceptance_threshold: 0.3,
            step_scale: 0.5,
        }
    }
}

/// Kinematic decomposer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecomposerConfig {
    /// Below this |lower - upper| the limb roll is left indeterminate
    pub roll_reference_min: f64,
    /// Decompose leg chains as well as arms
    pub legs: bool,
}

impl Default for DecomposerConfig {
    fn default() -> Self {
        Self {
            roll_reference_min: 0.1,
            legs: true,
        }
    }
}

/// How `track` takes part in a relay group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayRole {
    /// Track from the local detector only
    #[default]
    Off,
    /// Track from the frames other cameras supply
    Leader,
    /// Track locally and forward every frame to `leader`
    Supplier,
}

/// Multi-camera relay configuration, for the server and for `track` clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub host: String,
    pub port: u16,
    /// WebSocket path segment, without the leading slash
    pub path: String,
    /// Supplier landmarks older than this are pruned on the leader
    pub supplier_ttl_ms: u64,
    pub role: RelayRole,
    /// Id this client registers its group under
    pub client_id: String,
    /// Group to supply when `role` is `supplier`
    pub leader: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            path: "multi-cam-pose".to_string(),
            supplier_ttl_ms: 1000,
            role: RelayRole::Off,
            client_id: "main".to_string(),
            leader: String::new(),
        }
    }
}

impl RelayConfig {
    /// WebSocket URL clients connect to.
    pub fn url(&self) -> String {
        format!("ws://{}:{}/{}", self.host, self.port, self.path)
    }
}

/// Pose output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Send the rig's pose to an external engine
    pub enabled: bool,
    /// UDP target address of the engine
    pub target: String,
    /// Rig update and send rate in Hz
    pub rate_hz: f64,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            target: "127.0.0.1:39541".to_string(),
            rate_hz: 60.0,
        }
    }
}

/// Get the platform-specific configuration directory
fn dirs_path() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        if let Some(config_dir) = std::env::var_os("XDG_CONFIG_HOME") {
            return PathBuf::from(config_dir).join("marionette");
        }
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(".config/marionette");
        }
    }

    #[cfg(target_os = "macos")]
    {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join("Library/Application Support/marionette");
        }
    }

    #[cfg(target_os = "windows")]
    {
        if let Some(appdata) = std::env::var_os("APPDATA") {
            return PathBuf::from(appdata).join("marionette");
        }
    }

    PathBuf::from(".")
}
