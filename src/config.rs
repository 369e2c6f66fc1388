//! Configuration types for the avatar runtime.

use crate::error::{AvatarError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AvatarConfig {
    /// Streaming playback settings.
    pub audio: AudioConfig,
    /// Mouth (viseme + amplitude) blending.
    pub lipsync: LipsyncConfig,
    /// Eye blink cycle.
    pub blink: BlinkConfig,
    /// Scripted idle animation loop.
    pub idle: IdleConfig,
    /// Session identity and outbound dispatch behaviour.
    pub session: SessionConfig,
    /// Inbound event log.
    pub events: EventLogConfig,
    /// Frame loop and scene description.
    pub render: RenderConfig,
}

/// Which audio output the host drives.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputBackend {
    /// System speakers via cpal.
    #[default]
    Cpal,
    /// No device; the host renders audio into the void at real-time pace.
    Null,
}

/// Streaming playback configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Sample rate of incoming PCM16 chunks (and of the output stream) in Hz.
    pub sample_rate: u32,
    /// Audio that must be queued before a new stream starts playing, in ms.
    pub min_start_ms: u32,
    /// Cadence of amplitude updates in ms.
    pub level_interval_ms: u32,
    /// Weight of the previous amplitude in the single-pole smoother.
    pub level_smoothing: f32,
    /// Output gain applied to decoded samples.
    pub volume: f32,
    /// Output backend.
    pub output: OutputBackend,
    /// Output device name (None = system default).
    pub output_device: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 24_000,
            min_start_ms: 60,
            level_interval_ms: 16,
            level_smoothing: 0.5,
            volume: 1.0,
            output: OutputBackend::Cpal,
            output_device: None,
        }
    }
}

impl AudioConfig {
    /// Samples that must be queued before playback starts.
    #[must_use]
    pub fn min_start_samples(&self) -> usize {
        (u64::from(self.sample_rate) * u64::from(self.min_start_ms) / 1000) as usize
    }

    /// Samples per amplitude window.
    #[must_use]
    pub fn level_window_samples(&self) -> usize {
        ((u64::from(self.sample_rate) * u64::from(self.level_interval_ms) / 1000) as usize).max(1)
    }
}

/// Mouth blending configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LipsyncConfig {
    /// Per-frame lerp factor toward 1.0 for an active viseme.
    pub attack: f32,
    /// Per-frame lerp factor toward 0.0 for an inactive viseme.
    pub release: f32,
    /// Morph target opened by playback amplitude when no viseme track is active.
    pub amplitude_target: Option<String>,
    /// Multiplier applied to the amplitude before clamping to 1.0.
    pub amplitude_gain: f32,
    /// Speaking rate assumed when cues are estimated from phonemes.
    pub speech_rate: f32,
    /// Overrides for the mouth shape -> morph target table, keyed by shape letter.
    pub shape_targets: BTreeMap<String, String>,
}

impl Default for LipsyncConfig {
    fn default() -> Self {
        Self {
            attack: 0.3,
            release: 0.1,
            amplitude_target: Some("jawOpen".to_owned()),
            amplitude_gain: 2.0,
            speech_rate: 1.0,
            shape_targets: BTreeMap::new(),
        }
    }
}

/// Eye blink configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BlinkConfig {
    /// Morph target driven by the blink curve.
    pub target: String,
    /// Lower bound of the random interval between blinks, in seconds.
    pub min_interval_secs: f32,
    /// Upper bound (exclusive) of the random interval between blinks, in seconds.
    pub max_interval_secs: f32,
    /// Length of one closed-and-open blink, in seconds.
    pub duration_secs: f32,
    /// Blink channels that must stay at rest unless they are the blink target.
    pub reserved_targets: Vec<String>,
}

impl Default for BlinkConfig {
    fn default() -> Self {
        Self {
            target: "eyes".to_owned(),
            min_interval_secs: 3.0,
            max_interval_secs: 5.0,
            duration_secs: 0.2,
            reserved_targets: [
                "eyeBlinkLeft",
                "eyeBlinkRight",
                "blink",
                "EyeBlink",
                "eye_blink",
            ]
            .into_iter()
            .map(str::to_owned)
            .collect(),
        }
    }
}

/// How long an idle step holds its clip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdleHold {
    /// Fixed hold in milliseconds.
    Fixed { ms: u64 },
    /// The clip's natural duration plus a pause in milliseconds.
    Clip { pause_ms: u64 },
}

/// One entry of the idle sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdleStep {
    /// Clip name in the scene's animation library.
    pub clip: String,
    /// Hold before moving on to the next step.
    pub hold: IdleHold,
}

impl IdleStep {
    fn clip(clip: &str, pause_ms: u64) -> Self {
        Self {
            clip: clip.to_owned(),
            hold: IdleHold::Clip { pause_ms },
        }
    }

    fn fixed(clip: &str, ms: u64) -> Self {
        Self {
            clip: clip.to_owned(),
            hold: IdleHold::Fixed { ms },
        }
    }
}

/// Idle animation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdleConfig {
    /// Whether the idle loop runs at all.
    pub enabled: bool,
    /// Crossfade duration between clips, in seconds.
    pub fade_secs: f32,
    /// The looping sequence.
    pub steps: Vec<IdleStep>,
}

impl Default for IdleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            fade_secs: 0.5,
            steps: vec![
                IdleStep::fixed("Action", 2000),
                IdleStep::clip("Arms_Hiphop_Dance", 0),
                IdleStep::clip("Action", 0),
                IdleStep::clip("Dance", 0),
                IdleStep::clip("Action", 0),
                IdleStep::clip("Snake_Hiphop_Dance", 0),
                IdleStep::fixed("Action", 3000),
            ],
        }
    }
}

/// Session identity and dispatch configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Stable user identifier (None = generated per process).
    pub user_id: Option<String>,
    /// Chat identifier (None = generated per process).
    pub chat_id: Option<String>,
    /// Speaker name attached to outbound utterances.
    pub speaker_name: String,
    /// Stop the avatar talking as soon as the user sends a message.
    pub interrupt_on_user_message: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            user_id: None,
            chat_id: None,
            speaker_name: "User".to_owned(),
            interrupt_on_user_message: true,
        }
    }
}

/// Event log configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventLogConfig {
    /// Maximum number of retained entries (oldest evicted first).
    pub log_capacity: usize,
}

impl Default for EventLogConfig {
    fn default() -> Self {
        Self { log_capacity: 512 }
    }
}

/// Frame loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Frames per second of the host's animation loop.
    pub frame_rate: u32,
    /// JSON scene description (meshes, morph targets, clips).
    pub scene_path: Option<PathBuf>,
    /// Publish morph influences every frame as runtime events.
    pub emit_frames: bool,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            frame_rate: 60,
            scene_path: None,
            emit_frames: false,
        }
    }
}

impl AvatarConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or fails validation.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self =
            toml::from_str(&content).map_err(|e| AvatarError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| AvatarError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `dirs::config_dir()/visage/config.toml`.
    ///
    /// `None` when the platform has no per-user config directory.
    #[must_use]
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("visage").join("config.toml"))
    }

    /// Reject values that would make playback or animation misbehave.
    ///
    /// # Errors
    ///
    /// Returns [`AvatarError::Config`] describing the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if self.audio.sample_rate == 0 {
            return Err(AvatarError::Config("audio.sample_rate must be > 0".into()));
        }
        if !(0.0..=1.0).contains(&self.audio.level_smoothing) {
            return Err(AvatarError::Config(
                "audio.level_smoothing must be within [0, 1]".into(),
            ));
        }
        for (name, factor) in [
            ("lipsync.attack", self.lipsync.attack),
            ("lipsync.release", self.lipsync.release),
        ] {
            if !(factor > 0.0 && factor <= 1.0) {
                return Err(AvatarError::Config(format!(
                    "{name} must be within (0, 1], got {factor}"
                )));
            }
        }
        if !(self.lipsync.speech_rate > 0.0) {
            return Err(AvatarError::Config("lipsync.speech_rate must be > 0".into()));
        }
        if self.blink.min_interval_secs <= 0.0
            || self.blink.max_interval_secs <= self.blink.min_interval_secs
        {
            return Err(AvatarError::Config(format!(
                "blink interval [{}, {}) is empty",
                self.blink.min_interval_secs, self.blink.max_interval_secs
            )));
        }
        if self.blink.duration_secs <= 0.0 {
            return Err(AvatarError::Config("blink.duration_secs must be > 0".into()));
        }
        if self.render.frame_rate == 0 {
            return Err(AvatarError::Config("render.frame_rate must be > 0".into()));
        }
        Ok(())
    }
}
