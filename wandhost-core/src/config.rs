//! Host configuration, loaded from TOML.
//!
//! Every key is optional; missing keys take the defaults below. The ABI constants (step rate,
//! sample rate, buffer sizes) are fixed and deliberately absent from this file.
//!
//! ```toml
//! [simulation]
//! max_frame_delta_secs = 0.0333
//!
//! [audio]
//! lead_chunks = 6
//! ring_frames = 48000
//! autoplay = false
//!
//! [input]
//! set_threshold = 0.375
//! hold_threshold = 0.35
//!
//! [video]
//! scale = 2
//! vsync = true
//!
//! [runtime]
//! startup_grow_pages = 64
//! ```

use crate::audio::{AudioScheduler, DEFAULT_LEAD_CHUNKS, DEFAULT_RING_FRAMES};
use crate::clock::DEFAULT_MAX_FRAME_DELTA_SECS;
use crate::input::AxisThresholds;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid value for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub simulation: SimulationConfig,
    pub audio: AudioConfig,
    pub input: InputConfig,
    pub video: VideoConfig,
    pub runtime: RuntimeConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimulationConfig {
    /// Upper bound on the wall-clock time a single display frame may simulate.
    pub max_frame_delta_secs: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            max_frame_delta_secs: DEFAULT_MAX_FRAME_DELTA_SECS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AudioConfig {
    /// Chunks (10 ms each) kept synthesized ahead of playback.
    pub lead_chunks: u32,
    /// Size of the playback ring in frames.
    pub ring_frames: usize,
    /// Start playback immediately instead of waiting for the first user input.
    pub autoplay: bool,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            lead_chunks: DEFAULT_LEAD_CHUNKS,
            ring_frames: DEFAULT_RING_FRAMES,
            autoplay: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InputConfig {
    pub set_threshold: f32,
    pub hold_threshold: f32,
}

impl Default for InputConfig {
    fn default() -> Self {
        let AxisThresholds { set, hold } = AxisThresholds::default();
        Self {
            set_threshold: set,
            hold_threshold: hold,
        }
    }
}

impl InputConfig {
    pub fn thresholds(&self) -> AxisThresholds {
        AxisThresholds {
            set: self.set_threshold,
            hold: self.hold_threshold,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VideoConfig {
    /// Initial window size as a multiple of 400x240.
    pub scale: u32,
    pub vsync: bool,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            scale: 2,
            vsync: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// 64 KiB pages added to guest memory before `state_init_`.
    pub startup_grow_pages: u32,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            startup_grow_pages: 64,
        }
    }
}

impl Config {
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |key, reason: &str| {
            Err(ConfigError::Invalid {
                key,
                reason: reason.to_owned(),
            })
        };

        let delta = self.simulation.max_frame_delta_secs;
        if !(delta.is_finite() && delta > 0.0) {
            return invalid("simulation.max_frame_delta_secs", "must be a positive number of seconds");
        }

        let InputConfig {
            set_threshold: set,
            hold_threshold: hold,
        } = self.input;
        for (key, value) in [("input.set_threshold", set), ("input.hold_threshold", hold)] {
            if !(value > 0.0 && value < 1.0) {
                return invalid(key, "must lie strictly between 0 and 1");
            }
        }
        if hold > set {
            return invalid("input.hold_threshold", "must not exceed input.set_threshold");
        }

        if self.audio.lead_chunks == 0 {
            return invalid("audio.lead_chunks", "must be at least 1");
        }
        let min_ring = AudioScheduler::min_ring_frames(self.audio.lead_chunks);
        if self.audio.ring_frames < min_ring {
            return Err(ConfigError::Invalid {
                key: "audio.ring_frames",
                reason: format!(
                    "{} frames cannot hold a lead of {} chunks (need at least {min_ring})",
                    self.audio.ring_frames, self.audio.lead_chunks
                ),
            });
        }

        if self.video.scale == 0 {
            return invalid("video.scale", "must be at least 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_all_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.audio.lead_chunks, 6);
        assert_eq!(config.runtime.startup_grow_pages, 64);
        assert_eq!(
            config.simulation.max_frame_delta_secs,
            DEFAULT_MAX_FRAME_DELTA_SECS
        );
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = Config::from_toml("[audio]\nautoplay = true\n[video]\nscale = 3\n").unwrap();
        assert!(config.audio.autoplay);
        assert_eq!(config.audio.ring_frames, 48_000);
        assert_eq!(config.video.scale, 3);
        assert!(config.video.vsync);
    }

    #[test]
    fn hold_above_set_is_rejected() {
        let err = Config::from_toml("[input]\nhold_threshold = 0.5\n").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                key: "input.hold_threshold",
                ..
            }
        ));
    }

    #[test]
    fn ring_must_fit_the_lead() {
        let err = Config::from_toml("[audio]\nlead_chunks = 6\nring_frames = 3840\n").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                key: "audio.ring_frames",
                ..
            }
        ));
        assert!(Config::from_toml("[audio]\nring_frames = 3841\n").is_ok());
    }

    #[test]
    fn unknown_keys_are_errors() {
        assert!(matches!(
            Config::from_toml("[video]\nfullscreen = true\n"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn non_positive_clamp_is_rejected() {
        assert!(Config::from_toml("[simulation]\nmax_frame_delta_secs = 0.0\n").is_err());
    }
}
