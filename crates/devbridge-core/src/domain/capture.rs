//! Screen capture session types.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::session::{DeviceId, Platform, SessionInfo};

/// Capture quality tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Low,
    #[default]
    Medium,
    High,
}

impl Quality {
    /// The fixed frame rate a quality change maps to.
    ///
    /// | Quality | Frames per second |
    /// |---------|-------------------|
    /// | low     | 15                |
    /// | medium  | 30                |
    /// | high    | 60                |
    pub fn frame_rate(self) -> u32 {
        match self {
            Quality::Low => 15,
            Quality::Medium => 30,
            Quality::High => 60,
        }
    }
}

/// Default nominal frame rate when the client does not supply one.
pub const DEFAULT_FRAME_RATE: u32 = 30;

/// Upper bound accepted for a requested frame rate.
pub const MAX_FRAME_RATE: u32 = 120;

/// Options a client supplies when starting a capture.
///
/// Every field is optional on the wire; absent fields take the
/// [`Default`] values (`quality = medium`, `frameRate = 30`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CaptureOptions {
    pub quality: Quality,
    pub frame_rate: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            quality: Quality::Medium,
            frame_rate: DEFAULT_FRAME_RATE,
            width: None,
            height: None,
        }
    }
}

impl CaptureOptions {
    /// Period between capture ticks: `1000 / frameRate` milliseconds.
    ///
    /// Computed in microseconds so 60 fps yields 16.666 ms rather than a
    /// truncated 16 ms.
    pub fn frame_interval(&self) -> Duration {
        Duration::from_micros(1_000_000 / u64::from(self.frame_rate.max(1)))
    }

    /// Returns `true` when the requested frame rate is within `1..=MAX_FRAME_RATE`.
    pub fn is_valid(&self) -> bool {
        (1..=MAX_FRAME_RATE).contains(&self.frame_rate)
    }
}

/// Live measurements for a capture session.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureMetrics {
    /// Observed frames per second (not the configured rate).
    pub frame_rate: f64,
    /// Duration of the most recent capture call, in milliseconds.
    #[serde(rename = "latency")]
    pub latency_ms: f64,
    /// Observed throughput in bytes per second.
    pub bandwidth: f64,
    pub dropped_frames: u64,
}

/// A screen capture session on one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureSession {
    #[serde(flatten)]
    pub info: SessionInfo,
    pub options: CaptureOptions,
    pub metrics: CaptureMetrics,
}

impl CaptureSession {
    pub fn new(device_id: impl Into<DeviceId>, platform: Platform, options: CaptureOptions) -> Self {
        Self {
            info: SessionInfo::new("screen", device_id, platform),
            options,
            metrics: CaptureMetrics::default(),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quality_frame_rate_table() {
        assert_eq!(Quality::Low.frame_rate(), 15);
        assert_eq!(Quality::Medium.frame_rate(), 30);
        assert_eq!(Quality::High.frame_rate(), 60);
    }

    #[test]
    fn test_empty_options_json_takes_defaults() {
        // Arrange / Act
        let options: CaptureOptions = serde_json::from_str("{}").unwrap();

        // Assert
        assert_eq!(options.quality, Quality::Medium);
        assert_eq!(options.frame_rate, 30);
        assert_eq!(options.width, None);
    }

    #[test]
    fn test_partial_options_json_keeps_default_frame_rate() {
        let options: CaptureOptions = serde_json::from_str(r#"{"quality":"high"}"#).unwrap();
        assert_eq!(options.quality, Quality::High);
        assert_eq!(options.frame_rate, DEFAULT_FRAME_RATE);
    }

    #[test]
    fn test_frame_interval_for_30_fps() {
        let options = CaptureOptions::default();
        assert_eq!(options.frame_interval(), Duration::from_micros(33_333));
    }

    #[test]
    fn test_frame_interval_for_60_fps() {
        let options = CaptureOptions {
            frame_rate: 60,
            ..CaptureOptions::default()
        };
        assert_eq!(options.frame_interval(), Duration::from_micros(16_666));
    }

    #[test]
    fn test_zero_frame_rate_is_invalid() {
        let options = CaptureOptions {
            frame_rate: 0,
            ..CaptureOptions::default()
        };
        assert!(!options.is_valid());
    }

    #[test]
    fn test_metrics_serialize_latency_field() {
        let metrics = CaptureMetrics {
            latency_ms: 12.5,
            ..CaptureMetrics::default()
        };
        let value = serde_json::to_value(metrics).unwrap();
        assert_eq!(value["latency"], 12.5);
        assert_eq!(value["droppedFrames"], 0);
    }
}
