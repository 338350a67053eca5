// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Quality tier derivation and the adaptive parameter table.
//!
//! # Example
//!
//! ```
//! use offline_resilience::connection::{ConnectionSnapshot, EffectiveType, NetworkSignals, Quality, QualityThresholds};
//!
//! let signals = NetworkSignals {
//!     effective_type: EffectiveType::FourG,
//!     rtt_ms: 40,
//!     ..Default::default()
//! };
//! let snapshot = ConnectionSnapshot::from_signals(&signals, &QualityThresholds::default());
//! assert_eq!(snapshot.quality, Quality::Fast);
//! assert_eq!(snapshot.adaptive_settings().batch_size, 50);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Bandwidth class reported by the host platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum EffectiveType {
    #[serde(rename = "slow-2g")]
    Slow2g,
    #[serde(rename = "2g")]
    TwoG,
    #[serde(rename = "3g")]
    ThreeG,
    #[serde(rename = "4g")]
    FourG,
    #[default]
    #[serde(rename = "unknown")]
    Unknown,
}

impl EffectiveType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Slow2g => "slow-2g",
            Self::TwoG => "2g",
            Self::ThreeG => "3g",
            Self::FourG => "4g",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for EffectiveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EffectiveType {
    type Err = std::convert::Infallible;

    /// Unrecognised labels map to `Unknown`, never an error.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "slow-2g" => Self::Slow2g,
            "2g" => Self::TwoG,
            "3g" => Self::ThreeG,
            "4g" => Self::FourG,
            _ => Self::Unknown,
        })
    }
}

/// Raw, unprocessed readings from a [`NetworkSignalSource`](super::NetworkSignalSource).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkSignals {
    pub online: bool,
    pub effective_type: EffectiveType,
    pub downlink_mbps: f64,
    pub rtt_ms: u32,
    pub save_data: bool,
}

impl Default for NetworkSignals {
    fn default() -> Self {
        Self {
            online: true,
            effective_type: EffectiveType::Unknown,
            downlink_mbps: 0.0,
            rtt_ms: 0,
            save_data: false,
        }
    }
}

impl NetworkSignals {
    #[must_use]
    pub fn offline() -> Self {
        Self {
            online: false,
            ..Default::default()
        }
    }
}

/// Discrete connection tier, ordered by severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quality {
    Fast = 0,
    Moderate = 1,
    Slow = 2,
    Offline = 3,
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fast => write!(f, "fast"),
            Self::Moderate => write!(f, "moderate"),
            Self::Slow => write!(f, "slow"),
            Self::Offline => write!(f, "offline"),
        }
    }
}

/// RTT cut-offs used for `4g` and unknown bandwidth classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QualityThresholds {
    /// RTT strictly below this is fast
    pub fast_rtt_ms: u32,
    /// RTT strictly below this (and not fast) is moderate
    pub moderate_rtt_ms: u32,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            fast_rtt_ms: 100,
            moderate_rtt_ms: 300,
        }
    }
}

/// Classify raw signals, first matching rule wins.
#[must_use]
pub fn derive_quality(signals: &NetworkSignals, thresholds: &QualityThresholds) -> Quality {
    if !signals.online {
        return Quality::Offline;
    }
    match signals.effective_type {
        EffectiveType::FourG if signals.rtt_ms < thresholds.fast_rtt_ms => Quality::Fast,
        EffectiveType::FourG | EffectiveType::ThreeG => Quality::Moderate,
        EffectiveType::TwoG | EffectiveType::Slow2g => Quality::Slow,
        EffectiveType::Unknown => match signals.rtt_ms {
            rtt if rtt < thresholds.fast_rtt_ms => Quality::Fast,
            rtt if rtt < thresholds.moderate_rtt_ms => Quality::Moderate,
            _ => Quality::Slow,
        },
    }
}

/// Derived view of the network, recomputed on every signal change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionSnapshot {
    pub online: bool,
    pub effective_type: EffectiveType,
    pub downlink_mbps: f64,
    pub rtt_ms: u32,
    pub save_data: bool,
    pub quality: Quality,
}

impl ConnectionSnapshot {
    #[must_use]
    pub fn from_signals(signals: &NetworkSignals, thresholds: &QualityThresholds) -> Self {
        Self {
            online: signals.online,
            effective_type: signals.effective_type,
            downlink_mbps: signals.downlink_mbps,
            rtt_ms: signals.rtt_ms,
            save_data: signals.save_data,
            quality: derive_quality(signals, thresholds),
        }
    }

    #[must_use]
    pub fn adaptive_settings(&self) -> AdaptiveSettings {
        AdaptiveSettings::for_quality(self.quality, self.save_data)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageQuality {
    High,
    Medium,
    Low,
}

/// Parameters the rest of the application reads synchronously.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AdaptiveSettings {
    pub request_timeout: Duration,
    pub batch_size: usize,
    pub image_quality: ImageQuality,
    pub animations_enabled: bool,
    pub prefetch_enabled: bool,
}

impl AdaptiveSettings {
    /// Offline uses the slow row; the data-saver preference turns off
    /// animations and prefetch at every tier.
    #[must_use]
    pub fn for_quality(quality: Quality, save_data: bool) -> Self {
        let (request_timeout, batch_size, image_quality) = match quality {
            Quality::Fast => (Duration::from_secs(5), 50, ImageQuality::High),
            Quality::Moderate => (Duration::from_secs(10), 25, ImageQuality::Medium),
            Quality::Slow | Quality::Offline => (Duration::from_secs(15), 10, ImageQuality::Low),
        };
        let rich = !save_data && quality < Quality::Slow;
        Self {
            request_timeout,
            batch_size,
            image_quality,
            animations_enabled: rich,
            prefetch_enabled: rich,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signals(effective_type: EffectiveType, rtt_ms: u32) -> NetworkSignals {
        NetworkSignals {
            effective_type,
            rtt_ms,
            ..Default::default()
        }
    }

    fn quality(s: &NetworkSignals) -> Quality {
        derive_quality(s, &QualityThresholds::default())
    }

    #[test]
    fn test_offline_wins_over_everything() {
        let s = NetworkSignals {
            online: false,
            ..signals(EffectiveType::FourG, 10)
        };
        assert_eq!(quality(&s), Quality::Offline);
    }

    #[test]
    fn test_effective_type_rules() {
        assert_eq!(quality(&signals(EffectiveType::FourG, 99)), Quality::Fast);
        assert_eq!(quality(&signals(EffectiveType::FourG, 100)), Quality::Moderate);
        assert_eq!(quality(&signals(EffectiveType::ThreeG, 20)), Quality::Moderate);
        assert_eq!(quality(&signals(EffectiveType::TwoG, 20)), Quality::Slow);
        assert_eq!(quality(&signals(EffectiveType::Slow2g, 20)), Quality::Slow);
    }

    #[test]
    fn test_unknown_type_falls_back_to_rtt() {
        assert_eq!(quality(&signals(EffectiveType::Unknown, 50)), Quality::Fast);
        assert_eq!(quality(&signals(EffectiveType::Unknown, 100)), Quality::Moderate);
        assert_eq!(quality(&signals(EffectiveType::Unknown, 299)), Quality::Moderate);
        assert_eq!(quality(&signals(EffectiveType::Unknown, 300)), Quality::Slow);
    }

    #[test]
    fn test_custom_thresholds() {
        let thresholds = QualityThresholds {
            fast_rtt_ms: 50,
            moderate_rtt_ms: 150,
        };
        let s = signals(EffectiveType::Unknown, 120);
        assert_eq!(derive_quality(&s, &thresholds), Quality::Moderate);
        let s = signals(EffectiveType::Unknown, 160);
        assert_eq!(derive_quality(&s, &thresholds), Quality::Slow);
    }

    #[test]
    fn test_adaptive_settings_monotonic_in_severity() {
        let tiers = [Quality::Fast, Quality::Moderate, Quality::Slow, Quality::Offline];
        for pair in tiers.windows(2) {
            let better = AdaptiveSettings::for_quality(pair[0], false);
            let worse = AdaptiveSettings::for_quality(pair[1], false);
            assert!(worse.request_timeout >= better.request_timeout);
            assert!(worse.batch_size <= better.batch_size);
        }
    }

    #[test]
    fn test_adaptive_settings_table() {
        let fast = AdaptiveSettings::for_quality(Quality::Fast, false);
        assert_eq!(fast.request_timeout, Duration::from_secs(5));
        assert_eq!(fast.image_quality, ImageQuality::High);
        assert!(fast.animations_enabled && fast.prefetch_enabled);

        let slow = AdaptiveSettings::for_quality(Quality::Slow, false);
        assert_eq!(slow.batch_size, 10);
        assert_eq!(slow.image_quality, ImageQuality::Low);
        assert!(!slow.animations_enabled && !slow.prefetch_enabled);

        let saver = AdaptiveSettings::for_quality(Quality::Fast, true);
        assert_eq!(saver.batch_size, 50);
        assert!(!saver.animations_enabled && !saver.prefetch_enabled);
    }

    #[test]
    fn test_effective_type_parsing() {
        assert_eq!("4g".parse::<EffectiveType>().unwrap(), EffectiveType::FourG);
        assert_eq!("SLOW-2G".parse::<EffectiveType>().unwrap(), EffectiveType::Slow2g);
        assert_eq!("5g".parse::<EffectiveType>().unwrap(), EffectiveType::Unknown);
        assert_eq!(EffectiveType::TwoG.to_string(), "2g");
    }

    #[test]
    fn test_signals_deserialize_from_host_json() {
        let s: NetworkSignals = serde_json::from_str(
            r#"{"online":true,"effective_type":"3g","downlink_mbps":1.5,"rtt_ms":250,"save_data":false}"#,
        )
        .unwrap();
        assert_eq!(s.effective_type, EffectiveType::ThreeG);
        assert_eq!(quality(&s), Quality::Moderate);
    }
}
