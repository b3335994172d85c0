//! Crowd levels and the count thresholds that derive them.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Four-bucket severity label derived from a frame's detection count.
///
/// `Error` is not produced by [`CrowdThresholds::level_for`]; it marks a frame
/// for which the classifier had no usable signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
pub enum CrowdLevel {
    #[default]
    Low,
    Medium,
    High,
    Critical,
    Error,
}

impl CrowdLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            CrowdLevel::Low => "Low",
            CrowdLevel::Medium => "Medium",
            CrowdLevel::High => "High",
            CrowdLevel::Critical => "Critical",
            CrowdLevel::Error => "Error",
        }
    }

    /// True for the "no usable signal" sentinel.
    pub fn is_sentinel(&self) -> bool {
        matches!(self, CrowdLevel::Error)
    }
}

impl fmt::Display for CrowdLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error returned when thresholds are not strictly ascending.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("crowd thresholds must be strictly ascending, got low={low} medium={medium} high={high}")]
pub struct ThresholdError {
    pub low: u32,
    pub medium: u32,
    pub high: u32,
}

/// Ascending count thresholds separating the crowd levels.
///
/// `count < low` is Low, `< medium` is Medium, `< high` is High, anything
/// else is Critical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CrowdThresholds {
    low: u32,
    medium: u32,
    high: u32,
}

impl CrowdThresholds {
    pub const DEFAULT_LOW: u32 = 15;
    pub const DEFAULT_MEDIUM: u32 = 30;
    pub const DEFAULT_HIGH: u32 = 45;

    /// Build a threshold triple, rejecting non-ascending values.
    pub fn new(low: u32, medium: u32, high: u32) -> Result<Self, ThresholdError> {
        if low < medium && medium < high {
            Ok(Self { low, medium, high })
        } else {
            Err(ThresholdError { low, medium, high })
        }
    }

    pub fn low(&self) -> u32 {
        self.low
    }

    pub fn medium(&self) -> u32 {
        self.medium
    }

    pub fn high(&self) -> u32 {
        self.high
    }

    /// Map a detection count to its crowd level.
    pub fn level_for(&self, count: u32) -> CrowdLevel {
        if count < self.low {
            CrowdLevel::Low
        } else if count < self.medium {
            CrowdLevel::Medium
        } else if count < self.high {
            CrowdLevel::High
        } else {
            CrowdLevel::Critical
        }
    }
}

impl Default for CrowdThresholds {
    fn default() -> Self {
        Self {
            low: Self::DEFAULT_LOW,
            medium: Self::DEFAULT_MEDIUM,
            high: Self::DEFAULT_HIGH,
        }
    }
}
