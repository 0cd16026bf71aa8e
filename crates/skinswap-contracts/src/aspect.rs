use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::StudioError;

/// Aspect ratios accepted by the generation backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum AspectRatio {
    #[default]
    #[serde(rename = "1:1")]
    Square,
    #[serde(rename = "3:4")]
    Portrait,
    #[serde(rename = "4:3")]
    Landscape,
    #[serde(rename = "9:16")]
    Tall,
    #[serde(rename = "16:9")]
    Wide,
}

impl AspectRatio {
    /// Candidates in tie-breaking order.
    pub const ALL: [AspectRatio; 5] = [
        AspectRatio::Square,
        AspectRatio::Portrait,
        AspectRatio::Landscape,
        AspectRatio::Tall,
        AspectRatio::Wide,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Square => "1:1",
            Self::Portrait => "3:4",
            Self::Landscape => "4:3",
            Self::Tall => "9:16",
            Self::Wide => "16:9",
        }
    }

    pub fn reference_value(self) -> f64 {
        match self {
            Self::Square => 1.0,
            Self::Portrait => 0.75,
            Self::Landscape => 1.333,
            Self::Tall => 0.5625,
            Self::Wide => 1.777,
        }
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AspectRatio {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        Self::ALL
            .into_iter()
            .find(|candidate| candidate.as_str() == trimmed)
            .ok_or_else(|| format!("unsupported aspect ratio '{trimmed}'"))
    }
}

/// Snap a pixel size to the nearest supported aspect ratio.
///
/// Ties keep the candidate that comes first in [`AspectRatio::ALL`].
pub fn classify_aspect_ratio(width: u32, height: u32) -> Result<AspectRatio, StudioError> {
    if width == 0 || height == 0 {
        return Err(StudioError::InvalidDimensions { width, height });
    }
    let ratio = f64::from(width) / f64::from(height);
    let mut best = AspectRatio::ALL[0];
    let mut best_delta = (best.reference_value() - ratio).abs();
    for candidate in AspectRatio::ALL.into_iter().skip(1) {
        let delta = (candidate.reference_value() - ratio).abs();
        if delta < best_delta {
            best = candidate;
            best_delta = delta;
        }
    }
    Ok(best)
}
