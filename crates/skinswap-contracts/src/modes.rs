use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub const MIN_REPLICAS: u32 = 1;
pub const MAX_REPLICAS: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StudioMode {
    /// Apply the material of a reference image onto the source subject.
    #[default]
    Transfer,
    /// Invent new designs sharing the source's visual language.
    Derive,
    /// Upgrade render quality without changing shape or palette.
    Refine,
}

impl StudioMode {
    pub const ALL: [StudioMode; 3] = [Self::Transfer, Self::Derive, Self::Refine];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Transfer => "transfer",
            Self::Derive => "derive",
            Self::Refine => "refine",
        }
    }

    pub fn requires_reference(self) -> bool {
        matches!(self, Self::Transfer)
    }

    pub fn default_count(self) -> u32 {
        match self {
            Self::Derive => 2,
            Self::Transfer | Self::Refine => 1,
        }
    }
}

impl fmt::Display for StudioMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StudioMode {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let lowered = raw.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|mode| mode.as_str() == lowered)
            .ok_or_else(|| format!("unknown mode '{}'", raw.trim()))
    }
}

/// Clamp a requested replica count into the supported range.
pub fn clamp_replicas(count: u32) -> u32 {
    count.clamp(MIN_REPLICAS, MAX_REPLICAS)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Pending,
    Succeeded,
    Failed,
}

impl ItemStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_counts_follow_mode() {
        assert_eq!(StudioMode::Transfer.default_count(), 1);
        assert_eq!(StudioMode::Derive.default_count(), 2);
        assert_eq!(StudioMode::Refine.default_count(), 1);
    }

    #[test]
    fn only_transfer_needs_reference() {
        assert!(StudioMode::Transfer.requires_reference());
        assert!(!StudioMode::Derive.requires_reference());
        assert!(!StudioMode::Refine.requires_reference());
    }

    #[test]
    fn mode_parse_is_case_insensitive() {
        assert_eq!("Derive".parse::<StudioMode>(), Ok(StudioMode::Derive));
        assert_eq!(" refine ".parse::<StudioMode>(), Ok(StudioMode::Refine));
        assert!("reskin".parse::<StudioMode>().is_err());
    }

    #[test]
    fn replicas_clamp_into_range() {
        assert_eq!(clamp_replicas(0), 1);
        assert_eq!(clamp_replicas(3), 3);
        assert_eq!(clamp_replicas(9), 4);
    }

    #[test]
    fn status_serializes_lowercase() -> anyhow::Result<()> {
        assert_eq!(
            serde_json::to_string(&ItemStatus::Succeeded)?,
            "\"succeeded\""
        );
        assert_eq!(serde_json::to_string(&StudioMode::Derive)?, "\"derive\"");
        Ok(())
    }
}
