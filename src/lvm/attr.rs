//! LVM attribute string parsing
//!
//! `lvs` reports a 10-character attribute string per volume. Only the
//! characters the services act on are modeled; the rest stay available
//! through the raw string.

use crate::error::{Error, Result};

// =============================================================================
// Attribute Fields
// =============================================================================

/// Activation state, character 5 of the attribute string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeState {
    Active,
    Suspended,
    InvalidSnapshot,
    SuspendedInvalidSnapshot,
    Inactive,
    Unknown,
    Other(char),
}

impl From<char> for VolumeState {
    fn from(c: char) -> Self {
        match c {
            'a' => VolumeState::Active,
            's' => VolumeState::Suspended,
            'I' => VolumeState::InvalidSnapshot,
            'S' => VolumeState::SuspendedInvalidSnapshot,
            'i' | 'd' => VolumeState::Inactive,
            'X' => VolumeState::Unknown,
            other => VolumeState::Other(other),
        }
    }
}

/// Volume health, character 9 of the attribute string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeHealth {
    Ok,
    Partial,
    RefreshNeeded,
    Mismatches,
    WriteMostly,
    Unknown,
    Other(char),
}

impl From<char> for VolumeHealth {
    fn from(c: char) -> Self {
        match c {
            '-' => VolumeHealth::Ok,
            'p' => VolumeHealth::Partial,
            'r' => VolumeHealth::RefreshNeeded,
            'm' => VolumeHealth::Mismatches,
            'w' => VolumeHealth::WriteMostly,
            'X' => VolumeHealth::Unknown,
            other => VolumeHealth::Other(other),
        }
    }
}

// =============================================================================
// Parsed Attribute String
// =============================================================================

/// Parsed view of the 10-character `lv_attr` string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LvAttr {
    raw: String,
    /// Character 1: volume type (`t` thin pool, `V` thin, `s` snapshot, ...).
    pub volume_type: char,
    pub state: VolumeState,
    /// Character 6: whether the device is open.
    pub open: bool,
    pub health: VolumeHealth,
}

impl LvAttr {
    /// Parse an attribute string as reported by `lvs`.
    pub fn parse(raw: &str) -> Result<Self> {
        let chars: Vec<char> = raw.chars().collect();
        if chars.len() != 10 {
            return Err(Error::Internal(format!(
                "malformed LVM attribute string: {raw:?}"
            )));
        }

        Ok(LvAttr {
            raw: raw.to_string(),
            volume_type: chars[0],
            state: VolumeState::from(chars[4]),
            open: chars[5] == 'o',
            health: VolumeHealth::from(chars[8]),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// A volume is abnormal when it is partially activated, suspended, or
    /// an invalidated snapshot. Returns the reason, or `None` when healthy.
    pub fn abnormality(&self) -> Option<String> {
        if self.health == VolumeHealth::Partial {
            return Some("volume is partially activated".to_string());
        }
        match self.state {
            VolumeState::Suspended | VolumeState::SuspendedInvalidSnapshot => {
                Some("volume is suspended".to_string())
            }
            VolumeState::InvalidSnapshot => Some("snapshot volume is invalid".to_string()),
            _ => None,
        }
    }
}
