//! Battery operating modes and the mode controller.
//!
//! Maps a battery-level reading to one of four discrete operating modes,
//! each carrying an immutable restriction set. The *active* mode is
//! process state owned exclusively by [`BatteryModeController`].

use crate::error::{Result, SchedulerError};
use serde::{Deserialize, Serialize};
use tracing::info;

/// A named battery operating mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatteryMode {
    /// Full functionality, no restrictions.
    #[default]
    Normal,
    /// Mild restrictions (battery ≤ 50%).
    Balanced,
    /// Aggressive restrictions (battery ≤ 30%).
    PowerSaver,
    /// Only critical work runs (battery ≤ 15%).
    UltraSaver,
}

impl std::fmt::Display for BatteryMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Normal => "normal",
            Self::Balanced => "balanced",
            Self::PowerSaver => "power_saver",
            Self::UltraSaver => "ultra_saver",
        };
        write!(f, "{name}")
    }
}

impl BatteryMode {
    /// Parse a persisted or caller-supplied mode name.
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "normal" => Ok(Self::Normal),
            "balanced" => Ok(Self::Balanced),
            "power_saver" => Ok(Self::PowerSaver),
            "ultra_saver" => Ok(Self::UltraSaver),
            other => Err(SchedulerError::InvalidMode(other.to_owned())),
        }
    }

    /// Map a battery level (0.0–1.0) to a mode.
    ///
    /// Bands are non-overlapping and inclusive on the lower bound:
    /// 0.15 exactly maps to ultra_saver, 0.16 to power_saver.
    #[must_use]
    pub fn from_level(level: f32) -> Self {
        if level <= 0.15 {
            Self::UltraSaver
        } else if level <= 0.30 {
            Self::PowerSaver
        } else if level <= 0.50 {
            Self::Balanced
        } else {
            Self::Normal
        }
    }

    /// The restriction set this mode enforces.
    #[must_use]
    pub fn restrictions(&self) -> ModeRestrictions {
        match self {
            Self::Normal => ModeRestrictions {
                background_sync: true,
                push_notifications: true,
                location: true,
                animations: true,
                auto_sync: true,
            },
            Self::Balanced => ModeRestrictions {
                background_sync: true,
                push_notifications: true,
                location: true,
                animations: false,
                auto_sync: true,
            },
            Self::PowerSaver => ModeRestrictions {
                background_sync: true,
                push_notifications: true,
                location: false,
                animations: false,
                auto_sync: false,
            },
            Self::UltraSaver => ModeRestrictions {
                background_sync: false,
                push_notifications: true,
                location: false,
                animations: false,
                auto_sync: false,
            },
        }
    }

    /// Target hourly battery-impact ceiling for this mode (percent/hour).
    #[must_use]
    pub fn hourly_impact_ceiling(&self) -> f32 {
        match self {
            Self::Normal => 5.0,
            Self::Balanced => 3.0,
            Self::PowerSaver => 1.5,
            Self::UltraSaver => 0.5,
        }
    }
}

/// What a mode allows. Applied as an atomic replace on mode change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeRestrictions {
    /// Background sync tasks may run.
    pub background_sync: bool,
    /// Push notifications may be delivered.
    pub push_notifications: bool,
    /// Location lookups are allowed.
    pub location: bool,
    /// UI animations are allowed.
    pub animations: bool,
    /// Automatic (non-user-initiated) sync is allowed.
    pub auto_sync: bool,
}

/// A reported mode transition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModeChange {
    /// Mode before the transition.
    pub from: BatteryMode,
    /// Mode after the transition.
    pub to: BatteryMode,
    /// Battery level that triggered it.
    pub level: f32,
}

/// Owns the active battery mode and re-evaluates it on battery samples.
#[derive(Debug)]
pub struct BatteryModeController {
    active: BatteryMode,
    auto_switching: bool,
}

impl BatteryModeController {
    /// Create a controller starting in the given mode.
    #[must_use]
    pub fn new(initial: BatteryMode, auto_switching: bool) -> Self {
        Self {
            active: initial,
            auto_switching,
        }
    }

    /// Pure read of the active mode.
    #[must_use]
    pub fn active_mode(&self) -> BatteryMode {
        self.active
    }

    /// Restrictions of the active mode.
    #[must_use]
    pub fn active_restrictions(&self) -> ModeRestrictions {
        self.active.restrictions()
    }

    /// Enable or disable automatic mode switching.
    pub fn set_auto_switching(&mut self, enabled: bool) {
        self.auto_switching = enabled;
    }

    /// Replace the active mode. The restriction set switches atomically
    /// with the mode since restrictions are derived, never stored.
    pub fn set_mode(&mut self, mode: BatteryMode) {
        self.active = mode;
    }

    /// Replace the active mode by name, rejecting unknown names.
    pub fn set_mode_by_name(&mut self, name: &str) -> Result<()> {
        self.active = BatteryMode::parse(name)?;
        Ok(())
    }

    /// Re-evaluate the mode for a battery sample.
    ///
    /// Returns `Some(ModeChange)` only when the computed mode differs from
    /// the active one; a no-op when unchanged or when automatic switching
    /// is disabled. The level is clamped to 0.0–1.0.
    pub fn adapt(&mut self, level: f32) -> Option<ModeChange> {
        if !self.auto_switching {
            return None;
        }
        let level = level.clamp(0.0, 1.0);
        let computed = BatteryMode::from_level(level);
        if computed == self.active {
            return None;
        }

        let change = ModeChange {
            from: self.active,
            to: computed,
            level,
        };
        self.active = computed;
        info!(
            "battery mode changed: {} -> {} (level {:.0}%)",
            change.from,
            change.to,
            level * 100.0
        );
        Some(change)
    }
}
