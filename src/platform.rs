//! Abstract platform capability boundary.
//!
//! The scheduler never talks to OS background-execution or battery APIs
//! directly; hosts supply a [`PlatformExecutor`] bound to their platform.
//! Tests supply a deterministic fake.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Kind of network link currently active.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkType {
    /// Wi-Fi or other unmetered link.
    Wifi,
    /// Cellular / metered link.
    Cellular,
    /// Wired (docked) link.
    Ethernet,
    /// No link.
    #[default]
    None,
}

/// Connectivity snapshot from the platform.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connectivity {
    /// Whether any usable link is up.
    pub connected: bool,
    /// The active link kind.
    pub link: LinkType,
}

impl Connectivity {
    /// An offline snapshot.
    #[must_use]
    pub fn offline() -> Self {
        Self::default()
    }

    /// A connected snapshot over the given link.
    #[must_use]
    pub fn online(link: LinkType) -> Self {
        Self {
            connected: true,
            link,
        }
    }
}

/// OS integration surface consumed by the scheduler.
///
/// `register_periodic_task` returning `Ok(false)` means the OS refused the
/// registration; the scheduler degrades to loop-only coordination and the
/// task keeps `registered_with_platform = false`.
#[async_trait]
pub trait PlatformExecutor: Send + Sync {
    /// Ask the OS to wake the process periodically for the named task.
    async fn register_periodic_task(&self, name: &str, min_interval_secs: u64) -> Result<bool>;

    /// Remove a previously registered periodic wake-up.
    async fn unregister_task(&self, name: &str) -> Result<()>;

    /// Current battery level, 0.0–1.0.
    fn battery_level(&self) -> f32;

    /// Whether the device is currently charging.
    fn is_charging(&self) -> bool;

    /// Current connectivity snapshot.
    fn connectivity(&self) -> Connectivity;
}

/// No-op executor for hosts without OS background registration.
///
/// Registration always succeeds so in-app coordination proceeds; battery
/// reads report full charge and Wi-Fi connectivity.
#[derive(Debug, Default)]
pub struct InProcessExecutor;

#[async_trait]
impl PlatformExecutor for InProcessExecutor {
    async fn register_periodic_task(&self, _name: &str, _min_interval_secs: u64) -> Result<bool> {
        Ok(true)
    }

    async fn unregister_task(&self, _name: &str) -> Result<()> {
        Ok(())
    }

    fn battery_level(&self) -> f32 {
        1.0
    }

    fn is_charging(&self) -> bool {
        false
    }

    fn connectivity(&self) -> Connectivity {
        Connectivity::online(LinkType::Wifi)
    }
}
