//! Source mode and health reporting types.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Which quote source variant the engine is bound to.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    ValueEnum,
    Display,
    EnumString,
)]
#[serde(rename_all = "lowercase")]
#[clap(rename_all = "lower")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum SourceMode {
    /// Vendor market-data gateway.
    Live,
    /// Random-walk generator.
    Synthetic,
}

/// Status snapshot reported by the control surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    /// Source variant in use for this process.
    pub source_mode: SourceMode,
    /// Whether the source is currently producing quotes.
    pub ready: bool,
    /// Number of instruments in the subscription registry.
    pub subscribed_count: usize,
    /// Set when a live source lost its transport after reaching `Ready`.
    #[serde(default)]
    pub degraded: bool,
    /// Number of registered push sessions.
    #[serde(default)]
    pub session_count: usize,
}
