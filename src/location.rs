//! Wire-level data model: positions, watcher options, delivery events.
//!
//! These are the types the outer bridge layer serializes as JSON. Any numeric
//! position field the platform could not determine is `None`, never a
//! sentinel value.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc;

/// Opaque watcher identity, unique within the registry at any instant.
///
/// Caller-supplied (the bridge's callback id) or generated via
/// [`WatcherId::generate`]. Stable for the watcher's lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WatcherId(String);

impl WatcherId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random id for callers that do not supply one.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WatcherId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WatcherId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

/// A single position sample from the platform location provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
    /// Radius of horizontal uncertainty in metres, 68% confidence.
    pub accuracy: Option<f64>,
    /// Metres above sea level.
    pub altitude: Option<f64>,
    /// Vertical uncertainty in metres, 68% confidence.
    pub altitude_accuracy: Option<f64>,
    /// Speed in metres per second.
    pub speed: Option<f64>,
    /// Deviation from true north in degrees.
    pub bearing: Option<f64>,
    /// When the sample was produced.
    pub time: Option<DateTime<Utc>>,
    /// True if the position was produced by software rather than hardware.
    #[serde(default)]
    pub simulated: bool,
}

impl Position {
    /// A minimal sample with only coordinates, timestamped now.
    #[must_use]
    pub fn at(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            accuracy: None,
            altitude: None,
            altitude_accuracy: None,
            speed: None,
            bearing: None,
            time: Some(Utc::now()),
            simulated: false,
        }
    }
}

/// Options accepted by `add_watcher`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherOptions {
    /// Title of the persistent notice. Only used when `background_message`
    /// is set; defaults to a generic title when absent.
    pub background_title: Option<String>,
    /// Body of the persistent notice. Present means this watcher requires
    /// background operation and therefore a persistent notice.
    pub background_message: Option<String>,
    /// Whether an interactive permission prompt may be shown when the
    /// capability is not yet granted.
    pub request_permissions: bool,
    /// Deliver a best-effort, possibly-stale last-known position immediately,
    /// while the device obtains a fresh fix. The caller is responsible for
    /// checking the sample's `time`.
    pub stale: bool,
    /// Minimum number of metres between subsequent positions. Zero disables
    /// the filter; negative input is clamped to zero.
    pub distance_filter: f64,
    /// Minimum milliseconds between subsequent positions.
    pub min_interval_ms: u64,
}

impl Default for WatcherOptions {
    fn default() -> Self {
        Self {
            background_title: None,
            background_message: None,
            request_permissions: true,
            stale: false,
            distance_filter: 0.0,
            min_interval_ms: 1000,
        }
    }
}

impl WatcherOptions {
    /// The subscription filter derived from these options.
    #[must_use]
    pub fn filter(&self) -> FilterConfig {
        FilterConfig {
            distance_filter: self.distance_filter.max(0.0),
            min_interval: Duration::from_millis(self.min_interval_ms),
        }
    }

    /// The persistent-notice configuration, if this watcher requires one.
    #[must_use]
    pub fn notice(&self) -> Option<NoticeConfig> {
        let body = self.background_message.clone()?;
        Some(NoticeConfig {
            title: self
                .background_title
                .clone()
                .unwrap_or_else(|| "Using your location".to_owned()),
            body,
            icon: None,
            tap_target: None,
        })
    }
}

/// Distance/time filter handed to the position source at subscribe time.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterConfig {
    /// Minimum displacement in metres between delivered samples.
    pub distance_filter: f64,
    /// Minimum interval between delivered samples.
    pub min_interval: Duration,
}

/// Configuration for the persistent notice shown while tracking continues in
/// the background.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoticeConfig {
    pub title: String,
    pub body: String,
    /// Resource reference for the notice icon. A valid icon matters: on some
    /// platforms tapping an icon-less notice opens the app's settings instead
    /// of foregrounding the app.
    pub icon: Option<String>,
    /// Reference to the screen/activity brought forward when tapped.
    pub tap_target: Option<String>,
}

/// A discrete push event delivered to the caller, keyed by watcher id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherEvent {
    pub watcher_id: WatcherId,
    pub position: Position,
}

/// The per-watcher delivery sink captured at `add` time.
pub type PositionSink = mpsc::UnboundedSender<WatcherEvent>;
