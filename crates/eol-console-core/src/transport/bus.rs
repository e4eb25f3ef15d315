//! Realtime bus seam
//!
//! The server pushes JSON frames `{topic, payload}` over a full-duplex
//! channel. The channel itself (and its reconnection) belongs to the host;
//! the core only names the topics it wants and receives [`BusEvent`]s.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};

use super::TransportError;
use crate::mirror::ComponentKind;

/// Topics the core subscribes to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Topic {
    /// Connected map for every component
    HardwareStatus,
    /// `<component>-status`
    Status(ComponentKind),
    /// `<component>-error`
    Error(ComponentKind),
    RobotPosition,
    LoadcellForce,
    PowerReadings,
    McuTemperature,
    /// Digital I/O channel and emergency traffic
    DigitalIo,
    TestData,
    TestStatus,
    EmergencyStatus,
    SystemHealth,
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::HardwareStatus => f.write_str("hardware-status"),
            Topic::Status(kind) => write!(f, "{}-status", kind.name()),
            Topic::Error(kind) => write!(f, "{}-error", kind.name()),
            Topic::RobotPosition => f.write_str("robot-position"),
            Topic::LoadcellForce => f.write_str("loadcell-force"),
            Topic::PowerReadings => f.write_str("power-readings"),
            Topic::McuTemperature => f.write_str("mcu-temperature"),
            Topic::DigitalIo => f.write_str("digital_io"),
            Topic::TestData => f.write_str("test-data"),
            Topic::TestStatus => f.write_str("test-status"),
            Topic::EmergencyStatus => f.write_str("emergency-status"),
            Topic::SystemHealth => f.write_str("system-health"),
        }
    }
}

impl FromStr for Topic {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        let fixed = match name {
            "hardware-status" => Some(Topic::HardwareStatus),
            "robot-position" => Some(Topic::RobotPosition),
            "loadcell-force" => Some(Topic::LoadcellForce),
            "power-readings" => Some(Topic::PowerReadings),
            "mcu-temperature" => Some(Topic::McuTemperature),
            "digital_io" | "digital-io" => Some(Topic::DigitalIo),
            "test-data" => Some(Topic::TestData),
            "test-status" => Some(Topic::TestStatus),
            "emergency-status" => Some(Topic::EmergencyStatus),
            "system-health" => Some(Topic::SystemHealth),
            _ => None,
        };
        if let Some(topic) = fixed {
            return Ok(topic);
        }

        let unknown = || TransportError::shape("bus", format!("unknown topic '{name}'"));
        let (component, suffix) = name.rsplit_once('-').ok_or_else(unknown)?;
        let kind = ComponentKind::from_name(component).ok_or_else(unknown)?;
        match suffix {
            "status" => Ok(Topic::Status(kind)),
            "error" => Ok(Topic::Error(kind)),
            _ => Err(unknown()),
        }
    }
}

/// One inbound frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusMessage {
    pub topic: String,
    #[serde(default)]
    pub payload: Value,
}

impl BusMessage {
    pub fn new(topic: impl Into<String>, payload: Value) -> Self {
        Self {
            topic: topic.into(),
            payload,
        }
    }

    /// Frame addressed to a known topic
    pub fn on(topic: Topic, payload: Value) -> Self {
        Self::new(topic.to_string(), payload)
    }

    /// Parse a raw text frame
    pub fn from_json(text: &str) -> Result<Self, TransportError> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Bus connection as reported by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// What the host forwards to the session
#[derive(Debug, Clone, PartialEq)]
pub enum BusEvent {
    Message(BusMessage),
    Connection(BusConnectionState),
}

/// Handle returned by [`RealtimeBus::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionToken(pub u64);

/// Publish/subscribe facade over the realtime channel.
///
/// Delivery is at-least-once and per-topic ordered; frames reach the
/// session as [`BusEvent`]s through whatever channel the host uses.
pub trait RealtimeBus {
    /// Ask the server for `topic`. Fails with
    /// [`TransportError::NotConnected`] while the channel is down.
    fn subscribe(&self, topic: &Topic) -> Result<SubscriptionToken, TransportError>;

    fn unsubscribe(&self, token: SubscriptionToken);

    fn connection_state(&self) -> BusConnectionState;
}

impl<T: RealtimeBus> RealtimeBus for &T {
    fn subscribe(&self, topic: &Topic) -> Result<SubscriptionToken, TransportError> {
        (**self).subscribe(topic)
    }

    fn unsubscribe(&self, token: SubscriptionToken) {
        (**self).unsubscribe(token)
    }

    fn connection_state(&self) -> BusConnectionState {
        (**self).connection_state()
    }
}

impl<T: RealtimeBus> RealtimeBus for std::rc::Rc<T> {
    fn subscribe(&self, topic: &Topic) -> Result<SubscriptionToken, TransportError> {
        (**self).subscribe(topic)
    }

    fn unsubscribe(&self, token: SubscriptionToken) {
        (**self).unsubscribe(token)
    }

    fn connection_state(&self) -> BusConnectionState {
        (**self).connection_state()
    }
}

#[derive(Debug, Clone)]
struct Subscription<O> {
    owner: O,
    topic: Topic,
    /// `None` while the bus refused the subscription
    token: Option<SubscriptionToken>,
}

/// Every active `(owner, topic)` subscription, so a reconnect can
/// re-establish all of them
#[derive(Debug, Clone)]
pub struct SubscriptionRegistry<O> {
    entries: Vec<Subscription<O>>,
}

impl<O> Default for SubscriptionRegistry<O> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<O: Copy + Eq + fmt::Debug> SubscriptionRegistry<O> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `owner` to `topic`. A refusal is remembered and retried on
    /// the next reconnect.
    pub fn subscribe<B: RealtimeBus>(&mut self, bus: &B, owner: O, topic: Topic) {
        if self.entries.iter().any(|e| e.owner == owner && e.topic == topic) {
            return;
        }
        let token = match bus.subscribe(&topic) {
            Ok(token) => Some(token),
            Err(e) => {
                debug!(%topic, error = %e, "subscription deferred");
                None
            }
        };
        self.entries.push(Subscription { owner, topic, token });
    }

    /// Drop every subscription held by `owner`
    pub fn release_owner<B: RealtimeBus>(&mut self, bus: &B, owner: O) {
        self.entries.retain(|entry| {
            if entry.owner != owner {
                return true;
            }
            if let Some(token) = entry.token {
                bus.unsubscribe(token);
            }
            false
        });
    }

    /// Re-establish every subscription after a reconnect; returns how many
    /// succeeded
    pub fn resubscribe_all<B: RealtimeBus>(&mut self, bus: &B) -> usize {
        let mut restored = 0;
        for entry in &mut self.entries {
            match bus.subscribe(&entry.topic) {
                Ok(token) => {
                    entry.token = Some(token);
                    restored += 1;
                }
                Err(e) => {
                    warn!(topic = %entry.topic, error = %e, "resubscribe failed");
                    entry.token = None;
                }
            }
        }
        restored
    }

    /// Whether any owner holds `topic`
    pub fn is_subscribed(&self, topic: Topic) -> bool {
        self.entries.iter().any(|e| e.topic == topic)
    }

    pub fn topics_for(&self, owner: O) -> Vec<Topic> {
        self.entries
            .iter()
            .filter(|e| e.owner == owner)
            .map(|e| e.topic)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
