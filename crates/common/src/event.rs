use std::{fmt, str::FromStr};

use {
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
};

// ── Event types ──────────────────────────────────────────────────────────────

/// Normalized event vocabulary shared by the session registry and webhook
/// subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "connection.connected")]
    Connected,
    #[serde(rename = "connection.disconnected")]
    Disconnected,
    #[serde(rename = "connection.logged_out")]
    LoggedOut,
    #[serde(rename = "connection.pair_success")]
    PairSuccess,
    #[serde(rename = "message.received")]
    MessageReceived,
    #[serde(rename = "message.receipt")]
    MessageReceipt,
    #[serde(rename = "call.offer")]
    CallOffer,
    #[serde(rename = "presence.update")]
    PresenceUpdate,
    #[serde(rename = "webhook.test")]
    WebhookTest,
}

impl EventType {
    pub const ALL: &[EventType] = &[
        EventType::Connected,
        EventType::Disconnected,
        EventType::LoggedOut,
        EventType::PairSuccess,
        EventType::MessageReceived,
        EventType::MessageReceipt,
        EventType::CallOffer,
        EventType::PresenceUpdate,
        EventType::WebhookTest,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connected => "connection.connected",
            Self::Disconnected => "connection.disconnected",
            Self::LoggedOut => "connection.logged_out",
            Self::PairSuccess => "connection.pair_success",
            Self::MessageReceived => "message.received",
            Self::MessageReceipt => "message.receipt",
            Self::CallOffer => "call.offer",
            Self::PresenceUpdate => "presence.update",
            Self::WebhookTest => "webhook.test",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown event type: {0}")]
pub struct UnknownEventType(pub String);

impl FromStr for EventType {
    type Err = UnknownEventType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UnknownEventType(s.to_string()))
    }
}

// ── Event ────────────────────────────────────────────────────────────────────

/// One protocol occurrence, built once and fanned out to every matching
/// webhook. Serializes to the callback body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub event_type: EventType,
    pub device_id: String,
    pub timestamp: DateTime<Utc>,
    pub data: serde_json::Value,
}

impl Event {
    pub fn new(event_type: EventType, device_id: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            event_type,
            device_id: device_id.into(),
            timestamp: Utc::now(),
            data,
        }
    }
}
