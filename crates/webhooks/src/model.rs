use std::{fmt, str::FromStr};

use {
    serde::{Deserialize, Serialize},
    switchboard_common::{EventType, UnknownEventType},
};

/// A customer-registered callback target owned by one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Webhook {
    pub id: String,
    pub device_id: String,
    pub url: String,
    #[serde(skip_serializing)]
    pub secret: String,
    /// Subscribed types in insertion order. Empty means every type.
    pub event_types: Vec<EventType>,
    pub active: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Webhook {
    pub fn subscribes_to(&self, event_type: EventType) -> bool {
        self.event_types.is_empty() || self.event_types.contains(&event_type)
    }
}

/// Full replacement of a webhook's mutable fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookUpdate {
    pub url: String,
    pub secret: String,
    pub event_types: Vec<EventType>,
    pub active: bool,
}

/// Parse event type names, dropping duplicates and keeping first-seen order.
pub fn parse_event_types<S: AsRef<str>>(raw: &[S]) -> Result<Vec<EventType>, UnknownEventType> {
    let mut types = Vec::with_capacity(raw.len());
    for name in raw {
        let event_type: EventType = name.as_ref().trim().parse()?;
        if !types.contains(&event_type) {
            types.push(event_type);
        }
    }
    Ok(types)
}

pub(crate) fn dedup_event_types(types: &[EventType]) -> Vec<EventType> {
    let mut out = Vec::with_capacity(types.len());
    for t in types {
        if !out.contains(t) {
            out.push(*t);
        }
    }
    out
}

// ── Delivery log ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Success,
    Failed,
    Retrying,
}

impl DeliveryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Retrying => "retrying",
        }
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for DeliveryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            "retrying" => Ok(Self::Retrying),
            other => Err(format!("unknown delivery status: {other}")),
        }
    }
}

/// One terminal outcome of a delivery task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryLog {
    pub id: String,
    pub webhook_id: String,
    pub event_type: String,
    pub status: DeliveryStatus,
    pub attempt_count: u32,
    pub last_error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_subscription_matches_everything() {
        let webhook = Webhook {
            id: "w".into(),
            device_id: "d".into(),
            url: "https://example.com".into(),
            secret: "s".into(),
            event_types: vec![],
            active: true,
            created_at: 0,
            updated_at: 0,
        };
        for t in EventType::ALL {
            assert!(webhook.subscribes_to(*t));
        }

        let filtered = Webhook {
            event_types: vec![EventType::MessageReceived],
            ..webhook
        };
        assert!(filtered.subscribes_to(EventType::MessageReceived));
        assert!(!filtered.subscribes_to(EventType::Connected));
    }

    #[test]
    fn test_parse_event_types_keeps_order_and_dedups() {
        let types = parse_event_types(&[
            "message.received",
            "connection.connected",
            "message.received",
        ])
        .unwrap();
        assert_eq!(types, vec![EventType::MessageReceived, EventType::Connected]);
    }

    #[test]
    fn test_parse_event_types_rejects_unknown() {
        let err = parse_event_types(&["message.received", "bogus"]).unwrap_err();
        assert_eq!(err.0, "bogus");
    }

    #[test]
    fn test_secret_not_serialized() {
        let webhook = Webhook {
            id: "w".into(),
            device_id: "d".into(),
            url: "https://example.com".into(),
            secret: "hunter2".into(),
            event_types: vec![EventType::CallOffer],
            active: true,
            created_at: 0,
            updated_at: 0,
        };
        let json = serde_json::to_string(&webhook).unwrap();
        assert!(!json.contains("hunter2"));
        assert!(json.contains("call.offer"));
    }

    #[test]
    fn test_status_round_trip() {
        for s in ["pending", "success", "failed", "retrying"] {
            assert_eq!(s.parse::<DeliveryStatus>().unwrap().as_str(), s);
        }
        assert!("done".parse::<DeliveryStatus>().is_err());
    }
}
