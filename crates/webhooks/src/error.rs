use switchboard_common::UnknownEventType;

use crate::egress::EgressViolation;

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("webhook not found")]
    NotFound,

    #[error("invalid webhook url: {0}")]
    InvalidUrl(String),

    #[error(transparent)]
    Egress(#[from] EgressViolation),

    #[error(transparent)]
    UnknownEventType(#[from] UnknownEventType),

    #[error("signing failed: {0}")]
    Signing(String),

    #[error("http client: {0}")]
    Http(#[from] reqwest::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
