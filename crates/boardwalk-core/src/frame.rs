//! Frames exchanged over the push channel.

use serde::{Deserialize, Serialize};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use uuid::Uuid;

use crate::identity::SessionIdentity;

/// Author block of an outbound frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameUser {
    pub id: String,
    pub username: String,
    #[serde(rename = "imageUrl", default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

/// Client → relay: one frame per composed message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundFrame {
    pub user: FrameUser,
    pub message: String,
    #[serde(rename = "clientMsgId", default, skip_serializing_if = "Option::is_none")]
    pub client_msg_id: Option<String>,
}

impl OutboundFrame {
    pub fn compose(identity: &SessionIdentity, body: impl Into<String>) -> Self {
        Self {
            user: FrameUser {
                id: identity.id.clone(),
                username: identity.display_name().to_string(),
                image_url: identity.image_url.clone(),
            },
            message: body.into(),
            client_msg_id: None,
        }
    }

    pub fn with_client_msg_id(mut self, id: impl Into<String>) -> Self {
        self.client_msg_id = Some(id.into());
        self
    }
}

/// Relay → client: content-free change signal used by the refetch strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notice {
    Changed { total: usize },
}

/// Fresh correlation token (UUIDv4).
pub fn new_client_msg_id() -> String {
    Uuid::new_v4().to_string()
}

/// Current UTC instant as RFC 3339, e.g. "2025-11-02T12:34:56Z".
pub fn now_timestamp() -> String {
    let now = OffsetDateTime::now_utc();
    now.format(&Rfc3339)
        .unwrap_or_else(|_| now.unix_timestamp().to_string())
}
