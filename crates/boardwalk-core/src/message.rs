use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// Display name stamped on outbound messages when the sender has neither a
/// username nor a full name.
pub const ANONYMOUS: &str = "Anonymous";

/// Errors raised while interpreting an inbound record.
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("payload is not a valid message record: {0}")]
    Json(#[from] serde_json::Error),
    #[error("message body is empty")]
    EmptyBody,
}

/// Identity descriptor attached to every message.
///
/// Older clients sent the author as a bare string; those still deserialize and
/// land in `username` with an empty id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "AuthorRepr")]
pub struct Author {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(rename = "fullName", skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(rename = "imageUrl", skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

impl Author {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_full_name(mut self, full_name: impl Into<String>) -> Self {
        self.full_name = Some(full_name.into());
        self
    }

    /// Username when present, otherwise the full name.
    pub fn display_name(&self) -> Option<&str> {
        non_empty(self.username.as_deref()).or_else(|| non_empty(self.full_name.as_deref()))
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum AuthorRepr {
    Name(String),
    Record {
        #[serde(default)]
        id: String,
        #[serde(default, deserialize_with = "empty_as_none")]
        username: Option<String>,
        #[serde(
            default,
            rename = "fullName",
            alias = "full_name",
            deserialize_with = "empty_as_none"
        )]
        full_name: Option<String>,
        #[serde(
            default,
            rename = "imageUrl",
            alias = "image_url",
            deserialize_with = "empty_as_none"
        )]
        image_url: Option<String>,
    },
}

impl From<AuthorRepr> for Author {
    fn from(repr: AuthorRepr) -> Self {
        match repr {
            AuthorRepr::Name(name) => Author {
                id: String::new(),
                username: Some(name).filter(|n| !n.trim().is_empty()),
                full_name: None,
                image_url: None,
            },
            AuthorRepr::Record {
                id,
                username,
                full_name,
                image_url,
            } => Author {
                id,
                username,
                full_name,
                image_url,
            },
        }
    }
}

/// A single transcript entry as it travels on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "user")]
    pub author: Author,
    #[serde(rename = "message")]
    pub body: String,
    /// Server-assigned; advisory only, never used for ordering.
    #[serde(
        rename = "created_at",
        alias = "createdAt",
        default,
        deserialize_with = "empty_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<String>,
    /// Correlation token minted by the sending client and echoed by the relay.
    #[serde(
        rename = "clientMsgId",
        default,
        deserialize_with = "empty_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub client_msg_id: Option<String>,
}

impl Message {
    pub fn new(author: Author, body: impl Into<String>) -> Self {
        Self {
            author,
            body: body.into(),
            created_at: None,
            client_msg_id: None,
        }
    }

    pub fn with_created_at(mut self, created_at: impl Into<String>) -> Self {
        self.created_at = Some(created_at.into());
        self
    }

    pub fn with_client_msg_id(mut self, id: impl Into<String>) -> Self {
        self.client_msg_id = Some(id.into());
        self
    }

    /// Interprets one inbound push frame as a complete message record.
    pub fn from_frame(frame: &str) -> Result<Self, PayloadError> {
        let message: Message = serde_json::from_str(frame)?;
        if message.body.trim().is_empty() {
            return Err(PayloadError::EmptyBody);
        }
        Ok(message)
    }

    /// Whether `other` is the same logical message, as far as the wire lets us tell.
    ///
    /// Correlation tokens win when both sides carry one. Otherwise author id and
    /// body must agree, and timestamps must agree when both are known.
    pub fn same_logical(&self, other: &Message) -> bool {
        if let (Some(a), Some(b)) = (&self.client_msg_id, &other.client_msg_id) {
            return a == b;
        }
        if self.author.id != other.author.id || self.body != other.body {
            return false;
        }
        match (&self.created_at, &other.created_at) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        }
    }
}

/// Parses the body of the snapshot endpoint. A JSON `null` is an empty log.
pub fn parse_snapshot(bytes: &[u8]) -> Result<Vec<Message>, PayloadError> {
    let records: Option<Vec<Message>> = serde_json::from_slice(bytes)?;
    Ok(records.unwrap_or_default())
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

pub(crate) fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|v| !v.trim().is_empty()))
}
