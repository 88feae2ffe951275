use serde::{Deserialize, Serialize};

use crate::message::{Author, ANONYMOUS};

/// Attributes of the signed-in participant, supplied by the external identity
/// provider once sign-in completes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionIdentity {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, rename = "fullName", skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(default, rename = "imageUrl", skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

impl SessionIdentity {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: None,
            full_name: None,
            image_url: None,
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

    pub fn with_image_url(mut self, image_url: impl Into<String>) -> Self {
        self.image_url = Some(image_url.into());
        self
    }

    /// Name compared against message authors: username, else full name.
    pub fn comparison_name(&self) -> Option<&str> {
        let username = self.username.as_deref().filter(|v| !v.is_empty());
        username.or_else(|| self.full_name.as_deref().filter(|v| !v.is_empty()))
    }

    /// Name stamped on outbound messages.
    pub fn display_name(&self) -> &str {
        self.comparison_name().unwrap_or(ANONYMOUS)
    }

    /// Author record for a message composed by this session.
    pub fn author(&self) -> Author {
        Author {
            id: self.id.clone(),
            username: Some(self.display_name().to_string()),
            full_name: self.full_name.clone(),
            image_url: self.image_url.clone(),
        }
    }
}
