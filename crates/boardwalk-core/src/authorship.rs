//! Decides whether a transcript entry was written by the local session.
//!
//! The default policy compares display names with exact string equality. Two
//! participants sharing a name are indistinguishable under it, and a rename
//! between send and render flips attribution. `StableId` compares the stable
//! ids the relay stamps on each record instead.

use serde::{Deserialize, Serialize};

use crate::identity::SessionIdentity;
use crate::message::Message;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorshipPolicy {
    #[default]
    DisplayName,
    StableId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attribution {
    Mine,
    Other,
}

impl Attribution {
    pub fn is_mine(self) -> bool {
        matches!(self, Attribution::Mine)
    }
}

/// Display-name authorship check. Always `false` without a session.
pub fn is_mine(message: &Message, session: Option<&SessionIdentity>) -> bool {
    resolve(AuthorshipPolicy::DisplayName, message, session).is_mine()
}

pub fn resolve(
    policy: AuthorshipPolicy,
    message: &Message,
    session: Option<&SessionIdentity>,
) -> Attribution {
    let Some(session) = session else {
        return Attribution::Other;
    };

    let mine = match policy {
        AuthorshipPolicy::DisplayName => {
            match (message.author.display_name(), session.comparison_name()) {
                (Some(author), Some(own)) => author == own,
                _ => false,
            }
        }
        AuthorshipPolicy::StableId => {
            !session.id.is_empty() && message.author.id == session.id
        }
    };

    if mine {
        Attribution::Mine
    } else {
        Attribution::Other
    }
}
