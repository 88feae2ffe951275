use boardwalk_core::{Message, OutboundFrame, SessionIdentity, new_client_msg_id};
use clap::ValueEnum;
use thiserror::Error;
use tracing::{debug, warn};

use crate::channel::{ChannelError, PushChannel};

/// Whether a sent message is reflected locally before the relay echoes it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum EchoPolicy {
    /// Wait for the relay's broadcast.
    #[default]
    ServerEcho,
    /// Reflect immediately as a pending entry; the echo confirms it.
    Optimistic,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SubmitError {
    #[error("message is empty")]
    EmptyInput,
    #[error("sign in before sending")]
    Unauthenticated,
    #[error("not connected to the relay")]
    ChannelNotOpen,
    #[error("sync engine stopped")]
    Stopped,
}

impl From<ChannelError> for SubmitError {
    fn from(_: ChannelError) -> Self {
        SubmitError::ChannelNotOpen
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub client_msg_id: String,
    /// Local reflection to append as pending, under [`EchoPolicy::Optimistic`].
    pub echo: Option<Message>,
}

/// Owns the draft and turns it into outbound frames.
#[derive(Debug, Default)]
pub struct Composer {
    echo: EchoPolicy,
    draft: String,
}

impl Composer {
    pub fn new(echo: EchoPolicy) -> Self {
        Self {
            echo,
            draft: String::new(),
        }
    }

    pub fn echo_policy(&self) -> EchoPolicy {
        self.echo
    }

    pub fn draft(&self) -> &str {
        &self.draft
    }

    pub fn set_draft(&mut self, text: impl Into<String>) {
        self.draft = text.into();
    }

    /// Submit the current draft.
    pub fn submit_draft(
        &mut self,
        identity: Option<&SessionIdentity>,
        channel: &dyn PushChannel,
    ) -> Result<Submission, SubmitError> {
        let raw = self.draft.clone();
        self.submit(&raw, identity, channel)
    }

    /// Validate and send `raw`. Preconditions are checked in order (empty
    /// input, identity, channel) and none of them touches the channel or the
    /// draft on failure. The body is sent untrimmed.
    pub fn submit(
        &mut self,
        raw: &str,
        identity: Option<&SessionIdentity>,
        channel: &dyn PushChannel,
    ) -> Result<Submission, SubmitError> {
        if raw.trim().is_empty() {
            return Err(SubmitError::EmptyInput);
        }
        let identity = identity.ok_or(SubmitError::Unauthenticated)?;

        let client_msg_id = new_client_msg_id();
        let frame = OutboundFrame::compose(identity, raw).with_client_msg_id(client_msg_id.clone());
        let payload = match serde_json::to_string(&frame) {
            Ok(payload) => payload,
            Err(err) => {
                // Serializing plain strings cannot fail; treat it as a lost send.
                warn!(target: "boardwalk::compose", error = %err, "failed to encode outbound frame");
                return Err(SubmitError::ChannelNotOpen);
            }
        };

        channel.send(payload)?;
        self.draft.clear();
        debug!(
            target: "boardwalk::compose",
            channel = channel.id(),
            client_msg_id = %client_msg_id,
            "message sent"
        );

        let echo = match self.echo {
            EchoPolicy::ServerEcho => None,
            EchoPolicy::Optimistic => Some(
                Message::new(identity.author(), raw).with_client_msg_id(client_msg_id.clone()),
            ),
        };
        Ok(Submission {
            client_msg_id,
            echo,
        })
    }
}
