use boardwalk_core::SessionIdentity;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tracing::info;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentityError {
    #[error("session identity already resolved as {0}")]
    AlreadyResolved(String),
}

/// Session identity as supplied by the external sign-in flow. Absent at
/// start, resolved at most once.
#[derive(Clone)]
pub struct IdentityCell {
    inner: Arc<watch::Sender<Option<SessionIdentity>>>,
}

impl IdentityCell {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { inner: Arc::new(tx) }
    }

    pub fn signed_in(identity: SessionIdentity) -> Self {
        let (tx, _) = watch::channel(Some(identity));
        Self { inner: Arc::new(tx) }
    }

    pub fn current(&self) -> Option<SessionIdentity> {
        self.inner.borrow().clone()
    }

    pub fn is_resolved(&self) -> bool {
        self.inner.borrow().is_some()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<SessionIdentity>> {
        self.inner.subscribe()
    }

    pub fn resolve(&self, identity: SessionIdentity) -> Result<(), IdentityError> {
        let mut existing = None;
        self.inner.send_if_modified(|slot| match slot {
            Some(current) => {
                existing = Some(current.id.clone());
                false
            }
            None => {
                info!(
                    target: "boardwalk::identity",
                    id = %identity.id,
                    name = identity.display_name(),
                    "session identity resolved"
                );
                *slot = Some(identity);
                true
            }
        });
        match existing {
            Some(id) => Err(IdentityError::AlreadyResolved(id)),
            None => Ok(()),
        }
    }
}

impl Default for IdentityCell {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_once_and_notifies() {
        let cell = IdentityCell::new();
        let mut rx = cell.subscribe();
        assert!(cell.current().is_none());

        cell.resolve(SessionIdentity::new("u1").with_username("alice"))
            .expect("first resolve");
        rx.changed().await.expect("watch open");
        assert_eq!(
            rx.borrow().as_ref().map(|i| i.display_name().to_string()),
            Some("alice".to_string())
        );

        assert_eq!(
            cell.resolve(SessionIdentity::new("u2")),
            Err(IdentityError::AlreadyResolved("u1".into()))
        );
        assert_eq!(cell.current().map(|i| i.id), Some("u1".to_string()));
    }
}
