use boardwalk_core::{now_timestamp, Author, Message, OutboundFrame};
use parking_lot::RwLock;
use std::collections::HashMap;

#[derive(Debug, Clone)]
struct StoredRecord {
    author_id: String,
    body: String,
    created_at: String,
    client_msg_id: Option<String>,
}

/// In-memory message log plus the user registry it joins against.
#[derive(Default)]
pub struct MessageLog {
    users: RwLock<HashMap<String, Author>>,
    records: RwLock<Vec<StoredRecord>>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store one accepted frame and return the record to broadcast.
    ///
    /// The author is registered the first time its id is seen; later frames
    /// with a different name for the same id do not update the registry.
    pub fn append(&self, frame: OutboundFrame) -> Message {
        let author = Author {
            id: frame.user.id,
            username: Some(frame.user.username).filter(|name| !name.is_empty()),
            full_name: None,
            image_url: frame.user.image_url.filter(|url| !url.is_empty()),
        };

        self.users
            .write()
            .entry(author.id.clone())
            .or_insert_with(|| author.clone());

        let created_at = now_timestamp();
        self.records.write().push(StoredRecord {
            author_id: author.id.clone(),
            body: frame.message.clone(),
            created_at: created_at.clone(),
            client_msg_id: frame.client_msg_id.clone(),
        });

        Message {
            author,
            body: frame.message,
            created_at: Some(created_at),
            client_msg_id: frame.client_msg_id,
        }
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Every stored record in insertion order, authors joined from the
    /// registry. `None` when nothing has been stored, which the snapshot
    /// endpoint serializes as `null`.
    pub fn snapshot(&self) -> Option<Vec<Message>> {
        let records = self.records.read();
        if records.is_empty() {
            return None;
        }
        let users = self.users.read();
        let messages = records
            .iter()
            .map(|record| Message {
                author: users
                    .get(&record.author_id)
                    .cloned()
                    .unwrap_or_else(|| Author::new(record.author_id.clone())),
                body: record.body.clone(),
                created_at: Some(record.created_at.clone()),
                client_msg_id: record.client_msg_id.clone(),
            })
            .collect();
        Some(messages)
    }
}
