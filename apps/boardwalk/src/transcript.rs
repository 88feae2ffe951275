//! Transcript store: the ordered log of messages and the only place that
//! reconciles snapshot loads, push frames and local echoes.
//!
//! Ordering is insertion order. Timestamps are carried but never used to sort.

use boardwalk_core::{Message, PayloadError};
use clap::ValueEnum;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::snapshot::FetchError;

/// Default window in which an unconfirmed echo may be matched by content.
pub const DEFAULT_ECHO_WINDOW: Duration = Duration::from_secs(10);

/// How push frames are interpreted. Fixed for the lifetime of a store.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum SyncStrategy {
    /// Every frame is a complete message record appended to the log.
    #[default]
    DirectAppend,
    /// Every frame is a bare change signal that triggers a snapshot refetch.
    RefetchOnNotify,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub message: Message,
    /// Optimistic echo not yet confirmed by the relay.
    pub pending: bool,
}

/// Immutable view handed to readers.
#[derive(Debug, Clone, Default)]
pub struct TranscriptSnapshot {
    pub revision: u64,
    pub entries: Arc<Vec<Entry>>,
}

impl TranscriptSnapshot {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.entries.iter().map(|entry| &entry.message)
    }
}

#[derive(Debug)]
pub enum FrameOutcome {
    Appended,
    /// A pending echo at this index was replaced by its confirmation.
    Confirmed(usize),
    Dropped(PayloadError),
    RefetchRequested,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SnapshotTicket(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotOutcome {
    Applied { len: usize, follow_up: bool },
    Failed { follow_up: bool },
    Stale,
}

impl SnapshotOutcome {
    /// A coalesced request arrived while this fetch was in flight.
    pub fn follow_up(&self) -> bool {
        match self {
            SnapshotOutcome::Applied { follow_up, .. } | SnapshotOutcome::Failed { follow_up } => {
                *follow_up
            }
            SnapshotOutcome::Stale => false,
        }
    }
}

#[derive(Debug)]
struct Slot {
    entry: Entry,
    echoed_at: Option<Instant>,
}

pub struct TranscriptStore {
    strategy: SyncStrategy,
    echo_window: Duration,
    slots: Vec<Slot>,
    revision: u64,
    next_ticket: u64,
    in_flight: Option<SnapshotTicket>,
    follow_up: bool,
    /// Confirmed messages pushed while the in-flight snapshot was outstanding.
    live_since_request: Vec<Message>,
}

impl TranscriptStore {
    pub fn new(strategy: SyncStrategy) -> Self {
        Self {
            strategy,
            echo_window: DEFAULT_ECHO_WINDOW,
            slots: Vec::new(),
            revision: 0,
            next_ticket: 1,
            in_flight: None,
            follow_up: false,
            live_since_request: Vec::new(),
        }
    }

    pub fn with_echo_window(mut self, window: Duration) -> Self {
        self.echo_window = window;
        self
    }

    pub fn strategy(&self) -> SyncStrategy {
        self.strategy
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn entries(&self) -> impl Iterator<Item = &Entry> {
        self.slots.iter().map(|slot| &slot.entry)
    }

    pub fn snapshot(&self) -> TranscriptSnapshot {
        TranscriptSnapshot {
            revision: self.revision,
            entries: Arc::new(self.entries().cloned().collect()),
        }
    }

    /// Interpret one inbound push frame according to the store's strategy.
    pub fn apply_frame(&mut self, frame: &str) -> FrameOutcome {
        match self.strategy {
            SyncStrategy::RefetchOnNotify => FrameOutcome::RefetchRequested,
            SyncStrategy::DirectAppend => match Message::from_frame(frame) {
                Ok(message) => self.apply_confirmed(message),
                Err(err) => {
                    warn!(
                        target: "boardwalk::transcript",
                        error = %err,
                        bytes = frame.len(),
                        "dropping malformed push frame"
                    );
                    FrameOutcome::Dropped(err)
                }
            },
        }
    }

    /// Append a message the relay has acknowledged, collapsing a matching
    /// pending echo in place instead of adding a second entry.
    pub fn apply_confirmed(&mut self, message: Message) -> FrameOutcome {
        if self.in_flight.is_some() {
            self.live_since_request.push(message.clone());
        }

        let outcome = match self.matching_echo(&message) {
            Some(index) => {
                let slot = &mut self.slots[index];
                slot.entry = Entry {
                    message,
                    pending: false,
                };
                slot.echoed_at = None;
                debug!(target: "boardwalk::transcript", index, "optimistic echo confirmed");
                FrameOutcome::Confirmed(index)
            }
            None => {
                self.slots.push(Slot {
                    entry: Entry {
                        message,
                        pending: false,
                    },
                    echoed_at: None,
                });
                FrameOutcome::Appended
            }
        };
        self.revision += 1;
        outcome
    }

    /// Reflect a locally composed message before the relay confirms it.
    pub fn append_optimistic(&mut self, message: Message) -> usize {
        self.slots.push(Slot {
            entry: Entry {
                message,
                pending: true,
            },
            echoed_at: Some(Instant::now()),
        });
        self.revision += 1;
        self.slots.len() - 1
    }

    /// Reserve the right to apply the next snapshot. Returns `None` when a
    /// fetch is already outstanding; the request is then folded into a single
    /// follow-up reported by [`SnapshotOutcome::follow_up`].
    pub fn begin_snapshot(&mut self) -> Option<SnapshotTicket> {
        if self.in_flight.is_some() {
            self.follow_up = true;
            return None;
        }
        let ticket = SnapshotTicket(self.next_ticket);
        self.next_ticket += 1;
        self.in_flight = Some(ticket);
        self.live_since_request.clear();
        Some(ticket)
    }

    /// Apply the result of the fetch identified by `ticket`.
    ///
    /// Failures leave the transcript untouched. Under `RefetchOnNotify` a
    /// success replaces the contents with exactly the snapshot, discarding
    /// unconfirmed echoes. Under `DirectAppend` messages pushed while the
    /// fetch was in flight, and pending echoes, survive when the snapshot
    /// does not already contain them.
    pub fn apply_snapshot(
        &mut self,
        ticket: SnapshotTicket,
        result: Result<Vec<Message>, FetchError>,
    ) -> SnapshotOutcome {
        if self.in_flight != Some(ticket) {
            debug!(target: "boardwalk::transcript", ticket = ticket.0, "discarding stale snapshot");
            return SnapshotOutcome::Stale;
        }
        self.in_flight = None;
        let follow_up = std::mem::take(&mut self.follow_up);
        let live = std::mem::take(&mut self.live_since_request);

        let snapshot = match result {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(
                    target: "boardwalk::transcript",
                    error = %err,
                    retained = self.slots.len(),
                    "snapshot refresh failed; keeping current transcript"
                );
                return SnapshotOutcome::Failed { follow_up };
            }
        };

        let mut slots: Vec<Slot> = snapshot
            .into_iter()
            .map(|message| Slot {
                entry: Entry {
                    message,
                    pending: false,
                },
                echoed_at: None,
            })
            .collect();
        let snapshot_len = slots.len();

        if self.strategy == SyncStrategy::DirectAppend {
            let mut claimed = vec![false; snapshot_len];

            let live: Vec<Message> = live
                .into_iter()
                .filter(|message| !claim_token(&slots[..snapshot_len], &mut claimed, message))
                .collect();
            let overlap = trailing_overlap(&slots[..snapshot_len], &mut claimed, &live);
            for message in live.into_iter().skip(overlap) {
                slots.push(Slot {
                    entry: Entry {
                        message,
                        pending: false,
                    },
                    echoed_at: None,
                });
            }

            let carried: Vec<Slot> = std::mem::take(&mut self.slots)
                .into_iter()
                .filter(|slot| slot.entry.pending)
                .collect();
            for slot in carried {
                if !claim(&slots[..snapshot_len], &mut claimed, &slot.entry.message) {
                    slots.push(slot);
                }
            }
        }

        self.slots = slots;
        self.revision += 1;
        info!(
            target: "boardwalk::transcript",
            snapshot = snapshot_len,
            total = self.slots.len(),
            "snapshot applied"
        );
        SnapshotOutcome::Applied {
            len: self.slots.len(),
            follow_up,
        }
    }

    fn matching_echo(&self, confirmed: &Message) -> Option<usize> {
        let pending = || {
            self.slots
                .iter()
                .enumerate()
                .filter(|(_, slot)| slot.entry.pending)
        };

        if let Some(token) = &confirmed.client_msg_id {
            if let Some((index, _)) = pending()
                .find(|(_, slot)| slot.entry.message.client_msg_id.as_ref() == Some(token))
            {
                return Some(index);
            }
        }

        let now = Instant::now();
        pending()
            .find(|(_, slot)| {
                let pending = &slot.entry.message;
                let within_window = slot
                    .echoed_at
                    .is_some_and(|at| now.duration_since(at) <= self.echo_window);
                let token_conflict = matches!(
                    (&pending.client_msg_id, &confirmed.client_msg_id),
                    (Some(a), Some(b)) if a != b
                );
                within_window
                    && !token_conflict
                    && pending.author.id == confirmed.author.id
                    && pending.body == confirmed.body
            })
            .map(|(index, _)| index)
    }
}

/// Claims the unclaimed snapshot slot carrying the same token as `message`.
fn claim_token(snapshot: &[Slot], claimed: &mut [bool], message: &Message) -> bool {
    let Some(token) = &message.client_msg_id else {
        return false;
    };
    let found = snapshot.iter().enumerate().find(|(index, slot)| {
        !claimed[*index] && slot.entry.message.client_msg_id.as_ref() == Some(token)
    });
    match found {
        Some((index, _)) => {
            claimed[index] = true;
            true
        }
        None => false,
    }
}

/// Length of the longest run at the tail of the unclaimed snapshot that
/// equals the head of `live`. Pushes are the newest writes, so they may only
/// overlap the end of the log; an older identical entry never absorbs one.
/// The overlapping slots are marked claimed.
fn trailing_overlap(snapshot: &[Slot], claimed: &mut [bool], live: &[Message]) -> usize {
    let open: Vec<usize> = (0..snapshot.len()).filter(|index| !claimed[*index]).collect();
    let longest = open.len().min(live.len());
    let overlap = (1..=longest)
        .rev()
        .find(|&k| {
            open[open.len() - k..]
                .iter()
                .zip(live)
                .all(|(&index, message)| snapshot[index].entry.message.same_logical(message))
        })
        .unwrap_or(0);
    for &index in &open[open.len() - overlap..] {
        claimed[index] = true;
    }
    overlap
}

/// Marks the first unclaimed snapshot slot holding `message` as claimed.
fn claim(snapshot: &[Slot], claimed: &mut [bool], message: &Message) -> bool {
    for (index, slot) in snapshot.iter().enumerate() {
        if !claimed[index] && slot.entry.message.same_logical(message) {
            claimed[index] = true;
            return true;
        }
    }
    false
}
