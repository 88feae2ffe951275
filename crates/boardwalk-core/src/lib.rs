//! Shared primitives for Boardwalk chat clients and the pier relay. Keeps the
//! wire records, session identity and authorship rules in one place so the
//! client and the relay never drift apart. No I/O lives here.

pub mod authorship;
pub mod frame;
pub mod identity;
pub mod message;

pub use authorship::{is_mine, resolve, Attribution, AuthorshipPolicy};
pub use frame::{new_client_msg_id, now_timestamp, FrameUser, Notice, OutboundFrame};
pub use identity::SessionIdentity;
pub use message::{parse_snapshot, Author, Message, PayloadError, ANONYMOUS};
