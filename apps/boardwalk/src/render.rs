use boardwalk_core::{ANONYMOUS, Attribution, AuthorshipPolicy, SessionIdentity, resolve};
use std::fmt;
use std::io::{self, Write};

use crate::transcript::Entry;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedLine {
    pub attribution: Attribution,
    pub author: String,
    pub body: String,
    pub pending: bool,
    pub created_at: Option<String>,
}

impl fmt::Display for RenderedLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let marker = if self.attribution.is_mine() { '>' } else { ' ' };
        write!(f, "{marker} ")?;
        if let Some(created_at) = &self.created_at {
            write!(f, "[{created_at}] ")?;
        }
        write!(f, "{}: {}", self.author, self.body)?;
        if self.pending {
            write!(f, " (sending)")?;
        }
        Ok(())
    }
}

/// Attribute every entry against the live identity.
pub fn render(
    entries: &[Entry],
    session: Option<&SessionIdentity>,
    policy: AuthorshipPolicy,
) -> Vec<RenderedLine> {
    entries
        .iter()
        .map(|entry| {
            let message = &entry.message;
            RenderedLine {
                attribution: resolve(policy, message, session),
                author: message.author.display_name().unwrap_or(ANONYMOUS).to_string(),
                body: message.body.clone(),
                pending: entry.pending,
                created_at: message.created_at.clone(),
            }
        })
        .collect()
}

/// Turns successive renders into terminal output: new trailing lines are
/// appended, any change to an earlier line reprints the whole transcript.
#[derive(Debug, Default)]
pub struct TranscriptPrinter {
    shown: Vec<RenderedLine>,
}

impl TranscriptPrinter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update<W: Write>(&mut self, lines: Vec<RenderedLine>, out: &mut W) -> io::Result<()> {
        let prefix_intact =
            lines.len() >= self.shown.len() && lines[..self.shown.len()] == self.shown[..];

        if prefix_intact {
            for line in &lines[self.shown.len()..] {
                writeln!(out, "{line}")?;
            }
        } else {
            writeln!(out, "--- transcript ({} messages) ---", lines.len())?;
            for line in &lines {
                writeln!(out, "{line}")?;
            }
        }
        out.flush()?;
        self.shown = lines;
        Ok(())
    }
}
