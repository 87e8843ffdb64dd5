use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;

use crate::error::{ReportError, Result};
use crate::grammar::{self, Attribute};
use crate::transport::{CancelToken, Transport};

/// Attributes requested per message: everything but the body.
pub const FETCH_ATTRIBUTES: &str = "(FLAGS INTERNALDATE RFC822.SIZE)";

const INTERNALDATE_FORMAT: &str = "%d-%b-%Y %H:%M:%S %z";

/// Placeholder for an INTERNALDATE the server sent but we could not read.
pub fn unknown_date() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(1980, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or_default()
}

/// Parse an IMAP INTERNALDATE (`17-Jul-1996 02:44:25 -0700`).
pub fn parse_internal_date(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_str(raw.trim(), INTERNALDATE_FORMAT)
        .ok()
        .map(|date| date.with_timezone(&Utc))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageRecord {
    pub id: u32,
    pub size: u64,
    pub date: DateTime<Utc>,
    pub flags: BTreeSet<String>,
    pub folder: String,
}

impl MessageRecord {
    /// Build a record from one `* <id> FETCH (...)` line.
    pub fn from_fetch_line(line: &str, folder: &str) -> Result<Self> {
        let fetch = grammar::parse_fetch_line(line)?;
        if fetch.id == 0 {
            return Err(ReportError::malformed("FETCH message id", "0"));
        }
        let raw_size = grammar::scan_attribute(fetch.attributes, Attribute::Size)?;
        let size = grammar::parse_number("RFC822.SIZE", raw_size)?;
        let raw_date = grammar::scan_attribute(fetch.attributes, Attribute::Date)?;
        let raw_flags = grammar::scan_attribute(fetch.attributes, Attribute::Flags)?;
        let flags = grammar::split_flags(raw_flags);

        let date = match parse_internal_date(raw_date) {
            Some(date) => date,
            None => {
                log::debug!(
                    "{folder}: unreadable INTERNALDATE {raw_date:?} on message {}",
                    fetch.id
                );
                unknown_date()
            }
        };

        Ok(MessageRecord {
            id: fetch.id,
            size,
            date,
            flags,
            folder: folder.to_string(),
        })
    }

    pub fn is_seen(&self) -> bool {
        self.flags.iter().any(|f| f.eq_ignore_ascii_case("\\Seen"))
    }

    pub fn has_known_date(&self) -> bool {
        self.date != unknown_date()
    }
}

/// Contiguous span of message ids covering a whole folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdRange {
    pub min: u32,
    pub max: u32,
}

impl IdRange {
    pub fn spanning(ids: &[u32]) -> Option<IdRange> {
        let min = *ids.iter().min()?;
        let max = *ids.iter().max()?;
        Some(IdRange { min, max })
    }
}

impl fmt::Display for IdRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.min, self.max)
    }
}

/// Running counters for one folder's fetch pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FolderTally {
    pub fetched: u32,
    pub unread: u32,
    pub size: u64,
    pub messages: Vec<MessageRecord>,
}

impl FolderTally {
    pub fn add(&mut self, record: MessageRecord, keep: bool) {
        self.fetched += 1;
        if !record.is_seen() {
            self.unread += 1;
        }
        self.size = self.size.saturating_add(record.size);
        if keep {
            self.messages.push(record);
        }
    }
}

/// Fetch `range` from the open folder and fold every reply line into a
/// tally.
///
/// Lines are taken in arrival order; duplicates are counted twice. The first
/// bad line aborts the pass and the partial tally is dropped.
pub fn fetch_range<T: Transport + ?Sized>(
    transport: &mut T,
    folder: &str,
    range: IdRange,
    cancel: &CancelToken,
    keep_messages: bool,
) -> Result<FolderTally> {
    let mut tally = FolderTally::default();
    let command = format!("FETCH {range} {FETCH_ATTRIBUTES}");
    log::debug!("{folder}: {command}");
    transport.execute(&command, false, &mut |line| {
        cancel.check()?;
        if grammar::is_unsolicited(line) {
            log::debug!("{folder}: ignoring {line:?} during FETCH");
            return Ok(());
        }
        let record = MessageRecord::from_fetch_line(line, folder)?;
        tally.add(record, keep_messages);
        Ok(())
    })?;
    Ok(tally)
}
