use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;

use crate::classify::{classify, Classification, FlagSets};
use crate::error::{ReportError, Result};
use crate::fetch::{self, FolderTally, IdRange, MessageRecord};
use crate::grammar;
use crate::mutf7;
use crate::transport::{CancelToken, Transport};

/// One folder as reported by LIST.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderDescriptor {
    pub name: String,
    pub separator: Option<String>,
    pub flags: BTreeSet<String>,
}

impl FolderDescriptor {
    pub fn from_list_line(line: &str) -> Result<Self> {
        let parsed = grammar::parse_list_line(line)?;
        Ok(FolderDescriptor {
            name: parsed.name,
            separator: parsed.separator,
            flags: parsed.flags,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Outcome {
    Done,
    Skipped { flags: BTreeSet<String> },
    Failed { reason: String },
}

/// Statistics for one folder.
///
/// `messages` is the EXISTS count and is authoritative. `unread` and `size`
/// only cover the `fetched` messages, which can fall short of `messages` when
/// the folder changed between EXAMINE and FETCH.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FolderStats {
    pub name: String,
    pub raw_name: String,
    pub messages: u32,
    pub fetched: u32,
    pub unread: u32,
    pub size: u64,
    /// Share of the account quota. Not computed; always zero.
    pub quota: f64,
    pub outcome: Outcome,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub contents: Vec<MessageRecord>,
}

impl FolderStats {
    fn empty(name: String, raw_name: &str, outcome: Outcome) -> Self {
        FolderStats {
            name,
            raw_name: raw_name.to_string(),
            messages: 0,
            fetched: 0,
            unread: 0,
            size: 0,
            quota: 0.0,
            outcome,
            contents: Vec::new(),
        }
    }

    /// Zero-contribution entry for a folder whose pass was aborted.
    pub fn failed(folder: &FolderDescriptor, err: &ReportError) -> Self {
        let name = mutf7::decode_folder_name(&folder.name).unwrap_or_else(|_| folder.name.clone());
        Self::empty(
            name,
            &folder.name,
            Outcome::Failed {
                reason: err.to_string(),
            },
        )
    }

    pub fn contributes(&self) -> bool {
        self.outcome == Outcome::Done && self.messages > 0
    }
}

/// Where a folder's pass got to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Start,
    Classified,
    Skipped,
    Opened,
    RangeSearched,
    Fetched,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Start => "start",
            Stage::Classified => "classified",
            Stage::Skipped => "skipped",
            Stage::Opened => "opened",
            Stage::RangeSearched => "range searched",
            Stage::Fetched => "fetched",
            Stage::Done => "done",
        };
        f.write_str(name)
    }
}

/// Quote a folder name for use in a command.
pub fn imap_quote(s: &str) -> String {
    let clean: String = s.chars().filter(|c| !c.is_control()).collect();
    let escaped = clean.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

/// Computes [`FolderStats`] one folder at a time over a single session.
///
/// The session has at most one open folder; `open_folder` tracks which.
/// Opening a folder replaces the previous one, so SEARCH and FETCH are only
/// issued while the folder being processed is the open one.
pub struct Aggregator<'a, T: Transport + ?Sized> {
    transport: &'a mut T,
    flag_sets: &'a FlagSets,
    cancel: CancelToken,
    keep_messages: bool,
    open_folder: Option<String>,
    stage: Stage,
}

impl<'a, T: Transport + ?Sized> Aggregator<'a, T> {
    pub fn new(transport: &'a mut T, cancel: CancelToken) -> Self {
        Aggregator {
            transport,
            flag_sets: &FlagSets::STANDARD,
            cancel,
            keep_messages: false,
            open_folder: None,
            stage: Stage::Start,
        }
    }

    pub fn with_flag_sets(mut self, flag_sets: &'a FlagSets) -> Self {
        self.flag_sets = flag_sets;
        self
    }

    /// Retain every fetched [`MessageRecord`] in [`FolderStats::contents`].
    pub fn keep_messages(mut self, keep: bool) -> Self {
        self.keep_messages = keep;
        self
    }

    pub fn open_folder(&self) -> Option<&str> {
        self.open_folder.as_deref()
    }

    /// Stage reached by the most recent [`Aggregator::folder_stats`] call.
    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn folder_stats(&mut self, folder: &FolderDescriptor) -> Result<FolderStats> {
        self.stage = Stage::Start;
        self.cancel.check()?;

        let classification = classify(&folder.flags, self.flag_sets);
        self.stage = Stage::Classified;
        match classification {
            Classification::Skip { special } => {
                log::info!("{}: not processed, flags {special:?}", folder.name);
                self.stage = Stage::Skipped;
                let name = mutf7::decode_folder_name(&folder.name)
                    .unwrap_or_else(|_| folder.name.clone());
                let outcome = Outcome::Skipped { flags: special };
                return Ok(FolderStats::empty(name, &folder.name, outcome));
            }
            Classification::ProcessWithWarning { unknown } => {
                log::warn!("{}: unknown flag(s) {unknown:?}", folder.name);
            }
            Classification::ProcessKnown => {}
        }

        let name = mutf7::decode_folder_name(&folder.name)?;
        let mut stats = FolderStats::empty(name, &folder.name, Outcome::Done);

        stats.messages = self.examine(&folder.name)?;
        self.stage = Stage::Opened;
        if stats.messages == 0 {
            self.stage = Stage::Done;
            return Ok(stats);
        }

        let range = self.search_range(&folder.name, stats.messages)?;
        self.stage = Stage::RangeSearched;

        let tally = self.fetch(&folder.name, &stats.name, range)?;
        self.stage = Stage::Fetched;

        let FolderTally {
            fetched,
            unread,
            size,
            messages,
        } = tally;
        if fetched != stats.messages {
            log::info!(
                "{}: fetched {fetched} of {} message(s); unread and size cover the fetched ones",
                stats.name,
                stats.messages
            );
        }
        stats.fetched = fetched;
        stats.unread = unread;
        stats.size = size;
        stats.contents = messages;
        self.stage = Stage::Done;
        Ok(stats)
    }

    /// Open `raw_name` read-only and return its EXISTS count.
    fn examine(&mut self, raw_name: &str) -> Result<u32> {
        self.open_folder = None;
        let command = format!("EXAMINE {}", imap_quote(raw_name));
        let cancel = &self.cancel;
        let mut exists = None;
        self.transport
            .execute(&command, false, &mut |line| {
                cancel.check()?;
                if let Some(count) = grammar::parse_exists_line(line)? {
                    exists = Some(count);
                }
                Ok(())
            })
            .map_err(|err| with_command(err, &command))?;

        let count = exists.ok_or_else(|| {
            ReportError::inconsistency(format!("EXAMINE {raw_name} returned no EXISTS count"))
        })?;
        self.open_folder = Some(raw_name.to_string());
        Ok(count)
    }

    fn ensure_open(&self, raw_name: &str) -> Result<()> {
        match self.open_folder.as_deref() {
            Some(open) if open == raw_name => Ok(()),
            other => Err(ReportError::inconsistency(format!(
                "{raw_name} is not the open folder (open: {other:?})"
            ))),
        }
    }

    fn search_range(&mut self, raw_name: &str, exists: u32) -> Result<IdRange> {
        self.ensure_open(raw_name)?;
        let cancel = &self.cancel;
        let mut ids = Vec::new();
        self.transport
            .execute("SEARCH ALL", false, &mut |line| {
                cancel.check()?;
                if grammar::is_search_line(line) {
                    ids.extend(grammar::parse_search_line(line)?);
                    Ok(())
                } else if grammar::is_unsolicited(line) {
                    Ok(())
                } else {
                    Err(ReportError::malformed(grammar::ReplyKind::Search.label(), line))
                }
            })
            .map_err(|err| with_command(err, "SEARCH ALL"))?;

        IdRange::spanning(&ids).ok_or_else(|| {
            ReportError::inconsistency(format!(
                "{raw_name} reported {exists} message(s) but SEARCH ALL returned none"
            ))
        })
    }

    fn fetch(&mut self, raw_name: &str, display_name: &str, range: IdRange) -> Result<FolderTally> {
        self.ensure_open(raw_name)?;
        fetch::fetch_range(
            &mut *self.transport,
            display_name,
            range,
            &self.cancel,
            self.keep_messages,
        )
    }
}

fn with_command(err: ReportError, command: &str) -> ReportError {
    match err {
        ReportError::CommandRejected { command: c, reason } if c.is_empty() => {
            ReportError::CommandRejected {
                command: command.to_string(),
                reason,
            }
        }
        other => other,
    }
}
