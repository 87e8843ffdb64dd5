use std::collections::BTreeSet;

/// Folder flags the report knows how to treat.
#[derive(Debug, Clone, Copy)]
pub struct FlagSets {
    /// Folders carrying any of these are virtual or not selectable.
    pub special: &'static [&'static str],
    /// Role and hierarchy flags that need no attention. The special flags
    /// are known too.
    pub known: &'static [&'static str],
}

impl FlagSets {
    pub const STANDARD: FlagSets = FlagSets {
        special: &["\\Noselect", "\\All", "\\Important"],
        known: &[
            "\\HasNoChildren",
            "\\HasChildren",
            "\\Drafts",
            "\\Sent",
            "\\Junk",
            "\\Trash",
            "\\Flagged",
        ],
    };

    pub fn is_special(&self, flag: &str) -> bool {
        self.special.iter().any(|s| s.eq_ignore_ascii_case(flag))
    }

    pub fn is_known(&self, flag: &str) -> bool {
        self.is_special(flag) || self.known.iter().any(|k| k.eq_ignore_ascii_case(flag))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// Do not open, search or fetch the folder.
    Skip { special: BTreeSet<String> },
    ProcessKnown,
    /// Process the folder, but report the flags nobody recognised.
    ProcessWithWarning { unknown: BTreeSet<String> },
}

impl Classification {
    pub fn is_skip(&self) -> bool {
        matches!(self, Classification::Skip { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            Classification::Skip { .. } => "skip",
            Classification::ProcessKnown => "process",
            Classification::ProcessWithWarning { .. } => "process (unknown flags)",
        }
    }
}

pub fn classify(flags: &BTreeSet<String>, sets: &FlagSets) -> Classification {
    let special: BTreeSet<String> = flags
        .iter()
        .filter(|f| sets.is_special(f))
        .cloned()
        .collect();
    if !special.is_empty() {
        return Classification::Skip { special };
    }

    let unknown: BTreeSet<String> = flags
        .iter()
        .filter(|f| !sets.is_known(f))
        .cloned()
        .collect();
    if unknown.is_empty() {
        Classification::ProcessKnown
    } else {
        Classification::ProcessWithWarning { unknown }
    }
}
