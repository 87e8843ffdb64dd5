//! Reply-line grammars for the handful of IMAP responses the report reads.
//!
//! Each reply family is one row of [`GRAMMARS`]: a pattern and the number of
//! fields it yields. The typed `parse_*` helpers sit on top of that table and
//! turn the captured substrings into values, failing with
//! [`ReportError::MalformedReply`] whenever a line or a number does not fit.

use std::collections::BTreeSet;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::{Captures, Regex};

use crate::error::{ReportError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    List,
    Quota,
    Exists,
    Search,
    Fetch,
}

impl ReplyKind {
    fn index(self) -> usize {
        match self {
            ReplyKind::List => 0,
            ReplyKind::Quota => 1,
            ReplyKind::Exists => 2,
            ReplyKind::Search => 3,
            ReplyKind::Fetch => 4,
        }
    }

    pub fn label(self) -> &'static str {
        GRAMMARS[self.index()].label
    }
}

struct Grammar {
    kind: ReplyKind,
    label: &'static str,
    pattern: &'static str,
    arity: usize,
}

const GRAMMARS: [Grammar; 5] = [
    // * LIST (\HasNoChildren) "/" "INBOX"
    Grammar {
        kind: ReplyKind::List,
        label: "LIST reply",
        pattern: r#"(?i)^\* LIST \(([^)]*)\) (?:"((?:[^"\\]|\\.)*)"|NIL) (?:"((?:[^"\\]|\\.)*)"|([^\s"(){}]+))$"#,
        arity: 4,
    },
    // * QUOTA "" (STORAGE 10 512)
    Grammar {
        kind: ReplyKind::Quota,
        label: "QUOTA reply",
        pattern: r#"(?i)^\* QUOTA (.+?) \(STORAGE (\d+) (\d+)(?: [^)]*)?\)$"#,
        arity: 3,
    },
    // * 172 EXISTS
    Grammar {
        kind: ReplyKind::Exists,
        label: "EXISTS reply",
        pattern: r"(?i)^\* (\d+) EXISTS$",
        arity: 1,
    },
    // * SEARCH 2 84 882
    Grammar {
        kind: ReplyKind::Search,
        label: "SEARCH reply",
        pattern: r"(?i)^\* SEARCH((?: +[^ ]+)*) *$",
        arity: 1,
    },
    // * 12 FETCH (FLAGS (\Seen) INTERNALDATE "..." RFC822.SIZE 44827)
    Grammar {
        kind: ReplyKind::Fetch,
        label: "FETCH reply",
        pattern: r"(?i)^\* (\d+) FETCH \((.*)\)$",
        arity: 2,
    },
];

fn compiled() -> &'static [Regex] {
    static RE: OnceLock<Vec<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        GRAMMARS
            .iter()
            .map(|g| Regex::new(g.pattern).unwrap())
            .collect()
    })
}

fn unsolicited_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^\* (?:\d+ (?:EXISTS|RECENT|EXPUNGE)|(?:OK|NO|BAD|BYE)\b.*|FLAGS \(.*\))$")
            .unwrap()
    })
}

/// Match `line` against the grammar for `kind`.
///
/// Returns the captured fields (optional groups that did not participate
/// are `None`), or `None` when the line has a different shape.
pub fn capture(kind: ReplyKind, line: &str) -> Option<Vec<Option<&str>>> {
    let grammar = &GRAMMARS[kind.index()];
    debug_assert_eq!(grammar.kind, kind);
    let caps: Captures<'_> = compiled()[kind.index()].captures(line)?;
    Some(
        (1..=grammar.arity)
            .map(|i| caps.get(i).map(|m| m.as_str()))
            .collect(),
    )
}

fn require<'l>(kind: ReplyKind, line: &'l str) -> Result<Vec<Option<&'l str>>> {
    capture(kind, line).ok_or_else(|| ReportError::malformed(kind.label(), line))
}

/// Untagged status lines a server may send in the middle of any response.
pub fn is_unsolicited(line: &str) -> bool {
    unsolicited_regex().is_match(line)
}

/// Parse a decimal number, rejecting signs, blanks and overflow.
pub fn parse_number<T: FromStr>(what: &str, digits: &str) -> Result<T> {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ReportError::malformed(what, digits));
    }
    digits
        .parse::<T>()
        .map_err(|_| ReportError::malformed(what, digits))
}

/// Split a parenthesised flag list into a set of tokens.
pub fn split_flags(flags: &str) -> BTreeSet<String> {
    flags.split_whitespace().map(str::to_string).collect()
}

fn unescape_quoted(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(escaped) = chars.next() {
                out.push(escaped);
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn escape_quoted(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListLine {
    pub flags: BTreeSet<String>,
    pub separator: Option<String>,
    pub name: String,
}

pub fn parse_list_line(line: &str) -> Result<ListLine> {
    let fields = require(ReplyKind::List, line)?;
    let flags = split_flags(fields[0].unwrap_or(""));
    let separator = fields[1].map(unescape_quoted);
    let name = match (fields[2], fields[3]) {
        (Some(quoted), _) => unescape_quoted(quoted),
        (None, Some(atom)) => atom.to_string(),
        (None, None) => return Err(ReportError::malformed(ReplyKind::List.label(), line)),
    };
    Ok(ListLine {
        flags,
        separator,
        name,
    })
}

/// Render a LIST line the way a server would; the inverse of
/// [`parse_list_line`].
pub fn format_list_line(flags: &BTreeSet<String>, separator: Option<&str>, name: &str) -> String {
    let flags = flags.iter().map(String::as_str).collect::<Vec<_>>().join(" ");
    let separator = match separator {
        Some(sep) => format!("\"{}\"", escape_quoted(sep)),
        None => "NIL".to_string(),
    };
    format!("* LIST ({flags}) {separator} \"{}\"", escape_quoted(name))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaLine {
    pub root: String,
    pub used: u64,
    pub limit: u64,
}

pub fn is_quota_line(line: &str) -> bool {
    let upper = line.to_ascii_uppercase();
    upper.starts_with("* QUOTA ") && !upper.starts_with("* QUOTAROOT")
}

/// Whether a QUOTA line's resource list names STORAGE at all.
pub fn quota_lists_storage(line: &str) -> bool {
    let resources = match (line.rfind('('), line.rfind(')')) {
        (Some(open), Some(close)) if open < close => &line[open + 1..close],
        _ => return false,
    };
    resources
        .split_whitespace()
        .any(|token| token.eq_ignore_ascii_case("STORAGE"))
}

pub fn parse_quota_line(line: &str) -> Result<QuotaLine> {
    let fields = require(ReplyKind::Quota, line)?;
    let root = fields[0].unwrap_or("");
    Ok(QuotaLine {
        root: unescape_quoted(root.trim_matches('"')),
        used: parse_number("QUOTA usage", fields[1].unwrap_or(""))?,
        limit: parse_number("QUOTA limit", fields[2].unwrap_or(""))?,
    })
}

/// Extract the message count from an EXAMINE reply line.
///
/// Lines other than `* <n> EXISTS` are not an error: EXAMINE emits several
/// status lines and only the EXISTS one carries the count.
pub fn parse_exists_line(line: &str) -> Result<Option<u32>> {
    match capture(ReplyKind::Exists, line) {
        Some(fields) => parse_number("EXISTS count", fields[0].unwrap_or("")).map(Some),
        None => Ok(None),
    }
}

pub fn is_search_line(line: &str) -> bool {
    capture(ReplyKind::Search, line).is_some()
}

pub fn parse_search_line(line: &str) -> Result<Vec<u32>> {
    let fields = require(ReplyKind::Search, line)?;
    fields[0]
        .unwrap_or("")
        .split_whitespace()
        .map(|id| parse_number("SEARCH id", id))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchLine<'l> {
    pub id: u32,
    pub attributes: &'l str,
}

pub fn parse_fetch_line(line: &str) -> Result<FetchLine<'_>> {
    let fields = require(ReplyKind::Fetch, line)?;
    Ok(FetchLine {
        id: parse_number("FETCH message id", fields[0].unwrap_or(""))?,
        attributes: fields[1].unwrap_or(""),
    })
}

/// Sub-attributes scanned out of a FETCH attribute blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attribute {
    Size,
    Date,
    Flags,
}

impl Attribute {
    pub const ALL: [Attribute; 3] = [Attribute::Size, Attribute::Date, Attribute::Flags];

    pub fn name(self) -> &'static str {
        match self {
            Attribute::Size => "SIZE",
            Attribute::Date => "DATE",
            Attribute::Flags => "FLAGS",
        }
    }

    fn index(self) -> usize {
        match self {
            Attribute::Size => 0,
            Attribute::Date => 1,
            Attribute::Flags => 2,
        }
    }
}

fn attribute_regexes() -> &'static [Regex; 3] {
    static RE: OnceLock<[Regex; 3]> = OnceLock::new();
    RE.get_or_init(|| {
        [
            Regex::new(r"(?i)\bRFC822\.SIZE (\d+)").unwrap(),
            Regex::new(r#"(?i)\bINTERNALDATE "([^"]+)""#).unwrap(),
            Regex::new(r"(?i)(?:^|[ (])FLAGS \(([^)]*)\)").unwrap(),
        ]
    })
}

/// Find one sub-attribute's value in a FETCH attribute blob.
pub fn scan_attribute(blob: &str, attribute: Attribute) -> Result<&str> {
    attribute_regexes()[attribute.index()]
        .captures(blob)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .ok_or_else(|| {
            ReportError::malformed(format!("FETCH reply without {}", attribute.name()), blob)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn flags(tokens: &[&str]) -> BTreeSet<String> {
        tokens.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn grammar_table_is_indexed_by_kind() {
        for kind in [
            ReplyKind::List,
            ReplyKind::Quota,
            ReplyKind::Exists,
            ReplyKind::Search,
            ReplyKind::Fetch,
        ] {
            assert_eq!(GRAMMARS[kind.index()].kind, kind);
        }
    }

    #[test]
    fn list_line_quoted() {
        let line = r#"* LIST (\HasNoChildren \Sent) "/" "Sent Items""#;
        let parsed = parse_list_line(line).unwrap();
        assert_eq!(parsed.flags, flags(&["\\HasNoChildren", "\\Sent"]));
        assert_eq!(parsed.separator.as_deref(), Some("/"));
        assert_eq!(parsed.name, "Sent Items");
    }

    #[test]
    fn list_line_gmail_virtual_folder() {
        let line = r#"* LIST (\All \HasNoChildren) "/" "[Gmail]/All Mail""#;
        let parsed = parse_list_line(line).unwrap();
        assert!(parsed.flags.contains("\\All"));
        assert_eq!(parsed.name, "[Gmail]/All Mail");
    }

    #[test]
    fn list_line_atom_name_and_nil_separator() {
        let parsed = parse_list_line(r"* LIST () NIL INBOX").unwrap();
        assert!(parsed.flags.is_empty());
        assert_eq!(parsed.separator, None);
        assert_eq!(parsed.name, "INBOX");
    }

    #[test]
    fn list_line_unescapes_name() {
        let parsed = parse_list_line(r#"* LIST () "." "say \"hi\"""#).unwrap();
        assert_eq!(parsed.name, "say \"hi\"");
    }

    #[test]
    fn list_line_malformed() {
        let err = parse_list_line(r#"* LIST \HasChildren "/" "INBOX""#).unwrap_err();
        assert!(matches!(err, ReportError::MalformedReply { .. }));
        assert!(parse_list_line("* LSUB () \"/\" INBOX").is_err());
    }

    #[test]
    fn quota_line() {
        let parsed = parse_quota_line(r#"* QUOTA "" (STORAGE 10240 15728640)"#).unwrap();
        assert_eq!(parsed.root, "");
        assert_eq!(parsed.used, 10240);
        assert_eq!(parsed.limit, 15728640);
    }

    #[test]
    fn quota_line_with_extra_resources() {
        let parsed = parse_quota_line("* QUOTA ROOT (STORAGE 5 100 MESSAGE 3 1000)").unwrap();
        assert_eq!(parsed.root, "ROOT");
        assert_eq!((parsed.used, parsed.limit), (5, 100));
    }

    #[test]
    fn quota_line_without_storage_is_malformed() {
        assert!(parse_quota_line("* QUOTA ROOT (MESSAGE 3 1000)").is_err());
    }

    #[test]
    fn storage_resource_detection() {
        assert!(quota_lists_storage(r#"* QUOTA "" (STORAGE 1 2)"#));
        assert!(quota_lists_storage("* QUOTA R (MESSAGE 3 10 storage 1 2)"));
        assert!(!quota_lists_storage("* QUOTA ROOT (MESSAGE 3 1000)"));
        assert!(!quota_lists_storage("* QUOTA ROOT ()"));
    }

    #[test]
    fn quota_line_overflow_is_malformed() {
        let err = parse_quota_line("* QUOTA ROOT (STORAGE 99999999999999999999999 1)").unwrap_err();
        assert_eq!(
            err,
            ReportError::malformed("QUOTA usage", "99999999999999999999999")
        );
    }

    #[test]
    fn quotaroot_line_is_not_a_quota_line() {
        assert!(!is_quota_line(r#"* QUOTAROOT INBOX """#));
        assert!(is_quota_line(r#"* QUOTA "" (STORAGE 1 2)"#));
    }

    #[test]
    fn exists_line() {
        assert_eq!(parse_exists_line("* 172 EXISTS").unwrap(), Some(172));
        assert_eq!(parse_exists_line("* 0 exists").unwrap(), Some(0));
    }

    #[test]
    fn exists_skips_other_examine_lines() {
        for line in [
            r"* FLAGS (\Answered \Flagged \Deleted \Seen \Draft)",
            "* 1 RECENT",
            "* OK [UIDVALIDITY 3857529045] UIDs valid",
            "* OK [PERMANENTFLAGS ()] No permanent flags permitted",
        ] {
            assert_eq!(parse_exists_line(line).unwrap(), None, "{line}");
        }
    }

    #[test]
    fn exists_overflow_is_malformed() {
        assert!(parse_exists_line("* 99999999999 EXISTS").is_err());
    }

    #[test]
    fn search_line() {
        assert_eq!(parse_search_line("* SEARCH 2 84 882").unwrap(), vec![2, 84, 882]);
    }

    #[test]
    fn search_line_empty() {
        assert!(parse_search_line("* SEARCH").unwrap().is_empty());
    }

    #[test]
    fn search_line_bad_token() {
        let err = parse_search_line("* SEARCH 1 2x 3").unwrap_err();
        assert_eq!(err, ReportError::malformed("SEARCH id", "2x"));
        assert!(parse_search_line("* SEARCH 1 -2").is_err());
    }

    #[test]
    fn fetch_line() {
        let line = r#"* 12 FETCH (FLAGS (\Seen) INTERNALDATE "17-Jul-1996 02:44:25 -0700" RFC822.SIZE 4286)"#;
        let parsed = parse_fetch_line(line).unwrap();
        assert_eq!(parsed.id, 12);
        assert_eq!(scan_attribute(parsed.attributes, Attribute::Size).unwrap(), "4286");
        assert_eq!(
            scan_attribute(parsed.attributes, Attribute::Date).unwrap(),
            "17-Jul-1996 02:44:25 -0700"
        );
        assert_eq!(scan_attribute(parsed.attributes, Attribute::Flags).unwrap(), "\\Seen");
    }

    #[test]
    fn fetch_attribute_order_does_not_matter() {
        let blob = r#"RFC822.SIZE 10 FLAGS () INTERNALDATE " 1-Feb-2024 10:00:00 +0000""#;
        assert_eq!(scan_attribute(blob, Attribute::Size).unwrap(), "10");
        assert_eq!(scan_attribute(blob, Attribute::Flags).unwrap(), "");
        assert_eq!(scan_attribute(blob, Attribute::Date).unwrap(), " 1-Feb-2024 10:00:00 +0000");
    }

    #[test]
    fn fetch_missing_attribute_names_it() {
        let err = scan_attribute("FLAGS () RFC822.SIZE 10", Attribute::Date).unwrap_err();
        match err {
            ReportError::MalformedReply { what, .. } => assert!(what.contains("DATE")),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn fetch_line_malformed() {
        assert!(parse_fetch_line("* 12 FETCH FLAGS ()").is_err());
        assert!(parse_fetch_line("* x FETCH (FLAGS ())").is_err());
    }

    #[test]
    fn unsolicited_lines() {
        assert!(is_unsolicited("* 4 EXISTS"));
        assert!(is_unsolicited("* 1 RECENT"));
        assert!(is_unsolicited("* 3 EXPUNGE"));
        assert!(is_unsolicited("* OK [ALERT] maintenance tonight"));
        assert!(is_unsolicited(r"* FLAGS (\Seen $Junk)"));
        assert!(!is_unsolicited("* 3 FETCH (FLAGS ())"));
        assert!(!is_unsolicited("* SEARCH 1 2"));
    }

    #[test]
    fn parse_number_rejects_signs_and_blanks() {
        assert!(parse_number::<u32>("n", "+1").is_err());
        assert!(parse_number::<u32>("n", "").is_err());
        assert!(parse_number::<u32>("n", " 1").is_err());
        assert_eq!(parse_number::<u32>("n", "007").unwrap(), 7);
    }

    fn flag_token() -> impl Strategy<Value = String> {
        prop_oneof![
            "\\\\[A-Za-z]{1,12}",
            "\\$?[A-Za-z]{1,10}",
        ]
    }

    proptest! {
        #[test]
        fn list_line_round_trips(
            flag_set in proptest::collection::btree_set(flag_token(), 0..5),
            separator in proptest::option::of("[./\\\\\"]"),
            name in "[ -~]{1,40}",
        ) {
            let line = format_list_line(&flag_set, separator.as_deref(), &name);
            let parsed = parse_list_line(&line).unwrap();
            prop_assert_eq!(parsed.flags, flag_set);
            prop_assert_eq!(parsed.separator, separator);
            prop_assert_eq!(parsed.name, name);
        }
    }
}
