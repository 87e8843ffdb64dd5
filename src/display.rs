use comfy_table::{presets::UTF8_FULL_CONDENSED, Cell, Color, ContentArrangement, Table};

use crate::classify::{classify, FlagSets};
use crate::fetch::MessageRecord;
use crate::folder::{FolderDescriptor, FolderStats, Outcome};
use crate::mutf7;
use crate::quota::Quota;
use crate::report::{AccountReport, QuotaReport};

pub fn format_size(bytes: u64) -> String {
    if bytes >= 1_048_576 {
        format!("{:.1}M", bytes as f64 / 1_048_576.0)
    } else if bytes >= 1024 {
        format!("{:.0}K", bytes as f64 / 1024.0)
    } else {
        format!("{bytes}B")
    }
}

fn usage_cell(pct: f64) -> Cell {
    let text = format!("{pct:.1}%");
    if pct >= 90.0 {
        Cell::new(text).fg(Color::Red)
    } else if pct >= 75.0 {
        Cell::new(text).fg(Color::Yellow)
    } else {
        Cell::new(text)
    }
}

fn status_text(outcome: &Outcome) -> String {
    match outcome {
        Outcome::Done => "ok".to_string(),
        Outcome::Skipped { flags } => {
            let flags: Vec<&str> = flags.iter().map(String::as_str).collect();
            format!("skipped ({})", flags.join(" "))
        }
        Outcome::Failed { reason } => format!("failed: {reason}"),
    }
}

fn new_table() -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table
}

pub fn quota_line(quota: &QuotaReport) -> String {
    match quota {
        QuotaReport::Available(q) => format!(
            "Quota: {} of {} used ({:.1}%)",
            format_size(q.used_bytes()),
            format_size(q.limit_bytes()),
            q.usage_percent()
        ),
        QuotaReport::NotSet => "Quota: not set".to_string(),
        QuotaReport::Unsupported => "Quota: not supported by server".to_string(),
        QuotaReport::Failed { reason } => format!("Quota: unavailable ({reason})"),
        QuotaReport::Skipped => String::new(),
    }
}

pub fn display_quota(quota: &Quota) {
    let mut table = new_table();
    table.set_header(vec!["Resource", "Used", "Limit", "Usage"]);
    table.add_row(vec![
        Cell::new("STORAGE"),
        Cell::new(format_size(quota.used_bytes())),
        Cell::new(format_size(quota.limit_bytes())),
        usage_cell(quota.usage_percent()),
    ]);
    println!("{table}");
}

pub fn display_report(report: &AccountReport) {
    let mut table = new_table();
    table.set_header(vec!["Folder", "Messages", "Unread", "Size", "Status"]);

    for stats in &report.folders {
        let status = status_text(&stats.outcome);
        let status = match stats.outcome {
            Outcome::Failed { .. } => Cell::new(status).fg(Color::Red),
            Outcome::Skipped { .. } => Cell::new(status).fg(Color::DarkGrey),
            Outcome::Done if stats.fetched < stats.messages => {
                Cell::new(format!("ok ({} of {} fetched)", stats.fetched, stats.messages))
                    .fg(Color::Yellow)
            }
            Outcome::Done => Cell::new(status),
        };
        table.add_row(vec![
            Cell::new(&stats.name),
            Cell::new(stats.messages),
            Cell::new(stats.unread),
            Cell::new(format_size(stats.size)),
            status,
        ]);
    }

    table.add_row(vec![
        Cell::new("Total").fg(Color::Cyan),
        Cell::new(report.totals.messages).fg(Color::Cyan),
        Cell::new(report.totals.unread).fg(Color::Cyan),
        Cell::new(format_size(report.totals.size)).fg(Color::Cyan),
        Cell::new(""),
    ]);

    println!("{table}");

    if let QuotaReport::Available(q) = &report.quota {
        let mut quota = new_table();
        quota.add_row(vec![
            Cell::new(quota_line(&report.quota)),
            usage_cell(q.usage_percent()),
        ]);
        println!("{quota}");
    } else {
        let line = quota_line(&report.quota);
        if !line.is_empty() {
            println!("{line}");
        }
    }

    if report.interrupted {
        println!(
            "Interrupted: {} folder(s) reported before the run was cancelled.",
            report.folders.len()
        );
    }
}

pub fn display_folders(folders: &[FolderDescriptor]) {
    if folders.is_empty() {
        println!("No folders found.");
        return;
    }

    let mut table = new_table();
    table.set_header(vec!["Folder", "Separator", "Flags", "Action"]);
    for folder in folders {
        let name = mutf7::decode_folder_name(&folder.name).unwrap_or_else(|_| folder.name.clone());
        let flags: Vec<&str> = folder.flags.iter().map(String::as_str).collect();
        let action = classify(&folder.flags, &FlagSets::STANDARD);
        table.add_row(vec![
            Cell::new(name),
            Cell::new(folder.separator.as_deref().unwrap_or("NIL")),
            Cell::new(flags.join(" ")),
            Cell::new(action.label()),
        ]);
    }
    println!("{table}");
    println!("{} folder(s)", folders.len());
}

pub fn display_messages(stats: &FolderStats) {
    if stats.contents.is_empty() {
        return;
    }

    println!("{}", stats.name);
    let mut table = new_table();
    table.set_header(vec!["ID", "Date", "Size", "Flags"]);
    for msg in &stats.contents {
        let date = if msg.has_known_date() {
            msg.date.format("%Y-%m-%d %H:%M").to_string()
        } else {
            "?".to_string()
        };
        let flags: Vec<&str> = msg.flags.iter().map(String::as_str).collect();
        let row = vec![
            Cell::new(msg.id),
            Cell::new(date),
            Cell::new(format_size(msg.size)),
            Cell::new(flags.join(" ")),
        ];
        table.add_row(row);
    }
    println!("{table}");
}

/// Newest-first convenience for `--details` output.
pub fn sort_by_date(messages: &mut [MessageRecord]) {
    messages.sort_by(|a, b| b.date.cmp(&a.date).then(a.id.cmp(&b.id)));
}
