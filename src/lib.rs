//! Per-folder message statistics and quota usage for an IMAP account.

pub mod classify;
pub mod config;
pub mod display;
pub mod error;
pub mod fetch;
pub mod folder;
pub mod grammar;
pub mod mutf7;
pub mod quota;
pub mod report;
pub mod session;
pub mod transport;

pub use error::{ReportError, Result};
pub use report::{build_report, build_report_parallel, AccountReport, ReportOptions};
pub use transport::{CancelToken, Transport};
