use std::iter::Sum;
use std::ops::{Add, AddAssign};

use serde::Serialize;

use crate::error::{ReportError, Result};
use crate::folder::{Aggregator, FolderDescriptor, FolderStats, Stage};
use crate::grammar::{self, ReplyKind};
use crate::quota::{self, Quota};
use crate::transport::{CancelToken, Transport};

/// Account-wide sums over the folders that ran to completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AccountTotals {
    pub messages: u64,
    pub unread: u64,
    pub size: u64,
}

impl AccountTotals {
    pub fn absorb(&mut self, stats: &FolderStats) {
        if stats.contributes() {
            self.messages += u64::from(stats.messages);
            self.unread += u64::from(stats.unread);
            self.size = self.size.saturating_add(stats.size);
        }
    }
}

impl Add for AccountTotals {
    type Output = AccountTotals;

    fn add(self, other: AccountTotals) -> AccountTotals {
        AccountTotals {
            messages: self.messages + other.messages,
            unread: self.unread + other.unread,
            size: self.size.saturating_add(other.size),
        }
    }
}

impl AddAssign for AccountTotals {
    fn add_assign(&mut self, other: AccountTotals) {
        *self = *self + other;
    }
}

impl Sum for AccountTotals {
    fn sum<I: Iterator<Item = AccountTotals>>(iter: I) -> Self {
        iter.fold(AccountTotals::default(), Add::add)
    }
}

impl<'s> FromIterator<&'s FolderStats> for AccountTotals {
    fn from_iter<I: IntoIterator<Item = &'s FolderStats>>(iter: I) -> Self {
        let mut totals = AccountTotals::default();
        for stats in iter {
            totals.absorb(stats);
        }
        totals
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum QuotaReport {
    Available(Quota),
    NotSet,
    Unsupported,
    Failed { reason: String },
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountReport {
    pub quota: QuotaReport,
    pub folders: Vec<FolderStats>,
    pub totals: AccountTotals,
    /// The pass was cancelled before every folder was processed.
    pub interrupted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportOptions {
    pub quota: bool,
    pub keep_messages: bool,
    pub jobs: usize,
}

impl Default for ReportOptions {
    fn default() -> Self {
        ReportOptions {
            quota: true,
            keep_messages: false,
            jobs: 1,
        }
    }
}

/// List every folder of the account, in server order.
pub fn list_folders<T: Transport + ?Sized>(transport: &mut T) -> Result<Vec<FolderDescriptor>> {
    let mut folders = Vec::new();
    transport
        .execute(r#"LIST "" "*""#, false, &mut |line| {
            if grammar::capture(ReplyKind::List, line).is_none() && grammar::is_unsolicited(line) {
                return Ok(());
            }
            folders.push(FolderDescriptor::from_list_line(line)?);
            Ok(())
        })
        .map_err(|err| match err {
            ReportError::CommandRejected { reason, .. } => ReportError::CommandRejected {
                command: "LIST".to_string(),
                reason,
            },
            other => other,
        })?;
    log::debug!("{} folder(s) listed", folders.len());
    Ok(folders)
}

/// Quota section of the report. Only transport failures escape.
pub fn quota_report<T: Transport + ?Sized>(transport: &mut T) -> Result<QuotaReport> {
    match quota::fetch_quota(transport) {
        Ok(Some(quota)) => Ok(QuotaReport::Available(quota)),
        Ok(None) => Ok(QuotaReport::NotSet),
        Err(ReportError::UnsupportedCapability(cap)) => {
            log::warn!("server does not support {cap}; quota not reported");
            Ok(QuotaReport::Unsupported)
        }
        Err(err @ (ReportError::TransportFailure(_) | ReportError::Cancelled)) => Err(err),
        Err(err) => {
            log::warn!("quota: {err}");
            Ok(QuotaReport::Failed {
                reason: err.to_string(),
            })
        }
    }
}

/// Fold one folder's result into the report, or stop the pass.
///
/// Returns `Ok(false)` when the pass was cancelled.
fn settle(
    folder: &FolderDescriptor,
    stage: Stage,
    outcome: Result<FolderStats>,
    on_folder: &mut dyn FnMut(&FolderStats),
    folders: &mut Vec<FolderStats>,
) -> Result<bool> {
    let stats = match outcome {
        Ok(stats) => stats,
        Err(ReportError::Cancelled) => return Ok(false),
        Err(err) if err.is_folder_scoped() => {
            log::warn!("{}: folder aborted after stage '{stage}': {err}", folder.name);
            FolderStats::failed(folder, &err)
        }
        Err(err) => return Err(err),
    };
    on_folder(&stats);
    folders.push(stats);
    Ok(true)
}

/// Run the folder pass over one session, folder after folder.
pub fn collect<T: Transport + ?Sized>(
    transport: &mut T,
    folders: &[FolderDescriptor],
    options: &ReportOptions,
    cancel: &CancelToken,
    mut on_folder: impl FnMut(&FolderStats),
) -> Result<(Vec<FolderStats>, bool)> {
    let mut aggregator =
        Aggregator::new(transport, cancel.clone()).keep_messages(options.keep_messages);
    let mut done = Vec::with_capacity(folders.len());
    for folder in folders {
        let outcome = aggregator.folder_stats(folder);
        if !settle(folder, aggregator.stage(), outcome, &mut on_folder, &mut done)? {
            return Ok((done, true));
        }
    }
    Ok((done, false))
}

/// What a worker reports back to the collecting thread.
enum WorkerEvent {
    Folder {
        index: usize,
        stage: Stage,
        outcome: Result<FolderStats>,
    },
    /// The worker could not open its session. Fatal to the whole pass.
    SessionFailed(ReportError),
}

/// Run the folder pass with one session per worker.
///
/// `connect` is called once in each worker thread. Results are put back in
/// listing order; folders that never ran because the pass was cancelled are
/// left out and the pass is flagged as interrupted.
pub fn collect_parallel<T, F>(
    connect: F,
    folders: &[FolderDescriptor],
    options: &ReportOptions,
    cancel: &CancelToken,
    mut on_folder: impl FnMut(&FolderStats),
) -> Result<(Vec<FolderStats>, bool)>
where
    T: Transport,
    F: Fn() -> Result<T> + Sync,
{
    let jobs = options.jobs.clamp(1, folders.len().max(1));
    let (work_tx, work_rx) = crossbeam::channel::unbounded::<usize>();
    let (result_tx, result_rx) = crossbeam::channel::unbounded::<WorkerEvent>();
    for index in 0..folders.len() {
        // Receiver is alive until the scope below ends.
        let _ = work_tx.send(index);
    }
    drop(work_tx);

    let mut slots: Vec<Option<FolderStats>> = vec![None; folders.len()];
    let mut fatal = None;
    let mut interrupted = false;

    let scoped = crossbeam::thread::scope(|s| {
        for worker in 0..jobs {
            let work_rx = work_rx.clone();
            let result_tx = result_tx.clone();
            let connect = &connect;
            let cancel = cancel.clone();
            s.spawn(move |_| {
                let mut transport = match connect() {
                    Ok(t) => t,
                    Err(err) => {
                        log::warn!("worker {worker}: cannot open session: {err}");
                        cancel.cancel();
                        let _ = result_tx.send(WorkerEvent::SessionFailed(err));
                        return;
                    }
                };
                log::debug!("worker {worker}: session open");
                {
                    let mut aggregator = Aggregator::new(&mut transport, cancel.clone())
                        .keep_messages(options.keep_messages);
                    for index in work_rx.iter() {
                        let outcome = aggregator.folder_stats(&folders[index]);
                        let stop = matches!(&outcome, Err(err) if !err.is_folder_scoped());
                        if stop {
                            cancel.cancel();
                        }
                        let event = WorkerEvent::Folder {
                            index,
                            stage: aggregator.stage(),
                            outcome,
                        };
                        if result_tx.send(event).is_err() || stop {
                            break;
                        }
                    }
                }
                if let Err(err) = transport.logout() {
                    log::debug!("worker {worker}: logout failed: {err}");
                }
            });
        }
        drop(result_tx);

        for event in result_rx.iter() {
            let (index, stage, outcome) = match event {
                WorkerEvent::Folder {
                    index,
                    stage,
                    outcome,
                } => (index, stage, outcome),
                WorkerEvent::SessionFailed(err) => {
                    fatal.get_or_insert(err);
                    continue;
                }
            };
            let mut settled = Vec::with_capacity(1);
            match settle(&folders[index], stage, outcome, &mut on_folder, &mut settled) {
                Ok(true) => slots[index] = settled.pop(),
                Ok(false) => interrupted = true,
                Err(err) => {
                    fatal.get_or_insert(err);
                }
            }
        }
    });
    if scoped.is_err() {
        return Err(ReportError::TransportFailure("worker thread panicked".to_string()));
    }
    if let Some(err) = fatal {
        return Err(err);
    }

    let total = slots.len();
    let done: Vec<FolderStats> = slots.into_iter().flatten().collect();
    let interrupted = interrupted || done.len() < total;
    Ok((done, interrupted))
}

fn quota_section<T: Transport + ?Sized>(
    transport: &mut T,
    options: &ReportOptions,
) -> Result<QuotaReport> {
    if options.quota {
        quota_report(transport)
    } else {
        Ok(QuotaReport::Skipped)
    }
}

fn assemble(
    quota: QuotaReport,
    listed: usize,
    (folders, interrupted): (Vec<FolderStats>, bool),
) -> AccountReport {
    if interrupted {
        log::warn!("pass interrupted after {} of {listed} folder(s)", folders.len());
    }
    let totals = folders.iter().collect();
    AccountReport {
        quota,
        folders,
        totals,
        interrupted,
    }
}

/// Produce the whole account report over one session.
pub fn build_report<T: Transport + ?Sized>(
    transport: &mut T,
    options: &ReportOptions,
    cancel: &CancelToken,
    on_folder: impl FnMut(&FolderStats),
) -> Result<AccountReport> {
    let quota = quota_section(transport, options)?;
    let descriptors = list_folders(transport)?;
    let pass = collect(transport, &descriptors, options, cancel, on_folder)?;
    Ok(assemble(quota, descriptors.len(), pass))
}

/// Like [`build_report`], with the folder pass spread over
/// `options.jobs` extra sessions opened by `connect`. `transport` still
/// serves the quota and LIST commands.
pub fn build_report_parallel<T, C, F>(
    transport: &mut T,
    connect: F,
    options: &ReportOptions,
    cancel: &CancelToken,
    on_folder: impl FnMut(&FolderStats),
) -> Result<AccountReport>
where
    T: Transport + ?Sized,
    C: Transport,
    F: Fn() -> Result<C> + Sync,
{
    let quota = quota_section(transport, options)?;
    let descriptors = list_folders(transport)?;
    let pass = collect_parallel(connect, &descriptors, options, cancel, on_folder)?;
    Ok(assemble(quota, descriptors.len(), pass))
}
