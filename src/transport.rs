use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{ReportError, Result};

/// A line-oriented command channel to an IMAP server.
///
/// `execute` sends one (untagged) command, then hands every untagged reply
/// line to `on_line` in arrival order. An error returned by `on_line` aborts
/// the command and is passed back to the caller unchanged. When
/// `want_full_response` is set the whole reply text is returned as well;
/// otherwise the returned string is empty.
pub trait Transport {
    fn execute(
        &mut self,
        command: &str,
        want_full_response: bool,
        on_line: &mut dyn FnMut(&str) -> Result<()>,
    ) -> Result<String>;

    fn logout(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn execute(
        &mut self,
        command: &str,
        want_full_response: bool,
        on_line: &mut dyn FnMut(&str) -> Result<()>,
    ) -> Result<String> {
        (**self).execute(command, want_full_response, on_line)
    }

    fn logout(&mut self) -> Result<()> {
        (**self).logout()
    }
}

/// Feed each line of a raw reply to `on_line`, skipping blank lines.
pub fn dispatch_lines(text: &str, on_line: &mut dyn FnMut(&str) -> Result<()>) -> Result<()> {
    text.lines()
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| !line.is_empty())
        .try_for_each(|line| on_line(line))
}

/// Shared stop signal for a report pass, with an optional deadline.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// A budget too large to represent as an instant means no deadline.
    pub fn with_deadline(budget: Duration) -> Self {
        CancelToken {
            flag: Arc::default(),
            deadline: Instant::now().checked_add(budget),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        if self.flag.load(Ordering::SeqCst) {
            return true;
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => {
                self.cancel();
                true
            }
            _ => false,
        }
    }

    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(ReportError::Cancelled)
        } else {
            Ok(())
        }
    }
}
