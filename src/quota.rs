use serde::Serialize;

use crate::error::{ReportError, Result};
use crate::grammar;
use crate::transport::Transport;

/// Storage quota for the account, in KiB as RFC 2087 reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Quota {
    pub used_kib: u64,
    pub limit_kib: u64,
}

impl Quota {
    pub fn used_bytes(&self) -> u64 {
        self.used_kib.saturating_mul(1024)
    }

    pub fn limit_bytes(&self) -> u64 {
        self.limit_kib.saturating_mul(1024)
    }

    pub fn usage_percent(&self) -> f64 {
        if self.limit_kib == 0 {
            0.0
        } else {
            self.used_kib as f64 / self.limit_kib as f64 * 100.0
        }
    }
}

/// Whether a CAPABILITY reply advertises `capability`.
pub fn has_capability<T: Transport + ?Sized>(transport: &mut T, capability: &str) -> Result<bool> {
    let mut found = false;
    transport.execute("CAPABILITY", false, &mut |line| {
        let mut tokens = line.split_whitespace();
        if tokens.next() == Some("*")
            && tokens
                .next()
                .is_some_and(|t| t.eq_ignore_ascii_case("CAPABILITY"))
        {
            found |= tokens.any(|t| t.eq_ignore_ascii_case(capability));
        }
        Ok(())
    })?;
    Ok(found)
}

/// Read the STORAGE quota of the INBOX quota roots.
///
/// The first root with a STORAGE resource wins; roots limiting only other
/// resources are skipped.
///
/// `Ok(None)` means the server supports quotas but none applies to the
/// account.
pub fn fetch_quota<T: Transport + ?Sized>(transport: &mut T) -> Result<Option<Quota>> {
    if !has_capability(transport, "QUOTA")? {
        return Err(ReportError::UnsupportedCapability("QUOTA".to_string()));
    }

    let mut quota = None;
    transport
        .execute("GETQUOTAROOT INBOX", false, &mut |line| {
            if quota.is_none() && grammar::is_quota_line(line) {
                if !grammar::quota_lists_storage(line) {
                    log::debug!("skipping quota root without STORAGE: {line}");
                    return Ok(());
                }
                let parsed = grammar::parse_quota_line(line)?;
                log::debug!("quota root {:?}: {} / {} KiB", parsed.root, parsed.used, parsed.limit);
                quota = Some(Quota {
                    used_kib: parsed.used,
                    limit_kib: parsed.limit,
                });
            }
            Ok(())
        })
        .map_err(|err| match err {
            ReportError::CommandRejected { reason, .. } => ReportError::CommandRejected {
                command: "GETQUOTAROOT INBOX".to_string(),
                reason,
            },
            other => other,
        })?;
    Ok(quota)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::ScriptedTransport;

    const CAPS: &str = "* CAPABILITY IMAP4rev1 IDLE QUOTA UIDPLUS";

    #[test]
    fn reads_storage_quota() {
        let mut transport = ScriptedTransport::new()
            .reply("CAPABILITY", &[CAPS])
            .reply(
                "GETQUOTAROOT INBOX",
                &[r#"* QUOTAROOT INBOX """#, r#"* QUOTA "" (STORAGE 10240 15728640)"#],
            );
        let quota = fetch_quota(&mut transport).unwrap().unwrap();
        assert_eq!(quota.used_kib, 10240);
        assert_eq!(quota.limit_bytes(), 15728640 * 1024);
        assert!((quota.usage_percent() - 0.0651).abs() < 0.001);
    }

    #[test]
    fn missing_capability_is_unsupported() {
        let mut transport =
            ScriptedTransport::new().reply("CAPABILITY", &["* CAPABILITY IMAP4rev1 IDLE"]);
        let err = fetch_quota(&mut transport).unwrap_err();
        assert_eq!(err, ReportError::UnsupportedCapability("QUOTA".into()));
        assert_eq!(transport.issued, vec!["CAPABILITY"]);
    }

    #[test]
    fn capability_match_is_exact_token() {
        let mut transport = ScriptedTransport::new()
            .reply("CAPABILITY", &["* CAPABILITY IMAP4rev1 QUOTA=RES-STORAGE"]);
        assert!(!has_capability(&mut transport, "QUOTA").unwrap());
    }

    #[test]
    fn no_quota_line_means_not_set() {
        let mut transport = ScriptedTransport::new()
            .reply("CAPABILITY", &[CAPS])
            .reply("GETQUOTAROOT INBOX", &["* QUOTAROOT INBOX"]);
        assert_eq!(fetch_quota(&mut transport).unwrap(), None);
    }

    #[test]
    fn storage_root_after_message_only_root() {
        let mut transport = ScriptedTransport::new()
            .reply("CAPABILITY", &[CAPS])
            .reply(
                "GETQUOTAROOT INBOX",
                &[
                    r#"* QUOTAROOT INBOX "count" "bytes""#,
                    r#"* QUOTA "count" (MESSAGE 3 100)"#,
                    r#"* QUOTA "bytes" (STORAGE 512 2048)"#,
                ],
            );
        let quota = fetch_quota(&mut transport).unwrap().unwrap();
        assert_eq!((quota.used_kib, quota.limit_kib), (512, 2048));
    }

    #[test]
    fn only_message_roots_means_not_set() {
        let mut transport = ScriptedTransport::new()
            .reply("CAPABILITY", &[CAPS])
            .reply("GETQUOTAROOT INBOX", &[r#"* QUOTA "" (MESSAGE 3 100)"#]);
        assert_eq!(fetch_quota(&mut transport).unwrap(), None);
    }

    #[test]
    fn malformed_quota_line() {
        let mut transport = ScriptedTransport::new()
            .reply("CAPABILITY", &[CAPS])
            .reply("GETQUOTAROOT INBOX", &[r#"* QUOTA "" (STORAGE lots 100)"#]);
        assert!(matches!(
            fetch_quota(&mut transport),
            Err(ReportError::MalformedReply { .. })
        ));
    }

    #[test]
    fn zero_limit_usage() {
        let quota = Quota {
            used_kib: 5,
            limit_kib: 0,
        };
        assert_eq!(quota.usage_percent(), 0.0);
    }
}
