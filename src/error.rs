use thiserror::Error;

pub type Result<T> = std::result::Result<T, ReportError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReportError {
    /// A reply line did not match its grammar, or a numeric field was not a
    /// valid decimal number.
    #[error("malformed {what}: {text:?}")]
    MalformedReply { what: String, text: String },

    #[error("protocol inconsistency: {detail}")]
    ProtocolInconsistency { detail: String },

    /// The server answered the command with NO or BAD.
    #[error("server rejected `{command}`: {reason}")]
    CommandRejected { command: String, reason: String },

    #[error("cannot decode folder name {name:?}: {reason}")]
    InvalidFolderName { name: String, reason: String },

    #[error("server does not support the {0} capability")]
    UnsupportedCapability(String),

    #[error("transport failure: {0}")]
    TransportFailure(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl ReportError {
    pub fn malformed(what: impl Into<String>, text: impl Into<String>) -> Self {
        ReportError::MalformedReply {
            what: what.into(),
            text: text.into(),
        }
    }

    pub fn inconsistency(detail: impl Into<String>) -> Self {
        ReportError::ProtocolInconsistency {
            detail: detail.into(),
        }
    }

    /// Whether this error only invalidates the folder being processed.
    ///
    /// Folder-scoped errors are reported and the account pass moves on to the
    /// next folder. Everything else stops the pass.
    pub fn is_folder_scoped(&self) -> bool {
        matches!(
            self,
            ReportError::MalformedReply { .. }
                | ReportError::ProtocolInconsistency { .. }
                | ReportError::CommandRejected { .. }
                | ReportError::InvalidFolderName { .. }
        )
    }
}

impl From<imap::error::Error> for ReportError {
    fn from(err: imap::error::Error) -> Self {
        match err {
            imap::error::Error::No(reason) | imap::error::Error::Bad(reason) => {
                ReportError::CommandRejected {
                    command: String::new(),
                    reason,
                }
            }
            other => ReportError::TransportFailure(other.to_string()),
        }
    }
}
