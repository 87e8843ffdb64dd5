use anyhow::{anyhow, Context, Result};
use imap::Session;
use native_tls::TlsStream;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use crate::error::ReportError;
use crate::transport::{dispatch_lines, Transport};

pub type PlainSession = Session<TcpStream>;
pub type TlsSession = Session<TlsStream<TcpStream>>;

pub enum ImapSession {
    Plain(PlainSession),
    Tls(TlsSession),
}

/// Where and how to log in.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub host: String,
    pub port: u16,
    pub tls: bool,
    pub user: String,
    /// Read/write timeout applied to every command.
    pub timeout: Duration,
    /// Echo the protocol exchange on stderr.
    pub debug: bool,
}

impl ImapSession {
    fn run_command_and_read_response(&mut self, command: &str) -> imap::error::Result<Vec<u8>> {
        match self {
            ImapSession::Plain(s) => s.run_command_and_read_response(command),
            ImapSession::Tls(s) => s.run_command_and_read_response(command),
        }
    }
}

impl Transport for ImapSession {
    fn execute(
        &mut self,
        command: &str,
        want_full_response: bool,
        on_line: &mut dyn FnMut(&str) -> crate::error::Result<()>,
    ) -> crate::error::Result<String> {
        let response = self
            .run_command_and_read_response(command)
            .map_err(|err| match ReportError::from(err) {
                ReportError::CommandRejected { reason, .. } => ReportError::CommandRejected {
                    command: command.to_string(),
                    reason,
                },
                other => other,
            })?;
        let text = String::from_utf8_lossy(&response);
        dispatch_lines(&text, on_line)?;
        Ok(if want_full_response {
            text.into_owned()
        } else {
            String::new()
        })
    }

    fn logout(&mut self) -> crate::error::Result<()> {
        let result = match self {
            ImapSession::Plain(s) => s.logout(),
            ImapSession::Tls(s) => s.logout(),
        };
        result.map_err(ReportError::from)
    }
}

fn is_loopback(host: &str) -> bool {
    host == "127.0.0.1" || host == "::1" || host == "localhost"
}


fn login<S: Read + Write>(stream: S, opts: &ConnectOptions, pass: &str) -> Result<Session<S>> {
    let mut client = imap::Client::new(stream);
    client.debug = opts.debug;
    client
        .login(&opts.user, pass)
        .map_err(|e| e.0)
        .context("IMAP login failed")
}

pub fn connect(opts: &ConnectOptions, pass: &str) -> Result<ImapSession> {
    if !opts.tls && !is_loopback(&opts.host) {
        log::warn!(
            "connecting to {} without TLS; credentials will be sent in plaintext",
            opts.host
        );
    }

    let addr = format!("{}:{}", opts.host, opts.port);
    let tcp = TcpStream::connect(&addr).with_context(|| format!("Failed to connect to {addr}"))?;
    tcp.set_read_timeout(Some(opts.timeout))
        .context("Failed to set read timeout")?;
    tcp.set_write_timeout(Some(opts.timeout))
        .context("Failed to set write timeout")?;

    if opts.tls {
        let tls_connector = native_tls::TlsConnector::builder()
            .min_protocol_version(Some(native_tls::Protocol::Tlsv12))
            .build()
            .context("Failed to create TLS connector")?;
        let stream = tls_connector
            .connect(&opts.host, tcp)
            .map_err(|e| anyhow!("TLS handshake with {} failed: {e}", opts.host))?;
        Ok(ImapSession::Tls(login(stream, opts, pass)?))
    } else {
        Ok(ImapSession::Plain(login(tcp, opts, pass)?))
    }
}
