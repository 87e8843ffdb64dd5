use mailstat::{config, display, quota, report, session, CancelToken, ReportError, Transport};

use anyhow::{bail, Context, Result};
use clap::{ArgAction, CommandFactory, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::time::Duration;
use zeroize::Zeroize;

fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg}")
            .unwrap(),
    );
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

#[derive(Parser)]
#[command(
    name = "mailstat",
    about = "Per-folder message counts, unread counts, sizes and quota of an IMAP account"
)]
struct Cli {
    /// IMAP host [default: imap.gmail.com]
    #[arg(long, global = true)]
    host: Option<String>,

    /// IMAP port [default: 993 TLS, 143 plain]
    #[arg(long, global = true)]
    port: Option<u16>,

    /// Connect without TLS (only sensible for local servers)
    #[arg(long, global = true)]
    no_tls: bool,

    /// IMAP username
    #[arg(short, long, env = "MAILSTAT_USER", global = true)]
    user: Option<String>,

    /// Path to config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Socket timeout per command, in seconds [default: 30]
    #[arg(long, global = true)]
    timeout: Option<u64>,

    /// Print the IMAP exchange on stderr
    #[arg(long, global = true)]
    debug: bool,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Quota, per-folder statistics and account totals
    Report(ReportArgs),
    /// List folders with their flags and whether they would be scanned
    Folders,
    /// Show mailbox quota usage
    Quota,
    /// Generate shell completions
    Completions {
        /// Shell to generate for (bash, zsh, fish, powershell, elvish)
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
    /// Generate man page
    #[command(hide = true)]
    Manpage,
}

#[derive(Parser)]
struct ReportArgs {
    /// Also list every message (id, date, size, flags)
    #[arg(long)]
    details: bool,

    /// Number of parallel IMAP sessions for the folder pass [default: 1]
    #[arg(short, long)]
    jobs: Option<usize>,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,

    /// Do not query the quota
    #[arg(long)]
    no_quota: bool,

    /// Stop after this many seconds and report what was collected
    #[arg(long)]
    deadline: Option<u64>,
}

fn log_filter(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    }
}

fn get_password() -> Result<String> {
    if let Ok(p) = std::env::var("MAILSTAT_PASS") {
        if !p.is_empty() {
            return Ok(p);
        }
    }
    inquire::Password::new("IMAP password:")
        .without_confirmation()
        .prompt()
        .context("Password prompt failed")
}

fn resolve_options(cli: &Cli, cfg: &config::Config) -> Result<session::ConnectOptions> {
    // CLI/env > config > built-in default
    let tls = !cli.no_tls && cfg.tls.unwrap_or(true);
    let host = cli
        .host
        .clone()
        .or_else(|| cfg.host.clone())
        .unwrap_or_else(|| config::DEFAULT_HOST.to_string());
    let port = cli
        .port
        .or(cfg.port)
        .unwrap_or(if tls { 993 } else { 143 });
    let user = cli.user.clone().or_else(|| cfg.user.clone()).ok_or_else(|| {
        anyhow::anyhow!("IMAP username required (use -u/--user or MAILSTAT_USER env)")
    })?;
    let timeout = cli
        .timeout
        .or(cfg.timeout)
        .unwrap_or(config::DEFAULT_TIMEOUT_SECS);
    if timeout == 0 {
        bail!("--timeout must be at least 1 second");
    }
    Ok(session::ConnectOptions {
        host,
        port,
        tls,
        user,
        timeout: Duration::from_secs(timeout),
        debug: cli.debug,
    })
}

fn cmd_report(
    session: &mut session::ImapSession,
    args: &ReportArgs,
    opts: &session::ConnectOptions,
    pass: &str,
    cfg_jobs: Option<usize>,
) -> Result<()> {
    let jobs = args.jobs.or(cfg_jobs).unwrap_or(1);
    if jobs == 0 {
        bail!("--jobs must be at least 1");
    }
    let options = report::ReportOptions {
        quota: !args.no_quota,
        keep_messages: args.details,
        jobs,
    };
    let cancel = match args.deadline {
        Some(secs) => CancelToken::with_deadline(Duration::from_secs(secs)),
        None => CancelToken::new(),
    };

    let sp = spinner("Scanning folders...");
    let mut scanned = 0usize;
    let on_folder = |stats: &mailstat::folder::FolderStats| {
        scanned += 1;
        sp.set_message(format!("Scanned {scanned} folder(s), last: {}", stats.name));
    };
    let result = if jobs > 1 {
        let connect = || {
            session::connect(opts, pass)
                .map_err(|e| ReportError::TransportFailure(format!("{e:#}")))
        };
        report::build_report_parallel(session, connect, &options, &cancel, on_folder)
    } else {
        report::build_report(session, &options, &cancel, on_folder)
    };
    sp.finish_and_clear();
    let mut account = result.context("Account report failed")?;

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&account).context("Failed to serialize report")?
        );
        return Ok(());
    }

    display::display_report(&account);
    if args.details {
        for stats in &mut account.folders {
            display::sort_by_date(&mut stats.contents);
            display::display_messages(stats);
        }
    }
    Ok(())
}

fn cmd_folders(session: &mut session::ImapSession) -> Result<()> {
    let sp = spinner("Listing folders...");
    let folders = report::list_folders(session);
    sp.finish_and_clear();
    let folders = folders.context("Failed to list folders")?;
    display::display_folders(&folders);
    Ok(())
}

fn cmd_quota(session: &mut session::ImapSession) -> Result<()> {
    let sp = spinner("Fetching quota...");
    let result = quota::fetch_quota(session);
    sp.finish_and_clear();

    match result {
        Ok(Some(q)) => display::display_quota(&q),
        Ok(None) => println!("No quota information available."),
        Err(ReportError::UnsupportedCapability(cap)) => {
            bail!("Server does not support {cap} extension (RFC 2087)")
        }
        Err(e) => return Err(e).context("GETQUOTAROOT failed"),
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(log_filter(cli.verbose)),
    )
    .init();

    // Handle commands that don't need an IMAP connection
    match &cli.command {
        Commands::Completions { shell } => {
            clap_complete::generate(
                *shell,
                &mut Cli::command(),
                "mailstat",
                &mut std::io::stdout(),
            );
            return Ok(());
        }
        Commands::Manpage => {
            clap_mangen::Man::new(Cli::command()).render(&mut std::io::stdout())?;
            return Ok(());
        }
        _ => {}
    }

    // Load config: explicit --config path > default location > empty
    let cfg = config::Config::load(cli.config.as_deref())?;
    let opts = resolve_options(&cli, &cfg)?;
    log::debug!(
        "connecting to {}:{} as {} (tls: {})",
        opts.host,
        opts.port,
        opts.user,
        opts.tls
    );

    let mut pass = get_password()?;

    let sp = spinner("Connecting...");
    let session_result = session::connect(&opts, &pass);
    sp.finish_and_clear();

    let mut session = match session_result {
        Ok(s) => s,
        Err(e) => {
            pass.zeroize();
            return Err(e);
        }
    };

    let result = match &cli.command {
        Commands::Report(args) => cmd_report(&mut session, args, &opts, &pass, cfg.jobs),
        Commands::Folders => cmd_folders(&mut session),
        Commands::Quota => cmd_quota(&mut session),
        Commands::Completions { .. } | Commands::Manpage => unreachable!(),
    };

    // Worker sessions are all closed by now.
    pass.zeroize();

    if let Err(e) = session.logout() {
        log::debug!("logout failed: {e}");
    }
    result
}
