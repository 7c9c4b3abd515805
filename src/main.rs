//! CLI entry point for `mailharvest`.

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use mailharvest::config::{self, Config};
use mailharvest::fetch::auth::{CredentialProvider, StaticCredential, TokenFileCredentials};
use mailharvest::fetch::gmail::GmailClient;
use mailharvest::ledger::Ledger;
use mailharvest::pipeline::{Pipeline, PipelineConfig, RunReport};
use mailharvest::stage::Stager;

/// Download Gmail attachments for labelled messages into a year/month tree.
#[derive(Parser)]
#[command(name = "mailharvest", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file (overrides $MAILHARVEST_CONFIG)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Download new attachments once (default)
    Run,
    /// List mailbox labels and their ids
    Labels {
        #[arg(long)]
        json: bool,
    },
    /// List recorded downloads
    Ledger {
        #[arg(long)]
        json: bool,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
    /// Generate a man page
    Manpage,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Completions { shell }) => return cmd_completions(shell),
        Some(Commands::Manpage) => return cmd_manpage(),
        _ => {}
    }

    let config = config::load_config(cli.config.as_deref())?;
    config.validate()?;

    // Configure logging: stderr + append-only log file
    let log_level = match cli.verbose {
        0 => config.general.log_level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    setup_logging(log_level, &config);
    match &config.source {
        Some(path) => tracing::info!(path = %path.display(), "Loaded config"),
        None => tracing::debug!("No config file; using defaults"),
    }

    match cli.command {
        None | Some(Commands::Run) => cmd_run(&config),
        Some(Commands::Labels { json }) => cmd_labels(&config, json),
        Some(Commands::Ledger { json }) => cmd_ledger(&config, json),
        Some(Commands::Completions { .. }) | Some(Commands::Manpage) => Ok(()),
    }
}

/// Set up tracing with stderr output and file logging.
fn setup_logging(level: &str, config: &Config) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let log_file = &config.general.log_file;
    let log_dir = log_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let file_name = log_file
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "attachment_download.log".into());

    if std::fs::create_dir_all(log_dir).is_ok() {
        let file_appender = tracing_appender::rolling::never(log_dir, file_name);
        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(file_appender);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .with(file_layer)
            .init();
    } else {
        // Fall back to stderr only
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .init();
        tracing::warn!(path = %log_file.display(), "Log directory not writable; logging to stderr only");
    }
}

/// Build a Gmail client from the configuration.
///
/// `MAILHARVEST_ACCESS_TOKEN` bypasses the token file.
fn gmail_client(config: &Config) -> anyhow::Result<GmailClient> {
    let http = GmailClient::http_client(&config.gmail)?;
    let credentials: Box<dyn CredentialProvider> = match std::env::var("MAILHARVEST_ACCESS_TOKEN")
    {
        Ok(token) if !token.is_empty() => Box::new(StaticCredential(token)),
        _ => Box::new(TokenFileCredentials::new(
            &config.gmail.token_file,
            http.clone(),
        )),
    };
    Ok(GmailClient::from_config(&config.gmail, http, credentials))
}

fn open_ledger(config: &Config) -> anyhow::Result<Ledger> {
    let ledger = Ledger::open(&config.storage.ledger_path)?;
    ledger.ensure_schema()?;
    Ok(ledger)
}

/// Run the pipeline once and print a summary.
fn cmd_run(config: &Config) -> anyhow::Result<()> {
    config.validate_for_run()?;

    let ledger = open_ledger(config).context("Ledger unavailable")?;
    let stager = Stager::new(&config.storage.staging_root);
    let mut client = gmail_client(config)?;
    let pipeline_config = PipelineConfig::from_config(config);

    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} Downloading [{bar:40.cyan/blue}] {pos}/{len} messages")
            .expect("valid template")
            .progress_chars("#>-"),
    );

    let progress = |current: usize, total: usize| {
        pb.set_length(total as u64);
        pb.set_position(current as u64);
    };

    let start = Instant::now();
    let report =
        Pipeline::new(&pipeline_config, &mut client, &ledger, &stager).run(Some(&progress));
    pb.finish_and_clear();
    let report = report?;

    print_run_summary(&report, config, start.elapsed());
    Ok(())
}

/// List labels, as needed to fill in `gmail.labels`.
fn cmd_labels(config: &Config, json: bool) -> anyhow::Result<()> {
    let mut client = gmail_client(config)?;
    let labels = client.list_labels()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&labels)?);
        return Ok(());
    }

    if labels.is_empty() {
        println!("  No labels found.");
        return Ok(());
    }
    println!();
    println!("  {:<36} {:<8} {}", "ID", "Type", "Name");
    println!("  {}", "-".repeat(70));
    for label in &labels {
        println!(
            "  {:<36} {:<8} {}",
            label.id,
            label.kind.as_deref().unwrap_or("-"),
            label.name
        );
    }
    println!();
    Ok(())
}

/// List ledger entries.
fn cmd_ledger(config: &Config, json: bool) -> anyhow::Result<()> {
    let ledger = open_ledger(config)?;
    let entries = ledger.entries()?;

    if json {
        let output = serde_json::json!({
            "ledger": ledger.path().to_string_lossy(),
            "entry_count": entries.len(),
            "entries": entries,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!();
    println!("  {} recorded attachment(s) in {}", entries.len(), ledger.path().display());
    if entries.is_empty() {
        println!();
        return Ok(());
    }
    println!();
    println!("  {:<20} {:<18} {}", "Recorded", "Message", "Path");
    println!("  {}", "-".repeat(90));
    for entry in &entries {
        let message: String = entry.message_id.chars().take(17).collect();
        println!(
            "  {:<20} {:<18} {}",
            entry.recorded_at.format("%Y-%m-%d %H:%M:%S"),
            message,
            entry.destination_path.display()
        );
    }
    println!();
    Ok(())
}

fn print_run_summary(report: &RunReport, config: &Config, elapsed: std::time::Duration) {
    use humansize::{format_size, BINARY};

    println!();
    if report.messages_listed == 0 {
        println!("  No messages found.");
        println!();
        return;
    }
    println!("  {:<25} {}", "Messages", report.messages_listed);
    println!("  {:<25} {}", "Downloaded", report.attachments_recorded);
    println!(
        "  {:<25} {}",
        "Already downloaded", report.attachments_already_recorded
    );
    if report.attachments_unaddressable > 0 {
        println!(
            "  {:<25} {}",
            "Without attachment id", report.attachments_unaddressable
        );
    }
    if report.attachments_failed > 0 || report.messages_failed > 0 {
        println!(
            "  {:<25} {} attachment(s), {} message(s)",
            "Failed", report.attachments_failed, report.messages_failed
        );
        println!(
            "  {:<25} {}",
            "See log",
            config.general.log_file.display()
        );
    }
    println!(
        "  {:<25} {}",
        "Size",
        format_size(report.bytes_downloaded, BINARY)
    );
    println!(
        "  {:<25} {}",
        "Destination",
        config.storage.storage_root.display()
    );
    println!("  {:<25} {:.2?}", "Elapsed", elapsed);
    println!();
}

/// Generate shell completions and print to stdout.
fn cmd_completions(shell: clap_complete::Shell) -> anyhow::Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, "mailharvest", &mut std::io::stdout());
    Ok(())
}

/// Generate a man page and print to stdout.
fn cmd_manpage() -> anyhow::Result<()> {
    let cmd = Cli::command();
    let man = clap_mangen::Man::new(cmd);
    let mut buf = Vec::new();
    man.render(&mut buf)?;
    std::io::Write::write_all(&mut std::io::stdout(), &buf)?;
    Ok(())
}
