//! CLI entry point for `muttlearn`.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::{CommandFactory, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use rand::rngs::StdRng;
use rand::SeedableRng;

use muttlearn::cache::store::CacheMode;
use muttlearn::cache::CachePaths;
use muttlearn::config::{self, Config};
use muttlearn::parser::language::{LanguageGuesser, NoGuesser, StopwordGuesser};
use muttlearn::scan::{self, LearnReport, LearnRequest, ScanMode};

#[derive(Parser)]
#[command(name = "muttlearn", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Mailboxes to scan (defaults to `general.mailboxes` from the config)
    #[arg(value_name = "MAILBOX")]
    mailboxes: Vec<PathBuf>,

    /// Write the learned statistics to FILE ("-" for stdout)
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Configuration file
    #[arg(long, value_name = "FILE", env = "MUTTLEARN_CONFIG")]
    config: Option<PathBuf>,

    /// Print the resolved configuration and exit
    #[arg(short = 'D', long)]
    dump_config: bool,

    /// Verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Show a progress bar per mailbox
    #[arg(short, long)]
    progress: bool,

    /// Ignore cached records and parse every message again
    #[arg(short = 'C', long)]
    rebuild_cache: bool,

    /// Drop cached records of messages no longer found in any mailbox
    #[arg(short, long)]
    clean_cache: bool,

    /// Only aggregate the cached records; do not read any mailbox
    #[arg(long)]
    output_only: bool,

    /// Print scan statistics to stderr
    #[arg(long)]
    stats: bool,

    /// Do not guess the language of messages
    #[arg(long)]
    no_language: bool,

    /// Seed for the random greeting/goodbye selection
    #[arg(long, value_name = "N")]
    seed: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
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

    let config = match &cli.config {
        Some(path) => config::load_config_from(path),
        None => config::load_config(),
    };

    let log_level = match cli.verbose {
        0 => config.general.log_level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    setup_logging(log_level, &config);

    match &cli.command {
        Some(Commands::Completions { shell }) => cmd_completions(*shell),
        Some(Commands::Manpage) => cmd_manpage(),
        None if cli.dump_config => {
            config.resolve()?;
            print!("{}", config::dump_config(&config)?);
            Ok(())
        }
        None => cmd_learn(&cli, &config),
    }
}

/// Set up tracing with stderr output and optional file logging.
fn setup_logging(level: &str, config: &Config) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let log_file = config::log_file_path(config);
    let log_dir = config::cache_dir(config);
    let file_name = log_file
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "muttlearn.log".into());
    if std::fs::create_dir_all(&log_dir).is_ok() {
        let file_appender = tracing_appender::rolling::never(&log_dir, file_name);
        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(file_appender);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .with(file_layer)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .init();
    }
}

/// Generate shell completions and print to stdout.
fn cmd_completions(shell: clap_complete::Shell) -> anyhow::Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, "muttlearn", &mut std::io::stdout());
    Ok(())
}

/// Generate a man page and print to stdout.
fn cmd_manpage() -> anyhow::Result<()> {
    let cmd = Cli::command();
    let man = clap_mangen::Man::new(cmd);
    let mut buf = Vec::new();
    man.render(&mut buf)?;
    std::io::stdout().write_all(&buf)?;
    Ok(())
}

/// Scan the mailboxes and write the per-recipient statistics.
fn cmd_learn(cli: &Cli, config: &Config) -> anyhow::Result<()> {
    let options = config.resolve()?;

    let mailboxes = if cli.mailboxes.is_empty() {
        config.mailboxes()
    } else {
        cli.mailboxes.clone()
    };
    if mailboxes.is_empty() && !cli.output_only {
        anyhow::bail!("no mailbox given and no general.mailboxes configured");
    }

    let request = LearnRequest {
        mailboxes,
        cache_dir: config::cache_dir(config),
        cache_mode: CacheMode {
            rebuild: cli.rebuild_cache,
            clean: cli.clean_cache,
        },
        scan_mode: if cli.output_only {
            ScanMode::CacheOnly
        } else {
            ScanMode::Full
        },
    };

    let guesser: Box<dyn LanguageGuesser> = if cli.no_language {
        Box::new(NoGuesser)
    } else {
        Box::new(StopwordGuesser::default())
    };

    let pb = ProgressBar::hidden();
    if cli.progress {
        pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} {msg} [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
                .expect("valid template")
                .progress_chars("#>-"),
        );
    }
    let progress = |mailbox: &Path, done: usize, total: usize| {
        if done == 1 {
            pb.set_message(mailbox.display().to_string());
        }
        pb.set_length(total as u64);
        pb.set_position(done as u64);
    };

    let start = Instant::now();
    let report = scan::learn(
        &options,
        guesser.as_ref(),
        &request,
        chrono::Utc::now(),
        Some(&progress),
    )?;
    pb.finish_and_clear();

    if cli.stats {
        print_stats_table(&report, &request.cache_dir, start.elapsed());
    }

    let mut rng = match cli.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let summary = report.recipients.summary(&options, &mut rng);
    let json = serde_json::to_string_pretty(&summary)?;

    match cli.output.as_deref() {
        Some(path) if path != Path::new("-") => {
            std::fs::write(path, json + "\n")?;
            tracing::info!(path = %path.display(), recipients = summary.len(), "Wrote statistics");
        }
        _ => println!("{json}"),
    }
    Ok(())
}

/// Print scan counters to stderr.
fn print_stats_table(report: &LearnReport, cache_dir: &Path, elapsed: std::time::Duration) {
    use humansize::{format_size, BINARY};

    let stats = &report.stats;
    let cache_size = std::fs::metadata(CachePaths::new(cache_dir).messages)
        .map(|m| m.len())
        .unwrap_or(0);

    eprintln!();
    eprintln!("  {:<20} {}", "Messages seen", stats.seen);
    eprintln!("  {:<20} {}", "Cache hits", stats.cache_hits);
    eprintln!("  {:<20} {}", "Parsed", stats.parsed);
    eprintln!("  {:<20} {}", "Rejected", stats.rejected);
    eprintln!("  {:<20} {}", "Filtered", stats.filtered);
    eprintln!("  {:<20} {}", "Without Message-ID", stats.without_id);
    eprintln!("  {:<20} {}", "Learned", stats.learned());
    eprintln!("  {:<20} {}", "Recipients", report.recipients.len());
    eprintln!("  {:<20} {}", "Cache size", format_size(cache_size, BINARY));
    if let Some(reason) = &report.rebuild_reason {
        eprintln!("  {:<20} {}", "Cache rebuilt", reason);
    }
    eprintln!("  {:<20} {:.2?}", "Elapsed", elapsed);
    eprintln!();
}
