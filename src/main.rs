use chrono::{Days, Local};
use clap::{Parser, Subcommand};
use clarity::config::MirrorKind;
use clarity::digest::Digest;
use clarity::mail::MailClient;
use clarity::{
    Config, Difficulty, DirectoryMirror, Entry, EntryPatch, Filter, ListName, NewEntry, NotificationKind, Priority,
    Store, Summarizer, stats,
};
use colored::Colorize;
use eyre::{Context, Result, eyre};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::Level;

#[derive(Parser)]
#[command(name = "clarity")]
#[command(about = "Clarity - goals, tasks and reflections synced across devices")]
#[command(version = env!("GIT_DESCRIBE"))]
struct Cli {
    /// Config file (default: <config dir>/clarity/config.yaml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Store directory, overrides `store_dir` from the config
    #[arg(short, long, global = true)]
    store_path: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add an entry to a list
    Add {
        /// monthly, weekly, daily or reflections
        list: ListName,
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
        #[arg(short, long)]
        difficulty: Option<Difficulty>,
    },

    /// Show the entries of a list
    List {
        list: ListName,
        /// Include archived entries
        #[arg(short, long)]
        all: bool,
        /// Only completed entries
        #[arg(long, conflicts_with = "open")]
        done: bool,
        /// Only entries not yet completed
        #[arg(long)]
        open: bool,
        /// Only entries containing this text
        #[arg(long)]
        search: Option<String>,
        /// Print the raw JSON list
        #[arg(long)]
        json: bool,
    },

    /// Show one entry as JSON
    Show { list: ListName, id: String },

    /// Change fields of an entry
    Update {
        list: ListName,
        id: String,
        #[arg(long)]
        text: Option<String>,
        #[arg(long)]
        completed: Option<bool>,
        #[arg(short, long)]
        difficulty: Option<Difficulty>,
    },

    /// Flip the completion flag of an entry
    Toggle { list: ListName, id: String },

    /// Archive an entry; it stays stored but is hidden by default
    Archive { list: ListName, id: String },

    /// Move the given entries to the front, in the given order
    Reorder {
        list: ListName,
        #[arg(required = true, num_args = 1..)]
        ids: Vec<String>,
    },

    /// Streak, recent completions and difficulty mix of daily tasks
    Stats {
        /// Number of days in the completion history
        #[arg(long, default_value_t = 7)]
        days: u32,
    },

    /// Exchange every list with the configured mirror
    Sync {
        /// Push every local list even if the mirror already has one
        #[arg(long)]
        push: bool,
    },

    /// Follow the mirror and print lists as they change
    Watch,

    /// Summarize recent mail into notifications
    Digest {
        /// Print the digest as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration with secrets masked
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup tracing
    let level = if cli.verbose { Level::DEBUG } else { Level::WARN };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    let mut config = Config::load(cli.config.as_deref())?.with_env();
    if let Some(path) = &cli.store_path {
        config.store_dir = path.clone();
    }

    match cli.command {
        Commands::Add { list, text, difficulty } => {
            let session = Session::open(&config)?;
            let mut new = NewEntry::new(text.join(" "));
            new.difficulty = difficulty;
            let entry = session.store.add_entry(list, new)?;
            println!("{} {}", "Added".green(), entry.id.dimmed());
        }
        Commands::List {
            list,
            all,
            done,
            open,
            search,
            json,
        } => {
            let session = Session::open(&config)?;
            let mut filters = Vec::new();
            if !all {
                filters.push(Filter::active());
            }
            if done || open {
                filters.push(Filter::completed(done));
            }
            if let Some(needle) = search {
                filters.push(Filter::text_contains(needle));
            }

            let entries = session.store.list(list, &filters)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else {
                print_list(list, &entries);
            }
        }
        Commands::Show { list, id } => {
            let session = Session::open(&config)?;
            let entry = session
                .store
                .get_entry(list, &id)?
                .ok_or_else(|| eyre!("No entry {} in {}", id, list))?;
            println!("{}", serde_json::to_string_pretty(&entry)?);
        }
        Commands::Update {
            list,
            id,
            text,
            completed,
            difficulty,
        } => {
            let patch = EntryPatch {
                text,
                completed,
                difficulty,
                ..EntryPatch::default()
            };
            if patch.is_empty() {
                return Err(eyre!("Nothing to update: pass --text, --completed or --difficulty"));
            }
            let session = Session::open(&config)?;
            let entry = session.store.update_entry(list, &id, patch)?;
            report_changed(list, &id, entry, "Updated");
        }
        Commands::Toggle { list, id } => {
            let session = Session::open(&config)?;
            let entry = session.store.toggle_entry(list, &id)?;
            report_changed(list, &id, entry, "Toggled");
        }
        Commands::Archive { list, id } => {
            let session = Session::open(&config)?;
            let entry = session.store.archive_entry(list, &id)?;
            report_changed(list, &id, entry, "Archived");
        }
        Commands::Reorder { list, ids } => {
            let session = Session::open(&config)?;
            session.store.reorder_entries(list, &ids)?;
            print_list(list, &session.store.active_entries(list)?);
        }
        Commands::Stats { days } => {
            let session = Session::open(&config)?;
            print_stats(&session.store.entries(ListName::Daily)?, days);
        }
        Commands::Sync { push } => {
            let session = Session::open(&config)?;
            let Some(mirror) = session.store.mirror_description() else {
                return Err(eyre!("No mirror configured; set mirror.kind and mirror.path in the config"));
            };
            if push {
                let pushed = session.store.push_all()?;
                println!("Pushed {} lists", pushed);
            }

            println!("{} {}", "Mirror:".bold(), mirror);
            for list in ListName::ALL {
                let status = session.store.sync_status(list)?;
                println!(
                    "  {:<12} pushes {:>3}  failed {:>3}  remote applied {:>3}  rejected {:>3}",
                    list.to_string(),
                    status.pushes,
                    status.failed_pushes,
                    status.remote_applied,
                    status.remote_rejected
                );
            }
        }
        Commands::Watch => watch(&config)?,
        Commands::Digest { json } => {
            let summarizer = Summarizer::new(config.ai.api_key.clone())
                .with_endpoint(config.ai.endpoint.clone())
                .with_model(config.ai.model.clone(), config.ai.temperature);
            if !summarizer.has_key() {
                return Err(eyre!(
                    "No AI API key configured; set ai.api_key or {}",
                    clarity::config::AI_API_KEY_ENV
                ));
            }

            let client = MailClient::new(clarity::mail::GMAIL_API_BASE, config.mail.query.clone());
            let emails = client.fetch_all(&config.mail.accounts);
            if emails.is_empty() {
                println!("{}", "No recent mail".dimmed());
                return Ok(());
            }

            match summarizer.summarize(&emails) {
                Some(digest) if json => println!("{}", serde_json::to_string_pretty(&digest)?),
                Some(digest) => print_digest(&digest),
                None => println!("{}", "No digest available".yellow()),
            }
        }
        Commands::Config => {
            match Config::default_path() {
                Some(path) if cli.config.is_none() => println!("# {}", path.display()),
                _ => {}
            }
            print!("{}", config.redacted().to_yaml()?);
        }
    }

    Ok(())
}

/// An opened store, attached to the configured mirror if there is one
struct Session {
    store: Store,
    mirror: Option<Arc<DirectoryMirror>>,
}

impl Session {
    fn open(config: &Config) -> Result<Self> {
        let store = Store::open(&config.store_dir)
            .with_context(|| format!("Failed to open store at {}", config.store_dir.display()))?;

        let mirror = match config.mirror.kind {
            MirrorKind::None => None,
            MirrorKind::Directory => {
                let path = config
                    .mirror
                    .path
                    .as_ref()
                    .ok_or_else(|| eyre!("mirror.path is required for a directory mirror"))?;
                let mirror = Arc::new(DirectoryMirror::open(path)?);
                store.attach_mirror(mirror.clone())?;
                Some(mirror)
            }
        };

        Ok(Self { store, mirror })
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.store.detach_mirror();
    }
}

fn watch(config: &Config) -> Result<()> {
    let session = Session::open(config)?;
    let Some(mirror) = session.mirror.as_ref() else {
        return Err(eyre!("No mirror configured; set mirror.kind and mirror.path in the config"));
    };

    let changes = session.store.subscribe_changes()?;
    let _watcher = mirror.watch(config.mirror.poll_interval());
    println!("Watching {} (Ctrl-C to stop)", mirror.dir().display());

    for list in changes {
        println!("{} {}", Local::now().format("%H:%M:%S").to_string().dimmed(), list.to_string().bold());
        print_list(list, &session.store.active_entries(list)?);
    }
    Ok(())
}

fn report_changed(list: ListName, id: &str, entry: Option<Entry>, verb: &str) {
    match entry {
        Some(entry) => println!("{} {}", verb.green(), format_entry(&entry)),
        None => println!("{} {} {}", "No entry".yellow(), id, format!("in {}", list).dimmed()),
    }
}

fn format_entry(entry: &Entry) -> String {
    let mark = if entry.completed { "[x]".green() } else { "[ ]".normal() };
    let text = if entry.archived {
        entry.text.dimmed()
    } else if entry.completed {
        entry.text.strikethrough()
    } else {
        entry.text.normal()
    };
    let difficulty = match entry.difficulty {
        Some(Difficulty::Hard) => " hard".red().to_string(),
        Some(Difficulty::Medium) => " medium".yellow().to_string(),
        Some(Difficulty::Easy) | None => String::new(),
    };
    format!("{} {}{}  {}", mark, text, difficulty, entry.id.dimmed())
}

fn print_list(list: ListName, entries: &[Entry]) {
    if entries.is_empty() {
        println!("{}", format!("No {} entries", list).dimmed());
        return;
    }
    for entry in entries {
        println!("{}", format_entry(entry));
    }
}

fn print_stats(tasks: &[Entry], days: u32) {
    let today = Local::now().date_naive();
    let streak = stats::streak(tasks, today, &Local);
    println!("{} {} days", "Streak:".bold(), streak.to_string().green());

    let start = today
        .checked_sub_days(Days::new(u64::from(days.saturating_sub(1))))
        .unwrap_or(today);
    println!("{}", "Completed:".bold());
    for (day, count) in stats::completions_in_range(tasks, start, days, &Local) {
        println!("  {}  {:>3}  {}", day.format("%a %d %b"), count, "#".repeat(count).green());
    }

    let mix = stats::difficulty_breakdown(tasks);
    println!(
        "{} easy {}  medium {}  hard {}",
        "Difficulty:".bold(),
        mix.easy,
        mix.medium,
        mix.hard
    );
}

fn print_digest(digest: &Digest) {
    if let Some(focus) = &digest.today_focus {
        println!("{} {}", "Today:".bold(), focus);
    }
    if digest.notifications.is_empty() {
        println!("{}", "Nothing needs attention".dimmed());
    }
    for notification in &digest.notifications {
        let kind = match notification.kind {
            NotificationKind::Urgent => "urgent".red().bold(),
            NotificationKind::Action => "action".yellow(),
            NotificationKind::Info => "info".blue(),
        };
        let text = match notification.priority {
            Priority::High => notification.text.bold(),
            Priority::Medium => notification.text.normal(),
            Priority::Low => notification.text.dimmed(),
        };
        println!("  {:<8} {}", kind.to_string(), text);
    }
}
