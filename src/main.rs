//! CLI entry point for receipt semantic-search index maintenance.
//!
//! Provides commands for rebuilding, appending to and querying the per-kind
//! vector indexes, plus a long-running rebuild scheduler.

use clap::{
    Parser, Subcommand,
    builder::styling::{AnsiColor, Effects, Styles},
};
use semindex::display::{
    THEME, create_append_table, create_matches_table, create_rebuild_table, create_status_table,
};
use semindex::exit_code::ExitCode;
use semindex::{
    IndexService, Kind, ReceiptRecord, RebuildScheduler, SearchTerms, Settings, SyncError,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::Level;

fn clap_cargo_style() -> Styles {
    Styles::styled()
        .header(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// Receipt semantic-search index maintenance
#[derive(Parser)]
#[command(
    name = "semindex",
    version = env!("CARGO_PKG_VERSION"),
    about = "Vector index sync and query for receipt semantic search",
    long_about = "Rebuild, append to and query the company, address and item_description \
                  vector indexes shared through a versioned artifact store.",
    next_line_help = true,
    styles = clap_cargo_style()
)]
struct Cli {
    /// Path to custom settings.toml file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Set up .semindex directory with default configuration")]
    Init {
        /// Force overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    #[command(about = "Display active settings")]
    Config,

    #[command(about = "Show cached and published versions of every kind")]
    Status {
        /// Emit JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    #[command(
        about = "Rebuild indexes from the corpus and publish them",
        after_help = "Examples:\n  semindex rebuild\n  semindex rebuild --kind address"
    )]
    Rebuild {
        /// Rebuild only this kind
        #[arg(short, long)]
        kind: Option<Kind>,
    },

    #[command(
        about = "Append texts to a published index",
        after_help = "Examples:\n  semindex append company \"Walmart Supercenter\"\n  semindex append item \"2% milk\" \"eggs\""
    )]
    Append {
        /// company, address or item_description
        kind: Kind,

        /// Texts to append, in order
        #[arg(required = true)]
        texts: Vec<String>,
    },

    #[command(about = "Append a receipt's company, address and items from a JSON file")]
    AppendReceipt {
        /// JSON file with company, address and items fields
        file: PathBuf,
    },

    #[command(about = "Find the labels closest to a text")]
    Query {
        /// company, address or item_description
        kind: Kind,

        text: String,

        /// Number of neighbors (defaults to query.default_k)
        #[arg(short)]
        k: Option<usize>,

        /// Emit JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    #[command(
        about = "Look up terms across several kinds at once",
        after_help = "Examples:\n  semindex search --company walmart --item milk --item bread"
    )]
    Search {
        #[arg(long = "company")]
        companies: Vec<String>,

        #[arg(long = "address")]
        addresses: Vec<String>,

        #[arg(long = "item")]
        items: Vec<String>,

        /// Emit JSON instead of the text summary
        #[arg(long)]
        json: bool,
    },

    #[command(about = "Rebuild every kind periodically until interrupted")]
    Schedule {
        /// Seconds between rebuilds (overrides rebuild.interval_secs)
        #[arg(short, long)]
        interval: Option<u64>,
    },
}

/// Installs the stderr log subscriber.
fn init_logging(debug: bool) {
    let level = if debug { Level::DEBUG } else { Level::INFO };
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn exit_with(code: ExitCode) -> ! {
    std::process::exit(code.into())
}

/// Prints an operation failure with its recovery hints and exits.
fn fail(error: &SyncError) -> ! {
    eprintln!("{}", THEME.error_with_icon(&error.to_string()));
    for suggestion in error.recovery_suggestions() {
        eprintln!("  {}", THEME.apply(&THEME.dim, suggestion));
    }
    exit_with(ExitCode::from_error(error))
}

fn open_service(settings: &Settings) -> IndexService {
    IndexService::from_settings(settings).unwrap_or_else(|e| fail(&e))
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{json}"),
        Err(e) => {
            eprintln!("Error serializing output: {e}");
            exit_with(ExitCode::GeneralError);
        }
    }
}

fn read_receipt(path: &Path) -> anyhow::Result<ReceiptRecord> {
    use anyhow::Context;

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read receipt file '{}'", path.display()))?;
    let record = serde_json::from_str(&content)
        .with_context(|| format!("'{}' is not a receipt JSON object", path.display()))?;
    Ok(record)
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let settings = if let Some(config_path) = &cli.config {
        Settings::load_from(config_path).unwrap_or_else(|e| {
            eprintln!(
                "Configuration error loading from {}: {}",
                config_path.display(),
                e
            );
            exit_with(ExitCode::ConfigError);
        })
    } else {
        Settings::load().unwrap_or_else(|e| {
            eprintln!("Configuration error: {e}");
            exit_with(ExitCode::ConfigError);
        })
    };

    init_logging(cli.verbose || settings.debug);

    match cli.command {
        Commands::Init { force } => match Settings::init_config_file(force) {
            Ok(path) => {
                println!("Created configuration file at: {}", path.display());
                println!("Edit this file to customize your settings.");
            }
            Err(e) => {
                eprintln!("Error: {e}");
                eprintln!("Use --force to overwrite");
                exit_with(ExitCode::ConfigError);
            }
        },

        Commands::Config => {
            println!("Current Configuration:");
            println!("{}", "=".repeat(50));
            match toml::to_string_pretty(&settings) {
                Ok(toml_str) => println!("{toml_str}"),
                Err(e) => eprintln!("Error displaying config: {e}"),
            }
        }

        Commands::Status { json } => {
            let service = open_service(&settings);
            let statuses = service.status();
            if json {
                print_json(&statuses);
            } else {
                println!("{}", THEME.apply(&THEME.header, "Index status"));
                println!("{}", create_status_table(&statuses));
                println!(
                    "{}",
                    THEME.apply(
                        &THEME.dim,
                        format!("cache: {}", service.cache().dir().display())
                    )
                );
            }
        }

        Commands::Rebuild { kind } => {
            let service = open_service(&settings);
            let results = match kind {
                Some(kind) => vec![(kind, service.rebuild(kind))],
                None => service.rebuild_all(),
            };
            println!("{}", create_rebuild_table(&results));

            let code = ExitCode::worst(results.iter().filter_map(|(_, r)| r.as_ref().err()));
            if code.is_success() {
                println!("{}", THEME.success_with_icon("Rebuild published"));
            } else {
                eprintln!("{}", THEME.error_with_icon(code.description()));
                exit_with(code);
            }
        }

        Commands::Append { kind, texts } => {
            let service = open_service(&settings);
            match service.append(kind, &texts) {
                Ok(report) => {
                    let attempts = report.attempts;
                    println!("{}", create_append_table(&[(kind, Ok(report))]));
                    if attempts > 1 {
                        eprintln!(
                            "{}",
                            THEME.warning_with_icon(&format!(
                                "published after {attempts} attempts due to concurrent writers"
                            ))
                        );
                    }
                }
                Err(e) => fail(&e),
            }
        }

        Commands::AppendReceipt { file } => {
            let record = read_receipt(&file).unwrap_or_else(|e| {
                eprintln!("{}", THEME.error_with_icon(&format!("{e:#}")));
                exit_with(ExitCode::IoError);
            });
            let service = open_service(&settings);
            let results = service.append_receipt(&record);
            if results.is_empty() {
                println!(
                    "{}",
                    THEME.warning_with_icon("Receipt has no company, address or items")
                );
                return;
            }
            println!("{}", create_append_table(&results));

            let code = ExitCode::worst(results.iter().filter_map(|(_, r)| r.as_ref().err()));
            if !code.is_success() {
                exit_with(code);
            }
        }

        Commands::Query { kind, text, k, json } => {
            let service = open_service(&settings);
            let outcome = service.query(kind, &text, k);
            if json {
                print_json(&outcome);
            } else {
                println!("{}", create_matches_table(kind, &outcome));
            }
            if !outcome.is_available() {
                exit_with(ExitCode::Unavailable);
            }
            exit_with(ExitCode::from_match_count(outcome.matches().len()));
        }

        Commands::Search {
            companies,
            addresses,
            items,
            json,
        } => {
            let terms = SearchTerms {
                companies,
                addresses,
                items,
            };
            if terms.is_empty() {
                eprintln!("Provide at least one --company, --address or --item term");
                exit_with(ExitCode::GeneralError);
            }
            let service = open_service(&settings);
            let results = service.search(&terms);
            if json {
                print_json(&results);
            } else if results.is_empty() {
                println!("No similar entries found in database.");
            } else {
                print!("{results}");
            }
        }

        Commands::Schedule { interval } => {
            let period = Duration::from_secs(interval.unwrap_or(settings.rebuild.interval_secs));
            if period.is_zero() {
                eprintln!("Rebuild interval must be at least one second");
                exit_with(ExitCode::ConfigError);
            }
            let service = Arc::new(open_service(&settings));
            let scheduler = RebuildScheduler::new(service, period);
            let cycles = scheduler
                .run_until(async {
                    let _ = tokio::signal::ctrl_c().await;
                })
                .await;
            println!("Stopped after {cycles} rebuild cycles");
        }
    }
}
