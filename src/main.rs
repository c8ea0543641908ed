//! CLI entrypoint for `keecrack`.
//!
//! Configures the engine from command-line arguments, wires Ctrl-C and an
//! optional deadline to a cooperative abort, runs one attack on the main
//! thread and maps the outcome to a process exit code.
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use colored::Colorize;
use keecrack::{
    engine::Engine,
    io::DEFAULT_MMAP_THRESHOLD_BYTES,
    observer::{CrackingObserver, ErrorCode, FormObserver},
    report::{Outcome, error_message, result_message},
    validator::KdbxValidator,
};
use log::{LevelFilter, debug, info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "keecrack",
    version,
    about = "Dictionary and pattern attacks against KeePass databases"
)]
struct Args {
    /// Path to the KDBX database
    database: PathBuf,

    /// Word list file, or a pattern when --incremental is set
    #[arg(short = 'w', long = "word-list", required = true)]
    word_list: String,

    /// Treat --word-list as a pattern and try every string it matches
    #[arg(short = 'i', long = "incremental")]
    incremental: bool,

    /// Key file for the database
    #[arg(short = 'k', long = "key-file")]
    key_file: Option<PathBuf>,

    /// Increase verbosity (-v prints every guess, -vv, -vvv)
    #[arg(short = 'v', action = clap::ArgAction::Count)]
    verbose: u8,

    /// Abort the attack after this many seconds
    #[arg(long = "timeout")]
    timeout: Option<u64>,

    /// Override mmap threshold in bytes. If zero, disable mmap.
    #[arg(long = "mmap-threshold", default_value_t = DEFAULT_MMAP_THRESHOLD_BYTES)]
    mmap_threshold: u64,

    /// Control color output (auto, always, never)
    #[arg(long = "color", value_enum, default_value_t = ColorChoice::Auto)]
    color: ColorChoice,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ColorChoice {
    Auto,
    Always,
    Never,
}

fn init_logger(verbosity: u8) {
    let level = match verbosity {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    let _ = env_logger::Builder::from_default_env()
        .filter_level(level)
        .try_init();
}

fn stamp() -> String {
    format!("[{}] - ", chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"))
}

/// Prints attack progress to the terminal.
struct Console {
    show_guesses: bool,
}

impl CrackingObserver for Console {
    fn on_guess(&self, candidate: &str) {
        if self.show_guesses {
            println!("{}Guessing password: {}", stamp(), candidate);
        }
    }

    fn on_result(&self, password: Option<&str>, attempts: u64, elapsed: Duration) {
        let line = result_message(password, attempts, elapsed);
        let line = if password.is_some() {
            line.bold().green()
        } else {
            line.yellow()
        };
        println!("{}{}", stamp(), line);
    }

    fn on_error(&self, code: ErrorCode) {
        eprintln!("{}{}", stamp(), error_message(code).red());
    }
}

// Errors reach the console through the cracking side already.
impl FormObserver for Console {
    fn on_database_set(&self, name: Option<&str>) {
        debug!("database: {:?}", name);
    }

    fn on_key_file_set(&self, name: Option<&str>) {
        debug!("key file: {:?}", name);
    }

    fn on_candidate_source_set(&self, name: Option<&str>) {
        debug!("candidates: {:?}", name);
    }
}

fn configure(engine: &Engine<KdbxValidator>, args: &Args) -> Result<(), ErrorCode> {
    engine.set_database(Some(args.database.clone()));
    engine.set_key_file(args.key_file.clone());
    if args.incremental {
        engine
            .set_candidate_pattern(Some(args.word_list.as_str()))
            .map_err(|_| ErrorCode::InvalidPattern)
    } else {
        engine
            .set_candidate_file(Some(PathBuf::from(&args.word_list)))
            .map_err(|_| ErrorCode::SourceUnreadable)
    }
}

fn install_abort_triggers(engine: &Arc<Engine<KdbxValidator>>, timeout: Option<u64>) -> Result<()> {
    if let Some(secs) = timeout {
        let engine = Arc::clone(engine);
        thread::Builder::new()
            .name("keecrack-deadline".into())
            .spawn(move || {
                thread::sleep(Duration::from_secs(secs));
                info!("deadline of {}s reached", secs);
                engine.abort();
            })
            .context("spawning deadline thread")?;
    }
    let engine = Arc::clone(engine);
    ctrlc::set_handler(move || engine.abort()).context("installing Ctrl-C handler")?;
    Ok(())
}

fn main() {
    let args = Args::parse();
    init_logger(args.verbose);
    // Configure color policy
    match args.color {
        ColorChoice::Always => {
            colored::control::set_override(true);
        }
        ColorChoice::Never => {
            colored::control::set_override(false);
        }
        ColorChoice::Auto => {}
    }
    let threshold = if args.mmap_threshold == 0 {
        u64::MAX
    } else {
        args.mmap_threshold
    };

    let engine = Arc::new(Engine::new(KdbxValidator).with_mmap_threshold(threshold));
    let console = Arc::new(Console {
        show_guesses: args.verbose > 0,
    });
    engine.set_cracking_observer(&console);
    engine.set_form_observer(&console);

    if let Err(code) = configure(&engine, &args) {
        std::process::exit(code.exit_code());
    }
    if let Err(e) = install_abort_triggers(&engine, args.timeout) {
        warn!("{:#}", e);
    }

    let code = match engine.attack() {
        Ok(report) => match report.outcome {
            Outcome::Succeeded => 0,
            Outcome::Failed => ErrorCode::IoRead.exit_code(),
            Outcome::Exhausted | Outcome::Aborted => 1,
        },
        Err(e) => e.code().exit_code(),
    };
    std::process::exit(code);
}
