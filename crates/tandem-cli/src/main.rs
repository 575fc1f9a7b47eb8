//! Tandem demo host
//!
//! Drives a scheduler the way an embedding application would: a couple of
//! cooperative workers flushed from the main loop, plus a threaded worker
//! running on its own.

mod commands;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tandem")]
#[command(about = "Hybrid fiber/thread worker scheduler demo", long_about = None)]
#[command(version)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run two fiber workers and one thread worker for a number of flushes
    Demo {
        /// Number of scheduler flushes to perform
        #[arg(short, long, default_value_t = 10)]
        flushes: u32,
        /// Delay between flushes, in milliseconds
        #[arg(long, default_value_t = 100)]
        interval_ms: u64,
        /// How long each task on the thread worker sleeps, in milliseconds
        #[arg(long, default_value_t = 250)]
        thread_task_ms: u64,
        /// Idle poll interval of threaded workers, in microseconds
        #[arg(long, default_value_t = 1000)]
        idle_poll_us: u64,
        /// Fiber stack size, in KiB
        #[arg(long, default_value_t = 256)]
        stack_kib: usize,
    },

    /// Show scheduler defaults and environment
    Info,
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Demo {
            flushes,
            interval_ms,
            thread_task_ms,
            idle_poll_us,
            stack_kib,
        } => commands::demo::execute(commands::demo::DemoOptions {
            flushes,
            interval_ms,
            thread_task_ms,
            idle_poll_us,
            stack_kib,
        }),
        Commands::Info => commands::info::execute(),
    }
}
