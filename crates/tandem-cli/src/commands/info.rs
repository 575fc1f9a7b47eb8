//! `tandem info` - Display scheduler defaults and environment.

use tandem_worker::SchedulerConfig;

pub fn execute() -> anyhow::Result<()> {
    println!("Tandem v{}", env!("CARGO_PKG_VERSION"));
    println!();

    println!("Platform:     {} ({})", std::env::consts::OS, std::env::consts::ARCH);
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    println!("Cores:        {}", cores);

    let config = SchedulerConfig::default();
    println!();
    println!("Defaults:");
    println!("  idle poll:    {:?}", config.idle_poll_interval);
    println!("  fiber stack:  {} KiB", config.fiber_stack_size / 1024);
    println!("  sync timeout: {:?}", config.sync_timeout);
    println!("  thread names: {}-<id>", config.thread_name_prefix);

    println!();
    println!("Environment:");
    match std::env::var("RUST_LOG") {
        Ok(value) => println!("  RUST_LOG = {}", value),
        Err(_) => println!("  RUST_LOG (not set)"),
    }

    Ok(())
}
