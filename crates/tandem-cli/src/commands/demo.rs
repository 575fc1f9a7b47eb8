//! `tandem demo` - Drive fiber and thread workers from a host loop.

use anyhow::Context;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tandem_worker::{Scheduler, SchedulerConfig, Worker};

pub struct DemoOptions {
    pub flushes: u32,
    pub interval_ms: u64,
    pub thread_task_ms: u64,
    pub idle_poll_us: u64,
    pub stack_kib: usize,
}

pub fn execute(options: DemoOptions) -> anyhow::Result<()> {
    let config = SchedulerConfig::default()
        .with_idle_poll_interval(Duration::from_micros(options.idle_poll_us))
        .with_fiber_stack_size(options.stack_kib * 1024);
    let mut scheduler = Scheduler::with_config(config);

    let looper = scheduler
        .add_child_worker(Worker::cooperative())
        .context("attaching first fiber worker")?;
    let producer = scheduler
        .add_child_worker(Worker::cooperative())
        .context("attaching second fiber worker")?;
    let background = scheduler
        .add_child_worker(Worker::threaded())
        .context("attaching thread worker")?;

    looper.post(|me| {
        tracing::info!(worker = %me.id(), "fiber worker task 1");
        let mut node = 0u64;
        loop {
            node += 1;
            tracing::info!(worker = %me.id(), node, "fiber loop");
            if me.yield_now().is_err() {
                break;
            }
        }
    })?;

    let finished = Arc::new(AtomicU64::new(0));
    {
        let finished = finished.clone();
        let sleep = Duration::from_millis(options.thread_task_ms);
        producer.post(move |me| {
            tracing::info!(worker = %me.id(), "fiber worker task 2");
            loop {
                let finished = finished.clone();
                let posted = background.post(move |thread_worker| {
                    tracing::info!(worker = %thread_worker.id(), "thread worker task");
                    thread::sleep(sleep);
                    finished.fetch_add(1, Ordering::Relaxed);
                });
                if let Err(err) = posted {
                    tracing::warn!("cannot reach thread worker: {}", err);
                }

                if me.yield_now().is_err() {
                    break;
                }
            }
        })?;
    }

    let interval = Duration::from_millis(options.interval_ms);
    for _ in 0..options.flushes {
        scheduler.flush();
        thread::sleep(interval);
    }

    let stats = scheduler.stats();
    println!("Flushes:         {}", stats.flushes);
    println!("Fiber turns:     {}", stats.fiber_turns);
    println!("Tasks executed:  {}", stats.tasks_executed);
    println!("Thread tasks:    {}", finished.load(Ordering::Relaxed));
    println!("Crashed workers: {}", stats.crashed_workers);

    Ok(())
}
