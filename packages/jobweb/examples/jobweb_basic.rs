//! Submits a batch of independent jobs and waits for all of them.
//!
//! Run with `RUST_LOG=jobweb=trace` to see the scheduler's own logging.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use jobweb::Scheduler;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let scheduler = Scheduler::new();
    let completed = Arc::new(AtomicUsize::new(0));

    println!(
        "Submitting 100 jobs to {} workers...",
        scheduler.worker_count()
    );

    for i in 0..100 {
        let completed = Arc::clone(&completed);

        // Every tenth job is urgent and jumps ahead of the others in its queue.
        let priority = if i % 10 == 0 { 10 } else { 0 };

        scheduler.submit_with(priority, &[], move || {
            thread::sleep(Duration::from_millis(5));
            completed.fetch_add(1, Ordering::Relaxed);
            Ok(())
        });
    }

    println!("Stats after submitting: {:?}", scheduler.stats());

    scheduler.wait_all();

    println!(
        "All done, {} jobs completed.",
        completed.load(Ordering::Relaxed)
    );
}
