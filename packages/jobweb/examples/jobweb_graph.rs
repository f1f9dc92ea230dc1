//! Builds a small build-system style dependency graph and shows how outcomes flow through it.
//!
//! ```text
//!   fetch_a   fetch_b
//!      |         |
//!   parse_a   parse_b (fails)
//!       \       /
//!        \     /
//!         link
//! ```
//!
//! `link` still runs after `parse_b` fails, and inspects its dependencies itself.

use std::thread;
use std::time::Duration;

use jobweb::{BoxError, JobHandle, Scheduler};
use tracing_subscriber::EnvFilter;

fn step(name: &'static str) -> impl FnOnce() -> Result<(), BoxError> + Send + 'static {
    move || {
        println!("{name} running on {:?}", thread::current().name());
        thread::sleep(Duration::from_millis(20));
        Ok(())
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let scheduler = Scheduler::new();

    let fetch_a = scheduler.submit(step("fetch_a"));
    let fetch_b = scheduler.submit(step("fetch_b"));

    // Parsing is on the critical path, so it goes ahead of other ready work in its queue.
    let parse_a = scheduler.submit_with(5, &[fetch_a], step("parse_a"));
    let parse_b = scheduler.submit_with(5, &[fetch_b], || Err("syntax error in b".into()));

    let inputs: [JobHandle; 2] = [parse_a, parse_b];
    let link = scheduler.submit_with(0, &inputs.clone(), move || {
        for input in &inputs {
            // The dependencies have finished, so this does not block.
            if let Err(error) = input.wait() {
                return Err(format!("cannot link, {} failed: {error}", input.id()).into());
            }
        }

        println!("linking");
        Ok(())
    });

    match scheduler.wait_for(&link) {
        Ok(()) => println!("build succeeded"),
        Err(error) => println!("build failed: {error}"),
    }
}
