//! Table and JSON rendering for command results.

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use serde::Serialize;

use queuectl_core::{Job, JobState, QueueConfig};
use queuectl_infra::WorkerSummary;
use queuectl_infra::jobs::StatusSummary;

const COMMAND_WIDTH: usize = 40;
const OUTPUT_WIDTH: usize = 60;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn print_jobs(state: JobState, jobs: &[Job]) {
    if jobs.is_empty() {
        println!("No jobs found with state: {state}");
        return;
    }

    println!("--- Jobs ({state}) ---");
    println!(
        "{:<38} {:<11} {:<9} {:<20} COMMAND",
        "JOB ID", "STATE", "ATTEMPTS", "UPDATED"
    );
    for job in jobs {
        println!(
            "{:<38} {:<11} {:<9} {:<20} {}",
            job.id.as_str(),
            job.state.as_str(),
            format!("{}/{}", job.attempts, job.max_retries),
            timestamp(&job.updated_at),
            truncate(&job.command, COMMAND_WIDTH)
        );
    }
}

pub fn print_dead_letters(jobs: &[Job]) {
    if jobs.is_empty() {
        println!("Dead Letter Queue is empty.");
        return;
    }

    println!("--- Dead Letter Queue Jobs ---");
    println!(
        "{:<38} {:<9} {:<20} {:<40} OUTPUT",
        "JOB ID", "ATTEMPTS", "FAILED AT", "COMMAND"
    );
    for job in jobs {
        println!(
            "{:<38} {:<9} {:<20} {:<40} {}",
            job.id.as_str(),
            job.attempts,
            timestamp(&job.updated_at),
            truncate(&job.command, COMMAND_WIDTH),
            truncate(job.output.as_deref().unwrap_or("-"), OUTPUT_WIDTH)
        );
    }
}

pub fn print_status(summary: &StatusSummary) {
    println!("--- Job Summary ---");
    if summary.jobs.total() == 0 {
        println!("No jobs in the queue.");
    } else {
        println!("{:<12} COUNT", "STATE");
        for state in JobState::ALL {
            println!("{:<12} {}", state.as_str(), summary.jobs.get(state));
        }
    }

    println!();
    println!("--- Worker Summary ---");
    if summary.workers.total() == 0 {
        println!("No active workers.");
    } else {
        println!("{:<12} COUNT", "STATUS");
        println!("{:<12} {}", "running", summary.workers.running);
        println!("{:<12} {}", "stopping", summary.workers.stopping);
    }
}

pub fn print_config(config: &QueueConfig) {
    println!("--- Current Configuration ---");
    println!("{:<18} VALUE", "KEY");
    for (key, value) in config.entries() {
        println!("{:<18} {}", key.as_str(), value);
    }
}

pub fn print_worker_summary(summary: &WorkerSummary) {
    println!("Worker stopped.");
    println!("  claimed:            {}", summary.claimed);
    println!("  completed:          {}", summary.completed);
    println!("  retried:            {}", summary.retried);
    println!("  dead-lettered:      {}", summary.dead_lettered);
    if summary.finalize_failures > 0 {
        println!("  finalize failures:  {}", summary.finalize_failures);
    }
}

fn timestamp(at: &DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Single-line, width-limited rendering of free text.
fn truncate(text: &str, max: usize) -> String {
    let line = text.lines().next().unwrap_or("");
    let multiline = line.len() < text.trim_end().len();
    if line.chars().count() <= max && !multiline {
        return line.to_string();
    }
    let kept: String = line.chars().take(max.saturating_sub(3)).collect();
    format!("{kept}...")
}
