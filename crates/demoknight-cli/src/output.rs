//! Progress and error lines for the terminal

use std::path::Path;
use std::time::Duration;

use anyhow::Error;
use colored::*;

/// Print error in human-readable format
pub fn print_error_human(error: &Error) {
    eprintln!("{} {}", "Error:".red().bold(), error);

    let mut source = error.source();
    while let Some(err) = source {
        eprintln!("  {} {}", "Caused by:".yellow(), err);
        source = err.source();
    }
}

/// Print the run plan before anything is launched
pub fn print_plan(tests: &[String], passes: u32, eta: Duration) {
    println!(
        "{} {} tests, {} passes each, about {}",
        "Plan:".bold(),
        tests.len(),
        passes,
        format_duration(eta)
    );
    for name in tests {
        println!("  {} {}", "●".cyan(), name);
    }
}

pub fn print_eta_warning(eta: Duration) {
    let hours = eta.as_secs_f64() / 3600.0;
    println!(
        "{} This job may take more than {:.2} hours to complete. Consider breaking it up \
         into multiple jobs to avoid having to redo it after a crash.",
        "Warning:".yellow().bold(),
        hours
    );
}

pub fn print_test_starting(name: &str, attempt: u32) {
    if attempt > 1 {
        println!("{} {} (attempt {})", "Starting test".bold(), name.cyan(), attempt);
    } else {
        println!("{} {}", "Starting test".bold(), name.cyan());
    }
}

pub fn print_pass_finished(index: u32) {
    println!("  {} Finished pass {}", "✓".green(), index);
}

pub fn print_test_finished(name: &str) {
    println!("{} Finished test {}", "✓".green().bold(), name.bold());
}

pub fn print_test_restarting(name: &str, reason: &Error) {
    println!("{} {}: {}", "test restarting".yellow().bold(), name, reason);
}

pub fn print_manifest_written(path: &Path) {
    println!("{} {}", "Results:".bold(), path.display());
}

pub fn print_done() {
    println!("{}", "done".green().bold());
}

fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let (hours, rest) = (secs / 3600, secs % 3600);
    let (minutes, seconds) = (rest / 60, rest % 60);
    if hours > 0 {
        format!("{hours}h {minutes:02}m")
    } else if minutes > 0 {
        format!("{minutes}m {seconds:02}s")
    } else {
        format!("{seconds}s")
    }
}
