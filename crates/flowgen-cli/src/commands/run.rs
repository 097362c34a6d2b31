//! `flowgen run`

use super::{read_json_file, report};
use crate::console::CliConsole;
use anyhow::{Context, Result};
use colored::*;
use flowgen_core::{
    BridgeConfig, CancellationToken, RunOutcome, RunProgress, RunRequest, WorkerBridge,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::cell::Cell;
use std::path::Path;

pub async fn execute(
    config: BridgeConfig,
    document: &Path,
    settings: Option<&Path>,
    json: bool,
    verbose: bool,
) -> Result<()> {
    let console = CliConsole::new(verbose);

    let content = std::fs::read_to_string(document)
        .with_context(|| format!("Failed to read {}", document.display()))?;
    let mut request = RunRequest::new(content);
    if let Some(path) = settings {
        request = request.with_settings(read_json_file(path)?);
    }

    let bar = progress_bar();
    let cancel = CancellationToken::new();
    let interrupt = {
        let cancel = cancel.clone();
        let bar = bar.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                bar.println("Cancellation requested, waiting for the worker to stop...");
                cancel.cancel();
            }
        })
    };

    let bridge = WorkerBridge::new(config);
    console.info(&format!("Submitting {}", document.display()));
    let result = bridge
        .submit_run(request, progress_sink(bar.clone()), cancel)
        .await;
    interrupt.abort();
    bar.finish_and_clear();
    bridge.dispose().await;

    let outcome = result.map_err(report)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        print_outcome(&console, &outcome);
    }
    Ok(())
}

fn progress_bar() -> ProgressBar {
    let bar = ProgressBar::new(100);
    let style = ProgressStyle::with_template("{spinner:.cyan} [{bar:40.cyan/blue}] {pos:>3}% {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ");
    bar.set_style(style);
    bar
}

/// Accumulate increments into the bar position
fn progress_sink(bar: ProgressBar) -> impl Fn(RunProgress) + Send + 'static {
    let total = Cell::new(0.0_f64);
    move |progress: RunProgress| {
        total.set(total.get() + progress.increment);
        bar.set_position(total.get().round() as u64);
        if let Some(step) = progress.step {
            bar.set_message(step);
        }
    }
}

fn print_outcome(console: &CliConsole, outcome: &RunOutcome) {
    if outcome.cancelled {
        console.warn("Run was cancelled; output may be partial");
    }

    console.print_header(&format!("Generated {} file(s)", outcome.artifacts.len()));
    for artifact in &outcome.artifacts {
        println!(
            "  {} {}",
            artifact.path.cyan(),
            format!("({} bytes)", artifact.content.len()).as_str().dimmed()
        );
    }

    for warning in &outcome.warnings {
        console.warn(warning);
    }

    if !outcome.cancelled {
        console.success("Run complete");
    }
}
