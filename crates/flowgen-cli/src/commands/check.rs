//! `flowgen check`

use super::report;
use crate::console::CliConsole;
use anyhow::Result;
use colored::*;
use flowgen_core::{check_environment, BridgeConfig};

pub async fn execute(config: &BridgeConfig, verbose: bool) -> Result<()> {
    let console = CliConsole::new(verbose);
    console.print_header("Worker Environment");
    println!("  {} {}", "Executable:".bold(), config.worker.program);
    if let Some(dir) = &config.worker.working_dir {
        println!("  {} {}", "Working dir:".bold(), dir.display());
    }
    println!();
    console.info(&format!("Running {} in check mode", config.worker.program));

    let diagnostics = check_environment(config).await.map_err(report)?;

    let availability = match diagnostics.llama_index_available {
        Some(true) => "available".green(),
        Some(false) => "missing".yellow(),
        None => "not reported".dimmed(),
    };
    println!("  {} {}", "Index backend:".bold(), availability);
    for (key, value) in &diagnostics.extra {
        println!("  {} {}", format!("{}:", key).as_str().bold(), value);
    }
    println!();

    if diagnostics.is_ok() {
        console.success("Worker environment is healthy");
        Ok(())
    } else {
        console.error(&format!("Worker reported status '{}'", diagnostics.status));
        anyhow::bail!("worker environment check failed")
    }
}
