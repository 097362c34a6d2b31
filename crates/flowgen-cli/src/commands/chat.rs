//! `flowgen chat`

use super::{read_json_file, report};
use crate::console::CliConsole;
use anyhow::Result;
use colored::*;
use flowgen_core::{BridgeConfig, ChatOutcome, ChatRequest, WorkerBridge};
use std::path::Path;

pub async fn execute(
    config: BridgeConfig,
    prompt: String,
    context: Option<&Path>,
    verbose: bool,
) -> Result<()> {
    let console = CliConsole::new(verbose);
    let mut request = ChatRequest::new(prompt);
    if let Some(path) = context {
        request = request.with_context(read_json_file(path)?);
    }

    let bridge = WorkerBridge::new(config);
    console.info("Sending chat request");
    let result = bridge.submit_chat(request).await;
    bridge.dispose().await;

    print_outcome(&console, &result.map_err(report)?);
    Ok(())
}

fn print_outcome(console: &CliConsole, outcome: &ChatOutcome) {
    for line in &outcome.reply {
        println!("{}", line);
    }

    if !outcome.actions.is_empty() {
        console.print_header("Actions");
        for action in &outcome.actions {
            let params = serde_json::Value::Object(action.params.clone());
            println!("  {} {}", action.kind.cyan().bold(), params.to_string().as_str().dimmed());
        }
    }

    if !outcome.follow_ups.is_empty() {
        console.print_header("Follow-ups");
        for follow_up in &outcome.follow_ups {
            println!("  • {}", follow_up);
        }
    }
}
