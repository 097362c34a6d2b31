//! `flowgen probe`

use super::report;
use crate::console::CliConsole;
use anyhow::Result;
use flowgen_core::{BridgeConfig, WorkerBridge};
use std::time::Instant;

/// Send `count` liveness probes, one after another
pub async fn execute(config: BridgeConfig, count: u32, verbose: bool) -> Result<()> {
    let console = CliConsole::new(verbose);
    let bridge = WorkerBridge::new(config);

    let started = Instant::now();
    let mut result = Ok(());
    for n in 1..=count.max(1) {
        let sent = Instant::now();
        match bridge.probe().await {
            Ok(()) => console.success(&format!(
                "probe {}: pong in {} ms",
                n,
                sent.elapsed().as_millis()
            )),
            Err(e) => {
                console.error(&format!("probe {}: {}", n, e));
                result = Err(report(e));
                break;
            }
        }
    }
    console.info(&format!(
        "Session open for {} ms",
        started.elapsed().as_millis()
    ));

    bridge.dispose().await;
    result
}
