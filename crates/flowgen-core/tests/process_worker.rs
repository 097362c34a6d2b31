//! Bridge behavior against real child processes
#![cfg(unix)]

use flowgen_core::{
    check_environment, BridgeConfig, BridgeError, BridgeNotification, CancellationToken,
    RunProgress, RunRequest, WorkerBridge, WorkerCommandConfig, WorkerState,
};
use std::time::Duration;
use tokio::time::timeout;

const STEP: Duration = Duration::from_secs(5);

/// Answers every probe, like the stub engine
const ECHO_WORKER: &str = r#"
echo '{"type":"READY","message":"Engine stub initialised"}'
while read -r line; do
  case "$line" in
    *ping*|PING) echo '{"type":"PONG"}' ;;
    *) echo '{"type":"ERROR","message":"Stub engine received an unsupported command."}' ;;
  esac
done
"#;

fn sh_config(script: &str) -> BridgeConfig {
    let worker = WorkerCommandConfig::new("sh").arg("-c").arg(script);
    BridgeConfig::new(worker)
}

#[tokio::test]
async fn test_probe_real_worker() {
    let bridge = WorkerBridge::new(sh_config(ECHO_WORKER));
    assert_eq!(bridge.state(), WorkerState::NotStarted);

    for _ in 0..3 {
        timeout(STEP, bridge.probe()).await.unwrap().unwrap();
    }
    assert_eq!(bridge.state(), WorkerState::Ready);

    timeout(STEP, bridge.dispose()).await.unwrap();
    assert_eq!(bridge.state(), WorkerState::Terminated);
}

#[tokio::test]
async fn test_bare_probe_format() {
    let mut config = sh_config(ECHO_WORKER);
    config.probe_format = flowgen_core::ProbeFormat::Bare;
    let bridge = WorkerBridge::new(config);
    timeout(STEP, bridge.probe()).await.unwrap().unwrap();
    bridge.dispose().await;
}

#[tokio::test]
async fn test_exit_rejects_pending_probe() {
    let bridge = WorkerBridge::new(sh_config(
        r#"echo '{"type":"ready"}'; read -r line; exit 3"#,
    ));

    let result = timeout(STEP, bridge.probe()).await.unwrap();
    assert!(matches!(result, Err(BridgeError::Transport { .. })));
    assert_eq!(bridge.state(), WorkerState::Terminated);
}

#[tokio::test]
async fn test_silent_worker_hits_handshake_timeout() {
    let mut config = sh_config("sleep 10");
    config.handshake_timeout_ms = 200;
    let bridge = WorkerBridge::new(config);

    let result = timeout(STEP, bridge.probe()).await.unwrap();
    assert_eq!(result, Err(BridgeError::HandshakeTimeout { millis: 200 }));
    assert_eq!(bridge.state(), WorkerState::Terminated);
}

#[tokio::test]
async fn test_missing_executable_is_transport_error() {
    let bridge = WorkerBridge::new(BridgeConfig::new(WorkerCommandConfig::new(
        "/nonexistent/flowgen-worker",
    )));
    let error = bridge.probe().await.unwrap_err();
    assert!(error.is_terminal());
    assert!(error.user_message().contains("unavailable"));
    assert_eq!(bridge.state(), WorkerState::Terminated);
}

#[tokio::test]
async fn test_stderr_is_forwarded() {
    let script = format!("echo 'booting engine' >&2\n{}", ECHO_WORKER);
    let bridge = WorkerBridge::new(sh_config(&script));
    let mut notifications = bridge.subscribe();

    timeout(STEP, bridge.probe()).await.unwrap().unwrap();

    let line = timeout(STEP, async {
        loop {
            if let Ok(BridgeNotification::Stderr(line)) = notifications.recv().await {
                return line;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(line, "booting engine");
    bridge.dispose().await;
}

#[tokio::test]
async fn test_stderr_survives_invalid_utf8() {
    let script = r#"
printf '\377\376 bad\n' >&2
printf 'after bad bytes\n' >&2
echo '{"type":"READY"}'
while read -r line; do
  echo 'handling ping' >&2
  echo '{"type":"PONG"}'
done
"#;
    let bridge = WorkerBridge::new(sh_config(script));
    let mut notifications = bridge.subscribe();

    timeout(STEP, bridge.probe()).await.unwrap().unwrap();
    timeout(STEP, async {
        loop {
            if let Ok(BridgeNotification::Stderr(line)) = notifications.recv().await {
                if line == "after bad bytes" {
                    return;
                }
            }
        }
    })
    .await
    .unwrap();

    // The worker keeps writing to stderr and must not be killed by a closed pipe
    for _ in 0..2 {
        timeout(STEP, bridge.probe()).await.unwrap().unwrap();
    }
    assert_eq!(bridge.state(), WorkerState::Ready);
    bridge.dispose().await;
}

#[tokio::test]
async fn test_completion_written_before_exit_settles_run() {
    let script = r#"
echo '{"type":"READY"}'
read -r line
id=$(printf '%s' "$line" | sed 's/.*"correlationId":"\([^"]*\)".*/\1/')
echo '{"type":"completion","correlationId":"'"$id"'","files":[{"path":"App.tsx","content":"export {}"}]}'
exit 0
"#;
    let bridge = WorkerBridge::new(sh_config(script));

    let outcome = timeout(
        STEP,
        bridge.submit_run(
            RunRequest::new("{}"),
            |_: RunProgress| {},
            CancellationToken::new(),
        ),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(outcome.artifacts.len(), 1);
    assert_eq!(outcome.artifacts[0].path, "App.tsx");
    assert!(!outcome.cancelled);

    timeout(STEP, async {
        while bridge.state() != WorkerState::Terminated {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_check_environment() {
    let config = sh_config(r#"echo '{"status":"ok","llamaIndexAvailable":false}'"#);
    let report = check_environment(&config).await.unwrap();
    assert!(report.is_ok());
    assert_eq!(report.llama_index_available, Some(false));

    let failing = sh_config("echo broken >&2; exit 2");
    let error = check_environment(&failing).await.unwrap_err();
    assert!(matches!(error, BridgeError::Transport { .. }));
    assert_eq!(error.context(), Some("broken"));
}
