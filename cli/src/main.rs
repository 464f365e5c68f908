//! Herald CLI - drives a bridge end to end on real threads.
//!
//! ```text
//! workers: submit() --blocks--> gate --invoke--> PrimaryQueue
//!                                                   |
//! main:    pump() -> decision sink -> prevent_default / proceed / resolve
//! ```
//!
//! Events whose payload carries `"silent": true` are suppressed; everything
//! else is displayed. One extra event is handed to the background runtime.

use std::path::PathBuf;
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use herald_bridge::{
    BackgroundChannel, Bridge, CompletionGate, NotificationEvent, RuntimeProvisioner, methods,
};
use herald_config::BridgeConfig;
use herald_types::{BridgeError, BridgeMap, BridgeValue, CallbackHandle, LaunchError};

const DISPATCHER_HANDLE: u64 = 0x1001;
const USER_HANDLE: u64 = 0x2002;

#[derive(Parser)]
#[command(name = "herald")]
#[command(about = "Submit notifications from worker threads and print each display decision")]
struct Cli {
    /// Configuration file (missing file means defaults)
    #[arg(long, default_value = "herald.toml")]
    config: PathBuf,
    /// Number of notifications to submit
    #[arg(long, default_value_t = 6)]
    events: usize,
}

fn init_tracing(level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();
}

/// Secondary runtime hosted on the current process.
struct InProcessRuntime;

impl RuntimeProvisioner for InProcessRuntime {
    fn provision(
        &self,
        entrypoint: CallbackHandle,
    ) -> Result<Arc<dyn BackgroundChannel>, LaunchError> {
        tracing::info!(entrypoint = %entrypoint, "Provisioning in-process runtime");
        Ok(Arc::new(PrintingChannel))
    }
}

struct PrintingChannel;

impl BackgroundChannel for PrintingChannel {
    fn invoke(&self, method: &str, payload: BridgeMap) -> Result<(), BridgeError> {
        let rendered = serde_json::to_string(&payload)
            .map_err(|e| BridgeError::Serialization(e.to_string()))?;
        println!("background {method}: {rendered}");
        Ok(())
    }
}

/// Suppress silent notifications through the prevent-default path.
fn decision_sink(gate: Arc<CompletionGate>) -> impl Fn(BridgeMap) + Send + Sync + 'static {
    move |view: BridgeMap| {
        let Some(id) = view.get("notificationId").and_then(BridgeValue::as_str) else {
            tracing::warn!("Decision sink received an event without an id");
            return;
        };
        let silent = view
            .get("payload")
            .and_then(BridgeValue::as_map)
            .and_then(|p| p.get("silent"))
            .and_then(BridgeValue::as_bool)
            .unwrap_or(false);

        if silent {
            gate.prevent_default(id);
            gate.proceed(id);
        } else {
            gate.display(id);
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = BridgeConfig::load_or_default(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    init_tracing(config.log_level());

    let budget = config.drain_budget();
    let (bridge, mut queue) =
        Bridge::open(config, Arc::new(InProcessRuntime)).context("opening handle store")?;

    let handoff = bridge.handoff();
    if handoff.dispatcher_handle().is_none()
        && let Some(handle) = CallbackHandle::new(DISPATCHER_HANDLE)
    {
        handoff.register_dispatcher_handle(handle)?;
    }
    if handoff.user_handle().is_none()
        && let Some(handle) = CallbackHandle::new(USER_HANDLE)
    {
        handoff.register_user_handle(handle)?;
    }

    bridge.register_decision_sink(decision_sink(Arc::clone(bridge.gate())));

    let (done_tx, done_rx) = mpsc::channel();
    let workers: Vec<_> = (0..cli.events)
        .map(|i| {
            let gate = Arc::clone(bridge.gate());
            let done_tx = done_tx.clone();
            thread::spawn(move || {
                let id = format!("notif-{i}");
                let payload = json!({
                    "title": format!("Notification {i}"),
                    "silent": i % 3 == 0,
                });
                let event = NotificationEvent::new(id.as_str().into(), payload, SystemTime::now());
                let decision = gate.submit(event);
                // The receiver outlives every worker.
                let _ = done_tx.send((id, decision));
            })
        })
        .collect();
    drop(done_tx);

    let mut decided = 0;
    while decided < cli.events {
        queue.pump(budget);
        match done_rx.recv_timeout(Duration::from_millis(5)) {
            Ok((id, decision)) => {
                decided += 1;
                println!("{id}: {}", decision.as_str());
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    let background = NotificationEvent::new(
        "notif-background".into(),
        json!({ "title": "Delivered while backgrounded" }),
        SystemTime::now(),
    );
    if !bridge.deliver_background(&background)? {
        println!("no background handler registered");
    }
    tracing::debug!(
        method = methods::BACKGROUND_NOTIFICATION,
        ready = bridge.launcher().is_ready(),
        "Background handoff finished"
    );

    let released = bridge.shutdown();
    for worker in workers {
        if worker.join().is_err() {
            tracing::warn!("Worker thread panicked");
        }
    }
    queue.pump(budget);
    tracing::info!(decided, released, "Herald demo finished");
    Ok(())
}
